//! レジストリ認証処理
//!
//! 実行ごとに一度だけレジストリへログインし、全てのプッシュが終わった後に
//! 必ずログアウトするスコープ付きセッションを提供します。

use crate::error::{BuildError, BuildResult};
use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Docker Hub のデフォルトレジストリ
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// オペレーターが指定したレジストリ認証情報
#[derive(Clone)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
    pub registry: String,
}

impl RegistryCredentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        registry: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            registry: registry.into(),
        }
    }
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("registry", &self.registry)
            .finish()
    }
}

/// レジストリ認証の実体
///
/// 通常は [`DockerCliAuthenticator`] を使用。テストではフェイクに差し替える。
#[async_trait]
pub trait RegistryAuthenticator: Send + Sync {
    /// 認証を一回だけ実行する
    async fn login(&self, credentials: &RegistryCredentials) -> BuildResult<()>;

    /// 認証情報を破棄する
    async fn logout(&self, registry: &str) -> BuildResult<()>;
}

/// `docker login` / `docker logout` を使った認証
#[derive(Debug, Clone)]
pub struct DockerCliAuthenticator {
    program: String,
}

impl Default for DockerCliAuthenticator {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCliAuthenticator {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl RegistryAuthenticator for DockerCliAuthenticator {
    async fn login(&self, credentials: &RegistryCredentials) -> BuildResult<()> {
        let registry = credentials.registry.clone();
        let auth_failed = |message: String| BuildError::AuthFailed {
            registry: registry.clone(),
            message,
        };

        let mut child = Command::new(&self.program)
            .arg("login")
            .arg("--username")
            .arg(&credentials.username)
            .arg("--password-stdin")
            .arg(&credentials.registry)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| auth_failed(format!("Failed to run {} login: {}", self.program, e)))?;

        // パスワードは引数ではなく stdin で渡す
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(credentials.password.as_bytes())
                .await
                .map_err(|e| auth_failed(format!("Failed to send password: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| auth_failed(format!("{} login failed: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(auth_failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(())
    }

    async fn logout(&self, registry: &str) -> BuildResult<()> {
        let output = Command::new(&self.program)
            .arg("logout")
            .arg(registry)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(BuildError::AuthFailed {
                registry: registry.to_string(),
                message: format!(
                    "logout failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(())
    }
}

/// 一回の実行に紐づくレジストリセッション
///
/// プッシュワーカー起動前に [`RegistrySession::open`] で取得し、
/// 実行の終了時に必ず [`RegistrySession::release`] で解放する。
pub struct RegistrySession {
    authenticator: Arc<dyn RegistryAuthenticator>,
    credentials: Option<RegistryCredentials>,
    registry: String,
    released: bool,
}

impl fmt::Debug for RegistrySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrySession")
            .field("registry", &self.registry)
            .field("anonymous", &self.credentials.is_none())
            .field("released", &self.released)
            .finish()
    }
}

impl RegistrySession {
    /// レジストリに認証してセッションを開く
    ///
    /// 認証失敗はリトライせずにそのまま返す。認証情報が無い場合は
    /// 匿名セッションとなり、ログイン処理は行わない。
    pub async fn open(
        authenticator: Arc<dyn RegistryAuthenticator>,
        credentials: Option<RegistryCredentials>,
        registry: &str,
    ) -> BuildResult<Self> {
        let credentials = credentials.map(|mut c| {
            if c.registry.is_empty() {
                c.registry = registry.to_string();
            }
            c
        });

        match &credentials {
            Some(creds) => {
                tracing::info!(
                    registry = %creds.registry,
                    username = %creds.username,
                    "logging in to registry"
                );
                authenticator.login(creds).await?;
            }
            None => {
                tracing::info!(registry = %registry, "no registry credentials, using anonymous session");
            }
        }

        Ok(Self {
            registry: credentials
                .as_ref()
                .map(|c| c.registry.clone())
                .unwrap_or_else(|| registry.to_string()),
            authenticator,
            credentials,
            released: false,
        })
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn is_anonymous(&self) -> bool {
        self.credentials.is_none()
    }

    /// プッシュ用の認証情報
    pub fn docker_credentials(&self) -> Option<DockerCredentials> {
        self.credentials.as_ref().map(|c| DockerCredentials {
            username: Some(c.username.clone()),
            password: Some(c.password.clone()),
            serveraddress: Some(c.registry.clone()),
            ..Default::default()
        })
    }

    /// セッションを解放（ログアウト）
    ///
    /// ログアウトの失敗は実行結果に影響させず警告のみ。
    pub async fn release(mut self) {
        self.released = true;

        if self.credentials.is_none() {
            tracing::debug!(registry = %self.registry, "released anonymous registry session");
            return;
        }

        match self.authenticator.logout(&self.registry).await {
            Ok(()) => tracing::info!(registry = %self.registry, "logged out from registry"),
            Err(e) => tracing::warn!(registry = %self.registry, error = %e, "registry logout failed"),
        }
    }
}

impl Drop for RegistrySession {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(
                registry = %self.registry,
                "registry session dropped without release"
            );
        }
    }
}
