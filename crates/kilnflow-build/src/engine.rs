//! ビルドエンジン呼び出し
//!
//! イメージのビルドそのものは外部のビルドエンジンに委譲する。
//! コーディネーターは [`BuildEngine`] トレイトにのみ依存する。

use crate::error::{BuildError, BuildResult};
use async_trait::async_trait;
use bollard::Docker;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// 一つのイメージのビルド要求
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// ターゲット名
    pub target: String,
    /// タグ付きイメージ参照
    pub image: String,
    /// エンジン用設定ファイル
    pub config_file: PathBuf,
    /// ログ出力ディレクトリ
    pub logs_dir: PathBuf,
}

impl BuildRequest {
    /// このターゲットのエンジンログのパス
    pub fn log_path(&self) -> PathBuf {
        self.logs_dir.join(format!("{}.log", self.target))
    }
}

/// ビルド成功時の報告
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineReport {
    /// 生成されたイメージのサイズ (bytes)
    pub image_size: Option<u64>,
    /// エンジンのログ出力先
    pub log_path: Option<PathBuf>,
}

/// 外部ビルドエンジン
#[async_trait]
pub trait BuildEngine: Send + Sync {
    /// ターゲットを一つビルドする
    ///
    /// 呼び出し側から見てブロッキング。失敗時は [`BuildError::BuildFailed`]。
    async fn build(&self, request: &BuildRequest) -> BuildResult<EngineReport>;
}

/// 外部コマンドとしてエンジンを起動する実装
///
/// `{program} [args..] --config-file {conf} --logs-dir {dir} {target}`
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
    docker: Option<Docker>,
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            docker: None,
        }
    }

    /// プログラム名の直後に渡す追加引数
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// ビルド後のイメージサイズ取得に使う Docker 接続
    pub fn with_docker(mut self, docker: Docker) -> Self {
        self.docker = Some(docker);
        self
    }

    fn open_log(path: &Path) -> BuildResult<(Stdio, Stdio)> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stdout = std::fs::File::create(path)?;
        let stderr = stdout.try_clone()?;
        Ok((Stdio::from(stdout), Stdio::from(stderr)))
    }

    async fn image_size(&self, image: &str) -> Option<u64> {
        let docker = self.docker.as_ref()?;
        match docker.inspect_image(image).await {
            Ok(inspect) => inspect.size.and_then(|s| u64::try_from(s).ok()),
            Err(e) => {
                tracing::warn!(image = %image, error = %e, "failed to inspect built image");
                None
            }
        }
    }
}

#[async_trait]
impl BuildEngine for CommandEngine {
    async fn build(&self, request: &BuildRequest) -> BuildResult<EngineReport> {
        let log_path = request.log_path();
        let (stdout, stderr) = Self::open_log(&log_path)?;

        tracing::info!(
            target_image = %request.target,
            log = %log_path.display(),
            "invoking build engine"
        );

        let status = Command::new(&self.program)
            .args(&self.args)
            .arg("--config-file")
            .arg(&request.config_file)
            .arg("--logs-dir")
            .arg(&request.logs_dir)
            .arg(&request.target)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| BuildError::BuildFailed {
                target: request.target.clone(),
                message: format!("failed to run {}: {}", self.program.display(), e),
                log_path: Some(log_path.clone()),
            })?;

        if !status.success() {
            let message = match status.code() {
                Some(code) => format!("engine exited with status {}", code),
                None => "engine terminated by signal".to_string(),
            };
            return Err(BuildError::BuildFailed {
                target: request.target.clone(),
                message,
                log_path: Some(log_path),
            });
        }

        Ok(EngineReport {
            image_size: self.image_size(&request.image).await,
            log_path: Some(log_path),
        })
    }
}
