use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Invalid build configuration: {0}")]
    InvalidConfig(#[from] kilnflow_config::ConfigError),

    #[error("Authentication to {registry} failed: {message}")]
    AuthFailed { registry: String, message: String },

    #[error("Build of '{target}' failed: {message}")]
    BuildFailed {
        target: String,
        message: String,
        log_path: Option<PathBuf>,
    },

    #[error("Push failed: {message}")]
    PushFailed { message: String },

    #[error("Storage query failed: {0}")]
    StorageQuery(String),

    #[error("Invalid targets manifest: {0}")]
    InvalidManifest(String),

    #[error("Duplicate image target: {0}")]
    DuplicateTarget(String),

    #[error("Image '{target}' depends on unknown parent '{parent}'")]
    UnknownParent { target: String, parent: String },

    #[error("Dependency cycle detected at image '{0}'")]
    CycleDetected(String),

    #[error("Invalid target pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Outcome for '{0}' was already recorded")]
    DuplicateOutcome(String),

    #[error("Result log is closed")]
    LogClosed,

    #[error("Run is still in progress")]
    RunInProgress,

    #[error("Docker connection error: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::InvalidConfig(e) => {
                format!(
                    "{}\n\
                     \n\
                     --namespace / --tag / --threads / --push-threads の値を確認してください。",
                    e
                )
            }
            BuildError::AuthFailed { registry, message } => {
                format!(
                    "レジストリ {} への認証に失敗しました: {}\n\
                     \n\
                     解決方法:\n\
                     1. KILN_REGISTRY_USERNAME / KILN_REGISTRY_PASSWORD を確認してください\n\
                     2. 認証は自動でリトライされません。修正後に再実行してください",
                    registry, message
                )
            }
            BuildError::BuildFailed {
                target,
                message,
                log_path: Some(log_path),
            } => {
                format!(
                    "'{}' のビルドに失敗しました: {}\n\
                     \n\
                     ログ: {}",
                    target,
                    message,
                    log_path.display()
                )
            }
            BuildError::CycleDetected(target) => {
                format!(
                    "イメージ定義に循環依存があります: {}\n\
                     \n\
                     images.yaml の parent 指定を確認してください。",
                    target
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
pub type BuildResult<T> = Result<T>;
