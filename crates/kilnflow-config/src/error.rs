use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("ビルド設定が不正です: {0}")]
    InvalidConfig(String),

    #[error(
        "イメージ定義ファイルが見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ: images.yaml\n\
        - ./.kilnflow/ ディレクトリ\n\
        - ~/.config/kilnflow/images.yaml\n\
        または KILN_TARGETS_PATH 環境変数で直接指定できます"
    )]
    TargetsFileNotFound,

    #[error("テンプレート展開エラー: {0}")]
    Template(#[from] tera::Error),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ConfigError::InvalidConfig(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
