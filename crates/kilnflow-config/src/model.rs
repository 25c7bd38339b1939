//! ビルド設定モデル
//!
//! 呼び出し側から渡されたパラメータを検証し、不変の [`BuildConfig`] を生成します。

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Docker タグの最大長
pub const MAX_TAG_LEN: usize = 128;

/// パッケージのインストール方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    /// ソースからビルドしてインストール
    Source,
    /// ディストリビューションのバイナリパッケージを使用
    Binary,
}

impl InstallMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallMode::Source => "source",
            InstallMode::Binary => "binary",
        }
    }
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "source" => Ok(InstallMode::Source),
            "binary" => Ok(InstallMode::Binary),
            other => Err(ConfigError::invalid(format!(
                "install mode '{}' は使用できません (source / binary)",
                other
            ))),
        }
    }
}

/// 設定生成に使うパラメータ
///
/// CLI・環境変数などから集めた未検証の値。
#[derive(Debug, Clone)]
pub struct ConfigParams {
    pub base: String,
    pub install_mode: InstallMode,
    pub namespace: String,
    pub tag: String,
    pub build_threads: usize,
    pub push_threads: usize,
    pub maintainer: String,
    pub push: bool,
    pub registry: Option<String>,
}

impl Default for ConfigParams {
    fn default() -> Self {
        Self {
            base: "centos".to_string(),
            install_mode: InstallMode::Binary,
            namespace: "kiln".to_string(),
            tag: "latest".to_string(),
            build_threads: 8,
            push_threads: 4,
            maintainer: "Kilnflow Project".to_string(),
            push: false,
            registry: None,
        }
    }
}

/// 検証済みの不変ビルド設定
///
/// [`render`] でのみ生成される。フィールドは読み取り専用。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildConfig {
    base: String,
    install_mode: InstallMode,
    namespace: String,
    tag: String,
    build_threads: usize,
    push_threads: usize,
    maintainer: String,
    push: bool,
    registry: Option<String>,
}

impl BuildConfig {
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn install_mode(&self) -> InstallMode {
        self.install_mode
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn build_threads(&self) -> usize {
        self.build_threads
    }

    pub fn push_threads(&self) -> usize {
        self.push_threads
    }

    pub fn maintainer(&self) -> &str {
        &self.maintainer
    }

    pub fn push_enabled(&self) -> bool {
        self.push
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    /// タグなしのイメージ名
    ///
    /// `[{registry}/]{namespace}/{base}-{install_mode}-{target}`
    pub fn image_name(&self, target: &str) -> String {
        let name = format!(
            "{}/{}-{}-{}",
            self.namespace, self.base, self.install_mode, target
        );
        match &self.registry {
            Some(registry) => format!("{}/{}", registry, name),
            None => name,
        }
    }

    /// タグ付きのイメージ参照
    pub fn image_ref(&self, target: &str) -> String {
        format!("{}:{}", self.image_name(target), self.tag)
    }
}

/// パラメータから [`BuildConfig`] を生成
///
/// 副作用なし。namespace / tag が空、またはスレッド数が 0 の場合は
/// [`ConfigError::InvalidConfig`] を返す。
pub fn render(params: ConfigParams) -> Result<BuildConfig> {
    let base = params.base.trim().to_string();
    let namespace = params.namespace.trim().to_string();
    let tag = params.tag.trim().to_string();

    if base.is_empty() {
        return Err(ConfigError::invalid("base が空です"));
    }
    reject_control_chars("base", &base)?;
    reject_control_chars("namespace", &namespace)?;
    if namespace.is_empty() {
        return Err(ConfigError::invalid("namespace が空です"));
    }
    validate_tag(&tag)?;

    if params.build_threads < 1 {
        return Err(ConfigError::invalid(
            "build threads は 1 以上を指定してください",
        ));
    }
    if params.push_threads < 1 {
        return Err(ConfigError::invalid(
            "push threads は 1 以上を指定してください",
        ));
    }

    let registry = params
        .registry
        .map(|r| r.trim().trim_end_matches('/').to_string())
        .filter(|r| !r.is_empty());
    if let Some(registry) = &registry {
        reject_control_chars("registry", registry)?;
    }

    let maintainer = params.maintainer.trim().to_string();
    reject_control_chars("maintainer", &maintainer)?;

    Ok(BuildConfig {
        base,
        install_mode: params.install_mode,
        namespace,
        tag,
        build_threads: params.build_threads,
        push_threads: params.push_threads,
        maintainer,
        push: params.push,
        registry,
    })
}

/// 設定ファイルに展開される値は一行に収まる必要がある
fn reject_control_chars(field: &str, value: &str) -> Result<()> {
    if value.chars().any(char::is_control) {
        return Err(ConfigError::invalid(format!(
            "{} に改行などの制御文字は使用できません",
            field
        )));
    }
    Ok(())
}

/// Docker タグのバリデーション
///
/// - 128文字以下
/// - 英数字、ピリオド、ハイフン、アンダースコアのみ
/// - 先頭はピリオドまたはハイフンではない
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(ConfigError::invalid("tag が空です"));
    }

    if tag.len() > MAX_TAG_LEN {
        return Err(ConfigError::invalid(format!(
            "tag が長すぎます ({} 文字, 最大 {})",
            tag.len(),
            MAX_TAG_LEN
        )));
    }

    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(ConfigError::invalid(format!(
            "tag '{}' はピリオドまたはハイフンで始められません",
            tag
        )));
    }

    if let Some(c) = tag
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '.' && *c != '-' && *c != '_')
    {
        return Err(ConfigError::invalid(format!(
            "tag '{}' に使用できない文字 '{}' が含まれています",
            tag, c
        )));
    }

    Ok(())
}
