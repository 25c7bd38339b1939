//! Kilnflow ビルド設定
//!
//! パラメータの検証と不変な [`BuildConfig`] の生成、ビルドエンジン用
//! 設定ファイルの展開、イメージ定義ファイルの探索を提供します。

pub mod error;
pub mod model;
pub mod template;

pub use error::*;
pub use model::{BuildConfig, ConfigParams, InstallMode, render, validate_tag};
pub use template::{ENGINE_CONFIG_FILE, render_engine_config, write_engine_config};

use std::path::PathBuf;

/// イメージ定義ファイル名
pub const TARGETS_FILE: &str = "images.yaml";

/// イメージ定義ファイル (images.yaml) を探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 KILN_TARGETS_PATH (直接パス指定)
/// 2. カレントディレクトリ: images.yaml
/// 3. ./.kilnflow/ ディレクトリ内
/// 4. ~/.config/kilnflow/images.yaml (グローバル設定)
pub fn find_targets_file() -> Result<PathBuf> {
    if let Ok(targets_path) = std::env::var("KILN_TARGETS_PATH") {
        let path = PathBuf::from(targets_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(path = %path.display(), "KILN_TARGETS_PATH does not exist, falling back");
    }

    let current_dir = std::env::current_dir()?;

    let path = current_dir.join(TARGETS_FILE);
    if path.exists() {
        return Ok(path);
    }

    let path = current_dir.join(".kilnflow").join(TARGETS_FILE);
    if path.exists() {
        return Ok(path);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("kilnflow").join(TARGETS_FILE);
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::TargetsFileNotFound)
}
