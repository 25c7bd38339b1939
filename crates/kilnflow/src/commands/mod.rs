pub mod build;
pub mod df;
pub mod list;
pub mod render;

use kilnflow_build::{BuildError, TargetGraph};
use std::path::Path;

/// エラーをユーザー向けのメッセージに変換
pub fn user_message(error: &anyhow::Error) -> String {
    match error.downcast_ref::<BuildError>() {
        Some(build_error) => build_error.user_message(),
        None => format!("{:#}", error),
    }
}

/// イメージ定義を読み込み、パターンで絞り込む
pub fn load_targets(patterns: &[String], targets: Option<&Path>) -> anyhow::Result<TargetGraph> {
    let path = match targets {
        Some(path) => path.to_path_buf(),
        None => kilnflow_config::find_targets_file()?,
    };
    tracing::debug!(path = %path.display(), "loading image targets");

    let graph = TargetGraph::load(&path)?;
    Ok(graph.filter(patterns)?)
}
