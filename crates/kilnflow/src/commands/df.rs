use crate::docker;
use kilnflow_build::{DockerStorage, StorageReporter};

/// コンテナストレージの使用量を表示
pub async fn handle(namespace: Option<&str>) -> anyhow::Result<()> {
    let docker_conn = docker::init_docker_with_error_handling().await?;
    let reporter = StorageReporter::new(DockerStorage::new(docker_conn));

    let report = match namespace {
        Some(namespace) => reporter.report_for(&format!("{}/", namespace)).await?,
        None => reporter.report().await?,
    };

    super::build::print_storage(&report);
    Ok(())
}
