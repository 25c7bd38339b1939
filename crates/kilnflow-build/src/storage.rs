//! ストレージ使用量レポート
//!
//! 実行完了後にコンテナストレージのディスク使用量を問い合わせる。
//! 観測用のみで、失敗しても実行結果には影響しない。

use crate::error::{BuildError, BuildResult};
use async_trait::async_trait;
use bollard::Docker;
use serde::Serialize;

/// イメージ一つ分の使用量
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerUsage {
    /// リポジトリタグ (タグが無い場合はイメージID)
    pub image: String,
    pub size: u64,
    /// 他イメージと共有しているレイヤーのサイズ
    pub shared_size: u64,
}

/// ストレージ使用量
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageReport {
    pub total_usage: u64,
    pub per_layer_usage: Vec<LayerUsage>,
}

impl StorageReport {
    /// 指定したプレフィックスで始まるイメージのみに絞る
    pub fn filter_prefix(mut self, prefix: &str) -> Self {
        self.per_layer_usage
            .retain(|usage| usage.image.starts_with(prefix));
        self
    }
}

/// コンテナストレージへの問い合わせ
#[async_trait]
pub trait StorageDaemon: Send + Sync {
    async fn data_usage(&self) -> BuildResult<StorageReport>;
}

#[async_trait]
impl<D: StorageDaemon + ?Sized> StorageDaemon for std::sync::Arc<D> {
    async fn data_usage(&self) -> BuildResult<StorageReport> {
        (**self).data_usage().await
    }
}

/// Docker デーモンの `system df` を使う実装
pub struct DockerStorage {
    docker: Docker,
}

impl DockerStorage {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[async_trait]
impl StorageDaemon for DockerStorage {
    async fn data_usage(&self) -> BuildResult<StorageReport> {
        let usage = self
            .docker
            .df(None::<bollard::query_parameters::DataUsageOptions>)
            .await
            .map_err(|e| BuildError::StorageQuery(e.to_string()))?;

        let per_layer_usage = usage
            .images
            .unwrap_or_default()
            .into_iter()
            .flat_map(|image| {
                let size = non_negative(image.size);
                let shared_size = non_negative(image.shared_size);
                let names = if image.repo_tags.is_empty() {
                    vec![image.id.clone()]
                } else {
                    image.repo_tags.clone()
                };
                names.into_iter().map(move |name| LayerUsage {
                    image: name,
                    size,
                    shared_size,
                })
            })
            .collect();

        Ok(StorageReport {
            total_usage: usage.layers_size.map(non_negative).unwrap_or(0),
            per_layer_usage,
        })
    }
}

/// ビルド後のストレージ使用量を報告する
pub struct StorageReporter<D: StorageDaemon> {
    daemon: D,
}

impl<D: StorageDaemon> StorageReporter<D> {
    pub fn new(daemon: D) -> Self {
        Self { daemon }
    }

    /// 全体と各イメージの使用量
    pub async fn report(&self) -> BuildResult<StorageReport> {
        let report = self.daemon.data_usage().await.map_err(|e| match e {
            BuildError::StorageQuery(_) => e,
            other => BuildError::StorageQuery(other.to_string()),
        })?;

        tracing::info!(
            total_bytes = report.total_usage,
            images = report.per_layer_usage.len(),
            "storage usage"
        );
        Ok(report)
    }

    /// 指定したイメージ名プレフィックスに絞った使用量
    pub async fn report_for(&self, prefix: &str) -> BuildResult<StorageReport> {
        Ok(self.report().await?.filter_prefix(prefix))
    }
}

/// バイト数を読みやすい形式に変換
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{}B", bytes)
    } else {
        format!("{:.1}{}", value, UNITS[unit])
    }
}
