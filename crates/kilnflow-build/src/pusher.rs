//! イメージプッシュ処理
//!
//! ビルドしたイメージをコンテナレジストリにプッシュします。

use crate::error::{BuildError, BuildResult};
use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::models::PushImageInfo;
use futures_util::StreamExt;

/// イメージのプッシュ先
#[async_trait]
pub trait ImagePublisher: Send + Sync {
    /// イメージをプッシュし、プッシュした完全なイメージ名を返す
    async fn push(
        &self,
        image: &str,
        tag: &str,
        credentials: Option<DockerCredentials>,
    ) -> BuildResult<String>;
}

/// Docker デーモン経由でプッシュする実装
pub struct DockerPusher {
    docker: Docker,
}

impl DockerPusher {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// プッシュ進捗をログに出す
    fn handle_progress(&self, image: &str, info: &PushImageInfo, last_status: &mut String) {
        let Some(status) = &info.status else {
            return;
        };

        match status.as_str() {
            // 準備中・転送中はノイズになるので debug のみ
            "Preparing" | "Waiting" | "Pushing" => {
                tracing::trace!(image = %image, status = %status, "push progress");
            }
            "Pushed" | "Layer already exists" => {
                tracing::debug!(image = %image, status = %status, "layer done");
            }
            _ => {
                if status != last_status {
                    tracing::debug!(image = %image, status = %status, "push status");
                    *last_status = status.clone();
                }
            }
        }
    }
}

#[async_trait]
impl ImagePublisher for DockerPusher {
    async fn push(
        &self,
        image: &str,
        tag: &str,
        credentials: Option<DockerCredentials>,
    ) -> BuildResult<String> {
        let full_image = format!("{}:{}", image, tag);

        kilnflow_config::validate_tag(tag).map_err(|e| BuildError::PushFailed {
            message: e.to_string(),
        })?;

        #[allow(deprecated)]
        let options = bollard::image::PushImageOptions::<String> {
            tag: tag.to_string(),
        };

        tracing::info!(image = %full_image, "pushing image");

        #[allow(deprecated)]
        let mut stream = self.docker.push_image(image, Some(options), credentials);

        let mut last_status = String::new();
        let mut error_message: Option<String> = None;

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(err) = info.error {
                        error_message = Some(err);
                    } else {
                        self.handle_progress(&full_image, &info, &mut last_status);
                    }
                }
                Err(e) => {
                    return Err(BuildError::PushFailed {
                        message: e.to_string(),
                    });
                }
            }
        }

        if let Some(err) = error_message {
            return Err(BuildError::PushFailed { message: err });
        }

        Ok(full_image)
    }
}
