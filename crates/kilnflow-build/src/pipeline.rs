//! 一回の実行の手順
//!
//! 設定ファイル出力 → レジストリセッション → コーディネーター → 結果サマリー
//! の順に実行する。レジストリセッションはどの経路で終了しても解放される。

use crate::auth::{
    DEFAULT_REGISTRY, DockerCliAuthenticator, RegistryAuthenticator, RegistryCredentials,
    RegistrySession,
};
use crate::coordinator::BuildCoordinator;
use crate::engine::BuildEngine;
use crate::error::BuildResult;
use crate::progress::RunProgress;
use crate::pusher::ImagePublisher;
use crate::result_log::{BuildOutcome, PushOutcome, ResultLog, RunSummary};
use crate::storage::{StorageDaemon, StorageReport, StorageReporter};
use crate::target::TargetGraph;
use bollard::auth::DockerCredentials;
use kilnflow_config::BuildConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// 一回の実行の結果
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: RunSummary,
    pub outcomes: Vec<BuildOutcome>,
    pub pushes: Vec<PushOutcome>,
    /// `results.jsonl` のパス
    pub results_path: PathBuf,
}

pub struct Pipeline {
    config: Arc<BuildConfig>,
    engine: Arc<dyn BuildEngine>,
    logs_dir: PathBuf,
    publisher: Option<Arc<dyn ImagePublisher>>,
    authenticator: Arc<dyn RegistryAuthenticator>,
    credentials: Option<RegistryCredentials>,
    storage: Option<Arc<dyn StorageDaemon>>,
    show_progress: bool,
}

impl Pipeline {
    pub fn new(
        config: Arc<BuildConfig>,
        engine: Arc<dyn BuildEngine>,
        logs_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            engine,
            logs_dir: logs_dir.into(),
            publisher: None,
            authenticator: Arc::new(DockerCliAuthenticator::default()),
            credentials: None,
            storage: None,
            show_progress: false,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn ImagePublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// プッシュ時に使うレジストリ認証
    pub fn with_registry(
        mut self,
        authenticator: Arc<dyn RegistryAuthenticator>,
        credentials: Option<RegistryCredentials>,
    ) -> Self {
        self.authenticator = authenticator;
        self.credentials = credentials;
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageDaemon>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// 実行してサマリーを返す
    ///
    /// 認証失敗はビルドを一つも開始せずにエラーを返す。
    pub async fn run(
        &self,
        graph: &TargetGraph,
        cancel: watch::Receiver<bool>,
    ) -> BuildResult<RunSummary> {
        Ok(self.run_report(graph, cancel).await?.summary)
    }

    /// 実行して各ターゲットの結果も返す
    ///
    /// 対象が空でも `results.jsonl` は件数 0 のサマリーで書き直す。
    /// その場合レジストリにはログインしない。
    pub async fn run_report(
        &self,
        graph: &TargetGraph,
        cancel: watch::Receiver<bool>,
    ) -> BuildResult<RunReport> {
        let session = if self.config.push_enabled() && !graph.is_empty() {
            let registry = self.config.registry().unwrap_or(DEFAULT_REGISTRY);
            let session = RegistrySession::open(
                Arc::clone(&self.authenticator),
                self.credentials.clone(),
                registry,
            )
            .await?;
            tracing::debug!(
                registry = %session.registry(),
                anonymous = session.is_anonymous(),
                "registry session opened"
            );
            Some(session)
        } else {
            None
        };

        let credentials = session.as_ref().and_then(|s| s.docker_credentials());
        let result = self.execute(graph, credentials, cancel).await;

        if let Some(session) = session {
            session.release().await;
        }

        result
    }

    async fn execute(
        &self,
        graph: &TargetGraph,
        credentials: Option<DockerCredentials>,
        cancel: watch::Receiver<bool>,
    ) -> BuildResult<RunReport> {
        let config_file = kilnflow_config::write_engine_config(&self.config, &self.logs_dir)?;
        tracing::debug!(path = %config_file.display(), "engine config written");

        let log = Arc::new(ResultLog::create(&self.logs_dir)?);
        let progress = if self.show_progress {
            RunProgress::new(graph.len())
        } else {
            RunProgress::hidden()
        };

        let mut coordinator = BuildCoordinator::new(
            Arc::clone(&self.config),
            Arc::clone(&self.engine),
            Arc::clone(&log),
            config_file,
            self.logs_dir.clone(),
        )
        .with_progress(progress);
        if let Some(publisher) = &self.publisher {
            coordinator = coordinator.with_publisher(Arc::clone(publisher));
        }

        let run_result = coordinator.run(graph, credentials, cancel).await;
        // エラー終了でも記録済みの結果はサマリーに残す
        log.close();
        run_result?;

        let summary = log.finish()?;
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            pushed = summary.pushed,
            push_failed = summary.push_failed,
            cancelled = summary.cancelled,
            results = %log.path().display(),
            "run summary"
        );
        Ok(RunReport {
            summary,
            outcomes: log.outcomes(),
            pushes: log.push_outcomes(),
            results_path: log.path().to_path_buf(),
        })
    }

    /// 実行後のストレージ使用量
    ///
    /// 問い合わせ失敗は警告ログのみで `None` を返す。
    pub async fn storage_report(&self) -> Option<StorageReport> {
        let daemon = self.storage.as_ref()?;
        let reporter = StorageReporter::new(Arc::clone(daemon));
        let prefix = match self.config.registry() {
            Some(registry) => format!("{}/{}/", registry, self.config.namespace()),
            None => format!("{}/", self.config.namespace()),
        };
        match reporter.report_for(&prefix).await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!(error = %e, "storage usage is unavailable");
                None
            }
        }
    }
}
