//! ビルド・プッシュのコーディネーター
//!
//! 依存グラフに従ってビルド可能になったターゲットを ready キューに積み、
//! `build_threads` 個までのビルドワーカーと `push_threads` 個までの
//! プッシュワーカーを並列に動かします。
//!
//! - ターゲットは全ての親が成功した瞬間に一度だけ ready になる
//! - ビルドは各ターゲット一回のみ。失敗してもリトライしない
//! - 失敗したターゲットの子孫は全て `skipped` として記録し、エンジンは呼ばない
//! - キャンセル時は実行中の呼び出しの完了を待ち、新しい仕事は取り出さない

use crate::engine::{BuildEngine, BuildRequest, EngineReport};
use crate::error::{BuildError, BuildResult};
use crate::progress::RunProgress;
use crate::pusher::ImagePublisher;
use crate::result_log::{BuildOutcome, PushOutcome, ResultLog};
use crate::target::TargetGraph;
use bollard::auth::DockerCredentials;
use kilnflow_config::BuildConfig;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// 破棄されたら内側のタスクを中断するハンドル
///
/// ワーカーを包む外側のタスクが JoinSet ごと破棄された場合に、
/// エンジンやプッシュの呼び出しだけが残り続けないようにする。
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// スケジューリング状態
///
/// コーディネーターのタスクだけが所有する。ワーカーは結果を返すのみ。
struct Schedule<'g> {
    graph: &'g TargetGraph,
    pending_parents: HashMap<String, usize>,
    resolved: HashSet<String>,
    ready: VecDeque<String>,
    push_queue: VecDeque<String>,
}

impl<'g> Schedule<'g> {
    fn new(graph: &'g TargetGraph) -> Self {
        let pending_parents: HashMap<String, usize> = graph
            .order()
            .map(|t| (t.name.clone(), graph.parent_count(&t.name)))
            .collect();
        let ready = graph
            .order()
            .filter(|t| pending_parents[&t.name] == 0)
            .map(|t| t.name.clone())
            .collect();

        Self {
            graph,
            pending_parents,
            resolved: HashSet::new(),
            ready,
            push_queue: VecDeque::new(),
        }
    }

    fn next_build(&mut self) -> Option<String> {
        self.ready.pop_front()
    }

    fn next_push(&mut self) -> Option<String> {
        self.push_queue.pop_front()
    }

    /// ビルド成功。親が揃った子を ready に移す
    fn succeeded(&mut self, target: &str, push: bool) {
        self.resolved.insert(target.to_string());
        if push {
            self.push_queue.push_back(target.to_string());
        }

        let graph = self.graph;
        for child in graph.children(target) {
            let Some(count) = self.pending_parents.get_mut(child) else {
                continue;
            };
            *count = count.saturating_sub(1);
            if *count == 0 && !self.resolved.contains(child) {
                debug!(image = %child, "image ready");
                self.ready.push_back(child.to_string());
            }
        }
    }

    /// ビルド失敗。新たにスキップとなった子孫を返す
    fn failed(&mut self, target: &str) -> Vec<String> {
        self.resolved.insert(target.to_string());

        let graph = self.graph;
        graph
            .descendants(target)
            .into_iter()
            .filter(|name| self.resolved.insert(name.to_string()))
            .map(str::to_string)
            .collect()
    }

    /// まだ最終状態になっていないターゲット (トポロジカル順)
    fn unresolved(&self) -> Vec<String> {
        self.graph
            .order()
            .filter(|t| !self.resolved.contains(&t.name))
            .map(|t| t.name.clone())
            .collect()
    }
}

struct BuildCompletion {
    target: String,
    elapsed: Duration,
    result: BuildResult<EngineReport>,
}

struct PushCompletion {
    target: String,
    image: String,
    elapsed: Duration,
    result: BuildResult<String>,
}

/// ビルドとプッシュの二つのワーカープールを駆動する
pub struct BuildCoordinator {
    config: Arc<BuildConfig>,
    engine: Arc<dyn BuildEngine>,
    publisher: Option<Arc<dyn ImagePublisher>>,
    log: Arc<ResultLog>,
    config_file: PathBuf,
    logs_dir: PathBuf,
    progress: RunProgress,
}

impl BuildCoordinator {
    pub fn new(
        config: Arc<BuildConfig>,
        engine: Arc<dyn BuildEngine>,
        log: Arc<ResultLog>,
        config_file: PathBuf,
        logs_dir: PathBuf,
    ) -> Self {
        Self {
            config,
            engine,
            publisher: None,
            log,
            config_file,
            logs_dir,
            progress: RunProgress::hidden(),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn ImagePublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_progress(mut self, progress: RunProgress) -> Self {
        self.progress = progress;
        self
    }

    fn push_enabled(&self) -> bool {
        self.config.push_enabled() && self.publisher.is_some()
    }

    /// 全ターゲットが最終状態になるまで実行する
    ///
    /// 終了時に結果ログを close する。この future を途中で破棄すると
    /// 実行中のビルド・プッシュも中断され、結果ログは閉じられない。
    pub async fn run(
        &self,
        graph: &TargetGraph,
        credentials: Option<DockerCredentials>,
        mut cancel: watch::Receiver<bool>,
    ) -> BuildResult<()> {
        if self.log.is_closed() {
            return Err(BuildError::LogClosed);
        }
        if self.config.push_enabled() && self.publisher.is_none() && !graph.is_empty() {
            warn!("push is enabled but no publisher is configured, images will not be pushed");
        }

        info!(
            images = graph.len(),
            build_threads = self.config.build_threads(),
            push_threads = self.config.push_threads(),
            push = self.push_enabled(),
            "starting build run"
        );

        let mut schedule = Schedule::new(graph);
        let mut builds: JoinSet<BuildCompletion> = JoinSet::new();
        let mut pushes: JoinSet<PushCompletion> = JoinSet::new();
        let mut cancelled = false;
        let mut watch_cancel = true;

        loop {
            if !cancelled && *cancel.borrow_and_update() {
                warn!(
                    in_flight_builds = builds.len(),
                    in_flight_pushes = pushes.len(),
                    "run cancelled, waiting for in-flight work"
                );
                cancelled = true;
                watch_cancel = false;
            }

            if !cancelled {
                while builds.len() < self.config.build_threads() {
                    let Some(target) = schedule.next_build() else {
                        break;
                    };
                    self.spawn_build(&mut builds, target);
                }
                while pushes.len() < self.config.push_threads() {
                    let Some(target) = schedule.next_push() else {
                        break;
                    };
                    self.spawn_push(&mut pushes, target, credentials.clone());
                }
            }

            if builds.is_empty() && pushes.is_empty() {
                break;
            }

            tokio::select! {
                changed = cancel.changed(), if watch_cancel => {
                    // 値の確認はループ先頭で行う
                    if changed.is_err() {
                        watch_cancel = false;
                    }
                }
                Some(joined) = builds.join_next(), if !builds.is_empty() => {
                    match joined {
                        Ok(completion) => self.on_build_complete(&mut schedule, completion),
                        Err(e) => error!(error = %e, "build worker was lost"),
                    }
                }
                Some(joined) = pushes.join_next(), if !pushes.is_empty() => {
                    match joined {
                        Ok(completion) => self.on_push_complete(completion),
                        Err(e) => error!(error = %e, "push worker was lost"),
                    }
                }
            }
        }

        if cancelled {
            self.log.mark_cancelled();
            while let Some(target) = schedule.next_push() {
                warn!(image = %target, "push not attempted, run cancelled");
            }
        }

        // 全ターゲットに必ず一つの最終状態を残す
        let reason = if cancelled {
            "run cancelled"
        } else {
            "parent image never completed"
        };
        for target in schedule.unresolved() {
            let outcome = BuildOutcome::skipped(&target, self.config.image_ref(&target), reason);
            self.record(outcome);
            self.progress.resolved(&target, "skipped");
        }

        self.log.close();
        self.progress.finish();
        info!(cancelled, "build run finished");
        Ok(())
    }

    fn spawn_build(&self, builds: &mut JoinSet<BuildCompletion>, target: String) {
        let engine = Arc::clone(&self.engine);
        let request = BuildRequest {
            target: target.clone(),
            image: self.config.image_ref(&target),
            config_file: self.config_file.clone(),
            logs_dir: self.logs_dir.clone(),
        };

        info!(image = %target, "dispatching build");
        self.progress.building(&target);

        builds.spawn(async move {
            let started = Instant::now();
            // 内側のタスクで実行し、panic もこのターゲットの失敗として扱う
            let mut worker =
                AbortOnDrop(tokio::spawn(async move { engine.build(&request).await }));
            let result = match (&mut worker.0).await {
                Ok(result) => result,
                Err(e) => Err(BuildError::BuildFailed {
                    target: target.clone(),
                    message: format!("build worker panicked: {}", e),
                    log_path: None,
                }),
            };
            BuildCompletion {
                target,
                elapsed: started.elapsed(),
                result,
            }
        });
    }

    fn spawn_push(
        &self,
        pushes: &mut JoinSet<PushCompletion>,
        target: String,
        credentials: Option<DockerCredentials>,
    ) {
        let Some(publisher) = self.publisher.clone() else {
            return;
        };
        let image = self.config.image_name(&target);
        let tag = self.config.tag().to_string();
        let full_image = format!("{}:{}", image, tag);

        debug!(image = %full_image, "dispatching push");

        pushes.spawn(async move {
            let started = Instant::now();
            let mut worker = AbortOnDrop(tokio::spawn(async move {
                publisher.push(&image, &tag, credentials).await
            }));
            let result = match (&mut worker.0).await {
                Ok(result) => result,
                Err(e) => Err(BuildError::PushFailed {
                    message: format!("push worker panicked: {}", e),
                }),
            };
            PushCompletion {
                target,
                image: full_image,
                elapsed: started.elapsed(),
                result,
            }
        });
    }

    fn on_build_complete(&self, schedule: &mut Schedule<'_>, completion: BuildCompletion) {
        let BuildCompletion {
            target,
            elapsed,
            result,
        } = completion;
        let image = self.config.image_ref(&target);

        match result {
            Ok(report) => {
                info!(
                    image = %target,
                    elapsed_ms = elapsed.as_millis() as u64,
                    size = report.image_size,
                    "build succeeded"
                );
                self.record(BuildOutcome::success(
                    &target,
                    image,
                    elapsed,
                    report.image_size,
                    report.log_path,
                ));
                self.progress.resolved(&target, "success");
                schedule.succeeded(&target, self.push_enabled());
            }
            Err(e) => {
                error!(image = %target, error = %e, "build failed");
                let log_path = match &e {
                    BuildError::BuildFailed { log_path, .. } => log_path.clone(),
                    _ => None,
                };
                self.record(BuildOutcome::failed(
                    &target,
                    image,
                    elapsed,
                    e.to_string(),
                    log_path,
                ));
                self.progress.resolved(&target, "failed");

                let reason = format!("parent image '{}' failed", target);
                for skipped in schedule.failed(&target) {
                    warn!(image = %skipped, failed_parent = %target, "skipping image due to failed parent");
                    let outcome =
                        BuildOutcome::skipped(&skipped, self.config.image_ref(&skipped), &reason);
                    self.record(outcome);
                    self.progress.resolved(&skipped, "skipped");
                }
            }
        }
    }

    fn on_push_complete(&self, completion: PushCompletion) {
        let PushCompletion {
            target,
            image,
            elapsed,
            result,
        } = completion;

        let outcome = match result {
            Ok(pushed) => {
                info!(image = %pushed, "push succeeded");
                PushOutcome::pushed(&target, pushed, elapsed)
            }
            Err(e) => {
                error!(image = %image, error = %e, "push failed");
                PushOutcome::failed(&target, image, elapsed, e.to_string())
            }
        };

        if let Err(e) = self.log.record_push(outcome) {
            error!(image = %target, error = %e, "failed to record push outcome");
        }
    }

    fn record(&self, outcome: BuildOutcome) {
        let target = outcome.target.clone();
        if let Err(e) = self.log.record(outcome) {
            error!(image = %target, error = %e, "failed to record build outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::ImageTarget;

    fn diamond() -> TargetGraph {
        TargetGraph::new(vec![
            ImageTarget::new("base"),
            ImageTarget::with_parent("left", "base"),
            ImageTarget::with_parent("right", "base"),
            ImageTarget::with_parent("left-leaf", "left"),
        ])
        .unwrap()
    }

    #[test]
    fn test_schedule_initial_ready() {
        let graph = diamond();
        let mut schedule = Schedule::new(&graph);

        assert_eq!(schedule.next_build().as_deref(), Some("base"));
        assert_eq!(schedule.next_build(), None);
    }

    #[test]
    fn test_schedule_success_releases_children_once() {
        let graph = diamond();
        let mut schedule = Schedule::new(&graph);
        schedule.next_build();

        schedule.succeeded("base", true);

        let mut ready = vec![
            schedule.next_build().unwrap(),
            schedule.next_build().unwrap(),
        ];
        ready.sort();
        assert_eq!(ready, vec!["left", "right"]);
        assert_eq!(schedule.next_build(), None);
        assert_eq!(schedule.next_push().as_deref(), Some("base"));
        assert_eq!(schedule.next_push(), None);
    }

    #[test]
    fn test_schedule_failure_skips_descendants() {
        let graph = diamond();
        let mut schedule = Schedule::new(&graph);
        schedule.next_build();
        schedule.succeeded("base", false);
        schedule.next_build();
        schedule.next_build();

        let skipped = schedule.failed("left");

        assert_eq!(skipped, vec!["left-leaf"]);
        assert_eq!(schedule.next_push(), None);
        assert_eq!(schedule.unresolved(), vec!["right"]);
    }

    #[test]
    fn test_schedule_failure_does_not_skip_twice() {
        let graph = diamond();
        let mut schedule = Schedule::new(&graph);

        let first = schedule.failed("base");
        assert_eq!(first.len(), 3);
        assert!(schedule.failed("left").is_empty());
        assert!(schedule.unresolved().is_empty());
    }
}
