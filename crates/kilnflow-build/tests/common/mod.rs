use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use kilnflow_build::{
    BuildEngine, BuildError, BuildRequest, BuildResult, EngineReport, ImagePublisher, ImageTarget,
    RegistryAuthenticator, RegistryCredentials, TargetGraph,
};
use kilnflow_config::{BuildConfig, ConfigParams};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// ビルドとプッシュの発生順を共有する記録
pub type Events = Arc<Mutex<Vec<String>>>;

pub fn events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn config(build_threads: usize, push_threads: usize, push: bool) -> Arc<BuildConfig> {
    let params = ConfigParams {
        build_threads,
        push_threads,
        push,
        ..Default::default()
    };
    Arc::new(kilnflow_config::render(params).unwrap())
}

pub fn graph(edges: &[(&str, Option<&str>)]) -> TargetGraph {
    let targets = edges
        .iter()
        .map(|(name, parent)| match parent {
            Some(parent) => ImageTarget::with_parent(*name, *parent),
            None => ImageTarget::new(*name),
        })
        .collect();
    TargetGraph::new(targets).unwrap()
}

/// 同時実行数を追跡するカウンター
#[derive(Default)]
pub struct Concurrency {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl Concurrency {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

pub struct FakeEngine {
    pub failing: HashSet<String>,
    pub panicking: HashSet<String>,
    pub delay: Duration,
    pub calls: Mutex<Vec<String>>,
    pub concurrency: Concurrency,
    pub events: Events,
    /// このターゲットのビルド開始時に実行をキャンセルする
    pub cancel_on: Option<(String, watch::Sender<bool>)>,
}

impl FakeEngine {
    pub fn new(events: Events) -> Self {
        Self {
            failing: HashSet::new(),
            panicking: HashSet::new(),
            delay: Duration::from_millis(5),
            calls: Mutex::new(Vec::new()),
            concurrency: Concurrency::default(),
            events,
            cancel_on: None,
        }
    }

    pub fn failing(mut self, targets: &[&str]) -> Self {
        self.failing = targets.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn panicking(mut self, targets: &[&str]) -> Self {
        self.panicking = targets.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn cancel_on(mut self, target: &str, sender: watch::Sender<bool>) -> Self {
        self.cancel_on = Some((target.to_string(), sender));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildEngine for FakeEngine {
    async fn build(&self, request: &BuildRequest) -> BuildResult<EngineReport> {
        self.calls.lock().unwrap().push(request.target.clone());
        if let Some((target, sender)) = &self.cancel_on {
            if target == &request.target {
                sender.send_replace(true);
            }
        }

        self.concurrency.enter();
        tokio::time::sleep(self.delay).await;
        self.concurrency.exit();

        if self.panicking.contains(&request.target) {
            panic!("engine crashed on {}", request.target);
        }
        if self.failing.contains(&request.target) {
            return Err(BuildError::BuildFailed {
                target: request.target.clone(),
                message: "engine exited with status 1".to_string(),
                log_path: Some(request.log_path()),
            });
        }

        self.events
            .lock()
            .unwrap()
            .push(format!("built:{}", request.target));
        Ok(EngineReport {
            image_size: Some(1024),
            log_path: Some(request.log_path()),
        })
    }
}

pub struct FakePublisher {
    pub failing: bool,
    pub pushes: Mutex<Vec<String>>,
    pub credentials_seen: Mutex<Vec<Option<String>>>,
    pub concurrency: Concurrency,
    pub events: Events,
}

impl FakePublisher {
    pub fn new(events: Events) -> Self {
        Self {
            failing: false,
            pushes: Mutex::new(Vec::new()),
            credentials_seen: Mutex::new(Vec::new()),
            concurrency: Concurrency::default(),
            events,
        }
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn pushes(&self) -> Vec<String> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImagePublisher for FakePublisher {
    async fn push(
        &self,
        image: &str,
        tag: &str,
        credentials: Option<DockerCredentials>,
    ) -> BuildResult<String> {
        let full_image = format!("{}:{}", image, tag);
        self.pushes.lock().unwrap().push(full_image.clone());
        self.credentials_seen
            .lock()
            .unwrap()
            .push(credentials.and_then(|c| c.username));
        self.events
            .lock()
            .unwrap()
            .push(format!("push:{}", full_image));

        self.concurrency.enter();
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.concurrency.exit();

        if self.failing {
            return Err(BuildError::PushFailed {
                message: "denied: requested access to the resource is denied".to_string(),
            });
        }
        Ok(full_image)
    }
}

#[derive(Default)]
pub struct FakeAuthenticator {
    pub reject: bool,
    pub logins: AtomicUsize,
    pub logouts: AtomicUsize,
}

impl FakeAuthenticator {
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryAuthenticator for FakeAuthenticator {
    async fn login(&self, credentials: &RegistryCredentials) -> BuildResult<()> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(BuildError::AuthFailed {
                registry: credentials.registry.clone(),
                message: "unauthorized: incorrect username or password".to_string(),
            });
        }
        Ok(())
    }

    async fn logout(&self, _registry: &str) -> BuildResult<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn credentials() -> Option<RegistryCredentials> {
    Some(RegistryCredentials::new("builder", "s3cret", ""))
}

/// キャンセルされない受信側
pub fn never_cancel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    // 送信側を破棄しても受信側は false を返し続ける
    drop(tx);
    rx
}
