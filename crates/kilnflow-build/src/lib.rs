//! Kilnflow image build orchestration
//!
//! This crate drives a layered set of container images through an external
//! build engine, respecting parent/child ordering, then optionally pushes
//! the results to a registry and records every outcome in a JSON-lines log.

pub mod auth;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod pusher;
pub mod result_log;
pub mod storage;
pub mod target;

pub use auth::{
    DEFAULT_REGISTRY, DockerCliAuthenticator, RegistryAuthenticator, RegistryCredentials,
    RegistrySession,
};
pub use coordinator::BuildCoordinator;
pub use engine::{BuildEngine, BuildRequest, CommandEngine, EngineReport};
pub use error::{BuildError, BuildResult};
pub use pipeline::{Pipeline, RunReport};
pub use progress::RunProgress;
pub use pusher::{DockerPusher, ImagePublisher};
pub use result_log::{
    BuildOutcome, OutcomeStatus, PushOutcome, PushStatus, RESULTS_FILE, ResultLog, RunSummary,
};
pub use storage::{
    DockerStorage, LayerUsage, StorageDaemon, StorageReport, StorageReporter, format_bytes,
};
pub use target::{ImageTarget, TargetGraph};
