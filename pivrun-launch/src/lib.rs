//! Launching target instances: isolation folders, process spawning, field
//! injection, and the batch orchestrator that ties them to the registry.

mod error;
pub mod injection;
pub mod isolation;
pub mod launcher;
pub mod orchestrator;
pub mod readiness;
pub mod spawn;

pub use error::{InjectionError, LaunchError, OrchestratorError};
pub use injection::{ChannelCall, FieldChannel, FieldValues, RecordingChannel, XdotoolChannel};
pub use isolation::IsolationAllocator;
pub use launcher::{InstanceLauncher, Launch, LaunchSettings};
pub use orchestrator::{ItemOutcome, ItemReport, Orchestrator, RunReport};
pub use readiness::{FixedDelay, NoWait, ReadinessWait, Stage};
pub use spawn::{CommandSpawner, EnvOverrides, SpawnedProcess, Spawner, TargetCommand};
