//! pivrun core library: domain types, the instance registry, liveness probes
//! and configuration.
//!
//! - [`types`]: work items, instance records, injection steps
//! - [`error`]: [`RegistryError`], [`ConfigError`]
//! - [`registry`]: load / save / prune / record
//! - [`liveness`]: pid + start-time liveness probes
//! - [`config`]: `~/.pivrun/config.yaml`

pub mod config;
pub mod error;
pub mod liveness;
pub mod registry;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, RegistryError};
pub use liveness::{LivenessProbe, StaticProbe, SystemProbe};
pub use types::{
    FieldValue, InjectionStep, InstanceRecord, ProcessId, Registry, WorkItem,
};
