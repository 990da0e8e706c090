//! Storage-volume QA orchestration.
//!
//! A [`VolumeOrchestrator`] holds one authenticated session to a client
//! machine and drives NFS/SMB mounts, workloads and unmounts on it. Every
//! operation returns a [`StatusReport`] whose records say exactly which
//! remote command ran, how long it took and whether it succeeded.

pub mod cloud;
pub mod command;
pub mod config;
pub mod connection;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod json_output;
pub mod logging;
pub mod mock;
pub mod mount;
pub mod orchestrator;
pub mod registry;
pub mod relay;
pub mod result;
pub mod transport;
pub mod workload;

pub use crate::config::{Backend, ClientOs, Config, ConfigBuilder};
pub use crate::descriptor::{resolve_endpoint, Endpoint};
pub use crate::error::{Error, Result};
pub use crate::executor::Step;
pub use crate::orchestrator::VolumeOrchestrator;
pub use crate::registry::{DriveSelection, MountTarget, TargetOptions};
pub use crate::result::{CommandResult, Output, StatusReport};
