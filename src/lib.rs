//! `slamd_client`: the wire protocol, job runtime, session controller, and
//! supporting subsystems shared by the `slamd-client`, `slamd-manager`, and
//! `slamd-resource-monitor` binaries.

pub mod config;
pub mod error;
pub mod job;
pub mod monitor;
pub mod plugin;
pub mod session;
pub mod stats;
pub mod supervisor;
pub mod wire;
