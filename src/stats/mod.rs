//! The statistics subsystem: a real-time reporter that streams samples to
//! the server while a job runs, and a persistence thread that snapshots them
//! to disk. Both are optional per job: a client with no `stat_port`/
//! `persistence_directory` configured simply never starts them.

pub mod persistence;
pub mod reporter;

pub use reporter::ReporterHandle;
