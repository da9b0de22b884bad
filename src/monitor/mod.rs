//! The resource monitor client: a variant of the session client whose jobs
//! are always one of a fixed set of host-resource samplers, selected by a
//! server-sent identifier rather than transferred class bytes.

pub mod samplers;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::monitor::samplers::{CpuSampler, DiskIoSampler, MemorySampler, NetworkSampler};
use crate::plugin::Catalog;
use crate::session;

/// The identifiers the server may select, matching the built-in catalog of
/// memory, disk I/O, network, etc." built-in set.
pub fn builtin_catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.register("CPU", || Box::new(CpuSampler::new()));
    catalog.register("Memory", || Box::new(MemorySampler::new()));
    catalog.register("DiskIO", || Box::new(DiskIoSampler::new()));
    catalog.register("Network", || Box::new(NetworkSampler::new()));
    catalog
}

/// Runs the resource monitor: identical session lifecycle to [`session::run`],
/// with the sampler catalog substituted for a user-supplied one.
pub async fn run(config: ClientConfig, cancel: CancellationToken) -> Result<()> {
    session::run(config, builtin_catalog(), cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_has_all_four_samplers() {
        let catalog = builtin_catalog();
        for name in ["CPU", "Memory", "DiskIO", "Network"] {
            assert!(catalog.has(name), "missing sampler {name}");
        }
    }
}
