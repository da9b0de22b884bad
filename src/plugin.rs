//! The job-class plugin contract: a compiled-in (or trusted-local-
//! directory) catalog of named job types, replacing dynamic bytecode
//! loading with a registry the client knows about at startup.
//!
//! A job class is anything implementing [`JobClass`]. The runtime owns one
//! fresh instance per thread, obtained from [`Catalog::instantiate`] by the
//! stable string name carried in `JobRequest.job_class_name`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::wire::message::Parameter;

/// The per-thread execution context handed to a job class's work unit:
/// a cooperative stop check, a log sink, and tracker registration.
pub trait ThreadContext: Send {
    fn should_stop(&self) -> bool;
    fn log(&self, message: &str);
    fn thread_id(&self) -> &str;
    fn register_tracker(&self, tracker: crate::job::tracker::StatTracker);
}

/// Errors a job class can report from its lifecycle hooks. These map onto
/// the job-setup / job-runtime error taxonomy at the call site.
pub type PluginError = anyhow::Error;

/// The contract a job class implements.
///
/// `initialize_client` runs once per job (not per thread); everything else
/// runs per-thread. A fresh `Box<dyn JobClass>` is created per thread via
/// [`Catalog::instantiate`] so each thread's state — including the
/// `StatTracker`s it owns — is private.
pub trait JobClass: Send {
    /// One-time per-job setup. Failure maps to `JOB_CREATION_FAILURE`.
    fn initialize_client(&mut self, client_id: &str, parameters: &[Parameter]) -> Result<(), PluginError> {
        let _ = (client_id, parameters);
        Ok(())
    }

    /// Per-thread setup, called once before the thread starts.
    fn initialize_job_thread(
        &mut self,
        ctx: &dyn ThreadContext,
        parameters: &[Parameter],
    ) -> Result<(), PluginError> {
        let _ = (ctx, parameters);
        Ok(())
    }

    /// The cooperative work unit. Called repeatedly until `ctx.should_stop()`
    /// returns true or the thread's deadline passes; the job class itself
    /// decides how much work one call represents.
    fn run_one_iteration(&mut self, ctx: &dyn ThreadContext) -> Result<(), PluginError>;

    /// Forced-stop escalation's last resort. A no-op by default
    /// — the original's destroy hook is also a no-op by default, so
    /// behavioral parity doesn't require every plugin to implement this.
    fn destroy(&mut self, ctx: &dyn ThreadContext) {
        let _ = ctx;
    }

    /// One-time per-job teardown, run after the last thread exits.
    /// Exceptions are logged but never fail the job.
    fn finalize_client(&mut self, client_id: &str) {
        let _ = client_id;
    }
}

type Factory = Arc<dyn Fn() -> Box<dyn JobClass> + Send + Sync>;

/// The compiled-in/trusted-local-directory registry of job classes,
/// identified by stable string name.
#[derive(Clone, Default)]
pub struct Catalog {
    factories: HashMap<String, Factory>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn JobClass> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Whether `name` is available — the answer a `ClassTransferRequest`/
    /// `Response` probe reports.
    pub fn has(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Creates a fresh instance of the named class for one thread.
    pub fn instantiate(&self, name: &str) -> Option<Box<dyn JobClass>> {
        self.factories.get(name).map(|f| f())
    }
}

/// A reference job class used by the happy-path tests:
/// it does nothing each iteration beyond recording a sample, and stops as
/// soon as asked.
pub struct NoopJob {
    tracker: Option<crate::job::tracker::StatTracker>,
}

impl NoopJob {
    pub fn new() -> Self {
        Self { tracker: None }
    }
}

impl Default for NoopJob {
    fn default() -> Self {
        Self::new()
    }
}

impl JobClass for NoopJob {
    fn initialize_job_thread(
        &mut self,
        ctx: &dyn ThreadContext,
        _parameters: &[Parameter],
    ) -> Result<(), PluginError> {
        let tracker = crate::job::tracker::StatTracker::new(
            "Iterations".to_string(),
            ctx.thread_id().to_string(),
            1,
        );
        ctx.register_tracker(tracker.clone());
        self.tracker = Some(tracker);
        Ok(())
    }

    fn run_one_iteration(&mut self, _ctx: &dyn ThreadContext) -> Result<(), PluginError> {
        if let Some(t) = &self.tracker {
            t.add_sample(1.0);
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_reports_availability_and_instantiates() {
        let mut catalog = Catalog::new();
        catalog.register("Noop", || Box::new(NoopJob::new()));

        assert!(catalog.has("Noop"));
        assert!(!catalog.has("Missing"));
        assert!(catalog.instantiate("Noop").is_some());
        assert!(catalog.instantiate("Missing").is_none());
    }
}
