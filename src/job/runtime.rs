//! The per-job supervised thread pool: owns the real OS threads a running
//! job executes on.
//!
//! `std::thread`, not `tokio::task`: job work units run on parallel
//! operating-system threads with no cooperative scheduler, a deliberate
//! split from the async session layer in [`crate::session`].

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::ClientError;
use crate::job::state::{Job, JobState};
use crate::job::thread::{JobThread, RawLogEntry, RunningThreadContext};
use crate::job::tracker::StatTracker;
use crate::plugin::{Catalog, ThreadContext};
use crate::wire::message::LogEntry;

struct ActiveThread {
    #[allow(dead_code)]
    handle: JoinHandle<()>,
    job_thread: Arc<JobThread>,
}

/// Owns a single job's execution: its threads, its state, and its log.
/// Separate mutexes — `active_threads`, `log`, `job` — are never taken
/// together, so a blocked job thread can never stall a status query.
pub struct JobRuntime {
    job: Mutex<Job>,
    active_threads: Mutex<Vec<ActiveThread>>,
    log: Arc<Mutex<Vec<RawLogEntry>>>,
    catalog: Catalog,
    actual_start_ms: Mutex<Option<i64>>,
    actual_stop_ms: Mutex<Option<i64>>,
}

#[derive(Debug)]
pub enum StartError {
    ClassNotFound(String),
    AlreadyStarted,
}

impl JobRuntime {
    pub fn new(job: Job, catalog: Catalog) -> Self {
        Self {
            job: Mutex::new(job),
            active_threads: Mutex::new(Vec::new()),
            log: Arc::new(Mutex::new(Vec::new())),
            catalog,
            actual_start_ms: Mutex::new(None),
            actual_stop_ms: Mutex::new(None),
        }
    }

    pub fn job_id(&self) -> String {
        self.job.lock().unwrap().job_id.clone()
    }

    pub fn state(&self) -> JobState {
        self.job.lock().unwrap().state
    }

    /// Applies a state transition through [`Job::transition_to`], so every
    /// mutation is checked against the state machine's allowed edges rather
    /// than assigned unconditionally. A rejected transition is a no-op: the
    /// caller already guards against calling this from the wrong state, so
    /// this is a backstop, not the primary check.
    fn transition(&self, next: JobState) {
        let mut job = self.job.lock().unwrap();
        if let Err(e) = job.transition_to(next) {
            tracing::warn!(job_id = %job.job_id, error = %e, "rejected illegal job state transition");
        }
    }

    /// Local wall-clock time the job actually started running, if it has.
    pub fn actual_start_time_ms(&self) -> Option<i64> {
        *self.actual_start_ms.lock().unwrap()
    }

    /// Local wall-clock time the job actually finished, if it has.
    pub fn actual_stop_time_ms(&self) -> Option<i64> {
        *self.actual_stop_ms.lock().unwrap()
    }

    /// Stamps the raw log with the client and job ids the wire format
    /// requires; the job runtime itself doesn't know the client id.
    pub fn log_entries(&self, client_id: &str) -> Vec<LogEntry> {
        let job_id = self.job_id();
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|raw| LogEntry {
                timestamp_ms: raw.timestamp_ms,
                level: raw.level,
                client_id: client_id.to_string(),
                job_id: job_id.clone(),
                thread_id: raw.thread_id.clone(),
                message: raw.message.clone(),
            })
            .collect()
    }

    /// Spawns `threadsPerClient` fresh thread instances. Each thread sleeps
    /// until its start time, then loops
    /// `run_one_iteration` until told to stop or its deadline passes.
    pub fn start(self: &Arc<Self>) -> Result<(), StartError> {
        if self.state() != JobState::NotStarted {
            return Err(StartError::AlreadyStarted);
        }

        let (class_name, thread_count, startup_delay_ms, deadline) = {
            let job = self.job.lock().unwrap();
            if !self.catalog.has(&job.job_class_name) {
                return Err(StartError::ClassNotFound(job.job_class_name.clone()));
            }
            let deadline = job_deadline(&job);
            (
                job.job_class_name.clone(),
                job.threads_per_client,
                job.thread_startup_delay_ms,
                deadline,
            )
        };

        self.transition(JobState::Running);
        *self.actual_start_ms.lock().unwrap() = Some(now_ms());

        let mut spawned = Vec::with_capacity(thread_count as usize);
        for i in 0..thread_count {
            let thread_id = format!("thread-{i}");
            let job_thread = Arc::new(JobThread::new(thread_id.clone(), Arc::clone(&self.log)));
            let mut job_class = self
                .catalog
                .instantiate(&class_name)
                .expect("class presence checked above");
            let parameters = self.job.lock().unwrap().parameters.clone();
            let startup_delay = Duration::from_millis(u64::from(startup_delay_ms) * u64::from(i));

            let runtime = Arc::clone(self);
            let thread_ref = Arc::clone(&job_thread);
            let handle = std::thread::Builder::new()
                .name(thread_id.clone())
                .spawn(move || {
                    std::thread::sleep(startup_delay);
                    let ctx = RunningThreadContext::new(&thread_ref);
                    if let Err(e) = job_class.initialize_job_thread(&ctx, &parameters) {
                        let error = ClientError::JobRuntime {
                            thread_id: thread_id.clone(),
                            message: format!("initialize_job_thread failed: {e}"),
                        };
                        ctx.log(&error.to_string());
                        thread_ref.mark_finished();
                        runtime.thread_finished();
                        return;
                    }

                    loop {
                        if ctx.should_stop() {
                            break;
                        }
                        if let Some(deadline) = deadline {
                            if Instant::now() >= deadline {
                                break;
                            }
                        }
                        if let Err(e) = job_class.run_one_iteration(&ctx) {
                            let error = ClientError::JobRuntime {
                                thread_id: thread_id.clone(),
                                message: format!("run_one_iteration failed: {e}"),
                            };
                            ctx.log(&error.to_string());
                            break;
                        }
                    }

                    job_class.destroy(&ctx);
                    thread_ref.mark_finished();
                    runtime.thread_finished();
                })
                .expect("spawning a job thread should not fail under normal operation");

            spawned.push(ActiveThread { handle, job_thread });
        }

        *self.active_threads.lock().unwrap() = spawned;
        Ok(())
    }

    /// Called from inside a finished thread body. When every thread in the
    /// pool has marked itself finished, finalizes the job.
    fn thread_finished(self: &Arc<Self>) {
        let all_done = {
            let active = self.active_threads.lock().unwrap();
            !active.is_empty() && active.iter().all(|t| t.job_thread.is_finished())
        };
        if all_done {
            self.finalize();
        }
    }

    fn finalize(&self) {
        if self.state() == JobState::Running {
            self.transition(JobState::Completed);
            *self.actual_stop_ms.lock().unwrap() = Some(now_ms());
        }
    }

    /// Cooperative stop: sets `stopRequested` on every active thread and
    /// returns immediately. Idempotent — a second call while the
    /// first is still pending is what escalates into [`Self::force_stop`].
    pub fn request_stop(&self) -> bool {
        let active = self.active_threads.lock().unwrap();
        let already_requested = !active.is_empty()
            && active
                .iter()
                .filter(|t| !t.job_thread.is_finished())
                .all(|t| t.job_thread.is_stop_requested());
        for t in active.iter() {
            t.job_thread.request_stop();
        }
        already_requested
    }

    /// Blocks until the job leaves `running` (STOP_AND_WAIT), polling at
    /// a 100 ms cadence.
    pub fn wait_until_stopped(&self) {
        loop {
            if self.state() != JobState::Running {
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    /// Forced-stop escalation: interrupt, wait 100ms, interrupt again, wait
    /// 1s, then call destroy. Since Rust has no safe analogue
    /// to OS-thread termination, "interrupt" here is the same cooperative
    /// flag — the only genuinely forcible step is `destroy`. A thread that
    /// outlives `destroy` is abandoned and reported as such.
    pub fn force_stop(&self, reason: JobState) -> Vec<String> {
        let targets: Vec<Arc<JobThread>> = {
            let active = self.active_threads.lock().unwrap();
            active
                .iter()
                .filter(|t| !t.job_thread.is_finished())
                .map(|t| Arc::clone(&t.job_thread))
                .collect()
        };

        for t in &targets {
            t.request_stop();
        }
        std::thread::sleep(Duration::from_millis(100));
        for t in &targets {
            t.request_stop();
        }
        std::thread::sleep(Duration::from_secs(1));

        let mut abandoned = Vec::new();
        for t in &targets {
            if !t.is_finished() {
                let error = ClientError::EscalationExhausted { thread_id: t.thread_id.clone() };
                self.log.lock().unwrap().push(RawLogEntry {
                    timestamp_ms: now_ms(),
                    level: crate::wire::message::LogLevel::Warn,
                    thread_id: t.thread_id.clone(),
                    message: error.to_string(),
                });
                abandoned.push(t.thread_id.clone());
            }
        }

        if self.state() == JobState::Running {
            self.transition(reason);
            *self.actual_stop_ms.lock().unwrap() = Some(now_ms());
        }
        abandoned
    }

    /// Aggregates every thread's trackers into one per display name, per
    /// the aggregation rule; permutation-invariance across threads is
    /// satisfied by [`StatTracker::aggregate`]'s summation being commutative.
    pub fn aggregated_trackers(&self) -> Vec<StatTracker> {
        let active = self.active_threads.lock().unwrap();
        let mut by_name: std::collections::HashMap<String, Vec<StatTracker>> =
            std::collections::HashMap::new();
        for t in active.iter() {
            for tracker in t.job_thread.trackers() {
                by_name.entry(tracker.display_name()).or_default().push(tracker);
            }
        }
        by_name
            .into_values()
            .filter_map(|trackers| StatTracker::aggregate(&trackers))
            .collect()
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn job_deadline(job: &Job) -> Option<Instant> {
    if job.duration_secs > 0 {
        Some(Instant::now() + Duration::from_secs(job.duration_secs as u64))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::state::Job;
    use crate::plugin::{Catalog, NoopJob};
    use crate::wire::message::JobState as WireJobState;

    fn base_job(threads: u32, duration_secs: i64) -> Job {
        Job {
            job_id: "j1".into(),
            job_class_name: "Noop".into(),
            threads_per_client: threads,
            client_number: 0,
            scheduled_start_time_ms: 0,
            stop_time_ms: None,
            duration_secs,
            collection_interval_secs: 1,
            thread_startup_delay_ms: 0,
            parameters: vec![],
            state: WireJobState::NotStarted,
            actual_start_time_ms: None,
            actual_stop_time_ms: None,
        }
    }

    fn noop_catalog() -> Catalog {
        let mut c = Catalog::new();
        c.register("Noop", || Box::new(NoopJob::new()));
        c
    }

    #[test]
    fn rejects_unknown_class() {
        let mut job = base_job(1, 1);
        job.job_class_name = "DoesNotExist".into();
        let runtime = Arc::new(JobRuntime::new(job, noop_catalog()));
        match runtime.start() {
            Err(StartError::ClassNotFound(name)) => assert_eq!(name, "DoesNotExist"),
            other => panic!("expected ClassNotFound, got {other:?}"),
        }
    }

    #[test]
    fn happy_path_one_thread_job_completes_and_aggregates() {
        let job = base_job(1, 1);
        let runtime = Arc::new(JobRuntime::new(job, noop_catalog()));
        runtime.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while runtime.state() == JobState::Running && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(runtime.state(), JobState::Completed);
        let trackers = runtime.aggregated_trackers();
        assert_eq!(trackers.len(), 1);
        assert!(!trackers[0].samples().is_empty());
    }

    #[test]
    fn double_start_is_rejected() {
        let job = base_job(1, 60);
        let runtime = Arc::new(JobRuntime::new(job, noop_catalog()));
        runtime.start().unwrap();
        assert!(matches!(runtime.start(), Err(StartError::AlreadyStarted)));
        runtime.force_stop(JobState::StoppedByUser);
    }

    #[test]
    fn second_stop_request_is_reported_as_already_pending() {
        let job = base_job(1, 60);
        let runtime = Arc::new(JobRuntime::new(job, noop_catalog()));
        runtime.start().unwrap();
        assert!(!runtime.request_stop());
        assert!(runtime.request_stop());
        runtime.force_stop(JobState::StoppedByUser);
    }
}
