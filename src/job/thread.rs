//! A single `JobThread`: the unit the runtime spawns, stops, and escalates
//! against.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::job::tracker::StatTracker;
use crate::plugin::ThreadContext;
use crate::wire::message::LogLevel;

/// A log line attached to a job, before the session stamps it with client
/// id and job id for transmission.
#[derive(Clone, Debug)]
pub struct RawLogEntry {
    pub timestamp_ms: i64,
    pub level: LogLevel,
    pub thread_id: String,
    pub message: String,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Shared state a `JobThread` exposes to the runtime and, via
/// [`ThreadContext`], to the job class running inside it.
pub struct JobThread {
    pub thread_id: String,
    stop_requested: Arc<AtomicBool>,
    finished: AtomicBool,
    trackers: Arc<Mutex<Vec<StatTracker>>>,
    log: Arc<Mutex<Vec<RawLogEntry>>>,
}

impl JobThread {
    pub fn new(thread_id: String, log: Arc<Mutex<Vec<RawLogEntry>>>) -> Self {
        Self {
            thread_id,
            stop_requested: Arc::new(AtomicBool::new(false)),
            finished: AtomicBool::new(false),
            trackers: Arc::new(Mutex::new(Vec::new())),
            log,
        }
    }

    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_requested)
    }

    /// Cooperative stop: sets the flag and returns immediately.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn trackers(&self) -> Vec<StatTracker> {
        self.trackers.lock().unwrap().clone()
    }
}

/// The [`ThreadContext`] handed to job-class code while a thread runs.
/// Built per-thread, referencing the owning [`JobThread`]'s shared state.
/// `trackers` is the exact same `Arc` the `JobThread` holds, so a
/// registration is visible to [`JobThread::trackers`] — and from there to
/// `JobRuntime::aggregated_trackers`'s callers — the instant it happens,
/// not just once the thread body returns.
pub struct RunningThreadContext {
    thread_id: String,
    stop_requested: Arc<AtomicBool>,
    trackers: Arc<Mutex<Vec<StatTracker>>>,
    log: Arc<Mutex<Vec<RawLogEntry>>>,
}

impl RunningThreadContext {
    pub fn new(job_thread: &JobThread) -> Self {
        Self {
            thread_id: job_thread.thread_id.clone(),
            stop_requested: job_thread.stop_flag(),
            trackers: Arc::clone(&job_thread.trackers),
            log: Arc::clone(&job_thread.log),
        }
    }
}

impl ThreadContext for RunningThreadContext {
    fn should_stop(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn log(&self, message: &str) {
        self.log.lock().unwrap().push(RawLogEntry {
            timestamp_ms: now_ms(),
            level: LogLevel::Info,
            thread_id: self.thread_id.clone(),
            message: message.to_string(),
        });
    }

    fn thread_id(&self) -> &str {
        &self.thread_id
    }

    fn register_tracker(&self, tracker: StatTracker) {
        self.trackers.lock().unwrap().push(tracker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_flag_is_shared_between_thread_and_context() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let jt = JobThread::new("thread-0".into(), log);
        let ctx = RunningThreadContext::new(&jt);
        assert!(!ctx.should_stop());
        jt.request_stop();
        assert!(ctx.should_stop());
    }

    #[test]
    fn registered_trackers_are_visible_through_the_owning_job_thread() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let jt = JobThread::new("thread-0".into(), log);
        let ctx = RunningThreadContext::new(&jt);
        assert_eq!(jt.trackers().len(), 0);
        ctx.register_tracker(StatTracker::new("Iterations".into(), "thread-0".into(), 1));
        assert_eq!(jt.trackers().len(), 1);
    }
}
