//! The persistence thread: a process-wide singleton bound to the
//! currently active job, periodically flushing tracker snapshots to disk.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tracing::{debug, warn};

use crate::job::tracker::StatTracker;

struct Snapshot {
    job_id: String,
    directory: PathBuf,
    trackers: Vec<StatTracker>,
}

/// The single persistence worker live for the process's lifetime; each job
/// registers itself for the duration it runs and deregisters on completion.
struct Persistence {
    active: Mutex<Option<Snapshot>>,
}

static PERSISTENCE: OnceLock<Arc<Persistence>> = OnceLock::new();

fn instance() -> Arc<Persistence> {
    PERSISTENCE
        .get_or_init(|| Arc::new(Persistence { active: Mutex::new(None) }))
        .clone()
}

/// Registers `job_id`'s trackers for periodic persistence under `directory`,
/// spawning the background worker the first time it's called.
pub fn register(job_id: String, directory: PathBuf, trackers: Vec<StatTracker>, interval: Duration) {
    let p = instance();
    *p.active.lock().unwrap() = Some(Snapshot { job_id, directory, trackers });
    start_worker_once(interval);
}

/// Deregisters the current job and writes one final snapshot.
pub fn deregister() {
    let p = instance();
    let snapshot = p.active.lock().unwrap().take();
    if let Some(s) = snapshot {
        if let Err(e) = write_snapshot(&s) {
            warn!(job_id = %s.job_id, error = %e, "failed to write final persistence snapshot");
        }
    }
}

static WORKER_STARTED: OnceLock<()> = OnceLock::new();

fn start_worker_once(interval: Duration) {
    if WORKER_STARTED.set(()).is_err() {
        return;
    }
    std::thread::Builder::new()
        .name("persistence".into())
        .spawn(move || loop {
            std::thread::sleep(interval);
            let p = instance();
            let snapshot = p.active.lock().unwrap();
            if let Some(s) = snapshot.as_ref() {
                if let Err(e) = write_snapshot(s) {
                    warn!(job_id = %s.job_id, error = %e, "failed to write persistence snapshot");
                }
            }
        })
        .expect("spawning the persistence thread should not fail under normal operation");
}

fn write_snapshot(snapshot: &Snapshot) -> std::io::Result<()> {
    std::fs::create_dir_all(&snapshot.directory)?;
    let path = snapshot_path(&snapshot.directory, &snapshot.job_id);
    let mut body = String::new();
    for tracker in &snapshot.trackers {
        let wire = tracker.to_wire();
        body.push_str(&format!("{}\t{}\t{}\n", wire.display_name, wire.thread_id, wire.interval_seconds));
        let rendered: Vec<String> = wire.samples.iter().map(|v| v.to_string()).collect();
        body.push_str(&rendered.join(","));
        body.push('\n');
    }
    std::fs::write(&path, body)?;
    debug!(path = %path.display(), "wrote persistence snapshot");
    Ok(())
}

fn snapshot_path(directory: &Path, job_id: &str) -> PathBuf {
    directory.join(format!("{job_id}.stats"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_path_is_named_by_job_id() {
        let path = snapshot_path(Path::new("/tmp/slamd"), "job-42");
        assert_eq!(path, PathBuf::from("/tmp/slamd/job-42.stats"));
    }

    #[test]
    fn write_snapshot_creates_directory_and_file() {
        let dir = std::env::temp_dir().join(format!("slamd-persistence-test-{}", std::process::id()));
        let tracker = StatTracker::new("Iterations".into(), "aggregated".into(), 1);
        tracker.add_sample(3.0);
        tracker.add_sample(4.0);
        let snapshot = Snapshot { job_id: "job-1".into(), directory: dir.clone(), trackers: vec![tracker] };

        write_snapshot(&snapshot).unwrap();
        let contents = std::fs::read_to_string(snapshot_path(&dir, "job-1")).unwrap();
        assert!(contents.contains("Iterations"));
        assert!(contents.contains("3,4"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
