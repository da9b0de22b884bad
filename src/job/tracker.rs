//! Statistics trackers: named, per-thread time series that job
//! classes populate and the runtime later aggregates and ships to the
//! real-time reporter.
//!
//! A [`StatTracker`] is a cheap-to-clone handle over shared state: the job
//! class holds one clone, the thread's registry holds another, and the
//! real-time reporter holds a third — all observing the same growing
//! sample vector, mirroring the "shared (non-owning) references" ownership
//! note below.

use std::sync::{Arc, Mutex};
use std::time::Instant;

struct Inner {
    display_name: String,
    thread_id: String,
    interval_seconds: u32,
    samples: Vec<f64>,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
}

#[derive(Clone)]
pub struct StatTracker {
    inner: Arc<Mutex<Inner>>,
}

impl StatTracker {
    pub fn new(display_name: String, thread_id: String, interval_seconds: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                display_name,
                thread_id,
                interval_seconds,
                samples: Vec::new(),
                started_at: None,
                stopped_at: None,
            })),
        }
    }

    /// A fresh tracker with the same metadata and an empty sample vector.
    pub fn new_instance(&self) -> Self {
        let inner = self.inner.lock().unwrap();
        Self::new(inner.display_name.clone(), inner.thread_id.clone(), inner.interval_seconds)
    }

    pub fn display_name(&self) -> String {
        self.inner.lock().unwrap().display_name.clone()
    }

    pub fn thread_id(&self) -> String {
        self.inner.lock().unwrap().thread_id.clone()
    }

    pub fn interval_seconds(&self) -> u32 {
        self.inner.lock().unwrap().interval_seconds
    }

    pub fn samples(&self) -> Vec<f64> {
        self.inner.lock().unwrap().samples.clone()
    }

    /// The wire representation sent in `JobCompleted`/`StatusResponse`.
    pub fn to_wire(&self) -> crate::wire::message::StatTrackerData {
        let inner = self.inner.lock().unwrap();
        crate::wire::message::StatTrackerData {
            display_name: inner.display_name.clone(),
            thread_id: inner.thread_id.clone(),
            interval_seconds: inner.interval_seconds,
            samples: inner.samples.clone(),
        }
    }

    pub fn start_tracker(&self, wall_clock: Instant) {
        self.inner.lock().unwrap().started_at = Some(wall_clock);
    }

    pub fn stop_tracker(&self, wall_clock: Instant) {
        self.inner.lock().unwrap().stopped_at = Some(wall_clock);
    }

    pub fn add_sample(&self, value: f64) {
        self.inner.lock().unwrap().samples.push(value);
    }

    /// Combines many trackers into one:
    /// the result's `threadID` is `"aggregated"`, and sample `i` is the sum
    /// of sample `i` across every input tracker that recorded one (shorter
    /// series are treated as zero for the missing tail). The metadata
    /// (display name, interval) is taken from the first tracker in `list`;
    /// the sum is order-independent, satisfying the permutation
    /// invariance property.
    pub fn aggregate(list: &[StatTracker]) -> Option<StatTracker> {
        let first = list.first()?;
        let first_inner = first.inner.lock().unwrap();
        let display_name = first_inner.display_name.clone();
        let interval_seconds = first_inner.interval_seconds;
        drop(first_inner);

        let max_len = list
            .iter()
            .map(|t| t.inner.lock().unwrap().samples.len())
            .max()
            .unwrap_or(0);
        let mut combined = vec![0.0f64; max_len];
        for tracker in list {
            let inner = tracker.inner.lock().unwrap();
            for (i, sample) in inner.samples.iter().enumerate() {
                combined[i] += sample;
            }
        }

        let aggregated = StatTracker::new(display_name, "aggregated".to_string(), interval_seconds);
        aggregated.inner.lock().unwrap().samples = combined;
        Some(aggregated)
    }
}

impl std::fmt::Debug for StatTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("StatTracker")
            .field("display_name", &inner.display_name)
            .field("thread_id", &inner.thread_id)
            .field("interval_seconds", &inner.interval_seconds)
            .field("sample_count", &inner.samples.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_underlying_samples() {
        let t = StatTracker::new("Iterations".into(), "thread-1".into(), 1);
        let clone = t.clone();
        clone.add_sample(1.0);
        t.add_sample(2.0);
        assert_eq!(clone.samples(), vec![1.0, 2.0]);
    }

    #[test]
    fn new_instance_copies_metadata_not_samples() {
        let t = StatTracker::new("Iterations".into(), "thread-1".into(), 5);
        t.add_sample(1.0);
        let fresh = t.new_instance();
        assert_eq!(fresh.display_name(), "Iterations");
        assert_eq!(fresh.interval_seconds(), 5);
        assert!(fresh.samples().is_empty());
    }

    #[test]
    fn aggregate_sums_per_interval_and_names_aggregated() {
        let a = StatTracker::new("Iterations".into(), "thread-1".into(), 1);
        a.add_sample(1.0);
        a.add_sample(2.0);
        let b = StatTracker::new("Iterations".into(), "thread-2".into(), 1);
        b.add_sample(10.0);
        b.add_sample(20.0);

        let agg = StatTracker::aggregate(&[a, b]).unwrap();
        assert_eq!(agg.thread_id(), "aggregated");
        assert_eq!(agg.samples(), vec![11.0, 22.0]);
    }

    #[test]
    fn aggregate_is_order_independent() {
        let a = StatTracker::new("Iterations".into(), "thread-1".into(), 1);
        a.add_sample(1.0);
        let b = StatTracker::new("Iterations".into(), "thread-2".into(), 1);
        b.add_sample(2.0);

        let forward = StatTracker::aggregate(&[a.clone(), b.clone()]).unwrap();
        let reversed = StatTracker::aggregate(&[b, a]).unwrap();
        assert_eq!(forward.samples(), reversed.samples());
    }

    #[test]
    fn aggregate_handles_uneven_lengths() {
        let a = StatTracker::new("Iterations".into(), "thread-1".into(), 1);
        a.add_sample(1.0);
        a.add_sample(1.0);
        let b = StatTracker::new("Iterations".into(), "thread-2".into(), 1);
        b.add_sample(1.0);

        let agg = StatTracker::aggregate(&[a, b]).unwrap();
        assert_eq!(agg.samples(), vec![2.0, 1.0]);
    }
}
