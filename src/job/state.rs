//! The `Job` data type and its state machine.

pub use crate::wire::message::JobState;

use crate::wire::message::Parameter;

/// A single job accepted from the server. Exactly zero or one exists per
/// session: the session holds `Option<Job>`, never a collection.
#[derive(Clone, Debug)]
pub struct Job {
    pub job_id: String,
    pub job_class_name: String,
    pub threads_per_client: u32,
    pub client_number: u32,
    pub scheduled_start_time_ms: i64,
    pub stop_time_ms: Option<i64>,
    pub duration_secs: i64, // <= 0 means no limit
    pub collection_interval_secs: u32,
    pub thread_startup_delay_ms: u32,
    pub parameters: Vec<Parameter>,
    pub state: JobState,
    pub actual_start_time_ms: Option<i64>,
    pub actual_stop_time_ms: Option<i64>,
}

impl Job {
    /// Validates the invariants a freshly-built `Job` must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.threads_per_client < 1 {
            return Err("threadsPerClient must be >= 1".into());
        }
        if let Some(stop_time) = self.stop_time_ms {
            if stop_time <= self.scheduled_start_time_ms {
                return Err("stopTime must be after scheduledStartTime".into());
            }
        }
        Ok(())
    }

    /// Whether a transition from the current state to `next` is one of the
    /// edges the job state machine allows.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self.state, next),
            (NotStarted, Running)
                | (NotStarted, Cancelled)
                | (NotStarted, StoppedByShutdown)
                | (Running, Completed)
                | (Running, StoppedByUser)
                | (Running, StoppedByShutdown)
                | (Running, StoppedDueToError)
        )
    }

    pub fn transition_to(&mut self, next: JobState) -> Result<(), String> {
        if !self.can_transition_to(next) {
            return Err(format!(
                "illegal job state transition {:?} -> {:?}",
                self.state, next
            ));
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_job() -> Job {
        Job {
            job_id: "j1".into(),
            job_class_name: "Noop".into(),
            threads_per_client: 1,
            client_number: 0,
            scheduled_start_time_ms: 1_000,
            stop_time_ms: None,
            duration_secs: 2,
            collection_interval_secs: 1,
            thread_startup_delay_ms: 0,
            parameters: vec![],
            state: JobState::NotStarted,
            actual_start_time_ms: None,
            actual_stop_time_ms: None,
        }
    }

    #[test]
    fn rejects_zero_threads() {
        let mut j = base_job();
        j.threads_per_client = 0;
        assert!(j.validate().is_err());
    }

    #[test]
    fn rejects_stop_time_before_start() {
        let mut j = base_job();
        j.stop_time_ms = Some(500);
        assert!(j.validate().is_err());
    }

    #[test]
    fn every_edge_in_spec_state_machine_is_reachable() {
        let mut j = base_job();
        assert!(j.transition_to(JobState::Running).is_ok());
        assert!(j.transition_to(JobState::Completed).is_ok());
        assert_eq!(j.state, JobState::Completed);

        // Terminal states reject further transitions.
        assert!(j.transition_to(JobState::Running).is_err());
    }

    #[test]
    fn not_started_can_be_cancelled_directly() {
        let mut j = base_job();
        assert!(j.transition_to(JobState::Cancelled).is_ok());
    }
}
