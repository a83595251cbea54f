//! Read-side protocol for clients following a job's progress.
//!
//! Clients keep their own cursor: the number of lines already consumed. Each
//! poll returns the lines past that cursor and the new total to resume from.

use std::{
    thread,
    time::{Duration, Instant},
};

use serde::Serialize;

use crate::manager::job_manager::JobManager;
use crate::models::job::{Job, JobId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollResponse {
    pub new_lines: Vec<String>,
    pub total_line_count: usize,
    pub done: bool,
    /// `None` until the job is done.
    pub success: Option<bool>,
}

/// The whole-log status view handed to simple clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatusReport {
    pub done: bool,
    pub success: bool,
    pub output: String,
}

impl JobManager {
    /// Returns `None` for an id this manager does not know.
    pub fn poll(&self, id: &JobId, consumed: usize) -> Option<PollResponse> {
        let (job, output) = self.job_with_output(id)?;
        let done = job.is_done();
        let lines = visible_lines(&output, done);
        let total_line_count = lines.len();
        let new_lines = lines
            .into_iter()
            .skip(consumed)
            .map(str::to_string)
            .collect();

        Some(PollResponse {
            new_lines,
            total_line_count,
            done,
            success: job.success(),
        })
    }

    pub fn status(&self, id: &JobId) -> Option<JobStatusReport> {
        let (job, output) = self.job_with_output(id)?;
        Some(JobStatusReport {
            done: job.is_done(),
            success: job.success().unwrap_or(false),
            output,
        })
    }

    /// Waits for a job by polling every `interval`, never blocking on the
    /// process itself. Gives up after `timeout` when one is given.
    pub fn wait_for_job(
        &self,
        id: &JobId,
        interval: Duration,
        timeout: Option<Duration>,
    ) -> Option<Job> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let job = self.get_job(id)?;
            if job.is_done() {
                return Some(job);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return None;
            }
            thread::sleep(interval);
        }
    }
}

// While a job runs, an unterminated last line may still grow, so it is held
// back until the job is done.
fn visible_lines(output: &str, done: bool) -> Vec<&str> {
    let mut lines: Vec<&str> = output.split('\n').collect();
    let tail = lines.pop().unwrap_or_default();
    if done && !tail.is_empty() {
        lines.push(tail);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_tail_is_held_back_until_done() {
        assert_eq!(visible_lines("a\nb\npart", false), vec!["a", "b"]);
        assert_eq!(visible_lines("a\nb\npart", true), vec!["a", "b", "part"]);
        assert_eq!(visible_lines("a\n\nb\n", false), vec!["a", "", "b"]);
        assert!(visible_lines("", true).is_empty());
    }

    #[test]
    fn unknown_job_is_not_found() {
        let manager = JobManager::new(crate::config::Config::default());
        let id = JobId::from("job-missing");
        assert_eq!(manager.poll(&id, 0), None);
        assert_eq!(manager.status(&id), None);
        assert_eq!(manager.get_job_output(&id), None);
        assert!(!manager.cancel_job(&id));
    }
}
