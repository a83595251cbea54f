use std::{
    fmt,
    path::PathBuf,
    str::FromStr,
    time::SystemTime,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Exit code recorded for a job whose process could not be started.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(format!("job-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().to_string()))
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub command: String,
    pub args: Vec<String>,
    pub status: JobStatus,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub created_at: SystemTime,
    pub finished_at: Option<SystemTime>,
    pub log_path: PathBuf,
}

impl Job {
    pub fn new(id: JobId, command: String, args: Vec<String>, log_path: PathBuf) -> Self {
        Self {
            id,
            command,
            args,
            status: JobStatus::Pending,
            pid: None,
            exit_code: None,
            created_at: SystemTime::now(),
            finished_at: None,
            log_path,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status.is_terminal()
    }

    /// `None` until the job is done.
    pub fn success(&self) -> Option<bool> {
        self.is_done().then_some(self.exit_code == Some(0))
    }

    pub fn command_line(&self) -> String {
        let mut line = self.command.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    pub(crate) fn mark_running(&mut self, pid: Option<u32>) {
        if self.status == JobStatus::Pending {
            self.status = JobStatus::Running;
            self.pid = pid;
        }
    }

    /// Records the process exit. Returns `false` when the job had already
    /// reached a terminal state, in which case nothing changes.
    pub(crate) fn record_exit(&mut self, exit_code: i32) -> bool {
        if self.is_done() {
            return false;
        }
        self.status = if exit_code == 0 {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        self.exit_code = Some(exit_code);
        self.finished_at = Some(SystemTime::now());
        true
    }

    pub(crate) fn record_cancel(&mut self) -> bool {
        if self.is_done() {
            return false;
        }
        self.status = JobStatus::Cancelled;
        self.finished_at = Some(SystemTime::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            JobId::generate(),
            "winget".to_string(),
            vec!["list".to_string()],
            PathBuf::from("jobs/x.log"),
        )
    }

    #[test]
    fn ids_are_prefixed_and_unique() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert!(a.as_str().starts_with("job-"));
        assert_ne!(a, b);
    }

    #[test]
    fn exit_is_recorded_once() {
        let mut job = job();
        job.mark_running(Some(42));
        assert_eq!(job.success(), None);

        assert!(job.record_exit(3));
        assert!(!job.record_exit(0));
        assert!(!job.record_cancel());
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.exit_code, Some(3));
        assert_eq!(job.success(), Some(false));
    }

    #[test]
    fn cancel_leaves_exit_code_empty() {
        let mut job = job();
        assert!(job.record_cancel());
        assert!(job.is_done());
        assert_eq!(job.exit_code, None);
        assert_eq!(job.success(), Some(false));
        assert!(!job.record_exit(0));
    }

    #[test]
    fn running_is_only_entered_from_pending() {
        let mut job = job();
        job.record_cancel();
        job.mark_running(Some(7));
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.pid, None);
    }
}
