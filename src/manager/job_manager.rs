use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::JoinHandle,
    time::{Duration, SystemTime},
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{error, info, warn};

use crate::config::Config;
use crate::manager::log_store::{self, JobLog};
use crate::models::{
    job::{Job, JobId, SPAWN_FAILURE_EXIT_CODE},
    message::JobMessage,
};
use crate::worker::worker::{spawn_supervisor_thread, terminate_process, ProcessHandles};

pub(crate) type JobTable = Arc<Mutex<HashMap<JobId, JobEntry>>>;

pub(crate) fn lock_jobs(jobs: &Mutex<HashMap<JobId, JobEntry>>) -> MutexGuard<'_, HashMap<JobId, JobEntry>> {
    jobs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry slot for one job: the public record plus the resources only the
/// manager may touch.
pub(crate) struct JobEntry {
    pub job: Job,
    pub log: Option<JobLog>,
    pub process: Option<ProcessHandles>,
    /// Set once a reader has been handed the job in a terminal state. Only
    /// such jobs are eligible for retention eviction.
    pub observed_done: bool,
    /// Background termination started by a cancel, joined on shutdown.
    pub terminator: Option<JoinHandle<()>>,
}

impl JobEntry {
    fn new(job: Job) -> Self {
        Self {
            job,
            log: None,
            process: None,
            observed_done: false,
            terminator: None,
        }
    }

    /// Marks the job cancelled and closes its log. Returns `false` if the job
    /// had already finished. The process, if any, is left in `process` for
    /// the caller to terminate.
    pub(crate) fn mark_cancelled(&mut self) -> bool {
        if !self.job.record_cancel() {
            return false;
        }
        if let Some(log) = self.log.take() {
            if let Err(e) = log.close() {
                warn!("Failed to close log of job '{}': {}", self.job.id, e);
            }
        }
        true
    }

    /// Cancels the job and starts terminating its process in the background.
    pub(crate) fn cancel(&mut self, grace: Duration) -> bool {
        if !self.mark_cancelled() {
            return false;
        }
        if let Some(process) = self.process.take() {
            self.terminator = Some(terminate_process(&self.job.id, process, grace));
        }
        true
    }

    fn snapshot(&mut self) -> Job {
        if self.job.is_done() {
            self.observed_done = true;
        }
        self.job.clone()
    }

    pub(crate) fn fail_to_start(&mut self) {
        if self.job.record_exit(SPAWN_FAILURE_EXIT_CODE) {
            self.log = None;
            self.process = None;
        }
    }
}

/// Owns every job started through it. Dropping the manager stops its
/// supervisor and cancels jobs that are still live.
pub struct JobManager {
    jobs: JobTable,
    sender: Sender<JobMessage>,
    receiver: Receiver<JobMessage>,
    config: Arc<Config>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl JobManager {
    pub fn new(config: Config) -> Self {
        let (sender, receiver) = unbounded();
        JobManager {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            sender,
            receiver,
            config: Arc::new(config),
            supervisor: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let jobs = Arc::clone(&self.jobs);
        let sender = self.sender.clone();
        let receiver = self.receiver.clone();
        let config = Arc::clone(&self.config);

        let handle = spawn_supervisor_thread(sender, receiver, jobs, config);
        let mut supervisor = self.supervisor.lock().unwrap_or_else(PoisonError::into_inner);
        if supervisor.replace(handle).is_some() {
            warn!("Job supervisor started more than once.");
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers a job and hands it to the supervisor. The id is usable for
    /// polling as soon as this returns; spawn failures show up as a failed job.
    pub fn start_job(&self, command: impl Into<String>, args: Vec<String>) -> JobId {
        self.prune_finished();

        let id = JobId::generate();
        let path = log_store::log_path(&self.config.jobs_dir, &id);
        let job = Job::new(id.clone(), command.into(), args, path);
        info!("Job '{}' created: {}", id, job.command_line());
        lock_jobs(&self.jobs).insert(id.clone(), JobEntry::new(job));

        if let Err(e) = self.sender.send(JobMessage::Run(id.clone())) {
            error!("Failed to schedule job '{}': {}", id, e);
            if let Some(entry) = lock_jobs(&self.jobs).get_mut(&id) {
                entry.fail_to_start();
            }
        }
        id
    }

    pub fn cancel_job(&self, id: &JobId) -> bool {
        let cancelled = lock_jobs(&self.jobs)
            .get_mut(id)
            .is_some_and(|entry| entry.cancel(self.config.jobs.cancel_grace()));
        if cancelled {
            info!("Job '{}' cancelled.", id);
        }
        cancelled
    }

    pub fn get_job(&self, id: &JobId) -> Option<Job> {
        lock_jobs(&self.jobs).get_mut(id).map(JobEntry::snapshot)
    }

    /// Full sanitized log. `None` for unknown ids, empty for jobs without output.
    pub fn get_job_output(&self, id: &JobId) -> Option<String> {
        self.job_with_output(id).map(|(_, output)| output)
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = lock_jobs(&self.jobs)
            .values()
            .map(|entry| entry.job.clone())
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    /// Forgets a finished job and deletes its log.
    pub fn cleanup_job(&self, id: &JobId) -> bool {
        let removed = {
            let mut jobs = lock_jobs(&self.jobs);
            let finished = jobs.get(id).is_some_and(|entry| entry.job.is_done());
            if finished {
                jobs.remove(id)
            } else {
                None
            }
        };
        match removed {
            Some(entry) => {
                remove_job_log(&entry.job);
                true
            }
            None => false,
        }
    }

    /// Reads the job record and its log under one lock, so `done` and the
    /// log contents always agree.
    pub(crate) fn job_with_output(&self, id: &JobId) -> Option<(Job, String)> {
        let mut jobs = lock_jobs(&self.jobs);
        let job = jobs.get_mut(id)?.snapshot();
        let output = log_store::read_log(&job.log_path).unwrap_or_else(|e| {
            warn!("Failed to read log of job '{}': {}", id, e);
            String::new()
        });
        Some((job, output))
    }

    fn prune_finished(&self) {
        let retention = self.config.jobs.retention();
        let max_finished = self.config.jobs.max_finished_jobs;
        let now = SystemTime::now();

        let evicted: Vec<JobEntry> = {
            let mut jobs = lock_jobs(&self.jobs);
            let mut finished: Vec<(SystemTime, JobId)> = jobs
                .values()
                .filter(|entry| entry.observed_done)
                .filter_map(|entry| Some((entry.job.finished_at?, entry.job.id.clone())))
                .collect();
            finished.sort();

            let expired = finished
                .iter()
                .take_while(|(at, _)| {
                    !retention.is_zero()
                        && now.duration_since(*at).is_ok_and(|age| age > retention)
                })
                .count();
            let over_cap = if max_finished == 0 {
                0
            } else {
                finished.len().saturating_sub(max_finished)
            };

            finished
                .iter()
                .take(expired.max(over_cap))
                .filter_map(|(_, id)| jobs.remove(id))
                .collect()
        };

        for entry in &evicted {
            info!("Job '{}' evicted by retention policy.", entry.job.id);
            remove_job_log(&entry.job);
        }
    }
}

/// Waits for the supervisor, which terminates live jobs before it returns.
impl Drop for JobManager {
    fn drop(&mut self) {
        let _ = self.sender.send(JobMessage::Shutdown);
        let supervisor = self
            .supervisor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = supervisor {
            if handle.join().is_err() {
                error!("Job supervisor panicked.");
            }
        }
    }
}

fn remove_job_log(job: &Job) {
    if let Err(e) = log_store::remove_log(&job.log_path) {
        warn!("Failed to remove log of job '{}': {}", job.id, e);
    }
}
