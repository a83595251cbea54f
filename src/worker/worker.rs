use std::{
    io::{ErrorKind, Read},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use portable_pty::{Child, ChildKiller, MasterPty};

use crate::config::Config;
use crate::manager::{
    job_manager::{lock_jobs, JobTable},
    log_store::JobLog,
};
use crate::models::{
    job::{JobId, JobStatus, SPAWN_FAILURE_EXIT_CODE},
    message::JobMessage,
};
use crate::output::sanitizer::Sanitizer;
use crate::worker::pty::{spawn_in_pty, PtyProcess};

const READ_BUFFER_SIZE: usize = 8192;
const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handles of a running job, released once its exit has been observed.
pub(crate) struct ProcessHandles {
    pub pid: Option<u32>,
    pub killer: Box<dyn ChildKiller + Send + Sync>,
    pub master: Box<dyn MasterPty + Send>,
    pub exited: Arc<AtomicBool>,
}

pub(crate) fn spawn_supervisor_thread(
    sender: Sender<JobMessage>,
    receiver: Receiver<JobMessage>,
    jobs: JobTable,
    config: Arc<Config>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match receiver.recv() {
            Ok(message) => match message {
                JobMessage::Run(id) => handle_run_job(id, &jobs, &sender, &config),
                JobMessage::WriteOutput(id, output) => handle_output_write(id, output, &jobs),
                JobMessage::Exited(id, code) => handle_exit(id, code, &jobs),
                JobMessage::Shutdown => {
                    handle_shutdown(&jobs, &config);
                    break;
                }
            },
            Err(e) => {
                error!("Failed to receive message: {}", e);
                break;
            }
        }
    })
}

fn handle_run_job(id: JobId, jobs: &JobTable, sender: &Sender<JobMessage>, config: &Config) {
    let job = {
        let guard = lock_jobs(jobs);
        match guard.get(&id) {
            Some(entry) if entry.job.status == JobStatus::Pending => entry.job.clone(),
            Some(_) => {
                info!("Job '{}' left the pending state before it started.", id);
                return;
            }
            None => return,
        }
    };

    info!("Starting job '{}'.", id);
    let log = match JobLog::create(&job.log_path) {
        Ok(log) => log,
        Err(e) => {
            error!("Failed to create log for job '{}': {}", id, e);
            fail_to_start(&id, jobs);
            return;
        }
    };
    let PtyProcess {
        child,
        killer,
        reader,
        master,
        pid,
    } = match spawn_in_pty(&job.command, &job.args, &config.pty) {
        Ok(process) => process,
        Err(e) => {
            error!("Failed to run job '{}': {}", id, e);
            fail_to_start(&id, jobs);
            return;
        }
    };

    let exited = Arc::new(AtomicBool::new(false));
    let handles = ProcessHandles {
        pid,
        killer,
        master,
        exited: Arc::clone(&exited),
    };
    {
        let mut guard = lock_jobs(jobs);
        match guard.get_mut(&id) {
            Some(entry) if entry.job.status == JobStatus::Pending => {
                entry.job.mark_running(pid);
                entry.log = Some(log);
                entry.process = Some(handles);
                info!("Job '{}' running with pid {:?}.", id, pid);
            }
            Some(entry) => {
                info!("Job '{}' was cancelled while starting.", id);
                entry.terminator = Some(terminate_process(&id, handles, config.jobs.cancel_grace()));
            }
            None => {
                terminate_process(&id, handles, config.jobs.cancel_grace());
            }
        }
    }

    let (drained_tx, drained_rx) = bounded::<()>(0);
    spawn_reader_thread(id.clone(), reader, sender.clone(), drained_tx);
    spawn_exit_waiter(
        id,
        child,
        exited,
        drained_rx,
        config.jobs.drain_timeout(),
        sender.clone(),
    );
}

fn fail_to_start(id: &JobId, jobs: &JobTable) {
    if let Some(entry) = lock_jobs(jobs).get_mut(id) {
        entry.fail_to_start();
        info!(
            "Job '{}' failed to start (exit code {}).",
            id, SPAWN_FAILURE_EXIT_CODE
        );
    }
}

// Producer half of a job: PTY bytes in, sanitized text out. `drained` is
// dropped only after the last chunk has been queued.
fn spawn_reader_thread(
    id: JobId,
    mut reader: Box<dyn Read + Send>,
    sender: Sender<JobMessage>,
    drained: Sender<()>,
) {
    thread::spawn(move || {
        let _drained = drained;
        let mut sanitizer = Sanitizer::new();
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => send_output(&sender, &id, sanitizer.push(&buf[..n])),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(5));
                    continue;
                }
                Err(e) => {
                    debug!("Output of job '{}' closed: {}", id, e);
                    break;
                }
            }
        }
        send_output(&sender, &id, sanitizer.finish());
    });
}

fn send_output(sender: &Sender<JobMessage>, id: &JobId, text: String) {
    if text.is_empty() {
        return;
    }
    if let Err(e) = sender.send(JobMessage::WriteOutput(id.clone(), text)) {
        debug!("Dropping output of job '{}': {}", id, e);
    }
}

fn spawn_exit_waiter(
    id: JobId,
    mut child: Box<dyn Child + Send + Sync>,
    exited: Arc<AtomicBool>,
    drained: Receiver<()>,
    drain_timeout: Duration,
    sender: Sender<JobMessage>,
) {
    thread::spawn(move || {
        let code = match child.wait() {
            Ok(status) => status.exit_code() as i32,
            Err(e) => {
                error!("Failed to wait for job '{}': {}", id, e);
                SPAWN_FAILURE_EXIT_CODE
            }
        };
        exited.store(true, Ordering::SeqCst);

        if let Err(RecvTimeoutError::Timeout) = drained.recv_timeout(drain_timeout) {
            warn!(
                "Output of job '{}' still open {:?} after exit, finishing without it.",
                id, drain_timeout
            );
        }
        if let Err(e) = sender.send(JobMessage::Exited(id.clone(), code)) {
            error!("Failed to report exit of job '{}': {}", id, e);
        }
    });
}

fn handle_output_write(id: JobId, output: String, jobs: &JobTable) {
    let mut guard = lock_jobs(jobs);
    let Some(entry) = guard.get_mut(&id) else {
        return;
    };
    if entry.job.is_done() {
        debug!("Discarding {} bytes for finished job '{}'.", output.len(), id);
        return;
    }
    if let Some(log) = entry.log.as_mut() {
        if let Err(e) = log.append(&output) {
            warn!("Failed to append to log of job '{}': {}", id, e);
        }
    }
}

fn handle_exit(id: JobId, code: i32, jobs: &JobTable) {
    let mut guard = lock_jobs(jobs);
    let Some(entry) = guard.get_mut(&id) else {
        return;
    };
    entry.process = None;
    if entry.job.record_exit(code) {
        info!("Job '{}' exited with code {}.", id, code);
    } else {
        debug!("Job '{}' exited with code {} after it was cancelled.", id, code);
    }
    if let Some(log) = entry.log.take() {
        if let Err(e) = log.close() {
            warn!("Failed to close log of job '{}': {}", id, e);
        }
    }
}

// Waits for every termination so no process outlives the manager.
fn handle_shutdown(jobs: &JobTable, config: &Config) {
    let mut terminators = Vec::new();
    {
        let mut guard = lock_jobs(jobs);
        for entry in guard.values_mut() {
            if entry.mark_cancelled() {
                info!("Job '{}' cancelled on shutdown.", entry.job.id);
                if let Some(process) = entry.process.take() {
                    terminators.push(terminate_process(
                        &entry.job.id,
                        process,
                        config.jobs.cancel_grace(),
                    ));
                }
            }
            terminators.extend(entry.terminator.take());
        }
    }
    for terminator in terminators {
        if terminator.join().is_err() {
            error!("A job terminator panicked during shutdown.");
        }
    }
}

/// Graduated termination: SIGTERM to the process group first, then the PTY
/// killer once `grace` has passed without an exit.
pub(crate) fn terminate_process(
    id: &JobId,
    handles: ProcessHandles,
    grace: Duration,
) -> JoinHandle<()> {
    let id = id.clone();
    thread::spawn(move || {
        let ProcessHandles {
            pid,
            mut killer,
            master,
            exited,
        } = handles;

        if send_sigterm(pid) {
            let deadline = Instant::now() + grace;
            while !exited.load(Ordering::SeqCst) && Instant::now() < deadline {
                thread::sleep(TERMINATE_POLL_INTERVAL);
            }
        }
        if !exited.load(Ordering::SeqCst) {
            info!("Force killing job '{}'.", id);
            if let Err(e) = killer.kill() {
                warn!("Failed to kill job '{}': {}", id, e);
            }
        }
        drop(master);
    })
}

#[cfg(unix)]
fn send_sigterm(pid: Option<u32>) -> bool {
    let Some(pid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return false;
    };
    // The PTY child leads its own session, so its pid is also the group id.
    unsafe { libc::kill(-pid, libc::SIGTERM) == 0 || libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: Option<u32>) -> bool {
    false
}
