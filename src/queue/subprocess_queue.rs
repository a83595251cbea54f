//! Admission control for short auxiliary subprocesses.
//!
//! At most `capacity` tasks run at once and the rest wait in FIFO order. Each
//! task has a wall-clock limit. Failures leave a negative-cache marker under
//! the task's key so repeats are answered without spawning anything.

use std::{
    collections::{HashMap, VecDeque},
    io::Read,
    process::{Command, Stdio},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    /// Negative-cache key; tasks with equal keys are treated as the same request.
    pub key: String,
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Exit code 0 with non-empty stdout, trimmed.
    Succeeded(String),
    Failed { exit_code: Option<i32> },
    TimedOut,
    /// Not negatively cached, the cause may be transient.
    SpawnFailed(String),
    NegativeCached,
}

struct Pending {
    task: QueuedTask,
    reply: Sender<TaskOutcome>,
}

#[derive(Default)]
struct QueueState {
    waiting: VecDeque<Pending>,
    active: usize,
    failures: HashMap<String, Instant>,
}

struct Shared {
    capacity: usize,
    timeout: Duration,
    negative_ttl: Duration,
    state: Mutex<QueueState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct SubprocessQueue {
    shared: Arc<Shared>,
}

impl SubprocessQueue {
    pub fn new(capacity: usize, timeout: Duration, negative_ttl: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity: capacity.max(1),
                timeout,
                negative_ttl,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Queues a task. The outcome arrives on the returned channel once the
    /// task has run, or immediately when its key is negatively cached.
    pub fn enqueue(&self, task: QueuedTask) -> Receiver<TaskOutcome> {
        let (reply, outcome) = bounded(1);
        {
            let mut state = self.shared.lock();
            if is_negatively_cached(&mut state, &task.key, self.shared.negative_ttl) {
                debug!("Task '{}' answered from the negative cache.", task.key);
                let _ = reply.send(TaskOutcome::NegativeCached);
                return outcome;
            }
            state.waiting.push_back(Pending { task, reply });
        }
        pump(&self.shared);
        outcome
    }

    pub fn active(&self) -> usize {
        self.shared.lock().active
    }

    pub fn waiting(&self) -> usize {
        self.shared.lock().waiting.len()
    }

    /// Drops queued tasks that have not started. Their receivers disconnect.
    pub fn clear_waiting(&self) -> usize {
        let mut state = self.shared.lock();
        let cleared = state.waiting.len();
        state.waiting.clear();
        cleared
    }

    pub fn is_negatively_cached(&self, key: &str) -> bool {
        let mut state = self.shared.lock();
        is_negatively_cached(&mut state, key, self.shared.negative_ttl)
    }
}

fn is_negatively_cached(state: &mut QueueState, key: &str, ttl: Duration) -> bool {
    match state.failures.get(key) {
        Some(at) if at.elapsed() < ttl => true,
        Some(_) => {
            state.failures.remove(key);
            false
        }
        None => false,
    }
}

// Expired markers are swept here so keys that are never asked for again do
// not accumulate.
fn record_failure(shared: &Shared, key: &str) {
    let mut state = shared.lock();
    let ttl = shared.negative_ttl;
    state.failures.retain(|_, at| at.elapsed() < ttl);
    state.failures.insert(key.to_string(), Instant::now());
}

// Starts waiting tasks while there is capacity.
fn pump(shared: &Arc<Shared>) {
    loop {
        let next = {
            let mut state = shared.lock();
            if state.active >= shared.capacity {
                return;
            }
            let Some(next) = state.waiting.pop_front() else {
                return;
            };
            state.active += 1;
            next
        };

        let slot = Slot {
            shared: Arc::clone(shared),
        };
        thread::spawn(move || {
            let Pending { task, reply } = next;
            let outcome = run_task(&task, slot.shared.timeout);
            if matches!(
                outcome,
                TaskOutcome::Failed { .. } | TaskOutcome::TimedOut
            ) {
                record_failure(&slot.shared, &task.key);
            }
            // Free the slot before replying so a caller reacting to the
            // outcome sees the capacity again.
            drop(slot);
            let _ = reply.send(outcome);
        });
    }
}

/// Holds one unit of capacity. Released exactly once, whichever way the
/// task ends.
struct Slot {
    shared: Arc<Shared>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.active = state.active.saturating_sub(1);
        }
        pump(&self.shared);
    }
}

fn run_task(task: &QueuedTask, timeout: Duration) -> TaskOutcome {
    let mut child = match Command::new(&task.command)
        .args(&task.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            warn!("Failed to spawn '{}' for '{}': {}", task.command, task.key, e);
            return TaskOutcome::SpawnFailed(e.to_string());
        }
    };

    let stdout = child.stdout.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) if Instant::now() >= deadline => break None,
            Ok(None) => thread::sleep(WAIT_POLL_INTERVAL),
            Err(e) => {
                warn!("Failed to wait for '{}': {}", task.key, e);
                break None;
            }
        }
    };

    let Some(status) = status else {
        info!("Task '{}' timed out after {:?}.", task.key, timeout);
        let _ = child.kill();
        let _ = child.wait();
        return TaskOutcome::TimedOut;
    };

    let output = stdout
        .and_then(|reader| reader.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
        .unwrap_or_default();
    if status.success() && !output.is_empty() {
        TaskOutcome::Succeeded(output)
    } else {
        debug!("Task '{}' failed with {:?}.", task.key, status.code());
        TaskOutcome::Failed {
            exit_code: status.code(),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sh(key: &str, script: &str) -> QueuedTask {
        QueuedTask {
            key: key.to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    const LONG: Duration = Duration::from_secs(10);

    #[test]
    fn successful_task_returns_trimmed_stdout() {
        let queue = SubprocessQueue::new(2, LONG, LONG);
        let outcome = queue.enqueue(sh("ok", "echo '  icon-data  '")).recv().unwrap();
        assert_eq!(outcome, TaskOutcome::Succeeded("icon-data".to_string()));
        assert!(!queue.is_negatively_cached("ok"));
    }

    #[test]
    fn failure_is_negatively_cached() {
        let queue = SubprocessQueue::new(2, LONG, LONG);
        let first = queue.enqueue(sh("bad", "exit 3")).recv().unwrap();
        assert_eq!(first, TaskOutcome::Failed { exit_code: Some(3) });

        let second = queue.enqueue(sh("bad", "echo fine")).recv().unwrap();
        assert_eq!(second, TaskOutcome::NegativeCached);
    }

    #[test]
    fn empty_output_counts_as_failure() {
        let queue = SubprocessQueue::new(1, LONG, LONG);
        let outcome = queue.enqueue(sh("empty", "true")).recv().unwrap();
        assert_eq!(outcome, TaskOutcome::Failed { exit_code: Some(0) });
    }

    #[test]
    fn negative_cache_expires() {
        let queue = SubprocessQueue::new(1, LONG, Duration::ZERO);
        queue.enqueue(sh("flaky", "exit 1")).recv().unwrap();
        assert!(!queue.is_negatively_cached("flaky"));
        let outcome = queue.enqueue(sh("flaky", "echo up")).recv().unwrap();
        assert_eq!(outcome, TaskOutcome::Succeeded("up".to_string()));
    }

    #[test]
    fn expired_markers_are_swept_on_the_next_failure() {
        let queue = SubprocessQueue::new(1, LONG, Duration::from_millis(50));
        queue.enqueue(sh("old", "exit 1")).recv().unwrap();
        thread::sleep(Duration::from_millis(100));
        queue.enqueue(sh("new", "exit 1")).recv().unwrap();

        let state = queue.shared.lock();
        assert_eq!(state.failures.len(), 1);
        assert!(state.failures.contains_key("new"));
    }

    #[test]
    fn spawn_failure_is_not_cached() {
        let queue = SubprocessQueue::new(1, LONG, LONG);
        let task = QueuedTask {
            key: "missing".to_string(),
            command: "/nonexistent/pkgrelay-helper".to_string(),
            args: Vec::new(),
        };
        let outcome = queue.enqueue(task).recv().unwrap();
        assert!(matches!(outcome, TaskOutcome::SpawnFailed(_)));
        assert!(!queue.is_negatively_cached("missing"));
    }

    #[test]
    fn timed_out_task_releases_its_slot() {
        let queue = SubprocessQueue::new(1, Duration::from_millis(200), LONG);
        let slow = queue.enqueue(sh("slow", "sleep 5"));
        let next = queue.enqueue(sh("next", "echo after"));

        assert_eq!(slow.recv().unwrap(), TaskOutcome::TimedOut);
        assert_eq!(next.recv().unwrap(), TaskOutcome::Succeeded("after".to_string()));
        assert!(queue.is_negatively_cached("slow"));
        assert_eq!(queue.active(), 0);
    }

    #[test]
    fn never_runs_more_than_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("trace");
        let queue = SubprocessQueue::new(2, LONG, LONG);

        // Each task records its start, checks how many are running, then
        // records its end.
        let script = |n: usize| {
            format!(
                "echo start {n} >> {t}; \
                 running=$(( $(grep -c start {t}) - $(grep -c end {t}) )); \
                 sleep 0.2; echo end {n} >> {t}; echo $running",
                t = trace.display()
            )
        };
        let receivers: Vec<_> = (0..5)
            .map(|n| queue.enqueue(sh(&format!("task-{n}"), &script(n))))
            .collect();

        for receiver in receivers {
            match receiver.recv().unwrap() {
                TaskOutcome::Succeeded(running) => {
                    let running: usize = running.parse().unwrap();
                    assert!(running <= 2, "{running} tasks ran at once");
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        assert_eq!(queue.active(), 0);
        assert_eq!(queue.waiting(), 0);
    }

    #[test]
    fn waiting_tasks_start_in_fifo_order() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("trace");
        let queue = SubprocessQueue::new(1, LONG, LONG);

        let receivers: Vec<_> = (0..4)
            .map(|n| {
                let script = format!("echo {n} >> {}; echo {n}", trace.display());
                queue.enqueue(sh(&format!("fifo-{n}"), &script))
            })
            .collect();
        for receiver in receivers {
            receiver.recv().unwrap();
        }

        let order = std::fs::read_to_string(&trace).unwrap();
        assert_eq!(order, "0\n1\n2\n3\n");
    }
}
