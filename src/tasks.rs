//! Background execution of unit-based tasks
//!
//! A [`TaskRunner`] owns one worker thread that runs queued tasks one unit at
//! a time, in submission order. Commands arrive over a channel and are only
//! looked at between units, so pausing or cancelling never interrupts a unit
//! halfway.

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::thread::{self, JoinHandle};

use crate::dir_reconciler::UnitKind;
use crate::error::IndexError;
use crate::indexer::{IndexRun, VolumeIndexer};
use crate::listener::IndexListener;
use crate::models::IndexStats;

/// Whether a task has more units to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Finished,
}

/// Work that can be run one unit at a time
pub trait BackgroundTask: Send {
    fn name(&self) -> &str;

    /// Run exactly one unit
    fn run_unit(&mut self) -> Result<TaskStatus, IndexError>;

    /// Called instead of further units when the task is cancelled
    fn cancel(&mut self) {}
}

/// How a task left the runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub name: String,
    pub units_run: u64,
    pub outcome: TaskOutcome,
}

enum Command {
    Submit(Box<dyn BackgroundTask>),
    Pause,
    Resume,
    CancelCurrent,
    /// Stop accepting work; `drain` runs queued tasks to completion first
    Shutdown { drain: bool },
}

struct Entry {
    task: Box<dyn BackgroundTask>,
    units_run: u64,
}

impl Entry {
    fn report(self, outcome: TaskOutcome) -> TaskReport {
        TaskReport {
            name: self.task.name().to_string(),
            units_run: self.units_run,
            outcome,
        }
    }
}

/// Single worker thread running background tasks
pub struct TaskRunner {
    commands: Sender<Command>,
    worker: Option<JoinHandle<Vec<TaskReport>>>,
}

impl TaskRunner {
    pub fn new() -> Self {
        let (commands, rx) = unbounded();
        let worker = thread::spawn(move || worker_loop(rx));
        Self {
            commands,
            worker: Some(worker),
        }
    }

    pub fn submit(&self, task: impl BackgroundTask + 'static) {
        self.send(Command::Submit(Box::new(task)));
    }

    /// Hold the worker after its current unit
    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    /// Cancel the task at the head of the queue
    pub fn cancel_current(&self) {
        self.send(Command::CancelCurrent);
    }

    /// Run every queued task to its end, then stop the worker
    pub fn shutdown(mut self) -> Vec<TaskReport> {
        self.stop(true)
    }

    /// Cancel every queued task and stop the worker
    pub fn abort(mut self) -> Vec<TaskReport> {
        self.stop(false)
    }

    fn stop(&mut self, drain: bool) -> Vec<TaskReport> {
        self.send(Command::Shutdown { drain });
        match self.worker.take().map(JoinHandle::join) {
            Some(Ok(reports)) => reports,
            Some(Err(_)) => {
                warn!("Task worker panicked; reports are lost");
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Task worker is gone; command dropped");
        }
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop(false);
        }
    }
}

fn worker_loop(rx: Receiver<Command>) -> Vec<TaskReport> {
    let mut queue: VecDeque<Entry> = VecDeque::new();
    let mut reports = Vec::new();
    let mut paused = false;
    let mut draining = false;

    loop {
        let idle = queue.is_empty() || paused;
        if idle && draining && queue.is_empty() {
            break;
        }

        let command = if idle {
            match rx.recv() {
                Ok(command) => Some(command),
                // Runner dropped without a shutdown command
                Err(_) => Some(Command::Shutdown { drain: false }),
            }
        } else {
            match rx.try_recv() {
                Ok(command) => Some(command),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => Some(Command::Shutdown { drain: false }),
            }
        };

        if let Some(command) = command {
            match command {
                Command::Submit(task) => {
                    if draining {
                        warn!("Task {} submitted after shutdown; ignored", task.name());
                    } else {
                        debug!("Queued task {}", task.name());
                        queue.push_back(Entry { task, units_run: 0 });
                    }
                }
                Command::Pause => paused = true,
                Command::Resume => paused = false,
                Command::CancelCurrent => {
                    if let Some(mut entry) = queue.pop_front() {
                        info!("Cancelling task {}", entry.task.name());
                        entry.task.cancel();
                        reports.push(entry.report(TaskOutcome::Cancelled));
                    }
                }
                Command::Shutdown { drain: true } => {
                    draining = true;
                    paused = false;
                }
                Command::Shutdown { drain: false } => {
                    for mut entry in queue.drain(..) {
                        entry.task.cancel();
                        reports.push(entry.report(TaskOutcome::Cancelled));
                    }
                    break;
                }
            }
            continue;
        }

        let Some(entry) = queue.front_mut() else {
            continue;
        };
        match entry.task.run_unit() {
            Ok(TaskStatus::Pending) => entry.units_run += 1,
            Ok(TaskStatus::Finished) => {
                entry.units_run += 1;
                if let Some(entry) = queue.pop_front() {
                    debug!("Task {} completed", entry.task.name());
                    reports.push(entry.report(TaskOutcome::Completed));
                }
            }
            Err(e) => {
                if let Some(entry) = queue.pop_front() {
                    warn!("Task {} failed: {}", entry.task.name(), e);
                    reports.push(entry.report(TaskOutcome::Failed(e.to_string())));
                }
            }
        }
    }

    reports
}

/// Indexes a volume in the background, one directory or file unit at a time
pub struct IndexingTask {
    name: String,
    indexer: VolumeIndexer,
    listener: Box<dyn IndexListener + Send>,
    run: Option<IndexRun>,
    stats: Option<IndexStats>,
}

impl IndexingTask {
    pub fn new(indexer: VolumeIndexer, listener: Box<dyn IndexListener + Send>) -> Self {
        Self {
            name: format!("index {}", indexer.volume().name),
            indexer,
            listener,
            run: None,
            stats: None,
        }
    }

    /// Unit the next call to `run_unit` runs, once the run has begun
    pub fn next_unit(&self) -> Option<UnitKind> {
        self.run.as_ref().and_then(IndexRun::next_unit)
    }

    /// Final statistics of a finished or cancelled run
    pub fn stats(&self) -> Option<&IndexStats> {
        self.stats.as_ref()
    }
}

impl BackgroundTask for IndexingTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_unit(&mut self) -> Result<TaskStatus, IndexError> {
        if self.stats.is_some() {
            return Ok(TaskStatus::Finished);
        }
        if self.run.is_none() {
            let run = self.indexer.begin(self.listener.as_mut())?;
            self.run = Some(run);
        }
        let Some(run) = self.run.as_mut() else {
            return Ok(TaskStatus::Finished);
        };

        self.indexer.step(run, self.listener.as_mut())?;
        if !run.is_finished() {
            return Ok(TaskStatus::Pending);
        }

        if let Some(run) = self.run.take() {
            self.stats = Some(self.indexer.finish(run, self.listener.as_mut()));
        }
        Ok(TaskStatus::Finished)
    }

    fn cancel(&mut self) {
        if self.stats.is_some() {
            return;
        }
        let stats = match self.run.take() {
            Some(run) => self.indexer.cancel(run, self.listener.as_mut()),
            None => {
                let stats = IndexStats::new();
                self.listener.on_cancelled(&stats);
                stats
            }
        };
        self.stats = Some(stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Counts down `remaining` units, optionally failing at one of them
    struct Countdown {
        name: String,
        remaining: u64,
        fail_at: Option<u64>,
        ran: Arc<AtomicU64>,
    }

    impl Countdown {
        fn new(name: &str, units: u64, ran: Arc<AtomicU64>) -> Self {
            Self {
                name: name.to_string(),
                remaining: units,
                fail_at: None,
                ran,
            }
        }
    }

    impl BackgroundTask for Countdown {
        fn name(&self) -> &str {
            &self.name
        }

        fn run_unit(&mut self) -> Result<TaskStatus, IndexError> {
            if self.fail_at == Some(self.remaining) {
                return Err(IndexError::io_error(None, "disk unplugged"));
            }
            self.ran.fetch_add(1, Ordering::SeqCst);
            self.remaining -= 1;
            if self.remaining == 0 {
                Ok(TaskStatus::Finished)
            } else {
                Ok(TaskStatus::Pending)
            }
        }
    }

    #[test]
    fn test_shutdown_drains_in_order() {
        let ran = Arc::new(AtomicU64::new(0));
        let runner = TaskRunner::new();
        runner.submit(Countdown::new("first", 3, ran.clone()));
        runner.submit(Countdown::new("second", 2, ran.clone()));

        let reports = runner.shutdown();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].name, "first");
        assert_eq!(reports[0].units_run, 3);
        assert_eq!(reports[0].outcome, TaskOutcome::Completed);
        assert_eq!(reports[1].name, "second");
        assert_eq!(ran.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_failure_is_reported() {
        let ran = Arc::new(AtomicU64::new(0));
        let runner = TaskRunner::new();
        let mut task = Countdown::new("flaky", 5, ran.clone());
        task.fail_at = Some(3);
        runner.submit(task);

        let reports = runner.shutdown();
        assert_eq!(reports[0].units_run, 2);
        assert_eq!(
            reports[0].outcome,
            TaskOutcome::Failed("Io: disk unplugged (path: None)".to_string())
        );
    }

    #[test]
    fn test_cancel_while_paused_runs_nothing() {
        let ran = Arc::new(AtomicU64::new(0));
        let runner = TaskRunner::new();
        runner.pause();
        runner.submit(Countdown::new("held", 4, ran.clone()));
        runner.cancel_current();

        let reports = runner.shutdown();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, TaskOutcome::Cancelled);
        assert_eq!(reports[0].units_run, 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_abort_cancels_queued_tasks() {
        let ran = Arc::new(AtomicU64::new(0));
        let runner = TaskRunner::new();
        runner.pause();
        runner.submit(Countdown::new("a", 2, ran.clone()));
        runner.submit(Countdown::new("b", 2, ran.clone()));

        let reports = runner.abort();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.outcome == TaskOutcome::Cancelled));
    }

    #[test]
    fn test_report_serialization() {
        let report = TaskReport {
            name: "index ext".to_string(),
            units_run: 7,
            outcome: TaskOutcome::Failed("boom".to_string()),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"]["outcome"], "failed");
        assert_eq!(json["outcome"]["message"], "boom");
    }
}
