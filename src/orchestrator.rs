use std::any::Any;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use tracing::error;

use crate::app::{ProgressEvent, ProgressSink};
use crate::config::DEFAULT_WORKERS;
use crate::domain::TaskDescriptor;
use crate::report::{ReportRow, RunSummary, format_binary_size};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed(ReportRow),
    Failed {
        task: TaskDescriptor,
        message: String,
    },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed(row) if row.is_success())
    }

    pub fn into_row(self) -> ReportRow {
        match self {
            TaskOutcome::Completed(row) => row,
            TaskOutcome::Failed { task, message } => ReportRow::failed(&task, message),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Orchestrator {
    workers: usize,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl Orchestrator {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn run<F>(
        &self,
        tasks: Vec<TaskDescriptor>,
        job: F,
        sink: &dyn ProgressSink,
    ) -> Vec<TaskOutcome>
    where
        F: Fn(&TaskDescriptor) -> ReportRow + Sync,
    {
        let total = tasks.len();
        let started = Instant::now();
        let queue = Mutex::new(tasks.into_iter().collect::<VecDeque<_>>());
        let (tx, rx) = mpsc::channel::<TaskOutcome>();

        thread::scope(|scope| {
            for _ in 0..self.workers.min(total) {
                let tx = tx.clone();
                let queue = &queue;
                let job = &job;
                scope.spawn(move || {
                    loop {
                        let next = match queue.lock() {
                            Ok(mut guard) => guard.pop_front(),
                            Err(poisoned) => poisoned.into_inner().pop_front(),
                        };
                        let Some(task) = next else {
                            break;
                        };
                        let outcome = match catch_unwind(AssertUnwindSafe(|| job(&task))) {
                            Ok(row) => TaskOutcome::Completed(row),
                            Err(payload) => {
                                let message = panic_message(payload.as_ref());
                                error!(experiment = %task.experiment_id, %message, "task panicked");
                                TaskOutcome::Failed { task, message }
                            }
                        };
                        if tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            let mut outcomes = Vec::with_capacity(total);
            for outcome in rx {
                outcomes.push(outcome);
                sink.event(ProgressEvent {
                    message: format!("completed {}/{}", outcomes.len(), total),
                    elapsed: Some(started.elapsed()),
                });
            }
            outcomes
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return format!("worker panicked: {message}");
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return format!("worker panicked: {message}");
    }
    "worker panicked".to_string()
}

pub fn summarize(outcomes: &[TaskOutcome]) -> RunSummary {
    let mut successes = 0usize;
    let mut total_files = 0u64;
    let mut total_bytes = 0u64;
    for outcome in outcomes {
        if let TaskOutcome::Completed(row) = outcome {
            if row.is_success() {
                successes += 1;
                total_files = total_files.saturating_add(row.file_count.unwrap_or(0));
                total_bytes = total_bytes.saturating_add(row.file_size.unwrap_or(0));
            }
        }
    }
    RunSummary {
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        total: outcomes.len(),
        successes,
        failures: outcomes.len() - successes,
        total_files,
        total_bytes,
        total_size: format_binary_size(total_bytes),
    }
}
