use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::archive::{archive_path_exists, verify_archive};
use crate::config::RunSettings;
use crate::domain::{Investigator, ProjectId};
use crate::enumerate::{compile_filter, enumerate_sessions, filter_sessions};
use crate::error::MigrationError;
use crate::orchestrator::{Orchestrator, summarize};
use crate::report::{ReportRow, RunSummary, sort_rows};
use crate::stats::ExperimentWorker;
use crate::xnat::{self, Connector};

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub summary: RunSummary,
    pub rows: Vec<ReportRow>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<S: Connector, D: Connector> {
    worker: ExperimentWorker<S, D>,
    settings: RunSettings,
}

impl<S: Connector, D: Connector> App<S, D> {
    pub fn new(source: S, destination: D, settings: RunSettings) -> Self {
        let worker = ExperimentWorker::new(source, destination)
            .with_scope(settings.existence_scope)
            .with_size_estimate(settings.size_mode, settings.size_keys.clone());
        Self { worker, settings }
    }

    pub fn run(&self, sink: &dyn ProgressSink) -> Result<RunResult, MigrationError> {
        let started = Instant::now();
        let filter = self
            .settings
            .subject_filter
            .as_deref()
            .map(compile_filter)
            .transpose()?;

        sink.event(ProgressEvent {
            message: "phase=Enumerate; listing source sessions".to_string(),
            elapsed: None,
        });
        let (tasks, investigators) = {
            let source = self.worker.source().connect()?;
            let tasks = enumerate_sessions(&source)?;
            let investigators = xnat::project_investigators(&source).unwrap_or_else(|err| {
                warn!(error = %err, "investigator lookup failed; archive paths use UNKNOWN");
                HashMap::new()
            });
            (tasks, investigators)
        };
        let enumerated = tasks.len();
        let tasks = filter_sessions(tasks, filter.as_ref(), self.settings.limit);
        info!(enumerated, selected = tasks.len(), "sessions enumerated");

        sink.event(ProgressEvent {
            message: format!("phase=Reconcile; {} sessions", tasks.len()),
            elapsed: Some(started.elapsed()),
        });
        let outcomes = Orchestrator::new(self.settings.workers).run(
            tasks,
            |task| self.worker.aggregate(task),
            sink,
        );
        let summary = summarize(&outcomes);

        let mut rows: Vec<ReportRow> = outcomes
            .into_iter()
            .map(|outcome| self.merge(outcome.into_row(), &investigators))
            .collect();
        sort_rows(&mut rows);

        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; {} ok, {} failed, {}",
                summary.successes, summary.failures, summary.total_size
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(RunResult { summary, rows })
    }

    fn merge(
        &self,
        mut row: ReportRow,
        investigators: &HashMap<ProjectId, Investigator>,
    ) -> ReportRow {
        let investigator = investigators
            .get(&ProjectId::new(row.project.clone()))
            .cloned()
            .unwrap_or_default();
        row.set_investigator(&investigator);

        let Some(label) = row.session_label.clone() else {
            return row;
        };
        let status = archive_path_exists(
            &self.settings.archive_dir,
            investigator.archive_name(),
            &label,
        );
        row.archive_exists = Some(status.exists);
        if status.exists {
            if self.settings.verify_archives {
                if let Err(err) = verify_archive(&status.path) {
                    warn!(session = %label, error = %err, "archive failed verification");
                    row.archive_error = Some(err.to_string());
                }
            }
            row.archive_path = Some(status.path.into_string());
        }
        row
    }
}
