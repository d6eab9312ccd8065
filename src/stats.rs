use tracing::{debug, warn};

use crate::config::{ExistenceScope, SizeMode};
use crate::domain::{ExperimentId, SizeKeys, TaskDescriptor};
use crate::error::MigrationError;
use crate::exists::session_exists;
use crate::report::ReportRow;
use crate::size::estimate_size;
use crate::xnat::{self, Connector, XnatConnection};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStats {
    pub file_count: u64,
    pub file_size: u64,
}

impl FileStats {
    fn add(&mut self, file_count: u64, file_size: u64) {
        self.file_count = self.file_count.saturating_add(file_count);
        self.file_size = self.file_size.saturating_add(file_size);
    }
}

pub fn resource_stats<C: XnatConnection>(
    conn: &C,
    experiment: &ExperimentId,
) -> Result<FileStats, MigrationError> {
    let mut stats = FileStats::default();
    for scan in xnat::list_scans(conn, experiment)? {
        for resource in xnat::list_resources(conn, &scan)? {
            stats.add(resource.file_count, resource.file_size);
        }
    }
    Ok(stats)
}

pub struct ExperimentWorker<S: Connector, D: Connector> {
    source: S,
    destination: D,
    scope: ExistenceScope,
    size_mode: Option<SizeMode>,
    size_keys: SizeKeys,
}

impl<S: Connector, D: Connector> ExperimentWorker<S, D> {
    pub fn new(source: S, destination: D) -> Self {
        Self {
            source,
            destination,
            scope: ExistenceScope::Global,
            size_mode: None,
            size_keys: SizeKeys::default(),
        }
    }

    pub fn with_scope(mut self, scope: ExistenceScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_size_estimate(mut self, mode: Option<SizeMode>, keys: SizeKeys) -> Self {
        self.size_mode = mode;
        self.size_keys = keys;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn aggregate(&self, task: &TaskDescriptor) -> ReportRow {
        match self.try_aggregate(task) {
            Ok(row) => row,
            Err(err) => {
                warn!(experiment = %task.experiment_id, error = %err, "experiment failed");
                ReportRow::failed(task, err.to_string())
            }
        }
    }

    fn try_aggregate(&self, task: &TaskDescriptor) -> Result<ReportRow, MigrationError> {
        let experiment = &task.experiment_id;
        let source = self.source.connect()?;

        let stats = resource_stats(&source, experiment)?;
        let labels = xnat::experiment_labels(&source)?;
        let label = labels
            .get(experiment)
            .cloned()
            .ok_or_else(|| MigrationError::MalformedResponse {
                path: "/data/experiments".to_string(),
                message: format!("no label for experiment {experiment}"),
            })?;
        let estimated_size = self
            .size_mode
            .map(|mode| estimate_size(&source, experiment, mode, &self.size_keys));
        drop(source);

        let destination = self.destination.connect()?;
        let project = match self.scope {
            ExistenceScope::Project => Some(&task.project_id),
            ExistenceScope::Global => None,
        };
        let exists = session_exists(&destination, &label, project)?;
        drop(destination);

        debug!(
            %experiment,
            label = %label,
            files = stats.file_count,
            bytes = stats.file_size,
            exists,
            "experiment aggregated"
        );

        let mut row = ReportRow::for_task(task);
        row.session_label = Some(label);
        row.file_count = Some(stats.file_count);
        row.file_size = Some(stats.file_size);
        row.estimated_size = estimated_size;
        row.exists_on_destination = Some(exists);
        Ok(row)
    }
}
