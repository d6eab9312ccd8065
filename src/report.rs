use std::fs;

use camino::Utf8Path;
use serde::Serialize;

use crate::domain::{Investigator, TaskDescriptor};
use crate::error::MigrationError;

// Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub experiment_id: String,
    pub session_label: Option<String>,
    pub project: String,
    pub subject_id: String,
    pub subject_label: String,
    pub investigator_first_name: Option<String>,
    pub investigator_last_name: Option<String>,
    pub exists_on_destination: Option<bool>,
    pub file_count: Option<u64>,
    pub file_size: Option<u64>,
    pub estimated_size: Option<u64>,
    pub archive_exists: Option<bool>,
    pub archive_path: Option<String>,
    pub archive_error: Option<String>,
    pub error: Option<String>,
}

impl ReportRow {
    pub fn for_task(task: &TaskDescriptor) -> Self {
        Self {
            experiment_id: task.experiment_id.to_string(),
            session_label: None,
            project: task.project_id.to_string(),
            subject_id: task.subject_id.to_string(),
            subject_label: task.subject_label.clone(),
            investigator_first_name: None,
            investigator_last_name: None,
            exists_on_destination: None,
            file_count: None,
            file_size: None,
            estimated_size: None,
            archive_exists: None,
            archive_path: None,
            archive_error: None,
            error: None,
        }
    }

    pub fn failed(task: &TaskDescriptor, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::for_task(task)
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn set_investigator(&mut self, investigator: &Investigator) {
        self.investigator_first_name = investigator.first_name.clone();
        self.investigator_last_name = investigator.last_name.clone();
    }

    fn sort_key(&self) -> (&str, &str, &str, &str) {
        (
            &self.project,
            &self.subject_label,
            self.session_label.as_deref().unwrap_or(""),
            &self.experiment_id,
        )
    }
}

pub fn sort_rows(rows: &mut [ReportRow]) {
    rows.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub generated_at: String,
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    pub total_files: u64,
    pub total_bytes: u64,
    pub total_size: String,
}

pub fn format_binary_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{value:.2} {unit}")
}

pub trait ReportWriter {
    fn write(&self, rows: &[ReportRow]) -> Result<(), MigrationError>;
}

pub struct CsvReportWriter<'a> {
    path: &'a Utf8Path,
}

impl<'a> CsvReportWriter<'a> {
    pub fn new(path: &'a Utf8Path) -> Self {
        Self { path }
    }
}

impl ReportWriter for CsvReportWriter<'_> {
    fn write(&self, rows: &[ReportRow]) -> Result<(), MigrationError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| MigrationError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix("xnat-report")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| MigrationError::Filesystem(err.to_string()))?;

        let mut writer = csv::Writer::from_writer(temp.as_file());
        for row in rows {
            writer
                .serialize(row)
                .map_err(|err| MigrationError::ReportWrite(err.to_string()))?;
        }
        writer
            .flush()
            .map_err(|err| MigrationError::ReportWrite(err.to_string()))?;
        drop(writer);

        temp.persist(self.path.as_std_path())
            .map_err(|err| MigrationError::ReportWrite(err.to_string()))?;
        Ok(())
    }
}
