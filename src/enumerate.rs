use regex::Regex;

use crate::domain::{ExperimentId, ProjectId, SubjectId, TaskDescriptor};
use crate::error::MigrationError;
use crate::xnat::{self, XnatConnection, row_str};

const SESSION_COLUMNS: [&str; 4] = ["project", "subject_ID", "subject_label", "ID"];

pub fn enumerate_sessions<C: XnatConnection>(
    conn: &C,
) -> Result<Vec<TaskDescriptor>, MigrationError> {
    let rows = xnat::query(conn, "experiments", &SESSION_COLUMNS, &[])?;
    rows.iter()
        .map(|row| {
            let experiment_id =
                row_str(row, "ID").ok_or_else(|| MigrationError::MalformedResponse {
                    path: "/data/experiments".to_string(),
                    message: "session row without ID".to_string(),
                })?;
            Ok(TaskDescriptor {
                experiment_id: ExperimentId::new(experiment_id),
                project_id: ProjectId::new(row_str(row, "project").unwrap_or_default()),
                subject_id: SubjectId::new(row_str(row, "subject_ID").unwrap_or_default()),
                subject_label: row_str(row, "subject_label").unwrap_or_default(),
            })
        })
        .collect()
}

pub fn compile_filter(pattern: &str) -> Result<Regex, MigrationError> {
    Regex::new(pattern).map_err(|err| MigrationError::InvalidFilter(err.to_string()))
}

pub fn filter_sessions(
    tasks: Vec<TaskDescriptor>,
    filter: Option<&Regex>,
    limit: Option<usize>,
) -> Vec<TaskDescriptor> {
    let kept = tasks
        .into_iter()
        .filter(|task| filter.is_none_or(|regex| regex.is_match(&task.subject_label)));
    match limit {
        Some(limit) => kept.take(limit).collect(),
        None => kept.collect(),
    }
}
