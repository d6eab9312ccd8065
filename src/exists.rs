use tracing::warn;

use crate::domain::{ProjectId, SubjectId};
use crate::error::MigrationError;
use crate::xnat::{self, XnatConnection, row_str};

// Labels compare case-sensitively in both scopes.
pub fn session_exists<C: XnatConnection>(
    conn: &C,
    label: &str,
    project: Option<&ProjectId>,
) -> Result<bool, MigrationError> {
    match project {
        Some(project) => exists_in_project(conn, label, project),
        None => exists_globally(conn, label),
    }
}

fn exists_in_project<C: XnatConnection>(
    conn: &C,
    label: &str,
    project: &ProjectId,
) -> Result<bool, MigrationError> {
    for subject in xnat::list_subjects(conn, project)? {
        let subject_id = SubjectId::new(subject.id);
        match xnat::list_experiments(conn, project, &subject_id) {
            Ok(experiments) => {
                if experiments.iter().any(|experiment| experiment.label == label) {
                    return Ok(true);
                }
            }
            Err(err) => {
                warn!(subject = %subject_id, %project, error = %err, "skipping subject");
            }
        }
    }
    Ok(false)
}

fn exists_globally<C: XnatConnection>(conn: &C, label: &str) -> Result<bool, MigrationError> {
    let rows = xnat::query(conn, "experiments", &["ID", "label"], &[("label", label)])?;
    Ok(rows
        .iter()
        .any(|row| row_str(row, "label").as_deref() == Some(label)))
}
