#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};

use xnat_migration_report::error::MigrationError;
use xnat_migration_report::xnat::{Connector, Row, XnatConnection};

pub struct FakeResource {
    label: String,
    meta: Row,
    files: Vec<Row>,
}

pub struct FakeScan {
    id: String,
    resources: Vec<FakeResource>,
}

struct FakeExperiment {
    id: String,
    label: String,
    scans: Vec<FakeScan>,
}

struct FakeSubject {
    id: String,
    label: String,
    experiments: Vec<FakeExperiment>,
}

struct FakeProject {
    id: String,
    pi_lastname: Option<String>,
    subjects: Vec<FakeSubject>,
}

pub fn resource(label: &str, file_count: u64, file_size: u64, files: Vec<Row>) -> FakeResource {
    resource_with_meta(
        label,
        json!({"file_count": file_count.to_string(), "file_size": file_size.to_string()}),
        files,
    )
}

pub fn resource_with_meta(label: &str, meta: Value, files: Vec<Row>) -> FakeResource {
    let mut meta = meta.as_object().cloned().unwrap_or_default();
    meta.insert("label".to_string(), json!(label));
    FakeResource {
        label: label.to_string(),
        meta,
        files,
    }
}

pub fn file(name: &str, attributes: Value) -> Row {
    let mut row = attributes.as_object().cloned().unwrap_or_default();
    row.insert("Name".to_string(), json!(name));
    row
}

pub fn scan(id: &str, resources: Vec<FakeResource>) -> FakeScan {
    FakeScan {
        id: id.to_string(),
        resources,
    }
}

/// In-memory XNAT answering the REST paths the crate uses. Label filters on
/// `/data/experiments` match case-insensitively, like the real server.
#[derive(Default)]
pub struct FakeXnat {
    projects: Vec<FakeProject>,
    failing: HashSet<String>,
    panicking: HashMap<String, usize>,
    calls: Mutex<HashMap<String, usize>>,
    requests: AtomicUsize,
}

impl FakeXnat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, id: &str, pi_lastname: Option<&str>) -> Self {
        self.projects.push(FakeProject {
            id: id.to_string(),
            pi_lastname: pi_lastname.map(str::to_string),
            subjects: Vec::new(),
        });
        self
    }

    pub fn with_subject(mut self, project: &str, subject_id: &str, subject_label: &str) -> Self {
        self.subject_mut(project, subject_id, subject_label);
        self
    }

    pub fn with_session(
        mut self,
        project: &str,
        subject_id: &str,
        subject_label: &str,
        experiment_id: &str,
        label: &str,
        scans: Vec<FakeScan>,
    ) -> Self {
        self.subject_mut(project, subject_id, subject_label)
            .experiments
            .push(FakeExperiment {
                id: experiment_id.to_string(),
                label: label.to_string(),
                scans,
            });
        self
    }

    pub fn failing(mut self, path: &str) -> Self {
        self.failing.insert(path.to_string());
        self
    }

    pub fn panicking(self, path: &str) -> Self {
        self.panicking_after(path, 0)
    }

    /// Panics on every request to `path` after the first `allowed` ones.
    pub fn panicking_after(mut self, path: &str, allowed: usize) -> Self {
        self.panicking.insert(path.to_string(), allowed);
        self
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    fn subject_mut(&mut self, project: &str, subject_id: &str, label: &str) -> &mut FakeSubject {
        if !self.projects.iter().any(|p| p.id == project) {
            self.projects.push(FakeProject {
                id: project.to_string(),
                pi_lastname: None,
                subjects: Vec::new(),
            });
        }
        let project = self
            .projects
            .iter_mut()
            .find(|p| p.id == project)
            .unwrap();
        if !project.subjects.iter().any(|s| s.id == subject_id) {
            project.subjects.push(FakeSubject {
                id: subject_id.to_string(),
                label: label.to_string(),
                experiments: Vec::new(),
            });
        }
        project
            .subjects
            .iter_mut()
            .find(|s| s.id == subject_id)
            .unwrap()
    }

    fn experiments(&self) -> impl Iterator<Item = (&FakeProject, &FakeSubject, &FakeExperiment)> {
        self.projects.iter().flat_map(|project| {
            project.subjects.iter().flat_map(move |subject| {
                subject
                    .experiments
                    .iter()
                    .map(move |experiment| (project, subject, experiment))
            })
        })
    }

    fn experiment(&self, id: &str) -> Option<&FakeExperiment> {
        self.experiments()
            .map(|(_, _, experiment)| experiment)
            .find(|experiment| experiment.id == id)
    }

    fn answer(&self, path: &str, params: &[(&str, &str)]) -> Option<Vec<Row>> {
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        let rows = match segments.as_slice() {
            ["data", "experiments"] => {
                let label_filter = params
                    .iter()
                    .find(|(key, _)| *key == "label")
                    .map(|(_, value)| *value);
                self.experiments()
                    .filter(|(_, _, e)| {
                        label_filter.is_none_or(|label| e.label.eq_ignore_ascii_case(label))
                    })
                    .map(|(p, s, e)| {
                        object(json!({
                            "project": p.id,
                            "subject_ID": s.id,
                            "subject_label": s.label,
                            "ID": e.id,
                            "label": e.label,
                        }))
                    })
                    .collect()
            }
            ["data", "projects"] => self
                .projects
                .iter()
                .map(|p| object(json!({"ID": p.id, "pi_firstname": "", "pi_lastname": p.pi_lastname})))
                .collect(),
            ["data", "projects", project, "subjects"] => self
                .projects
                .iter()
                .find(|p| p.id == *project)?
                .subjects
                .iter()
                .map(|s| object(json!({"ID": s.id, "label": s.label})))
                .collect(),
            ["data", "projects", project, "subjects", subject, "experiments"] => self
                .projects
                .iter()
                .find(|p| p.id == *project)?
                .subjects
                .iter()
                .find(|s| s.id == *subject)?
                .experiments
                .iter()
                .map(|e| object(json!({"ID": e.id, "label": e.label})))
                .collect(),
            ["data", "experiments", experiment, "scans"] => self
                .experiment(experiment)?
                .scans
                .iter()
                .map(|scan| object(json!({"ID": scan.id})))
                .collect(),
            ["data", "experiments", experiment, "scans", scan, "resources"] => self
                .experiment(experiment)?
                .scans
                .iter()
                .find(|s| s.id == *scan)?
                .resources
                .iter()
                .map(|r| r.meta.clone())
                .collect(),
            ["data", "experiments", experiment, "scans", scan, "resources", resource, "files"] => {
                self.experiment(experiment)?
                    .scans
                    .iter()
                    .find(|s| s.id == *scan)?
                    .resources
                    .iter()
                    .find(|r| r.label == *resource)?
                    .files
                    .clone()
            }
            _ => return None,
        };
        Some(rows)
    }
}

fn object(value: Value) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

impl XnatConnection for FakeXnat {
    fn result_set(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<Row>, MigrationError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if let Some(allowed) = self.panicking.get(path) {
            let seen = {
                let mut calls = self.calls.lock().unwrap();
                let count = calls.entry(path.to_string()).or_insert(0);
                *count += 1;
                *count
            };
            if seen > *allowed {
                panic!("simulated client fault at {path}");
            }
        }
        if self.failing.contains(path) {
            return Err(MigrationError::XnatStatus {
                status: 403,
                path: path.to_string(),
                message: "Forbidden".to_string(),
            });
        }
        self.answer(path, params)
            .ok_or_else(|| MigrationError::XnatStatus {
                status: 404,
                path: path.to_string(),
                message: "Not Found".to_string(),
            })
    }
}

#[derive(Clone)]
pub struct FakeConnector {
    archive: Arc<FakeXnat>,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new(archive: FakeXnat) -> Self {
        Self {
            archive: Arc::new(archive),
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct FakeConnection {
    archive: Arc<FakeXnat>,
    closed: Arc<AtomicUsize>,
}

impl XnatConnection for FakeConnection {
    fn result_set(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<Row>, MigrationError> {
        self.archive.result_set(path, params)
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl Connector for FakeConnector {
    type Connection = FakeConnection;

    fn connect(&self) -> Result<Self::Connection, MigrationError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection {
            archive: self.archive.clone(),
            closed: self.closed.clone(),
        })
    }
}

/// Source with two sessions in project `qa`, used across tests.
pub fn qa_source() -> FakeXnat {
    FakeXnat::new()
        .with_project("qa", Some("Smith"))
        .with_session(
            "qa",
            "BU_CNC_S00008",
            "240715_QA",
            "BU_CNC_E00010",
            "240715_QA",
            vec![
                scan(
                    "1",
                    vec![resource(
                        "DICOM",
                        3,
                        1000,
                        vec![
                            file("a.dcm", json!({"Size": "400"})),
                            file("b.dcm", json!({"Size": 300})),
                            file("c.dcm", json!({"size": "300"})),
                        ],
                    )],
                ),
                scan(
                    "2",
                    vec![resource(
                        "DICOM",
                        5,
                        2000,
                        (0..5)
                            .map(|i| file(&format!("d{i}.dcm"), json!({"Size": "400"})))
                            .collect(),
                    )],
                ),
            ],
        )
        .with_session(
            "qa",
            "BU_CNC_S00009",
            "251007_QA",
            "BU_CNC_E00011",
            "251007_QA",
            vec![scan("1", vec![resource("DICOM", 1, 10, Vec::new())])],
        )
}
