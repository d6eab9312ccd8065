use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::{ConnectionProfile, HttpSettings};
use crate::domain::{
    Attributes, ExperimentId, FileRef, Investigator, ProjectId, ResourceRef, ScanRef, SubjectId,
    value_as_u64,
};
use crate::error::MigrationError;

pub type Row = Map<String, Value>;

// Listing endpoints answer with {"ResultSet": {"Result": [...]}}.
pub trait XnatConnection: Send + Sync {
    fn result_set(&self, path: &str, params: &[(&str, &str)])
    -> Result<Vec<Row>, MigrationError>;
}

pub trait Connector: Send + Sync {
    type Connection: XnatConnection;

    fn connect(&self) -> Result<Self::Connection, MigrationError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    pub label: String,
}

pub fn parse_result_set(path: &str, body: Value) -> Result<Vec<Row>, MigrationError> {
    let malformed = |message: &str| MigrationError::MalformedResponse {
        path: path.to_string(),
        message: message.to_string(),
    };
    let Value::Object(mut root) = body else {
        return Err(malformed("body is not a JSON object"));
    };
    let Some(Value::Object(mut result_set)) = root.remove("ResultSet") else {
        return Err(malformed("missing ResultSet"));
    };
    let Some(Value::Array(results)) = result_set.remove("Result") else {
        return Err(malformed("missing ResultSet.Result"));
    };
    results
        .into_iter()
        .map(|value| match value {
            Value::Object(row) => Ok(row),
            _ => Err(malformed("ResultSet.Result entry is not an object")),
        })
        .collect()
}

pub fn row_str(row: &Row, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn required(row: &Row, key: &str, path: &str) -> Result<String, MigrationError> {
    row_str(row, key).ok_or_else(|| MigrationError::MalformedResponse {
        path: path.to_string(),
        message: format!("row without {key}"),
    })
}

pub fn query(
    conn: &impl XnatConnection,
    record: &str,
    columns: &[&str],
    filters: &[(&str, &str)],
) -> Result<Vec<Row>, MigrationError> {
    let path = format!("/data/{record}");
    let columns = columns.join(",");
    let mut params = vec![("columns", columns.as_str())];
    params.extend_from_slice(filters);
    conn.result_set(&path, &params)
}

pub fn list_subjects(
    conn: &impl XnatConnection,
    project: &ProjectId,
) -> Result<Vec<Node>, MigrationError> {
    let path = format!("/data/projects/{project}/subjects");
    nodes(conn, &path)
}

pub fn list_experiments(
    conn: &impl XnatConnection,
    project: &ProjectId,
    subject: &SubjectId,
) -> Result<Vec<Node>, MigrationError> {
    let path = format!("/data/projects/{project}/subjects/{subject}/experiments");
    nodes(conn, &path)
}

fn nodes(conn: &impl XnatConnection, path: &str) -> Result<Vec<Node>, MigrationError> {
    conn.result_set(path, &[])?
        .iter()
        .map(|row| {
            let id = required(row, "ID", path)?;
            let label = row_str(row, "label").unwrap_or_else(|| id.clone());
            Ok(Node { id, label })
        })
        .collect()
}

pub fn list_scans(
    conn: &impl XnatConnection,
    experiment: &ExperimentId,
) -> Result<Vec<ScanRef>, MigrationError> {
    let path = format!("/data/experiments/{experiment}/scans");
    conn.result_set(&path, &[])?
        .iter()
        .map(|row| {
            Ok(ScanRef {
                experiment_id: experiment.clone(),
                scan_id: required(row, "ID", &path)?,
            })
        })
        .collect()
}

pub fn list_resources(
    conn: &impl XnatConnection,
    scan: &ScanRef,
) -> Result<Vec<ResourceRef>, MigrationError> {
    let path = format!(
        "/data/experiments/{}/scans/{}/resources",
        scan.experiment_id, scan.scan_id
    );
    conn.result_set(&path, &[])?
        .iter()
        .map(|row| {
            let label = row_str(row, "label");
            let resource_id = row_str(row, "xnat_abstractresource_id")
                .or_else(|| label.clone())
                .ok_or_else(|| MigrationError::MalformedResponse {
                    path: path.clone(),
                    message: "resource without id or label".to_string(),
                })?;
            Ok(ResourceRef {
                scan: scan.clone(),
                resource_id,
                label,
                file_count: row.get("file_count").map(value_as_u64).unwrap_or(0),
                file_size: row.get("file_size").map(value_as_u64).unwrap_or(0),
            })
        })
        .collect()
}

fn files_path(resource: &ResourceRef) -> String {
    format!(
        "/data/experiments/{}/scans/{}/resources/{}/files",
        resource.scan.experiment_id,
        resource.scan.scan_id,
        resource.path_segment()
    )
}

pub fn list_files(
    conn: &impl XnatConnection,
    resource: &ResourceRef,
) -> Result<Vec<FileRef>, MigrationError> {
    let path = files_path(resource);
    conn.result_set(&path, &[])?
        .iter()
        .map(|row| {
            Ok(FileRef {
                resource: resource.clone(),
                name: required(row, "Name", &path)?,
            })
        })
        .collect()
}

pub fn file_attributes(
    conn: &impl XnatConnection,
    file: &FileRef,
) -> Result<Attributes, MigrationError> {
    let path = files_path(&file.resource);
    conn.result_set(&path, &[])?
        .into_iter()
        .find(|row| row_str(row, "Name").as_deref() == Some(file.name.as_str()))
        .ok_or_else(|| MigrationError::MalformedResponse {
            path,
            message: format!("file {} not listed", file.name),
        })
}

pub fn experiment_labels(
    conn: &impl XnatConnection,
) -> Result<HashMap<ExperimentId, String>, MigrationError> {
    let rows = query(conn, "experiments", &["ID", "label"], &[])?;
    Ok(rows
        .iter()
        .filter_map(|row| {
            let id = row_str(row, "ID")?;
            let label = row_str(row, "label")?;
            Some((ExperimentId::new(id), label))
        })
        .collect())
}

pub fn project_investigators(
    conn: &impl XnatConnection,
) -> Result<HashMap<ProjectId, Investigator>, MigrationError> {
    let rows = query(conn, "projects", &["ID", "pi_firstname", "pi_lastname"], &[])?;
    Ok(rows
        .iter()
        .filter_map(|row| {
            let id = row_str(row, "ID")?;
            let investigator = Investigator {
                first_name: row_str(row, "pi_firstname"),
                last_name: row_str(row, "pi_lastname"),
            };
            Some((ProjectId::new(id), investigator))
        })
        .collect())
}

#[derive(Debug, Clone)]
pub struct HttpConnector {
    profile: ConnectionProfile,
    settings: HttpSettings,
}

impl HttpConnector {
    pub fn new(profile: ConnectionProfile, settings: HttpSettings) -> Self {
        Self { profile, settings }
    }
}

impl Connector for HttpConnector {
    type Connection = XnatHttpConnection;

    fn connect(&self) -> Result<Self::Connection, MigrationError> {
        XnatHttpConnection::open(&self.profile, &self.settings)
    }
}

pub struct XnatHttpConnection {
    client: Client,
    base_url: String,
    session_id: Option<String>,
    max_retries: usize,
}

impl XnatHttpConnection {
    pub fn open(
        profile: &ConnectionProfile,
        settings: &HttpSettings,
    ) -> Result<Self, MigrationError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!(
                "xnat-migration-report/{}",
                env!("CARGO_PKG_VERSION")
            ))
            .map_err(|err| MigrationError::XnatHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| MigrationError::XnatHttp(err.to_string()))?;

        let mut connection = Self {
            client,
            base_url: profile.base_url().to_string(),
            session_id: None,
            max_retries: settings.max_retries,
        };

        let url = connection.url("/data/JSESSION");
        let response = connection.send_with_retries(|| {
            connection
                .client
                .post(&url)
                .basic_auth(&profile.user, Some(&profile.password))
        })?;
        let response = Self::handle_status(response, "/data/JSESSION")?;
        let session_id = response
            .text()
            .map_err(|err| MigrationError::XnatHttp(err.to_string()))?
            .trim()
            .to_string();
        if session_id.is_empty() {
            return Err(MigrationError::MalformedResponse {
                path: "/data/JSESSION".to_string(),
                message: "empty session id".to_string(),
            });
        }
        debug!(server = %connection.base_url, "opened XNAT session");
        connection.session_id = Some(session_id);
        Ok(connection)
    }

    pub fn close(&mut self) -> Result<(), MigrationError> {
        let Some(session_id) = self.session_id.take() else {
            return Ok(());
        };
        let url = self.url("/data/JSESSION");
        let response = self
            .client
            .delete(&url)
            .header(COOKIE, format!("JSESSIONID={session_id}"))
            .send()
            .map_err(|err| MigrationError::XnatHttp(err.to_string()))?;
        Self::handle_status(response, "/data/JSESSION")?;
        debug!(server = %self.base_url, "closed XNAT session");
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn handle_status(
        response: reqwest::blocking::Response,
        path: &str,
    ) -> Result<reqwest::blocking::Response, MigrationError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "XNAT request failed".to_string());
        Err(MigrationError::XnatStatus {
            status,
            path: path.to_string(),
            message,
        })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, MigrationError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < self.max_retries && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < self.max_retries && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(MigrationError::XnatHttp(err.to_string()));
                }
            }
        }
    }
}

impl XnatConnection for XnatHttpConnection {
    fn result_set(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<Row>, MigrationError> {
        let url = self.url(path);
        debug!(%url, ?params, "XNAT request");
        let response = self.send_with_retries(|| {
            let mut request = self.client.get(&url).query(&[("format", "json")]).query(params);
            if let Some(session_id) = &self.session_id {
                request = request.header(COOKIE, format!("JSESSIONID={session_id}"));
            }
            request
        })?;
        let response = Self::handle_status(response, path)?;
        let body: Value = response
            .json()
            .map_err(|err| MigrationError::MalformedResponse {
                path: path.to_string(),
                message: err.to_string(),
            })?;
        parse_result_set(path, body)
    }
}

impl Drop for XnatHttpConnection {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(server = %self.base_url, error = %err, "failed to close XNAT session");
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
