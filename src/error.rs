use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MigrationError {
    #[error("missing connection profile at {0}")]
    MissingConfig(PathBuf),

    #[error("failed to read connection profile at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse connection profile: {0}")]
    ConfigParse(String),

    #[error("XNAT request failed: {0}")]
    XnatHttp(String),

    #[error("XNAT returned status {status} for {path}: {message}")]
    XnatStatus {
        status: u16,
        path: String,
        message: String,
    },

    #[error("malformed XNAT response for {path}: {message}")]
    MalformedResponse { path: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to write report: {0}")]
    ReportWrite(String),

    #[error("invalid subject filter: {0}")]
    InvalidFilter(String),
}
