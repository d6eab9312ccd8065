use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::SizeKeys;
use crate::error::MigrationError;

pub const DEFAULT_SOURCE_PROFILE: &str = "xnat.cfg";
pub const DEFAULT_DEST_PROFILE: &str = "xnat2.cfg";
pub const DEFAULT_ARCHIVE_DIR: &str = "/cnc/DATA/INVESTIGATORS";
pub const DEFAULT_WORKERS: usize = 16;
pub const DEFAULT_SIZE_WORKERS: usize = 8;

// pyxnat layout: {"server": "https://xnat.example.org", "user": "...", "password": "..."}
#[derive(Clone, Deserialize, Serialize)]
pub struct ConnectionProfile {
    pub server: String,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("server", &self.server)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

impl ConnectionProfile {
    pub fn base_url(&self) -> &str {
        self.server.trim_end_matches('/')
    }
}

pub struct ProfileLoader;

impl ProfileLoader {
    pub fn resolve(
        path: Option<&str>,
        default_name: &str,
    ) -> Result<ConnectionProfile, MigrationError> {
        let profile_path = match path {
            Some(path) => PathBuf::from(path),
            None => Self::home_profile(default_name)?,
        };

        if !profile_path.exists() {
            return Err(MigrationError::MissingConfig(profile_path));
        }

        let content = fs::read_to_string(&profile_path)
            .map_err(|_| MigrationError::ConfigRead(profile_path.clone()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<ConnectionProfile, MigrationError> {
        let profile: ConnectionProfile = serde_json::from_str(content)
            .map_err(|err| MigrationError::ConfigParse(err.to_string()))?;
        if profile.server.trim().is_empty() {
            return Err(MigrationError::ConfigParse(
                "server must not be empty".to_string(),
            ));
        }
        Ok(profile)
    }

    fn home_profile(name: &str) -> Result<PathBuf, MigrationError> {
        BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(name))
            .ok_or_else(|| {
                MigrationError::Filesystem("unable to resolve home directory".to_string())
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeMode {
    Sequential,
    Concurrent { workers: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistenceScope {
    Global,
    Project,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub max_retries: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_retries: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub workers: usize,
    pub archive_dir: Utf8PathBuf,
    pub size_mode: Option<SizeMode>,
    pub size_keys: SizeKeys,
    pub existence_scope: ExistenceScope,
    pub verify_archives: bool,
    pub subject_filter: Option<String>,
    pub limit: Option<usize>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            archive_dir: Utf8PathBuf::from(DEFAULT_ARCHIVE_DIR),
            size_mode: None,
            size_keys: SizeKeys::default(),
            existence_scope: ExistenceScope::Global,
            verify_archives: false,
            subject_filter: None,
            limit: None,
        }
    }
}
