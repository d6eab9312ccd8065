use std::fs::File;
use std::io::Read;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;

use crate::error::MigrationError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveStatus {
    pub exists: bool,
    pub path: Utf8PathBuf,
}

// {base_dir}/INVESTIGATOR_{investigator}/{session_label}.tar.gz
pub fn archive_path(base_dir: &Utf8Path, investigator: &str, session_label: &str) -> Utf8PathBuf {
    base_dir
        .join(format!("INVESTIGATOR_{investigator}"))
        .join(format!("{session_label}.tar.gz"))
}

pub fn archive_path_exists(
    base_dir: &Utf8Path,
    investigator: &str,
    session_label: &str,
) -> ArchiveStatus {
    let path = archive_path(base_dir, investigator, session_label);
    ArchiveStatus {
        exists: path.as_std_path().is_file(),
        path,
    }
}

pub fn verify_archive(path: &Utf8Path) -> Result<(), MigrationError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| MigrationError::Filesystem(format!("open archive {path}: {err}")))?;
    let mut decoder = GzDecoder::new(file);
    let mut buf = [0u8; 512];
    decoder
        .read(&mut buf)
        .map_err(|err| MigrationError::Filesystem(format!("corrupt archive {path}: {err}")))?;
    if decoder.header().is_none() {
        return Err(MigrationError::Filesystem(format!(
            "corrupt archive {path}: missing gzip header"
        )));
    }
    Ok(())
}
