use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use tracing::{debug, warn};

use crate::config::SizeMode;
use crate::domain::{ExperimentId, FileRef, SizeKeys};
use crate::error::MigrationError;
use crate::xnat::{self, XnatConnection};

pub fn estimate_size<C: XnatConnection>(
    conn: &C,
    experiment: &ExperimentId,
    mode: SizeMode,
    keys: &SizeKeys,
) -> u64 {
    let files = match collect_files(conn, experiment) {
        Ok(files) => files,
        Err(err) => {
            warn!(%experiment, error = %err, "file traversal failed; size treated as 0");
            return 0;
        }
    };
    debug!(%experiment, files = files.len(), "collected files for size estimate");

    match mode {
        SizeMode::Concurrent { workers } if !files.is_empty() => {
            concurrent_total(conn, &files, workers.max(1), keys)
        }
        _ => files
            .iter()
            .map(|file| file_size(conn, file, keys))
            .fold(0u64, u64::saturating_add),
    }
}

pub fn collect_files<C: XnatConnection>(
    conn: &C,
    experiment: &ExperimentId,
) -> Result<Vec<FileRef>, MigrationError> {
    let mut files = Vec::new();
    for scan in xnat::list_scans(conn, experiment)? {
        for resource in xnat::list_resources(conn, &scan)? {
            files.extend(xnat::list_files(conn, &resource)?);
        }
    }
    Ok(files)
}

fn file_size<C: XnatConnection>(conn: &C, file: &FileRef, keys: &SizeKeys) -> u64 {
    match xnat::file_attributes(conn, file) {
        Ok(attributes) => keys.extract(&attributes),
        Err(err) => {
            debug!(file = %file.name, error = %err, "file attributes unavailable");
            0
        }
    }
}

fn concurrent_total<C: XnatConnection>(
    conn: &C,
    files: &[FileRef],
    workers: usize,
    keys: &SizeKeys,
) -> u64 {
    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<u64>();

    thread::scope(|scope| {
        for _ in 0..workers.min(files.len()) {
            let tx = tx.clone();
            let next = &next;
            scope.spawn(move || {
                loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(file) = files.get(index) else {
                        break;
                    };
                    let size = catch_unwind(AssertUnwindSafe(|| file_size(conn, file, keys)))
                        .unwrap_or_else(|_| {
                            warn!(file = %file.name, "size lookup panicked; counted as 0");
                            0
                        });
                    if tx.send(size).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);
        rx.iter().fold(0u64, u64::saturating_add)
    })
}
