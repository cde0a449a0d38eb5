// Frame archiving
//
// Archive references are only ever values handed back by the service; a
// failed archive leaves the record's storage slots empty.

use crate::error::StorageError;
use crate::pipeline::types::FrameRecord;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveRef {
    pub file_id: String,
    pub url: String,
}

pub trait ArchiveService: Send + Sync {
    fn archive(&self, record: &FrameRecord) -> Result<ArchiveRef, StorageError>;
}

/// Copies frames into `<root>/<video stem>/<filename>`.
#[derive(Debug, Clone)]
pub struct LocalArchive {
    root: PathBuf,
}

impl LocalArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArchiveService for LocalArchive {
    fn archive(&self, record: &FrameRecord) -> Result<ArchiveRef, StorageError> {
        if !record.filepath.is_file() {
            return Err(StorageError::NotFound(record.filepath.clone()));
        }
        let folder = record
            .source_video
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unsorted".to_string());
        let dir = self.root.join(&folder);
        fs::create_dir_all(&dir)?;

        let target = dir.join(&record.filename);
        fs::copy(&record.filepath, &target)?;
        let url = fs::canonicalize(&target)
            .map(|p| format!("file://{}", p.display()))
            .unwrap_or_else(|_| format!("file://{}", target.display()));

        Ok(ArchiveRef {
            file_id: format!("{}/{}", folder, record.filename),
            url,
        })
    }
}

/// Archives every analyzed record, filling its storage slots.
/// Returns how many were archived; failures are logged and skipped.
pub fn archive_records(archive: &dyn ArchiveService, records: &mut [FrameRecord]) -> usize {
    let mut archived = 0;
    for record in records.iter_mut().filter(|r| r.is_analyzed()) {
        match archive.archive(record) {
            Ok(reference) => {
                record.archive_file_id = Some(reference.file_id);
                record.archive_url = Some(reference.url);
                archived += 1;
            }
            Err(e) => tracing::warn!("Failed to archive {}: {}", record.filename, e),
        }
    }
    archived
}
