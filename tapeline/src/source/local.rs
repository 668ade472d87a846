//! Local-filesystem source adapter.

use super::{SourceEntry, SourceError, SourceStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

/// Source tree rooted at a local directory.
///
/// Source paths are absolute (`/ccr/a`); they resolve beneath the adapter's
/// base directory, so a scratch tree can stand in for the cluster.
pub struct LocalSource {
    base: PathBuf,
}

impl LocalSource {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.base.join(path.trim_start_matches('/'))
    }
}

fn entry_from_metadata(
    path: String,
    metadata: &std::fs::Metadata,
) -> Result<SourceEntry, SourceError> {
    let mtime = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .map_err(|source| SourceError::Metadata {
            path: path.clone(),
            source,
        })?;
    Ok(SourceEntry {
        size: if metadata.is_dir() { 0 } else { metadata.len() },
        mode: metadata.permissions().mode() & 0o7777,
        mtime,
        is_dir: metadata.is_dir(),
        path,
    })
}

#[async_trait]
impl SourceStore for LocalSource {
    async fn read_dir(&self, path: &str) -> Result<Vec<SourceEntry>, SourceError> {
        let dir = self.resolve(path);
        let logical = path.trim_end_matches('/').to_string();

        let as_read_dir_err = |source| SourceError::ReadDir {
            path: path.to_string(),
            source,
        };

        let mut entries = Vec::new();
        for dirent in std::fs::read_dir(&dir).map_err(as_read_dir_err)? {
            let dirent = dirent.map_err(as_read_dir_err)?;
            let name = dirent.file_name().to_string_lossy().into_owned();
            let full = format!("{}/{}", logical, name);
            let metadata = dirent.metadata().map_err(|source| SourceError::Metadata {
                path: full.clone(),
                source,
            })?;
            entries.push(entry_from_metadata(full, &metadata)?);
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn open(&self, path: &str) -> Result<Box<dyn Read + Send>, SourceError> {
        let file = std::fs::File::open(self.resolve(path)).map_err(|source| SourceError::Open {
            path: path.to_string(),
            source,
        })?;
        Ok(Box::new(file))
    }
}
