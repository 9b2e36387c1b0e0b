use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StorageError;
use crate::sanitize;

/// Result of deleting a set of artifacts. Failures don't stop the sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactCleanup {
    pub files_deleted: u64,
    pub errors: Vec<String>,
}

impl ArtifactCleanup {
    pub fn merge(&mut self, other: ArtifactCleanup) {
        self.files_deleted += other.files_deleted;
        self.errors.extend(other.errors);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TempStats {
    pub total_files: u64,
    pub total_size_bytes: u64,
    pub job_count: u64,
}

/// Per-job scratch files: the uploaded original and rendered pages.
pub trait ArtifactStore: Send + Sync {
    fn store_original(
        &self,
        job_id: &str,
        extension: Option<&str>,
        bytes: &[u8],
    ) -> Result<PathBuf, StorageError>;

    /// Stores page `page` (1-based) as PNG.
    fn store_page(&self, job_id: &str, page: u32, png: &[u8]) -> Result<PathBuf, StorageError>;

    /// Rendered pages in page order.
    fn page_paths(&self, job_id: &str) -> Vec<PathBuf>;

    fn original_path(&self, job_id: &str) -> Option<PathBuf>;

    fn remove_job_artifacts(&self, job_id: &str) -> ArtifactCleanup;

    /// Ids of every job that currently owns at least one file.
    fn job_ids(&self) -> BTreeSet<String>;

    /// Most recent modification time across a job's files.
    fn last_modified(&self, job_id: &str) -> Option<DateTime<Utc>>;

    fn stats(&self) -> TempStats;
}

/// [`ArtifactStore`] over a flat temp directory using
/// `{job_id}_original.{ext}` and `{job_id}_page_{n}.png`.
pub struct FsArtifactStore {
    temp_directory: PathBuf,
}

fn validate_job_id(job_id: &str) -> Result<(), StorageError> {
    let valid = !job_id.is_empty()
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(job_id.to_string()))
    }
}

fn validate_extension(ext: &str) -> Result<(), StorageError> {
    if !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(StorageError::InvalidName(ext.to_string()))
    }
}

/// Job id owning an artifact file name, if it follows the naming scheme.
fn owner_of(file_name: &str) -> Option<&str> {
    let (job_id, rest) = file_name.split_once('_')?;
    let known = rest.starts_with("original") || rest.starts_with("page_");
    (known && validate_job_id(job_id).is_ok()).then_some(job_id)
}

fn page_number(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let (_, n) = stem.rsplit_once("_page_")?;
    n.parse().ok()
}

impl FsArtifactStore {
    pub fn new<P: AsRef<Path>>(temp_directory: P) -> Self {
        Self {
            temp_directory: temp_directory.as_ref().to_path_buf(),
        }
    }

    pub fn temp_directory(&self) -> &Path {
        &self.temp_directory
    }

    fn ensure_directory(&self) -> Result<(), StorageError> {
        if !self.temp_directory.exists() {
            std::fs::create_dir_all(&self.temp_directory).map_err(|e| {
                StorageError::CreateDirectory {
                    path: self.temp_directory.clone(),
                    source: e,
                }
            })?;
        }
        Ok(())
    }

    fn write(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        self.ensure_directory()?;
        let path = self.temp_directory.join(file_name);
        std::fs::write(&path, bytes).map_err(|e| StorageError::WriteFile {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }

    /// Files matching `{job_id}_*`.
    fn job_files(&self, job_id: &str) -> Vec<PathBuf> {
        if validate_job_id(job_id).is_err() {
            return Vec::new();
        }
        let pattern = format!(
            "{}/{}_*",
            glob::Pattern::escape(&self.temp_directory.to_string_lossy()),
            job_id
        );
        match glob::glob(&pattern) {
            Ok(paths) => paths.filter_map(Result::ok).filter(|p| p.is_file()).collect(),
            Err(e) => {
                log::warn!("Invalid artifact pattern for job {}: {}", job_id, e);
                Vec::new()
            }
        }
    }

    fn entries(&self) -> Vec<(String, u64)> {
        let Ok(read_dir) = std::fs::read_dir(&self.temp_directory) else {
            return Vec::new();
        };
        read_dir
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let meta = entry.metadata().ok()?;
                if !meta.is_file() {
                    return None;
                }
                let name = entry.file_name().to_str()?.to_string();
                Some((name, meta.len()))
            })
            .collect()
    }
}

impl ArtifactStore for FsArtifactStore {
    fn store_original(
        &self,
        job_id: &str,
        extension: Option<&str>,
        bytes: &[u8],
    ) -> Result<PathBuf, StorageError> {
        validate_job_id(job_id)?;
        let file_name = match extension {
            Some(ext) => {
                validate_extension(ext)?;
                format!("{}_original.{}", job_id, ext)
            }
            None => format!("{}_original", job_id),
        };
        self.write(&file_name, bytes)
    }

    fn store_page(&self, job_id: &str, page: u32, png: &[u8]) -> Result<PathBuf, StorageError> {
        validate_job_id(job_id)?;
        self.write(&format!("{}_page_{}.png", job_id, page), png)
    }

    fn page_paths(&self, job_id: &str) -> Vec<PathBuf> {
        let mut pages: Vec<(u32, PathBuf)> = self
            .job_files(job_id)
            .into_iter()
            .filter_map(|p| page_number(&p).map(|n| (n, p)))
            .collect();
        pages.sort_by_key(|(n, _)| *n);
        pages.into_iter().map(|(_, p)| p).collect()
    }

    fn original_path(&self, job_id: &str) -> Option<PathBuf> {
        self.job_files(job_id).into_iter().find(|p| {
            p.file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.ends_with("_original"))
        })
    }

    fn remove_job_artifacts(&self, job_id: &str) -> ArtifactCleanup {
        let mut cleanup = ArtifactCleanup::default();
        for path in self.job_files(job_id) {
            match std::fs::remove_file(&path) {
                Ok(()) => cleanup.files_deleted += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => cleanup.errors.push(format!(
                    "Failed to delete {}: {}",
                    sanitize::redact_path(&path),
                    e
                )),
            }
        }
        if cleanup.files_deleted > 0 {
            log::debug!(
                "Deleted {} artifact(s) for job {}",
                cleanup.files_deleted,
                job_id
            );
        }
        cleanup
    }

    fn job_ids(&self) -> BTreeSet<String> {
        self.entries()
            .iter()
            .filter_map(|(name, _)| owner_of(name).map(str::to_string))
            .collect()
    }

    fn last_modified(&self, job_id: &str) -> Option<DateTime<Utc>> {
        self.job_files(job_id)
            .iter()
            .filter_map(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok())
            .max()
            .map(DateTime::<Utc>::from)
    }

    fn stats(&self) -> TempStats {
        let entries = self.entries();
        let jobs: BTreeSet<&str> = entries.iter().filter_map(|(n, _)| owner_of(n)).collect();
        TempStats {
            total_files: entries.len() as u64,
            total_size_bytes: entries.iter().map(|(_, len)| len).sum(),
            job_count: jobs.len() as u64,
        }
    }
}
