// ABOUTME: Snapshots of live configuration and state taken before a deployment.
// ABOUTME: Tar archives with JSON manifests, restore on rollback, and retention pruning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use super::atomic::write_atomic;

const ARCHIVE_PREFIX: &str = "backup-";
const PARTIAL_SUFFIX: &str = ".tar.partial";

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("backup I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid backup manifest {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    #[error("backup archive missing: {0}")]
    ArchiveMissing(PathBuf),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> BackupError + '_ {
    move |source| BackupError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One snapshot. `source_paths[i]` is stored under the archive directory `i/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub source_paths: Vec<PathBuf>,
    pub archive_location: PathBuf,
}

/// Owns the backup directory.
#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
}

impl BackupManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Archive the existing `paths`. Paths that do not exist are skipped.
    /// Only the backup directory is written.
    pub fn snapshot(&self, paths: &[PathBuf]) -> Result<BackupEntry, BackupError> {
        std::fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        self.discard_partials()?;

        let created_at = Utc::now();
        let id = self.unique_id(created_at);
        let archive = self.dir.join(format!("{}{}.tar", ARCHIVE_PREFIX, id));
        let partial = self.dir.join(format!("{}{}{}", ARCHIVE_PREFIX, id, PARTIAL_SUFFIX));

        let file = File::create(&partial).map_err(io_err(&partial))?;
        let mut builder = tar::Builder::new(file);
        builder.follow_symlinks(false);

        let mut source_paths = Vec::new();
        for path in paths {
            let meta = match std::fs::symlink_metadata(path) {
                Ok(m) => m,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!(path = %path.display(), "backup path does not exist, skipping");
                    continue;
                }
                Err(e) => return Err(BackupError::Io { path: path.clone(), source: e }),
            };

            let name = source_paths.len().to_string();
            if meta.is_dir() {
                builder.append_dir_all(&name, path).map_err(io_err(path))?;
            } else {
                builder
                    .append_path_with_name(path, &name)
                    .map_err(io_err(path))?;
            }
            source_paths.push(path.clone());
        }

        let file = builder.into_inner().map_err(io_err(&partial))?;
        file.sync_all().map_err(io_err(&partial))?;
        drop(file);
        std::fs::rename(&partial, &archive).map_err(io_err(&archive))?;

        let entry = BackupEntry {
            id,
            created_at,
            source_paths,
            archive_location: archive,
        };
        let manifest = self.manifest_path(&entry.id);
        let json = serde_json::to_vec_pretty(&entry).map_err(|e| BackupError::Manifest {
            path: manifest.clone(),
            message: e.to_string(),
        })?;
        write_atomic(&manifest, &json).map_err(io_err(&manifest))?;

        tracing::info!(
            archive = %entry.archive_location.display(),
            paths = entry.source_paths.len(),
            "backup snapshot written"
        );
        Ok(entry)
    }

    /// Complete entries, newest first.
    pub fn list(&self) -> Result<Vec<BackupEntry>, BackupError> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackupError::Io { path: self.dir.clone(), source: e }),
        };

        let mut entries = Vec::new();
        for dirent in read_dir {
            let path = dirent.map_err(io_err(&self.dir))?.path();
            let is_manifest = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(ARCHIVE_PREFIX) && n.ends_with(".json"));
            if !is_manifest {
                continue;
            }
            let content = std::fs::read_to_string(&path).map_err(io_err(&path))?;
            let entry: BackupEntry = match serde_json::from_str(&content) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(manifest = %path.display(), "skipping unreadable backup manifest: {}", e);
                    continue;
                }
            };
            if entry.archive_location.exists() {
                entries.push(entry);
            }
        }

        entries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(entries)
    }

    /// Delete all but the newest `max(retain, 1)` entries. Returns what was removed.
    pub fn prune(&self, retain: usize) -> Result<Vec<BackupEntry>, BackupError> {
        let keep = retain.max(1);
        let removed: Vec<BackupEntry> = self.list()?.into_iter().skip(keep).collect();
        for entry in &removed {
            remove_if_exists(&entry.archive_location)?;
            remove_if_exists(&self.manifest_path(&entry.id))?;
            tracing::debug!(id = %entry.id, "pruned backup");
        }
        Ok(removed)
    }

    /// Write the archived files back to their original locations.
    pub fn restore(&self, entry: &BackupEntry) -> Result<(), BackupError> {
        let archive_path = &entry.archive_location;
        if !archive_path.exists() {
            return Err(BackupError::ArchiveMissing(archive_path.clone()));
        }

        let file = File::open(archive_path).map_err(io_err(archive_path))?;
        let mut archive = tar::Archive::new(file);
        for item in archive.entries().map_err(io_err(archive_path))? {
            let mut item = item.map_err(io_err(archive_path))?;
            let stored = item.path().map_err(io_err(archive_path))?.into_owned();
            let target = self.target_for(entry, &stored)?;

            match item.header().entry_type() {
                tar::EntryType::Directory => {
                    std::fs::create_dir_all(&target).map_err(io_err(&target))?;
                }
                tar::EntryType::Regular => {
                    let mut contents = Vec::new();
                    item.read_to_end(&mut contents).map_err(io_err(&target))?;
                    write_atomic(&target, &contents).map_err(io_err(&target))?;
                }
                other => {
                    tracing::warn!(path = %target.display(), "skipping unsupported entry type {:?}", other);
                }
            }
        }

        tracing::info!(id = %entry.id, "backup restored");
        Ok(())
    }

    /// Map an archive path `i/rest` to `source_paths[i]/rest`.
    fn target_for(&self, entry: &BackupEntry, stored: &Path) -> Result<PathBuf, BackupError> {
        let invalid = |message: &str| BackupError::Manifest {
            path: entry.archive_location.clone(),
            message: format!("{}: {}", message, stored.display()),
        };

        let mut components = stored.components();
        let index: usize = match components.next() {
            Some(Component::Normal(first)) => first
                .to_str()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| invalid("unexpected archive entry"))?,
            _ => return Err(invalid("unexpected archive entry")),
        };
        let base = entry
            .source_paths
            .get(index)
            .ok_or_else(|| invalid("archive entry has no source path"))?;

        let mut target = base.clone();
        for component in components {
            match component {
                Component::Normal(part) => target.push(part),
                Component::CurDir => {}
                _ => return Err(invalid("archive entry escapes its source path")),
            }
        }
        Ok(target)
    }

    fn manifest_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}{}.json", ARCHIVE_PREFIX, id))
    }

    fn unique_id(&self, now: DateTime<Utc>) -> String {
        let base = now.format("%Y%m%d-%H%M%S-%3f").to_string();
        let mut id = base.clone();
        let mut n = 1;
        while self.manifest_path(&id).exists()
            || self.dir.join(format!("{}{}.tar", ARCHIVE_PREFIX, id)).exists()
        {
            id = format!("{}-{}", base, n);
            n += 1;
        }
        id
    }

    fn discard_partials(&self) -> Result<(), BackupError> {
        for dirent in std::fs::read_dir(&self.dir).map_err(io_err(&self.dir))? {
            let path = dirent.map_err(io_err(&self.dir))?.path();
            let is_partial = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(PARTIAL_SUFFIX));
            if is_partial {
                tracing::debug!(path = %path.display(), "discarding partial backup");
                remove_if_exists(&path)?;
            }
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<(), BackupError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BackupError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
