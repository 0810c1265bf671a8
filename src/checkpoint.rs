/// Durable offset checkpoints, one record per tailed resource.
///
/// A record is the consumed offset written as a decimal integer. Writes go to
/// a sibling temp file that is fsynced and renamed over the record, so a
/// crash leaves either the old or the new value, never a torn one.

use crate::crc32;
use crate::error::CheckpointError;

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Key-value store for consumed offsets, keyed by resource locator.
pub trait CheckpointStore: Send + Sync {
    /// Last persisted offset, or `None` if the resource was never checkpointed.
    fn load(&self, locator: &str) -> Result<Option<u64>, CheckpointError>;

    /// Replace the persisted offset.
    fn save(&self, locator: &str, offset: u64) -> Result<(), CheckpointError>;
}

// ── File-backed store ───────────────────────────────────────────────

/// One small file per resource under `dir`, unless a locator has an
/// explicit path.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    overrides: HashMap<String, PathBuf>,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            overrides: HashMap::new(),
        }
    }

    /// Pin `locator` to an explicit checkpoint file.
    pub fn set_path(&mut self, locator: &str, path: PathBuf) {
        self.overrides.insert(locator.to_string(), path);
    }

    /// Where the record for `locator` lives.
    pub fn path_for(&self, locator: &str) -> PathBuf {
        match self.overrides.get(locator) {
            Some(path) => path.clone(),
            None => self.dir.join(default_file_name(locator)),
        }
    }

    /// Fail early if the record for `locator` could never be written.
    pub fn validate(&self, locator: &str) -> Result<PathBuf, CheckpointError> {
        let path = self.path_for(locator);
        if path.is_dir() {
            return Err(CheckpointError::IsDirectory(path));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| CheckpointError::Unwritable {
                path: path.clone(),
                source,
            })?;
        }
        Ok(path)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, locator: &str) -> Result<Option<u64>, CheckpointError> {
        let path = self.path_for(locator);
        read_offset(&path)
    }

    fn save(&self, locator: &str, offset: u64) -> Result<(), CheckpointError> {
        let path = self.path_for(locator);
        write_offset(&path, offset).map_err(|source| CheckpointError::Unwritable { path, source })
    }
}

/// Deterministic file name for `locator`: the sanitized last path segment
/// plus a CRC tag of the full locator, so `a/x.log` and `b/x.log` differ.
pub fn default_file_name(locator: &str) -> String {
    let without_query = locator.split(['?', '#']).next().unwrap_or(locator);
    let segment = without_query.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    let mut stem: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    if stem.is_empty() || stem.chars().all(|c| c == '.') {
        stem = "resource".into();
    }
    format!("{stem}-{}.offset", crc32::locator_tag(locator))
}

fn read_offset(path: &Path) -> Result<Option<u64>, CheckpointError> {
    if path.is_dir() {
        return Err(CheckpointError::IsDirectory(path.to_path_buf()));
    }
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CheckpointError::Unreadable {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| CheckpointError::Corrupt {
            path: path.to_path_buf(),
            contents: trimmed.to_string(),
        })
}

fn write_offset(path: &Path, offset: u64) -> std::io::Result<()> {
    if path.is_dir() {
        return Err(std::io::Error::other("checkpoint path is a directory"));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    {
        let mut file = fs::File::create(&tmp_path)?;
        writeln!(file, "{offset}")?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    sync_parent(path)
}

/// Make the rename itself durable.
#[cfg(unix)]
fn sync_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::File::open(parent)?.sync_all(),
        _ => fs::File::open(".")?.sync_all(),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

// ── In-memory store ─────────────────────────────────────────────────

#[cfg(test)]
pub use memory::MemoryCheckpointStore;
