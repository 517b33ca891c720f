//! JSON roster file.

use rollcall_core::{Identity, Roster};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

const STORE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read roster {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write roster {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid roster file {path}: {source}")]
    Invalid {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("roster file {path} has version {found}, expected 1")]
    UnsupportedVersion { path: PathBuf, found: u32 },
    #[error("failed to serialize roster: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct RosterFile {
    version: u32,
    identities: Vec<Identity>,
}

/// Roster persisted as one JSON document, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct RosterStore {
    path: PathBuf,
}

impl RosterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty roster.
    pub fn load(&self) -> Result<Roster, StoreError> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "no roster file yet");
            return Ok(Roster::new());
        }

        let data = fs::read(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        let file: RosterFile =
            serde_json::from_slice(&data).map_err(|source| StoreError::Invalid {
                path: self.path.clone(),
                source,
            })?;
        if file.version != STORE_VERSION {
            return Err(StoreError::UnsupportedVersion {
                path: self.path.clone(),
                found: file.version,
            });
        }

        tracing::debug!(path = %self.path.display(), identities = file.identities.len(), "roster loaded");
        Ok(Roster::from_identities(file.identities))
    }

    /// Write to a temporary file next to the roster, then rename over it.
    pub fn save(&self, roster: &Roster) -> Result<(), StoreError> {
        let write_err = |source: std::io::Error| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(write_err)?;

        let document = RosterFile {
            version: STORE_VERSION,
            identities: roster.iter().cloned().collect(),
        };
        let serialized = serde_json::to_vec_pretty(&document)?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(write_err)?;
        {
            let file = tmp.as_file_mut();
            let mut writer = BufWriter::new(&mut *file);
            writer.write_all(&serialized).map_err(write_err)?;
            writer.write_all(b"\n").map_err(write_err)?;
            writer.flush().map_err(write_err)?;
        }
        tmp.as_file().sync_all().map_err(write_err)?;

        let file = tmp.persist(&self.path).map_err(|e| write_err(e.error))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(write_err)?;
        }
        #[cfg(not(unix))]
        drop(file);

        tracing::info!(path = %self.path.display(), identities = roster.len(), "roster saved");
        Ok(())
    }
}
