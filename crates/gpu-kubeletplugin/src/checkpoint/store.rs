use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::RwLock;

use api_types::PreparedClaims;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;
use tracing::info;

use super::load;
use super::save;
use super::CheckpointError;

pub const CHECKPOINT_FILE_NAME: &str = "checkpoint.json";

/// Checkpoint file in a plugin data directory.
///
/// Reads share the lock, writes and read-modify-write cycles hold it
/// exclusively. Files are replaced atomically, so a crash leaves either the
/// previous or the new document behind.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl CheckpointStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            path: dir.as_ref().join(CHECKPOINT_FILE_NAME),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the existing checkpoint, or persist an empty one when there is none.
    ///
    /// A checkpoint that fails verification is reported, never replaced.
    pub fn get_or_create(&self) -> Result<PreparedClaims, Report<CheckpointError>> {
        let _guard = self
            .lock
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match self.read_file()? {
            Some(claims) => {
                info!(
                    "Loaded checkpoint {} with {} prepared claims",
                    self.path.display(),
                    claims.len()
                );
                Ok(claims)
            }
            None => {
                info!("Creating empty checkpoint {}", self.path.display());
                let claims = PreparedClaims::new();
                self.write_file(&claims)?;
                Ok(claims)
            }
        }
    }

    /// Verified contents of the checkpoint; a missing file is an error
    pub fn read(&self) -> Result<PreparedClaims, Report<CheckpointError>> {
        let _guard = self
            .lock
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        self.read_file()?.ok_or_else(|| {
            Report::new(io::Error::from(io::ErrorKind::NotFound)).change_context(
                CheckpointError::Read {
                    path: self.path.display().to_string(),
                },
            )
        })
    }

    pub fn write(&self, claims: &PreparedClaims) -> Result<(), Report<CheckpointError>> {
        let _guard = self
            .lock
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.write_file(claims)
    }

    /// Apply `f` to the stored claims and persist the result under one
    /// exclusive lock.
    pub fn update<F>(&self, f: F) -> Result<PreparedClaims, Report<CheckpointError>>
    where
        F: FnOnce(&mut PreparedClaims),
    {
        let _guard = self
            .lock
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut claims = self.read_file()?.unwrap_or_default();
        f(&mut claims);
        self.write_file(&claims)?;
        Ok(claims)
    }

    fn read_file(&self) -> Result<Option<PreparedClaims>, Report<CheckpointError>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Report::new(e).change_context(CheckpointError::Read {
                    path: self.path.display().to_string(),
                }))
            }
        };
        load(&bytes)
            .attach_printable_lazy(|| format!("path: {}", self.path.display()))
            .map(Some)
    }

    fn write_file(&self, claims: &PreparedClaims) -> Result<(), Report<CheckpointError>> {
        let bytes = save(claims)?;
        let write_error = || CheckpointError::Write {
            path: self.path.display().to_string(),
        };
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).change_context_lazy(write_error)?;
        }
        utils::fs::write_atomic(&self.path, &bytes).change_context_lazy(write_error)?;
        debug!(
            "Wrote checkpoint {} ({} prepared claims)",
            self.path.display(),
            claims.len()
        );
        Ok(())
    }
}
