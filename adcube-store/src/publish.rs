//! Atomic publication of PREPARE artifacts.
//!
//! Artifacts are written into a hidden staging directory next to their final
//! location and renamed into place only on [`AtomicOutputDir::commit`]. A
//! PREPARE that dies partway leaves at most a staging directory behind,
//! which the next run clears; the output directory itself never holds a
//! partial artifact.

use std::fs;
use std::path::{Path, PathBuf};

use adcube_result::{Error, Result};

const STAGING_DIR_NAME: &str = ".staging";

/// Staged view of one output directory.
pub struct AtomicOutputDir {
    final_dir: PathBuf,
    staging_dir: PathBuf,
    staged: Vec<String>,
    committed: bool,
}

impl AtomicOutputDir {
    /// Create (or reuse) the output directory and a fresh staging area
    /// inside it.
    pub fn open(final_dir: impl Into<PathBuf>) -> Result<Self> {
        let final_dir = final_dir.into();
        fs::create_dir_all(&final_dir)?;
        let staging_dir = final_dir.join(STAGING_DIR_NAME);
        if staging_dir.exists() {
            fs::remove_dir_all(&staging_dir)?;
        }
        fs::create_dir(&staging_dir)?;
        Ok(Self {
            final_dir,
            staging_dir,
            staged: Vec::new(),
            committed: false,
        })
    }

    pub fn final_dir(&self) -> &Path {
        &self.final_dir
    }

    /// Path to write a staged artifact to. The artifact becomes visible
    /// under its bare name only after `commit`.
    pub fn stage(&mut self, file_name: &str) -> PathBuf {
        self.staged.push(file_name.to_string());
        self.staging_dir.join(file_name)
    }

    /// Scratch path inside the staging area that is cleaned up with it and
    /// never published (used for intermediate sort buckets).
    pub fn scratch_dir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.staging_dir.join(name);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Rename every staged artifact into the output directory. Nothing is
    /// renamed until every staged file is verified present.
    pub fn commit(mut self) -> Result<()> {
        for file_name in &self.staged {
            if !self.staging_dir.join(file_name).is_file() {
                return Err(Error::Internal(format!(
                    "staged artifact '{file_name}' was never written"
                )));
            }
        }
        for file_name in &self.staged {
            let from = self.staging_dir.join(file_name);
            fs::rename(&from, self.final_dir.join(file_name))?;
        }
        fs::remove_dir_all(&self.staging_dir)?;
        self.committed = true;
        tracing::info!(
            dir = %self.final_dir.display(),
            artifacts = self.staged.len(),
            "published output directory"
        );
        Ok(())
    }
}

impl Drop for AtomicOutputDir {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_dir_all(&self.staging_dir);
        }
    }
}
