//! Transient local staging area between download and transformation.

use crate::errors::DemandflowError;
use crate::table::Table;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// A local directory holding downloaded files until they are transformed.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// Creates a staging area rooted at `root`. The directory is created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes `table` as CSV under a unique file name and returns its path.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory or file cannot be written.
    pub async fn write_download(&self, table: &Table) -> Result<PathBuf, DemandflowError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(format!("download_{}.csv", Uuid::new_v4().simple()));
        tokio::fs::write(&path, table.to_csv()?).await?;
        debug!(path = %path.display(), rows = table.len(), "Staged download");
        Ok(path)
    }

    /// Renames `path` to `canonical_name` inside the staging area, replacing
    /// any file already there.
    ///
    /// # Errors
    ///
    /// Returns `Io` if `path` does not exist or the rename fails.
    pub async fn rename(&self, path: &Path, canonical_name: &str) -> Result<PathBuf, DemandflowError> {
        let target = self.root.join(canonical_name);
        tokio::fs::rename(path, &target).await?;
        debug!(from = %path.display(), to = %target.display(), "Renamed staged file");
        Ok(target)
    }

    /// Reads a staged CSV file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, `Csv` if it is not valid CSV.
    pub async fn read_table(&self, path: &Path) -> Result<Table, DemandflowError> {
        let bytes = tokio::fs::read(path).await?;
        Table::from_csv(&bytes)
    }

    /// Removes a staged file. A file that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns `Io` for any failure other than the file not existing.
    pub async fn discard(&self, path: &Path) -> Result<(), DemandflowError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Staged file already removed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
