use super::utils::{validate_path, FsError};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, instrument};

const STAGING_SUFFIX: &str = ".partial";

#[derive(Error, Debug)]
pub enum StageError {
    #[error("invalid path: {0}")]
    InvalidPath(#[from] FsError),

    #[error("cannot create directory '{0}': {1}")]
    CreatingDirectory(String, io::Error),

    #[error("cannot create staging file in '{0}': {1}")]
    CreatingFile(String, io::Error),

    #[error("cannot write staging file: {0}")]
    Writing(#[from] io::Error),

    #[error("cannot move staged file onto '{0}': {1}")]
    Persisting(String, io::Error),
}

/// A file written next to its final destination and moved onto it only when committed.
///
/// The staging file is created exclusively in the destination directory, so the final
/// rename never crosses filesystems. Dropping a [StagedFile] without calling
/// [StagedFile::commit] removes the staged content and leaves the destination untouched.
#[derive(Debug)]
pub struct StagedFile {
    file: NamedTempFile,
    destination: PathBuf,
}

impl StagedFile {
    /// Creates the staging file for `destination`, creating missing parent directories.
    #[instrument(skip_all, fields(destination = %destination.display()))]
    pub fn create(destination: &Path) -> Result<Self, StageError> {
        validate_path(destination)?;

        let file_name = destination
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                FsError::InvalidPath(format!("{} has no file name", destination.display()))
            })?;

        let parent = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .map_err(|err| StageError::CreatingDirectory(parent.display().to_string(), err))?;

        let file = tempfile::Builder::new()
            .prefix(&format!(".{file_name}."))
            .suffix(STAGING_SUFFIX)
            .tempfile_in(&parent)
            .map_err(|err| StageError::CreatingFile(parent.display().to_string(), err))?;
        debug!(staging_path = %file.path().display(), "Staging file created");

        Ok(Self {
            file,
            destination: destination.to_path_buf(),
        })
    }

    pub fn staging_path(&self) -> &Path {
        self.file.path()
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Flushes the staged content to disk, marks it executable and atomically replaces
    /// the destination with it. Returns the destination path.
    #[instrument(skip_all, fields(destination = %self.destination.display()))]
    pub fn commit(mut self) -> Result<PathBuf, StageError> {
        self.file.flush()?;
        self.file.as_file().sync_all()?;

        #[cfg(target_family = "unix")]
        fs::set_permissions(self.file.path(), super::utils::get_executable_permissions())?;

        let destination = self.destination;
        self.file.persist(&destination).map_err(|err| {
            StageError::Persisting(destination.display().to_string(), err.error)
        })?;
        debug!("Staged file committed");

        Ok(destination)
    }
}

impl Write for StagedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
