use std::fs::Permissions;
#[cfg(target_family = "unix")]
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FsError {
    #[error("invalid path: `{0}`")]
    InvalidPath(String),
}

/// Rejects empty paths, paths that are not valid unicode and paths not ending in a file name.
pub fn validate_path(path: &Path) -> Result<(), FsError> {
    let Some(valid_path) = path.to_str() else {
        return Err(FsError::InvalidPath(format!(
            "{} is not valid unicode",
            path.to_string_lossy()
        )));
    };
    if valid_path.trim().is_empty() {
        return Err(FsError::InvalidPath("empty path".to_string()));
    }
    if path.file_name().is_none() {
        return Err(FsError::InvalidPath(format!("{valid_path} has no file name")));
    }
    Ok(())
}

/// Permissions for a file that is going to be executed by its owner and readable by everyone.
#[cfg(target_family = "unix")]
pub fn get_executable_permissions() -> Permissions {
    Permissions::from_mode(0o755)
}
