//! Directory helpers anchored to a single `covermatch` data folder.
//!
//! Logs land under the OS data directory unless `COVERMATCH_HOME` points
//! somewhere else (tests and cluster jobs set it to a scratch location).

use std::path::PathBuf;

use directories::BaseDirs;
use thiserror::Error;

/// Name of the application directory under the OS data root.
pub const APP_DIR_NAME: &str = "covermatch";
/// Environment variable that replaces the OS data root.
pub const HOME_ENV: &str = "COVERMATCH_HOME";

#[derive(Debug, Error)]
pub enum AppDirError {
    /// No suitable base data directory could be resolved.
    #[error("No suitable base data directory available")]
    NoBaseDir,
    /// Failed to create the application directory.
    #[error("Failed to create application directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Return the root application directory, creating it if needed.
pub fn app_root_dir() -> Result<PathBuf, AppDirError> {
    let path = match std::env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
        Some(home) => PathBuf::from(home),
        None => BaseDirs::new()
            .map(|dirs| dirs.data_dir().join(APP_DIR_NAME))
            .ok_or(AppDirError::NoBaseDir)?,
    };
    create(path)
}

/// Return the logs directory inside the application root, creating it if needed.
pub fn logs_dir() -> Result<PathBuf, AppDirError> {
    create(app_root_dir()?.join("logs"))
}

fn create(path: PathBuf) -> Result<PathBuf, AppDirError> {
    std::fs::create_dir_all(&path).map_err(|source| AppDirError::CreateDir {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_makes_nested_directories() {
        let base = tempfile::tempdir().unwrap();
        let nested = base.path().join("a").join("logs");
        let created = create(nested.clone()).unwrap();
        assert_eq!(created, nested);
        assert!(nested.is_dir());
    }
}
