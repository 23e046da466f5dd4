//! Transient files for file-shaped secrets
//!
//! File secrets are written under the workspace's `@tmp/` directory with a
//! `<job>-<build>-` prefix. Each file is owned by a [`NamedTempFile`] and is
//! removed when the owning stage drops it; [`TempFileManager::cleanup`]
//! sweeps anything a crashed run left behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Creates and sweeps transient secret files for one run
#[derive(Debug, Clone)]
pub struct TempFileManager {
    /// Temp directory path
    tmp_dir: PathBuf,

    /// File name prefix shared by every file of the run
    prefix: String,
}

impl TempFileManager {
    /// Creates a manager writing to `<workspace>/@tmp`
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the directory cannot be created
    pub fn new(workspace: impl AsRef<Path>, job_name: &str, build_id: &str) -> std::io::Result<Self> {
        let tmp_dir = workspace.as_ref().join("@tmp");
        fs::create_dir_all(&tmp_dir)?;

        let job: String = job_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();

        Ok(Self {
            tmp_dir,
            prefix: format!("{job}-{build_id}-"),
        })
    }

    /// Writes `contents` to a new owner-only file
    ///
    /// The file is deleted when the returned handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the file cannot be created or written
    pub fn create_secret_file(&self, contents: &[u8]) -> std::io::Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix(&self.prefix)
            .suffix(".secret")
            .tempfile_in(&self.tmp_dir)?;
        file.write_all(contents)?;
        file.flush()?;
        Ok(file)
    }

    /// Removes every file of this run still present in `@tmp/`
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the directory cannot be read or a file
    /// cannot be removed
    pub fn cleanup(&self) -> std::io::Result<usize> {
        let mut removed = 0;
        if self.tmp_dir.exists() {
            for entry in fs::read_dir(&self.tmp_dir)? {
                let entry = entry?;
                if entry.file_name().to_string_lossy().starts_with(&self.prefix) {
                    fs::remove_file(entry.path())?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Gets the path to the temp directory
    #[must_use]
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_temp_file_manager_creation() {
        let workspace = TempDir::new().unwrap();
        let manager = TempFileManager::new(workspace.path(), "test-job", "42").unwrap();
        assert!(manager.tmp_dir().exists());
        assert!(manager.tmp_dir().ends_with("@tmp"));
    }

    #[test]
    fn test_secret_file_is_removed_on_drop() {
        let workspace = TempDir::new().unwrap();
        let manager = TempFileManager::new(workspace.path(), "test-job", "42").unwrap();

        let file = manager.create_secret_file(b"apiVersion: v1").unwrap();
        let path = file.path().to_path_buf();
        assert_eq!(fs::read_to_string(&path).unwrap(), "apiVersion: v1");
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("test-job-42-")
        );

        drop(file);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_secret_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let workspace = TempDir::new().unwrap();
        let manager = TempFileManager::new(workspace.path(), "job", "1").unwrap();
        let file = manager.create_secret_file(b"x").unwrap();
        let mode = fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }

    #[test]
    fn test_cleanup_only_touches_this_run() {
        let workspace = TempDir::new().unwrap();
        let ours = TempFileManager::new(workspace.path(), "cleanup test", "100").unwrap();
        let theirs = TempFileManager::new(workspace.path(), "other", "7").unwrap();

        let (_, kept_ours) = ours.create_secret_file(b"1").unwrap().keep().unwrap();
        let (_, kept_theirs) = theirs.create_secret_file(b"2").unwrap().keep().unwrap();

        assert_eq!(ours.cleanup().unwrap(), 1);
        assert!(!kept_ours.exists());
        assert!(kept_theirs.exists());
    }
}
