// Per-job temporary workspace
//
// Each pipeline run owns a uniquely named directory holding its intermediate audio.
// The directory is removed when the Workspace is dropped, on every exit path.

use log::{debug, error};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Fixed name of the extracted audio inside a workspace
pub const AUDIO_FILE_NAME: &str = "audio.mp3";

/// Output template handed to the extractor so it produces `AUDIO_FILE_NAME`
pub const AUDIO_OUTPUT_TEMPLATE: &str = "audio.%(ext)s";

const WORKSPACE_PREFIX: &str = "ytw-";

/// Scoped, exclusively owned job directory
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// Create a fresh directory under `root`
    ///
    /// # Errors
    ///
    /// Returns an IO error if the directory cannot be created
    pub fn create(root: &Path) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        let path = root.join(format!("{}{}", WORKSPACE_PREFIX, Uuid::new_v4()));
        // create_dir fails if the name is already taken
        fs::create_dir(&path)?;
        debug!("Created workspace {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the extraction stage must leave its output
    pub fn audio_path(&self) -> PathBuf {
        self.path.join(AUDIO_FILE_NAME)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        cleanup_folder(&self.path);
    }
}

/// Clean up a folder and its contents
///
/// This function logs errors but doesn't return them to the caller
pub fn cleanup_folder(folder_path: &Path) {
    match fs::remove_dir_all(folder_path) {
        Ok(()) => debug!("Removed workspace {}", folder_path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => error!("Failed to clean up folder {}: {}", folder_path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(root.path()).unwrap();
        let path = workspace.path().to_path_buf();

        fs::write(workspace.audio_path(), b"data").unwrap();
        assert!(path.is_dir());
        assert_eq!(workspace.audio_path(), path.join(AUDIO_FILE_NAME));

        drop(workspace);
        assert!(!path.exists());
    }

    #[test]
    fn test_workspaces_are_unique() {
        let root = tempfile::tempdir().unwrap();
        let a = Workspace::create(root.path()).unwrap();
        let b = Workspace::create(root.path()).unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_cleanup_of_missing_folder_is_silent() {
        let root = tempfile::tempdir().unwrap();
        cleanup_folder(&root.path().join("does-not-exist"));
    }
}
