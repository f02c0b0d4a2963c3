//! Private scratch directory holding the archive while it is uploaded.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tempfile::TempDir;

use crate::error::ReportError;

/// A `0700` directory under the scratch root with room for one archive.
///
/// [`Workspace::cleanup`] removes the archive and the directory; dropping
/// the workspace does the same.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    archive: PathBuf,
}

impl Workspace {
    /// Creates `<root>/rhtsupport-<timestamp>-XXXXXX/` for `<archive_name>`.
    pub fn create(root: &Path, archive_name: &str) -> Result<Self, ReportError> {
        let prefix = format!("rhtsupport-{}-", Local::now().format("%Y-%m-%d-%H:%M:%S"));
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(root)
            .map_err(|e| {
                tracing::debug!("mkdtemp in {}: {e}", root.display());
                ReportError::Archive(format!(
                    "Can't create a temporary directory in {}",
                    root.display()
                ))
            })?;
        let archive = dir.path().join(archive_name);
        Ok(Self { dir, archive })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive
    }

    /// Removes the archive, then the directory. Failures are only logged.
    pub fn cleanup(self) {
        if let Err(e) = fs::remove_file(&self.archive) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!("unlink {}: {e}", self.archive.display());
            }
        }
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            tracing::debug!("rmdir {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn workspace_is_private_and_removed() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path(), "dump.tar.gz").unwrap();

        let mode = fs::metadata(ws.dir()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        assert!(ws
            .dir()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("rhtsupport-"));
        assert_eq!(ws.archive_path(), ws.dir().join("dump.tar.gz"));

        fs::write(ws.archive_path(), b"x").unwrap();
        ws.cleanup();
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_scratch_root_is_an_archive_error() {
        let err = Workspace::create(Path::new("/nonexistent/scratch"), "a.tar.gz").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Can't create a temporary directory in /nonexistent/scratch"
        );
    }
}
