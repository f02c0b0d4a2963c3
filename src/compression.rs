//! Gzip compression through an external compressor process.
//!
//! The archive writer feeds uncompressed bytes into the child's stdin; the
//! child writes the compressed stream straight into the output file.
//! [`GzipChild`] owns the process and makes sure it is always waited for,
//! so no zombie is left behind on any exit path.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};

use thiserror::Error;

/// Compressor used when none is configured.
pub const DEFAULT_COMPRESSOR: &str = "gzip";

/// Compression errors.
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("Can't create '{path}': {source}")]
    Output { path: PathBuf, source: io::Error },

    #[error("Can't execute '{program}': {source}")]
    Spawn { program: String, source: io::Error },

    #[error("'{program}' failed: {status}")]
    Failed { program: String, status: ExitStatus },

    #[error("Waiting for '{program}' failed: {source}")]
    Wait { program: String, source: io::Error },
}

/// A running compressor writing into an exclusively created file.
#[derive(Debug)]
pub struct GzipChild {
    program: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl GzipChild {
    /// Creates `output` (must not exist, mode 0600) and starts `program`
    /// with its stdout redirected there.
    pub fn spawn(program: &str, output: &Path) -> Result<Self, CompressionError> {
        let file = create_private(output).map_err(|source| CompressionError::Output {
            path: output.to_path_buf(),
            source,
        })?;

        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(file))
            .spawn()
            .map_err(|source| CompressionError::Spawn {
                program: program.to_string(),
                source,
            })?;
        let stdin = child.stdin.take();

        Ok(Self {
            program: program.to_string(),
            child: Some(child),
            stdin,
        })
    }

    /// Hands out the write end of the pipe. Dropping it lets the child
    /// see end of input.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Closes the pipe if still held and waits for the child.
    ///
    /// Succeeds only if the child exited with status 0.
    pub fn wait(mut self) -> Result<(), CompressionError> {
        drop(self.stdin.take());
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait().map_err(|source| CompressionError::Wait {
            program: self.program.clone(),
            source,
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(CompressionError::Failed {
                program: self.program.clone(),
                status,
            })
        }
    }
}

impl Drop for GzipChild {
    fn drop(&mut self) {
        // the write end must be closed first or the child never exits
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.wait();
        }
    }
}

#[cfg(unix)]
fn create_private(path: &Path) -> io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;

    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> io::Result<std::fs::File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}
