//! Problem data archive.
//!
//! The archive is a GNU tar stream piped through the compressor:
//!
//! ```text
//! content/<file>     every file of the dump directory
//! content/<file>     referenced problem data files living elsewhere
//! content.xml        manifest binding item names to values or members
//! ```
//!
//! `content.xml` is always the last member before the end-of-archive
//! blocks.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::compression::{GzipChild, DEFAULT_COMPRESSOR};
use crate::dump_dir::{DumpDir, OpenMode};
use crate::error::ReportError;
use crate::problem_data::{ProblemData, ProblemItem};
use crate::xml;

pub const CONTENT_DIR: &str = "content";
pub const MANIFEST_NAME: &str = "content.xml";
const BLOCK_SIZE: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Binding {
    Value {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        binary: bool,
    },
}

/// The `content.xml` manifest.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    bindings: Vec<Binding>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to inline text.
    pub fn add_value(&mut self, name: &str, value: &str) {
        self.bindings.push(Binding::Value {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Binds `name` to an archive member.
    pub fn add_file(&mut self, name: &str, file_name: &str, binary: bool) {
        self.bindings.push(Binding::File {
            name: name.into(),
            file_name: file_name.into(),
            binary,
        });
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str(&format!("<report xmlns=\"{}\">\n", xml::STRATA_NS));
        for binding in &self.bindings {
            match binding {
                Binding::Value { name, value } => out.push_str(&format!(
                    "  <binding name=\"{}\" value=\"{}\"/>\n",
                    xml::escape(name),
                    xml::escape(value)
                )),
                Binding::File {
                    name,
                    file_name,
                    binary,
                } => out.push_str(&format!(
                    "  <binding name=\"{}\" fileName=\"{}\" type=\"{}\"/>\n",
                    xml::escape(name),
                    xml::escape(file_name),
                    if *binary { "binary" } else { "text" }
                )),
            }
        }
        out.push_str("</report>\n");
        out
    }
}

/// Archive member name for a file.
pub fn member_name(short_name: &str) -> String {
    format!("{CONTENT_DIR}/{short_name}")
}

/// Size of `len` bytes padded to whole tar blocks.
pub fn padded_len(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// Writes a dump directory and its problem data into a compressed archive.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    compressor: String,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self {
            compressor: DEFAULT_COMPRESSOR.into(),
        }
    }
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compressor(compressor: impl Into<String>) -> Self {
        Self {
            compressor: compressor.into(),
        }
    }

    /// Builds the archive at `output`, which must not exist yet.
    ///
    /// On failure the partial output is removed.
    pub fn build(
        &self,
        output: &Path,
        dd: &DumpDir,
        data: &ProblemData,
    ) -> Result<(), ReportError> {
        let mut gzip = GzipChild::spawn(&self.compressor, output)
            .map_err(|e| ReportError::Archive(e.to_string()))?;

        let written = match gzip.take_stdin() {
            Some(stdin) => write_tar(stdin, dd, data),
            None => Err(ReportError::Archive("compressor has no input pipe".into())),
        };
        // stdin is closed by now, so waiting can't deadlock
        let finished = gzip
            .wait()
            .map_err(|e| ReportError::Archive(e.to_string()));

        match written.and(finished) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = std::fs::remove_file(output);
                Err(e)
            }
        }
    }
}

impl ArchiveBuilder {
    /// Runs [`ArchiveBuilder::build`] on the blocking thread pool.
    ///
    /// The dump directory is reopened read-only inside the task.
    pub async fn spawn_build(
        &self,
        output: PathBuf,
        dump_dir: PathBuf,
        data: ProblemData,
    ) -> Result<(), ReportError> {
        let builder = self.clone();
        tokio::task::spawn_blocking(move || {
            let dd = DumpDir::open(&dump_dir, OpenMode::ReadOnly)?;
            builder.build(&output, &dd, &data)
        })
        .await
        .map_err(|e| ReportError::Archive(format!("archive task failed: {e}")))?
    }
}

fn write_tar<W: Write>(sink: W, dd: &DumpDir, data: &ProblemData) -> Result<(), ReportError> {
    let mut tar = tar::Builder::new(sink);
    let mut manifest = Manifest::new();
    let dd_root = dd.path().canonicalize().unwrap_or_else(|_| dd.path().to_path_buf());
    let mut extra_files: Vec<(String, PathBuf)> = Vec::new();

    for (name, item) in data.iter() {
        match item {
            ProblemItem::Text(text) => manifest.add_value(name, text),
            ProblemItem::BigText(path) | ProblemItem::Binary(path) => {
                let basename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| name.clone());
                let member = member_name(&basename);
                manifest.add_file(name, &member, matches!(item, ProblemItem::Binary(_)));

                // files inside the dump directory are added below anyway
                let parent = path.parent().and_then(|p| p.canonicalize().ok());
                if parent.as_deref() != Some(dd_root.as_path()) {
                    extra_files.push((member, path.clone()));
                }
            }
        }
    }

    for (member, path) in &extra_files {
        tar.append_path_with_name(path, member)
            .map_err(|e| archive_error(path, e))?;
    }

    for (short_name, full_name) in dd.files()? {
        tar.append_path_with_name(&full_name, member_name(&short_name))
            .map_err(|e| archive_error(&full_name, e))?;
    }

    let signature = manifest.to_xml();
    tracing::debug!(
        "{MANIFEST_NAME}: {} bindings, {} bytes ({} on disk)",
        manifest.len(),
        signature.len(),
        padded_len(signature.len())
    );
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header
        .set_path(MANIFEST_NAME)
        .map_err(|e| ReportError::Archive(e.to_string()))?;
    header.set_mode(0o644);
    header.set_size(signature.len() as u64);
    header.set_mtime(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    );
    header.set_cksum();
    // data is zero-padded to the next block boundary by the builder
    tar.append(&header, signature.as_bytes())
        .map_err(|e| ReportError::Archive(format!("Can't write {MANIFEST_NAME}: {e}")))?;

    let mut sink = tar
        .into_inner()
        .map_err(|e| ReportError::Archive(format!("Can't finish archive: {e}")))?;
    sink.flush()
        .map_err(|e| ReportError::Archive(format!("Can't finish archive: {e}")))?;
    Ok(())
}

fn archive_error(path: &Path, e: std::io::Error) -> ReportError {
    ReportError::Archive(format!("Can't add '{}' to archive: {e}", path.display()))
}
