//! Crash-dump directory access.
//!
//! A dump directory holds one file per problem data item plus a
//! `reported_to` file recording earlier submissions, one per line:
//!
//! ```text
//! RHTSupport: TIME=2024-05-01-10:22:31 URL=https://portal/cases/123 MSG=Case created
//! uReport: BTHASH=7c3f... URL=https://portal/telemetry/abrt/reports/bthash/7c3f...
//! ```
//!
//! Writing requires the directory to be opened [`OpenMode::ReadWrite`],
//! which holds an exclusive `.lock` file until the handle is dropped.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

use crate::error::ReportError;

pub const REPORTED_TO_FILE: &str = "reported_to";
const LOCK_FILE: &str = ".lock";
const LOCK_ATTEMPTS: u32 = 10;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(500);
const TIME_FORMAT: &str = "%Y-%m-%d-%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// One earlier submission recorded in `reported_to`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportResult {
    pub label: String,
    pub url: Option<String>,
    pub msg: Option<String>,
    pub bthash: Option<String>,
    /// Seconds since the epoch.
    pub timestamp: Option<i64>,
}

impl ReportResult {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// Formats the entry as a `reported_to` line (without newline).
    pub fn to_line(&self) -> String {
        let mut line = format!("{}:", self.label);
        if let Some(ts) = self.timestamp {
            if let Some(time) = Local.timestamp_opt(ts, 0).single() {
                line.push_str(&format!(" TIME={}", time.format(TIME_FORMAT)));
            }
        }
        if let Some(url) = &self.url {
            line.push_str(&format!(" URL={url}"));
        }
        if let Some(bthash) = &self.bthash {
            line.push_str(&format!(" BTHASH={bthash}"));
        }
        if let Some(msg) = &self.msg {
            line.push_str(&format!(" MSG={}", msg.replace('\n', " ")));
        }
        line
    }

    /// Parses one `reported_to` line.
    pub fn parse_line(line: &str) -> Option<Self> {
        let (label, rest) = line.split_once(':')?;
        let label = label.trim();
        if label.is_empty() || label.contains(char::is_whitespace) {
            return None;
        }

        let mut result = ReportResult::new(label);
        let mut rest = rest.trim_start();
        while !rest.is_empty() {
            if let Some(msg) = rest.strip_prefix("MSG=") {
                result.msg = Some(msg.to_string());
                break;
            }
            let (token, tail) = match rest.split_once(' ') {
                Some((token, tail)) => (token, tail.trim_start()),
                None => (rest, ""),
            };
            if let Some((key, value)) = token.split_once('=') {
                match key {
                    "TIME" => result.timestamp = parse_time(value),
                    "URL" => result.url = Some(value.to_string()),
                    "BTHASH" => result.bthash = Some(value.to_string()),
                    _ => tracing::debug!("unknown reported_to key '{key}'"),
                }
            }
            rest = tail;
        }
        Some(result)
    }
}

fn parse_time(value: &str) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(value, TIME_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t: DateTime<Local>| t.with_timezone(&Utc).timestamp())
}

/// Handle to an opened crash-dump directory.
#[derive(Debug)]
pub struct DumpDir {
    path: PathBuf,
    mode: OpenMode,
}

impl DumpDir {
    /// Opens a dump directory; read-write access takes the directory lock.
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self, ReportError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_dir() {
            return Err(ReportError::DumpDir(format!(
                "'{}' is not a problem directory",
                path.display()
            )));
        }
        if mode == OpenMode::ReadWrite {
            acquire_lock(&path)?;
        }
        Ok(Self { path, mode })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last path component, used to name the archive.
    pub fn basename(&self) -> String {
        self.path
            .canonicalize()
            .unwrap_or_else(|_| self.path.clone())
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "problem".into())
    }

    /// Lists regular files as `(short_name, full_path)`, sorted by name.
    pub fn files(&self) -> Result<Vec<(String, PathBuf)>, ReportError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == LOCK_FILE || !entry.file_type()?.is_file() {
                continue;
            }
            files.push((name, entry.path()));
        }
        files.sort();
        Ok(files)
    }

    pub fn reported_to(&self) -> Result<Vec<ReportResult>, ReportError> {
        let text = match fs::read_to_string(self.path.join(REPORTED_TO_FILE)) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(text.lines().filter_map(ReportResult::parse_line).collect())
    }

    /// Returns the most recent entry with the given label.
    pub fn find_reported_to(&self, label: &str) -> Result<Option<ReportResult>, ReportError> {
        Ok(self
            .reported_to()?
            .into_iter()
            .rev()
            .find(|r| r.label == label))
    }

    /// Appends an entry to `reported_to`, skipping an identical line.
    pub fn add_reported_to(&self, result: &ReportResult) -> Result<(), ReportError> {
        if self.mode != OpenMode::ReadWrite {
            return Err(ReportError::DumpDir(format!(
                "'{}' is opened read-only",
                self.path.display()
            )));
        }
        let line = result.to_line();
        let file = self.path.join(REPORTED_TO_FILE);
        let existing = match fs::read_to_string(&file) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        if existing.lines().any(|l| l == line) {
            return Ok(());
        }
        let mut out = OpenOptions::new().create(true).append(true).open(&file)?;
        if !existing.is_empty() && !existing.ends_with('\n') {
            out.write_all(b"\n")?;
        }
        writeln!(out, "{line}")?;
        Ok(())
    }
}

impl Drop for DumpDir {
    fn drop(&mut self) {
        if self.mode == OpenMode::ReadWrite {
            let _ = fs::remove_file(self.path.join(LOCK_FILE));
        }
    }
}

fn acquire_lock(dir: &Path) -> Result<(), ReportError> {
    let lock = dir.join(LOCK_FILE);
    for attempt in 1..=LOCK_ATTEMPTS {
        match OpenOptions::new().write(true).create_new(true).open(&lock) {
            Ok(mut file) => {
                write!(file, "{}", std::process::id())?;
                return Ok(());
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::info!(
                    "'{}' is locked by another process, waiting (attempt {attempt})",
                    dir.display()
                );
                std::thread::sleep(LOCK_RETRY_DELAY);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(ReportError::DumpDir(format!(
        "Can't lock '{}': locked by another process",
        dir.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump_dir_with(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    #[test]
    fn parse_full_line() {
        let r = ReportResult::parse_line(
            "RHTSupport: TIME=2024-05-01-10:22:31 URL=https://portal/cases/123 MSG=Case created ok",
        )
        .unwrap();
        assert_eq!(r.label, "RHTSupport");
        assert_eq!(r.url.as_deref(), Some("https://portal/cases/123"));
        assert_eq!(r.msg.as_deref(), Some("Case created ok"));
        assert!(r.timestamp.is_some());
    }

    #[test]
    fn parse_bthash_line() {
        let r = ReportResult::parse_line("uReport: BTHASH=abc123").unwrap();
        assert_eq!(r.label, "uReport");
        assert_eq!(r.bthash.as_deref(), Some("abc123"));
        assert!(r.url.is_none());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ReportResult::parse_line("no colon here").is_none());
        assert!(ReportResult::parse_line("two words: URL=x").is_none());
    }

    #[test]
    fn line_format_survives_parse() {
        let mut r = ReportResult::new("RHTSupport");
        r.url = Some("https://portal/cases/9".into());
        r.msg = Some("multi\nline".into());
        r.timestamp = Some(1_700_000_000);
        let parsed = ReportResult::parse_line(&r.to_line()).unwrap();
        assert_eq!(parsed.url, r.url);
        assert_eq!(parsed.msg.as_deref(), Some("multi line"));
        assert_eq!(parsed.timestamp, r.timestamp);
    }

    #[test]
    fn files_skip_lock_and_subdirs() {
        let dir = dump_dir_with(&[("count", "1"), ("backtrace", "bt")]);
        fs::create_dir(dir.path().join("sub")).unwrap();

        let dd = DumpDir::open(dir.path(), OpenMode::ReadWrite).unwrap();
        let names: Vec<_> = dd.files().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["backtrace", "count"]);
        drop(dd);
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn find_returns_last_entry() {
        let dir = dump_dir_with(&[(
            REPORTED_TO_FILE,
            "RHTSupport: URL=https://portal/cases/1\nuReport: BTHASH=x\nRHTSupport: URL=https://portal/cases/2\n",
        )]);
        let dd = DumpDir::open(dir.path(), OpenMode::ReadOnly).unwrap();
        let found = dd.find_reported_to("RHTSupport").unwrap().unwrap();
        assert_eq!(found.url.as_deref(), Some("https://portal/cases/2"));
        assert!(dd.find_reported_to("Bugzilla").unwrap().is_none());
    }

    #[test]
    fn add_reported_to_appends_once() {
        let dir = dump_dir_with(&[(REPORTED_TO_FILE, "uReport: BTHASH=x")]);
        let dd = DumpDir::open(dir.path(), OpenMode::ReadWrite).unwrap();
        let mut r = ReportResult::new("RHTSupport");
        r.url = Some("https://portal/cases/5".into());

        dd.add_reported_to(&r).unwrap();
        dd.add_reported_to(&r).unwrap();

        let entries = dd.reported_to().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].url.as_deref(), Some("https://portal/cases/5"));
    }

    #[test]
    fn read_only_handle_refuses_writes() {
        let dir = dump_dir_with(&[]);
        let dd = DumpDir::open(dir.path(), OpenMode::ReadOnly).unwrap();
        assert!(dd.add_reported_to(&ReportResult::new("RHTSupport")).is_err());
    }

    #[test]
    fn second_writer_waits_for_lock() {
        let dir = dump_dir_with(&[]);
        fs::write(dir.path().join(LOCK_FILE), "1").unwrap();
        let err = DumpDir::open(dir.path(), OpenMode::ReadWrite).unwrap_err();
        assert!(err.to_string().contains("locked"));
    }

    #[test]
    fn missing_directory_is_error() {
        assert!(DumpDir::open("/nonexistent/problem/dir", OpenMode::ReadOnly).is_err());
    }
}
