//! Problem data loaded from a dump directory.
//!
//! Small UTF-8 files are kept inline; larger ones and binary files are
//! kept as references to the file on disk.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::dump_dir::DumpDir;
use crate::error::ReportError;

pub const FILENAME_PACKAGE: &str = "package";
pub const FILENAME_PKG_NAME: &str = "pkg_name";
pub const FILENAME_PKG_VENDOR: &str = "pkg_vendor";
pub const FILENAME_EXECUTABLE: &str = "executable";
pub const FILENAME_COUNT: &str = "count";
pub const FILENAME_REPRODUCIBLE: &str = "reproducible";
pub const FILENAME_OS_INFO: &str = "os_info";
pub const FILENAME_OS_RELEASE: &str = "os_release";
pub const FILENAME_REASON: &str = "reason";
pub const FILENAME_REPORTED_TO: &str = "reported_to";

/// Text files above this size are referenced instead of loaded.
pub const TEXT_INLINE_LIMIT: u64 = 4 * 1024;
const UTF8_PROBE_LEN: usize = 64 * 1024;

pub const RED_HAT_VENDOR: &str = "Red Hat, Inc.";
pub const UNKNOWN_VENDOR: &str = "unknown vendor";
pub const NOT_PACKAGED: &str = "not belong to any package";

/// Value of a single problem data item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProblemItem {
    /// Inline text.
    Text(String),
    /// Large text file on disk.
    BigText(PathBuf),
    /// Binary file on disk.
    Binary(PathBuf),
}

impl ProblemItem {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ProblemItem::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn file(&self) -> Option<&PathBuf> {
        match self {
            ProblemItem::BigText(p) | ProblemItem::Binary(p) => Some(p),
            ProblemItem::Text(_) => None,
        }
    }
}

/// How reliably the user can reproduce the problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reproducibility {
    Unknown,
    Reproducible,
    Recurrent,
}

impl Reproducibility {
    pub fn from_text(text: &str) -> Option<Self> {
        match text.trim() {
            "Not sure how to reproduce the problem" => Some(Self::Unknown),
            "The problem is reproducible" => Some(Self::Reproducible),
            "The problem occurs regularly" => Some(Self::Recurrent),
            _ => None,
        }
    }
}

/// Semantic key → value map describing one problem.
#[derive(Debug, Clone, Default)]
pub struct ProblemData {
    items: BTreeMap<String, ProblemItem>,
}

impl ProblemData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every file of the dump directory as an item.
    pub fn load(dd: &DumpDir) -> Result<Self, ReportError> {
        let mut data = Self::new();
        for (name, path) in dd.files()? {
            let size = fs::metadata(&path)?.len();
            let bytes = if size <= TEXT_INLINE_LIMIT {
                Some(fs::read(&path)?)
            } else {
                None
            };
            let item = match bytes {
                Some(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => ProblemItem::Text(text),
                    Err(_) => ProblemItem::Binary(path),
                },
                None if is_utf8_file(&path)? => ProblemItem::BigText(path),
                None => ProblemItem::Binary(path),
            };
            data.items.insert(name, item);
        }
        Ok(data)
    }

    pub fn insert(&mut self, key: impl Into<String>, item: ProblemItem) {
        self.items.insert(key.into(), item);
    }

    /// Adds an inline text item.
    pub fn add_text(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.insert(key, ProblemItem::Text(value.into()));
    }

    /// Inline text content of `key`, trailing newline removed.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items
            .get(key)
            .and_then(ProblemItem::as_text)
            .map(|s| s.strip_suffix('\n').unwrap_or(s))
    }

    pub fn item(&self, key: &str) -> Option<&ProblemItem> {
        self.items.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ProblemItem)> {
        self.items.iter()
    }

    /// Text of `key`, reading referenced text files when needed.
    pub fn read_text(&self, key: &str) -> Option<String> {
        match self.items.get(key)? {
            ProblemItem::Text(s) => Some(s.clone()),
            ProblemItem::BigText(p) => fs::read_to_string(p).ok(),
            ProblemItem::Binary(_) => None,
        }
    }

    /// `None` when the item is missing or not one of the known phrases.
    pub fn reproducible(&self) -> Option<Reproducibility> {
        let text = self.get(FILENAME_REPRODUCIBLE)?;
        let parsed = Reproducibility::from_text(text);
        if parsed.is_none() {
            tracing::warn!("Cannot return Reproducible type: invalid format '{text}'");
        }
        parsed
    }

    /// The `os_info` item (os-release syntax) as a map.
    pub fn os_info(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        let Some(text) = self.get(FILENAME_OS_INFO) else {
            return map;
        };
        for line in text.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                map.insert(key.trim().to_string(), value.to_string());
            }
        }
        map
    }

    /// Support product and version, if they can be told from the data.
    pub fn rhts_product(&self) -> Option<(String, Option<String>)> {
        let osinfo = self.os_info();
        let name = osinfo
            .get("REDHAT_SUPPORT_PRODUCT")
            .or_else(|| osinfo.get("NAME"));
        let version = osinfo
            .get("REDHAT_SUPPORT_PRODUCT_VERSION")
            .or_else(|| osinfo.get("VERSION_ID"));
        if let (Some(name), Some(version)) = (name, version) {
            return Some((name.clone(), Some(version.clone())));
        }

        let release = self.get(FILENAME_OS_RELEASE)?;
        parse_release_for_rhts(release)
    }
}

/// Looks at the head of the file only; coredumps can be huge.
fn is_utf8_file(path: &Path) -> Result<bool, ReportError> {
    use std::io::Read;

    let mut head = Vec::with_capacity(UTF8_PROBE_LEN);
    fs::File::open(path)?
        .take(UTF8_PROBE_LEN as u64)
        .read_to_end(&mut head)?;
    Ok(match std::str::from_utf8(&head) {
        Ok(_) => true,
        // a multi-byte character cut off by the probe window
        Err(e) => e.error_len().is_none(),
    })
}

/// Parses a release line such as
/// `Red Hat Enterprise Linux Server release 7.0 (Maipo)`.
pub fn parse_release_for_rhts(release: &str) -> Option<(String, Option<String>)> {
    let release = release.lines().next()?.trim();
    let (product, rest) = match release.split_once(" release ") {
        Some((product, rest)) => (product.trim(), Some(rest)),
        None => (release, None),
    };
    if product.is_empty() {
        return None;
    }

    let product = if product.starts_with("Red Hat Enterprise Linux") {
        "Red Hat Enterprise Linux".to_string()
    } else {
        product.to_string()
    };
    let version = rest
        .and_then(|r| r.split_whitespace().next())
        .map(String::from);
    Some((product, version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump_dir::OpenMode;

    #[test]
    fn load_classifies_items() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("count"), "1\n").unwrap();
        fs::write(dir.path().join("backtrace"), "frame\n".repeat(2000)).unwrap();
        fs::write(dir.path().join("coredump"), [0xffu8, 0xfe, 0x00, 0x01]).unwrap();

        let dd = DumpDir::open(dir.path(), OpenMode::ReadOnly).unwrap();
        let data = ProblemData::load(&dd).unwrap();

        assert_eq!(data.get("count"), Some("1"));
        assert!(matches!(data.item("backtrace"), Some(ProblemItem::BigText(_))));
        assert!(matches!(data.item("coredump"), Some(ProblemItem::Binary(_))));
        assert!(data.read_text("backtrace").unwrap().starts_with("frame"));
    }

    #[test]
    fn reproducibility_phrases() {
        let mut data = ProblemData::new();
        assert_eq!(data.reproducible(), None);

        data.add_text(FILENAME_REPRODUCIBLE, "The problem is reproducible");
        assert_eq!(data.reproducible(), Some(Reproducibility::Reproducible));

        data.add_text(FILENAME_REPRODUCIBLE, "Not sure how to reproduce the problem");
        assert_eq!(data.reproducible(), Some(Reproducibility::Unknown));

        data.add_text(FILENAME_REPRODUCIBLE, "maybe");
        assert_eq!(data.reproducible(), None);
    }

    #[test]
    fn product_from_os_info() {
        let mut data = ProblemData::new();
        data.add_text(
            FILENAME_OS_INFO,
            "NAME=\"Red Hat Enterprise Linux Server\"\nVERSION_ID=\"7.2\"\nREDHAT_SUPPORT_PRODUCT=\"Red Hat Enterprise Linux\"\nREDHAT_SUPPORT_PRODUCT_VERSION=\"7.2\"\n",
        );
        assert_eq!(
            data.rhts_product(),
            Some(("Red Hat Enterprise Linux".into(), Some("7.2".into())))
        );
    }

    #[test]
    fn product_from_release_line() {
        let mut data = ProblemData::new();
        data.add_text(
            FILENAME_OS_RELEASE,
            "Red Hat Enterprise Linux Server release 6.5 (Santiago)\n",
        );
        assert_eq!(
            data.rhts_product(),
            Some(("Red Hat Enterprise Linux".into(), Some("6.5".into())))
        );

        data.add_text(FILENAME_OS_RELEASE, "Fedora release 39 (Thirty Nine)");
        assert_eq!(
            data.rhts_product(),
            Some(("Fedora".into(), Some("39".into())))
        );
    }

    #[test]
    fn product_undetermined_without_os_data() {
        assert_eq!(ProblemData::new().rhts_product(), None);
    }
}
