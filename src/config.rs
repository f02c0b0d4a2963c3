//! Reporter configuration.
//!
//! Settings come from three layers, highest priority first:
//!
//! 1. `RHTSupport_<PARAM>` environment variables
//! 2. `PARAM = VALUE` lines from the configuration files, later files winning
//! 3. Built-in defaults
//!
//! The microreport options live in their own file and use the `uReport_`
//! environment prefix.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ReportError;

pub const DEFAULT_CONF_FILE: &str = "/etc/libreport/plugins/rhtsupport.conf";
pub const DEFAULT_UREPORT_CONF_FILE: &str = "/etc/libreport/plugins/ureport.conf";

pub const DEFAULT_URL: &str = "https://api.access.redhat.com/rs";
pub const DEFAULT_BIG_FILE_URL: &str = "ftp://dropbox.redhat.com/incoming/";
/// Web attachments are limited to 250 MB on the portal side.
pub const DEFAULT_BIG_SIZE_MB: u64 = 200;
pub const DEFAULT_SCRATCH_DIR: &str = "/var/tmp";

const ENV_PREFIX: &str = "RHTSupport_";
const UREPORT_ENV_PREFIX: &str = "uReport_";

/// Raw `PARAM = VALUE` map loaded from one or more files.
pub type ConfMap = HashMap<String, String>;

/// Parses `PARAM = VALUE` lines into `map`, overwriting existing keys.
pub fn parse_conf(text: &str, map: &mut ConfMap) {
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            tracing::debug!("ignoring config line without '=': {line}");
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        map.insert(key.to_string(), value.to_string());
    }
}

/// Loads a configuration file into `map`.
///
/// Returns `false` when the file could not be read.
pub fn load_conf_file(path: &Path, map: &mut ConfMap) -> bool {
    tracing::info!("Loading settings from '{}'", path.display());
    match std::fs::read_to_string(path) {
        Ok(text) => {
            parse_conf(&text, map);
            tracing::debug!("Loaded '{}'", path.display());
            true
        }
        Err(e) => {
            tracing::debug!("can't read '{}': {e}", path.display());
            false
        }
    }
}

/// `1`, `yes`, `true` and `on` are true; anything else is false.
pub fn string_to_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "yes" | "true" | "on"
    )
}

/// Resolves one parameter against environment, file map and default.
///
/// `env` is passed in so resolution never reads process state on its own.
fn lookup<'a>(
    name: &str,
    prefix: &str,
    map: &'a ConfMap,
    env: &'a HashMap<String, String>,
) -> Option<&'a str> {
    env.get(&format!("{prefix}{name}"))
        .or_else(|| map.get(name))
        .map(String::as_str)
}

/// Login and password used for every authenticated portal call.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }

    /// Copies `other` into `self` when they differ; returns whether it did.
    pub fn update_from(&mut self, other: &Credentials) -> bool {
        if self == other {
            return false;
        }
        *self = other.clone();
        true
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Resolved reporter settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base API URL of the support portal.
    pub url: String,
    /// Credentials from configuration; empty fields are prompted for.
    pub credentials: Credentials,
    /// Bulk drop location for large archives.
    pub big_file_url: String,
    /// Archives at least this large (MiB) go to the bulk drop. 0 disables it.
    pub big_size_mb: u64,
    pub ssl_verify: bool,
    pub submit_ureport: bool,
    /// Root under which the private workspace directory is created.
    pub scratch_dir: PathBuf,
    pub verbosity: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.into(),
            credentials: Credentials::default(),
            big_file_url: DEFAULT_BIG_FILE_URL.into(),
            big_size_mb: DEFAULT_BIG_SIZE_MB,
            ssl_verify: true,
            submit_ureport: false,
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
            verbosity: 0,
        }
    }
}

impl Settings {
    /// Merges defaults, file entries and environment overrides.
    ///
    /// `ureport_flag` is the `-u` command line switch, used only when
    /// `SubmitUReport` is set nowhere else.
    pub fn resolve(
        map: &ConfMap,
        env: &HashMap<String, String>,
        ureport_flag: bool,
    ) -> Result<Self, ReportError> {
        let get = |name: &str| lookup(name, ENV_PREFIX, map, env);

        let big_size_mb = match get("BigSizeMB") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                ReportError::Config(format!("Invalid number '{raw}' for BigSizeMB"))
            })?,
            None => DEFAULT_BIG_SIZE_MB,
        };

        Ok(Self {
            url: get("URL").unwrap_or(DEFAULT_URL).to_string(),
            credentials: Credentials::new(
                get("Login").unwrap_or_default(),
                get("Password").unwrap_or_default(),
            ),
            big_file_url: get("BigFileURL").unwrap_or(DEFAULT_BIG_FILE_URL).to_string(),
            big_size_mb,
            ssl_verify: get("SSLVerify").map(string_to_bool).unwrap_or(true),
            submit_ureport: get("SubmitUReport")
                .map(string_to_bool)
                .unwrap_or(ureport_flag),
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
            verbosity: 0,
        })
    }

    /// URL of the case collection.
    pub fn cases_url(&self) -> String {
        concat_url(&self.url, "cases")
    }

    /// URL of an existing case given its id.
    pub fn case_url(&self, case_id: &str) -> String {
        concat_url(&self.cases_url(), case_id)
    }

    pub fn hints_url(&self) -> String {
        concat_url(&self.url, "problems")
    }

    pub fn ureport_url(&self) -> String {
        concat_url(&self.url, "telemetry/abrt")
    }
}

/// Microreport options.
#[derive(Debug, Clone)]
pub struct UreportSettings {
    pub url: String,
    pub ssl_verify: bool,
    pub include_auth_data: bool,
    /// Problem data items sent in the `auth` section.
    pub auth_data_items: Vec<String>,
    pub contact_email: Option<String>,
}

impl UreportSettings {
    /// Builds microreport settings on top of the already resolved portal
    /// settings; the endpoint always hangs off the portal URL.
    pub fn resolve(map: &ConfMap, env: &HashMap<String, String>, settings: &Settings) -> Self {
        let get = |name: &str| lookup(name, UREPORT_ENV_PREFIX, map, env);

        let include_auth_data = get("IncludeAuthData").map(string_to_bool).unwrap_or(true);
        let auth_data_items = if include_auth_data {
            get("AuthDataItems").map(parse_list).unwrap_or_default()
        } else {
            Vec::new()
        };

        Self {
            url: settings.ureport_url(),
            ssl_verify: settings.ssl_verify,
            include_auth_data,
            auth_data_items,
            contact_email: get("ContactEmail")
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
        }
    }
}

/// Splits a comma or whitespace separated list.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Joins a URL and a path element with exactly one slash between them.
pub fn concat_url(base: &str, tail: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        tail.trim_start_matches('/')
    )
}
