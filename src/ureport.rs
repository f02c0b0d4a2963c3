//! Microreports: compact crash statistics sent to the telemetry endpoint.
//!
//! A submitted microreport is identified by its `bthash`. Once a case
//! exists the case URL (and optionally a contact email) is attached to
//! that hash.

use std::path::Path;

use colored::Colorize;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::config::{concat_url, Credentials, UreportSettings};
use crate::credentials::{with_credential_retry, Prompter};
use crate::dump_dir::{DumpDir, OpenMode, ReportResult};
use crate::error::ReportError;
use crate::portal::{HttpReply, MicroreportTransport};
use crate::problem_data::{ProblemData, FILENAME_COUNT, FILENAME_EXECUTABLE, FILENAME_REASON};

pub const UREPORT_VERSION: u32 = 2;
pub const UREPORT_LABEL: &str = "uReport";
pub const SUBMIT_ACTION: &str = "reports/new/";
pub const ATTACH_ACTION: &str = "reports/attach/";

/// Key binding a case URL to a microreport.
pub const ATTACH_RHCID: &str = "RHCID";
pub const ATTACH_EMAIL: &str = "email";

/// A `reported_to` item returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerReportedTo {
    pub reporter: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    error: Option<String>,
    bthash: Option<String>,
    message: Option<String>,
    #[serde(default)]
    reported_to: Vec<ServerReportedTo>,
}

/// Parsed answer of the telemetry server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UreportResponse {
    pub is_error: bool,
    /// Error text or the raw body.
    pub value: Option<String>,
    pub bthash: Option<String>,
    pub message: Option<String>,
    pub reported_to: Vec<ServerReportedTo>,
}

impl UreportResponse {
    fn error(value: impl Into<String>) -> Self {
        Self {
            is_error: true,
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn from_reply(reply: &HttpReply) -> Self {
        match reply.status {
            200..=299 => {}
            404 => return Self::error("The URL does not exist"),
            500 => return Self::error("internal server error"),
            503 => return Self::error("server is temporarily unavailable"),
            status => {
                let body = reply.body.trim();
                return Self::error(if body.is_empty() {
                    format!("HTTP code {status}")
                } else {
                    body.to_string()
                });
            }
        }

        let raw: RawResponse = match serde_json::from_str(&reply.body) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!("unparsable microreport response: {e}");
                return Self::error(format!("Unable to parse response from server: {}", reply.body.trim()));
            }
        };
        if let Some(error) = raw.error {
            return Self::error(error);
        }
        Self {
            is_error: false,
            value: Some(reply.body.clone()),
            bthash: raw.bthash,
            message: raw.message,
            reported_to: raw.reported_to,
        }
    }
}

/// Problem type as the telemetry server names it.
fn problem_type(analyzer: &str) -> String {
    match analyzer {
        "CCpp" => "core".into(),
        "Python" | "Python3" => "python".into(),
        "Kerneloops" | "vmcore" => "kerneloops".into(),
        "Java" => "java".into(),
        other => other.to_ascii_lowercase(),
    }
}

/// Builds the microreport JSON document.
pub fn build_ureport(data: &ProblemData, settings: &UreportSettings) -> Result<String, ReportError> {
    let analyzer = data
        .get("type")
        .or_else(|| data.get("analyzer"))
        .ok_or_else(|| ReportError::Config("Problem data has no 'type' item".into()))?;
    let reason = data
        .get(FILENAME_REASON)
        .ok_or_else(|| ReportError::Config("Problem data has no 'reason' item".into()))?;

    let osinfo = data.os_info();
    let os = json!({
        "name": osinfo.get("ID").or_else(|| osinfo.get("NAME")),
        "version": osinfo.get("VERSION_ID"),
        "architecture": data.get("architecture"),
    });

    let count = data
        .get(FILENAME_COUNT)
        .and_then(|c| c.trim().parse::<u64>().ok())
        .unwrap_or(1);
    let problem = json!({
        "type": problem_type(analyzer),
        "component": data.get("component").or_else(|| data.get("pkg_name")),
        "executable": data.get(FILENAME_EXECUTABLE),
        "crash_function": data.get("crash_function"),
        "count": count,
    });

    let packages: Vec<Value> = match data.get("pkg_name") {
        Some(name) => vec![json!({
            "name": name,
            "epoch": data.get("pkg_epoch").and_then(|e| e.parse::<u64>().ok()).unwrap_or(0),
            "version": data.get("pkg_version"),
            "release": data.get("pkg_release"),
            "architecture": data.get("pkg_arch"),
            "package_role": "affected",
        })],
        None => Vec::new(),
    };

    let mut report = json!({
        "ureport_version": UREPORT_VERSION,
        "reason": reason,
        "reporter": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "os": os,
        "problem": problem,
        "packages": packages,
    });

    if settings.include_auth_data {
        let auth: Map<String, Value> = settings
            .auth_data_items
            .iter()
            .filter_map(|item| data.get(item).map(|v| (item.clone(), Value::from(v))))
            .collect();
        if !auth.is_empty() {
            report["auth"] = Value::Object(auth);
        }
    }

    Ok(serde_json::to_string(&report)?)
}

/// Client for the telemetry endpoint.
///
/// Keeps its own credentials; a 401 prompts for new ones which the caller
/// can pick up through [`MicroreportClient::credentials`].
#[derive(Debug)]
pub struct MicroreportClient<T> {
    transport: T,
    settings: UreportSettings,
    credentials: Credentials,
    verbosity: u8,
}

impl<T: MicroreportTransport> MicroreportClient<T> {
    pub fn new(transport: T, settings: UreportSettings, credentials: Credentials) -> Self {
        Self {
            transport,
            settings,
            credentials,
            verbosity: 0,
        }
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn settings(&self) -> &UreportSettings {
        &self.settings
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = credentials;
    }

    /// `None` when no response was received.
    async fn post<P: Prompter + ?Sized>(
        &mut self,
        action: &str,
        body: &str,
        prompter: &P,
    ) -> Result<Option<UreportResponse>, ReportError> {
        let url = concat_url(&self.settings.url, action);
        let url = url.as_str();
        let transport = &self.transport;

        let reply = with_credential_retry(&mut self.credentials, prompter, |c| async move {
            transport.post_json(&c, url, body).await
        })
        .await?;

        match reply {
            Ok(reply) => Ok(Some(UreportResponse::from_reply(&reply))),
            Err(e) => {
                tracing::warn!("{e}");
                Ok(None)
            }
        }
    }

    /// Submits the microreport of the problem in `dump_dir`.
    ///
    /// Returns the bthash, or `None` when no microreport could be sent.
    /// A problem already carrying a `uReport` entry is not sent again.
    pub async fn submit<P: Prompter + ?Sized>(
        &mut self,
        dump_dir: &Path,
        data: &ProblemData,
        prompter: &P,
    ) -> Result<Option<String>, ReportError> {
        let previous = DumpDir::open(dump_dir, OpenMode::ReadOnly)?.find_reported_to(UREPORT_LABEL)?;
        if let Some(previous) = previous {
            tracing::info!(
                "microreport already submitted, bthash {}",
                previous.bthash.as_deref().unwrap_or("unknown")
            );
            return Ok(previous.bthash);
        }

        let body = match build_ureport(data, &self.settings) {
            Ok(body) => body,
            Err(e) => {
                eprintln!(
                    "{} Failed to generate microreport from the problem data: {e}",
                    "warning".yellow()
                );
                return Ok(None);
            }
        };

        let response = match self.post(SUBMIT_ACTION, &body, prompter).await? {
            Some(response) if !response.is_error => response,
            Some(response) => {
                if self.verbosity > 2 {
                    eprintln!(
                        "{} Server responded with an error: '{}'",
                        "error".red(),
                        response.value.as_deref().unwrap_or_default()
                    );
                }
                eprintln!("{} Failed on submitting the problem", "error".red());
                return Ok(None);
            }
            None => {
                eprintln!("{} Failed on submitting the problem", "error".red());
                return Ok(None);
            }
        };

        let Some(bthash) = response.bthash.clone() else {
            eprintln!("{} Server response carries no bthash", "error".red());
            return Ok(None);
        };
        self.record(dump_dir, &bthash, &response);
        if let Some(message) = &response.message {
            eprintln!("{} {message}", "warning".yellow());
        }
        Ok(Some(bthash))
    }

    /// Writes the `uReport` entry and the server's URL entries.
    fn record(&self, dump_dir: &Path, bthash: &str, response: &UreportResponse) {
        let dd = match DumpDir::open(dump_dir, OpenMode::ReadWrite) {
            Ok(dd) => dd,
            Err(e) => {
                eprintln!("{} {e}", "warning".yellow());
                return;
            }
        };
        let now = chrono::Utc::now().timestamp();

        let mut entries = vec![ReportResult {
            label: UREPORT_LABEL.into(),
            url: Some(concat_url(&self.settings.url, &format!("reports/bthash/{bthash}"))),
            bthash: Some(bthash.into()),
            timestamp: Some(now),
            msg: None,
        }];
        entries.extend(
            response
                .reported_to
                .iter()
                .filter(|r| r.kind == "url")
                .map(|r| ReportResult {
                    label: r.reporter.clone(),
                    url: Some(r.value.clone()),
                    timestamp: Some(now),
                    ..Default::default()
                }),
        );

        for entry in &entries {
            if let Err(e) = dd.add_reported_to(entry) {
                eprintln!("{} {e}", "warning".yellow());
            }
        }
    }

    /// Attaches `key = value` to the microreport `bthash`.
    ///
    /// Returns whether the server accepted it.
    pub async fn attach<P: Prompter + ?Sized>(
        &mut self,
        bthash: &str,
        key: &str,
        value: &str,
        prompter: &P,
    ) -> Result<bool, ReportError> {
        let body = json!({ "bthash": bthash, "type": key, "data": value }).to_string();
        match self.post(ATTACH_ACTION, &body, prompter).await? {
            Some(response) if !response.is_error => Ok(true),
            Some(response) => {
                tracing::warn!(
                    "attaching {key} to {bthash} failed: {}",
                    response.value.as_deref().unwrap_or_default()
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Transport answering from a queue and recording every request.
    #[derive(Debug, Default)]
    pub struct FakeTelemetry {
        pub replies: RefCell<VecDeque<HttpReply>>,
        pub requests: RefCell<Vec<(String, String, Credentials)>>,
    }

    impl FakeTelemetry {
        pub fn reply(self, status: u16, body: &str) -> Self {
            self.replies.borrow_mut().push_back(HttpReply {
                status,
                body: body.into(),
            });
            self
        }

        pub fn urls(&self) -> Vec<String> {
            self.requests.borrow().iter().map(|r| r.0.clone()).collect()
        }
    }

    impl MicroreportTransport for &FakeTelemetry {
        async fn post_json(
            &self,
            creds: &Credentials,
            url: &str,
            body: &str,
        ) -> Result<HttpReply, ReportError> {
            self.requests
                .borrow_mut()
                .push((url.into(), body.into(), creds.clone()));
            self.replies
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| ReportError::Http("connection refused".into()))
        }
    }
}
