//! Support portal clients.
//!
//! The reporter talks to three services, each behind a trait so the
//! submission flow can be driven without a network:
//!
//! - [`SupportPortal`]: cases, attachments, comments and hints
//! - [`MicroreportTransport`]: the telemetry (uReport) endpoint
//! - [`BulkDrop`]: the large file drop
//!
//! [`HttpPortal`] and [`DropUploader`] are the real implementations.

mod bulk_drop;
mod http;

pub use bulk_drop::DropUploader;
pub use http::HttpPortal;

use std::path::Path;

use crate::config::Credentials;
use crate::credentials::PortalOutcome;
use crate::error::ReportError;

/// Outcome of one portal call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionResult {
    pub error: bool,
    /// 0 when no HTTP response was received.
    pub http_status: u16,
    pub message: Option<String>,
    /// URL of the created case, attachment or comment.
    pub url: Option<String>,
    pub body: Option<String>,
}

impl SubmissionResult {
    pub fn success(http_status: u16, url: Option<String>, body: Option<String>) -> Self {
        Self {
            error: false,
            http_status,
            message: None,
            url,
            body,
        }
    }

    pub fn failure(http_status: u16, message: impl Into<String>) -> Self {
        Self {
            error: true,
            http_status,
            message: Some(message.into()),
            url: None,
            body: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn message_or_default(&self) -> &str {
        self.message.as_deref().unwrap_or("(no message)")
    }
}

impl PortalOutcome for SubmissionResult {
    fn is_error(&self) -> bool {
        self.error
    }

    fn http_status(&self) -> u16 {
        self.http_status
    }
}

/// Raw HTTP reply from the microreport endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl PortalOutcome for HttpReply {
    fn is_error(&self) -> bool {
        !(200..300).contains(&self.status)
    }

    fn http_status(&self) -> u16 {
        self.status
    }
}

impl<T: PortalOutcome> PortalOutcome for Result<T, ReportError> {
    fn is_error(&self) -> bool {
        self.as_ref().map(PortalOutcome::is_error).unwrap_or(true)
    }

    fn http_status(&self) -> u16 {
        self.as_ref().map(PortalOutcome::http_status).unwrap_or(0)
    }
}

/// Data for a new support case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCase {
    pub product: String,
    pub version: Option<String>,
    pub summary: String,
    pub description: String,
    /// Crashed package, sent as the case component.
    pub package: Option<String>,
}

#[allow(async_fn_in_trait)]
pub trait SupportPortal {
    async fn create_case(&self, creds: &Credentials, case: &NewCase) -> SubmissionResult;

    async fn attach_file(&self, creds: &Credentials, case_url: &str, file: &Path)
        -> SubmissionResult;

    async fn add_comment(&self, creds: &Credentials, case_url: &str, text: &str)
        -> SubmissionResult;

    /// Uploads the archive to the hint service; the body carries the hints.
    async fn query_hints(&self, creds: &Credentials, file: &Path) -> SubmissionResult;
}

#[allow(async_fn_in_trait)]
pub trait MicroreportTransport {
    /// POSTs a JSON document; `Err` only when no response was received.
    async fn post_json(
        &self,
        creds: &Credentials,
        url: &str,
        body: &str,
    ) -> Result<HttpReply, ReportError>;
}

#[allow(async_fn_in_trait)]
pub trait BulkDrop {
    /// Uploads `file` below `drop_url` and returns the remote file name.
    async fn upload(&self, drop_url: &str, file: &Path) -> Result<String, ReportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_outcome_maps_transport_errors() {
        let ok: Result<HttpReply, ReportError> = Ok(HttpReply {
            status: 401,
            body: String::new(),
        });
        assert!(ok.is_auth_failure());

        let err: Result<HttpReply, ReportError> = Err(ReportError::Http("refused".into()));
        assert!(err.is_error());
        assert_eq!(err.http_status(), 0);
        assert!(!err.is_auth_failure());
    }

    #[test]
    fn submission_result_constructors() {
        let ok = SubmissionResult::success(201, Some("https://portal/cases/1".into()), None);
        assert!(!ok.is_error());
        let bad = SubmissionResult::failure(500, "boom");
        assert!(bad.is_error());
        assert_eq!(bad.message_or_default(), "boom");
    }
}
