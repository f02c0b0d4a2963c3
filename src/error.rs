//! Error type shared by every reporting stage.

use thiserror::Error;

/// Exit status used when the user declines a prompt or leaves a
/// credential prompt empty.
pub const EXIT_CANCEL_BY_USER: u8 = 69;

/// Errors that stop a report.
///
/// Failures that a portal reports in its response are not errors at this
/// level; they travel inside [`crate::SubmissionResult`] so the credential
/// loop can look at the HTTP status.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Cancelled(String),

    #[error("{0}")]
    Archive(String),

    #[error("{0}")]
    CaseCreation(String),

    #[error("{0}")]
    Attach(String),

    #[error("Can't attach: problem data in '{0}' was not reported to RHTSupport and therefore has no URL")]
    NotReported(String),

    #[error("{0}")]
    DumpDir(String),

    #[error("{0}")]
    Template(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReportError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            ReportError::Cancelled(_) => EXIT_CANCEL_BY_USER,
            _ => 1,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReportError::Cancelled(_))
    }
}

/// Folds a possibly multi-line server message into one log line.
///
/// Every newline becomes a space and trailing spaces are dropped.
pub fn single_line(message: &str) -> String {
    let joined = message.replace('\n', " ");
    joined.trim_end_matches(' ').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_maps_to_cancel_exit_code() {
        let err = ReportError::Cancelled("Can't continue without login".into());
        assert_eq!(err.exit_code(), EXIT_CANCEL_BY_USER);
        assert!(err.is_cancelled());
        assert_eq!(ReportError::Archive("x".into()).exit_code(), 1);
    }

    #[test]
    fn single_line_joins_and_trims() {
        let msg = "Error in case creation at 'u', server says: '<html>\n<body>oops</body>\n</html>\n\n'\n\n";
        let folded = single_line(msg);
        assert!(!folded.contains('\n'));
        assert!(!folded.ends_with(' '));
        assert!(folded.starts_with("Error in case creation"));
    }

    #[test]
    fn single_line_keeps_plain_text() {
        assert_eq!(single_line("no newlines"), "no newlines");
        assert_eq!(single_line(""), "");
    }

    #[test]
    fn not_reported_names_directory() {
        let err = ReportError::NotReported("/var/spool/abrt/ccpp-1".into());
        assert!(err.to_string().contains("was not reported to RHTSupport"));
        assert!(err.to_string().contains("/var/spool/abrt/ccpp-1"));
    }
}
