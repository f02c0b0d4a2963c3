//! rhtsupport-reporter - report crash dump directories to Red Hat Support
//!
//! Packs an ABRT problem directory into a `.tar.gz` archive and opens a
//! support case with it, or attaches it (or arbitrary files) to an existing
//! case.
//!
//! # Features
//!
//! - Archive with a `content.xml` manifest, compressed by a gzip child
//! - Re-prompting for credentials whenever the portal answers 401
//! - Hint check against known problems before a case is opened
//! - Microreport submission and linking to the created case
//! - Bulk drop upload (FTP or HTTP PUT) for large archives
//!
//! # Example
//!
//! ```rust,no_run
//! use rhtsupport_reporter::{
//!     DropUploader, HttpPortal, Mode, ReportRequest, Reporter, Settings, TerminalPrompter,
//!     UreportSettings,
//! };
//!
//! # async fn run() -> Result<(), rhtsupport_reporter::ReportError> {
//! let settings = Settings::default();
//! let ureport = UreportSettings::resolve(&Default::default(), &Default::default(), &settings);
//! let portal = HttpPortal::new(&settings)?;
//! let bulk = DropUploader::new(&settings)?;
//!
//! let mut reporter = Reporter::new(
//!     settings,
//!     ureport,
//!     portal.clone(),
//!     portal,
//!     bulk,
//!     TerminalPrompter,
//! );
//! reporter
//!     .run(&ReportRequest::new("/var/spool/abrt/ccpp-1", Mode::NewCase))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod compression;
pub mod config;
pub mod credentials;
pub mod dump_dir;
pub mod error;
pub mod hints;
pub mod portal;
pub mod problem_data;
pub mod reporter;
pub mod template;
pub mod transport;
pub mod ureport;
pub mod workspace;
pub mod xml;

pub use archive::{ArchiveBuilder, Manifest};
pub use config::{ConfMap, Credentials, Settings, UreportSettings};
pub use credentials::{with_credential_retry, PortalOutcome, Prompter, TerminalPrompter};
pub use dump_dir::{DumpDir, OpenMode, ReportResult};
pub use error::{ReportError, EXIT_CANCEL_BY_USER};
pub use portal::{
    BulkDrop, DropUploader, HttpPortal, HttpReply, MicroreportTransport, NewCase,
    SubmissionResult, SupportPortal,
};
pub use problem_data::{ProblemData, ProblemItem, Reproducibility};
pub use reporter::{Mode, Outcome, ReportRequest, Reporter};
pub use template::{ProblemReport, ReportFormatter};
pub use transport::Delivery;
pub use ureport::{MicroreportClient, UreportResponse};
