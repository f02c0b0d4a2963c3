//! The submission flow: from a dump directory to a support case.
//!
//! ```text
//! credentials → mode → pre-flight prompts → format → microreport
//!   → workspace + archive → [hints] → [create case + link microreport]
//!   → bulk drop + comment | direct attachment → cleanup
//! ```
//!
//! The workspace is removed on every path once it exists; a fatal error is
//! returned only after that.

use std::fs;
use std::path::{Path, PathBuf};

use colored::Colorize;

use crate::archive::ArchiveBuilder;
use crate::config::{Credentials, Settings, UreportSettings};
use crate::credentials::{complete_credentials, with_credential_retry, Prompter};
use crate::dump_dir::{DumpDir, OpenMode, ReportResult};
use crate::error::{single_line, ReportError};
use crate::hints::check_for_hints;
use crate::portal::{BulkDrop, MicroreportTransport, NewCase, SubmissionResult, SupportPortal};
use crate::problem_data::{
    ProblemData, Reproducibility, FILENAME_COUNT, FILENAME_EXECUTABLE, FILENAME_PACKAGE,
    FILENAME_PKG_VENDOR, NOT_PACKAGED, RED_HAT_VENDOR, UNKNOWN_VENDOR,
};
use crate::template::{ProblemReport, ReportFormatter};
use crate::transport::{bulk_drop_comment, should_query_hints, Delivery};
use crate::ureport::{MicroreportClient, ATTACH_EMAIL, ATTACH_RHCID};
use crate::workspace::Workspace;

/// `reported_to` label of support cases.
pub const RHTSUPPORT_LABEL: &str = "RHTSupport";

const CANCELLED: &str = "Cancelled by user";

/// What the reporter was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Open a new case.
    NewCase,
    /// Attach to the case recorded in the dump directory (`-t`).
    AttachToReported,
    /// Attach to the case with this id (`-tID`).
    AttachToCase(String),
}

#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub dump_dir: PathBuf,
    pub mode: Mode,
    /// Files attached as they are instead of the problem data archive.
    pub files: Vec<PathBuf>,
    /// Report again even if a case was already created.
    pub force: bool,
    /// Only format the report.
    pub debug: bool,
    pub template: Option<PathBuf>,
}

impl ReportRequest {
    pub fn new(dump_dir: impl Into<PathBuf>, mode: Mode) -> Self {
        Self {
            dump_dir: dump_dir.into(),
            mode,
            files: Vec::new(),
            force: false,
            debug: false,
            template: None,
        }
    }
}

/// How a run ended without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    CaseCreated { url: String },
    /// The archive went to an existing case.
    ProblemDataAttached { url: String },
    FilesAttached { url: String, count: usize },
    /// The user chose not to open a case.
    Declined,
    /// `-D`: the formatted report, nothing was sent.
    Debug(ProblemReport),
}

enum Target {
    New(NewCase),
    Existing(String),
}

fn progress(message: impl AsRef<str>) {
    eprintln!("{}", message.as_ref());
}

/// Drives one report against a portal.
pub struct Reporter<S, T, B, P> {
    settings: Settings,
    portal: S,
    ureport: MicroreportClient<T>,
    bulk: B,
    prompter: P,
    archiver: ArchiveBuilder,
    creds: Credentials,
}

impl<S, T, B, P> Reporter<S, T, B, P>
where
    S: SupportPortal,
    T: MicroreportTransport,
    B: BulkDrop,
    P: Prompter,
{
    pub fn new(
        settings: Settings,
        ureport_settings: UreportSettings,
        portal: S,
        telemetry: T,
        bulk: B,
        prompter: P,
    ) -> Self {
        let creds = settings.credentials.clone();
        let ureport = MicroreportClient::new(telemetry, ureport_settings, creds.clone())
            .with_verbosity(settings.verbosity);
        Self {
            settings,
            portal,
            ureport,
            bulk,
            prompter,
            archiver: ArchiveBuilder::new(),
            creds,
        }
    }

    pub fn with_archiver(mut self, archiver: ArchiveBuilder) -> Self {
        self.archiver = archiver;
        self
    }

    /// Credentials as they stand after the run, including re-prompts.
    pub fn credentials(&self) -> &Credentials {
        &self.creds
    }

    pub async fn run(&mut self, req: &ReportRequest) -> Result<Outcome, ReportError> {
        complete_credentials(&mut self.creds, &self.prompter)?;
        self.ureport.set_credentials(self.creds.clone());

        let existing = match &req.mode {
            Mode::NewCase if !req.files.is_empty() => {
                return Err(ReportError::Config(
                    "FILE arguments are only accepted together with -t".into(),
                ))
            }
            Mode::NewCase => None,
            Mode::AttachToReported => Some(reported_case_url(&req.dump_dir)?),
            Mode::AttachToCase(id) => Some(self.settings.case_url(id)),
        };

        if let Some(url) = &existing {
            if !req.files.is_empty() {
                return self.attach_files(url, &req.files).await;
            }
        }

        let dd = DumpDir::open(&req.dump_dir, OpenMode::ReadOnly)?;
        let mut data = ProblemData::load(&dd)?;
        let package = data.get(FILENAME_PACKAGE).map(String::from);

        if existing.is_none() && !self.confirm_new_case(req, &dd, &mut data)? {
            return Ok(Outcome::Declined);
        }
        if data.get(FILENAME_PKG_VENDOR).is_none() {
            data.add_text(FILENAME_PKG_VENDOR, UNKNOWN_VENDOR);
        }

        let formatter = match &req.template {
            Some(path) => ReportFormatter::load_file(path)?,
            None => ReportFormatter::builtin()?,
        };
        let archive_name = format!("{}.tar.gz", dd.basename());
        let mut report = formatter.generate(&data);
        report.append_attachment_note(&archive_name);
        if req.debug {
            return Ok(Outcome::Debug(report));
        }

        let mut bthash = None;
        let target = match existing {
            Some(url) => Target::Existing(url),
            None => {
                let (product, version) = data.rhts_product().ok_or_else(|| {
                    ReportError::Config("Can't determine RH Support Product from problem data.".into())
                })?;
                if self.settings.submit_ureport {
                    progress("Sending ABRT crash statistics data");
                    bthash = self.ureport.submit(&req.dump_dir, &data, &self.prompter).await?;
                    self.adopt_ureport_credentials();
                }
                Target::New(NewCase {
                    product,
                    version,
                    summary: report.summary,
                    description: report.description,
                    package,
                })
            }
        };

        progress("Compressing data");
        let workspace = Workspace::create(&self.settings.scratch_dir, &archive_name)?;
        let result = self
            .submit_archive(&dd, &data, workspace.archive_path(), target, bthash)
            .await;
        workspace.cleanup();
        result
    }

    /// Questions asked before a new case is opened.
    ///
    /// `Ok(false)` means the user does not want to report again; the other
    /// refusals are cancellations.
    fn confirm_new_case(
        &self,
        req: &ReportRequest,
        dd: &DumpDir,
        data: &mut ProblemData,
    ) -> Result<bool, ReportError> {
        if let Some(url) = dd.find_reported_to(RHTSUPPORT_LABEL)?.and_then(|r| r.url) {
            if !req.force
                && !self.prompter.ask_yes_no(&format!(
                    "This problem was already reported to RHTS (see '{url}'). \
                     Do you still want to create a RHTSupport ticket?"
                ))
            {
                return Ok(false);
            }
        }

        // count can lie, so reproducibility has the last word
        let unknown_reproducibility = data
            .reproducible()
            .map_or(true, |r| r <= Reproducibility::Unknown);
        if data.get(FILENAME_COUNT) == Some("1")
            && unknown_reproducibility
            && !self.prompter.ask_yes_no(
                "The problem has only occurred once and the ability to reproduce \
                 the problem is unknown. Please ensure you will be able to \
                 provide detailed information to our Support Team. \
                 Would you like to continue and open a new support case?",
            )
        {
            return Err(ReportError::Cancelled(CANCELLED.into()));
        }

        let packaged = data.get(FILENAME_PACKAGE).is_some();
        if let Some(vendor) = data.get(FILENAME_PKG_VENDOR) {
            if packaged
                && vendor != RED_HAT_VENDOR
                && !self.prompter.ask_yes_no(&format!(
                    "The crashed program was released by '{vendor}'. \
                     Would you like to report the problem to Red Hat Support?"
                ))
            {
                return Err(ReportError::Cancelled(CANCELLED.into()));
            }
        }

        if !packaged {
            let executable = data.get(FILENAME_EXECUTABLE).unwrap_or_default().to_string();
            if !self.prompter.ask_yes_no(&format!(
                "The program '{executable}' does not appear to be provided by Red Hat. \
                 Would you like to report the problem to Red Hat Support?"
            )) {
                return Err(ReportError::Cancelled(CANCELLED.into()));
            }
            data.add_text(FILENAME_PACKAGE, NOT_PACKAGED);
        }
        Ok(true)
    }

    async fn attach_files(&mut self, url: &str, files: &[PathBuf]) -> Result<Outcome, ReportError> {
        let portal = &self.portal;
        for file in files {
            progress(format!("Attaching '{}' to case '{url}'", file.display()));
            let file = file.as_path();
            let result = with_credential_retry(&mut self.creds, &self.prompter, |c| async move {
                portal.attach_file(&c, url, file).await
            })
            .await?;
            if result.error {
                return Err(ReportError::Attach(single_line(result.message_or_default())));
            }
            progress(format!("Attachment URL:{}", result.url.as_deref().unwrap_or_default()));
            progress("File attached successfully");
        }
        Ok(Outcome::FilesAttached {
            url: url.to_string(),
            count: files.len(),
        })
    }

    /// Everything that needs the archive. Runs inside the workspace.
    async fn submit_archive(
        &mut self,
        dd: &DumpDir,
        data: &ProblemData,
        archive: &Path,
        target: Target,
        bthash: Option<String>,
    ) -> Result<Outcome, ReportError> {
        let built = self
            .archiver
            .spawn_build(archive.to_path_buf(), dd.path().to_path_buf(), data.clone())
            .await;
        if let Err(e) = built {
            eprintln!("{} {e}", "error".red());
            return Err(ReportError::Archive(format!(
                "Can't create temporary file in {}",
                self.settings.scratch_dir.display()
            )));
        }
        let size = fs::metadata(archive)?.len();
        tracing::debug!("archive {} is {size} bytes", archive.display());

        let (url, created) = match target {
            Target::Existing(url) => (url, false),
            Target::New(case) => {
                if should_query_hints(size) {
                    progress("Checking for hints");
                    let hints_url = self.settings.hints_url();
                    if check_for_hints(&self.portal, &mut self.creds, &self.prompter, &hints_url, archive)
                        .await?
                    {
                        return Ok(Outcome::Declined);
                    }
                }

                progress("Creating a new case");
                let url = self.create_case(dd.path(), &case).await?;
                if let Some(bthash) = &bthash {
                    self.link_ureport(bthash, &url).await?;
                }
                (url, true)
            }
        };

        let attached = self.deliver(&url, archive, size).await?;
        if attached.error {
            let message = single_line(attached.message_or_default());
            if created {
                eprintln!(
                    "{} Case created but failed to attach problem data: {message}",
                    "warning".yellow()
                );
            } else {
                eprintln!("{} Failed to attach problem data: {message}", "warning".yellow());
            }
        }

        Ok(if created {
            Outcome::CaseCreated { url }
        } else {
            Outcome::ProblemDataAttached { url }
        })
    }

    async fn create_case(&mut self, dump_dir: &Path, case: &NewCase) -> Result<String, ReportError> {
        let portal = &self.portal;
        let result = with_credential_retry(&mut self.creds, &self.prompter, |c| async move {
            portal.create_case(&c, case).await
        })
        .await?;
        if result.error {
            return Err(ReportError::CaseCreation(single_line(result.message_or_default())));
        }
        let url = result.url.clone().ok_or_else(|| {
            ReportError::CaseCreation("Case was created but the portal returned no URL".into())
        })?;

        record_case(dump_dir, &url, &result);
        if let Some(message) = &result.message {
            progress(message);
        }
        progress(format!("URL={url}"));
        Ok(url)
    }

    async fn link_ureport(&mut self, bthash: &str, case_url: &str) -> Result<(), ReportError> {
        progress("Linking ABRT crash statistics record with the case");
        self.ureport.set_credentials(self.creds.clone());
        self.ureport
            .attach(bthash, ATTACH_RHCID, case_url, &self.prompter)
            .await?;

        if let Some(email) = self.ureport.settings().contact_email.clone() {
            progress(format!(
                "Linking ABRT crash statistics record with contact email: '{email}'"
            ));
            self.ureport
                .attach(bthash, ATTACH_EMAIL, &email, &self.prompter)
                .await?;
        }
        self.adopt_ureport_credentials();
        Ok(())
    }

    /// Bulk drop plus comment for big archives, direct attachment otherwise
    /// or when the drop fails.
    async fn deliver(&mut self, url: &str, archive: &Path, size: u64) -> Result<SubmissionResult, ReportError> {
        let remote = match Delivery::for_size(size, self.settings.big_size_mb) {
            Delivery::BulkDrop => match self.bulk.upload(&self.settings.big_file_url, archive).await {
                Ok(remote) => Some(remote),
                Err(e) => {
                    eprintln!("{} {e}", "error".red());
                    None
                }
            },
            Delivery::Attach => None,
        };

        let portal = &self.portal;
        match remote {
            Some(remote) => {
                progress(format!("Adding comment to case '{url}'"));
                let text = bulk_drop_comment(&remote);
                let text = text.as_str();
                with_credential_retry(&mut self.creds, &self.prompter, |c| async move {
                    portal.add_comment(&c, url, text).await
                })
                .await
            }
            None => {
                progress(format!("Attaching problem data to case '{url}'"));
                with_credential_retry(&mut self.creds, &self.prompter, |c| async move {
                    portal.attach_file(&c, url, archive).await
                })
                .await
            }
        }
    }

    fn adopt_ureport_credentials(&mut self) {
        if self.creds.update_from(self.ureport.credentials()) {
            tracing::debug!("using credentials updated by the microreport client");
        }
    }
}

/// URL of the case this problem was reported to.
fn reported_case_url(dump_dir: &Path) -> Result<String, ReportError> {
    DumpDir::open(dump_dir, OpenMode::ReadOnly)?
        .find_reported_to(RHTSUPPORT_LABEL)?
        .and_then(|r| r.url)
        .ok_or_else(|| ReportError::NotReported(dump_dir.display().to_string()))
}

fn record_case(dump_dir: &Path, url: &str, result: &SubmissionResult) {
    let entry = ReportResult {
        label: RHTSUPPORT_LABEL.into(),
        url: Some(url.into()),
        msg: result.message.clone(),
        bthash: None,
        timestamp: Some(chrono::Utc::now().timestamp()),
    };
    let recorded = DumpDir::open(dump_dir, OpenMode::ReadWrite).and_then(|dd| dd.add_reported_to(&entry));
    if let Err(e) = recorded {
        eprintln!("{} {e}", "error".red());
    }
}
