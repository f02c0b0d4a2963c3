//! reporter-rhtsupport - report a problem directory to Red Hat Support
//!
//! Creates a support case from an ABRT problem directory, or attaches the
//! problem data (or other files) to an existing case.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{ArgAction, CommandFactory, Parser};
use colored::Colorize;
use rhtsupport_reporter::config::{load_conf_file, DEFAULT_CONF_FILE, DEFAULT_UREPORT_CONF_FILE};
use rhtsupport_reporter::{
    ConfMap, DropUploader, HttpPortal, Mode, Outcome, ReportError, ReportRequest, Reporter,
    Settings, TerminalPrompter, UreportSettings,
};
use tracing::Level;

const USAGE: &str = "\
reporter-rhtsupport [-v] [-c CONFFILE]... [-F FMTFILE] -d DIR
       reporter-rhtsupport [-v] [-c CONFFILE]... [-d DIR] -t[ID] [-u -C UR_CONFFILE] FILE...";

#[derive(Parser, Debug)]
#[command(name = "reporter-rhtsupport", version)]
#[command(about = "Reports a problem to RHTSupport")]
#[command(override_usage = USAGE)]
#[command(after_help = "\
If not specified, CONFFILE defaults to /etc/libreport/plugins/rhtsupport.conf.
Its lines should have 'PARAM = VALUE' format.
Recognized string parameters: URL, Login, Password, BigFileURL.
Recognized numeric parameter: BigSizeMB.
Recognized boolean parameters (VALUE should be 1/0, yes/no): SSLVerify, SubmitUReport.
Parameters can be overridden via $RHTSupport_PARAM environment variables.")]
struct Cli {
    /// Be verbose (repeat for more detail)
    #[arg(short = 'v', action = ArgAction::Count)]
    verbose: u8,

    /// Problem directory
    #[arg(short = 'd', value_name = "DIR", default_value = ".", allow_hyphen_values = true)]
    dump_dir: PathBuf,

    /// Configuration file (may be given many times)
    #[arg(short = 'c', value_name = "FILE", allow_hyphen_values = true)]
    conf: Vec<PathBuf>,

    /// Upload FILEs [to case with this ID]
    #[arg(short = 't')]
    attach: bool,

    /// Case id given as -tID
    #[arg(long = "case-id", value_name = "ID", hide = true, requires = "attach")]
    case_id: Option<String>,

    /// Force reporting even if this problem is already reported
    #[arg(short = 'f')]
    force: bool,

    /// Submit uReport before creating a new case
    #[arg(short = 'u')]
    ureport: bool,

    /// Configuration file for uReport
    #[arg(short = 'C', value_name = "FILE", allow_hyphen_values = true)]
    ureport_conf: Option<PathBuf>,

    /// Formatting file for a new case
    #[arg(short = 'F', value_name = "FILE", allow_hyphen_values = true)]
    format_file: Option<PathBuf>,

    /// Debug: print the formatted report and exit
    #[arg(short = 'D')]
    debug: bool,

    /// Files to attach (with -t)
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,
}

/// Short options whose value is the rest of the token or the next argument.
const VALUE_OPTIONS: [char; 4] = ['d', 'c', 'C', 'F'];

enum ShortCluster {
    Keep,
    /// Ends with a value option; the next argument is its value.
    AwaitsValue,
    Split(Vec<OsString>),
}

/// Walks a short option cluster (without the leading `-`) the way getopt
/// does. A `t` ends the cluster and anything glued after it is the case id.
fn split_cluster(cluster: &str) -> ShortCluster {
    for (i, c) in cluster.char_indices() {
        let rest = &cluster[i + c.len_utf8()..];
        if c == 't' {
            let mut parts = Vec::new();
            if i > 0 {
                parts.push(OsString::from(format!("-{}", &cluster[..i])));
            }
            parts.push(OsString::from("-t"));
            if !rest.is_empty() {
                parts.push(OsString::from(format!("--case-id={rest}")));
            }
            return ShortCluster::Split(parts);
        }
        if VALUE_OPTIONS.contains(&c) {
            return if rest.is_empty() {
                ShortCluster::AwaitsValue
            } else {
                ShortCluster::Keep
            };
        }
    }
    ShortCluster::Keep
}

/// Rewrites a glued `-tID` into `-t --case-id=ID`; a bare `-t` stays.
///
/// Option values and operands after `--` are never touched.
fn normalize_args<I: IntoIterator<Item = OsString>>(args: I) -> Vec<OsString> {
    let mut args = args.into_iter();
    let mut out: Vec<OsString> = args.next().into_iter().collect();
    let mut value_next = false;
    let mut options_done = false;

    for arg in args {
        if options_done || value_next {
            value_next = false;
            out.push(arg);
            continue;
        }
        let Some(text) = arg.to_str() else {
            out.push(arg);
            continue;
        };
        if text == "--" {
            options_done = true;
            out.push(arg);
            continue;
        }
        let Some(cluster) = text
            .strip_prefix('-')
            .filter(|c| !c.is_empty() && !c.starts_with('-'))
        else {
            out.push(arg);
            continue;
        };
        match split_cluster(cluster) {
            ShortCluster::Keep => out.push(arg),
            ShortCluster::AwaitsValue => {
                value_next = true;
                out.push(arg);
            }
            ShortCluster::Split(parts) => out.extend(parts),
        }
    }
    out
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .init();
}

fn load_settings(cli: &Cli, env: &HashMap<String, String>) -> Result<(Settings, UreportSettings), ReportError> {
    let mut conf = ConfMap::new();
    if cli.conf.is_empty() {
        load_conf_file(Path::new(DEFAULT_CONF_FILE), &mut conf);
    }
    for path in &cli.conf {
        if !load_conf_file(path, &mut conf) {
            eprintln!("{} Can't open '{}'", "warning".yellow(), path.display());
        }
    }
    let mut settings = Settings::resolve(&conf, env, cli.ureport)?;
    settings.verbosity = cli.verbose;

    let mut ureport_conf = ConfMap::new();
    match &cli.ureport_conf {
        Some(path) => {
            if !load_conf_file(path, &mut ureport_conf) {
                eprintln!("{} Can't open '{}'", "warning".yellow(), path.display());
            }
        }
        None => {
            load_conf_file(Path::new(DEFAULT_UREPORT_CONF_FILE), &mut ureport_conf);
        }
    }
    let ureport_settings = UreportSettings::resolve(&ureport_conf, env, &settings);

    Ok((settings, ureport_settings))
}

async fn run(cli: Cli) -> Result<(), ReportError> {
    let env: HashMap<String, String> = std::env::vars().collect();
    let (settings, ureport_settings) = load_settings(&cli, &env)?;

    let mode = match (cli.attach, cli.case_id) {
        (false, _) => Mode::NewCase,
        (true, None) => Mode::AttachToReported,
        (true, Some(id)) => Mode::AttachToCase(id),
    };
    let request = ReportRequest {
        dump_dir: cli.dump_dir,
        mode,
        files: cli.files,
        force: cli.force,
        debug: cli.debug,
        template: cli.format_file,
    };

    let portal = HttpPortal::new(&settings)?;
    let bulk = DropUploader::new(&settings)?;
    let mut reporter = Reporter::new(
        settings,
        ureport_settings,
        portal.clone(),
        portal,
        bulk,
        TerminalPrompter,
    );

    match reporter.run(&request).await? {
        Outcome::Debug(report) => {
            print!("summary: {}\n\n{}\n", report.summary, report.description);
        }
        Outcome::CaseCreated { url } | Outcome::ProblemDataAttached { url } => {
            eprintln!("{} {}", "✓".green(), url);
        }
        Outcome::FilesAttached { url, count } => {
            eprintln!("{} {} file(s) attached to {}", "✓".green(), count, url);
        }
        Outcome::Declined => tracing::info!("nothing reported"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_from(normalize_args(std::env::args_os()));
    if !cli.attach && !cli.files.is_empty() {
        Cli::command()
            .error(
                ErrorKind::UnknownArgument,
                "FILE arguments are only accepted together with -t",
            )
            .exit();
    }
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_cancelled() => {
            eprintln!("{e}");
            ExitCode::from(e.exit_code())
        }
        Err(e) => {
            eprintln!("{} {}", "error".red(), e);
            ExitCode::from(e.exit_code())
        }
    }
}
