//! Report templates.
//!
//! A template is a list of `Section name:: spec` lines. The special
//! `%summary` section is the one-line case summary; every other section
//! ends up in the case description, in template order.
//!
//! Specs come in two forms:
//!
//! - `%bare_ITEM` inserts the raw content of one problem data item
//! - `item1,item2,%reporter` renders an `item: value` list
//!
//! In the summary, `%item%` is replaced by the item's content and a
//! `[[ ... ]]` group disappears entirely when any item it names is missing.

use std::path::Path;

use regex::{Captures, Regex};

use crate::error::ReportError;
use crate::problem_data::ProblemData;

pub const DEFAULT_TEMPLATE: &str = "\
%summary:: [abrt] [[%pkg_name%]][[: %crash_function%()]][[: %reason%]][[: TAINTED %tainted_short%]]

Description of problem:: %bare_comment

Additional info::    count,reason,package,pkg_vendor,cmdline,executable,%reporter

How reproducible:: %bare_reproducible

Steps to reproduce:: %bare_reproducer

Truncated backtrace:: %bare_%short_backtrace

Other report identifiers:: %bare_reported_to
";

pub const ELEMENTS_KB_ARTICLE: &str = "https://access.redhat.com/articles/2134281";

const SUMMARY_SECTION: &str = "%summary";
const SHORT_BACKTRACE: &str = "%short_backtrace";
const SHORT_BACKTRACE_LINES: usize = 20;

/// Summary and description generated for a case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemReport {
    pub summary: String,
    pub description: String,
}

impl ProblemReport {
    /// Tells the support engineer where the problem data went.
    pub fn append_attachment_note(&mut self, tarball_name: &str) {
        self.description.push_str(&format!(
            "\nsosreport and other files were attached as '{tarball_name}' to the case.\n\
             For more details about elements collected by ABRT see:\n\
             {ELEMENTS_KB_ARTICLE}\n"
        ));
    }
}

#[derive(Debug, Clone)]
struct Section {
    name: String,
    spec: String,
}

#[derive(Debug, Clone)]
pub struct ReportFormatter {
    summary: String,
    sections: Vec<Section>,
}

impl ReportFormatter {
    /// Parses template text; `None` on malformed input.
    pub fn parse(text: &str) -> Option<Self> {
        let mut summary = None;
        let mut sections: Vec<Section> = Vec::new();

        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match line.split_once("::") {
                Some((name, spec)) => {
                    let name = name.trim();
                    if name == SUMMARY_SECTION {
                        summary = Some(spec.trim().to_string());
                    } else {
                        sections.push(Section {
                            name: name.to_string(),
                            spec: spec.trim().to_string(),
                        });
                    }
                }
                // continuation of the previous section
                None => {
                    let last = sections.last_mut()?;
                    if !last.spec.is_empty() {
                        last.spec.push(' ');
                    }
                    last.spec.push_str(line.trim());
                }
            }
        }

        Some(Self {
            summary: summary?,
            sections,
        })
    }

    pub fn builtin() -> Result<Self, ReportError> {
        Self::parse(DEFAULT_TEMPLATE)
            .ok_or_else(|| ReportError::Template("Invalid problem report format string".into()))
    }

    pub fn load_file(path: &Path) -> Result<Self, ReportError> {
        let invalid = || ReportError::Template(format!("Invalid format file: {}", path.display()));
        let text = std::fs::read_to_string(path).map_err(|_| invalid())?;
        Self::parse(&text).ok_or_else(invalid)
    }

    pub fn generate(&self, data: &ProblemData) -> ProblemReport {
        let summary = render_summary(&self.summary, data);

        let mut description = String::new();
        for section in &self.sections {
            let body = render_section(&section.spec, data);
            if body.trim().is_empty() {
                continue;
            }
            description.push_str(&format!("{}:\n{}\n\n", section.name, body.trim_end()));
        }

        ProblemReport {
            summary,
            description,
        }
    }
}

fn render_summary(fmt: &str, data: &ProblemData) -> String {
    let group_re = Regex::new(r"\[\[(.*?)\]\]").unwrap();
    let var_re = Regex::new(r"%([A-Za-z0-9_]+)%").unwrap();

    let substitute = |text: &str| -> Option<String> {
        let mut missing = false;
        let out = var_re.replace_all(text, |caps: &Captures| match data.get(&caps[1]) {
            Some(value) => value.lines().next().unwrap_or_default().to_string(),
            None => {
                missing = true;
                String::new()
            }
        });
        let out = out.into_owned();
        (!missing).then_some(out)
    };

    let grouped = group_re.replace_all(fmt, |caps: &Captures| {
        substitute(&caps[1]).unwrap_or_default()
    });
    let flat = var_re.replace_all(&grouped, |caps: &Captures| {
        data.get(&caps[1]).unwrap_or_default().to_string()
    });
    flat.trim().to_string()
}

fn render_section(spec: &str, data: &ProblemData) -> String {
    if let Some(item) = spec.strip_prefix("%bare_") {
        let item = item.trim();
        if item == SHORT_BACKTRACE {
            return short_backtrace(data);
        }
        return data.read_text(item).unwrap_or_default();
    }

    let items: Vec<&str> = spec
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let width = items.iter().map(|s| s.trim_start_matches('%').len()).max().unwrap_or(0) + 1;

    let mut out = String::new();
    for item in items {
        let (name, value) = if item == "%reporter" {
            (
                "reporter".to_string(),
                format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            )
        } else {
            match data.read_text(item) {
                Some(value) => (item.to_string(), value),
                None => continue,
            }
        };
        let value = value.trim_end_matches('\n');
        if value.contains('\n') {
            out.push_str(&format!("{name}:\n"));
            for line in value.lines() {
                out.push_str(&format!(":{line}\n"));
            }
        } else {
            out.push_str(&format!("{:<width$} {value}\n", format!("{name}:")));
        }
    }
    out
}

fn short_backtrace(data: &ProblemData) -> String {
    let Some(bt) = data
        .read_text("backtrace")
        .or_else(|| data.read_text("core_backtrace"))
    else {
        return String::new();
    };
    bt.lines()
        .take(SHORT_BACKTRACE_LINES)
        .collect::<Vec<_>>()
        .join("\n")
}
