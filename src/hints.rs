//! Pre-submission hint check.
//!
//! Small archives are uploaded to the portal's problem service first. When
//! it knows articles about the problem, the user may stop before a case is
//! opened.

use std::path::Path;

use colored::Colorize;
use regex::Regex;

use crate::config::Credentials;
use crate::credentials::{with_credential_retry, Prompter};
use crate::error::ReportError;
use crate::portal::SupportPortal;
use crate::xml;

const CREATE_ANYWAY: &str = " Do you still want to create a RHTSupport ticket?";

/// A knowledge base link offered by the portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub title: String,
    pub uri: String,
}

/// Suggestion links from a hint response.
pub fn parse_suggestions(body: &str) -> Vec<Suggestion> {
    let link = Regex::new(r"<link\s+([^>]*?)(?:/>|>([^<]*)</link>)").unwrap();
    let attr = Regex::new(r#"(\w+)\s*=\s*"([^"]*)""#).unwrap();

    link.captures_iter(body)
        .filter_map(|caps| {
            let mut uri = None;
            let mut rel = None;
            for a in attr.captures_iter(&caps[1]) {
                match &a[1] {
                    "uri" => uri = Some(xml::unescape(&a[2])),
                    "rel" => rel = Some(a[2].to_string()),
                    _ => {}
                }
            }
            if rel.as_deref() != Some("suggestion") {
                return None;
            }
            let title = caps
                .get(2)
                .map(|t| xml::unescape(t.as_str().trim()))
                .unwrap_or_default();
            Some(Suggestion { title, uri: uri? })
        })
        .collect()
}

/// Human readable hint text, or `None` when the response has nothing to say.
///
/// Non-XML bodies are shown as they are.
pub fn hint_text(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    if !body.starts_with('<') {
        return Some(body.to_string());
    }

    let suggestions = parse_suggestions(body);
    if suggestions.is_empty() {
        return None;
    }
    let mut text = String::from("Red Hat Support may already know about this problem:\n");
    for s in &suggestions {
        if s.title.is_empty() {
            text.push_str(&format!("  {}\n", s.uri));
        } else {
            text.push_str(&format!("  {}: {}\n", s.title, s.uri));
        }
    }
    Some(text.trim_end().to_string())
}

/// Uploads `archive` to the hint service and asks whether to go on.
///
/// Returns `Ok(true)` when the user chose not to create a case. Failures of
/// the hint service itself are logged and never stop the report.
pub async fn check_for_hints<S, P>(
    portal: &S,
    creds: &mut Credentials,
    prompter: &P,
    hints_url: &str,
    archive: &Path,
) -> Result<bool, ReportError>
where
    S: SupportPortal,
    P: Prompter + ?Sized,
{
    let result = with_credential_retry(creds, prompter, |c| async move {
        portal.query_hints(&c, archive).await
    })
    .await?;

    if result.error {
        eprintln!(
            "{} Error in file upload at '{}', HTTP code: {}",
            "error".red(),
            hints_url,
            result.http_status
        );
        tracing::debug!("hint query failed: {}", result.message_or_default());
        return Ok(false);
    }

    let Some(hint) = result.body.as_deref().and_then(hint_text) else {
        return Ok(false);
    };
    Ok(!prompter.ask_yes_no(&format!("{hint}{CREATE_ANYWAY}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::testing::ScriptedPrompter;
    use crate::portal::{NewCase, SubmissionResult};

    const HINT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<problems xmlns="http://www.redhat.com/gss/strata">
  <source>
    <link uri="https://access.redhat.com/solutions/42" rel="suggestion">bash crashes in readline &amp; history</link>
    <link uri="https://access.redhat.com/rs/problems/7" rel="self"/>
  </source>
</problems>"#;

    struct HintPortal(SubmissionResult);

    impl SupportPortal for HintPortal {
        async fn create_case(&self, _: &Credentials, _: &NewCase) -> SubmissionResult {
            unreachable!()
        }
        async fn attach_file(&self, _: &Credentials, _: &str, _: &Path) -> SubmissionResult {
            unreachable!()
        }
        async fn add_comment(&self, _: &Credentials, _: &str, _: &str) -> SubmissionResult {
            unreachable!()
        }
        async fn query_hints(&self, _: &Credentials, _: &Path) -> SubmissionResult {
            self.0.clone()
        }
    }

    #[test]
    fn only_suggestion_links_count() {
        let found = parse_suggestions(HINT_XML);
        assert_eq!(
            found,
            vec![Suggestion {
                title: "bash crashes in readline & history".into(),
                uri: "https://access.redhat.com/solutions/42".into(),
            }]
        );
    }

    #[test]
    fn empty_or_linkless_response_has_no_hint() {
        assert_eq!(hint_text(""), None);
        assert_eq!(hint_text("<problems/>"), None);
        assert_eq!(hint_text("plain text hint").as_deref(), Some("plain text hint"));
    }

    #[test]
    fn hint_lists_titles_and_links() {
        let text = hint_text(HINT_XML).unwrap();
        assert!(text.contains(
            "bash crashes in readline & history: https://access.redhat.com/solutions/42"
        ));
    }

    #[tokio::test]
    async fn declining_cancels_the_case() {
        let portal = HintPortal(SubmissionResult::success(200, None, Some(HINT_XML.into())));
        let prompter = ScriptedPrompter::new().confirm(false);
        let mut creds = Credentials::new("alice", "pw");

        let cancel = check_for_hints(&portal, &mut creds, &prompter, "u", Path::new("a"))
            .await
            .unwrap();

        assert!(cancel);
        let questions = prompter.questions.borrow();
        assert!(questions[0].ends_with("Do you still want to create a RHTSupport ticket?"));
    }

    #[tokio::test]
    async fn no_hints_means_no_question() {
        let portal = HintPortal(SubmissionResult::success(200, None, Some(String::new())));
        let prompter = ScriptedPrompter::new();
        let mut creds = Credentials::new("alice", "pw");

        let cancel = check_for_hints(&portal, &mut creds, &prompter, "u", Path::new("a"))
            .await
            .unwrap();

        assert!(!cancel);
        assert_eq!(prompter.asked(), 0);
    }

    #[tokio::test]
    async fn service_errors_do_not_stop_the_report() {
        let portal = HintPortal(SubmissionResult::failure(503, "unavailable"));
        let prompter = ScriptedPrompter::new();
        let mut creds = Credentials::new("alice", "pw");

        let cancel = check_for_hints(&portal, &mut creds, &prompter, "u", Path::new("a"))
            .await
            .unwrap();

        assert!(!cancel);
        assert_eq!(prompter.asked(), 0);
    }
}
