//! Interactive prompts and the invalid-credentials retry loop.

use std::future::Future;
use std::io::{BufRead, Write};

use colored::Colorize;

use crate::config::Credentials;
use crate::error::ReportError;

pub const HTTP_UNAUTHORIZED: u16 = 401;

/// Questions asked on the terminal.
pub trait Prompter {
    /// Free-form answer; `None` when no answer could be read.
    fn ask(&self, question: &str) -> Option<String>;

    fn ask_password(&self, question: &str) -> Option<String>;

    fn ask_yes_no(&self, question: &str) -> bool;
}

impl<P: Prompter + ?Sized> Prompter for &P {
    fn ask(&self, question: &str) -> Option<String> {
        (**self).ask(question)
    }

    fn ask_password(&self, question: &str) -> Option<String> {
        (**self).ask_password(question)
    }

    fn ask_yes_no(&self, question: &str) -> bool {
        (**self).ask_yes_no(question)
    }
}

/// Prompter reading answers from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    fn read_answer(&self, question: &str) -> Option<String> {
        eprint!("{} ", question.bold());
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

impl Prompter for TerminalPrompter {
    fn ask(&self, question: &str) -> Option<String> {
        self.read_answer(question)
    }

    fn ask_password(&self, question: &str) -> Option<String> {
        eprint!("{} ", question.bold());
        let _ = std::io::stderr().flush();
        hidden_answer(rpassword::read_password())
    }

    fn ask_yes_no(&self, question: &str) -> bool {
        self.read_answer(&format!("{question} [y/N]"))
            .map(|a| matches!(a.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
            .unwrap_or(false)
    }
}

/// Answer typed with echo off; a read failure counts as no answer.
fn hidden_answer(read: std::io::Result<String>) -> Option<String> {
    match read {
        Ok(password) => Some(password.trim_end_matches(['\r', '\n']).to_string()),
        Err(e) => {
            tracing::debug!("can't read password: {e}");
            None
        }
    }
}

/// What the retry loop needs to know about a portal call's result.
pub trait PortalOutcome {
    fn is_error(&self) -> bool;

    /// HTTP status; 0 when no response arrived.
    fn http_status(&self) -> u16;

    fn is_auth_failure(&self) -> bool {
        self.is_error() && self.http_status() == HTTP_UNAUTHORIZED
    }
}

pub fn ask_login<P: Prompter + ?Sized>(prompter: &P, question: &str) -> Result<String, ReportError> {
    match prompter.ask(question) {
        Some(login) if !login.is_empty() => Ok(login),
        _ => Err(ReportError::Cancelled("Can't continue without login".into())),
    }
}

pub fn ask_password<P: Prompter + ?Sized>(
    prompter: &P,
    question: &str,
) -> Result<String, ReportError> {
    match prompter.ask_password(question) {
        Some(password) if !password.is_empty() => Ok(password),
        _ => Err(ReportError::Cancelled("Can't continue without password".into())),
    }
}

/// Fills in whatever the configuration left empty.
pub fn complete_credentials<P: Prompter + ?Sized>(
    creds: &mut Credentials,
    prompter: &P,
) -> Result<(), ReportError> {
    if creds.login.is_empty() {
        creds.login = ask_login(
            prompter,
            "Login is not provided by configuration. Please enter your RHTS login:",
        )?;
    }
    if creds.password.is_empty() {
        creds.password = ask_password(
            prompter,
            &format!(
                "Password is not provided by configuration. Please enter the password for '{}':",
                creds.login
            ),
        )?;
    }
    Ok(())
}

/// Asks for a fresh login and password after the portal rejected the old ones.
pub fn ask_new_credentials<P: Prompter + ?Sized>(prompter: &P) -> Result<Credentials, ReportError> {
    let login = ask_login(
        prompter,
        "Invalid password or login. Please enter your Red Hat login:",
    )?;
    let password = ask_password(
        prompter,
        &format!("Invalid password or login. Please enter the password for '{login}':"),
    )?;
    Ok(Credentials { login, password })
}

/// Runs `call` with the current credentials until it stops failing with 401.
///
/// Every 401 replaces `creds` with freshly prompted ones before the next
/// attempt. Any other result, success or failure, is returned as is. The
/// loop only ends early when the user cancels a prompt.
pub async fn with_credential_retry<P, F, Fut, R>(
    creds: &mut Credentials,
    prompter: &P,
    mut call: F,
) -> Result<R, ReportError>
where
    P: Prompter + ?Sized,
    F: FnMut(Credentials) -> Fut,
    Fut: Future<Output = R>,
    R: PortalOutcome,
{
    loop {
        let result = call(creds.clone()).await;
        if !result.is_auth_failure() {
            return Ok(result);
        }
        tracing::info!("portal rejected credentials for '{}'", creds.login);
        *creds = ask_new_credentials(prompter)?;
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedPrompter;
    use super::*;
    use std::cell::RefCell;

    #[derive(Debug, Clone, PartialEq)]
    struct Reply(u16);

    impl PortalOutcome for Reply {
        fn is_error(&self) -> bool {
            self.0 >= 400
        }

        fn http_status(&self) -> u16 {
            self.0
        }
    }

    #[test]
    fn hidden_answer_strips_line_end_and_maps_failure_to_none() {
        assert_eq!(hidden_answer(Ok("s3cret\r\n".into())).as_deref(), Some("s3cret"));
        let no_tty = std::io::Error::new(std::io::ErrorKind::NotFound, "no tty");
        assert_eq!(hidden_answer(Err(no_tty)), None);
    }

    #[tokio::test]
    async fn success_runs_once_without_prompt() {
        let prompter = ScriptedPrompter::new();
        let mut creds = Credentials::new("alice", "pw");
        let calls = RefCell::new(0);

        let reply = with_credential_retry(&mut creds, &prompter, |_| {
            *calls.borrow_mut() += 1;
            async { Reply(201) }
        })
        .await
        .unwrap();

        assert_eq!(reply, Reply(201));
        assert_eq!(*calls.borrow(), 1);
        assert_eq!(prompter.asked(), 0);
    }

    #[tokio::test]
    async fn non_auth_error_is_returned_without_prompt() {
        let prompter = ScriptedPrompter::new();
        let mut creds = Credentials::new("alice", "pw");

        let reply = with_credential_retry(&mut creds, &prompter, |_| async { Reply(500) })
            .await
            .unwrap();

        assert_eq!(reply, Reply(500));
        assert_eq!(prompter.asked(), 0);
    }

    #[tokio::test]
    async fn unauthorized_prompts_once_then_retries() {
        let prompter = ScriptedPrompter::new().answer("bob").answer("secret");
        let mut creds = Credentials::new("alice", "wrong");
        let seen = RefCell::new(Vec::new());

        let reply = with_credential_retry(&mut creds, &prompter, |c| {
            seen.borrow_mut().push(c.clone());
            let status = if c.login == "bob" { 200 } else { 401 };
            async move { Reply(status) }
        })
        .await
        .unwrap();

        assert_eq!(reply, Reply(200));
        assert_eq!(prompter.asked(), 2); // login + password
        assert_eq!(seen.borrow().len(), 2);
        assert_eq!(creds, Credentials::new("bob", "secret"));
    }

    #[tokio::test]
    async fn empty_login_cancels() {
        let prompter = ScriptedPrompter::new().answer("");
        let mut creds = Credentials::new("alice", "wrong");

        let err = with_credential_retry(&mut creds, &prompter, |_| async { Reply(401) })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "Can't continue without login");
    }

    #[test]
    fn complete_credentials_prompts_for_missing_parts() {
        let prompter = ScriptedPrompter::new().answer("pw");
        let mut creds = Credentials::new("alice", "");
        complete_credentials(&mut creds, &prompter).unwrap();
        assert_eq!(creds.password, "pw");
        assert!(prompter.questions.borrow()[0].contains("'alice'"));
    }

    #[test]
    fn empty_password_cancels() {
        let prompter = ScriptedPrompter::new().answer("alice").answer("");
        let mut creds = Credentials::default();
        let err = complete_credentials(&mut creds, &prompter).unwrap_err();
        assert_eq!(err.to_string(), "Can't continue without password");
    }
}
