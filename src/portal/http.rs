//! reqwest implementation of the portal and microreport endpoints.

use std::path::Path;

use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use tokio_util::io::ReaderStream;

use super::{HttpReply, MicroreportTransport, NewCase, SubmissionResult, SupportPortal};
use crate::config::{concat_url, Credentials, Settings};
use crate::error::ReportError;
use crate::xml;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Client for the support portal REST API.
#[derive(Debug, Clone)]
pub struct HttpPortal {
    client: Client,
    cases_url: String,
    hints_url: String,
}

impl HttpPortal {
    pub fn new(settings: &Settings) -> Result<Self, ReportError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(!settings.ssl_verify)
            // A followed 302 would turn the POST into a GET.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ReportError::Http(e.to_string()))?;

        Ok(Self {
            client,
            cases_url: settings.cases_url(),
            hints_url: settings.hints_url(),
        })
    }

    fn post(&self, creds: &Credentials, url: &str) -> RequestBuilder {
        self.client
            .post(url)
            .basic_auth(&creds.login, Some(&creds.password))
    }

    async fn upload(&self, op: &str, creds: &Credentials, url: &str, file: &Path) -> SubmissionResult {
        let part = match file_part(file).await {
            Ok(part) => part,
            Err(e) => return SubmissionResult::failure(0, format!("Error in {op} at '{url}': {e}")),
        };
        let form = Form::new().part("file", part);
        let response = self.post(creds, url).multipart(form).send().await;
        finish(op, url, response).await
    }
}

/// Multipart part streaming `path` from disk.
async fn file_part(path: &Path) -> Result<Part, ReportError> {
    let file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mime = mime_guess::from_path(path).first_or_octet_stream();

    let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
    Part::stream_with_length(body, len)
        .file_name(name)
        .mime_str(mime.as_ref())
        .map_err(|e| ReportError::Http(e.to_string()))
}

/// Turns a response into a [`SubmissionResult`].
async fn finish(op: &str, url: &str, response: reqwest::Result<Response>) -> SubmissionResult {
    let response = match response {
        Ok(response) => response,
        Err(e) => {
            let status = e.status().map(|s| s.as_u16()).unwrap_or(0);
            return SubmissionResult::failure(status, format!("Error in {op} at '{url}': {e}"));
        }
    };

    let status = response.status();
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let body = response.text().await.unwrap_or_default();

    if status.is_success() {
        let mut result = SubmissionResult::success(status.as_u16(), location, Some(body.clone()));
        let text = body.trim();
        if !text.is_empty() && !text.starts_with('<') {
            result = result.with_message(text);
        }
        return result;
    }

    let says = xml::element_text(&body, "message").unwrap_or_else(|| body.trim().to_string());
    SubmissionResult::failure(
        status.as_u16(),
        format!(
            "Error in {op} at '{url}', HTTP code: {}, server says: '{says}'",
            status.as_u16()
        ),
    )
}

fn push_element(xml_doc: &mut String, tag: &str, text: &str) {
    xml_doc.push_str(&format!("<{tag}>{}</{tag}>", xml::escape(text)));
}

pub(crate) fn case_xml(case: &NewCase) -> String {
    let mut doc = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>");
    doc.push_str(&format!("<case xmlns=\"{}\">", xml::STRATA_NS));
    push_element(&mut doc, "summary", &case.summary);
    push_element(&mut doc, "description", &case.description);
    push_element(&mut doc, "product", &case.product);
    if let Some(version) = &case.version {
        push_element(&mut doc, "version", version);
    }
    if let Some(package) = &case.package {
        push_element(&mut doc, "component", package);
    }
    doc.push_str("</case>");
    doc
}

pub(crate) fn comment_xml(text: &str) -> String {
    let mut doc = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>");
    doc.push_str(&format!("<comment xmlns=\"{}\">", xml::STRATA_NS));
    push_element(&mut doc, "text", text);
    doc.push_str("</comment>");
    doc
}

impl SupportPortal for HttpPortal {
    async fn create_case(&self, creds: &Credentials, case: &NewCase) -> SubmissionResult {
        let url = self.cases_url.as_str();
        let response = self
            .post(creds, url)
            .header(CONTENT_TYPE, "application/xml")
            .body(case_xml(case))
            .send()
            .await;
        let result = finish("case creation", url, response).await;
        if !result.error && result.url.is_none() {
            return SubmissionResult::failure(
                result.http_status,
                format!(
                    "Error in case creation at '{url}': no Location URL, HTTP code: {}",
                    result.http_status
                ),
            );
        }
        result
    }

    async fn attach_file(&self, creds: &Credentials, case_url: &str, file: &Path) -> SubmissionResult {
        let url = concat_url(case_url, "attachments");
        self.upload("file upload", creds, &url, file).await
    }

    async fn add_comment(&self, creds: &Credentials, case_url: &str, text: &str) -> SubmissionResult {
        let url = concat_url(case_url, "comments");
        let response = self
            .post(creds, &url)
            .header(CONTENT_TYPE, "application/xml")
            .body(comment_xml(text))
            .send()
            .await;
        finish("adding comment", &url, response).await
    }

    async fn query_hints(&self, creds: &Credentials, file: &Path) -> SubmissionResult {
        self.upload("file upload", creds, &self.hints_url, file).await
    }
}

impl MicroreportTransport for HttpPortal {
    async fn post_json(&self, creds: &Credentials, url: &str, body: &str) -> Result<HttpReply, ReportError> {
        let response = self
            .post(creds, url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| ReportError::Http(format!("{url}: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ReportError::Http(format!("{url}: {e}")))?;
        Ok(HttpReply { status, body })
    }
}
