//! Just enough XML for the portal: escaping for the documents we send and
//! regex extraction for the few elements we read back.

use regex::Regex;

/// Namespace of the portal's case, comment and manifest documents.
pub const STRATA_NS: &str = "http://www.redhat.com/gss/strata";

/// Escapes text for use in element content or a double-quoted attribute.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            '\t' => out.push_str("&#9;"),
            c if (c as u32) < 0x20 => {}
            c => out.push(c),
        }
    }
    out
}

pub fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#10;", "\n")
        .replace("&#13;", "\r")
        .replace("&#9;", "\t")
        .replace("&amp;", "&")
}

/// Text of the first `<tag>` element, if any.
pub fn element_text(document: &str, tag: &str) -> Option<String> {
    let re = Regex::new(&format!(
        r"(?s)<{tag}(?:\s[^>]*)?>(.*?)</{tag}>",
        tag = regex::escape(tag)
    ))
    .ok()?;
    re.captures(document).map(|c| unescape(c[1].trim()))
}
