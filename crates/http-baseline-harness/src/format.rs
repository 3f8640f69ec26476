//! Canonical text for requests and responses as stored in golden files.

use anyhow::{Context, Result};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method, StatusCode, Uri, Version};

/// Lowercase, with every character outside `[A-Za-z0-9_]` replaced by `_`.
#[must_use]
pub fn normalize_test_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '_' { ch } else { '_' })
        .collect()
}

/// `content-type` -> `Content-Type`.
#[must_use]
pub fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn version_text(version: Version) -> String {
    format!("{version:?}")
}

fn header_lines(headers: &HeaderMap) -> Vec<String> {
    let mut names: Vec<&str> = headers.keys().map(http::HeaderName::as_str).collect();
    names.sort_unstable();
    names.dedup();

    let mut lines = Vec::new();
    for name in names {
        for value in headers.get_all(name) {
            lines.push(format!(
                "{}: {}",
                canonical_header_name(name),
                String::from_utf8_lossy(value.as_bytes())
            ));
        }
    }
    lines
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers.get(CONTENT_TYPE).map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
}

/// Pretty-print JSON bodies; other bodies are kept as text.
///
/// # Errors
/// Returns an error when a body labelled `application/json` is not JSON.
pub fn format_body(content_type: Option<&str>, body: &[u8]) -> Result<String> {
    let is_json = content_type
        .and_then(|value| value.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("application/json"));
    if !is_json {
        return Ok(String::from_utf8_lossy(body).into_owned());
    }

    let value: serde_json::Value =
        serde_json::from_slice(body).context("body labelled application/json is not valid JSON")?;
    let mut out = serde_json::to_string_pretty(&value).context("failed to format JSON body")?;
    out.push('\n');
    Ok(out)
}

/// Request line, host, sorted headers, content length, blank line, body.
///
/// # Errors
/// Returns an error when the body cannot be formatted.
pub fn format_request(
    method: &Method,
    uri: &Uri,
    version: Version,
    host: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<String> {
    let mut lines = vec![format!("{method} {uri} {}", version_text(version)), format!("Host: {host}")];
    lines.extend(header_lines(headers));
    if !body.is_empty() {
        lines.push(format!("Content-Length: {}", body.len()));
    }
    lines.push(String::new());
    if !body.is_empty() {
        lines.push(format_body(content_type(headers).as_deref(), body)?);
    }
    Ok(lines.join("\n"))
}

/// Status line, sorted headers, blank line, body.
///
/// # Errors
/// Returns an error when the body cannot be formatted.
pub fn format_response(
    version: Version,
    status: StatusCode,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<String> {
    let mut lines = vec![format!("{} {status}", version_text(version))];
    lines.extend(header_lines(headers));
    lines.push(String::new());
    if !body.is_empty() {
        lines.push(format_body(content_type(headers).as_deref(), body)?);
    }
    Ok(lines.join("\n"))
}
