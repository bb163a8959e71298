//! Classification of a single page response
//!
//! [`classify`] is a pure function of the raw response. It decides whether an
//! attempt produced a page, hit the rate limit, or should be retried, and it
//! is where malformed bodies get their diagnostic logging.

use super::transport::RawResponse;
use loyalty_common::{Page, Record};
use reqwest::StatusCode;
use serde_json::error::Category;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Bodies above this size get a warning
pub const LARGE_BODY_BYTES: usize = 1_000_000;
/// Bytes shown either side of a parse error
pub const ERROR_CONTEXT_BYTES: usize = 100;
/// Bytes of prefix/suffix shown when the error offset is unknown
pub const SAMPLE_BYTES: usize = 200;

const NO_RESULTS_SENTINEL: &str = "no results found";

/// Result of one attempt, before the retry policy is applied
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt {
    Page(Page),
    /// HTTP 429, with the parsed `Retry-After` when present
    RateLimited(Option<Duration>),
    Retry(String),
}

pub fn classify(response: &RawResponse, records_key: &str) -> Attempt {
    match response.status {
        StatusCode::OK => classify_ok(response, records_key),
        StatusCode::BAD_REQUEST if is_no_results(&response.body) => {
            debug!("Source reported no results");
            Attempt::Page(Page::empty())
        },
        StatusCode::TOO_MANY_REQUESTS => {
            Attempt::RateLimited(parse_retry_after(response.retry_after.as_deref()))
        },
        status => Attempt::Retry(format!("HTTP {}", status.as_u16())),
    }
}

fn classify_ok(response: &RawResponse, records_key: &str) -> Attempt {
    let content_type = response.content_type.as_deref().unwrap_or("");
    if !content_type.contains("application/json") {
        warn!(content_type, "Non-JSON response");
        debug!(preview = %prefix(&response.body, 500), "Response preview");
        return Attempt::Retry(format!("unexpected content type '{}'", content_type));
    }

    let body = &response.body;
    if body.len() > LARGE_BODY_BYTES {
        warn!(bytes = body.len(), "Large response body");
    }

    let document: Value = match serde_json::from_str(body) {
        Ok(document) => document,
        Err(e) => {
            let diagnostics = ParseDiagnostics::new(body, &e);
            diagnostics.log(&e);
            return Attempt::Retry(format!("malformed JSON: {}", e));
        },
    };

    match extract_page(&document, records_key) {
        Ok(page) => Attempt::Page(page),
        Err(reason) => {
            warn!(%reason, "Unexpected response shape");
            Attempt::Retry(reason)
        },
    }
}

/// Pull the records array and `pagination.next_page_info` out of a document.
/// A missing records key is an empty page.
pub fn extract_page(document: &Value, records_key: &str) -> Result<Page, String> {
    let object = document
        .as_object()
        .ok_or_else(|| "response body is not a JSON object".to_string())?;

    let records = match object.get(records_key) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(map) => Ok(map.clone()),
                _ => Err(format!("'{}[{}]' is not an object", records_key, i)),
            })
            .collect::<Result<Vec<Record>, String>>()?,
        Some(_) => return Err(format!("'{}' is not an array", records_key)),
    };

    let next_cursor = object
        .get("pagination")
        .and_then(|p| p.get("next_page_info"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(Page::new(records, next_cursor))
}

fn is_no_results(body: &str) -> bool {
    body.to_lowercase().contains(NO_RESULTS_SENTINEL)
}

/// Integer seconds only; HTTP dates are treated as absent
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value?.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// What a malformed body looks like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyHint {
    Html,
    RateLimitText,
    Empty,
    Truncated,
}

impl fmt::Display for BodyHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BodyHint::Html => "Response appears to be HTML/XML instead of JSON",
            BodyHint::RateLimitText => "Possible rate limit message in response",
            BodyHint::Empty => "Empty response body",
            BodyHint::Truncated => "Response appears to be truncated",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseDiagnostics {
    pub body_len: usize,
    pub error_offset: Option<usize>,
    /// Window around the error offset
    pub context: Option<String>,
    /// Used when no offset is known
    pub prefix: String,
    pub suffix: String,
    pub hint: Option<BodyHint>,
}

impl ParseDiagnostics {
    pub fn new(body: &str, err: &serde_json::Error) -> Self {
        let error_offset = byte_offset(body, err.line(), err.column()).filter(|&pos| pos > 0);
        let context = error_offset.map(|pos| {
            let start = floor_char_boundary(body, pos.saturating_sub(ERROR_CONTEXT_BYTES));
            let end = ceil_char_boundary(body, pos.saturating_add(ERROR_CONTEXT_BYTES));
            body[start..end].to_string()
        });

        let trimmed = body.trim();
        let hint = if trimmed.starts_with('<') {
            Some(BodyHint::Html)
        } else if trimmed.to_lowercase().contains("rate limit") {
            Some(BodyHint::RateLimitText)
        } else if trimmed.is_empty() {
            Some(BodyHint::Empty)
        } else if err.classify() == Category::Eof {
            Some(BodyHint::Truncated)
        } else {
            None
        };

        Self {
            body_len: body.len(),
            error_offset,
            context,
            prefix: prefix(body, SAMPLE_BYTES).to_string(),
            suffix: suffix(body, SAMPLE_BYTES).to_string(),
            hint,
        }
    }

    fn log(&self, err: &serde_json::Error) {
        error!(error = %err, bytes = self.body_len, "JSON decode error");
        match (&self.context, self.error_offset) {
            (Some(context), Some(offset)) => {
                debug!(offset, context = ?context, "Context around parse error");
            },
            _ => {
                debug!(start = ?self.prefix, end = ?self.suffix, "Response samples");
            },
        }
        if let Some(hint) = self.hint {
            error!("{}", hint);
        }
    }
}

/// Convert serde_json's 1-based line/column into a byte offset
fn byte_offset(body: &str, line: usize, column: usize) -> Option<usize> {
    if line == 0 {
        return None;
    }
    let line_start: usize = body.split_inclusive('\n').take(line - 1).map(str::len).sum();
    Some((line_start + column.saturating_sub(1)).min(body.len()))
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while !s.is_char_boundary(index) {
        index += 1;
    }
    index
}

fn prefix(s: &str, max: usize) -> &str {
    &s[..floor_char_boundary(s, max)]
}

fn suffix(s: &str, max: usize) -> &str {
    &s[ceil_char_boundary(s, s.len().saturating_sub(max))..]
}
