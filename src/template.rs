//! Domain templates evaluated against resource snapshots.
//!
//! A template is literal text with `{path}` placeholders, where `path` is a
//! dotted field path made of lowercase letters, `.`, `_` and `-`:
//!
//! ```text
//! svc-{metadata.name}.ns-{metadata.namespace}
//!   → svc-api.ns-default.
//! ```
//!
//! Resolution is lenient: a placeholder whose path is malformed or points at
//! a missing field is kept verbatim, and the rest of the template still
//! resolves. The result always gets a trailing `.` appended. Nothing checks
//! that the output is a legal domain name.

use serde_json::Value;
use thiserror::Error;
use tracing::trace;

/// Why a single placeholder could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// Path has an empty segment (e.g. `{a..b}` or `{.}`).
    #[error("malformed path `{0}`")]
    MalformedPath(String),

    /// Path does not lead to a value in the snapshot.
    #[error("field `{0}` not found")]
    MissingField(String),
}

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Text copied through unchanged.
    Literal(&'a str),
    /// A `{path}` placeholder; holds the text between the braces.
    Placeholder(&'a str),
}

fn is_path_char(b: u8) -> bool {
    b.is_ascii_lowercase() || b == b'.' || b == b'_' || b == b'-'
}

/// Split a template into literal runs and placeholders.
///
/// A `{` that is not followed by one or more path characters and a closing
/// `}` is plain text.
pub fn tokenize(template: &str) -> Vec<Segment<'_>> {
    let bytes = template.as_bytes();
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }

        let path_start = i + 1;
        let mut end = path_start;
        while end < bytes.len() && is_path_char(bytes[end]) {
            end += 1;
        }

        if end > path_start && end < bytes.len() && bytes[end] == b'}' {
            if literal_start < i {
                segments.push(Segment::Literal(&template[literal_start..i]));
            }
            segments.push(Segment::Placeholder(&template[path_start..end]));
            i = end + 1;
            literal_start = i;
        } else {
            i += 1;
        }
    }

    if literal_start < bytes.len() {
        segments.push(Segment::Literal(&template[literal_start..]));
    }

    segments
}

/// Evaluate a dotted path against a JSON document.
///
/// A single leading `.` is accepted (`{.metadata.name}`), matching the usual
/// JSONPath-style template notation.
pub fn evaluate_path(path: &str, fields: &Value) -> Result<String, TemplateError> {
    let relative = path.strip_prefix('.').unwrap_or(path);
    if relative.is_empty() || relative.split('.').any(str::is_empty) {
        return Err(TemplateError::MalformedPath(path.to_string()));
    }

    let mut current = fields;
    for key in relative.split('.') {
        current = current
            .get(key)
            .ok_or_else(|| TemplateError::MissingField(path.to_string()))?;
    }

    match current {
        Value::Null => Err(TemplateError::MissingField(path.to_string())),
        Value::String(s) => Ok(s.clone()),
        other => Ok(other.to_string()),
    }
}

/// Resolves domain templates into fully-qualified domain strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateResolver;

impl TemplateResolver {
    /// Resolve `template` against `fields` and append the trailing `.`.
    ///
    /// Every occurrence of a placeholder resolves to the same value, since
    /// evaluation depends only on the path.
    pub fn resolve(&self, template: &str, fields: &Value) -> String {
        let mut domain = String::with_capacity(template.len() + 1);

        for segment in tokenize(template) {
            match segment {
                Segment::Literal(text) => domain.push_str(text),
                Segment::Placeholder(path) => match evaluate_path(path, fields) {
                    Ok(value) => domain.push_str(&value),
                    Err(e) => {
                        trace!(template, error = %e, "leaving placeholder unresolved");
                        domain.push('{');
                        domain.push_str(path);
                        domain.push('}');
                    }
                },
            }
        }

        domain.push('.');
        domain
    }
}
