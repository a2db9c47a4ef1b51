//! `--format` support: substitutes `{{.Path.To.Field}}` placeholders with
//! values looked up in an inspection document.
//!
//! Only literal placeholder replacement is supported. There are no
//! conditionals, loops or escapes, and text that merely looks like a brace
//! is copied through untouched.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::ops::Range;

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\{\{\s*\.(.*?)\s*\}\}").expect("placeholder pattern is valid");
}

/// Rendering used for a path that does not resolve.
pub const MISSING: &str = "null";

/// Walks `path` (dot separated, surrounding dots ignored) through `data`.
///
/// Each segment is tried as an exact key first and then as a
/// case-insensitive key. A case-insensitive lookup that matches more than
/// one key is treated as a miss. Numeric segments index into sequences.
pub fn resolve<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim().trim_matches('.');
    if path.is_empty() {
        return Some(data);
    }
    path.split('.').try_fold(data, lookup)
}

fn lookup<'a>(current: &'a Value, segment: &str) -> Option<&'a Value> {
    match current {
        Value::Object(map) => {
            if let Some(value) = map.get(segment) {
                return Some(value);
            }
            let wanted = segment.to_lowercase();
            let mut candidates = map
                .iter()
                .filter(|(key, _)| key.to_lowercase() == wanted)
                .map(|(_, value)| value);
            let found = candidates.next()?;
            match candidates.next() {
                Some(_) => None,
                None => Some(found),
            }
        }
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Textual form of a resolved value: strings bare, other scalars in their
/// natural form, mappings and sequences as compact JSON.
pub fn display_value(value: Option<&Value>) -> String {
    match value {
        None => MISSING.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) => "null".to_string(),
        Some(other) => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Placeholder {
    span: Range<usize>,
    path: String,
}

/// A parsed format string. Parsing happens once; rendering can be repeated
/// against any number of documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatTemplate {
    source: String,
    placeholders: Vec<Placeholder>,
}

impl FormatTemplate {
    pub fn parse(source: impl Into<String>) -> Self {
        let source = source.into();
        let placeholders = PLACEHOLDER
            .captures_iter(&source)
            .filter_map(|cap| {
                let whole = cap.get(0)?;
                let path = cap.get(1)?;
                Some(Placeholder {
                    span: whole.range(),
                    path: path.as_str().to_string(),
                })
            })
            .collect();
        Self {
            source,
            placeholders,
        }
    }

    pub fn render(&self, data: &Value) -> String {
        let mut out = String::with_capacity(self.source.len());
        let mut cursor = 0;
        for placeholder in &self.placeholders {
            out.push_str(&self.source[cursor..placeholder.span.start]);
            out.push_str(&display_value(resolve(data, &placeholder.path)));
            cursor = placeholder.span.end;
        }
        out.push_str(&self.source[cursor..]);
        out
    }
}

pub fn render(data: &Value, template: &str) -> String {
    FormatTemplate::parse(template).render(data)
}
