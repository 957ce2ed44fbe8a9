//! Destination resolution.
//!
//! A [`DestinationPath`] is fixed at construction and evaluated read-only:
//!
//! | form | example | evaluation |
//! |---|---|---|
//! | static | `events` | the string itself, no decode |
//! | path | `$.meta.tenant` | JSON-decode payload, select a string |
//! | template | `logs-{{$.tenant}}-{{$.shard}}` | decode, render scalars inline |
//!
//! [`DestinationPath::partition`] splits a [`Chunk`] into ordered
//! per-destination groups in one pass. Messages that cannot be decoded or
//! evaluated are reported in [`Partition::dropped`] and appear in no group.

use std::fmt;

use logferry_core::config::Params;
use logferry_core::error::ConfigError;
use logferry_core::message::{Chunk, DestinationGroups, Message};
use serde_json::Value;

use crate::error::OutputError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// A compiled JSON path such as `$.a.b[0]["c d"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Compiles a path. The leading `$` is optional: `a.b` equals `$.a.b`.
    pub fn parse(expr: &str) -> Result<Self, String> {
        let raw = expr.trim();
        let body = match raw.strip_prefix('$') {
            Some(rest) => rest.to_owned(),
            None => format!(".{raw}"),
        };

        let mut segments = Vec::new();
        let mut chars = body.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    let mut key = String::new();
                    while let Some(&next) = chars.peek() {
                        if next == '.' || next == '[' {
                            break;
                        }
                        key.push(next);
                        chars.next();
                    }
                    if key.is_empty() {
                        return Err(format!("'{raw}': empty key"));
                    }
                    segments.push(Segment::Key(key));
                }
                '[' => match chars.peek().copied() {
                    Some(quote @ ('"' | '\'')) => {
                        chars.next();
                        let mut key = String::new();
                        loop {
                            match chars.next() {
                                Some(ch) if ch == quote => break,
                                Some(ch) => key.push(ch),
                                None => return Err(format!("'{raw}': unterminated quoted key")),
                            }
                        }
                        if chars.next() != Some(']') {
                            return Err(format!("'{raw}': expected ']' after quoted key"));
                        }
                        segments.push(Segment::Key(key));
                    }
                    _ => {
                        let mut digits = String::new();
                        loop {
                            match chars.next() {
                                Some(']') => break,
                                Some(ch) => digits.push(ch),
                                None => return Err(format!("'{raw}': unterminated index")),
                            }
                        }
                        let index = digits
                            .trim()
                            .parse::<usize>()
                            .map_err(|_| format!("'{raw}': invalid index '{digits}'"))?;
                        segments.push(Segment::Index(index));
                    }
                },
                other => return Err(format!("'{raw}': unexpected character '{other}'")),
            }
        }

        if segments.is_empty() {
            return Err(format!("'{raw}': path must select a field"));
        }

        Ok(Self {
            raw: raw.to_owned(),
            segments,
        })
    }

    /// Walks `root` and returns the selected value.
    pub fn select<'v>(&self, root: &'v Value) -> Result<&'v Value, OutputError> {
        let mut current = root;
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get(key).ok_or_else(|| {
                    OutputError::Evaluate(format!("{}: no key '{key}'", self.raw))
                })?,
                (Segment::Index(idx), Value::Array(items)) => items.get(*idx).ok_or_else(|| {
                    OutputError::Evaluate(format!("{}: index {idx} out of range", self.raw))
                })?,
                (Segment::Key(key), other) => {
                    return Err(OutputError::Evaluate(format!(
                        "{}: cannot read key '{key}' from {}",
                        self.raw,
                        kind_of(other)
                    )));
                }
                (Segment::Index(idx), other) => {
                    return Err(OutputError::Evaluate(format!(
                        "{}: cannot index [{idx}] into {}",
                        self.raw,
                        kind_of(other)
                    )));
                }
            };
        }
        Ok(current)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(String),
    Expr(JsonPath),
}

/// Literal text with `{{ path }}` interpolations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    raw: String,
    parts: Vec<TemplatePart>,
}

impl Template {
    pub fn parse(expr: &str) -> Result<Self, String> {
        let mut parts = Vec::new();
        let mut rest = expr;
        while let Some(start) = rest.find("{{") {
            if start > 0 {
                parts.push(TemplatePart::Literal(rest[..start].to_owned()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| format!("'{expr}': unclosed '{{{{'"))?;
            let inner = after[..end].trim();
            if inner.is_empty() {
                return Err(format!("'{expr}': empty interpolation"));
            }
            parts.push(TemplatePart::Expr(JsonPath::parse(inner)?));
            rest = &after[end + 2..];
        }
        if !rest.is_empty() {
            parts.push(TemplatePart::Literal(rest.to_owned()));
        }

        Ok(Self {
            raw: expr.to_owned(),
            parts,
        })
    }

    /// Renders against a decoded payload. Interpolations must be strings,
    /// numbers or booleans.
    pub fn render(&self, root: &Value) -> Result<String, OutputError> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                TemplatePart::Literal(text) => out.push_str(text),
                TemplatePart::Expr(path) => match path.select(root)? {
                    Value::String(s) => out.push_str(s),
                    Value::Number(n) => out.push_str(&n.to_string()),
                    Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
                    other => {
                        return Err(OutputError::Evaluate(format!(
                            "{}: cannot interpolate {}",
                            path.as_str(),
                            kind_of(other)
                        )));
                    }
                },
            }
        }
        Ok(out)
    }
}

/// Where an output sends a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationPath {
    /// Fixed at configuration time
    Static(String),
    /// Selects a string from the decoded payload
    Path(JsonPath),
    /// Renders a string from the decoded payload
    Template(Template),
}

impl DestinationPath {
    /// Parses an expression, detecting its form.
    ///
    /// Contains `{{` → template; starts with `$` → path; otherwise static.
    pub fn parse(expr: &str) -> Result<Self, ConfigError> {
        Self::parse_field("destination", expr)
    }

    /// Like [`parse`](Self::parse), naming `field` in errors.
    pub fn parse_field(field: &str, expr: &str) -> Result<Self, ConfigError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::missing(field));
        }
        if trimmed.contains("{{") {
            Template::parse(trimmed)
                .map(Self::Template)
                .map_err(|reason| ConfigError::invalid(field, reason))
        } else if trimmed.starts_with('$') {
            JsonPath::parse(trimmed)
                .map(Self::Path)
                .map_err(|reason| ConfigError::invalid(field, reason))
        } else {
            Ok(Self::Static(trimmed.to_owned()))
        }
    }

    /// Parses an expression that is always dynamic, so bare paths such as
    /// `tenant` or `meta.tenant` select fields instead of naming a static
    /// destination.
    pub fn dynamic(expr: &str) -> Result<Self, ConfigError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::missing("destination"));
        }
        if trimmed.contains("{{") {
            Template::parse(trimmed)
                .map(Self::Template)
                .map_err(|reason| ConfigError::invalid("destination", reason))
        } else {
            JsonPath::parse(trimmed)
                .map(Self::Path)
                .map_err(|reason| ConfigError::invalid("destination", reason))
        }
    }

    /// Reads and parses a required parameter.
    pub fn from_param(params: &Params, key: &str) -> Result<Self, ConfigError> {
        let raw = params.require_str(key)?;
        Self::parse_field(key, raw)
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Self::Static(_))
    }

    /// The fixed destination, if static.
    pub fn static_value(&self) -> Option<&str> {
        match self {
            Self::Static(s) => Some(s),
            _ => None,
        }
    }

    /// Evaluates against an already decoded payload.
    pub fn evaluate(&self, value: &Value) -> Result<String, OutputError> {
        let resolved = match self {
            Self::Static(s) => return Ok(s.clone()),
            Self::Path(path) => match path.select(value)? {
                Value::String(s) => s.clone(),
                other => {
                    return Err(OutputError::Evaluate(format!(
                        "{}: resolved to {}, expected a string",
                        path.as_str(),
                        kind_of(other)
                    )));
                }
            },
            Self::Template(template) => template.render(value)?,
        };
        if resolved.is_empty() {
            return Err(OutputError::Evaluate(format!("{self}: resolved to an empty string")));
        }
        Ok(resolved)
    }

    /// Resolves one raw payload. Static paths never decode.
    pub fn resolve(&self, payload: &[u8]) -> Result<String, OutputError> {
        if let Self::Static(s) = self {
            return Ok(s.clone());
        }
        let value: Value =
            serde_json::from_slice(payload).map_err(|e| OutputError::Decode(e.to_string()))?;
        self.evaluate(&value)
    }

    /// Groups a chunk by destination in a single pass, preserving order
    /// inside each group.
    pub fn partition(&self, chunk: &Chunk) -> Partition {
        if chunk.is_empty() {
            return Partition::default();
        }
        if let Self::Static(dest) = self {
            return Partition::single(dest.clone(), chunk);
        }

        let mut partition = Partition::default();
        for (index, message) in chunk.messages().iter().enumerate() {
            partition.decoded += 1;
            let value: Value = match serde_json::from_slice(message.payload()) {
                Ok(v) => v,
                Err(e) => {
                    partition.dropped.push(Dropped {
                        index,
                        error: OutputError::Decode(e.to_string()),
                    });
                    continue;
                }
            };
            match self.evaluate(&value) {
                Ok(dest) => partition.groups.push(&dest, message.clone()),
                Err(error) => partition.dropped.push(Dropped { index, error }),
            }
        }
        partition
    }
}

impl fmt::Display for DestinationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(s) => f.write_str(s),
            Self::Path(p) => f.write_str(&p.raw),
            Self::Template(t) => f.write_str(&t.raw),
        }
    }
}

/// A message excluded from every group.
#[derive(Debug)]
pub struct Dropped {
    /// Position in the chunk
    pub index: usize,
    pub error: OutputError,
}

/// Result of [`DestinationPath::partition`].
#[derive(Debug, Default)]
pub struct Partition {
    pub groups: DestinationGroups,
    pub dropped: Vec<Dropped>,
    /// Payloads JSON-decoded while partitioning
    pub decoded: usize,
}

impl Partition {
    /// Routes the whole chunk to one destination without decoding.
    pub fn single(destination: impl Into<String>, chunk: &Chunk) -> Self {
        if chunk.is_empty() {
            return Self::default();
        }
        Self {
            groups: DestinationGroups::single(destination, chunk.messages().to_vec()),
            dropped: Vec::new(),
            decoded: 0,
        }
    }

    /// Grouped plus dropped; equals the chunk length.
    pub fn accounted(&self) -> usize {
        self.groups.message_count() + self.dropped.len()
    }

    /// Messages routed to `destination`.
    pub fn messages_for(&self, destination: &str) -> &[Message] {
        self.groups.get(destination).unwrap_or(&[])
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
