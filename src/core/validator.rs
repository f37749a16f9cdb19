// src/core/validator.rs — Strict parse/validate boundary for model replies
//
// Locates a JSON payload in free-form model text (fenced block first, then
// a bare balanced object), then decodes it against one of three schemas.
// Missing required fields are a rejection, never a default.

use pulldown_cmark::{CodeBlockKind, Event, Parser, Tag, TagEnd};
use serde::Deserialize;

use super::types::{AnalysisSummary, SizingResponse, Suggestion};
use crate::infra::errors::ValidationFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    Analysis,
    Proposal,
    Sizing,
}

impl Schema {
    pub fn name(self) -> &'static str {
        match self {
            Schema::Analysis => "analysis",
            Schema::Proposal => "proposal",
            Schema::Sizing => "sizing",
        }
    }
}

/// A model reply that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedObject {
    Analysis(AnalysisSummary),
    Proposal(Vec<Suggestion>),
    Sizing(SizingResponse),
}

#[derive(Deserialize)]
struct ProposalPayload {
    #[serde(alias = "suggestions")]
    changes: Vec<Suggestion>,
}

#[derive(Deserialize)]
struct SizingPayload {
    #[serde(default)]
    netlist_text: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

pub fn validate(raw: &str, schema: Schema) -> Result<ParsedObject, ValidationFailure> {
    let payload = locate_payload(raw)?;
    let schema_err = |e: serde_json::Error| ValidationFailure::Schema {
        schema: schema.name(),
        message: e.to_string(),
    };

    match schema {
        Schema::Analysis => serde_json::from_value::<AnalysisSummary>(payload)
            .map(ParsedObject::Analysis)
            .map_err(schema_err),
        Schema::Proposal => serde_json::from_value::<ProposalPayload>(payload)
            .map(|p| ParsedObject::Proposal(p.changes))
            .map_err(schema_err),
        Schema::Sizing => {
            let p: SizingPayload = serde_json::from_value(payload).map_err(schema_err)?;
            sizing_from_payload(p).map(ParsedObject::Sizing)
        }
    }
}

pub fn validate_analysis(raw: &str) -> Result<AnalysisSummary, ValidationFailure> {
    match validate(raw, Schema::Analysis)? {
        ParsedObject::Analysis(a) => Ok(a),
        _ => Err(mismatch(Schema::Analysis)),
    }
}

pub fn validate_proposal(raw: &str) -> Result<Vec<Suggestion>, ValidationFailure> {
    match validate(raw, Schema::Proposal)? {
        ParsedObject::Proposal(p) => Ok(p),
        _ => Err(mismatch(Schema::Proposal)),
    }
}

pub fn validate_sizing(raw: &str) -> Result<SizingResponse, ValidationFailure> {
    match validate(raw, Schema::Sizing)? {
        ParsedObject::Sizing(s) => Ok(s),
        _ => Err(mismatch(Schema::Sizing)),
    }
}

fn mismatch(schema: Schema) -> ValidationFailure {
    ValidationFailure::Schema {
        schema: schema.name(),
        message: "decoded into the wrong object kind".into(),
    }
}

/// Exactly one of `netlist_text` and `error` must be present.
fn sizing_from_payload(p: SizingPayload) -> Result<SizingResponse, ValidationFailure> {
    let schema_err = |message: &str| ValidationFailure::Schema {
        schema: Schema::Sizing.name(),
        message: message.to_string(),
    };
    match (p.netlist_text, p.error) {
        (Some(_), Some(_)) => Err(schema_err("both netlist_text and error are populated")),
        (None, None) => Err(schema_err("neither netlist_text nor error is populated")),
        (Some(netlist_text), None) => Ok(SizingResponse::Circuit { netlist_text }),
        (None, Some(error)) => Ok(SizingResponse::Error {
            error,
            reason: p.reason,
        }),
    }
}

// ─── Payload location ───────────────────────────────────────────

/// Find the JSON object a reply carries. JSON-tagged fences win, then any
/// fence holding an object, then the first balanced `{...}` in the text.
fn locate_payload(raw: &str) -> Result<serde_json::Value, ValidationFailure> {
    let mut last_error: Option<String> = None;

    let mut blocks = fenced_blocks(raw);
    // Stable sort keeps document order within each group
    blocks.sort_by_key(|(lang, _)| !lang.eq_ignore_ascii_case("json"));

    for (_, body) in &blocks {
        match serde_json::from_str::<serde_json::Value>(body.trim()) {
            Ok(v) if v.is_object() => return Ok(v),
            Ok(_) => last_error = Some("payload is not a JSON object".into()),
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    for candidate in balanced_objects(raw) {
        match serde_json::from_str::<serde_json::Value>(candidate) {
            Ok(v) if v.is_object() => return Ok(v),
            Ok(_) => {}
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    Err(match last_error {
        Some(e) => ValidationFailure::Malformed(e),
        None => ValidationFailure::NoPayload,
    })
}

/// Fenced code blocks as (info-string language, body).
fn fenced_blocks(raw: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut current: Option<(String, String)> = None;

    for event in Parser::new(raw) {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) => {
                let lang = info.split_whitespace().next().unwrap_or("").to_string();
                current = Some((lang, String::new()));
            }
            Event::Text(text) => {
                if let Some((_, body)) = current.as_mut() {
                    body.push_str(&text);
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some(block) = current.take() {
                    out.push(block);
                }
            }
            _ => {}
        }
    }
    out
}

/// Every top-level balanced `{...}` span, skipping braces inside strings.
fn balanced_objects(raw: &str) -> Vec<&str> {
    let bytes = raw.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        match matching_brace(bytes, i) {
            Some(end) => {
                spans.push(&raw[i..=end]);
                i = end + 1;
            }
            // Unclosed brace: an object may still start further on
            None => i += 1,
        }
    }
    spans
}

fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}
