//! Batch input parser - turns a file into ordered work items.
//!
//! Parsing never talks to the agent. Malformed entries are collected as
//! `ParseError`s rather than failing immediately; whether they abort the run
//! is decided afterwards by [`ParsedInput::admit`].

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use super::item::{InputFormat, ParseError, WorkItem};
use crate::error::{BatchError, Result};
use crate::id::line_id;

/// Everything read from one input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInput {
    pub format: InputFormat,
    pub items: Vec<WorkItem>,
    pub errors: Vec<ParseError>,
}

/// Work items cleared for dispatch, plus invalid entries excluded from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmittedInput {
    pub items: Vec<WorkItem>,
    pub skipped: Vec<ParseError>,
}

impl ParsedInput {
    /// Number of entries (valid and invalid) found in the file
    pub fn total_entries(&self) -> usize {
        self.items.len() + self.errors.len()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Apply the invalid-entry policy.
    ///
    /// With `validate_input` set and `skip_invalid` unset, any error aborts the
    /// run. Otherwise invalid entries are handed back as skipped.
    pub fn admit(self, skip_invalid: bool, validate_input: bool) -> Result<AdmittedInput> {
        if self.errors.is_empty() {
            return Ok(AdmittedInput {
                items: self.items,
                skipped: Vec::new(),
            });
        }

        if validate_input && !skip_invalid {
            return Err(BatchError::InvalidInput { errors: self.errors });
        }

        for error in &self.errors {
            warn!(line = error.line, reason = %error.message, "Skipping invalid input entry");
        }

        Ok(AdmittedInput {
            items: self.items,
            skipped: self.errors,
        })
    }
}

/// Read and parse a batch file; `format` overrides extension-based detection
pub fn parse_file(path: &Path, format: Option<InputFormat>) -> Result<ParsedInput> {
    let format = format.unwrap_or_else(|| InputFormat::detect(path));
    let content = fs::read_to_string(path)?;
    let parsed = parse_str(&content, format);

    debug!(
        path = %path.display(),
        format = %format,
        items = parsed.items.len(),
        errors = parsed.errors.len(),
        "Parsed batch input"
    );

    Ok(parsed)
}

/// Parse already-loaded file content
pub fn parse_str(content: &str, format: InputFormat) -> ParsedInput {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    match format {
        InputFormat::Text => parse_text(content),
        InputFormat::JsonLines => parse_json_lines(content),
    }
}

fn parse_text(content: &str) -> ParsedInput {
    // prompts keep their own whitespace; trimming only decides blank and comment lines
    let items = content
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.strip_suffix('\r').unwrap_or(line)))
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .enumerate()
        .map(|(order, (line_number, prompt))| WorkItem::new(line_id(line_number), prompt, order))
        .collect();

    ParsedInput {
        format: InputFormat::Text,
        items,
        errors: Vec::new(),
    }
}

fn parse_json_lines(content: &str) -> ParsedInput {
    let mut items = Vec::new();
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let mut order = 0;

    for (idx, line) in content.lines().enumerate() {
        let line_number = idx + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_entry(line) {
            Ok((id, _)) if seen.contains(&id) => {
                let error = ParseError::new(line_number, order, format!("duplicate id '{}'", id));
                errors.push(error.with_id(id));
            }
            Ok((id, message)) => {
                seen.insert(id.clone());
                items.push(WorkItem::new(id, message, order));
            }
            Err((id, reason)) => {
                let error = ParseError::new(line_number, order, reason);
                errors.push(match id {
                    Some(id) => error.with_id(id),
                    None => error,
                });
            }
        }
        order += 1;
    }

    ParsedInput {
        format: InputFormat::JsonLines,
        items,
        errors,
    }
}

/// Extract `(id, message)` from one JSON line; extra fields are ignored
///
/// On failure the entry's id is returned alongside the reason once it is known.
fn parse_entry(line: &str) -> std::result::Result<(String, String), (Option<String>, String)> {
    let value: Value = serde_json::from_str(line).map_err(|e| (None, format!("invalid JSON: {}", e)))?;
    let object = value.as_object().ok_or((None, "expected a JSON object".to_string()))?;

    let id = required_string(object, "id").map_err(|reason| (None, reason))?;
    if id.trim().is_empty() {
        return Err((None, "field 'id' must not be empty".to_string()));
    }
    let message = required_string(object, "message").map_err(|reason| (Some(id.clone()), reason))?;

    Ok((id, message))
}

fn required_string(object: &serde_json::Map<String, Value>, field: &str) -> std::result::Result<String, String> {
    match object.get(field) {
        None | Some(Value::Null) => Err(format!("missing field '{}'", field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(format!("field '{}' must be a string", field)),
    }
}
