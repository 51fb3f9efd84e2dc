//! Work item and parse error types.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::id::line_id;

/// One parsed unit of input, dispatched to the agent once (barring retries).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub prompt: String,
    /// Position in the input; fixes the item's place in the final report
    pub order: usize,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>, order: usize) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            order,
        }
    }
}

/// A malformed input entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// 1-based source line number
    pub line: usize,
    /// Position among all entries of the file (valid and invalid)
    pub order: usize,
    /// The entry's own id, when it got far enough to have one
    pub id: Option<String>,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, order: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            order,
            id: None,
            message: message.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Id to report the entry under: its own, or one derived from the line
    pub fn entry_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| line_id(self.line))
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Batch input file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// One prompt per line; blank lines and `#` comments ignored
    Text,
    /// One `{"id": ..., "message": ...}` object per line
    JsonLines,
}

impl InputFormat {
    /// Pick the format from the file extension (`.jsonl` / `.ndjson`), defaulting to text
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
            Some(ext) if ext == "jsonl" || ext == "ndjson" => InputFormat::JsonLines,
            _ => InputFormat::Text,
        }
    }
}

impl FromStr for InputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(InputFormat::Text),
            "jsonl" | "json-lines" | "ndjson" => Ok(InputFormat::JsonLines),
            other => Err(format!("unknown input format '{}' (expected text or jsonl)", other)),
        }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputFormat::Text => write!(f, "text"),
            InputFormat::JsonLines => write!(f, "jsonl"),
        }
    }
}
