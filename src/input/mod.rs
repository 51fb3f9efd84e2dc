//! Work-item parsing for batch input files.
//!
//! Two formats are understood:
//! - **Text**: one prompt per line, ids derived from line numbers
//! - **JSON lines**: one `{"id", "message"}` object per line

mod item;
mod parser;

pub use item::{InputFormat, ParseError, WorkItem};
pub use parser::{AdmittedInput, ParsedInput, parse_file, parse_str};
