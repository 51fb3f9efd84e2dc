//! ID helpers for batchr
//!
//! Work items from plain text files have no id of their own, so one is derived
//! from the source line. The derivation only depends on the line number, which
//! keeps ids identical across repeated runs over the same file.

/// Generate the id for a prompt read from a text file
///
/// Format: `line-{n}` where `n` is the 1-based source line number
/// Example: the fourth line of the file is `line-4`
pub fn line_id(line_number: usize) -> String {
    format!("line-{}", line_number)
}
