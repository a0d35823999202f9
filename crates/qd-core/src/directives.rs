//! `.inp` directive scanning.
//!
//! QUANTICS input files are line oriented. Two directives matter to the
//! orchestration layer: `name = <dir>` picks the directory the executable
//! writes its results into, and `opname = <file>` picks the operator file
//! name (without the `.op` extension) the executable looks for.

use std::fs;
use std::io;
use std::path::Path;

pub const NAME_DIRECTIVE: &str = "name";
pub const OPNAME_DIRECTIVE: &str = "opname";

/// Return the value of the first `key = value` line in `text`.
///
/// Keys match exactly after trimming, so `name` never matches `opname`.
/// Only the first line with the key is considered; an empty value there
/// counts as absent.
pub fn find_directive(text: &str, key: &str) -> Option<String> {
    let rhs = text.lines().find_map(|line| {
        let (lhs, rhs) = line.trim().split_once('=')?;
        (lhs.trim() == key).then_some(rhs)
    })?;
    let value = rhs.split('=').next().unwrap_or_default().trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Read `path` and look up `key` in it.
pub fn read_directive(path: &Path, key: &str) -> io::Result<Option<String>> {
    let text = fs::read_to_string(path)?;
    Ok(find_directive(&text, key))
}
