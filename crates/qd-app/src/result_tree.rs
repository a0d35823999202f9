//! Result directory listing for browsing views.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryKind {
    Directory,
    Text,
    Log,
    Output,
    File,
}

impl EntryKind {
    /// Kind of a file from its extension.
    pub fn for_file(name: &str) -> Self {
        let ext = Path::new(name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        match ext.as_deref() {
            Some("dat") | Some("txt") => EntryKind::Text,
            Some("log") => EntryKind::Log,
            Some("out") => EntryKind::Output,
            _ => EntryKind::File,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            EntryKind::Directory => "[DIR]",
            EntryKind::Text => "[TXT]",
            EntryKind::Log => "[LOG]",
            EntryKind::Output => "[OUT]",
            EntryKind::File => "[FILE]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultEntry {
    pub name: String,
    pub kind: EntryKind,
    /// File size in bytes; `None` for directories.
    pub size: Option<u64>,
    pub modified: Option<DateTime<Local>>,
    pub children: Vec<ResultEntry>,
}

impl ResultEntry {
    pub fn label(&self) -> String {
        format!("{} {}", self.kind.tag(), self.name)
    }

    pub fn size_label(&self) -> String {
        match self.size {
            Some(bytes) => human_size(bytes),
            None => "Directory".to_string(),
        }
    }

    pub fn modified_label(&self) -> String {
        self.modified
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default()
    }

    /// Indented text rendering, one entry per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        out.push_str(&format!(
            "{}{}  {}  {}\n",
            "  ".repeat(depth),
            self.label(),
            self.size_label(),
            self.modified_label()
        ));
        for child in &self.children {
            child.render_into(out, depth + 1);
        }
    }
}

/// `B` up to 1 KiB, then `KB` and `MB` with one decimal.
pub fn human_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    if bytes > MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes > KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Scan `dir` recursively. Returns `None` if `dir` does not exist;
/// unreadable subdirectories appear without children.
pub fn scan_results(dir: &Path) -> Option<ResultEntry> {
    if !dir.is_dir() {
        return None;
    }
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| dir.display().to_string());
    Some(ResultEntry {
        name,
        kind: EntryKind::Directory,
        size: None,
        modified: modified_time(dir),
        children: scan_children(dir),
    })
}

fn scan_children(dir: &Path) -> Vec<ResultEntry> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
            return Vec::new();
        }
    };

    let mut children: Vec<ResultEntry> = entries
        .filter_map(Result::ok)
        .map(|entry| {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                ResultEntry {
                    kind: EntryKind::Directory,
                    size: None,
                    modified: modified_time(&path),
                    children: scan_children(&path),
                    name,
                }
            } else {
                ResultEntry {
                    kind: EntryKind::for_file(&name),
                    size: fs::metadata(&path).map(|m| m.len()).ok(),
                    modified: modified_time(&path),
                    children: Vec::new(),
                    name,
                }
            }
        })
        .collect();
    children.sort_by(|a, b| a.name.cmp(&b.name));
    children
}

fn modified_time(path: &Path) -> Option<DateTime<Local>> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Local>::from(modified))
}
