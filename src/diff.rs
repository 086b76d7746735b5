//! Git-style change reports.
//!
//! The rendered text is plain unified diff so it can be piped into `patch`,
//! `git apply` or any diff viewer. Colour and paging only wrap it for display.

use anyhow::Result;
use colored::Colorize;
use similar::TextDiff;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::itemize::{ChangeKind, ChangeSet, PendingChange};
use crate::snapshot::{FileContent, Snapshot};

/// Above this many entries the operator confirms before anything is fetched
pub const LARGE_CHANGE_SET: usize = 50;

const DIFF_CONTEXT_LINES: usize = 3;
const DEV_NULL: &str = "/dev/null";
const DEFAULT_MODE: u32 = 0o100644;

/// Render one change against the pre-transfer remote `snapshot` and the
/// local working tree.
pub fn render_change(
    change: &PendingChange,
    local_root: &Path,
    snapshot: &Snapshot,
) -> Result<String> {
    let path = change.path.as_str();

    let text = match &change.kind {
        ChangeKind::DirectoryMarker => String::new(),
        ChangeKind::Delete => match snapshot.get(path) {
            Some(remote) => git_diff(path, Some(remote), None),
            None => {
                // Deleted content is not part of the snapshot
                let mut out = header(path, &format!("deleted file mode {DEFAULT_MODE:06o}"));
                let _ = writeln!(out, "--- a/{path}");
                let _ = writeln!(out, "+++ {DEV_NULL}");
                out
            }
        },
        ChangeKind::CreateFile => {
            let local = FileContent::read_local(local_root, path)?;
            git_diff(path, None, Some(&local.unwrap_or_else(|| FileContent::regular(""))))
        }
        ChangeKind::CreateSymlink { target } => {
            git_diff(path, None, Some(&FileContent::symlink(target)))
        }
        ChangeKind::ModifyFile => {
            let local = FileContent::read_local(local_root, path)?;
            let empty = FileContent::regular("");
            let remote = snapshot.get(path).unwrap_or(&empty);
            git_diff(path, Some(remote), local.as_ref())
        }
    };

    Ok(text)
}

/// Render every diffable change, sorted by path
pub fn render_report(changes: &ChangeSet, local_root: &Path, snapshot: &Snapshot) -> Result<String> {
    let mut report = String::new();
    for change in changes.sorted_diffable() {
        report.push_str(&render_change(change, local_root, snapshot)?);
    }
    Ok(report)
}

/// Header plus unified diff between two optional sides of `path`.
/// `None` stands for `/dev/null`.
pub fn git_diff(path: &str, before: Option<&FileContent>, after: Option<&FileContent>) -> String {
    let old_label = format!("a/{path}");
    let new_label = format!("b/{path}");

    match (before, after) {
        (None, None) => String::new(),
        (None, Some(after)) => {
            let mut out = header(path, &format!("new file mode {:06o}", after.mode));
            out.push_str(&unified(DEV_NULL, &new_label, b"", &after.data));
            out
        }
        (Some(before), None) => {
            let mut out = header(path, &format!("deleted file mode {:06o}", before.mode));
            out.push_str(&unified(&old_label, DEV_NULL, &before.data, b""));
            out
        }
        (Some(before), Some(after)) => {
            let mode_line = if before.mode == after.mode {
                format!("index 0000000..0000000 {:06o}", after.mode)
            } else {
                format!("old mode {:06o}\nnew mode {:06o}", before.mode, after.mode)
            };
            let mut out = header(path, &mode_line);
            out.push_str(&unified(&old_label, &new_label, &before.data, &after.data));
            out
        }
    }
}

fn header(path: &str, mode_line: &str) -> String {
    format!("diff --git a/{path} b/{path}\n{mode_line}\n")
}

fn unified(old_label: &str, new_label: &str, old: &[u8], new: &[u8]) -> String {
    if old == new {
        return String::new();
    }

    match (std::str::from_utf8(old), std::str::from_utf8(new)) {
        (Ok(old), Ok(new)) => TextDiff::from_lines(old, new)
            .unified_diff()
            .context_radius(DIFF_CONTEXT_LINES)
            .header(old_label, new_label)
            .to_string(),
        _ => format!("Binary files {old_label} and {new_label} differ\n"),
    }
}

/// Wrap diff text in ANSI colours line by line; the text itself is unchanged
pub fn colorize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());

    for line in text.split_inclusive('\n') {
        let (body, newline) = match line.strip_suffix('\n') {
            Some(body) => (body, "\n"),
            None => (line, ""),
        };

        let styled = if body.starts_with("diff --git")
            || body.starts_with("+++ ")
            || body.starts_with("--- ")
        {
            body.bold().to_string()
        } else if body.starts_with("@@") {
            body.blue().to_string()
        } else if body.starts_with('+') {
            body.green().to_string()
        } else if body.starts_with('-') {
            body.red().to_string()
        } else {
            body.to_string()
        };

        out.push_str(&styled);
        out.push_str(newline);
    }

    out
}

/// Print a report, coloured and paged when enabled and stdout is a terminal
pub fn present(text: &str, color: bool, paginate: bool) -> Result<()> {
    let terminal = atty::is(atty::Stream::Stdout);
    let display = if color && terminal {
        colorize(text)
    } else {
        text.to_string()
    };

    if paginate && terminal && page(&display).is_ok() {
        return Ok(());
    }

    print!("{display}");
    std::io::stdout().flush()?;
    Ok(())
}

/// Pipe text through `$PAGER` (default `less -R`)
fn page(text: &str) -> std::io::Result<()> {
    let pager = std::env::var("PAGER").unwrap_or_else(|_| "less -R".to_string());
    let mut words = pager.split_whitespace();
    let program = words.next().unwrap_or("less");

    let mut child = Command::new(program)
        .args(words)
        .stdin(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        // The pager closing early (user quits) is not an error
        let _ = stdin.write_all(text.as_bytes());
    }
    child.wait()?;
    Ok(())
}
