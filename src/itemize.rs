//! Change classification from rsync `--itemize-changes` output.
//!
//! Each itemized line is `YXcstpoguax <name>`: an update type, a file type and
//! nine attribute flags, padded to eleven characters. Everything rsync prints
//! that does not fit this shape (progress chatter, `new backup_dir is ...`,
//! statistics) is ignored.
//!
//! rsync prints unsafe bytes in names as `\#ooo` octal escapes (control
//! characters always, high-bit bytes when the locale cannot show them); names
//! are decoded back to their real bytes here.

/// What a pending change will do to its path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    CreateFile,
    ModifyFile,
    CreateSymlink { target: String },
    Delete,
    /// Directories are counted but never diffed
    DirectoryMarker,
}

/// One classified line of dry-run output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub kind: ChangeKind,
    /// Relative to the transfer root, without a trailing `/`
    pub path: String,
}

impl PendingChange {
    pub fn is_directory(&self) -> bool {
        self.kind == ChangeKind::DirectoryMarker
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateType {
    Sent,
    Received,
    LocalChange,
    HardLink,
    NoUpdate,
    Deleting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileType {
    File,
    Directory,
    Symlink,
    Device,
    Special,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ItemizeCode {
    update: UpdateType,
    file_type: Option<FileType>,
    is_new: bool,
}

const CODE_WIDTH: usize = 11;
const DELETING: &str = "*deleting";

impl ItemizeCode {
    fn parse(code: &str) -> Option<Self> {
        if code.starts_with(DELETING) {
            return Some(Self {
                update: UpdateType::Deleting,
                file_type: None,
                is_new: false,
            });
        }

        let mut chars = code.chars();
        let update = match chars.next()? {
            '<' => UpdateType::Sent,
            '>' => UpdateType::Received,
            'c' => UpdateType::LocalChange,
            'h' => UpdateType::HardLink,
            '.' => UpdateType::NoUpdate,
            _ => return None,
        };
        let file_type = match chars.next()? {
            'f' => FileType::File,
            'd' => FileType::Directory,
            'L' => FileType::Symlink,
            'D' => FileType::Device,
            'S' => FileType::Special,
            _ => return None,
        };

        let flags = chars.as_str();
        if flags.chars().any(char::is_whitespace) {
            return None;
        }

        Some(Self {
            update,
            file_type: Some(file_type),
            is_new: flags.starts_with("+++"),
        })
    }

    /// The classification table. Keep every itemize-specific decision here.
    fn classify(&self, name: &str) -> PendingChange {
        let (path, target) = split_name(name, self.file_type, self.update);

        if path.ends_with('/') || self.file_type == Some(FileType::Directory) {
            return PendingChange {
                kind: ChangeKind::DirectoryMarker,
                path: unescape_name(path.trim_end_matches('/')),
            };
        }

        let kind = match (self.update, self.file_type, self.is_new) {
            (UpdateType::Deleting, _, _) => ChangeKind::Delete,
            (_, Some(FileType::Symlink), true) => ChangeKind::CreateSymlink {
                target: target.as_deref().map(unescape_name).unwrap_or_default(),
            },
            (_, Some(FileType::File), true) => ChangeKind::CreateFile,
            _ => ChangeKind::ModifyFile,
        };

        PendingChange {
            kind,
            path: unescape_name(path),
        }
    }
}

/// Decode rsync's `\#ooo` escapes back into the bytes they stand for
pub fn unescape_name(name: &str) -> String {
    if !name.contains("\\#") {
        return name.to_string();
    }

    let bytes = name.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if let Some(byte) = octal_escape(&bytes[i..]) {
            decoded.push(byte);
            i += 5;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn octal_escape(bytes: &[u8]) -> Option<u8> {
    match bytes {
        [b'\\', b'#', a @ b'0'..=b'3', b @ b'0'..=b'7', c @ b'0'..=b'7', ..] => {
            Some((a - b'0') * 64 + (b - b'0') * 8 + (c - b'0'))
        }
        _ => None,
    }
}

/// Split `link -> target` and `copy => original` names
fn split_name(
    name: &str,
    file_type: Option<FileType>,
    update: UpdateType,
) -> (&str, Option<String>) {
    if file_type == Some(FileType::Symlink) {
        if let Some((path, target)) = name.split_once(" -> ") {
            return (path, Some(target.to_string()));
        }
    }
    if update == UpdateType::HardLink {
        if let Some((path, _)) = name.split_once(" => ") {
            return (path, None);
        }
    }
    (name, None)
}

/// Classify one line, or `None` when it is not an itemized entry
pub fn parse_line(line: &str) -> Option<PendingChange> {
    let line = line.trim_end_matches(['\r', '\n']);

    // `deleting x` is what rsync prints with -v but without -i
    if let Some(name) = line.strip_prefix("deleting ") {
        return Some(ItemizeCode::parse(DELETING)?.classify(name));
    }

    let code = line.get(..CODE_WIDTH)?;
    let name = line.get(CODE_WIDTH..)?.strip_prefix(' ')?;
    if name.is_empty() {
        return None;
    }

    Some(ItemizeCode::parse(code)?.classify(name))
}

/// Every entry of one dry run, in output order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    entries: Vec<PendingChange>,
}

impl ChangeSet {
    pub fn new(entries: Vec<PendingChange>) -> Self {
        Self { entries }
    }

    /// All entries including directories (used for confirmation thresholds)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PendingChange] {
        &self.entries
    }

    /// Entries that carry file content
    pub fn diffable(&self) -> impl Iterator<Item = &PendingChange> {
        self.entries.iter().filter(|c| !c.is_directory())
    }

    /// Diffable entries sorted by path
    pub fn sorted_diffable(&self) -> Vec<&PendingChange> {
        let mut changes: Vec<_> = self.diffable().collect();
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        changes
    }

    /// Paths whose current remote content is needed to render a diff.
    /// Created files have no remote copy yet, so only modifications qualify.
    pub fn snapshot_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .diffable()
            .filter(|c| c.kind == ChangeKind::ModifyFile)
            .map(|c| c.path.clone())
            .collect();
        paths.sort();
        paths
    }
}

/// Classify raw dry-run output
pub fn classify(output: &str) -> ChangeSet {
    ChangeSet::new(output.lines().filter_map(parse_line).collect())
}
