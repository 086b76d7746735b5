//! Remote content snapshots, fetched as one tar stream over the remote shell.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use crate::process::ProcessRunner;
use crate::remote::RemoteShell;

const MODE_REGULAR: u32 = 0o100000;
const MODE_SYMLINK: u32 = 0o120000;

/// File content plus its git-style mode (`100644`, `100755`, `120000`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub mode: u32,
    pub data: Vec<u8>,
}

impl FileContent {
    pub fn regular(data: impl Into<Vec<u8>>) -> Self {
        Self {
            mode: MODE_REGULAR | 0o644,
            data: data.into(),
        }
    }

    /// A symlink is represented by its target text
    pub fn symlink(target: &str) -> Self {
        Self {
            mode: MODE_SYMLINK,
            data: target.as_bytes().to_vec(),
        }
    }

    /// Read `relative` under `root`; `None` when nothing is there
    pub fn read_local(root: &Path, relative: &str) -> Result<Option<Self>> {
        let path = root.join(relative);
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to stat {}", path.display()))
            }
        };

        if metadata.file_type().is_symlink() {
            let target = fs::read_link(&path)
                .with_context(|| format!("Failed to read link {}", path.display()))?;
            return Ok(Some(Self::symlink(&target.to_string_lossy())));
        }

        if !metadata.is_file() {
            return Ok(None);
        }

        let data =
            fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(Self {
            mode: regular_mode(&metadata),
            data,
        }))
    }
}

#[cfg(unix)]
fn regular_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    let executable = metadata.permissions().mode() & 0o111 != 0;
    MODE_REGULAR | if executable { 0o755 } else { 0o644 }
}

#[cfg(not(unix))]
fn regular_mode(_metadata: &fs::Metadata) -> u32 {
    MODE_REGULAR | 0o644
}

/// Remote files keyed by path relative to the archive root
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    files: BTreeMap<String, FileContent>,
}

impl Snapshot {
    /// Decode a tar stream. Directories are skipped, symlinks keep their
    /// target as content.
    pub fn from_archive(bytes: &[u8]) -> Result<Self> {
        let mut archive = tar::Archive::new(bytes);
        let mut files = BTreeMap::new();

        for entry in archive.entries().context("Failed to read snapshot archive")? {
            let mut entry = entry.context("Corrupt entry in snapshot archive")?;
            let path = normalize(&entry.path()?.to_string_lossy());
            if path.is_empty() {
                continue;
            }

            let header = entry.header();
            let content = match header.entry_type() {
                tar::EntryType::Symlink => {
                    let target = entry
                        .link_name()?
                        .map(|t| t.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    FileContent::symlink(&target)
                }
                tar::EntryType::Regular | tar::EntryType::Continuous => {
                    let executable = header.mode().unwrap_or(0o644) & 0o111 != 0;
                    let mut data = Vec::new();
                    entry
                        .read_to_end(&mut data)
                        .with_context(|| format!("Failed to read {path} from snapshot"))?;
                    FileContent {
                        mode: MODE_REGULAR | if executable { 0o755 } else { 0o644 },
                        data,
                    }
                }
                _ => continue,
            };

            files.insert(path, content);
        }

        Ok(Self { files })
    }

    pub fn get(&self, path: &str) -> Option<&FileContent> {
        self.files.get(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn normalize(path: &str) -> String {
    let mut path = path;
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    if path == "." {
        return String::new();
    }
    path.trim_end_matches('/').to_string()
}

/// Fetch `paths` (relative to the remote root) in a single archive transfer
pub fn fetch_files(
    runner: &dyn ProcessRunner,
    shell: &RemoteShell<'_>,
    paths: &[String],
) -> Result<Snapshot> {
    if paths.is_empty() {
        return Ok(Snapshot::default());
    }

    let mut words = vec!["tar", "-cf", "-", "--"];
    words.extend(paths.iter().map(String::as_str));
    fetch(runner, shell, &words)
}

/// Fetch a whole remote directory; a missing directory yields an empty snapshot
pub fn fetch_directory(
    runner: &dyn ProcessRunner,
    shell: &RemoteShell<'_>,
    dir: &str,
) -> Result<Snapshot> {
    fetch(
        runner,
        shell,
        &[
            "sh",
            "-c",
            r#"if [ -d "$1" ]; then tar -cf - -C "$1" .; fi"#,
            "sh",
            dir,
        ],
    )
}

fn fetch(runner: &dyn ProcessRunner, shell: &RemoteShell<'_>, words: &[&str]) -> Result<Snapshot> {
    let command = shell.command(words);
    let output = runner.run(&command, None)?;

    if !output.success() {
        if output.stdout.is_empty() {
            return Err(output.failure(&command).into());
        }
        log::warn!(
            "Remote tar reported problems, continuing with a partial snapshot: {}",
            output.stderr_text().trim()
        );
    }

    let snapshot = Snapshot::from_archive(&output.stdout)?;
    log::debug!("Fetched {} remote files", snapshot.len());
    Ok(snapshot)
}
