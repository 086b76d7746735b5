use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use crate::config::{EffectiveOptions, CONFIG_FILE, IGNORE_FILE};

/// Paths never transferred in either direction
pub const DEFAULT_EXCLUDES: &[&str] = &[".git", ".svn", ".DS_Store"];

/// One entry of the ordered rule list handed to rsync
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FilterRule {
    Include(String),
    Exclude(String),
    /// Merge an rsync filter file in place
    ReferenceIgnoreFile(PathBuf),
}

impl FilterRule {
    /// Render as a single rsync argument
    pub fn to_arg(&self) -> String {
        match self {
            FilterRule::Include(pattern) => format!("--include={pattern}"),
            FilterRule::Exclude(pattern) => format!("--exclude={pattern}"),
            FilterRule::ReferenceIgnoreFile(path) => format!("--filter=merge {}", path.display()),
        }
    }
}

/// A restriction entry after glob expansion, relative to the project root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestrictedPath {
    pub relative: PathBuf,
}

/// Build the complete rule list for one invocation.
///
/// Order: the project ignore file first so its `+` lines can re-include
/// anything the built-in excludes would drop, then built-in excludes, then
/// user `ignore` entries, then the path restriction (if any).
pub fn build_filter_rules(options: &EffectiveOptions, cwd: &Path) -> Result<Vec<FilterRule>> {
    let mut rules = Vec::new();

    if let Some(ignore_file) = options.ignore_file() {
        rules.push(FilterRule::ReferenceIgnoreFile(ignore_file));
    }

    rules.extend(
        DEFAULT_EXCLUDES
            .iter()
            .map(|p| FilterRule::Exclude(p.to_string())),
    );
    rules.push(FilterRule::Exclude(format!("/{CONFIG_FILE}")));
    rules.push(FilterRule::Exclude(format!("/{IGNORE_FILE}")));
    if let Some(backup_path) = &options.backup_path {
        rules.push(FilterRule::Exclude(format!(
            "/{}",
            backup_path.trim_start_matches('/')
        )));
    }

    rules.extend(options.ignore.iter().map(|p| FilterRule::Exclude(p.clone())));

    if let Some(restriction) = &options.local_path {
        let paths = expand_restriction(restriction, cwd, &options.project_root)?;
        log::debug!("Path restriction matched {} entries", paths.len());
        rules.extend(restriction_rules(&paths));
    }

    Ok(rules)
}

/// Expand the space-separated `path=` value against the local filesystem
pub fn expand_restriction(restriction: &str, cwd: &Path, root: &Path) -> Result<Vec<RestrictedPath>> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Failed to resolve project root {}", root.display()))?;
    let mut paths = Vec::new();

    for entry in restriction.split_whitespace() {
        let pattern = if Path::new(entry).is_absolute() {
            entry.to_string()
        } else {
            format!(
                "{}/{}",
                glob::Pattern::escape(&cwd.to_string_lossy()),
                entry
            )
        };

        let matches = glob::glob(&pattern)
            .with_context(|| format!("Invalid path pattern '{entry}'"))?;

        for found in matches {
            let found = found.with_context(|| format!("Failed to expand '{entry}'"))?;
            let absolute = found.canonicalize().unwrap_or(found);

            match absolute.strip_prefix(&root) {
                Ok(relative) => paths.push(RestrictedPath {
                    relative: relative.to_path_buf(),
                }),
                Err(_) => log::warn!(
                    "Skipping {}: outside of the project root {}",
                    absolute.display(),
                    root.display()
                ),
            }
        }
    }

    Ok(paths)
}

/// Include rules for each restricted path and its ancestors, sibling excludes
/// for every ancestor directory, then a catch-all exclude.
///
/// rsync stops descending into an excluded directory, so every ancestor has to
/// be included explicitly while its other children stay excluded. An empty
/// `paths` slice still yields the catch-all, i.e. an empty transfer.
pub fn restriction_rules(paths: &[RestrictedPath]) -> Vec<FilterRule> {
    let components: Vec<Vec<String>> = paths
        .iter()
        .map(|p| {
            p.relative
                .components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect()
        })
        .collect();

    // The project root itself means "everything"
    if components.iter().any(Vec::is_empty) {
        return Vec::new();
    }

    // A path already covered by one of its ancestors adds nothing
    let mut kept: Vec<&Vec<String>> = Vec::new();
    for candidate in &components {
        let covered = components
            .iter()
            .any(|other| other.len() < candidate.len() && candidate.starts_with(other));
        if !covered {
            kept.push(candidate);
        }
    }

    let mut seen = HashSet::new();
    let mut includes = Vec::new();
    let mut excludes = Vec::new();

    for parts in kept {
        let target = FilterRule::Include(format!("/{}", parts.join("/")));
        if seen.insert(target.clone()) {
            includes.push(target);
        }

        for depth in (1..parts.len()).rev() {
            let ancestor = parts[..depth].join("/");

            let include = FilterRule::Include(format!("/{ancestor}/"));
            if seen.insert(include.clone()) {
                includes.push(include);
            }

            let exclude = FilterRule::Exclude(format!("/{ancestor}/*"));
            if seen.insert(exclude.clone()) {
                excludes.push(exclude);
            }
        }
    }

    includes.extend(excludes);
    includes.push(FilterRule::Exclude("/*".to_string()));
    includes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::test_support::options;
    use std::fs;
    use tempfile::TempDir;

    fn rel(path: &str) -> RestrictedPath {
        RestrictedPath {
            relative: PathBuf::from(path),
        }
    }

    fn count(rules: &[FilterRule]) -> (usize, usize) {
        let includes = rules
            .iter()
            .filter(|r| matches!(r, FilterRule::Include(_)))
            .count();
        let excludes = rules
            .iter()
            .filter(|r| matches!(r, FilterRule::Exclude(p) if p != "/*"))
            .count();
        (includes, excludes)
    }

    #[test]
    fn test_nested_path_includes_target_and_ancestors_excludes_ancestor_siblings() {
        let rules = restriction_rules(&[rel("app/views/index.html")]);

        assert_eq!(
            rules,
            vec![
                FilterRule::Include("/app/views/index.html".into()),
                FilterRule::Include("/app/views/".into()),
                FilterRule::Include("/app/".into()),
                FilterRule::Exclude("/app/views/*".into()),
                FilterRule::Exclude("/app/*".into()),
                FilterRule::Exclude("/*".into()),
            ]
        );

        // Two ancestor directories: two sibling excludes, two ancestor
        // includes plus the target itself, one trailing catch-all
        assert_eq!(count(&rules), (3, 2));
        assert_eq!(
            rules.iter().filter(|r| **r == FilterRule::Exclude("/*".into())).count(),
            1
        );
    }

    #[test]
    fn test_top_level_path() {
        let rules = restriction_rules(&[rel("public")]);
        assert_eq!(
            rules,
            vec![
                FilterRule::Include("/public".into()),
                FilterRule::Exclude("/*".into()),
            ]
        );
    }

    #[test]
    fn test_shared_ancestors_are_deduplicated() {
        let rules = restriction_rules(&[rel("app/a.php"), rel("app/b.php")]);
        assert_eq!(
            rules,
            vec![
                FilterRule::Include("/app/a.php".into()),
                FilterRule::Include("/app/".into()),
                FilterRule::Include("/app/b.php".into()),
                FilterRule::Exclude("/app/*".into()),
                FilterRule::Exclude("/*".into()),
            ]
        );
    }

    #[test]
    fn test_path_inside_another_restriction_is_dropped() {
        let rules = restriction_rules(&[rel("app/views/index.html"), rel("app")]);
        assert_eq!(
            rules,
            vec![
                FilterRule::Include("/app".into()),
                FilterRule::Exclude("/*".into()),
            ]
        );
    }

    #[test]
    fn test_no_matches_yields_empty_transfer() {
        assert_eq!(
            restriction_rules(&[]),
            vec![FilterRule::Exclude("/*".into())]
        );
    }

    #[test]
    fn test_no_restriction_is_full_tree_sync() {
        let temp = TempDir::new().unwrap();
        let mut opts = options(temp.path());
        opts.ignore = vec!["node_modules".into(), "*.log".into()];

        let rules = build_filter_rules(&opts, temp.path()).unwrap();

        assert!(rules.iter().all(|r| !matches!(r, FilterRule::Include(_))));
        assert!(!rules.contains(&FilterRule::Exclude("/*".into())));
        assert!(rules.contains(&FilterRule::Exclude("node_modules".into())));
        assert!(rules.contains(&FilterRule::Exclude("/.backups".into())));
    }

    #[test]
    fn test_ignore_file_comes_first() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(IGNORE_FILE), "- cache/\n").unwrap();
        let opts = options(temp.path());

        let rules = build_filter_rules(&opts, temp.path()).unwrap();
        assert_eq!(
            rules[0],
            FilterRule::ReferenceIgnoreFile(temp.path().join(IGNORE_FILE))
        );
        assert!(rules[0].to_arg().starts_with("--filter=merge "));
    }

    #[test]
    fn test_restriction_expands_wildcards_relative_to_cwd() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("app/views")).unwrap();
        fs::write(root.join("app/views/index.html"), "<html>").unwrap();
        fs::write(root.join("app/views/about.html"), "<html>").unwrap();
        fs::write(root.join("app/views/notes.txt"), "notes").unwrap();

        let mut found = expand_restriction("views/*.html", &root.join("app"), root).unwrap();
        found.sort_by(|a, b| a.relative.cmp(&b.relative));

        assert_eq!(
            found,
            vec![rel("app/views/about.html"), rel("app/views/index.html")]
        );
    }

    #[test]
    fn test_restriction_with_several_entries_and_no_match() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("index.php"), "<?php").unwrap();

        let found = expand_restriction("index.php missing/*.css", root, root).unwrap();
        assert_eq!(found, vec![rel("index.php")]);

        let mut opts = options(root);
        opts.local_path = Some("nothing-here".into());
        let rules = build_filter_rules(&opts, root).unwrap();
        assert_eq!(rules.last(), Some(&FilterRule::Exclude("/*".into())));
        assert!(rules.iter().all(|r| !matches!(r, FilterRule::Include(_))));
    }

    #[test]
    fn test_rule_arguments() {
        assert_eq!(FilterRule::Include("/app/".into()).to_arg(), "--include=/app/");
        assert_eq!(FilterRule::Exclude("*.log".into()).to_arg(), "--exclude=*.log");
    }
}
