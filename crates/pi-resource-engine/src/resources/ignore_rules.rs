use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::resources::patterns::to_posix_string;

pub const IGNORE_FILE_NAMES: [&str; 3] = [".gitignore", ".ignore", ".fdignore"];

/// Ignore rules accumulated while walking down from `root`.
///
/// Rules found in a subdirectory are prefixed with that directory's path relative to the
/// root, so they only apply beneath it.
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    root: PathBuf,
    rules: Vec<String>,
    compiled: Gitignore,
}

impl IgnoreMatcher {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            rules: Vec::new(),
            compiled: Gitignore::empty(),
        }
    }

    /// Read `.gitignore`, `.ignore` and `.fdignore` from `dir` and add their rules.
    pub fn add_rules_from_dir(&mut self, dir: &Path) {
        let rel = dir
            .strip_prefix(&self.root)
            .map(to_posix_string)
            .unwrap_or_default();
        let prefix = if rel.is_empty() {
            String::new()
        } else {
            format!("{rel}/")
        };

        let mut added = false;
        for file_name in IGNORE_FILE_NAMES {
            let Ok(content) = std::fs::read_to_string(dir.join(file_name)) else {
                continue;
            };
            for line in content.lines() {
                if let Some(rule) = prefix_ignore_pattern(line, &prefix) {
                    self.rules.push(rule);
                    added = true;
                }
            }
        }

        if added {
            self.rebuild();
        }
    }

    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        if self.rules.is_empty() {
            return false;
        }
        let Ok(rel) = path.strip_prefix(&self.root) else {
            return false;
        };
        if rel.as_os_str().is_empty() {
            return false;
        }
        self.compiled.matched(rel, is_dir).is_ignore()
    }

    fn rebuild(&mut self) {
        let mut builder = GitignoreBuilder::new(&self.root);
        for rule in &self.rules {
            if let Err(e) = builder.add_line(None, rule) {
                tracing::debug!("Skipping invalid ignore rule {rule:?}: {e}");
            }
        }
        self.compiled = match builder.build() {
            Ok(compiled) => compiled,
            Err(e) => {
                tracing::debug!("Failed to compile ignore rules under {}: {e}", self.root.display());
                Gitignore::empty()
            }
        };
    }
}

/// Rewrite one ignore-file line so it is anchored at `prefix`.
///
/// Blank lines and comments yield `None`. Negation is preserved around the prefix and a
/// leading slash is dropped since the prefix already anchors the rule.
fn prefix_ignore_pattern(line: &str, prefix: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('#') {
        return None;
    }

    let mut pattern = trimmed;
    let mut negated = false;
    if let Some(rest) = pattern.strip_prefix('!') {
        negated = true;
        pattern = rest;
    } else if pattern.starts_with("\\!") || pattern.starts_with("\\#") {
        pattern = &pattern[1..];
    }
    let pattern = pattern.strip_prefix('/').unwrap_or(pattern);
    if pattern.is_empty() {
        return None;
    }

    let prefixed = format!("{prefix}{pattern}");
    Some(if negated {
        format!("!{prefixed}")
    } else {
        prefixed
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_ignore_pattern() {
        assert_eq!(prefix_ignore_pattern("# comment", "sub/"), None);
        assert_eq!(prefix_ignore_pattern("   ", "sub/"), None);
        assert_eq!(
            prefix_ignore_pattern("/build", "sub/").as_deref(),
            Some("sub/build")
        );
        assert_eq!(
            prefix_ignore_pattern("!keep.md", "sub/").as_deref(),
            Some("!sub/keep.md")
        );
        assert_eq!(prefix_ignore_pattern("*.log", "").as_deref(), Some("*.log"));
    }

    #[test]
    fn test_nested_rules_only_apply_below_their_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let sub = root.join("sub");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join(".gitignore"), "draft.md\n").unwrap();

        let mut matcher = IgnoreMatcher::new(root);
        matcher.add_rules_from_dir(root);
        let mut child = matcher.clone();
        child.add_rules_from_dir(&sub);

        assert!(child.is_ignored(&sub.join("draft.md"), false));
        assert!(!child.is_ignored(&root.join("draft.md"), false));
    }

    #[test]
    fn test_root_rules_and_negation() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::write(root.join(".ignore"), "*.md\n!keep.md\n").unwrap();
        std::fs::write(root.join(".fdignore"), "vendor/\n").unwrap();

        let mut matcher = IgnoreMatcher::new(root);
        matcher.add_rules_from_dir(root);

        assert!(matcher.is_ignored(&root.join("a.md"), false));
        assert!(!matcher.is_ignored(&root.join("keep.md"), false));
        assert!(matcher.is_ignored(&root.join("vendor"), true));
    }
}
