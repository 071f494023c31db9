use std::collections::HashSet;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};

const SKILL_FILE_NAME: &str = "SKILL.md";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

pub fn to_posix_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Whether a settings or manifest entry is a pattern rather than a plain path.
pub fn is_pattern(entry: &str) -> bool {
    is_override_pattern(entry) || entry.contains(['*', '?', '['])
}

/// `!`, `+` and `-` entries override discovery instead of naming paths.
pub fn is_override_pattern(entry: &str) -> bool {
    entry.starts_with('!') || entry.starts_with('+') || entry.starts_with('-')
}

fn normalize_exact_pattern(pattern: &str) -> String {
    let stripped = pattern
        .strip_prefix("./")
        .or_else(|| pattern.strip_prefix(".\\"))
        .unwrap_or(pattern);
    stripped.replace('\\', "/")
}

fn path_relative_to_base(path: &Path, base_dir: &Path) -> PathBuf {
    path.strip_prefix(base_dir)
        .map(PathBuf::from)
        .unwrap_or_else(|_| path.to_path_buf())
}

fn glob_matches(target: &str, pattern: &str) -> bool {
    Pattern::new(pattern)
        .map(|compiled| compiled.matches_with(target, MATCH_OPTIONS))
        .unwrap_or(false)
}

/// The strings a path is matched by: relative to base, basename, absolute.
struct MatchTargets {
    rel: String,
    name: String,
    full: String,
}

impl MatchTargets {
    fn of(path: &Path, base_dir: &Path) -> Self {
        Self {
            rel: to_posix_string(&path_relative_to_base(path, base_dir)),
            name: path
                .file_name()
                .map(|v| v.to_string_lossy().to_string())
                .unwrap_or_default(),
            full: to_posix_string(path),
        }
    }

    fn glob(&self, pattern: &str) -> bool {
        glob_matches(&self.rel, pattern)
            || glob_matches(&self.name, pattern)
            || glob_matches(&self.full, pattern)
    }

    fn exact(&self, pattern: &str) -> bool {
        pattern == self.rel || pattern == self.full
    }
}

/// A `SKILL.md` file is also addressable through its parent directory.
fn skill_parent(path: &Path) -> Option<&Path> {
    let is_skill_file = path
        .file_name()
        .is_some_and(|name| name == SKILL_FILE_NAME);
    if is_skill_file { path.parent() } else { None }
}

fn matches_any_pattern(file_path: &Path, patterns: &[&str], base_dir: &Path) -> bool {
    let targets = MatchTargets::of(file_path, base_dir);
    let parent = skill_parent(file_path).map(|p| MatchTargets::of(p, base_dir));

    patterns.iter().any(|pattern| {
        targets.glob(pattern) || parent.as_ref().is_some_and(|p| p.glob(pattern))
    })
}

fn matches_any_exact_pattern(file_path: &Path, patterns: &[&str], base_dir: &Path) -> bool {
    if patterns.is_empty() {
        return false;
    }
    let targets = MatchTargets::of(file_path, base_dir);
    let parent = skill_parent(file_path).map(|p| MatchTargets::of(p, base_dir));

    patterns.iter().any(|pattern| {
        let normalized = normalize_exact_pattern(pattern);
        targets.exact(&normalized) || parent.as_ref().is_some_and(|p| p.exact(&normalized))
    })
}

/// Apply include/exclude/force patterns to a candidate set, returning the enabled paths.
///
/// Rules:
/// - plain pattern: include (glob). No includes means everything is included.
/// - `!pattern`: exclude (glob)
/// - `+path`: force include exact path, even if excluded
/// - `-path`: force exclude exact path, always wins
///
/// Globs are tried against the path relative to `base_dir`, the basename and the absolute
/// path. For `SKILL.md` files the parent directory is tried the same way.
pub fn apply_patterns(
    all_paths: &[PathBuf],
    patterns: &[String],
    base_dir: &Path,
) -> HashSet<PathBuf> {
    let mut includes = Vec::<&str>::new();
    let mut excludes = Vec::<&str>::new();
    let mut force_includes = Vec::<&str>::new();
    let mut force_excludes = Vec::<&str>::new();

    for pattern in patterns {
        if let Some(value) = pattern.strip_prefix('+') {
            force_includes.push(value);
        } else if let Some(value) = pattern.strip_prefix('-') {
            force_excludes.push(value);
        } else if let Some(value) = pattern.strip_prefix('!') {
            excludes.push(value);
        } else {
            includes.push(pattern);
        }
    }

    let mut result = if includes.is_empty() {
        all_paths.iter().cloned().collect::<HashSet<_>>()
    } else {
        all_paths
            .iter()
            .filter(|path| matches_any_pattern(path, &includes, base_dir))
            .cloned()
            .collect::<HashSet<_>>()
    };

    if !excludes.is_empty() {
        result.retain(|path| !matches_any_pattern(path, &excludes, base_dir));
    }

    if !force_includes.is_empty() {
        for path in all_paths {
            if matches_any_exact_pattern(path, &force_includes, base_dir) {
                result.insert(path.clone());
            }
        }
    }

    if !force_excludes.is_empty() {
        result.retain(|path| !matches_any_exact_pattern(path, &force_excludes, base_dir));
    }

    result
}
