use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::resources::source::{PackageSource, is_windows_absolute_path, parse_source};

/// Version- and ref-agnostic key for "the same package".
///
/// `npm:<name>`, `git:<host>/<path>` or `local:<resolved-path>`. Used only for
/// deduplication and update targeting, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageIdentity(String);

impl PackageIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of an already parsed source; local paths resolve against `base_dir`.
pub fn package_identity(source: &PackageSource, base_dir: &Path) -> PackageIdentity {
    let key = match source {
        PackageSource::Npm { name, .. } => format!("npm:{name}"),
        PackageSource::Git { host, path, .. } => format!("git:{host}/{path}"),
        PackageSource::Local { path } => {
            if is_windows_absolute_path(path) {
                format!("local:{}", normalize_windows_path(path))
            } else {
                format!("local:{}", to_posix_path(&resolve_local_path(base_dir, path)))
            }
        }
    };
    PackageIdentity(key)
}

/// Identity of a raw source string as configured in a scope whose base dir is `scope_base`.
pub fn source_identity_for_scope(scope_base: &Path, source: &str) -> PackageIdentity {
    package_identity(&parse_source(source), scope_base)
}

/// Rewrite local sources to absolute posix paths so they survive being moved between scopes.
pub fn normalize_source_for_scope(scope_base: &Path, source: &str) -> String {
    match parse_source(source) {
        PackageSource::Npm { .. } | PackageSource::Git { .. } => source.trim().to_string(),
        PackageSource::Local { path } => {
            if is_windows_absolute_path(&path) {
                return normalize_windows_path(&path);
            }
            to_posix_path(&resolve_local_path(scope_base, &path))
        }
    }
}

pub(crate) fn resolve_local_path(base_dir: &Path, raw_path: &str) -> PathBuf {
    let expanded = expand_tilde(raw_path);
    let path = PathBuf::from(&expanded);
    let absolute = if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    };
    canonical_path(&absolute)
}

/// Lexically normalized `path` with symlinks in its parent directories resolved.
///
/// The last component is kept as written, so a symlinked file keeps its own name. Every
/// path that is deduplicated or compared goes through here.
pub(crate) fn canonical_path(path: &Path) -> PathBuf {
    let normalized = normalize_path(path);
    let (Some(parent), Some(name)) = (normalized.parent(), normalized.file_name()) else {
        return normalized;
    };
    match std::fs::canonicalize(parent) {
        Ok(parent) => parent.join(name),
        Err(_) => normalized,
    }
}

fn expand_tilde(path: &str) -> String {
    if path == "~" {
        return dirs::home_dir()
            .map(|home| home.display().to_string())
            .unwrap_or_else(|| path.to_string());
    }

    let tail = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\"));
    if let Some(suffix) = tail
        && let Some(home) = dirs::home_dir()
    {
        return home.join(suffix).display().to_string();
    }
    path.to_string()
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            _ => normalized.push(component.as_os_str()),
        }
    }
    normalized
}

fn normalize_windows_path(path: &str) -> String {
    path.replace('\\', "/")
}

fn to_posix_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
