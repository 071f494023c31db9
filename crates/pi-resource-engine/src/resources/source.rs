//! Classification of raw package source strings.
//!
//! A source is one of:
//! - `npm:<name>[@version]`, including scoped names (`npm:@scope/name@1.2.0`)
//! - a git repository: `git@host:owner/repo`, `https://host/owner/repo`,
//!   `ssh://git@host/owner/repo`, or bare `host/owner/repo` (host must contain a dot
//!   or be `localhost`), each optionally prefixed with `git:` and suffixed with
//!   `@ref` or `#ref`
//! - anything else is a local filesystem path, resolved later against a scope's base dir

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

static NPM_SPEC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(@?[^@]+(?:/[^@]+)?)(?:@(.+))?$").expect("valid npm regex"));
static SCP_GIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^git@([^:/]+):(.+)$").expect("valid scp git regex"));
static SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://").expect("valid scheme regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    Npm {
        /// The package argument as handed to npm, e.g. `@scope/name@1.2.0`.
        spec: String,
        name: String,
        version: Option<String>,
        pinned: bool,
    },
    Git {
        /// Clone URL, without the ref suffix.
        repo: String,
        /// Lower-cased host.
        host: String,
        /// `owner/repo`, no `.git` suffix.
        path: String,
        git_ref: Option<String>,
        pinned: bool,
    },
    Local {
        /// Raw, unresolved path.
        path: String,
    },
}

impl PackageSource {
    pub fn is_pinned(&self) -> bool {
        match self {
            Self::Npm { pinned, .. } | Self::Git { pinned, .. } => *pinned,
            Self::Local { .. } => false,
        }
    }
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Npm { spec, .. } => write!(f, "npm:{spec}"),
            Self::Git { repo, git_ref, .. } => match git_ref {
                Some(git_ref) => write!(f, "{repo}@{git_ref}"),
                None => f.write_str(repo),
            },
            Self::Local { path } => f.write_str(path),
        }
    }
}

/// Parse a source string. Never fails: anything unrecognised is a local path.
pub fn parse_source(source: &str) -> PackageSource {
    let trimmed = source.trim();

    if let Some(spec) = trimmed.strip_prefix("npm:") {
        return parse_npm_spec(spec.trim());
    }

    if is_local_path_like(trimmed) {
        return PackageSource::Local {
            path: trimmed.to_string(),
        };
    }

    if let Some(git) = parse_git_source(trimmed) {
        return git;
    }

    PackageSource::Local {
        path: trimmed.to_string(),
    }
}

fn parse_npm_spec(spec: &str) -> PackageSource {
    let captures = NPM_SPEC_RE.captures(spec);
    let name = captures
        .as_ref()
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| spec.to_string());
    let version = captures
        .as_ref()
        .and_then(|cap| cap.get(2))
        .map(|m| m.as_str().to_string());
    PackageSource::Npm {
        spec: spec.to_string(),
        name,
        pinned: version.is_some(),
        version,
    }
}

pub(crate) fn is_local_path_like(value: &str) -> bool {
    value == "."
        || value == ".."
        || value.starts_with("./")
        || value.starts_with("../")
        || value.starts_with(".\\")
        || value.starts_with("..\\")
        || value.starts_with('/')
        || value == "~"
        || value.starts_with("~/")
        || value.starts_with("~\\")
        || is_windows_absolute_path(value)
}

pub(crate) fn is_windows_absolute_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    let drive_prefixed = bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/');
    drive_prefixed || path.starts_with("\\\\")
}

fn parse_git_source(source: &str) -> Option<PackageSource> {
    let raw = source
        .strip_prefix("git:")
        .map(str::trim)
        .unwrap_or(source);
    if raw.is_empty() {
        return None;
    }

    if !SCHEME_RE.is_match(raw)
        && let Some(captures) = SCP_GIT_RE.captures(raw)
    {
        let host = captures.get(1)?.as_str();
        let (repo_path, git_ref) = split_git_ref(captures.get(2)?.as_str());
        let path = normalize_git_path(repo_path)?;
        return Some(git_source(
            format!("git@{host}:{repo_path}"),
            host,
            path,
            git_ref,
        ));
    }

    if let Some((scheme, rest)) = raw.split_once("://") {
        if !SCHEME_RE.is_match(raw) {
            return None;
        }
        // The ref lives on the path part; the authority may carry its own `user@`.
        let (authority, path_with_ref) = rest.split_once('/')?;
        let (repo_path, git_ref) = split_git_ref(path_with_ref);
        let repo = format!("{scheme}://{authority}/{repo_path}");
        let parsed = url::Url::parse(&repo).ok()?;
        let host = parsed.host_str()?;
        let path = normalize_git_path(parsed.path())?;
        return Some(git_source(repo.clone(), host, path, git_ref));
    }

    let (host, path_with_ref) = raw.split_once('/')?;
    let bare_host = host.split(':').next().unwrap_or(host);
    if !(bare_host.contains('.') || bare_host.eq_ignore_ascii_case("localhost")) {
        return None;
    }
    let (repo_path, git_ref) = split_git_ref(path_with_ref);
    let path = normalize_git_path(repo_path)?;
    Some(git_source(
        format!("https://{host}/{repo_path}"),
        host,
        path,
        git_ref,
    ))
}

fn git_source(repo: String, host: &str, path: String, git_ref: Option<String>) -> PackageSource {
    PackageSource::Git {
        repo,
        host: host.to_ascii_lowercase(),
        path,
        pinned: git_ref.is_some(),
        git_ref,
    }
}

/// Split `owner/repo@ref` or `owner/repo#ref` into path and ref.
fn split_git_ref(path_ref: &str) -> (&str, Option<String>) {
    if let Some((repo_path, reference)) = path_ref.split_once('#')
        && !repo_path.is_empty()
        && !reference.is_empty()
    {
        return (repo_path, Some(reference.to_string()));
    }
    if let Some((repo_path, reference)) = path_ref.rsplit_once('@')
        && !repo_path.is_empty()
        && !reference.is_empty()
    {
        return (repo_path, Some(reference.to_string()));
    }
    (path_ref, None)
}

fn normalize_git_path(path: &str) -> Option<String> {
    let trimmed = path.trim().trim_start_matches('/').trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let segments = trimmed
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>();
    if segments.len() < 2 {
        return None;
    }
    Some(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_npm_scoped_pinned() {
        match parse_source("npm:@scope/pkg@1.2.3") {
            PackageSource::Npm {
                spec,
                name,
                version,
                pinned,
            } => {
                assert_eq!(spec, "@scope/pkg@1.2.3");
                assert_eq!(name, "@scope/pkg");
                assert_eq!(version.as_deref(), Some("1.2.3"));
                assert!(pinned);
            }
            other => panic!("expected npm source, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_npm_unpinned() {
        match parse_source("npm:widgets") {
            PackageSource::Npm {
                name,
                version,
                pinned,
                ..
            } => {
                assert_eq!(name, "widgets");
                assert!(version.is_none());
                assert!(!pinned);
            }
            other => panic!("expected npm source, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_scp_git_with_ref() {
        match parse_source("git@github.com:acme/widgets.git@v1.0.0") {
            PackageSource::Git {
                repo,
                host,
                path,
                git_ref,
                pinned,
            } => {
                assert_eq!(repo, "git@github.com:acme/widgets.git");
                assert_eq!(host, "github.com");
                assert_eq!(path, "acme/widgets");
                assert_eq!(git_ref.as_deref(), Some("v1.0.0"));
                assert!(pinned);
            }
            other => panic!("expected git source, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_ssh_url_keeps_userinfo_out_of_ref() {
        match parse_source("ssh://git@GitHub.com/acme/widgets.git") {
            PackageSource::Git {
                repo,
                host,
                path,
                git_ref,
                ..
            } => {
                assert_eq!(repo, "ssh://git@GitHub.com/acme/widgets.git");
                assert_eq!(host, "github.com");
                assert_eq!(path, "acme/widgets");
                assert!(git_ref.is_none());
            }
            other => panic!("expected git source, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_https_hash_ref() {
        match parse_source("https://github.com/foo/bar#main") {
            PackageSource::Git { repo, git_ref, .. } => {
                assert_eq!(repo, "https://github.com/foo/bar");
                assert_eq!(git_ref.as_deref(), Some("main"));
            }
            other => panic!("expected git source, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_bare_host_requires_dot_or_localhost() {
        match parse_source("git:gitlab.example.com/team/tool@feature/x") {
            PackageSource::Git {
                repo,
                host,
                path,
                git_ref,
                ..
            } => {
                assert_eq!(repo, "https://gitlab.example.com/team/tool");
                assert_eq!(host, "gitlab.example.com");
                assert_eq!(path, "team/tool");
                assert_eq!(git_ref.as_deref(), Some("feature/x"));
            }
            other => panic!("expected git source, got {other:?}"),
        }
        assert!(matches!(
            parse_source("localhost/me/repo"),
            PackageSource::Git { .. }
        ));
        assert_eq!(
            parse_source("skills/mine"),
            PackageSource::Local {
                path: "skills/mine".to_string()
            }
        );
    }

    #[test]
    fn test_parse_path_like_sources_are_local() {
        for source in ["./pkg", "../pkg", "/abs/pkg", "~", "~/pkg", "C:\\pkg", "\\\\server\\share"] {
            assert!(
                matches!(parse_source(source), PackageSource::Local { .. }),
                "{source} should be local"
            );
        }
    }

    #[test]
    fn test_unparseable_git_falls_back_to_local() {
        assert!(matches!(
            parse_source("https://github.com/only-owner"),
            PackageSource::Local { .. }
        ));
    }
}
