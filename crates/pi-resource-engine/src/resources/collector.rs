//! On-disk discovery of candidate resource files.
//!
//! Walks skip dot entries and `node_modules`, honour `.gitignore`/`.ignore`/`.fdignore`
//! rules, and follow symlinks to their target type. Unreadable directories and broken
//! symlinks contribute nothing.

use std::path::{Path, PathBuf};

use crate::resources::ignore_rules::IgnoreMatcher;
use crate::resources::manifest::read_package_manifest;
use crate::resources::patterns::is_pattern;
use crate::resources::types::ResourceType;

pub const SKILL_FILE_NAME: &str = "SKILL.md";
const DEPENDENCY_DIR_NAME: &str = "node_modules";
const EXTENSION_INDEX_FILES: [&str; 2] = ["index.ts", "index.js"];

/// All candidate files of `resource_type` under `dir`, in a stable order.
pub fn collect_resource_files(dir: &Path, resource_type: ResourceType) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    let mut out = Vec::new();
    match resource_type {
        ResourceType::Extensions => {
            if let Some(entries) = resolve_extension_entries(dir) {
                return entries;
            }
            walk_extensions(dir, &IgnoreMatcher::new(dir), true, &mut out);
        }
        ResourceType::Skills => {
            let skill_file = dir.join(SKILL_FILE_NAME);
            if skill_file.is_file() {
                return vec![skill_file];
            }
            walk_skills(dir, &IgnoreMatcher::new(dir), true, &mut out);
        }
        ResourceType::Prompts | ResourceType::Themes => {
            walk_flat(dir, &IgnoreMatcher::new(dir), resource_type, &mut out);
        }
    }
    out
}

/// Expand explicit paths: files are kept as-is, directories are collected.
pub fn collect_files_from_paths(paths: &[PathBuf], resource_type: ResourceType) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for path in paths {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => out.push(path.clone()),
            Ok(meta) if meta.is_dir() => out.extend(collect_resource_files(path, resource_type)),
            Ok(_) => {}
            Err(e) => tracing::debug!("Skipping {}: {e}", path.display()),
        }
    }
    out
}

/// A directory that is a single extension: its manifest-listed entries, or its index file.
pub fn resolve_extension_entries(dir: &Path) -> Option<Vec<PathBuf>> {
    if let Some(entries) = read_package_manifest(dir).and_then(|m| m.extensions) {
        let mut files = Vec::new();
        for entry in entries.iter().filter(|entry| !is_pattern(entry)) {
            let path = dir.join(entry);
            match std::fs::metadata(&path) {
                Ok(meta) if meta.is_file() => files.push(path),
                Ok(meta) if meta.is_dir() => {
                    walk_extensions(&path, &IgnoreMatcher::new(&path), true, &mut files);
                }
                _ => tracing::debug!("Manifest extension entry not found: {}", path.display()),
            }
        }
        if !files.is_empty() {
            return Some(files);
        }
    }

    EXTENSION_INDEX_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .map(|index| vec![index])
}

struct WalkEntry {
    path: PathBuf,
    is_dir: bool,
}

/// Visible, non-ignored children of `dir`, sorted by name.
fn list_entries(dir: &Path, matcher: &IgnoreMatcher) -> Vec<WalkEntry> {
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) => {
            tracing::debug!("Cannot read {}: {e}", dir.display());
            return Vec::new();
        }
    };

    let mut entries = Vec::new();
    for entry in read.filter_map(Result::ok) {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name == DEPENDENCY_DIR_NAME {
            continue;
        }

        let path = entry.path();
        let is_dir = match entry.file_type() {
            Ok(file_type) if file_type.is_symlink() => match std::fs::metadata(&path) {
                Ok(target) => target.is_dir(),
                Err(_) => {
                    tracing::debug!("Skipping broken symlink {}", path.display());
                    continue;
                }
            },
            Ok(file_type) => file_type.is_dir(),
            Err(_) => continue,
        };

        if matcher.is_ignored(&path, is_dir) {
            continue;
        }
        entries.push(WalkEntry { path, is_dir });
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    entries
}

fn scoped_matcher(dir: &Path, parent: &IgnoreMatcher) -> IgnoreMatcher {
    let mut matcher = parent.clone();
    matcher.add_rules_from_dir(dir);
    matcher
}

fn walk_extensions(dir: &Path, parent: &IgnoreMatcher, is_root: bool, out: &mut Vec<PathBuf>) {
    let matcher = scoped_matcher(dir, parent);
    for entry in list_entries(dir, &matcher) {
        if entry.is_dir {
            match resolve_extension_entries(&entry.path) {
                Some(entries) => out.extend(entries),
                None => walk_extensions(&entry.path, &matcher, false, out),
            }
        } else if is_root && ResourceType::Extensions.matches_suffix(&entry.path) {
            out.push(entry.path);
        }
    }
}

fn walk_skills(dir: &Path, parent: &IgnoreMatcher, is_root: bool, out: &mut Vec<PathBuf>) {
    let matcher = scoped_matcher(dir, parent);
    for entry in list_entries(dir, &matcher) {
        if entry.is_dir {
            walk_skills(&entry.path, &matcher, false, out);
        } else if is_root {
            if ResourceType::Skills.matches_suffix(&entry.path) {
                out.push(entry.path);
            }
        } else if entry
            .path
            .file_name()
            .is_some_and(|name| name == SKILL_FILE_NAME)
        {
            out.push(entry.path);
        }
    }
}

fn walk_flat(
    dir: &Path,
    parent: &IgnoreMatcher,
    resource_type: ResourceType,
    out: &mut Vec<PathBuf>,
) {
    let matcher = scoped_matcher(dir, parent);
    for entry in list_entries(dir, &matcher) {
        if entry.is_dir {
            walk_flat(&entry.path, &matcher, resource_type, out);
        } else if resource_type.matches_suffix(&entry.path) {
            out.push(entry.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, "x").unwrap();
    }

    fn names(root: &Path, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_skill_root_files_count_but_nested_plain_markdown_does_not() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(&root.join("guide.md"));
        touch(&root.join("nested").join("notes.md"));
        touch(&root.join("tool").join("SKILL.md"));
        touch(&root.join("tool").join("reference.md"));

        let files = collect_resource_files(root, ResourceType::Skills);
        assert_eq!(names(root, &files), vec!["guide.md", "tool/SKILL.md"]);

        let nested = collect_resource_files(&root.join("nested"), ResourceType::Skills);
        assert_eq!(names(&root.join("nested"), &nested), vec!["notes.md"]);
    }

    #[test]
    fn test_skill_directory_maps_to_skill_file() {
        let tmp = tempfile::tempdir().unwrap();
        let skill = tmp.path().join("my-skill");
        touch(&skill.join("SKILL.md"));
        touch(&skill.join("extra.md"));

        let files = collect_resource_files(&skill, ResourceType::Skills);
        assert_eq!(files, vec![skill.join("SKILL.md")]);
    }

    #[test]
    fn test_extension_units_and_top_level_scripts() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(&root.join("single.ts"));
        touch(&root.join("readme.md"));
        touch(&root.join("with-index").join("index.ts"));
        touch(&root.join("with-index").join("helper.ts"));
        touch(&root.join("group").join("inner").join("index.js"));
        touch(&root.join("group").join("loose.ts"));
        touch(&root.join("manifested").join("src").join("main.ts"));
        std::fs::write(
            root.join("manifested").join("package.json"),
            r#"{"pi":{"extensions":["src/main.ts"]}}"#,
        )
        .unwrap();

        let files = collect_resource_files(root, ResourceType::Extensions);
        assert_eq!(
            names(root, &files),
            vec![
                "group/inner/index.js",
                "manifested/src/main.ts",
                "single.ts",
                "with-index/index.ts",
            ]
        );
    }

    #[test]
    fn test_root_extension_unit() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("index.ts"));
        touch(&tmp.path().join("other.ts"));
        let files = collect_resource_files(tmp.path(), ResourceType::Extensions);
        assert_eq!(files, vec![tmp.path().join("index.ts")]);
    }

    #[test]
    fn test_prompts_recursive_skips_hidden_dependencies_and_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(&root.join("a.md"));
        touch(&root.join("sub").join("b.md"));
        touch(&root.join("sub").join("draft.md"));
        touch(&root.join(".hidden").join("c.md"));
        touch(&root.join("node_modules").join("d.md"));
        touch(&root.join("e.txt"));
        std::fs::write(root.join("sub").join(".gitignore"), "draft.md\n").unwrap();

        let files = collect_resource_files(root, ResourceType::Prompts);
        assert_eq!(names(root, &files), vec!["a.md", "sub/b.md"]);
    }

    #[test]
    fn test_themes_collect_json() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("dark.json"));
        touch(&tmp.path().join("nested").join("light.json"));
        touch(&tmp.path().join("notes.md"));
        let files = collect_resource_files(tmp.path(), ResourceType::Themes);
        assert_eq!(names(tmp.path(), &files), vec!["dark.json", "nested/light.json"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_followed_and_broken_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        let outside = tmp.path().join("outside");
        touch(&outside.join("linked.md"));
        std::fs::create_dir_all(&root).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("linked-dir")).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("missing"), root.join("broken.md")).unwrap();

        let files = collect_resource_files(&root, ResourceType::Prompts);
        assert_eq!(names(&root, &files), vec!["linked-dir/linked.md"]);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        assert!(collect_resource_files(Path::new("/nonexistent/dir"), ResourceType::Skills).is_empty());
    }
}
