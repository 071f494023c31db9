use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ResourceError;
use crate::resources::frontmatter;

/// Prompt template loaded from markdown.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub name: String,
    pub description: Option<String>,
    pub content: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFrontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

pub fn load_prompt_from_file(path: &Path) -> Result<PromptTemplate, ResourceError> {
    let raw = std::fs::read_to_string(path)?;
    let (meta, body) = frontmatter::parse_frontmatter_lenient::<PromptFrontmatter>(&raw, path);
    let meta = meta.unwrap_or_default();
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("prompt")
        .to_string();

    Ok(PromptTemplate {
        name: meta.name.unwrap_or(stem),
        description: meta.description,
        content: body.to_string(),
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_prompt_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("fix.md");
        std::fs::write(
            &path,
            "---\nname: fix-issue\ndescription: Fix it\n---\nPlease fix the issue.",
        )
        .unwrap();

        let prompt = load_prompt_from_file(&path).unwrap();
        assert_eq!(prompt.name, "fix-issue");
        assert_eq!(prompt.description.as_deref(), Some("Fix it"));
        assert_eq!(prompt.content, "Please fix the issue.");
    }

    #[test]
    fn test_prompt_name_defaults_to_stem() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("explain.md");
        std::fs::write(&path, "Explain this code.").unwrap();
        assert_eq!(load_prompt_from_file(&path).unwrap().name, "explain");
    }
}
