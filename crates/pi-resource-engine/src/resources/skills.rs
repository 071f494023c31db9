use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ResourceError;
use crate::resources::collector::SKILL_FILE_NAME;
use crate::resources::frontmatter;

/// A skill loaded from a markdown file.
#[derive(Debug, Clone)]
pub struct Skill {
    /// Frontmatter `name`, else the skill directory for `SKILL.md`, else the file stem.
    pub name: String,
    pub description: Option<String>,
    /// Tools allowed for this skill.
    pub allowed_tools: Vec<String>,
    /// The body content (prompt template).
    pub content: String,
    pub path: PathBuf,
    /// Directory holding the skill's assets.
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkillFrontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    allowed_tools: Option<Vec<String>>,
}

/// A skill given as a directory is its `SKILL.md`.
pub fn skill_file_for(path: &Path) -> Option<PathBuf> {
    if path.is_dir() {
        let skill_file = path.join(SKILL_FILE_NAME);
        return skill_file.is_file().then_some(skill_file);
    }
    path.is_file().then(|| path.to_path_buf())
}

/// Load a single skill from a markdown file.
pub fn load_skill_from_file(path: &Path) -> Result<Skill, ResourceError> {
    let content = std::fs::read_to_string(path)?;
    let (meta, body) = frontmatter::parse_frontmatter_lenient::<SkillFrontmatter>(&content, path);
    let meta = meta.unwrap_or_default();

    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let is_skill_file = path.file_name().is_some_and(|name| name == SKILL_FILE_NAME);
    let name = meta
        .name
        .filter(|name| !name.trim().is_empty())
        .or_else(|| {
            is_skill_file
                .then(|| base_dir.file_name())
                .flatten()
                .map(|dir| dir.to_string_lossy().to_string())
        })
        .or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
        })
        .ok_or_else(|| {
            ResourceError::Config(format!("Invalid skill filename: {}", path.display()))
        })?;

    Ok(Skill {
        name,
        description: meta.description,
        allowed_tools: meta.allowed_tools.unwrap_or_default(),
        content: body.to_string(),
        path: path.to_path_buf(),
        base_dir,
    })
}
