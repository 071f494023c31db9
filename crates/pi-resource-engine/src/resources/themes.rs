use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ResourceError;

/// Theme definition (minimal, generic key-value colors).
#[derive(Debug, Clone)]
pub struct Theme {
    pub name: String,
    pub colors: HashMap<String, String>,
    pub path: PathBuf,
}

pub fn load_theme_from_file(path: &Path) -> Result<Theme, ResourceError> {
    let content = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    let name = value
        .get("name")
        .and_then(|v| v.as_str())
        .map(ToString::to_string)
        .or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| "theme".to_string());

    let colors = value
        .get("colors")
        .and_then(|v| v.as_object())
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect::<HashMap<_, _>>()
        })
        .unwrap_or_default();

    Ok(Theme {
        name,
        colors,
        path: path.to_path_buf(),
    })
}
