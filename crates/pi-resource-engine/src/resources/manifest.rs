use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resources::types::ResourceType;

pub const PACKAGE_DESCRIPTOR_FILE: &str = "package.json";

/// A package's self-declared resources, from the `pi` key of its `package.json`.
///
/// Entries are plain paths relative to the package root, or patterns applied against
/// the convention-discovered files of that type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub themes: Option<Vec<String>>,
}

impl PackageManifest {
    pub fn entries(&self, resource_type: ResourceType) -> Option<&[String]> {
        match resource_type {
            ResourceType::Extensions => self.extensions.as_deref(),
            ResourceType::Skills => self.skills.as_deref(),
            ResourceType::Prompts => self.prompts.as_deref(),
            ResourceType::Themes => self.themes.as_deref(),
        }
    }
}

/// The subset of `package.json` this engine reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub dependencies: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub pi: Option<PackageManifest>,
}

impl PackageDescriptor {
    pub fn declares_dependencies(&self) -> bool {
        self.dependencies.as_ref().is_some_and(|deps| !deps.is_empty())
    }
}

/// Read `<root>/package.json`. Missing or malformed descriptors yield `None`.
pub fn read_package_descriptor(root: &Path) -> Option<PackageDescriptor> {
    let path = root.join(PACKAGE_DESCRIPTOR_FILE);
    let content = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str::<PackageDescriptor>(&content) {
        Ok(descriptor) => Some(descriptor),
        Err(e) => {
            tracing::debug!("Ignoring malformed {}: {e}", path.display());
            None
        }
    }
}

pub fn read_package_manifest(root: &Path) -> Option<PackageManifest> {
    read_package_descriptor(root).and_then(|descriptor| descriptor.pi)
}
