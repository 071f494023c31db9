use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::resources::types::ResourceType;

/// The fields of `settings.json` read and written by the resource engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Installed package sources, with optional per-type filters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packages: Option<Vec<PackageEntry>>,

    /// Extension paths and override patterns for auto-discovered extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<String>>,

    /// Skill paths and override patterns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,

    /// Prompt template paths and override patterns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Vec<String>>,

    /// Theme paths and override patterns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub themes: Option<Vec<String>>,

    /// Fields owned by other subsystems, preserved verbatim.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl Settings {
    /// Top-level entries for one resource type.
    pub fn resource_entries(&self, resource_type: ResourceType) -> &[String] {
        let entries = match resource_type {
            ResourceType::Extensions => &self.extensions,
            ResourceType::Skills => &self.skills,
            ResourceType::Prompts => &self.prompts,
            ResourceType::Themes => &self.themes,
        };
        entries.as_deref().unwrap_or_default()
    }

    pub fn package_entries(&self) -> &[PackageEntry] {
        self.packages.as_deref().unwrap_or_default()
    }
}

/// One `packages` entry: a bare source, or a source with resource filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PackageEntry {
    Source(String),
    Filtered(PackageEntryFilter),
}

/// Per-type filters: absent means manifest/convention, empty means disable all of that type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageEntryFilter {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub themes: Option<Vec<String>>,
}

impl PackageEntry {
    pub fn source(&self) -> &str {
        match self {
            PackageEntry::Source(source) => source,
            PackageEntry::Filtered(filter) => &filter.source,
        }
    }

    pub fn with_source(self, source: String) -> Self {
        match self {
            PackageEntry::Source(_) => PackageEntry::Source(source),
            PackageEntry::Filtered(mut filter) => {
                filter.source = source;
                PackageEntry::Filtered(filter)
            }
        }
    }

    pub fn has_filter(&self) -> bool {
        matches!(self, PackageEntry::Filtered(_))
    }

    /// The filter for one resource type, `None` when not overridden.
    pub fn resource_patterns(&self, resource_type: ResourceType) -> Option<&[String]> {
        let PackageEntry::Filtered(filter) = self else {
            return None;
        };
        let patterns = match resource_type {
            ResourceType::Extensions => &filter.extensions,
            ResourceType::Skills => &filter.skills,
            ResourceType::Prompts => &filter.prompts,
            ResourceType::Themes => &filter.themes,
        };
        patterns.as_deref()
    }
}

/// A settings field the engine may modify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SettingsField {
    Packages,
    Extensions,
    Skills,
    Prompts,
    Themes,
}

impl SettingsField {
    pub fn key(self) -> &'static str {
        match self {
            Self::Packages => "packages",
            Self::Extensions => "extensions",
            Self::Skills => "skills",
            Self::Prompts => "prompts",
            Self::Themes => "themes",
        }
    }
}

/// Explicit field replacements applied to one scope's settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsPatch {
    pub packages: Option<Vec<PackageEntry>>,
    pub extensions: Option<Vec<String>>,
    pub skills: Option<Vec<String>>,
    pub prompts: Option<Vec<String>>,
    pub themes: Option<Vec<String>>,
}

impl SettingsPatch {
    pub fn packages(packages: Vec<PackageEntry>) -> Self {
        Self {
            packages: Some(packages),
            ..Default::default()
        }
    }

    /// Apply to `settings`, returning a new record and the fields that changed.
    pub fn apply(self, settings: &Settings) -> (Settings, Vec<SettingsField>) {
        let mut next = settings.clone();
        let mut touched = Vec::new();
        if let Some(packages) = self.packages {
            next.packages = Some(packages);
            touched.push(SettingsField::Packages);
        }
        if let Some(extensions) = self.extensions {
            next.extensions = Some(extensions);
            touched.push(SettingsField::Extensions);
        }
        if let Some(skills) = self.skills {
            next.skills = Some(skills);
            touched.push(SettingsField::Skills);
        }
        if let Some(prompts) = self.prompts {
            next.prompts = Some(prompts);
            touched.push(SettingsField::Prompts);
        }
        if let Some(themes) = self.themes {
            next.themes = Some(themes);
            touched.push(SettingsField::Themes);
        }
        (next, touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_entries_parse_both_shapes() {
        let settings: Settings = serde_json::from_str(
            r#"{
                "packages": ["npm:a", {"source": "npm:b", "skills": []}],
                "skills": ["!legacy/*"],
                "theme": "dark"
            }"#,
        )
        .unwrap();

        let packages = settings.package_entries();
        assert_eq!(packages[0], PackageEntry::Source("npm:a".to_string()));
        assert_eq!(packages[1].source(), "npm:b");
        assert_eq!(
            packages[1].resource_patterns(ResourceType::Skills),
            Some(&[][..])
        );
        assert!(packages[1].resource_patterns(ResourceType::Prompts).is_none());
        assert!(packages[0].resource_patterns(ResourceType::Skills).is_none());
        assert_eq!(settings.resource_entries(ResourceType::Skills), ["!legacy/*"]);
        assert!(settings.resource_entries(ResourceType::Themes).is_empty());
        assert_eq!(settings.extra.get("theme"), Some(&Value::from("dark")));
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let input = r#"{"model":"x","packages":["npm:a"]}"#;
        let settings: Settings = serde_json::from_str(input).unwrap();
        let value = serde_json::to_value(&settings).unwrap();
        assert_eq!(value["model"], "x");
        assert_eq!(value["packages"][0], "npm:a");
        assert!(value.get("skills").is_none());
    }

    #[test]
    fn test_patch_reports_touched_fields() {
        let settings = Settings::default();
        let patch = SettingsPatch::packages(vec![PackageEntry::Source("npm:a".to_string())]);
        let (next, touched) = patch.apply(&settings);
        assert_eq!(touched, vec![SettingsField::Packages]);
        assert_eq!(next.package_entries().len(), 1);
        assert!(settings.packages.is_none());
    }
}
