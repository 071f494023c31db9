use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::config::paths;
use crate::error::ResourceError;
use crate::resources::source_identity::{normalize_source_for_scope, source_identity_for_scope};
use crate::resources::types::Scope;
use crate::settings::types::{PackageEntry, Settings, SettingsField, SettingsPatch};

/// Read/write access to the package lists of the global and project settings.
pub trait SettingsProvider: Send + Sync {
    fn global_settings(&self) -> Settings;
    fn project_settings(&self) -> Settings;
    fn set_packages(
        &mut self,
        scope: Scope,
        packages: Vec<PackageEntry>,
    ) -> Result<(), ResourceError>;
    fn flush(&mut self) -> Result<(), ResourceError>;
}

/// Manages loading, merging, and saving of global and project settings.
///
/// Records are replaced only through [`apply_patch`](Self::apply_patch), which also records
/// the touched fields. [`save`](Self::save) writes just those fields back on top of the
/// file's current contents.
pub struct SettingsManager {
    global_dir: PathBuf,
    project_dir: PathBuf,
    global: Settings,
    project: Settings,
    modified: HashMap<Scope, BTreeSet<SettingsField>>,
    persist: bool,
}

impl SettingsManager {
    /// Load `<agent_dir>/settings.json` and `<cwd>/.pi/settings.json`. Missing files are empty.
    pub fn create(cwd: &Path, agent_dir: &Path) -> Result<Self, ResourceError> {
        let global_dir = agent_dir.to_path_buf();
        let project_dir = paths::project_config_dir(cwd);
        Ok(Self {
            global: load_settings(&paths::settings_file(&global_dir))?,
            project: load_settings(&paths::settings_file(&project_dir))?,
            global_dir,
            project_dir,
            modified: HashMap::new(),
            persist: true,
        })
    }

    /// Settings that never touch the filesystem.
    pub fn in_memory(global: Settings, project: Settings) -> Self {
        Self {
            global_dir: PathBuf::new(),
            project_dir: PathBuf::new(),
            global,
            project,
            modified: HashMap::new(),
            persist: false,
        }
    }

    /// Global deep-merged with project; package lists merged by identity, project first.
    pub fn merged(&self) -> Result<Settings, ResourceError> {
        let base = serde_json::to_value(&self.global)?;
        let overlay = serde_json::to_value(&self.project)?;
        let mut merged: Settings = serde_json::from_value(deep_merge(base, overlay))?;
        merged.packages = merge_package_sources(
            self.global.packages.clone(),
            self.project.packages.clone(),
            &self.global_dir,
            &self.project_dir,
        );
        Ok(merged)
    }

    pub fn apply_patch(&mut self, scope: Scope, patch: SettingsPatch) -> Result<(), ResourceError> {
        let current = match scope {
            Scope::User => &self.global,
            Scope::Project => &self.project,
            Scope::Temporary => {
                return Err(ResourceError::Config(
                    "Temporary scope settings are never persisted".to_string(),
                ));
            }
        };
        let (next, touched) = patch.apply(current);
        match scope {
            Scope::User => self.global = next,
            Scope::Project => self.project = next,
            Scope::Temporary => {}
        }
        self.modified.entry(scope).or_default().extend(touched);
        Ok(())
    }

    pub fn modified_fields(&self, scope: Scope) -> Vec<SettingsField> {
        self.modified
            .get(&scope)
            .map(|fields| fields.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Write modified fields of each dirty scope, preserving everything else in the file.
    pub fn save(&mut self) -> Result<(), ResourceError> {
        let dirty = std::mem::take(&mut self.modified);
        if !self.persist {
            return Ok(());
        }
        for (scope, fields) in dirty {
            if fields.is_empty() {
                continue;
            }
            let (dir, record) = match scope {
                Scope::User => (&self.global_dir, &self.global),
                Scope::Project => (&self.project_dir, &self.project),
                Scope::Temporary => continue,
            };
            let path = paths::settings_file(dir);
            let mut on_disk = match read_json_object(&path)? {
                Some(map) => map,
                None => Map::new(),
            };
            let Value::Object(current) = serde_json::to_value(record)? else {
                continue;
            };
            for field in &fields {
                match current.get(field.key()) {
                    Some(value) => on_disk.insert(field.key().to_string(), value.clone()),
                    None => on_disk.remove(field.key()),
                };
            }
            paths::ensure_dir(dir)?;
            write_atomic(&path, &Value::Object(on_disk))?;
            tracing::debug!("Saved {scope} settings to {}", path.display());
        }
        Ok(())
    }
}

impl SettingsProvider for SettingsManager {
    fn global_settings(&self) -> Settings {
        self.global.clone()
    }

    fn project_settings(&self) -> Settings {
        self.project.clone()
    }

    fn set_packages(
        &mut self,
        scope: Scope,
        packages: Vec<PackageEntry>,
    ) -> Result<(), ResourceError> {
        self.apply_patch(scope, SettingsPatch::packages(packages))
    }

    fn flush(&mut self) -> Result<(), ResourceError> {
        self.save()
    }
}

fn load_settings(path: &Path) -> Result<Settings, ResourceError> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Settings::default());
    }
    Ok(serde_json::from_str(&content)?)
}

fn read_json_object(path: &Path) -> Result<Option<Map<String, Value>>, ResourceError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Value>(&content)? {
        Value::Object(map) => Ok(Some(map)),
        _ => Err(ResourceError::Config(format!(
            "{} does not contain a JSON object",
            path.display()
        ))),
    }
}

/// Write to a unique temp file then rename over `path`.
/// On Unix the file is created owner-only (0600).
fn write_atomic(path: &Path, value: &Value) -> Result<(), ResourceError> {
    let content = serde_json::to_string_pretty(value)?;
    let unique = uuid::Uuid::new_v4();
    let tmp_path = path.with_file_name(format!(".settings.{unique}.tmp"));

    {
        use std::io::Write;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp_path).map_err(|e| {
            ResourceError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create temp settings file: {e}"),
            ))
        })?;

        file.write_all(content.as_bytes()).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            ResourceError::Io(e)
        })?;
    }

    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        ResourceError::Io(e)
    })?;
    Ok(())
}

/// Project entries first, then global entries whose identity is not already present.
pub fn merge_package_sources(
    global_packages: Option<Vec<PackageEntry>>,
    project_packages: Option<Vec<PackageEntry>>,
    global_base: &Path,
    project_base: &Path,
) -> Option<Vec<PackageEntry>> {
    if global_packages.is_none() && project_packages.is_none() {
        return None;
    }

    let mut merged = Vec::<PackageEntry>::new();
    let mut seen = HashSet::new();
    let scoped = project_packages
        .into_iter()
        .flatten()
        .map(|package| (package, project_base))
        .chain(
            global_packages
                .into_iter()
                .flatten()
                .map(|package| (package, global_base)),
        );
    for (package, base) in scoped {
        let package = normalize_package_entry(package, base);
        if seen.insert(source_identity_for_scope(base, package.source())) {
            merged.push(package);
        }
    }
    Some(merged)
}

fn normalize_package_entry(package: PackageEntry, scope_base: &Path) -> PackageEntry {
    let source = normalize_source_for_scope(scope_base, package.source());
    package.with_source(source)
}

/// Deep merge two JSON values. `overlay` values take precedence.
/// Objects are recursively merged; other types are replaced.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = if let Some(base_val) = base_map.remove(&key) {
                    deep_merge(base_val, overlay_val)
                } else {
                    overlay_val
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}
