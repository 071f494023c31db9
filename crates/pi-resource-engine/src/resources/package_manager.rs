//! Package orchestration: settings in, per-type resolved resources out.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::ResourceError;
use crate::resources::collector::{
    collect_files_from_paths, collect_resource_files, resolve_extension_entries,
};
use crate::resources::installer::PackageInstaller;
use crate::resources::manifest::read_package_manifest;
use crate::resources::patterns::{apply_patterns, is_override_pattern, is_pattern, to_posix_string};
use crate::resources::progress::{
    ProgressAction, ProgressCallback, ProgressEvent, ProgressEventType, emit,
};
use crate::resources::source::{PackageSource, parse_source};
use crate::resources::source_identity::{
    PackageIdentity, canonical_path, normalize_source_for_scope, package_identity,
    resolve_local_path,
};
use crate::resources::types::{
    ResolvedPaths, ResolvedResource, ResourceMetadata, ResourceOrigin, ResourceType, Scope,
};
use crate::settings::manager::SettingsProvider;
use crate::settings::types::{PackageEntry, Settings};

const LOCAL_SOURCE_LABEL: &str = "local";
const AUTO_SOURCE_LABEL: &str = "auto";

/// What `resolve` does about a configured package that is not installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingSourceAction {
    Skip,
    #[default]
    Install,
    Error,
}

/// A configured package found missing during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingPackage {
    pub source: String,
    pub scope: Scope,
}

pub type MissingSourceHandler = dyn Fn(&MissingPackage) -> MissingSourceAction + Send + Sync;

/// One configured package, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRecord {
    pub source: String,
    pub scope: Scope,
    pub installed_path: Option<PathBuf>,
    /// Whether the settings entry carries resource filters.
    pub filtered: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveExtensionSourcesOptions {
    /// Install into the project scope instead of the user scope.
    pub local: bool,
    /// Install into the temporary scope. Takes precedence over `local`.
    pub temporary: bool,
}

impl ResolveExtensionSourcesOptions {
    fn scope(self) -> Scope {
        if self.temporary {
            Scope::Temporary
        } else {
            Scope::from_local(self.local)
        }
    }
}

/// Resolved resources, deduplicated by path per type. The first entry for a path wins.
#[derive(Default)]
struct ResourceAccumulator {
    resolved: ResolvedPaths,
    seen: HashMap<ResourceType, HashSet<PathBuf>>,
}

impl ResourceAccumulator {
    fn add(
        &mut self,
        resource_type: ResourceType,
        path: PathBuf,
        enabled: bool,
        metadata: &ResourceMetadata,
    ) {
        let path = canonical_path(&path);
        if !self.seen.entry(resource_type).or_default().insert(path.clone()) {
            return;
        }
        self.resolved.get_mut(resource_type).push(ResolvedResource {
            path,
            enabled,
            metadata: metadata.clone(),
        });
    }

    fn add_all(
        &mut self,
        resource_type: ResourceType,
        files: Vec<(PathBuf, bool)>,
        metadata: &ResourceMetadata,
    ) {
        for (path, enabled) in files {
            self.add(resource_type, path, enabled, metadata);
        }
    }
}

pub struct PackageManager {
    cwd: PathBuf,
    agent_dir: PathBuf,
    settings: Box<dyn SettingsProvider>,
    installer: PackageInstaller,
    progress: Option<ProgressCallback>,
}

impl PackageManager {
    pub fn new(cwd: &Path, agent_dir: &Path, settings: Box<dyn SettingsProvider>) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            agent_dir: agent_dir.to_path_buf(),
            settings,
            installer: PackageInstaller::new(cwd, agent_dir),
            progress: None,
        }
    }

    /// Replace the installer, e.g. to inject a command runner or registry.
    pub fn with_installer(mut self, mut installer: PackageInstaller) -> Self {
        installer.set_progress_callback(self.progress.clone());
        self.installer = installer;
        self
    }

    pub fn set_progress_callback(&mut self, callback: Option<ProgressCallback>) {
        self.installer.set_progress_callback(callback.clone());
        self.progress = callback;
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn agent_dir(&self) -> &Path {
        &self.agent_dir
    }

    pub fn settings(&self) -> &dyn SettingsProvider {
        self.settings.as_ref()
    }

    fn settings_for(&self, scope: Scope) -> Settings {
        match scope {
            Scope::User => self.settings.global_settings(),
            Scope::Project => self.settings.project_settings(),
            Scope::Temporary => Settings::default(),
        }
    }

    /// Configured packages, project first, deduplicated by identity.
    fn configured_packages(&self) -> Vec<(PackageEntry, Scope)> {
        let mut seen = HashSet::<PackageIdentity>::new();
        let mut out = Vec::new();
        for scope in [Scope::Project, Scope::User] {
            let base = self.installer.scope_base_dir(scope);
            for entry in self.settings_for(scope).package_entries() {
                let identity = package_identity(&parse_source(entry.source()), &base);
                if seen.insert(identity) {
                    out.push((entry.clone(), scope));
                } else {
                    tracing::debug!(
                        "Skipping {} from {scope} settings: already configured",
                        entry.source()
                    );
                }
            }
        }
        out
    }

    /// Resolve every configured package, top-level path and auto-discovered resource.
    ///
    /// Individual package failures are logged and skipped. The only error is
    /// [`ResourceError::MissingSource`] when `on_missing` answers
    /// [`MissingSourceAction::Error`].
    pub async fn resolve(
        &self,
        on_missing: Option<&MissingSourceHandler>,
    ) -> Result<ResolvedPaths, ResourceError> {
        let mut acc = ResourceAccumulator::default();

        for (entry, scope) in self.configured_packages() {
            let source = parse_source(entry.source());
            let Some(root) = self
                .ensure_package(entry.source(), &source, scope, on_missing)
                .await?
            else {
                continue;
            };
            let metadata = ResourceMetadata {
                source: entry.source().to_string(),
                scope,
                origin: ResourceOrigin::Package,
                base_dir: Some(root.clone()),
            };
            collect_package_resources(&root, Some(&entry), &metadata, &mut acc);
        }

        for scope in [Scope::Project, Scope::User] {
            let settings = self.settings_for(scope);
            let base = self.installer.scope_base_dir(scope);
            resolve_top_level_entries(&settings, scope, &base, &mut acc);
        }

        for scope in [Scope::Project, Scope::User] {
            let settings = self.settings_for(scope);
            let base = self.installer.scope_base_dir(scope);
            resolve_auto_discovered(&settings, scope, &base, &mut acc);
        }

        Ok(acc.resolved)
    }

    /// Resolve ad-hoc extension sources (command-line `-e`), installing remote ones as needed.
    pub async fn resolve_extension_sources(
        &self,
        sources: &[String],
        options: ResolveExtensionSourcesOptions,
    ) -> Result<ResolvedPaths, ResourceError> {
        let scope = options.scope();
        let mut acc = ResourceAccumulator::default();
        for raw in sources {
            let raw = self.absolutize_local_source(raw);
            let source = parse_source(&raw);
            let Some(root) = self.ensure_package(&raw, &source, scope, None).await? else {
                continue;
            };
            let metadata = ResourceMetadata {
                source: raw.clone(),
                scope,
                origin: ResourceOrigin::Package,
                base_dir: Some(root.clone()),
            };
            collect_package_resources(&root, None, &metadata, &mut acc);
        }
        Ok(acc.resolved)
    }

    /// The on-disk root of a configured package, installing it when missing or stale.
    async fn ensure_package(
        &self,
        raw: &str,
        source: &PackageSource,
        scope: Scope,
        on_missing: Option<&MissingSourceHandler>,
    ) -> Result<Option<PathBuf>, ResourceError> {
        if let PackageSource::Local { path } = source {
            let resolved = resolve_local_path(&self.installer.scope_base_dir(scope), path);
            if !resolved.exists() {
                tracing::warn!("Package path does not exist: {}", resolved.display());
                return Ok(None);
            }
            return Ok(Some(resolved));
        }

        let installed = self.installer.installed_path(source, scope).await;
        if let Some(path) = &installed {
            if !self.installer.is_stale(source, scope).await {
                return Ok(installed);
            }
            return match self.update_with_progress(raw, source, scope).await {
                Ok(refreshed) => Ok(Some(refreshed)),
                Err(e) => {
                    tracing::warn!("Failed to refresh {raw} ({scope}): {e}");
                    Ok(Some(path.clone()))
                }
            };
        }

        let missing = MissingPackage {
            source: raw.to_string(),
            scope,
        };
        match on_missing.map(|handler| handler(&missing)).unwrap_or_default() {
            MissingSourceAction::Skip => {
                tracing::debug!("Skipping missing package {raw} ({scope})");
                return Ok(None);
            }
            MissingSourceAction::Error => {
                return Err(ResourceError::MissingSource(raw.to_string()));
            }
            MissingSourceAction::Install => {}
        }

        match self.install_with_progress(raw, source, scope).await {
            Ok(path) => Ok(Some(path)),
            Err(e) => {
                tracing::warn!("Failed to install {raw} ({scope}): {e}");
                Ok(None)
            }
        }
    }

    async fn install_with_progress(
        &self,
        raw: &str,
        source: &PackageSource,
        scope: Scope,
    ) -> Result<PathBuf, ResourceError> {
        self.emit(ProgressEventType::Start, ProgressAction::Install, raw, None);
        match self.installer.install(source, scope).await {
            Ok(path) => {
                self.emit(ProgressEventType::Complete, ProgressAction::Install, raw, None);
                Ok(path)
            }
            Err(e) => {
                self.emit(
                    ProgressEventType::Error,
                    ProgressAction::Install,
                    raw,
                    Some(e.to_string()),
                );
                Err(e)
            }
        }
    }

    /// Install a package without recording it in settings.
    pub async fn install(&self, source: &str, local: bool) -> Result<PathBuf, ResourceError> {
        let raw = self.absolutize_local_source(source);
        let parsed = parse_source(&raw);
        self.install_with_progress(&raw, &parsed, Scope::from_local(local))
            .await
    }

    /// Uninstall a package without touching settings.
    pub async fn remove(&self, source: &str, local: bool) -> Result<(), ResourceError> {
        let raw = self.absolutize_local_source(source);
        let parsed = parse_source(&raw);
        let scope = Scope::from_local(local);
        self.emit(ProgressEventType::Start, ProgressAction::Remove, &raw, None);
        match self.installer.remove(&parsed, scope).await {
            Ok(()) => {
                self.emit(ProgressEventType::Complete, ProgressAction::Remove, &raw, None);
                Ok(())
            }
            Err(e) => {
                self.emit(
                    ProgressEventType::Error,
                    ProgressAction::Remove,
                    &raw,
                    Some(e.to_string()),
                );
                Err(e)
            }
        }
    }

    /// Update every unpinned configured package, or only those matching `source`.
    ///
    /// A `source` that matches no configured package is [`ResourceError::MissingSource`].
    pub async fn update(&self, source: Option<&str>) -> Result<(), ResourceError> {
        let target = source.map(|raw| {
            let raw = self.absolutize_local_source(raw);
            package_identity(&parse_source(&raw), &self.cwd)
        });

        let mut matched = false;
        for scope in [Scope::Project, Scope::User] {
            let base = self.installer.scope_base_dir(scope);
            for entry in self.settings_for(scope).package_entries() {
                let parsed = parse_source(entry.source());
                if let Some(target) = &target
                    && package_identity(&parsed, &base) != *target
                {
                    continue;
                }
                matched = true;
                if parsed.is_pinned() {
                    tracing::info!("Skipping pinned package {}", entry.source());
                    continue;
                }
                self.update_one(entry.source(), &parsed, scope).await?;
            }
        }

        if let Some(raw) = source
            && !matched
        {
            return Err(ResourceError::MissingSource(format!(
                "no configured package matches {raw}"
            )));
        }
        Ok(())
    }

    async fn update_one(
        &self,
        raw: &str,
        source: &PackageSource,
        scope: Scope,
    ) -> Result<(), ResourceError> {
        if matches!(source, PackageSource::Local { .. }) {
            return Ok(());
        }
        if matches!(source, PackageSource::Npm { .. })
            && self.installer.installed_path(source, scope).await.is_some()
            && !self.installer.is_stale(source, scope).await
        {
            tracing::debug!("{raw} ({scope}) is up to date");
            return Ok(());
        }

        self.update_with_progress(raw, source, scope).await?;
        Ok(())
    }

    /// Pinned npm sources reinstall their pin; unpinned ones move to `name@latest`.
    async fn update_with_progress(
        &self,
        raw: &str,
        source: &PackageSource,
        scope: Scope,
    ) -> Result<PathBuf, ResourceError> {
        self.emit(ProgressEventType::Start, ProgressAction::Update, raw, None);
        match self.installer.update(source, scope).await {
            Ok(path) => {
                self.emit(ProgressEventType::Complete, ProgressAction::Update, raw, None);
                Ok(path)
            }
            Err(e) => {
                self.emit(
                    ProgressEventType::Error,
                    ProgressAction::Update,
                    raw,
                    Some(e.to_string()),
                );
                Err(e)
            }
        }
    }

    /// Every configured package in both scopes, project first.
    pub async fn list(&self) -> Vec<PackageRecord> {
        let mut records = Vec::new();
        for scope in [Scope::Project, Scope::User] {
            for entry in self.settings_for(scope).package_entries() {
                let installed_path = self.get_installed_path(entry.source(), scope).await;
                records.push(PackageRecord {
                    source: entry.source().to_string(),
                    scope,
                    installed_path,
                    filtered: entry.has_filter(),
                });
            }
        }
        records
    }

    pub async fn get_installed_path(&self, source: &str, scope: Scope) -> Option<PathBuf> {
        self.installer
            .installed_path(&parse_source(source), scope)
            .await
    }

    /// Record `source` in the user or project settings. Returns whether settings changed.
    ///
    /// An entry with the same identity is re-pointed at the new source, keeping its filters.
    pub fn add_source_to_settings(
        &mut self,
        source: &str,
        local: bool,
    ) -> Result<bool, ResourceError> {
        let scope = Scope::from_local(local);
        let base = self.installer.scope_base_dir(scope);
        let normalized = normalize_source_for_scope(&base, &self.absolutize_local_source(source));
        let identity = package_identity(&parse_source(&normalized), &base);

        let mut packages = self.settings_for(scope).packages.unwrap_or_default();
        let existing = packages
            .iter()
            .position(|entry| package_identity(&parse_source(entry.source()), &base) == identity);
        match existing {
            Some(index) if packages[index].source() == normalized => return Ok(false),
            Some(index) => {
                let entry = packages.remove(index);
                packages.insert(index, entry.with_source(normalized));
            }
            None => packages.push(PackageEntry::Source(normalized)),
        }

        self.settings.set_packages(scope, packages)?;
        self.settings.flush()?;
        Ok(true)
    }

    /// Drop every entry with `source`'s identity from the scope's settings.
    pub fn remove_source_from_settings(
        &mut self,
        source: &str,
        local: bool,
    ) -> Result<bool, ResourceError> {
        let scope = Scope::from_local(local);
        let base = self.installer.scope_base_dir(scope);
        let raw = self.absolutize_local_source(source);
        let identity = package_identity(&parse_source(&raw), &base);

        let packages = self.settings_for(scope).packages.unwrap_or_default();
        let before = packages.len();
        let kept: Vec<PackageEntry> = packages
            .into_iter()
            .filter(|entry| package_identity(&parse_source(entry.source()), &base) != identity)
            .collect();
        if kept.len() == before {
            return Ok(false);
        }

        self.settings.set_packages(scope, kept)?;
        self.settings.flush()?;
        Ok(true)
    }

    /// Relative local paths typed by a user are relative to the working directory.
    fn absolutize_local_source(&self, source: &str) -> String {
        match parse_source(source) {
            PackageSource::Local { path } => {
                to_posix_string(&resolve_local_path(&self.cwd, &path))
            }
            _ => source.trim().to_string(),
        }
    }

    fn emit(
        &self,
        event_type: ProgressEventType,
        action: ProgressAction,
        source: &str,
        message: Option<String>,
    ) {
        let mut event = ProgressEvent::new(event_type, action, source);
        event.message = message;
        emit(self.progress.as_ref(), event);
    }
}

/// Pair each file with its enabled state under an optional settings filter.
///
/// No filter enables everything; an empty filter disables everything.
fn filter_states(
    files: Vec<PathBuf>,
    patterns: Option<&[String]>,
    base_dir: &Path,
) -> Vec<(PathBuf, bool)> {
    match patterns {
        None => files.into_iter().map(|path| (path, true)).collect(),
        Some([]) => files.into_iter().map(|path| (path, false)).collect(),
        Some(patterns) => {
            let enabled = apply_patterns(&files, patterns, base_dir);
            files
                .into_iter()
                .map(|path| {
                    let on = enabled.contains(&path);
                    (path, on)
                })
                .collect()
        }
    }
}

fn package_entry_path(root: &Path, entry: &str) -> PathBuf {
    let trimmed = entry.strip_prefix("./").unwrap_or(entry);
    root.join(trimmed)
}

/// Candidate files one package contributes for `resource_type`.
///
/// Plain manifest entries name the files; manifest patterns narrow them, or narrow the
/// convention directory when no plain entries exist.
fn package_files(root: &Path, resource_type: ResourceType) -> Vec<PathBuf> {
    let convention_dir = root.join(resource_type.label());
    let manifest_entries = read_package_manifest(root)
        .and_then(|manifest| manifest.entries(resource_type).map(<[String]>::to_vec));

    let Some(entries) = manifest_entries else {
        if resource_type == ResourceType::Extensions && !convention_dir.is_dir() {
            return resolve_extension_entries(root).unwrap_or_default();
        }
        return collect_resource_files(&convention_dir, resource_type);
    };

    let (patterns, plain): (Vec<String>, Vec<String>) =
        entries.into_iter().partition(|entry| is_pattern(entry));
    let files = if plain.is_empty() {
        collect_resource_files(&convention_dir, resource_type)
    } else {
        let paths: Vec<PathBuf> = plain
            .iter()
            .map(|entry| package_entry_path(root, entry))
            .collect();
        collect_files_from_paths(&paths, resource_type)
    };
    if patterns.is_empty() {
        return files;
    }
    let selected = apply_patterns(&files, &patterns, root);
    files
        .into_iter()
        .filter(|path| selected.contains(path))
        .collect()
}

fn collect_package_resources(
    root: &Path,
    entry: Option<&PackageEntry>,
    metadata: &ResourceMetadata,
    acc: &mut ResourceAccumulator,
) {
    if root.is_file() {
        let patterns = entry.and_then(|e| e.resource_patterns(ResourceType::Extensions));
        let base = root.parent().unwrap_or(root);
        let files = filter_states(vec![root.to_path_buf()], patterns, base);
        acc.add_all(ResourceType::Extensions, files, metadata);
        return;
    }

    for resource_type in ResourceType::ALL {
        let files = package_files(root, resource_type);
        let patterns = entry.and_then(|e| e.resource_patterns(resource_type));
        acc.add_all(resource_type, filter_states(files, patterns, root), metadata);
    }
}

/// Plain paths from top-level settings, filtered by the same list's patterns.
fn resolve_top_level_entries(
    settings: &Settings,
    scope: Scope,
    base: &Path,
    acc: &mut ResourceAccumulator,
) {
    let metadata = ResourceMetadata {
        source: LOCAL_SOURCE_LABEL.to_string(),
        scope,
        origin: ResourceOrigin::TopLevel,
        base_dir: Some(base.to_path_buf()),
    };
    for resource_type in ResourceType::ALL {
        let entries = settings.resource_entries(resource_type);
        let (patterns, plain): (Vec<&String>, Vec<&String>) =
            entries.iter().partition(|entry| is_pattern(entry));
        if plain.is_empty() {
            continue;
        }
        let paths: Vec<PathBuf> = plain
            .iter()
            .map(|entry| resolve_local_path(base, entry))
            .collect();
        let files = collect_files_from_paths(&paths, resource_type);
        let patterns: Vec<String> = patterns.into_iter().cloned().collect();
        let filter = (!patterns.is_empty()).then_some(patterns.as_slice());
        acc.add_all(resource_type, filter_states(files, filter, base), &metadata);
    }
}

/// `<base>/{extensions,skills,prompts,themes}`, filtered by top-level override patterns.
fn resolve_auto_discovered(
    settings: &Settings,
    scope: Scope,
    base: &Path,
    acc: &mut ResourceAccumulator,
) {
    for resource_type in ResourceType::ALL {
        let dir = base.join(resource_type.label());
        let files = collect_resource_files(&dir, resource_type);
        if files.is_empty() {
            continue;
        }
        let overrides: Vec<String> = settings
            .resource_entries(resource_type)
            .iter()
            .filter(|entry| is_override_pattern(entry))
            .cloned()
            .collect();
        let filter = (!overrides.is_empty()).then_some(overrides.as_slice());
        let metadata = ResourceMetadata {
            source: AUTO_SOURCE_LABEL.to_string(),
            scope,
            origin: ResourceOrigin::TopLevel,
            base_dir: Some(dir.clone()),
        };
        acc.add_all(resource_type, filter_states(files, filter, &dir), &metadata);
    }
}
