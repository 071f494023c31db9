use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::paths;
use crate::error::ResourceError;
use crate::extensions::{
    ExtensionLoader, ExtensionRuntime, LoadedExtension, PathOnlyExtensionLoader,
    detect_extension_conflicts,
};
use crate::resources::collector::collect_files_from_paths;
use crate::resources::package_manager::{PackageManager, ResolveExtensionSourcesOptions};
use crate::resources::prompts::{PromptTemplate, load_prompt_from_file};
use crate::resources::skills::{Skill, load_skill_from_file, skill_file_for};
use crate::resources::source::{PackageSource, parse_source};
use crate::resources::source_identity::canonical_path;
use crate::resources::themes::{Theme, load_theme_from_file};
use crate::resources::types::{
    ResolvedPaths, ResourceMetadata, ResourceOrigin, ResourceType, Scope,
};

const CLI_SOURCE_LABEL: &str = "cli";
const LOCAL_SOURCE_LABEL: &str = "local";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceDiagnosticType {
    Warning,
    Error,
    Collision,
}

/// Which entry kept a contested name and which one was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCollision {
    pub resource_type: ResourceType,
    pub name: String,
    pub winner_path: PathBuf,
    pub loser_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDiagnostic {
    #[serde(rename = "type")]
    pub diagnostic_type: ResourceDiagnosticType,
    pub message: String,
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collision: Option<ResourceCollision>,
}

impl ResourceDiagnostic {
    fn warning(message: String, path: &Path) -> Self {
        Self {
            diagnostic_type: ResourceDiagnosticType::Warning,
            message,
            path: Some(path.to_path_buf()),
            collision: None,
        }
    }
}

/// A resource path contributed at runtime, usually by a loaded extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionResourcePath {
    pub path: PathBuf,
    /// Provenance of the contributor. `None` falls back to location-based attribution.
    pub metadata: Option<ResourceMetadata>,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceExtensionPaths {
    pub skill_paths: Vec<ExtensionResourcePath>,
    pub prompt_paths: Vec<ExtensionResourcePath>,
    pub theme_paths: Vec<ExtensionResourcePath>,
}

#[async_trait]
pub trait ResourceLoader: Send + Sync {
    fn get_extensions(&self) -> (&[LoadedExtension], &[ResourceDiagnostic]);
    /// Whatever the extension loader returned alongside the last load.
    fn get_extension_runtime(&self) -> Option<ExtensionRuntime>;
    fn get_skills(&self) -> (&[Skill], &[ResourceDiagnostic]);
    fn get_prompts(&self) -> (&[PromptTemplate], &[ResourceDiagnostic]);
    fn get_themes(&self) -> (&[Theme], &[ResourceDiagnostic]);
    fn get_path_metadata(&self) -> &HashMap<PathBuf, ResourceMetadata>;
    fn extend_resources(&mut self, paths: ResourceExtensionPaths);
    async fn reload(&mut self) -> Result<(), ResourceError>;
}

/// Command-line inputs. Ad-hoc paths always land in the temporary scope.
#[derive(Debug, Clone, Default)]
pub struct DefaultResourceLoaderOptions {
    /// `-e` sources: local paths or npm/git packages.
    pub additional_extension_paths: Vec<String>,
    pub additional_skill_paths: Vec<PathBuf>,
    pub additional_prompt_template_paths: Vec<PathBuf>,
    pub additional_theme_paths: Vec<PathBuf>,
    /// The `no_*` flags drop package and auto-discovered resources of that type. Explicit
    /// command-line paths are still loaded.
    pub no_extensions: bool,
    pub no_skills: bool,
    pub no_prompt_templates: bool,
    pub no_themes: bool,
}

struct Loaded<T> {
    items: Vec<T>,
    diagnostics: Vec<ResourceDiagnostic>,
}

impl<T> Default for Loaded<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            diagnostics: Vec::new(),
        }
    }
}

pub struct DefaultResourceLoader {
    package_manager: PackageManager,
    extension_loader: Arc<dyn ExtensionLoader>,
    options: DefaultResourceLoaderOptions,
    extended: ResourceExtensionPaths,
    extensions: Loaded<LoadedExtension>,
    extension_runtime: Option<ExtensionRuntime>,
    skills: Loaded<Skill>,
    prompts: Loaded<PromptTemplate>,
    themes: Loaded<Theme>,
    path_metadata: HashMap<PathBuf, ResourceMetadata>,
}

impl DefaultResourceLoader {
    pub fn new(package_manager: PackageManager, options: DefaultResourceLoaderOptions) -> Self {
        Self {
            package_manager,
            extension_loader: Arc::new(PathOnlyExtensionLoader),
            options,
            extended: ResourceExtensionPaths::default(),
            extensions: Loaded::default(),
            extension_runtime: None,
            skills: Loaded::default(),
            prompts: Loaded::default(),
            themes: Loaded::default(),
            path_metadata: HashMap::new(),
        }
    }

    pub fn with_extension_loader(mut self, loader: Arc<dyn ExtensionLoader>) -> Self {
        self.extension_loader = loader;
        self
    }

    pub fn package_manager(&self) -> &PackageManager {
        &self.package_manager
    }

    /// Provenance of `path`: recorded metadata when known, else attribution by location.
    pub fn metadata_for(&self, path: &Path) -> ResourceMetadata {
        self.path_metadata.get(path).cloned().unwrap_or_else(|| {
            default_path_metadata(
                path,
                self.package_manager.cwd(),
                self.package_manager.agent_dir(),
            )
        })
    }

    fn record(&mut self, path: &Path, metadata: ResourceMetadata) {
        self.path_metadata
            .entry(path.to_path_buf())
            .or_insert(metadata);
    }

    /// Enabled paths for one type in precedence order: command line, then resolved
    /// packages and discovery, then runtime contributions.
    fn candidate_paths(
        &mut self,
        resource_type: ResourceType,
        resolved: &ResolvedPaths,
        cli_extensions: &ResolvedPaths,
    ) -> Vec<PathBuf> {
        let mut candidates: Vec<(PathBuf, ResourceMetadata)> = Vec::new();

        if resource_type == ResourceType::Extensions {
            for resource in cli_extensions.extensions.iter().filter(|r| r.enabled) {
                let mut metadata = resource.metadata.clone();
                if matches!(parse_source(&metadata.source), PackageSource::Local { .. }) {
                    metadata.source = CLI_SOURCE_LABEL.to_string();
                }
                candidates.push((resource.path.clone(), metadata));
            }
        } else {
            let explicit = match resource_type {
                ResourceType::Skills => &self.options.additional_skill_paths,
                ResourceType::Prompts => &self.options.additional_prompt_template_paths,
                _ => &self.options.additional_theme_paths,
            };
            for path in collect_files_from_paths(explicit, resource_type) {
                candidates.push((path, cli_metadata()));
            }
        }

        let suppressed = match resource_type {
            ResourceType::Extensions => self.options.no_extensions,
            ResourceType::Skills => self.options.no_skills,
            ResourceType::Prompts => self.options.no_prompt_templates,
            ResourceType::Themes => self.options.no_themes,
        };
        if !suppressed {
            for resource in resolved.get(resource_type).iter().filter(|r| r.enabled) {
                candidates.push((resource.path.clone(), resource.metadata.clone()));
            }
        }

        let contributed = match resource_type {
            ResourceType::Extensions => Vec::new(),
            ResourceType::Skills => self.extended.skill_paths.clone(),
            ResourceType::Prompts => self.extended.prompt_paths.clone(),
            ResourceType::Themes => self.extended.theme_paths.clone(),
        };
        for entry in contributed {
            for path in collect_files_from_paths(std::slice::from_ref(&entry.path), resource_type)
            {
                let metadata = entry.metadata.clone().unwrap_or_else(|| {
                    default_path_metadata(
                        &path,
                        self.package_manager.cwd(),
                        self.package_manager.agent_dir(),
                    )
                });
                candidates.push((path, metadata));
            }
        }

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (path, metadata) in candidates {
            let path = canonical_path(&path);
            if seen.insert(path.clone()) {
                self.record(&path, metadata);
                out.push(path);
            }
        }
        out
    }

    async fn load_extensions(&mut self, paths: Vec<PathBuf>) {
        let loader = self.extension_loader.clone();
        let result = loader.load_extensions(&paths).await;

        let mut diagnostics: Vec<ResourceDiagnostic> = result
            .errors
            .into_iter()
            .map(|error| ResourceDiagnostic {
                diagnostic_type: ResourceDiagnosticType::Error,
                message: error.error,
                path: Some(PathBuf::from(error.source)),
                collision: None,
            })
            .collect();

        let (accepted, conflicts) = detect_extension_conflicts(result.extensions);
        diagnostics.extend(conflicts.into_iter().map(|conflict| ResourceDiagnostic {
            diagnostic_type: ResourceDiagnosticType::Error,
            message: conflict.message(),
            path: Some(conflict.path.clone()),
            collision: Some(ResourceCollision {
                resource_type: ResourceType::Extensions,
                name: conflict.name,
                winner_path: conflict.owner,
                loser_path: conflict.path,
            }),
        }));

        self.extensions = Loaded {
            items: accepted,
            diagnostics,
        };
        self.extension_runtime = result.runtime;
    }

    fn map_skill_paths(&mut self, paths: Vec<PathBuf>) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for path in paths {
            let Some(file) = skill_file_for(&path) else {
                tracing::debug!("No skill file at {}", path.display());
                continue;
            };
            if file != path {
                let metadata = self.metadata_for(&path);
                self.record(&file, metadata);
            }
            out.push(file);
        }
        out
    }
}

/// Load each path, keeping the first item per logical name.
fn load_named<T>(
    paths: &[PathBuf],
    resource_type: ResourceType,
    kind: &str,
    load: impl Fn(&Path) -> Result<T, ResourceError>,
    name_of: impl Fn(&T) -> &str,
    path_of: impl Fn(&T) -> &Path,
) -> Loaded<T> {
    let mut loaded = Loaded::default();
    let mut winners = HashMap::<String, PathBuf>::new();

    for path in paths {
        let item = match load(path) {
            Ok(item) => item,
            Err(e) => {
                loaded.diagnostics.push(ResourceDiagnostic::warning(
                    format!("Failed to load {kind} from {}: {e}", path.display()),
                    path,
                ));
                continue;
            }
        };

        let name = name_of(&item).to_string();
        let loser = path_of(&item).to_path_buf();
        if let Some(winner) = winners.get(&name) {
            loaded.diagnostics.push(ResourceDiagnostic {
                diagnostic_type: ResourceDiagnosticType::Collision,
                message: format!(
                    "Duplicate {kind} '{name}' ignored (winner: {}, loser: {})",
                    winner.display(),
                    loser.display()
                ),
                path: Some(loser.clone()),
                collision: Some(ResourceCollision {
                    resource_type,
                    name,
                    winner_path: winner.clone(),
                    loser_path: loser,
                }),
            });
            continue;
        }
        winners.insert(name, loser);
        loaded.items.push(item);
    }

    loaded
}

fn cli_metadata() -> ResourceMetadata {
    ResourceMetadata {
        source: CLI_SOURCE_LABEL.to_string(),
        scope: Scope::Temporary,
        origin: ResourceOrigin::TopLevel,
        base_dir: None,
    }
}

/// Attribute a path with no recorded provenance by where it lives on disk.
pub fn default_path_metadata(path: &Path, cwd: &Path, agent_dir: &Path) -> ResourceMetadata {
    let project_dir = paths::project_config_dir(cwd);
    let (scope, base_dir) = if path.starts_with(agent_dir) {
        (Scope::User, Some(agent_dir.to_path_buf()))
    } else if path.starts_with(&project_dir) {
        (Scope::Project, Some(project_dir))
    } else {
        (Scope::Temporary, None)
    };
    ResourceMetadata {
        source: LOCAL_SOURCE_LABEL.to_string(),
        scope,
        origin: ResourceOrigin::TopLevel,
        base_dir,
    }
}

#[async_trait]
impl ResourceLoader for DefaultResourceLoader {
    fn get_extensions(&self) -> (&[LoadedExtension], &[ResourceDiagnostic]) {
        (&self.extensions.items, &self.extensions.diagnostics)
    }

    fn get_extension_runtime(&self) -> Option<ExtensionRuntime> {
        self.extension_runtime.clone()
    }

    fn get_skills(&self) -> (&[Skill], &[ResourceDiagnostic]) {
        (&self.skills.items, &self.skills.diagnostics)
    }

    fn get_prompts(&self) -> (&[PromptTemplate], &[ResourceDiagnostic]) {
        (&self.prompts.items, &self.prompts.diagnostics)
    }

    fn get_themes(&self) -> (&[Theme], &[ResourceDiagnostic]) {
        (&self.themes.items, &self.themes.diagnostics)
    }

    fn get_path_metadata(&self) -> &HashMap<PathBuf, ResourceMetadata> {
        &self.path_metadata
    }

    fn extend_resources(&mut self, paths: ResourceExtensionPaths) {
        self.extended.skill_paths.extend(paths.skill_paths);
        self.extended.prompt_paths.extend(paths.prompt_paths);
        self.extended.theme_paths.extend(paths.theme_paths);
    }

    async fn reload(&mut self) -> Result<(), ResourceError> {
        self.path_metadata.clear();

        let resolved = self.package_manager.resolve(None).await?;
        let cli_extensions = if self.options.additional_extension_paths.is_empty() {
            ResolvedPaths::default()
        } else {
            let options = ResolveExtensionSourcesOptions {
                temporary: true,
                ..Default::default()
            };
            self.package_manager
                .resolve_extension_sources(&self.options.additional_extension_paths, options)
                .await?
        };

        let extension_paths =
            self.candidate_paths(ResourceType::Extensions, &resolved, &cli_extensions);
        self.load_extensions(extension_paths).await;

        let skill_paths = self.candidate_paths(ResourceType::Skills, &resolved, &cli_extensions);
        let skill_paths = self.map_skill_paths(skill_paths);
        self.skills = load_named(
            &skill_paths,
            ResourceType::Skills,
            "skill",
            load_skill_from_file,
            |s| &s.name,
            |s| &s.path,
        );

        let prompt_paths = self.candidate_paths(ResourceType::Prompts, &resolved, &cli_extensions);
        self.prompts = load_named(
            &prompt_paths,
            ResourceType::Prompts,
            "prompt",
            load_prompt_from_file,
            |p| &p.name,
            |p| &p.path,
        );

        let theme_paths = self.candidate_paths(ResourceType::Themes, &resolved, &cli_extensions);
        self.themes = load_named(
            &theme_paths,
            ResourceType::Themes,
            "theme",
            load_theme_from_file,
            |t| &t.name,
            |t| &t.path,
        );

        tracing::debug!(
            extensions = self.extensions.items.len(),
            skills = self.skills.items.len(),
            prompts = self.prompts.items.len(),
            themes = self.themes.items.len(),
            "Reloaded resources"
        );
        Ok(())
    }
}
