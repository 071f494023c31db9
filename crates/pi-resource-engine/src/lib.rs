//! Package and resource resolution for the pi coding agent.
//!
//! Reads package sources from user and project settings, installs npm and git packages,
//! and resolves the extensions, skills, prompt templates and themes they contribute.

pub mod config;
pub mod error;
pub mod extensions;
pub mod resources;
pub mod settings;

// Error
pub use error::ResourceError;

// Config
pub use config::paths;

// Settings
pub use settings::{
    PackageEntry, PackageEntryFilter, Settings, SettingsManager, SettingsPatch, SettingsProvider,
};

// Extensions
pub use extensions::{
    ExtensionConflict, ExtensionLoadError, ExtensionLoader, ExtensionRuntime,
    LoadExtensionsResult, LoadedExtension, PathOnlyExtensionLoader, detect_extension_conflicts,
};

// Resources
pub use resources::command::{CommandOutput, CommandRunner, ExternalCommand, ProcessCommandRunner};
pub use resources::installer::PackageInstaller;
pub use resources::loader::{
    DefaultResourceLoader, DefaultResourceLoaderOptions, ExtensionResourcePath,
    ResourceCollision, ResourceDiagnostic, ResourceDiagnosticType, ResourceExtensionPaths,
    ResourceLoader,
};
pub use resources::package_manager::{
    MissingPackage, MissingSourceAction, MissingSourceHandler, PackageManager, PackageRecord,
    ResolveExtensionSourcesOptions,
};
pub use resources::patterns::apply_patterns;
pub use resources::progress::{ProgressAction, ProgressCallback, ProgressEvent, ProgressEventType};
pub use resources::prompts::PromptTemplate;
pub use resources::registry::{HttpNpmRegistry, NpmRegistry};
pub use resources::skills::Skill;
pub use resources::source::{PackageSource, parse_source};
pub use resources::source_identity::PackageIdentity;
pub use resources::themes::Theme;
pub use resources::types::{
    ResolvedPaths, ResolvedResource, ResourceMetadata, ResourceOrigin, ResourceType, Scope,
};
