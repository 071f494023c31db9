use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

/// What a loaded extension registered, as far as name conflicts are concerned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedExtension {
    pub path: PathBuf,
    pub tools: Vec<String>,
    pub commands: Vec<String>,
    pub flags: Vec<String>,
}

impl LoadedExtension {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionLoadError {
    pub source: String,
    pub error: String,
}

/// Host state shared by the loaded extensions. Opaque to the resource engine.
pub type ExtensionRuntime = Arc<dyn Any + Send + Sync>;

/// Result of loading extensions.
#[derive(Debug, Clone, Default)]
pub struct LoadExtensionsResult {
    pub extensions: Vec<LoadedExtension>,
    pub errors: Vec<ExtensionLoadError>,
    /// Passed through untouched and handed back by the resource loader.
    pub runtime: Option<ExtensionRuntime>,
}

/// Loads extension entry points. Implemented by the host; the resource engine only needs
/// the registered names back.
#[async_trait]
pub trait ExtensionLoader: Send + Sync {
    async fn load_extensions(&self, paths: &[PathBuf]) -> LoadExtensionsResult;
}

/// Treats every path as an extension that registers nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathOnlyExtensionLoader;

#[async_trait]
impl ExtensionLoader for PathOnlyExtensionLoader {
    async fn load_extensions(&self, paths: &[PathBuf]) -> LoadExtensionsResult {
        LoadExtensionsResult {
            extensions: paths.iter().map(|path| LoadedExtension::new(path)).collect(),
            errors: Vec::new(),
            runtime: None,
        }
    }
}
