pub mod conflicts;
pub mod types;

pub use conflicts::{ExtensionConflict, detect_extension_conflicts};
pub use types::{
    ExtensionLoadError, ExtensionLoader, ExtensionRuntime, LoadExtensionsResult,
    LoadedExtension, PathOnlyExtensionLoader,
};
