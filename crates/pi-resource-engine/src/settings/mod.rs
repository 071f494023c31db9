pub mod manager;
pub mod types;

pub use manager::{SettingsManager, SettingsProvider};
pub use types::{PackageEntry, PackageEntryFilter, Settings, SettingsField, SettingsPatch};
