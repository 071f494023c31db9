use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

pub const APP_NAME: &str = "pi";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const CONFIG_DIR_NAME: &str = ".pi";
pub const AGENT_DIR_ENV: &str = "PI_CODING_AGENT_DIR";

pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const NPM_DIR_NAME: &str = "npm";
pub const GIT_DIR_NAME: &str = "git";
pub const LOCKS_DIR_NAME: &str = ".locks";
pub const TEMP_ROOT_NAME: &str = "pi-extensions";

/// Default agent directory: `$PI_CODING_AGENT_DIR` or `~/.pi/agent/`.
pub static DEFAULT_BASE_DIR: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(value) = std::env::var(AGENT_DIR_ENV)
        && !value.trim().is_empty()
    {
        return expand_home(value.trim());
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
        .join("agent")
});

/// Resolve the agent directory, using the provided override or the default.
pub fn resolve_base_dir(override_dir: Option<&Path>) -> PathBuf {
    override_dir
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| DEFAULT_BASE_DIR.clone())
}

/// Project configuration directory: `<cwd>/.pi`.
pub fn project_config_dir(cwd: &Path) -> PathBuf {
    cwd.join(CONFIG_DIR_NAME)
}

/// Get the settings.json file path.
pub fn settings_file(base: &Path) -> PathBuf {
    base.join(SETTINGS_FILE_NAME)
}

/// Root for ephemeral (temporary scope) package installs.
pub fn temp_root() -> PathBuf {
    std::env::temp_dir().join(TEMP_ROOT_NAME)
}

/// Ensure a directory exists, creating it if needed.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

fn expand_home(value: &str) -> PathBuf {
    if value == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(value));
    }
    if let Some(rest) = value.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_base_dir_prefers_override() {
        let dir = Path::new("/tmp/agent-override");
        assert_eq!(resolve_base_dir(Some(dir)), dir.to_path_buf());
    }

    #[test]
    fn test_project_config_dir() {
        assert_eq!(
            project_config_dir(Path::new("/work/proj")),
            PathBuf::from("/work/proj/.pi")
        );
    }
}
