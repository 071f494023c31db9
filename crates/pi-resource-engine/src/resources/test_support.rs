//! In-process stand-ins for `git`, `npm` and the npm registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::ResourceError;
use crate::resources::command::{CommandOutput, CommandRunner, ExternalCommand};
use crate::resources::registry::NpmRegistry;
use crate::resources::source::{PackageSource, parse_source};

const DEFAULT_NPM_VERSION: &str = "1.0.0";

/// Records every command and simulates the filesystem effects of the ones the installer uses.
pub struct FakeCommandRunner {
    global_root: PathBuf,
    calls: Mutex<Vec<ExternalCommand>>,
    npm_versions: Mutex<HashMap<String, String>>,
    npm_files: Mutex<HashMap<String, Vec<(String, String)>>>,
    git_files: Mutex<HashMap<String, Vec<(String, String)>>>,
    failures: Mutex<Vec<String>>,
}

impl FakeCommandRunner {
    pub fn new(global_root: &Path) -> Self {
        Self {
            global_root: global_root.to_path_buf(),
            calls: Mutex::new(Vec::new()),
            npm_versions: Mutex::new(HashMap::new()),
            npm_files: Mutex::new(HashMap::new()),
            git_files: Mutex::new(HashMap::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn global_root(&self) -> &Path {
        &self.global_root
    }

    /// Version written by unversioned `npm install <name>`.
    pub fn set_npm_version(&self, name: &str, version: &str) {
        self.npm_versions
            .lock()
            .unwrap()
            .insert(name.to_string(), version.to_string());
    }

    /// Extra file created inside the installed npm package.
    pub fn add_npm_fixture(&self, name: &str, rel_path: &str, content: &str) {
        self.npm_files
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push((rel_path.to_string(), content.to_string()));
    }

    /// File created by `git clone <repo>`.
    pub fn add_git_fixture(&self, repo: &str, rel_path: &str, content: &str) {
        self.git_files
            .lock()
            .unwrap()
            .entry(repo.to_string())
            .or_default()
            .push((rel_path.to_string(), content.to_string()));
    }

    /// Any command whose display contains `needle` exits with status 1.
    pub fn fail_on(&self, needle: &str) {
        self.failures.lock().unwrap().push(needle.to_string());
    }

    pub fn calls(&self) -> Vec<ExternalCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn simulate(&self, command: &ExternalCommand) -> std::io::Result<String> {
        let args: Vec<&str> = command.args.iter().map(String::as_str).collect();
        if command.program == "git" {
            if let ["clone", repo, target] = args.as_slice() {
                let target = Path::new(target);
                std::fs::create_dir_all(target.join(".git"))?;
                let files = self.git_files.lock().unwrap().get(*repo).cloned();
                write_files(target, files.unwrap_or_default())?;
            }
            return Ok(String::new());
        }

        match args.as_slice() {
            ["root", "-g"] => Ok(self.global_root.display().to_string()),
            ["install", "-g", spec] => {
                self.npm_install(&self.global_root, spec)?;
                Ok(String::new())
            }
            ["install", spec, "--prefix", prefix] => {
                self.npm_install(&Path::new(prefix).join("node_modules"), spec)?;
                Ok(String::new())
            }
            ["uninstall", "-g", name] => {
                remove_if_exists(&self.global_root.join(name))?;
                Ok(String::new())
            }
            ["uninstall", name, "--prefix", prefix] => {
                remove_if_exists(&Path::new(prefix).join("node_modules").join(name))?;
                Ok(String::new())
            }
            _ => Ok(String::new()),
        }
    }

    fn npm_install(&self, node_modules: &Path, spec: &str) -> std::io::Result<()> {
        let PackageSource::Npm { name, version, .. } = parse_source(&format!("npm:{spec}")) else {
            return Ok(());
        };
        let version = version
            .filter(|version| version != "latest")
            .or_else(|| self.npm_versions.lock().unwrap().get(&name).cloned())
            .unwrap_or_else(|| DEFAULT_NPM_VERSION.to_string());

        let package_dir = node_modules.join(&name);
        std::fs::create_dir_all(&package_dir)?;
        let files = self.npm_files.lock().unwrap().get(&name).cloned();
        let files = files.unwrap_or_default();
        if !files.iter().any(|(rel, _)| rel == "package.json") {
            std::fs::write(
                package_dir.join("package.json"),
                format!(r#"{{"name":"{name}","version":"{version}"}}"#),
            )?;
        }
        write_files(&package_dir, files)
    }
}

fn write_files(root: &Path, files: Vec<(String, String)>) -> std::io::Result<()> {
    for (rel, content) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    if path.exists() {
        std::fs::remove_dir_all(path)?;
    }
    Ok(())
}

#[async_trait]
impl CommandRunner for FakeCommandRunner {
    async fn run(&self, command: &ExternalCommand) -> Result<CommandOutput, ResourceError> {
        self.calls.lock().unwrap().push(command.clone());

        let line = command.to_string();
        if self
            .failures
            .lock()
            .unwrap()
            .iter()
            .any(|needle| line.contains(needle.as_str()))
        {
            return Ok(CommandOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "simulated failure".to_string(),
            });
        }

        let stdout = self.simulate(command)?;
        Ok(CommandOutput {
            exit_code: Some(0),
            stdout,
            stderr: String::new(),
        })
    }
}

/// Registry with a fixed latest-version table. Unknown packages fail like an offline lookup.
#[derive(Default)]
pub struct FakeRegistry {
    latest: Mutex<HashMap<String, String>>,
    calls: AtomicUsize,
}

impl FakeRegistry {
    pub fn set_latest(&self, name: &str, version: &str) {
        self.latest
            .lock()
            .unwrap()
            .insert(name.to_string(), version.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NpmRegistry for FakeRegistry {
    async fn latest_version(&self, name: &str) -> Result<String, ResourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.latest
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ResourceError::Other(format!("registry unreachable for {name}")))
    }
}
