//! Installation state machine for npm, git and local package sources.
//!
//! Install roots per scope:
//! - user: npm packages go through `npm -g`; git checkouts under `<agentDir>/git/<host>/<path>`
//! - project: `<cwd>/.pi/npm/node_modules/<name>` and `<cwd>/.pi/git/<host>/<path>`
//! - temporary: `<tmp>/pi-extensions/<hash>/{npm,git}/...`, one root per source identity
//!
//! Every npm/git mutation holds an [`InstallLock`] for its target.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::config::paths::{self, GIT_DIR_NAME, NPM_DIR_NAME};
use crate::error::ResourceError;
use crate::resources::command::{
    CommandRunner, ExternalCommand, ProcessCommandRunner, run_checked,
};
use crate::resources::lock::{InstallLock, short_hash};
use crate::resources::manifest::{PACKAGE_DESCRIPTOR_FILE, read_package_descriptor};
use crate::resources::progress::{
    ProgressAction, ProgressCallback, ProgressEvent, ProgressEventType, emit,
};
use crate::resources::registry::{HttpNpmRegistry, NpmRegistry};
use crate::resources::source::PackageSource;
use crate::resources::source_identity::{package_identity, resolve_local_path};
use crate::resources::types::Scope;

const NODE_MODULES_DIR: &str = "node_modules";
const NPM_ROOT_DESCRIPTOR: &str = "{\n  \"name\": \"pi-extensions\",\n  \"private\": true\n}\n";
const NPM_ROOT_GITIGNORE: &str = "*\n!.gitignore\n";

pub struct PackageInstaller {
    cwd: PathBuf,
    agent_dir: PathBuf,
    temp_root: PathBuf,
    runner: Arc<dyn CommandRunner>,
    registry: Arc<dyn NpmRegistry>,
    /// Output of `npm root -g`, resolved at most once per installer.
    npm_global_root: OnceCell<PathBuf>,
    progress: Option<ProgressCallback>,
}

impl PackageInstaller {
    pub fn new(cwd: &Path, agent_dir: &Path) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            agent_dir: agent_dir.to_path_buf(),
            temp_root: paths::temp_root(),
            runner: Arc::new(ProcessCommandRunner),
            registry: Arc::new(HttpNpmRegistry::default()),
            npm_global_root: OnceCell::new(),
            progress: None,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn NpmRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_temp_root(mut self, temp_root: &Path) -> Self {
        self.temp_root = temp_root.to_path_buf();
        self
    }

    pub fn set_progress_callback(&mut self, callback: Option<ProgressCallback>) {
        self.progress = callback;
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn agent_dir(&self) -> &Path {
        &self.agent_dir
    }

    /// Directory that relative local sources of `scope` resolve against.
    pub fn scope_base_dir(&self, scope: Scope) -> PathBuf {
        match scope {
            Scope::User => self.agent_dir.clone(),
            Scope::Project => paths::project_config_dir(&self.cwd),
            Scope::Temporary => self.cwd.clone(),
        }
    }

    /// Root under which `source` is installed for `scope`.
    pub fn install_base(&self, source: &PackageSource, scope: Scope) -> PathBuf {
        match scope {
            Scope::User => self.agent_dir.clone(),
            Scope::Project => paths::project_config_dir(&self.cwd),
            Scope::Temporary => {
                let identity = package_identity(source, &self.cwd);
                self.temp_root.join(short_hash(identity.as_str()))
            }
        }
    }

    fn npm_root(&self, source: &PackageSource, scope: Scope) -> PathBuf {
        self.install_base(source, scope).join(NPM_DIR_NAME)
    }

    fn git_root(&self, source: &PackageSource, scope: Scope) -> PathBuf {
        self.install_base(source, scope).join(GIT_DIR_NAME)
    }

    async fn global_node_modules(&self) -> Result<&Path, ResourceError> {
        let root = self
            .npm_global_root
            .get_or_try_init(|| async {
                let output =
                    run_checked(self.runner.as_ref(), &ExternalCommand::npm(["root", "-g"]))
                        .await?;
                let root = output.stdout.trim();
                if root.is_empty() {
                    return Err(ResourceError::Config(
                        "`npm root -g` returned an empty path".to_string(),
                    ));
                }
                Ok::<_, ResourceError>(PathBuf::from(root))
            })
            .await?;
        Ok(root.as_path())
    }

    /// Where `source` lives (or would live) once installed in `scope`.
    pub async fn target_path(
        &self,
        source: &PackageSource,
        scope: Scope,
    ) -> Result<PathBuf, ResourceError> {
        match source {
            PackageSource::Npm { name, .. } => {
                let node_modules = match scope {
                    Scope::User => self.global_node_modules().await?.to_path_buf(),
                    Scope::Project | Scope::Temporary => {
                        self.npm_root(source, scope).join(NODE_MODULES_DIR)
                    }
                };
                Ok(node_modules.join(name))
            }
            PackageSource::Git { host, path, .. } => {
                Ok(self.git_root(source, scope).join(host).join(path))
            }
            PackageSource::Local { path } => {
                Ok(resolve_local_path(&self.scope_base_dir(scope), path))
            }
        }
    }

    /// The installed location, if it exists on disk.
    pub async fn installed_path(&self, source: &PackageSource, scope: Scope) -> Option<PathBuf> {
        match self.target_path(source, scope).await {
            Ok(path) if path.exists() => Some(path),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("Cannot locate installed package {source}: {e}");
                None
            }
        }
    }

    /// Install `source` into `scope` and return its installed path.
    ///
    /// Git checkouts that already exist are left untouched; local sources are only
    /// checked for existence.
    pub async fn install(
        &self,
        source: &PackageSource,
        scope: Scope,
    ) -> Result<PathBuf, ResourceError> {
        match source {
            PackageSource::Local { path } => {
                let resolved = resolve_local_path(&self.scope_base_dir(scope), path);
                if !resolved.exists() {
                    return Err(ResourceError::MissingSource(format!(
                        "Path does not exist: {}",
                        resolved.display()
                    )));
                }
                Ok(resolved)
            }
            PackageSource::Npm { spec, .. } => {
                let _lock = self.lock(source, scope).await?;
                self.npm_install(source, scope, spec).await
            }
            PackageSource::Git { .. } => {
                let _lock = self.lock(source, scope).await?;
                self.git_install(source, scope).await
            }
        }
    }

    /// Bring an installed package up to date. A missing git checkout is installed instead.
    pub async fn update(
        &self,
        source: &PackageSource,
        scope: Scope,
    ) -> Result<PathBuf, ResourceError> {
        match source {
            PackageSource::Local { .. } => self.install(source, scope).await,
            PackageSource::Npm {
                spec,
                name,
                pinned,
                ..
            } => {
                let _lock = self.lock(source, scope).await?;
                let target_spec = if *pinned {
                    spec.clone()
                } else {
                    format!("{name}@latest")
                };
                self.npm_install(source, scope, &target_spec).await
            }
            PackageSource::Git { .. } => {
                let _lock = self.lock(source, scope).await?;
                let target = self.target_path(source, scope).await?;
                if !target.exists() {
                    return self.git_install(source, scope).await;
                }
                self.git_pull(source, &target).await?;
                Ok(target)
            }
        }
    }

    /// Uninstall `source` from `scope`. Local sources are never touched on disk.
    pub async fn remove(&self, source: &PackageSource, scope: Scope) -> Result<(), ResourceError> {
        match source {
            PackageSource::Local { .. } => Ok(()),
            PackageSource::Npm { name, .. } => {
                let _lock = self.lock(source, scope).await?;
                match scope {
                    Scope::User => {
                        run_checked(
                            self.runner.as_ref(),
                            &ExternalCommand::npm(["uninstall", "-g", name.as_str()]),
                        )
                        .await?;
                    }
                    Scope::Project | Scope::Temporary => {
                        let root = self.npm_root(source, scope);
                        if !root.exists() {
                            return Ok(());
                        }
                        let prefix = root.display().to_string();
                        run_checked(
                            self.runner.as_ref(),
                            &ExternalCommand::npm([
                                "uninstall",
                                name.as_str(),
                                "--prefix",
                                prefix.as_str(),
                            ]),
                        )
                        .await?;
                    }
                }
                tracing::info!("Removed npm package {name} ({scope})");
                Ok(())
            }
            PackageSource::Git { .. } => {
                let _lock = self.lock(source, scope).await?;
                let target = self.target_path(source, scope).await?;
                if target.exists() {
                    tokio::fs::remove_dir_all(&target).await?;
                    tracing::info!("Removed git checkout {}", target.display());
                }
                prune_empty_parents(&target, &self.git_root(source, scope));
                Ok(())
            }
        }
    }

    /// Whether the installed copy should be replaced.
    ///
    /// Pinned npm sources compare the installed version against the pin without touching
    /// the network. Unpinned npm sources ask the registry; a failed lookup counts as fresh.
    /// Git and local sources are never stale.
    pub async fn is_stale(&self, source: &PackageSource, scope: Scope) -> bool {
        let PackageSource::Npm {
            name,
            version,
            pinned,
            ..
        } = source
        else {
            return false;
        };

        let Some(installed) = self.installed_npm_version(source, scope).await else {
            return true;
        };

        if *pinned {
            return version.as_deref() != Some(installed.as_str());
        }

        match self.registry.latest_version(name).await {
            Ok(latest) => latest != installed,
            Err(e) => {
                tracing::warn!("Could not check latest version of {name}: {e}");
                false
            }
        }
    }

    async fn installed_npm_version(&self, source: &PackageSource, scope: Scope) -> Option<String> {
        let path = self.installed_path(source, scope).await?;
        read_package_descriptor(&path)?.version
    }

    async fn lock(&self, source: &PackageSource, scope: Scope) -> Result<InstallLock, ResourceError> {
        let identity = package_identity(source, &self.scope_base_dir(scope));
        InstallLock::acquire(&self.install_base(source, scope), identity.as_str()).await
    }

    async fn npm_install(
        &self,
        source: &PackageSource,
        scope: Scope,
        spec: &str,
    ) -> Result<PathBuf, ResourceError> {
        let command = match scope {
            Scope::User => ExternalCommand::npm(["install", "-g", spec]),
            Scope::Project | Scope::Temporary => {
                let root = self.npm_root(source, scope);
                ensure_npm_root(&root).await?;
                let prefix = root.display().to_string();
                ExternalCommand::npm(["install", spec, "--prefix", prefix.as_str()])
            }
        };
        run_checked(self.runner.as_ref(), &command).await?;
        let target = self.target_path(source, scope).await?;
        tracing::info!("Installed npm package {spec} ({scope}) at {}", target.display());
        Ok(target)
    }

    async fn git_install(
        &self,
        source: &PackageSource,
        scope: Scope,
    ) -> Result<PathBuf, ResourceError> {
        let PackageSource::Git { repo, git_ref, .. } = source else {
            return Err(ResourceError::UnsupportedSource(source.to_string()));
        };
        let target = self.target_path(source, scope).await?;
        if target.exists() {
            tracing::debug!("Git package already present at {}", target.display());
            return Ok(target);
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        self.emit_progress(ProgressAction::Clone, source, format!("Cloning {repo}"));
        let target_arg = target.display().to_string();
        run_checked(
            self.runner.as_ref(),
            &ExternalCommand::git(["clone", repo.as_str(), target_arg.as_str()]),
        )
        .await?;

        if let Some(git_ref) = git_ref {
            run_checked(
                self.runner.as_ref(),
                &ExternalCommand::git(["checkout", git_ref.as_str()]).current_dir(&target),
            )
            .await?;
        }

        self.install_dependencies(&target).await?;
        tracing::info!("Cloned {repo} ({scope}) into {}", target.display());
        Ok(target)
    }

    async fn git_pull(&self, source: &PackageSource, target: &Path) -> Result<(), ResourceError> {
        self.emit_progress(
            ProgressAction::Pull,
            source,
            format!("Updating {}", target.display()),
        );
        for args in [
            &["fetch", "--prune", "origin"][..],
            &["reset", "--hard", "@{upstream}"][..],
            &["clean", "-fdx"][..],
        ] {
            run_checked(
                self.runner.as_ref(),
                &ExternalCommand::git(args.iter().copied()).current_dir(target),
            )
            .await?;
        }
        self.install_dependencies(target).await?;
        tracing::info!("Updated git checkout {}", target.display());
        Ok(())
    }

    async fn install_dependencies(&self, package_root: &Path) -> Result<(), ResourceError> {
        let declares = read_package_descriptor(package_root)
            .is_some_and(|descriptor| descriptor.declares_dependencies());
        if !declares {
            return Ok(());
        }
        run_checked(
            self.runner.as_ref(),
            &ExternalCommand::npm(["install"]).current_dir(package_root),
        )
        .await?;
        Ok(())
    }

    fn emit_progress(&self, action: ProgressAction, source: &PackageSource, message: String) {
        emit(
            self.progress.as_ref(),
            ProgressEvent::new(ProgressEventType::Progress, action, &source.to_string())
                .with_message(message),
        );
    }
}

/// Lay out a scope-local npm root: a private descriptor and a self-ignoring `.gitignore`.
async fn ensure_npm_root(root: &Path) -> Result<(), ResourceError> {
    tokio::fs::create_dir_all(root).await?;
    let descriptor = root.join(PACKAGE_DESCRIPTOR_FILE);
    if !descriptor.exists() {
        tokio::fs::write(&descriptor, NPM_ROOT_DESCRIPTOR).await?;
    }
    let gitignore = root.join(".gitignore");
    if !gitignore.exists() {
        tokio::fs::write(&gitignore, NPM_ROOT_GITIGNORE).await?;
    }
    Ok(())
}

/// Remove empty directories from `path`'s parent upwards, stopping at `root`.
fn prune_empty_parents(path: &Path, root: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        let is_empty = std::fs::read_dir(dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if !is_empty || std::fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::source::parse_source;
    use crate::resources::test_support::{FakeCommandRunner, FakeRegistry};

    struct Fixture {
        _tmp: tempfile::TempDir,
        cwd: PathBuf,
        agent_dir: PathBuf,
        runner: Arc<FakeCommandRunner>,
        registry: Arc<FakeRegistry>,
        installer: PackageInstaller,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let cwd = tmp.path().join("project");
        let agent_dir = tmp.path().join("agent");
        let global_root = tmp.path().join("global").join("node_modules");
        std::fs::create_dir_all(&cwd).unwrap();
        std::fs::create_dir_all(&agent_dir).unwrap();

        let runner = Arc::new(FakeCommandRunner::new(&global_root));
        let registry = Arc::new(FakeRegistry::default());
        let installer = PackageInstaller::new(&cwd, &agent_dir)
            .with_runner(runner.clone())
            .with_registry(registry.clone())
            .with_temp_root(&tmp.path().join("tmp"));
        Fixture {
            _tmp: tmp,
            cwd,
            agent_dir,
            runner,
            registry,
            installer,
        }
    }

    #[tokio::test]
    async fn test_project_npm_install_lays_out_root() {
        let fx = fixture();
        let source = parse_source("npm:@acme/tools@1.2.0");
        let path = fx.installer.install(&source, Scope::Project).await.unwrap();

        let root = fx.cwd.join(".pi").join("npm");
        assert_eq!(path, root.join("node_modules").join("@acme").join("tools"));
        assert!(root.join("package.json").is_file());
        assert_eq!(
            std::fs::read_to_string(root.join(".gitignore")).unwrap(),
            "*\n!.gitignore\n"
        );
        assert!(
            fx.runner
                .command_lines()
                .contains(&format!("npm install @acme/tools@1.2.0 --prefix {}", root.display()))
        );
    }

    #[tokio::test]
    async fn test_user_npm_install_is_global() {
        let fx = fixture();
        let source = parse_source("npm:widgets");
        let path = fx.installer.install(&source, Scope::User).await.unwrap();
        assert_eq!(path, fx.runner.global_root().join("widgets"));
        let lines = fx.runner.command_lines();
        assert!(lines.contains(&"npm install -g widgets".to_string()));
        assert!(lines.contains(&"npm root -g".to_string()));

        fx.installer.remove(&source, Scope::User).await.unwrap();
        assert!(
            fx.runner
                .command_lines()
                .contains(&"npm uninstall -g widgets".to_string())
        );
        assert!(fx.installer.installed_path(&source, Scope::User).await.is_none());
    }

    #[tokio::test]
    async fn test_pinned_npm_staleness_needs_no_network() {
        let fx = fixture();
        fx.runner.set_npm_version("widgets", "1.0.0");
        let installed = parse_source("npm:widgets@1.0.0");
        fx.installer.install(&installed, Scope::Project).await.unwrap();

        let wanted = parse_source("npm:widgets@1.2.0");
        assert!(fx.installer.is_stale(&wanted, Scope::Project).await);
        assert!(!fx.installer.is_stale(&installed, Scope::Project).await);
        assert_eq!(fx.registry.calls(), 0);
    }

    #[tokio::test]
    async fn test_unpinned_npm_staleness_uses_registry_and_fails_open() {
        let fx = fixture();
        fx.runner.set_npm_version("widgets", "1.0.0");
        let source = parse_source("npm:widgets");
        fx.installer.install(&source, Scope::Project).await.unwrap();

        assert!(!fx.installer.is_stale(&source, Scope::Project).await);
        assert_eq!(fx.registry.calls(), 1);

        fx.registry.set_latest("widgets", "2.0.0");
        assert!(fx.installer.is_stale(&source, Scope::Project).await);

        fx.registry.set_latest("widgets", "1.0.0");
        assert!(!fx.installer.is_stale(&source, Scope::Project).await);
    }

    #[tokio::test]
    async fn test_missing_npm_package_is_stale() {
        let fx = fixture();
        let source = parse_source("npm:widgets@1.0.0");
        assert!(fx.installer.is_stale(&source, Scope::Project).await);
        assert!(fx.installer.installed_path(&source, Scope::Project).await.is_none());
    }

    #[tokio::test]
    async fn test_git_install_clones_checks_out_and_is_idempotent() {
        let fx = fixture();
        fx.runner.add_git_fixture(
            "https://github.com/acme/widgets",
            "package.json",
            r#"{"name":"widgets","dependencies":{"left-pad":"1.0.0"}}"#,
        );
        let source = parse_source("https://github.com/acme/widgets@v1");
        let path = fx.installer.install(&source, Scope::Project).await.unwrap();
        assert_eq!(
            path,
            fx.cwd
                .join(".pi")
                .join("git")
                .join("github.com")
                .join("acme")
                .join("widgets")
        );

        let lines = fx.runner.command_lines();
        assert_eq!(
            lines,
            vec![
                format!("git clone https://github.com/acme/widgets {}", path.display()),
                "git checkout v1".to_string(),
                "npm install".to_string(),
            ]
        );

        fx.installer.install(&source, Scope::Project).await.unwrap();
        assert_eq!(fx.runner.command_lines().len(), 3);
    }

    #[tokio::test]
    async fn test_git_update_fetches_resets_and_cleans() {
        let fx = fixture();
        let source = parse_source("git:github.com/acme/widgets");
        let path = fx.installer.install(&source, Scope::User).await.unwrap();
        assert!(path.starts_with(fx.agent_dir.join("git")));
        fx.runner.clear();

        fx.installer.update(&source, Scope::User).await.unwrap();
        assert_eq!(
            fx.runner.command_lines(),
            vec![
                "git fetch --prune origin".to_string(),
                "git reset --hard @{upstream}".to_string(),
                "git clean -fdx".to_string(),
            ]
        );
        assert!(fx.runner.calls().iter().all(|c| c.cwd.as_deref() == Some(path.as_path())));
    }

    #[tokio::test]
    async fn test_git_remove_prunes_empty_parents() {
        let fx = fixture();
        let source = parse_source("git@github.com:acme/widgets.git");
        let path = fx.installer.install(&source, Scope::Project).await.unwrap();
        let git_root = fx.cwd.join(".pi").join("git");

        fx.installer.remove(&source, Scope::Project).await.unwrap();
        assert!(!path.exists());
        assert!(!git_root.join("github.com").exists());
        assert!(git_root.exists());
    }

    #[tokio::test]
    async fn test_temporary_scope_is_namespaced_by_identity() {
        let fx = fixture();
        let a = parse_source("npm:alpha");
        let b = parse_source("npm:beta");
        let base_a = fx.installer.install_base(&a, Scope::Temporary);
        let base_b = fx.installer.install_base(&b, Scope::Temporary);
        assert_ne!(base_a, base_b);
        assert_eq!(
            base_a,
            fx.installer.install_base(&parse_source("npm:alpha@2.0.0"), Scope::Temporary)
        );

        let path = fx.installer.install(&a, Scope::Temporary).await.unwrap();
        assert!(path.starts_with(&base_a));
    }

    #[tokio::test]
    async fn test_local_install_checks_existence() {
        let fx = fixture();
        std::fs::create_dir_all(fx.cwd.join("pkg")).unwrap();
        let path = fx
            .installer
            .install(&parse_source("./pkg"), Scope::Temporary)
            .await
            .unwrap();
        assert!(path.ends_with("pkg"));

        let err = fx
            .installer
            .install(&parse_source("./missing"), Scope::Temporary)
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::MissingSource(_)));
        assert!(fx.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_command_failure_carries_output() {
        let fx = fixture();
        fx.runner.fail_on("git clone");
        let err = fx
            .installer
            .install(&parse_source("git:github.com/acme/broken"), Scope::Project)
            .await
            .unwrap_err();
        match err {
            ResourceError::CommandFailed { command, output } => {
                assert!(command.starts_with("git clone https://github.com/acme/broken"));
                assert_eq!(output, "simulated failure");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
