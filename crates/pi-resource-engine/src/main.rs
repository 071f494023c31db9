use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use pi_resource_engine::config::paths::{self, APP_NAME};
use pi_resource_engine::resources::package_manager::PackageManager;
use pi_resource_engine::resources::progress::{ProgressEvent, ProgressEventType};
use pi_resource_engine::resources::types::Scope;
use pi_resource_engine::settings::manager::SettingsManager;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackageCommand {
    Install,
    Remove,
    Update,
    List,
}

#[derive(Debug, Clone)]
struct PackageCommandOptions {
    command: PackageCommand,
    source: Option<String>,
    local: bool,
    help: bool,
    invalid_option: Option<String>,
}

fn parse_package_command(args: &[String]) -> Option<PackageCommandOptions> {
    let command_raw = args.first()?;

    let command = match command_raw.as_str() {
        "install" => PackageCommand::Install,
        "remove" => PackageCommand::Remove,
        "update" => PackageCommand::Update,
        "list" => PackageCommand::List,
        _ => return None,
    };

    let mut local = false;
    let mut help = false;
    let mut invalid_option = None;
    let mut source = None;

    for arg in args.iter().skip(1) {
        match arg.as_str() {
            "-h" | "--help" => help = true,
            "-l" | "--local" => {
                if matches!(command, PackageCommand::Install | PackageCommand::Remove) {
                    local = true;
                } else if invalid_option.is_none() {
                    invalid_option = Some(arg.clone());
                }
            }
            v if v.starts_with('-') => {
                if invalid_option.is_none() {
                    invalid_option = Some(v.to_string());
                }
            }
            _ if source.is_none() => source = Some(arg.clone()),
            _ => {}
        }
    }

    Some(PackageCommandOptions {
        command,
        source,
        local,
        help,
        invalid_option,
    })
}

fn package_usage(command: PackageCommand) -> &'static str {
    match command {
        PackageCommand::Install => "install <source> [-l]",
        PackageCommand::Remove => "remove <source> [-l]",
        PackageCommand::Update => "update [source]",
        PackageCommand::List => "list",
    }
}

fn print_usage() {
    println!("Usage:");
    for command in [
        PackageCommand::Install,
        PackageCommand::Remove,
        PackageCommand::Update,
        PackageCommand::List,
    ] {
        println!("  {APP_NAME}-pkg {}", package_usage(command));
    }
}

fn print_progress(event: &ProgressEvent) {
    match event.event_type {
        ProgressEventType::Start | ProgressEventType::Progress => {
            let message = event.message.as_deref().unwrap_or(&event.source);
            eprintln!("{:?}: {message}", event.action);
        }
        ProgressEventType::Error => {
            if let Some(message) = &event.message {
                eprintln!("{:?} failed for {}: {message}", event.action, event.source);
            }
        }
        ProgressEventType::Complete => {}
    }
}

fn package_manager(cwd: &Path, base_dir: &Path) -> anyhow::Result<PackageManager> {
    let settings = SettingsManager::create(cwd, base_dir).context("Failed to load settings")?;
    let mut manager = PackageManager::new(cwd, base_dir, Box::new(settings));
    manager.set_progress_callback(Some(Arc::new(print_progress)));
    Ok(manager)
}

fn require_source(options: &PackageCommandOptions) -> Option<&str> {
    let source = options.source.as_deref();
    if source.is_none() {
        eprintln!("Missing source");
        eprintln!("Usage: {APP_NAME}-pkg {}", package_usage(options.command));
    }
    source
}

async fn run_package_command(
    options: PackageCommandOptions,
    cwd: &Path,
    base_dir: &Path,
) -> anyhow::Result<i32> {
    if options.help {
        println!(
            "Usage:\n  {APP_NAME}-pkg {}",
            package_usage(options.command)
        );
        return Ok(0);
    }

    if let Some(invalid) = &options.invalid_option {
        eprintln!(
            "Unknown option {} for command {}",
            invalid,
            package_usage(options.command)
        );
        return Ok(1);
    }

    let mut manager = package_manager(cwd, base_dir)?;
    let scope = Scope::from_local(options.local);

    match options.command {
        PackageCommand::Install => {
            let Some(source) = require_source(&options) else {
                return Ok(1);
            };
            let installed = manager
                .install(source, options.local)
                .await
                .with_context(|| format!("Install failed: {source}"))?;
            manager
                .add_source_to_settings(source, options.local)
                .context("Installed, but failed to update settings")?;
            println!("Installed ({scope}): {source}");
            println!("Path: {}", installed.display());
        }
        PackageCommand::Remove => {
            let Some(source) = require_source(&options) else {
                return Ok(1);
            };
            manager
                .remove(source, options.local)
                .await
                .with_context(|| format!("Remove failed: {source}"))?;
            let removed = manager
                .remove_source_from_settings(source, options.local)
                .context("Removed, but failed to update settings")?;
            if !removed {
                eprintln!("No {scope} settings entry matched source: {source}");
                return Ok(1);
            }
            println!("Removed ({scope}): {source}");
        }
        PackageCommand::Update => {
            manager
                .update(options.source.as_deref())
                .await
                .context("Update failed")?;
            match &options.source {
                Some(source) => println!("Updated: {source}"),
                None => println!("Updated all packages"),
            }
        }
        PackageCommand::List => {
            let records = manager.list().await;
            if records.is_empty() {
                println!("No packages configured.");
                return Ok(0);
            }
            for scope in [Scope::User, Scope::Project] {
                let in_scope: Vec<_> = records.iter().filter(|r| r.scope == scope).collect();
                if in_scope.is_empty() {
                    continue;
                }
                println!("{} packages:", if scope == Scope::User { "User" } else { "Project" });
                for record in in_scope {
                    let suffix = if record.filtered { " (filtered)" } else { "" };
                    println!("{}{suffix}", record.source);
                    match &record.installed_path {
                        Some(path) => println!("  {}", path.display()),
                        None => println!("  (not installed)"),
                    }
                }
            }
        }
    }

    Ok(0)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let raw_args = std::env::args().skip(1).collect::<Vec<_>>();
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let base_dir = paths::resolve_base_dir(None);

    if matches!(raw_args.first().map(String::as_str), Some("--version" | "-v")) {
        println!("{}", paths::VERSION);
        return;
    }

    let Some(options) = parse_package_command(&raw_args) else {
        print_usage();
        std::process::exit(1);
    };

    match run_package_command(options, &cwd, &base_dir).await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(1);
        }
    }
}
