//! Command-line interface for Dockhand extension modules.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dockhand_core::config::{default_config_dir, env_vars};
use dockhand_core::{LifecycleError, LifecycleManager, ManagerOverrides};

/// Dockhand - Discover, load and supervise extension modules.
#[derive(Parser, Debug)]
#[command(name = "dockhand")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration directory (defaults to ~/.config/dockhand).
    #[arg(long, global = true, env = "DOCKHAND_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Active environment used for config overlays.
    #[arg(short, long, global = true, env = "DOCKHAND_ENV")]
    env: Option<String>,

    /// Module search path, replacing the configured ones. Repeatable.
    #[arg(long = "search-path", global = true)]
    search_paths: Vec<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// List discovered modules.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Show a module's metadata and effective config.
    Inspect {
        /// Module name.
        name: String,
    },
    /// Load a module, report its health, then unload it.
    Load {
        /// Module name.
        name: String,
    },
    /// Load the enabled set, then unload one module.
    Unload {
        /// Module name.
        name: String,
    },
    /// Mark a module enabled in its config.
    Enable {
        /// Module name.
        name: String,
    },
    /// Mark a module disabled in its config.
    Disable {
        /// Module name.
        name: String,
    },
    /// Check the health of loaded modules.
    Health {
        /// Only check this module.
        name: Option<String>,
    },
    /// Load the enabled set, reload it and report the result.
    Reload,
    /// List tools published by enabled modules.
    Tools {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Run supervision until interrupted.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config_dir = args.config_dir.clone().unwrap_or_else(default_config_dir);
    let manager = LifecycleManager::with_native_loader(&config_dir);
    manager.initialize(overrides(&args)).await?;
    tracing::debug!(config_dir = %config_dir.display(), "Using config directory");

    let result = run(&manager, args.command).await;
    manager.stop().await?;
    result
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "dockhand=debug" } else { "dockhand=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn overrides(args: &Args) -> ManagerOverrides {
    ManagerOverrides {
        search_paths: (!args.search_paths.is_empty()).then(|| args.search_paths.clone()),
        environment: args.env.clone(),
        ..Default::default()
    }
}

async fn run(manager: &LifecycleManager, command: Command) -> Result<()> {
    match command {
        Command::List { json } => list(manager, json).await,
        Command::Inspect { name } => inspect(manager, &name).await,
        Command::Load { name } => load(manager, &name).await,
        Command::Unload { name } => unload(manager, &name).await,
        Command::Enable { name } => set_enabled(manager, &name, true),
        Command::Disable { name } => set_enabled(manager, &name, false),
        Command::Health { name } => health(manager, name).await,
        Command::Reload => reload(manager).await,
        Command::Tools { json } => tools(manager, json).await,
        Command::Serve => serve(manager).await,
    }
}

async fn list(manager: &LifecycleManager, json: bool) -> Result<()> {
    let descriptors = manager.descriptors().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(());
    }
    if descriptors.is_empty() {
        println!("No modules found.");
        return Ok(());
    }

    println!("{:<24} {:<10} {:<12} {:<8} PATH", "NAME", "VERSION", "TYPE", "ENABLED");
    for d in &descriptors {
        println!(
            "{:<24} {:<10} {:<12} {:<8} {}",
            d.name,
            d.info.version,
            d.module_type.to_string(),
            if d.enabled { "yes" } else { "no" },
            d.path.display()
        );
    }
    Ok(())
}

async fn inspect(manager: &LifecycleManager, name: &str) -> Result<()> {
    let descriptor = manager
        .descriptors()
        .await
        .into_iter()
        .find(|d| d.name == name)
        .ok_or_else(|| LifecycleError::NotFound(name.to_string()))?;
    let config = manager.effective_config(name)?;

    let info = &descriptor.info;
    println!("Name:        {}", info.name);
    println!("Version:     {}", info.version);
    println!("Type:        {}", descriptor.module_type);
    println!("Enabled:     {}", descriptor.enabled);
    println!("Path:        {}", descriptor.path.display());
    println!("Description: {}", info.description);
    if !info.author.is_empty() {
        println!("Author:      {}", info.author);
    }
    if !info.license.is_empty() {
        println!("License:     {}", info.license);
    }
    if !info.tags.is_empty() {
        println!("Tags:        {}", info.tags.join(", "));
    }
    if !info.min_host_version.is_empty() {
        println!("Min host:    {}", info.min_host_version);
    }
    if !info.dependencies.is_empty() {
        println!("Dependencies:");
        for dep in &info.dependencies {
            println!("  - {} {} ({})", dep.name, dep.version, dep.kind);
        }
    }
    println!("Settings:");
    println!("{}", serde_json::to_string_pretty(&config.settings)?);
    Ok(())
}

async fn load(manager: &LifecycleManager, name: &str) -> Result<()> {
    manager.load_module(name).await?;
    let status = manager.module_health(name).await?;
    println!("Loaded {} ({})", name, status.status);
    if !status.message.is_empty() {
        println!("  {}", status.message);
    }
    Ok(())
}

async fn unload(manager: &LifecycleManager, name: &str) -> Result<()> {
    manager.start().await?;
    manager.unload_module(name).await?;
    println!("Unloaded {}", name);
    Ok(())
}

fn set_enabled(manager: &LifecycleManager, name: &str, enabled: bool) -> Result<()> {
    let store = manager.store();
    let mut config = store.load_config(name)?;
    config.enabled = enabled;
    store.save_config(&mut config)?;
    println!(
        "{} {}",
        if enabled { "Enabled" } else { "Disabled" },
        name
    );
    Ok(())
}

async fn health(manager: &LifecycleManager, name: Option<String>) -> Result<()> {
    let names = match name {
        Some(name) => {
            manager.load_module(&name).await?;
            vec![name]
        }
        None => manager.start().await?,
    };
    if names.is_empty() {
        println!("No modules loaded.");
        return Ok(());
    }

    for name in names {
        match manager.module_health(&name).await {
            Ok(status) if status.message.is_empty() => println!("{:<24} {}", name, status.status),
            Ok(status) => println!("{:<24} {} - {}", name, status.status, status.message),
            Err(e) => println!("{:<24} error - {}", name, e),
        }
    }
    Ok(())
}

async fn reload(manager: &LifecycleManager) -> Result<()> {
    let started = manager.start().await?;
    let reloaded = manager.reload().await?;
    println!(
        "Reloaded {} module(s) (previously {})",
        reloaded.len(),
        started.len()
    );
    for name in reloaded {
        println!("  {}", name);
    }
    Ok(())
}

async fn tools(manager: &LifecycleManager, json: bool) -> Result<()> {
    manager.start().await?;
    let descriptors: Vec<_> = manager
        .get_tools()
        .await
        .iter()
        .map(|tool| tool.descriptor())
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
    } else if descriptors.is_empty() {
        println!("No tools available.");
    } else {
        for tool in descriptors {
            println!("{:<32} {}", tool.name, tool.description);
        }
    }
    Ok(())
}

async fn serve(manager: &LifecycleManager) -> Result<()> {
    let loaded = manager.start().await?;
    tracing::info!(modules = ?loaded, "Supervising modules, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}
