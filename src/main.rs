use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use multiwindow::registry::Durability;
use multiwindow::{
    CoordinatorConfig, FileRegistryStore, InstanceId, InstanceRegistry, ProfileKind, RegistryStore,
    diagnostics, paths,
};

#[derive(Parser, Debug)]
#[command(
    name = "multiwindow",
    version = env!("CARGO_PKG_VERSION"),
    about = "Inspect and repair the shared window instance registry"
)]
struct Cli {
    /// Config file to use instead of the default location.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Registry profile. Defaults to the one in the config file.
    #[arg(short = 'p', long = "profile", value_name = "NAME")]
    profile: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every persisted instance record.
    List,
    /// Delete an instance record and its task mapping.
    Forget {
        #[arg(value_name = "INSTANCE")]
        instance: u32,
    },
    /// Re-arm reaping for the next limit downgrade.
    ResetDowngrade,
    /// Print the effective configuration.
    Config,
}

fn main() -> Result<()> {
    diagnostics::init_logger();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => CoordinatorConfig::load_from(path),
        None => CoordinatorConfig::load(),
    }
    .context("loading config")?;
    if config.debug {
        diagnostics::set_enabled(true);
    }

    if let Command::Config = cli.command {
        let path = cli.config.clone().or_else(paths::config_path);
        if let Some(path) = path {
            println!("# {}", path.display());
        }
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let profile = cli
        .profile
        .clone()
        .unwrap_or_else(|| config.storage.profile.clone());
    let store = FileRegistryStore::open(paths::registry_root(), &profile, config.storage.debounce_ms)
        .with_context(|| format!("opening registry for profile {}", profile))?;
    log::info!("registry {}", store.file_path().display());
    let registry = InstanceRegistry::new(std::sync::Arc::new(store));

    match cli.command {
        Command::List => list(&registry),
        Command::Forget { instance } => {
            let id = InstanceId(instance);
            if !registry.record_exists(id) {
                anyhow::bail!("no record for {}", id);
            }
            registry.remove_record(id, Durability::Immediate)?;
            println!("forgot {}", id);
        }
        Command::ResetDowngrade => {
            registry.set_downgrade_handled(false)?;
            println!("downgrade reaping re-armed");
        }
        Command::Config => {}
    }
    registry.store().flush()?;
    Ok(())
}

fn list(registry: &InstanceRegistry) {
    let records = registry.records();
    if records.is_empty() {
        println!("no instances");
        return;
    }
    for record in records {
        let task = record
            .task_id
            .map(|task| task.0.to_string())
            .unwrap_or_else(|| "-".to_string());
        let accessed = OffsetDateTime::from_unix_timestamp_nanos(
            i128::from(record.last_accessed) * 1_000_000,
        )
        .ok()
        .and_then(|at| at.format(&Rfc3339).ok())
        .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>4}  task={:<8} tabs={}+{}  {:<9} {}{}  {}",
            record.id.0,
            task,
            record.tab_count,
            record.incognito_tab_count,
            match record.profile_kind {
                ProfileKind::Regular => "regular",
                ProfileKind::OffTheRecord => "private",
            },
            if record.closed_by_user { "[closed] " } else { "" },
            record.display_title(),
            accessed
        );
    }
}
