//! dismissible - Inspect and edit dismissible flags from the command line.
//!
//! Flags are kept in a JSON snapshot file, loaded at startup and written
//! back whenever a command changed something.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dismissible::storage::{StorageEngine, DEFAULT_TABLE_PREFIX};
use dismissible::{Dismissibles, FlagArgs, FlagError, MetaStore, SetOutcome, TenantId, UserId};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "dismissible")]
#[command(version)]
#[command(about = "Read and write persistent dismissible flags")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Snapshot file holding the flags
    #[arg(long, global = true, default_value = dismissible::DEFAULT_STORE_PATH)]
    store: PathBuf,

    /// Base prefix for tenant-scoped keys
    #[arg(long, global = true, default_value = DEFAULT_TABLE_PREFIX)]
    table_prefix: String,

    /// Enable debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Print a flag's value (exit code 1 if unset or expired)
    ///
    /// Examples:
    ///   dismissible get --id banner_v2 --user 42
    Get(FlagTarget),
    /// Set a flag, optionally with a lifespan
    ///
    /// Examples:
    ///   dismissible set --id banner_v2 --user 42
    ///   dismissible set --id banner_v2 --user 42 --value '"dismissed"' --life 3600
    Set {
        #[command(flatten)]
        target: FlagTarget,
        /// Value to store, as JSON (bare words are stored as strings)
        #[arg(long)]
        value: Option<String>,
        /// Lifespan in seconds (0 = never expires)
        #[arg(long, default_value = "0")]
        life: u64,
    },
    /// Delete a flag
    Delete(FlagTarget),
}

#[derive(Args)]
struct FlagTarget {
    /// Flag id
    #[arg(long)]
    id: String,
    /// User the flag belongs to
    #[arg(long)]
    user: UserId,
    /// Scope the flag to a tenant instead of globally
    #[arg(long)]
    tenant: Option<TenantId>,
}

impl FlagTarget {
    fn args(&self) -> FlagArgs {
        let args = FlagArgs::new(self.id.clone()).user(self.user);
        match self.tenant {
            Some(tenant) => args.tenant(tenant),
            None => args,
        }
    }
}

fn parse_value(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

/// Executes one command. `Ok` carries the exit code.
fn run<S: MetaStore>(command: Command, flags: &Dismissibles<S>) -> Result<ExitCode, FlagError> {
    let code = match command {
        Command::Get(target) => match flags.get(target.args())? {
            Some(value) => {
                println!("{}", value);
                ExitCode::SUCCESS
            }
            None => ExitCode::FAILURE,
        },
        Command::Set {
            target,
            value,
            life,
        } => {
            let mut args = target.args().lifespan(life);
            if let Some(raw) = value {
                args = args.value(parse_value(raw));
            }
            match flags.set(args)? {
                SetOutcome::Inserted(id) => info!(meta_id = id, "Flag created"),
                SetOutcome::Recreated(id) => info!(meta_id = id, "Flag recreated"),
                SetOutcome::Updated => info!("Flag updated"),
            }
            ExitCode::SUCCESS
        }
        Command::Delete(target) => {
            flags.delete(target.args())?;
            ExitCode::SUCCESS
        }
    };
    Ok(code)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let storage = StorageEngine::load(&cli.store, &cli.table_prefix)
        .with_context(|| format!("failed to load {}", cli.store.display()))?;
    debug!(entries = storage.len(), "Store loaded");

    let flags = Dismissibles::new(&storage);
    let before = storage.stats();

    let code = match run(cli.command, &flags) {
        Ok(code) => code,
        Err(err) if err.is_invalid_args() => {
            eprintln!("error: {}", err);
            ExitCode::from(2)
        }
        Err(err) => return Err(err.into()),
    };

    // Reads can delete expired flags too
    let after = storage.stats();
    if after.add_ops + after.update_ops + after.del_ops
        > before.add_ops + before.update_ops + before.del_ops
    {
        storage
            .save(&cli.store)
            .with_context(|| format!("failed to save {}", cli.store.display()))?;
    }

    Ok(code)
}
