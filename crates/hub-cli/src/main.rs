//! hub: Manage the personal hub lists from a terminal.
//!
//! Runs the same sync engine as the web app in local-first mode, against a JSON
//! file in the data directory.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use hub_cli::{CliConfig, FileStore, TerminalPresenter, build_engine};
use hub_sync::{Item, ItemDraft, ListKind, RemoteWrite, SyncEngine};

#[derive(Parser, Debug)]
#[command(name = "hub")]
#[command(about = "Personal hub lists: anime, projects, vault, bookmarks")]
struct Args {
    /// Directory holding local_storage.json
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print one list, or every list
    Show { list: Option<ListKind> },
    /// Add an item
    Add {
        list: ListKind,
        name: String,
        /// Bookmark URL
        #[arg(long)]
        url: Option<String>,
    },
    /// Rename an item (or change a bookmark's URL)
    Rename {
        list: ListKind,
        old: String,
        new: String,
        #[arg(long)]
        url: Option<String>,
    },
    /// Remove an item
    Remove { list: ListKind, name: String },
    /// Remove every item of a list
    Clear { list: ListKind },
    /// Move an anime between watching and completed
    Toggle { list: ListKind, name: String },
    /// Move an item to another item's position
    Move {
        list: ListKind,
        dragged: String,
        target: String,
    },
    /// Export every list as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Merge an exported JSON file into the current lists
    Import { file: PathBuf },
    /// Delete every list and the vault password
    Wipe,
    /// Forget the vault password and delete the vault lists
    VaultReset,
}

fn find(engine: &SyncEngine, list: ListKind, name: &str) -> Result<Item> {
    engine
        .items(list)
        .into_iter()
        .find(|i| i.name == name)
        .ok_or_else(|| anyhow!("No item {:?} in {}", name, list))
}

async fn finish(list: ListKind, write: RemoteWrite) {
    let outcome = write.await;
    debug!("Remote outcome for {}: {:?}", list, outcome);
}

async fn run(engine: &SyncEngine, command: Command) -> Result<()> {
    match command {
        Command::Show { list: Some(list) } => engine.render_list(list),
        Command::Show { list: None } => engine.render_all(),
        Command::Add { list, name, url } => {
            let draft = ItemDraft {
                url,
                ..ItemDraft::named(name)
            };
            finish(list, engine.add(list, draft)?).await;
        }
        Command::Rename {
            list,
            old,
            new,
            url,
        } => {
            let existing = find(engine, list, &old)?;
            let draft = ItemDraft {
                url: url.or_else(|| existing.url.clone()),
                ..ItemDraft::named(new)
            };
            finish(list, engine.update(list, &existing, draft)?).await;
        }
        Command::Remove { list, name } => {
            let existing = find(engine, list, &name)?;
            finish(list, engine.delete(list, &existing)?).await;
        }
        Command::Clear { list } => finish(list, engine.clear(list)?).await,
        Command::Toggle { list, name } => {
            let existing = find(engine, list, &name)?;
            finish(list, engine.toggle_status(list, &existing)?).await;
        }
        Command::Move {
            list,
            dragged,
            target,
        } => {
            let dragged = find(engine, list, &dragged)?;
            let target = find(engine, list, &target)?;
            let outcome = engine.reorder(list, &dragged, &target)?;
            debug!("Reorder {}: {:?}", list, outcome);
        }
        Command::Export { out: Some(path) } => {
            fs::write(&path, engine.export()?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Exported to {}", path.display());
        }
        Command::Export { out: None } => println!("{}", engine.export()?),
        Command::Import { file } => {
            let payload = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let report = engine.import(&payload).await?;
            info!("Imported {} items, skipped {}", report.added, report.skipped);
        }
        Command::Wipe => {
            let write = engine.wipe_everything()?;
            write.await;
        }
        Command::VaultReset => engine.vault_reset()?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,hub_sync=debug"
    } else {
        "info,hub_sync=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = CliConfig::resolve(args.data_dir)?;
    debug!("Data directory: {}", config.data_dir.display());

    let store = Arc::new(FileStore::open(&config.data_dir)?);
    let engine = build_engine(store, Arc::new(TerminalPresenter::stdout()));
    let session = engine.startup(true);
    debug!("Session: {}", session.label());

    run(&engine, args.command).await
}
