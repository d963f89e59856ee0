//! DropMind CLI - capture and find things from the terminal.
//!
//! # Usage
//!
//! ```bash
//! dropmind capture "buy more coffee"
//! dropmind capture https://example.com/article --wait
//! dropmind capture --file ./scan.pdf "tax return 2024" --clipboard taxes
//! dropmind capture --lat 48.8584 --lon 2.2945 "first date"
//! dropmind search coffee
//! dropmind search invoice --clipboard taxes --json
//! dropmind clipboard create taxes
//! dropmind item pin 42
//! ```

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use dropmind::config::{default_config_path, Config};
use dropmind::{
    BrowseOrder, Clipboard, ClipboardId, DropMind, DropMindApi, EnrichmentOutcome, Item, ItemId,
    ItemPayload, RawAttachment, RawPayload, Scope,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Capture notes, links, files and places; search them later.
#[derive(Parser)]
#[command(name = "dropmind", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory, overriding the config file
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Store a note, link, file or location
    Capture {
        /// Text: a note, a URL, a caption for --file, or a label for --lat/--lon
        text: Option<String>,

        /// Attach a file by path
        #[arg(long, conflicts_with_all = ["lat", "lon"])]
        file: Option<PathBuf>,

        /// MIME type of --file (guessed from the extension otherwise)
        #[arg(long, requires = "file")]
        mime: Option<String>,

        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,

        /// Target clipboard, by name or id (default clipboard otherwise)
        #[arg(short, long)]
        clipboard: Option<String>,

        /// Wait for the link card (or place name) before exiting
        #[arg(short, long)]
        wait: bool,
    },
    /// Ranked search, everywhere or within one clipboard
    Search {
        query: String,

        #[arg(short, long)]
        clipboard: Option<String>,

        /// Maximum number of results
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// List a clipboard's items
    Browse {
        /// Clipboard name or id (default clipboard otherwise)
        clipboard: Option<String>,

        /// recent, oldest or activity
        #[arg(long, default_value = "recent")]
        order: BrowseOrder,
    },
    /// Inspect or change one item
    Item {
        #[command(subcommand)]
        action: ItemAction,
    },
    /// Manage clipboards
    Clipboard {
        #[command(subcommand)]
        action: ClipboardAction,
    },
    /// Rebuild the search index from the database
    Reindex,
}

#[derive(Subcommand)]
enum ItemAction {
    Show { id: ItemId },
    Pin { id: ItemId },
    Unpin { id: ItemId },
    /// Move to another clipboard
    Move { id: ItemId, clipboard: String },
    /// Replace a note's text, a file's caption or a place's label
    Edit { id: ItemId, text: String },
    #[command(alias = "rm")]
    Delete { id: ItemId },
    /// Fetch the link card (or place name) again and wait for the result
    Retry { id: ItemId },
}

#[derive(Subcommand)]
enum ClipboardAction {
    #[command(alias = "ls")]
    List,
    Create { name: String },
    Rename { clipboard: String, name: String },
    /// Delete a clipboard and everything in it
    #[command(alias = "rm")]
    Delete { clipboard: String },
    Favorite { clipboard: String },
    Unfavorite { clipboard: String },
    /// Make this the clipboard captures land in by default
    Default { clipboard: String },
}

const WAIT_TIMEOUT: Duration = Duration::from_secs(120);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "info" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli)?;
    let store = DropMind::open(config).context("failed to open store")?;

    match cli.command {
        Command::Capture { text, file, mime, lat, lon, clipboard, wait } => {
            let payload = build_payload(text, file, mime, lat, lon)?;
            let clipboard_id = clipboard.map(|c| resolve_clipboard(&store, &c)).transpose()?;

            let mut events = store.subscribe_enrichment();
            let item = store.capture(payload, clipboard_id)?;
            let enriching = store.enrichment_record(item.id)?.is_some();

            if wait && enriching {
                await_enrichment(&mut events, item.id).await?;
                print_item(&store.get_item(item.id)?, cli.json)?;
            } else {
                print_item(&item, cli.json)?;
            }
        }
        Command::Search { query, clipboard, limit } => {
            let scope = match clipboard {
                Some(c) => Scope::Clipboard(resolve_clipboard(&store, &c)?),
                None => Scope::Global,
            };
            let results: Vec<Item> = store.search(&query, scope)?.into_iter().take(limit).collect();
            print_items(&results, cli.json)?;
        }
        Command::Browse { clipboard, order } => {
            let clipboard_id = match clipboard {
                Some(c) => resolve_clipboard(&store, &c)?,
                None => default_clipboard(&store)?.id,
            };
            print_items(&store.browse_ordered(clipboard_id, order)?, cli.json)?;
        }
        Command::Item { action } => run_item_action(&store, action, cli.json).await?,
        Command::Clipboard { action } => run_clipboard_action(&store, action, cli.json)?,
        Command::Reindex => {
            let count = store.rebuild_index()?;
            println!("Indexed {count} items");
        }
    }

    store.shutdown();
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let path = cli.config.clone().or_else(default_config_path);
    let mut config = match path {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    Ok(config)
}

fn build_payload(
    text: Option<String>,
    file: Option<PathBuf>,
    mime: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
) -> Result<RawPayload> {
    let mut payload = match (file, lat.zip(lon)) {
        (Some(path), _) => {
            let path = path
                .canonicalize()
                .with_context(|| format!("cannot read {}", path.display()))?;
            let metadata = std::fs::metadata(&path)?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            RawPayload::attachment(RawAttachment {
                storage_ref: path.to_string_lossy().into_owned(),
                filename,
                mime_type: mime,
                size_bytes: metadata.len(),
            })
        }
        (None, Some((lat, lon))) => RawPayload::location(lat, lon, None),
        (None, None) => RawPayload::default(),
    };
    if let Some(text) = text {
        payload = payload.with_text(text);
    }
    Ok(payload)
}

/// Accept a clipboard id or a (case-insensitive) name
fn resolve_clipboard(store: &DropMind, reference: &str) -> Result<ClipboardId> {
    let clipboards = store.list_clipboards()?;
    let reference = reference.trim();
    if let Some(clipboard) = clipboards.iter().find(|c| c.name.eq_ignore_ascii_case(reference)) {
        return Ok(clipboard.id);
    }
    if let Ok(id) = reference.parse::<ClipboardId>() {
        if clipboards.iter().any(|c| c.id == id) {
            return Ok(id);
        }
    }
    bail!("no clipboard named {reference:?}")
}

fn default_clipboard(store: &DropMind) -> Result<Clipboard> {
    store
        .list_clipboards()?
        .into_iter()
        .find(|c| c.is_default)
        .ok_or_else(|| anyhow!("store has no default clipboard"))
}

async fn await_enrichment(
    events: &mut tokio::sync::broadcast::Receiver<dropmind::EnrichmentEvent>,
    item_id: ItemId,
) -> Result<()> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if event.item_id == item_id => return Ok(event.outcome),
                Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => return Err(anyhow!(e)),
            }
        }
    };
    match tokio::time::timeout(WAIT_TIMEOUT, wait).await {
        Ok(Ok(EnrichmentOutcome::Abandoned { failure, attempts })) => {
            eprintln!("Enrichment gave up after {attempts} attempt(s): {failure}");
            Ok(())
        }
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_) => {
            eprintln!("Still enriching; it will resume next time the store opens");
            Ok(())
        }
    }
}

async fn run_item_action(store: &DropMind, action: ItemAction, json: bool) -> Result<()> {
    match action {
        ItemAction::Show { id } => {
            let item = store.get_item(id)?;
            print_item(&item, json)?;
            if !json {
                if let Some(record) = store.enrichment_record(id)? {
                    let failure = record.last_failure.map(|f| format!(" ({f})")).unwrap_or_default();
                    println!(
                        "  enrichment: {} {} after {} attempt(s){}",
                        record.task.as_str(),
                        record.status.as_str(),
                        record.attempts,
                        failure
                    );
                }
            }
        }
        ItemAction::Pin { id } => print_item(&store.set_pinned(id, true)?, json)?,
        ItemAction::Unpin { id } => print_item(&store.set_pinned(id, false)?, json)?,
        ItemAction::Move { id, clipboard } => {
            let target = resolve_clipboard(store, &clipboard)?;
            print_item(&store.move_item(id, target)?, json)?;
        }
        ItemAction::Edit { id, text } => print_item(&store.edit_text(id, &text)?, json)?,
        ItemAction::Delete { id } => {
            store.delete_item(id)?;
            println!("Deleted item {id}");
        }
        ItemAction::Retry { id } => {
            let mut events = store.subscribe_enrichment();
            store.retry_enrichment(id)?;
            await_enrichment(&mut events, id).await?;
            print_item(&store.get_item(id)?, json)?;
        }
    }
    Ok(())
}

fn run_clipboard_action(store: &DropMind, action: ClipboardAction, json: bool) -> Result<()> {
    let clipboard = match action {
        ClipboardAction::List => {
            let clipboards = store.list_clipboards()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&clipboards)?);
            } else {
                for clipboard in &clipboards {
                    println!("{}", format_clipboard(clipboard));
                }
            }
            return Ok(());
        }
        ClipboardAction::Delete { clipboard } => {
            let id = resolve_clipboard(store, &clipboard)?;
            store.delete_clipboard(id)?;
            println!("Deleted clipboard {clipboard}");
            return Ok(());
        }
        ClipboardAction::Create { name } => store.create_clipboard(&name)?,
        ClipboardAction::Rename { clipboard, name } => {
            store.rename_clipboard(resolve_clipboard(store, &clipboard)?, &name)?
        }
        ClipboardAction::Favorite { clipboard } => store.set_favorite(resolve_clipboard(store, &clipboard)?, true)?,
        ClipboardAction::Unfavorite { clipboard } => {
            store.set_favorite(resolve_clipboard(store, &clipboard)?, false)?
        }
        ClipboardAction::Default { clipboard } => store.set_default(resolve_clipboard(store, &clipboard)?)?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&clipboard)?);
    } else {
        println!("{}", format_clipboard(&clipboard));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn format_clipboard(clipboard: &Clipboard) -> String {
    let mut flags = String::new();
    if clipboard.is_default {
        flags.push_str(" (default)");
    }
    if clipboard.is_favorite {
        flags.push_str(" ★");
    }
    format!("{:>4}  {}{}", clipboard.id, clipboard.name, flags)
}

fn summarize(item: &Item) -> String {
    let text = match &item.payload {
        ItemPayload::Note { text } => text.clone(),
        ItemPayload::Link { url, card } => match card.as_ref().and_then(|c| c.title.as_deref()) {
            Some(title) => format!("{title} <{url}>"),
            None => url.clone(),
        },
        ItemPayload::File(a) | ItemPayload::Image(a) => match &a.caption {
            Some(caption) => format!("{} - {caption}", a.filename),
            None => a.filename.clone(),
        },
        ItemPayload::Location { lat, lon, label } => match label {
            Some(label) => format!("{label} ({lat:.5}, {lon:.5})"),
            None => format!("({lat:.5}, {lon:.5})"),
        },
    };
    let first_line = text.lines().next().unwrap_or_default();
    let mut summary: String = first_line.chars().take(100).collect();
    if summary.len() < text.len() {
        summary.push('…');
    }
    summary
}

fn format_item(item: &Item) -> String {
    let pin = if item.pinned { "📌 " } else { "" };
    format!(
        "{:>6}  {:<8} {}{}  [{}]",
        item.id,
        item.kind().as_str(),
        pin,
        summarize(item),
        item.created_at.format("%Y-%m-%d %H:%M")
    )
}

fn print_item(item: &Item, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(item)?);
    } else {
        println!("{}", format_item(item));
    }
    Ok(())
}

fn print_items(items: &[Item], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(items)?);
    } else if items.is_empty() {
        println!("No items");
    } else {
        for item in items {
            println!("{}", format_item(item));
        }
    }
    Ok(())
}
