//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use tokio::task::JoinHandle;
use tracing::info;
use url::Url;

use retrace_history::{HistoryHandle, HistoryService};
use retrace_shared::{
    AppConfig, SearchQuery, TransitionKind, VisitsRemoved, init_config, load_config,
};
use retrace_storage::VisitStore;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// retrace - a local browsing-history store.
#[derive(Parser)]
#[command(
    name = "retrace",
    version,
    about = "Record, search, and prune a local browsing-history database.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Override the history database path from the config file.
    #[arg(long, global = true)]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Record a visit to a url.
    Add {
        /// The visited url.
        url: String,

        /// Page title to store with the visit.
        #[arg(short, long)]
        title: Option<String>,

        /// How the navigation started: link, typed, reload, ...
        #[arg(long)]
        transition: Option<String>,
    },

    /// Search history, newest first.
    Search {
        /// Substring matched against url or title.
        text: Option<String>,

        /// Maximum number of results (default 100).
        #[arg(long)]
        max_results: Option<u32>,

        /// Lower time bound, RFC 3339 (default: 24 hours ago).
        #[arg(long)]
        from: Option<String>,

        /// Upper time bound, RFC 3339 (default: none).
        #[arg(long)]
        to: Option<String>,

        /// Emit results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List every recorded visit for a url, oldest first.
    Visits {
        /// The url to look up.
        url: String,

        /// Emit results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Update the stored title for a url.
    SetTitle {
        /// The url to retitle.
        url: String,

        /// The new title.
        title: String,
    },

    /// Delete a url and all of its visits.
    Delete {
        /// The url to delete.
        url: String,
    },

    /// Delete every url whose entire visit history lies inside a window.
    DeleteRange {
        /// Window start, RFC 3339.
        #[arg(long)]
        from: String,

        /// Window end, RFC 3339.
        #[arg(long)]
        to: String,
    },

    /// Delete the entire history.
    Clear,

    /// Print one fixed-size page of the recency feed (link visits).
    Chunk {
        /// Zero-based chunk index.
        #[arg(long, default_value_t = 0)]
        offset: u32,

        /// Emit results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "retrace=info",
        1 => "retrace=debug",
        _ => "retrace=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Add {
            url,
            title,
            transition,
        } => cmd_add(cli.db.as_deref(), &url, title, transition.as_deref()).await,
        Command::Search {
            text,
            max_results,
            from,
            to,
            json,
        } => cmd_search(cli.db.as_deref(), text, max_results, from.as_deref(), to.as_deref(), json).await,
        Command::Visits { url, json } => cmd_visits(cli.db.as_deref(), &url, json).await,
        Command::SetTitle { url, title } => cmd_set_title(cli.db.as_deref(), &url, &title).await,
        Command::Delete { url } => cmd_delete(cli.db.as_deref(), &url).await,
        Command::DeleteRange { from, to } => {
            cmd_delete_range(cli.db.as_deref(), &from, &to).await
        }
        Command::Clear => cmd_clear(cli.db.as_deref()).await,
        Command::Chunk { offset, json } => cmd_chunk(cli.db.as_deref(), offset, json).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Open the store at the configured (or overridden) path and spawn the
/// service behind its bridge.
async fn open_history(db_override: Option<&str>) -> Result<(HistoryHandle, JoinHandle<()>)> {
    let config = load_config()?;
    let db_path = match db_override {
        Some(path) => PathBuf::from(path),
        None => config.storage.resolved_db_path()?,
    };

    let store = VisitStore::open(&db_path).await?;
    Ok(retrace_history::spawn(HistoryService::new(store)))
}

fn parse_time(label: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| eyre!("invalid {label} timestamp '{value}': {e} (expected RFC 3339)"))
}

fn print_removed(event: &VisitsRemoved) {
    for url in &event.urls {
        println!("  removed: {url}");
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_add(
    db: Option<&str>,
    url: &str,
    title: Option<String>,
    transition: Option<&str>,
) -> Result<()> {
    // Reject garbage before it lands in the store.
    Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;

    let transition = transition
        .map(|t| t.parse::<TransitionKind>())
        .transpose()?;

    let (history, _worker) = open_history(db).await?;

    info!(url, "recording visit");
    history.add_url(url, title, transition).await?;

    println!("  recorded: {url}");
    Ok(())
}

async fn cmd_search(
    db: Option<&str>,
    text: Option<String>,
    max_results: Option<u32>,
    from: Option<&str>,
    to: Option<&str>,
    json: bool,
) -> Result<()> {
    let query = SearchQuery {
        text,
        max_results,
        start_time: from.map(|v| parse_time("--from", v)).transpose()?,
        end_time: to.map(|v| parse_time("--to", v)).transpose()?,
    };

    let (history, _worker) = open_history(db).await?;
    let results = history.search(query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("  no history in the selected window");
        return Ok(());
    }
    for page in &results {
        println!(
            "  {}  {:>4}x  {}  {}",
            page.last_visit_time.format("%Y-%m-%d %H:%M:%S"),
            page.visit_count,
            page.url,
            page.title
        );
    }
    Ok(())
}

async fn cmd_visits(db: Option<&str>, url: &str, json: bool) -> Result<()> {
    let (history, _worker) = open_history(db).await?;
    let visits = history.visits_for_url(url).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&visits)?);
        return Ok(());
    }

    if visits.is_empty() {
        println!("  no visits recorded for {url}");
        return Ok(());
    }
    for visit in &visits {
        println!(
            "  {}  {}  visit #{}",
            visit.visit_time.format("%Y-%m-%d %H:%M:%S"),
            visit.transition,
            visit.visit_id
        );
    }
    Ok(())
}

async fn cmd_set_title(db: Option<&str>, url: &str, title: &str) -> Result<()> {
    let (history, _worker) = open_history(db).await?;
    history.set_title_for_url(url, title).await?;
    println!("  title set for {url}");
    Ok(())
}

async fn cmd_delete(db: Option<&str>, url: &str) -> Result<()> {
    let (history, _worker) = open_history(db).await?;
    let mut events = history.subscribe();

    history.delete_url(url).await?;

    if let Ok(event) = events.try_recv() {
        print_removed(&event);
    }
    Ok(())
}

async fn cmd_delete_range(db: Option<&str>, from: &str, to: &str) -> Result<()> {
    let start = parse_time("--from", from)?;
    let end = parse_time("--to", to)?;

    let (history, _worker) = open_history(db).await?;
    let mut events = history.subscribe();

    history.delete_range(start, end).await?;

    match events.try_recv() {
        Ok(event) if event.urls.is_empty() => println!("  nothing to delete in that window"),
        Ok(event) => print_removed(&event),
        Err(_) => {}
    }
    Ok(())
}

async fn cmd_clear(db: Option<&str>) -> Result<()> {
    let (history, _worker) = open_history(db).await?;
    let mut events = history.subscribe();

    history.delete_all().await?;

    match events.try_recv() {
        Ok(event) => {
            print_removed(&event);
            println!("  cleared {} url(s)", event.urls.len());
        }
        Err(_) => println!("  history cleared"),
    }
    Ok(())
}

async fn cmd_chunk(db: Option<&str>, offset: u32, json: bool) -> Result<()> {
    let (history, _worker) = open_history(db).await?;
    let results = history.chunk(offset).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("  no link visits in chunk {offset}");
        return Ok(());
    }
    for page in &results {
        println!(
            "  {}  {}  {}",
            page.last_visit_time.format("%Y-%m-%d %H:%M:%S"),
            page.url,
            page.title
        );
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
