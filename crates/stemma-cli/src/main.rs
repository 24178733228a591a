//! `stemma` — command-line front end for the genealogy store.
//!
//! Opens the SQLite store named by the configuration (or by
//! `STEMMA_STORE_PATH`) and exposes tree management, GEDCOM import, the
//! change-review queue, record editing, search and export as subcommands.

mod commands;

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use stemma_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── Arguments ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "stemma", version, about = "Genealogy record store and GEDCOM pipeline")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "stemma.toml")]
  config: PathBuf,

  /// Actor name recorded on proposals and resolutions.
  #[arg(long, global = true)]
  user: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Create, list and delete trees.
  #[command(subcommand)]
  Tree(TreeCommand),
  /// Import a GEDCOM file into a tree.
  Import {
    /// File to import.
    file:     PathBuf,
    /// Tree to import into.
    #[arg(long)]
    tree:     String,
    /// Character set to assume when the file carries no byte order mark.
    #[arg(long)]
    encoding: Option<String>,
    /// Abort on the first malformed record instead of skipping it.
    #[arg(long)]
    strict:   bool,
  },
  /// Process staged chunks left behind by an interrupted import.
  Resume {
    #[arg(long)]
    tree: String,
  },
  /// List the unresolved changes of a tree.
  Changes {
    #[arg(long)]
    tree: String,
    /// Print the changes as JSON instead of a table.
    #[arg(long)]
    json: bool,
  },
  /// Accept a pending change.
  Accept { change_id: i64 },
  /// Reject a pending change.
  Reject { change_id: i64 },
  /// Print one record's stored text.
  Show {
    #[arg(long)]
    tree: String,
    xref: String,
    /// Print the record as JSON instead of raw GEDCOM.
    #[arg(long)]
    json: bool,
  },
  /// Propose a new record from a payload file (or stdin).
  Add {
    #[arg(long)]
    tree: String,
    /// Record kind: individual, family, source or media.
    #[arg(long)]
    kind: String,
    /// File holding the record text; stdin when omitted.
    #[arg(long)]
    file: Option<PathBuf>,
  },
  /// Propose replacement text for a record from a payload file (or stdin).
  Edit {
    #[arg(long)]
    tree: String,
    xref: String,
    #[arg(long)]
    file: Option<PathBuf>,
  },
  /// Propose deleting a record.
  Remove {
    #[arg(long)]
    tree: String,
    xref: String,
  },
  /// Write the whole tree out as a GEDCOM file.
  Export {
    #[arg(long)]
    tree:   String,
    /// Destination path; stdout when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Find records by name, event year or place.
  Search {
    #[arg(long)]
    tree:  String,
    #[arg(long)]
    name:  Option<String>,
    #[arg(long)]
    year:  Option<i32>,
    #[arg(long)]
    place: Option<String>,
  },
  /// Print a tree's audit log.
  Log {
    #[arg(long)]
    tree: String,
  },
}

#[derive(Subcommand)]
enum TreeCommand {
  /// Create a new tree.
  Create {
    name:        String,
    /// Commit changes immediately instead of queueing them for review.
    #[arg(long)]
    auto_accept: bool,
    /// Source name written into exported file headers.
    #[arg(long)]
    source_name: Option<String>,
  },
  /// List all trees.
  List,
  /// Delete a tree and everything in it.
  Delete { name: String },
}

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime configuration, deserialised from `stemma.toml`. Every field has a
/// default so the binary runs with no file present at all.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct CliConfig {
  /// SQLite database path.
  store_path:  PathBuf,
  /// Actor name used when `--user` is not given.
  user:        String,
  /// Target staged-chunk size for imports, in bytes.
  chunk_size:  usize,
  /// Whether new trees commit changes immediately instead of queueing them.
  auto_accept: bool,
}

impl Default for CliConfig {
  fn default() -> Self {
    CliConfig {
      store_path:  PathBuf::from("stemma.db"),
      user:        "stemma".to_string(),
      chunk_size:  stemma_import::ImportOptions::default().chunk_size,
      auto_accept: false,
    }
  }
}

// ─── Entrypoint ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config.clone()).required(false))
    .add_source(config::Environment::with_prefix("STEMMA"))
    .build()
    .context("failed to read config file")?;
  let cfg: CliConfig = settings
    .try_deserialize()
    .context("failed to deserialise CliConfig")?;

  let store_path = expand_tilde(&cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let user = cli.user.unwrap_or_else(|| cfg.user.clone());

  match cli.command {
    Command::Tree(tree_command) => match tree_command {
      TreeCommand::Create { name, auto_accept, source_name } => {
        let auto_accept = auto_accept || cfg.auto_accept;
        commands::tree_create(&store, &name, auto_accept, source_name).await
      }
      TreeCommand::List => commands::tree_list(&store).await,
      TreeCommand::Delete { name } => commands::tree_delete(&store, &name).await,
    },
    Command::Import { file, tree, encoding, strict } => {
      commands::import(&store, cfg.chunk_size, &file, &tree, encoding, strict, user).await
    }
    Command::Resume { tree } => commands::resume(&store, &tree, user).await,
    Command::Changes { tree, json } => commands::changes(&store, &tree, json).await,
    Command::Accept { change_id } => commands::accept(&store, change_id, user).await,
    Command::Reject { change_id } => commands::reject(&store, change_id, user).await,
    Command::Show { tree, xref, json } => {
      commands::show(&store, &tree, &xref, json).await
    }
    Command::Add { tree, kind, file } => {
      commands::add(&store, &tree, &kind, file.as_deref(), user).await
    }
    Command::Edit { tree, xref, file } => {
      commands::edit(&store, &tree, &xref, file.as_deref(), user).await
    }
    Command::Remove { tree, xref } => commands::remove(&store, &tree, &xref, user).await,
    Command::Export { tree, output } => {
      commands::export(&store, &tree, output.as_deref()).await
    }
    Command::Search { tree, name, year, place } => {
      commands::search(&store, &tree, name, year, place).await
    }
    Command::Log { tree } => commands::log(&store, &tree).await,
  }
}

/// Expands a leading `~/` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  if let Some(s) = path.to_str()
    && let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
