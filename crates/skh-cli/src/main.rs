//! `skh`: administrative command line for the SKH registry.
//!
//! # Usage
//!
//! ```text
//! skh init
//! skh add-user --name "Budi Santoso" --registration 80010001 --admin
//! skh create --actor 1 --file draft.json
//! skh list --status archived
//! skh --config /etc/skh/skh.toml audit --limit 50
//! ```
//!
//! Drafts are JSON documents in the shape of `DocumentDraft`; `-` reads from
//! stdin. Results are printed as JSON.

mod app_config;

use std::{
  io::Read as _,
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use skh_core::{
  PageRequest, Registry, StatusFilter,
  audit::PendingWrites,
  document::{DocumentDraft, DocumentId},
  store::LedgerStore,
  user::{NewUser, Role, UserId},
};
use skh_store_sqlite::SqliteLedger;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::app_config::AppConfig;

/// Upper bound on waiting for audit writes before exiting.
const AUDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "SKH lost-property report registry")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "skh.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Create the database and its schema if missing.
  Init,

  /// Register an officer or operator.
  AddUser {
    #[arg(long)]
    name:         String,
    /// Staff registration number (NRP).
    #[arg(long)]
    registration: String,
    #[arg(long)]
    rank:         Option<String>,
    #[arg(long)]
    position:     Option<String>,
    /// Grant the super admin role.
    #[arg(long)]
    admin:        bool,
  },

  /// Issue a new numbered document.
  Create {
    #[command(flatten)]
    actor: ActorArg,
    /// JSON draft file, or `-` for stdin.
    #[arg(long)]
    file:  PathBuf,
  },

  /// Revise an existing document.
  Update {
    #[command(flatten)]
    actor: ActorArg,
    #[arg(long)]
    id:    i64,
    /// JSON draft file, or `-` for stdin.
    #[arg(long)]
    file:  PathBuf,
  },

  /// Print one document.
  Show {
    #[command(flatten)]
    actor: ActorArg,
    #[arg(long)]
    id:    i64,
  },

  /// List documents, newest first.
  List {
    /// Substring of the number or the person's name.
    #[arg(long)]
    text:   Option<String>,
    #[arg(long, value_enum, default_value_t = StatusArg::Active)]
    status: StatusArg,
  },

  /// Search documents by number or name.
  Search {
    text:  String,
    #[arg(long)]
    limit: Option<usize>,
  },

  /// One page of documents with totals.
  Page {
    #[command(flatten)]
    actor:    ActorArg,
    #[arg(long, default_value_t = 0)]
    start:    usize,
    #[arg(long)]
    length:   Option<usize>,
    #[arg(long)]
    search:   Option<String>,
    /// Only documents archiving within the next three days.
    #[arg(long)]
    expiring: bool,
    #[arg(long, value_enum, default_value_t = StatusArg::Active)]
    status:   StatusArg,
  },

  /// Soft-delete a document.
  Delete {
    #[command(flatten)]
    actor: ActorArg,
    #[arg(long)]
    id:    i64,
  },

  /// Print the most recent audit entries.
  Audit {
    #[arg(long, default_value_t = 20)]
    limit: usize,
  },
}

#[derive(Args)]
struct ActorArg {
  /// User id performing the operation.
  #[arg(long = "actor")]
  id: i64,
}

impl ActorArg {
  fn user(&self) -> UserId { UserId(self.id) }
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
  Active,
  Archived,
  All,
}

impl From<StatusArg> for StatusFilter {
  fn from(arg: StatusArg) -> Self {
    match arg {
      StatusArg::Active => Self::Active,
      StatusArg::Archived => Self::Archived,
      StatusArg::All => Self::All,
    }
  }
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let cfg = AppConfig::load(&cli.config)?;

  let store_path = cfg.store_path();
  let store = SqliteLedger::open_with_timeout(&store_path, cfg.busy_timeout())
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let pending = PendingWrites::new();
  let registry =
    Registry::new(store, cfg.numbering.clone()).with_audit_tracker(Arc::clone(&pending));

  let outcome = run(&registry, cli.command, &store_path).await;

  if tokio::time::timeout(AUDIT_DRAIN_TIMEOUT, pending.wait_idle())
    .await
    .is_err()
  {
    tracing::warn!(
      in_flight = pending.in_flight(),
      "gave up waiting for audit writes"
    );
  }

  outcome
}

async fn run(
  registry: &Registry<SqliteLedger>,
  command: Command,
  store_path: &Path,
) -> anyhow::Result<()> {
  match command {
    Command::Init => {
      tracing::info!("store ready at {}", store_path.display());
      print_json(&serde_json::json!({ "store_path": store_path }))
    }

    Command::AddUser { name, registration, rank, position, admin } => {
      let user = registry
        .store()
        .add_user(NewUser {
          full_name: name,
          registration_number: registration,
          rank,
          position,
          role: if admin { Role::SuperAdmin } else { Role::Operator },
        })
        .await
        .context("failed to add user")?;
      print_json(&user)
    }

    Command::Create { actor, file } => {
      let draft = read_draft(&file)?;
      let record = registry
        .create(actor.user(), draft)
        .await
        .context("failed to create document")?;
      print_json(&record)
    }

    Command::Update { actor, id, file } => {
      let draft = read_draft(&file)?;
      let record = registry
        .update(actor.user(), DocumentId(id), draft)
        .await
        .with_context(|| format!("failed to update document {id}"))?;
      print_json(&record)
    }

    Command::Show { actor, id } => {
      let record = registry
        .get(DocumentId(id), actor.user())
        .await
        .with_context(|| format!("failed to read document {id}"))?;
      print_json(&record)
    }

    Command::List { text, status } => {
      let records = registry
        .list(text.as_deref(), status.into())
        .await
        .context("failed to list documents")?;
      print_json(&records)
    }

    Command::Search { text, limit } => {
      let records = registry
        .search(&text, limit)
        .await
        .context("search failed")?;
      print_json(&records)
    }

    Command::Page { actor, start, length, search, expiring, status } => {
      let request = PageRequest { start, length, search, expiring_only: expiring };
      let page = registry
        .page(request, status.into(), actor.user())
        .await
        .context("failed to page documents")?;
      print_json(&page)
    }

    Command::Delete { actor, id } => {
      registry
        .delete(actor.user(), DocumentId(id))
        .await
        .with_context(|| format!("failed to delete document {id}"))?;
      print_json(&serde_json::json!({ "deleted": id }))
    }

    Command::Audit { limit } => {
      let entries = registry
        .audit_trail(limit)
        .await
        .context("failed to read audit trail")?;
      print_json(&entries)
    }
  }
}

fn read_draft(path: &Path) -> anyhow::Result<DocumentDraft> {
  let raw = if path == Path::new("-") {
    let mut buf = String::new();
    std::io::stdin()
      .read_to_string(&mut buf)
      .context("failed to read draft from stdin")?;
    buf
  } else {
    std::fs::read_to_string(path)
      .with_context(|| format!("failed to read draft {}", path.display()))?
  };
  serde_json::from_str(&raw).context("draft is not a valid document")
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
