//! `dbint`: integrity checks for a CMS record database.
//!
//! # Usage
//!
//! ```
//! dbint records                        # page statistics and lost records
//! dbint records --fix tt_content:42    # repair one lost record
//! dbint relations --show-deleted       # dangling record and file references
//! dbint refindex --check               # compare the reference index
//! dbint refindex                       # update it
//! dbint refs-to pages 7                # who points at pages:7
//! ```
//!
//! Settings come from `dbint.toml` (or `--config`), `DBINT_*` environment
//! variables, and the flags below, in increasing priority.

mod render;
mod settings;

use std::{
  io::{self, Write},
  path::PathBuf,
  process::ExitCode,
};

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dbint_core::{
  Integrity,
  refindex::{Cancellation, IndexBuilder, RebuildOptions, ResumePoint},
  store::IndexStore,
};
use dbint_store_sqlite::{LocalFileStore, SqliteStore};
use serde::Serialize;
use settings::{AppConfig, Overrides};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "dbint", version, about = "Integrity checks for a CMS record database")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "dbint.toml")]
  config: PathBuf,

  /// SQLite database file (overrides `database`).
  #[arg(long, value_name = "FILE")]
  database: Option<PathBuf>,

  /// Schema file (overrides `schema`).
  #[arg(long, value_name = "FILE")]
  schema: Option<PathBuf>,

  /// Directory file references are relative to (overrides `file_root`).
  #[arg(long, value_name = "DIR")]
  file_root: Option<PathBuf>,

  #[arg(long, value_enum, default_value_t = Format::Text, global = true)]
  format: Format,

  #[command(subcommand)]
  command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
  Text,
  Json,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Walk the page tree.
  Tree {
    /// Page to start from; 0 is the whole tree.
    #[arg(long, default_value_t = 0)]
    root: i64,
  },

  /// Page statistics, record counts and lost records.
  Records {
    /// Repair one lost record with the configured action, then re-check.
    #[arg(long, value_name = "TABLE:UID", value_parser = parse_record)]
    fix: Option<(String, i64)>,
  },

  /// Validate record and file references.
  Relations {
    /// Accept references to deleted rows.
    #[arg(long)]
    show_deleted: bool,
  },

  /// Compare (with --check) or update the reference index.
  Refindex {
    /// Count differences without writing.
    #[arg(long)]
    check: bool,

    /// Restrict to these tables; may be repeated.
    #[arg(long = "table", value_name = "TABLE")]
    tables: Vec<String>,

    /// Continue an interrupted run.
    #[arg(long, value_name = "TABLE:UID")]
    resume: Option<ResumePoint>,
  },

  /// List index entries pointing at one record.
  RefsTo { table: String, uid: i64 },
}

fn parse_record(s: &str) -> Result<(String, i64), String> {
  let (table, uid) = s
    .rsplit_once(':')
    .filter(|(table, _)| !table.is_empty())
    .ok_or_else(|| format!("expected TABLE:UID, got {s:?}"))?;
  let uid = uid.parse().map_err(|_| format!("uid is not an integer: {uid:?}"))?;
  Ok((table.to_owned(), uid))
}

// ─── Entry point ─────────────────────────────────────────────────────────────

fn main() -> Result<ExitCode> {
  // Logs go to stderr; stdout carries the report.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();

  let app = AppConfig::load(&cli.config, Overrides {
    database:  cli.database,
    schema:    cli.schema,
    file_root: cli.file_root,
  })?;
  let schema = settings::load_schema(&app.schema)?;
  let store = SqliteStore::open(&app.database)
    .with_context(|| format!("failed to open database at {}", app.database.display()))?;

  let check = Integrity::new(&schema, &store, &app.check)?;

  match cli.command {
    Command::Tree { root } => {
      let walk = check.build_tree(root)?;
      emit(cli.format, &walk, render::tree)?;
    }

    Command::Records { fix } => {
      let repair = fix.as_ref().map(|(table, uid)| (table.as_str(), *uid));
      let overview = check.records_overview(repair)?;
      emit(cli.format, &overview, render::records)?;
    }

    Command::Relations { show_deleted } => {
      let files = LocalFileStore::new(&app.file_root);
      let include_deleted = show_deleted || app.check.show_deleted;
      let report = check.relations_overview(&files, include_deleted)?;
      emit(cli.format, &report, render::relations)?;
    }

    Command::Refindex { check: dry_run, tables, resume } => {
      let options = RebuildOptions {
        dry_run,
        tables: (!tables.is_empty()).then_some(tables),
        resume,
      };
      let mut builder = IndexBuilder::new(&schema, &store, &store, &app.check)?;

      let summary = match builder.rebuild(&options, &Cancellation::new()) {
        Ok(summary) => summary,
        Err(err) => {
          emit(cli.format, &err.summary, render::rebuild)?;
          return Err(err.into());
        }
      };
      emit(cli.format, &summary, render::rebuild)?;

      if dry_run && !summary.is_clean() {
        return Ok(ExitCode::FAILURE);
      }
    }

    Command::RefsTo { table, uid } => {
      let entries = store
        .references_to(&table, uid)
        .with_context(|| format!("failed to look up references to {table}:{uid}"))?;
      emit(cli.format, &entries, |out, entries| render::references(out, entries))?;
    }
  }

  Ok(ExitCode::SUCCESS)
}

/// Print `value` as pretty JSON or through its text renderer.
fn emit<T: Serialize>(
  format: Format,
  value: &T,
  text: impl FnOnce(&mut dyn Write, &T) -> io::Result<()>,
) -> Result<()> {
  let mut out = io::stdout().lock();
  match format {
    Format::Json => {
      serde_json::to_writer_pretty(&mut out, value)?;
      writeln!(out)?;
    }
    Format::Text => text(&mut out, value)?,
  }
  out.flush()?;
  Ok(())
}
