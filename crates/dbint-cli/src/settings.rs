//! Configuration loading: `dbint.toml`, `DBINT_*` environment variables and
//! command-line overrides, merged with the `config` crate.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use dbint_core::{CheckConfig, schema::StaticSchema};
use serde::Deserialize;

/// Everything the binary needs to run a check.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// SQLite database holding the record tables and `sys_refindex`.
  pub database:  PathBuf,
  /// TOML file declaring tables, relation fields and page types.
  pub schema:    PathBuf,
  /// Directory that file references are relative to.
  #[serde(default = "default_file_root")]
  pub file_root: PathBuf,
  #[serde(default)]
  pub check:     CheckConfig,
}

fn default_file_root() -> PathBuf { PathBuf::from(".") }

/// Values given on the command line; they win over file and environment.
#[derive(Debug, Default)]
pub struct Overrides {
  pub database:  Option<PathBuf>,
  pub schema:    Option<PathBuf>,
  pub file_root: Option<PathBuf>,
}

impl AppConfig {
  /// Load `path` (optional), then `DBINT_*` variables, then `overrides`.
  ///
  /// Nested keys use a double underscore: `DBINT_CHECK__BATCH_SIZE=100`.
  pub fn load(path: &Path, overrides: Overrides) -> Result<Self> {
    let as_text = |p: Option<PathBuf>| p.map(|p| p.to_string_lossy().into_owned());

    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("DBINT")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .set_override_option("database", as_text(overrides.database))?
      .set_override_option("schema", as_text(overrides.schema))?
      .set_override_option("file_root", as_text(overrides.file_root))?
      .build()
      .with_context(|| format!("failed to read config file {}", path.display()))?;

    let app: AppConfig = settings
      .try_deserialize()
      .context("failed to deserialise AppConfig")?;
    app.check.validate().context("invalid [check] section")?;
    Ok(app)
  }
}

/// Read the schema file.
pub fn load_schema(path: &Path) -> Result<StaticSchema> {
  let raw = std::fs::read_to_string(path)
    .with_context(|| format!("reading schema file {}", path.display()))?;
  toml::from_str(&raw).with_context(|| format!("parsing schema file {}", path.display()))
}

#[cfg(test)]
mod tests {
  use dbint_core::{RepairAction, schema::SchemaProvider};

  use super::*;

  #[test]
  fn file_values_and_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dbint.toml");
    std::fs::write(
      &path,
      r#"
database = "site.db"
schema = "schema.toml"

[check]
batch_size = 50
repair = "delete"
"#,
    )
    .unwrap();

    let app = AppConfig::load(&path, Overrides::default()).unwrap();
    assert_eq!(app.database, PathBuf::from("site.db"));
    assert_eq!(app.file_root, PathBuf::from("."));
    assert_eq!(app.check.batch_size, 50);
    assert_eq!(app.check.repair, RepairAction::Delete);
    assert!(!app.check.show_deleted);

    let overrides = Overrides { database: Some("other.db".into()), ..Overrides::default() };
    let app = AppConfig::load(&path, overrides).unwrap();
    assert_eq!(app.database, PathBuf::from("other.db"));
  }

  #[test]
  fn zero_batch_size_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dbint.toml");
    std::fs::write(
      &path,
      "database = \"a.db\"\nschema = \"s.toml\"\n[check]\nbatch_size = 0\n",
    )
    .unwrap();
    assert!(AppConfig::load(&path, Overrides::default()).is_err());
  }

  #[test]
  fn schema_file_names_tables_by_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schema.toml");
    std::fs::write(
      &path,
      r#"
[[doktypes]]
value = 1
label = "Standard"

[tables.pages]
title = "Page"

[tables.tt_content]
label = "header"

[[tables.tt_content.relations]]
field = "records"
kind = "group"
allowed = ["pages", "tt_content"]

[[tables.tt_content.relations]]
field = "image"
kind = "file"
upload_folder = "uploads/pics"
"#,
    )
    .unwrap();

    let schema = load_schema(&path).unwrap();
    let content = schema.table("tt_content").unwrap();
    assert_eq!(content.name, "tt_content");
    assert_eq!(content.title, "tt_content");
    assert_eq!(content.relations.len(), 2);
    assert_eq!(schema.table("pages").unwrap().title, "Page");
    assert_eq!(schema.doktypes()[0].label, "Standard");
  }
}
