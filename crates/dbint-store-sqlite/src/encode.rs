//! Helpers between schema metadata, domain types and SQL text.
//!
//! Table and column names come from the schema file, not from code, so every
//! one goes through [`quote_ident`] before it is spliced into a statement.

use dbint_core::{reference::IndexEntry, schema::RelationKind};

use crate::{Error, Result};

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Quote a table or column name, rejecting anything but `[A-Za-z_][A-Za-z0-9_]*`.
pub fn quote_ident(name: &str) -> Result<String> {
  let mut chars = name.chars();
  let valid = chars
    .next()
    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

  if valid {
    Ok(format!("\"{name}\""))
  } else {
    Err(Error::InvalidIdentifier(name.to_owned()))
  }
}

/// A boolean expression over an optional flag column; constant false when
/// the table has no such column.
pub fn flag_expr(column: Option<&str>) -> Result<String> {
  match column {
    Some(c) => Ok(format!("(COALESCE({}, 0) != 0)", quote_ident(c)?)),
    None => Ok("0".to_owned()),
  }
}

/// A column read as text; NULL becomes the empty string.
pub fn text_expr(column: &str) -> Result<String> {
  Ok(format!("COALESCE(CAST({} AS TEXT), '')", quote_ident(column)?))
}

/// `?, ?, …` with `n` placeholders.
pub fn placeholders(n: usize) -> String { vec!["?"; n].join(", ") }

// ─── Raw rows ────────────────────────────────────────────────────────────────

/// A `sys_refindex` row as read from SQLite, before usage decoding.
pub struct RawIndexEntry {
  pub hash:       String,
  pub tablename:  String,
  pub recuid:     i64,
  pub field:      String,
  pub sorting:    u32,
  pub ref_table:  String,
  pub ref_uid:    i64,
  pub ref_string: String,
  pub ref_usage:  String,
}

/// Column list matching [`RawIndexEntry::from_row`].
pub const INDEX_COLUMNS: &str =
  "hash, tablename, recuid, field, sorting, ref_table, ref_uid, ref_string, ref_usage";

impl RawIndexEntry {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      hash:       row.get(0)?,
      tablename:  row.get(1)?,
      recuid:     row.get(2)?,
      field:      row.get(3)?,
      sorting:    row.get(4)?,
      ref_table:  row.get(5)?,
      ref_uid:    row.get(6)?,
      ref_string: row.get(7)?,
      ref_usage:  row.get(8)?,
    })
  }

  /// The stored hash is kept as is, so rows written by an older hash scheme
  /// are found stale and replaced. An unrecognised usage decodes to `None`
  /// and the row is replaced the same way.
  pub fn decode(self) -> IndexEntry {
    let usage = RelationKind::parse(&self.ref_usage);
    if usage.is_none() {
      tracing::warn!(hash = %self.hash, usage = %self.ref_usage, "unknown usage in index row");
    }
    IndexEntry {
      hash:         self.hash,
      source_table: self.tablename,
      source_uid:   self.recuid,
      source_field: self.field,
      sorting:      self.sorting,
      ref_table:    self.ref_table,
      ref_uid:      self.ref_uid,
      ref_string:   self.ref_string,
      usage,
    }
  }
}
