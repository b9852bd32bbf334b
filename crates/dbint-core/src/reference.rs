//! References extracted from relation fields and their persisted index form.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::schema::RelationKind;

/// `ref_table` value of index rows that point at a file.
pub const FILE_TABLE: &str = "_FILE";

// ─── Extracted references ────────────────────────────────────────────────────

/// What a reference points at.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Target {
  Record { table: String, uid: i64 },
  File { path: String },
}

/// The record and field a reference originates from.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SourceRef {
  pub table: String,
  pub uid:   i64,
  pub field: String,
}

/// One outgoing reference of one record field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEntry {
  pub source_table: String,
  pub source_uid:   i64,
  pub source_field: String,
  pub kind:         RelationKind,
  /// Zero-based position within a multi-valued field.
  pub position:     u32,
  pub target:       Target,
}

impl ReferenceEntry {
  pub fn source(&self) -> SourceRef {
    SourceRef {
      table: self.source_table.clone(),
      uid:   self.source_uid,
      field: self.source_field.clone(),
    }
  }

  pub fn to_index_entry(&self) -> IndexEntry {
    let (ref_table, ref_uid, ref_string) = match &self.target {
      Target::Record { table, uid } => (table.clone(), *uid, String::new()),
      Target::File { path } => (FILE_TABLE.to_owned(), 0, path.clone()),
    };
    IndexEntry::new(
      &self.source_table,
      self.source_uid,
      &self.source_field,
      self.position,
      ref_table,
      ref_uid,
      ref_string,
      self.kind,
    )
  }
}

// ─── Anomalies ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
  /// The field's relation descriptor itself is unusable.
  MalformedDescriptor,
  /// An empty item between or after delimiters.
  EmptyItem,
  /// An item whose uid or table part cannot be parsed.
  InvalidItem,
  /// A bare uid in a field that allows several tables.
  AmbiguousTable,
  /// An item naming a table the field does not allow.
  DisallowedTable,
  /// Several values in a single-valued field.
  MultipleValues,
  /// A file name that would escape its upload folder.
  InvalidPath,
}

/// A data-shape problem found while extracting references. Logged and
/// reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaAnomaly {
  pub table:  String,
  pub uid:    i64,
  pub field:  String,
  pub kind:   AnomalyKind,
  pub detail: String,
}

// ─── Persisted index ─────────────────────────────────────────────────────────

/// A row of the persisted reference index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
  /// Hex SHA-256 over all other fields; unique per row.
  pub hash:         String,
  pub source_table: String,
  pub source_uid:   i64,
  pub source_field: String,
  pub sorting:      u32,
  pub ref_table:    String,
  pub ref_uid:      i64,
  pub ref_string:   String,
  /// `None` for a stored row whose usage is not recognised. Such rows are
  /// always stale.
  pub usage:        Option<RelationKind>,
}

impl IndexEntry {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    source_table: &str,
    source_uid: i64,
    source_field: &str,
    sorting: u32,
    ref_table: String,
    ref_uid: i64,
    ref_string: String,
    usage: RelationKind,
  ) -> Self {
    let mut hasher = Sha256::new();
    for part in [
      source_table,
      &source_uid.to_string(),
      source_field,
      &sorting.to_string(),
      &ref_table,
      &ref_uid.to_string(),
      &ref_string,
      usage.as_str(),
    ] {
      hasher.update(part.as_bytes());
      hasher.update([0u8]);
    }

    Self {
      hash: hex::encode(hasher.finalize()),
      source_table: source_table.to_owned(),
      source_uid,
      source_field: source_field.to_owned(),
      sorting,
      ref_table,
      ref_uid,
      ref_string,
      usage: Some(usage),
    }
  }

  /// Usage as stored in the index; empty when unrecognised.
  pub fn usage_str(&self) -> &'static str {
    self.usage.map_or("", RelationKind::as_str)
  }

  pub fn target(&self) -> Target {
    if self.ref_table == FILE_TABLE {
      Target::File { path: self.ref_string.clone() }
    } else {
      Target::Record { table: self.ref_table.clone(), uid: self.ref_uid }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(position: u32, target: Target) -> ReferenceEntry {
    ReferenceEntry {
      source_table: "tt_content".into(),
      source_uid: 5,
      source_field: "records".into(),
      kind: RelationKind::Group,
      position,
      target,
    }
  }

  #[test]
  fn hash_is_stable_and_position_sensitive() {
    let page = Target::Record { table: "pages".into(), uid: 3 };
    let a = entry(0, page.clone()).to_index_entry();
    let b = entry(0, page.clone()).to_index_entry();
    let c = entry(1, page).to_index_entry();

    assert_eq!(a.hash, b.hash);
    assert_ne!(a.hash, c.hash);
    assert_eq!(a.hash.len(), 64);
  }

  #[test]
  fn field_boundaries_do_not_collide() {
    let a = IndexEntry::new(
      "ab", 1, "c", 0, "t".into(), 1, String::new(), RelationKind::Select,
    );
    let b = IndexEntry::new(
      "a", 1, "bc", 0, "t".into(), 1, String::new(), RelationKind::Select,
    );
    assert_ne!(a.hash, b.hash);
  }

  #[test]
  fn file_targets_use_file_table() {
    let path = "uploads/pics/a.jpg".to_string();
    let idx = entry(0, Target::File { path: path.clone() }).to_index_entry();
    assert_eq!(idx.ref_table, FILE_TABLE);
    assert_eq!(idx.ref_uid, 0);
    assert_eq!(idx.target(), Target::File { path });
  }
}
