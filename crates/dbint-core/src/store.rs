//! Collaborator traits implemented by storage backends.
//!
//! The engine depends on these abstractions only. Every call may block; the
//! engine is synchronous and single-threaded. Each trait carries its own
//! error type, which the engine wraps as [`crate::Error::Storage`].

use std::collections::BTreeSet;

use crate::{
  record::{PageRow, PidCount, RecordRef, RecordRow},
  reference::IndexEntry,
  schema::TableSchema,
};

// ─── Records ─────────────────────────────────────────────────────────────────

/// Access to the record tables.
///
/// Methods receive the [`TableSchema`] so backends know the label, delete
/// and hidden columns without a schema lookup of their own.
pub trait RecordStore {
  type Error: std::error::Error + Send + Sync + 'static;

  /// All pages whose `pid` is `pid`, deleted and hidden ones included,
  /// ordered by uid.
  fn child_pages(
    &self,
    pages: &TableSchema,
    pid: i64,
  ) -> Result<Vec<PageRow>, Self::Error>;

  /// Row counts grouped by `pid`.
  fn pid_counts(&self, table: &TableSchema) -> Result<Vec<PidCount>, Self::Error>;

  /// All rows whose `pid` is one of `pids`, deleted ones included.
  fn records_by_pids(
    &self,
    table: &TableSchema,
    pids: &[i64],
  ) -> Result<Vec<RecordRef>, Self::Error>;

  fn record(
    &self,
    table: &TableSchema,
    uid: i64,
  ) -> Result<Option<RecordRef>, Self::Error>;

  /// Up to `limit` rows with `uid > after_uid`, ordered by uid, carrying the
  /// raw values of the table's relation fields.
  fn rows_after(
    &self,
    table: &TableSchema,
    after_uid: i64,
    limit: usize,
  ) -> Result<Vec<RecordRow>, Self::Error>;

  /// The subset of `uids` that exist in `table`. Deleted rows count as
  /// existing only when `include_deleted` is set.
  fn existing_uids(
    &self,
    table: &TableSchema,
    uids: &[i64],
    include_deleted: bool,
  ) -> Result<BTreeSet<i64>, Self::Error>;

  /// Set the `pid` of one record. Returns whether a row changed.
  fn move_record(
    &self,
    table: &TableSchema,
    uid: i64,
    pid: i64,
  ) -> Result<bool, Self::Error>;

  /// Flag one record deleted, or remove it when the table has no delete
  /// column. Returns whether a row changed.
  fn delete_record(&self, table: &TableSchema, uid: i64) -> Result<bool, Self::Error>;
}

// ─── Files ───────────────────────────────────────────────────────────────────

/// Access to the storage holding referenced files.
pub trait FileStore {
  type Error: std::error::Error + Send + Sync + 'static;

  fn exists(&self, path: &str) -> Result<bool, Self::Error>;

  /// Paths (`folder/name`) of the regular files directly inside `folder`,
  /// sorted. A missing folder lists as empty.
  fn list(&self, folder: &str) -> Result<Vec<String>, Self::Error>;
}

// ─── Reference index ─────────────────────────────────────────────────────────

/// The persisted reference index.
pub trait IndexStore {
  type Error: std::error::Error + Send + Sync + 'static;

  /// All persisted entries whose source is `(table, uid)`.
  fn entries_for(&self, table: &str, uid: i64) -> Result<Vec<IndexEntry>, Self::Error>;

  /// Distinct source uids of `table` present in the index, sorted.
  fn source_uids(&self, table: &str) -> Result<Vec<i64>, Self::Error>;

  /// Distinct source tables present in the index, sorted.
  fn source_tables(&self) -> Result<Vec<String>, Self::Error>;

  /// Atomically delete the entries with hashes in `remove` and insert `add`,
  /// all belonging to source `(table, uid)`.
  fn reconcile(
    &self,
    table: &str,
    uid: i64,
    remove: &[String],
    add: &[IndexEntry],
  ) -> Result<(), Self::Error>;

  /// Reverse lookup: all entries pointing at `(ref_table, ref_uid)`.
  fn references_to(
    &self,
    ref_table: &str,
    ref_uid: i64,
  ) -> Result<Vec<IndexEntry>, Self::Error>;
}
