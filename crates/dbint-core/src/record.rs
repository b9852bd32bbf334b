//! Records and pages as the engine sees them.
//!
//! Every record lives in a container page identified by its `pid`. Pages are
//! records of the [`PAGES`] table and form a tree rooted at [`ROOT`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Name of the table holding the page tree.
pub const PAGES: &str = "pages";

/// Column of the page table holding the page type.
pub const DOKTYPE: &str = "doktype";

/// The virtual root container.
pub const ROOT: i64 = 0;

/// "No container" marker used by records that never live in the tree.
pub const NO_CONTAINER: i64 = -1;

/// `pid` values that are always valid and never make a record lost.
pub fn is_sentinel_pid(pid: i64) -> bool { pid == ROOT || pid == NO_CONTAINER }

// ─── Records ─────────────────────────────────────────────────────────────────

/// A record identified by `(table, uid)`, with the columns integrity reports
/// need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
  pub table:   String,
  pub uid:     i64,
  pub pid:     i64,
  pub deleted: bool,
  pub hidden:  bool,
  /// Value of the table's label column.
  pub title:   String,
}

/// One row of the page table as returned to the tree walker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRow {
  pub uid:     i64,
  pub pid:     i64,
  pub title:   String,
  pub doktype: i64,
  pub hidden:  bool,
  pub deleted: bool,
}

/// A record with the raw values of its relation fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordRow {
  pub uid:     i64,
  pub pid:     i64,
  pub deleted: bool,
  /// Raw column text keyed by field name. `None` is SQL NULL.
  pub values:  BTreeMap<String, Option<String>>,
}

impl RecordRow {
  /// The trimmed value of `field`, or `None` when it is NULL or blank.
  pub fn value(&self, field: &str) -> Option<&str> {
    self
      .values
      .get(field)?
      .as_deref()
      .map(str::trim)
      .filter(|v| !v.is_empty())
  }
}

/// Row counts of one table for a single container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidCount {
  pub pid:         i64,
  pub all:         u64,
  pub non_deleted: u64,
}
