//! Immutable per-invocation check configuration.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// What `fix_lost_record` does with a lost record.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
  /// Reassign the record to the root container (pid 0).
  #[default]
  MoveToRoot,
  /// Flag the record deleted (or remove it if its table has no delete flag).
  Delete,
}

/// Settings threaded explicitly through every engine operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
  /// Upper bound on rows, pids or uids handed to a collaborator per call.
  pub batch_size:   usize,
  pub repair:       RepairAction,
  /// Treat references to deleted rows as valid in the relations overview.
  pub show_deleted: bool,
}

impl Default for CheckConfig {
  fn default() -> Self {
    Self {
      batch_size:   500,
      repair:       RepairAction::default(),
      show_deleted: false,
    }
  }
}

impl CheckConfig {
  pub fn validate(&self) -> Result<()> {
    if self.batch_size == 0 {
      return Err(Error::Config("batch_size must be at least 1".into()));
    }
    Ok(())
  }
}
