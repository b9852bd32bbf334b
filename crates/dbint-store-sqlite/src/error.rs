//! Error type for `dbint-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// A table or column name from the schema that is not a plain identifier.
  #[error("invalid identifier: {0:?}")]
  InvalidIdentifier(String),

  /// A file path that is absolute or climbs out of the file root.
  #[error("invalid file path: {0:?}")]
  InvalidPath(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
