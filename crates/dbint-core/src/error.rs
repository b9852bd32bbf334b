//! Error types for `dbint-core`.
//!
//! Only collaborator failures and misuse are errors. Data-shape problems
//! (malformed relation values, pid cycles, dangling references) are reported
//! as data and never abort a check.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A storage collaborator (records, files, index) failed to respond.
  #[error("storage unavailable: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("table not declared in schema: {0}")]
  UnknownTable(String),

  #[error("invalid configuration: {0}")]
  Config(String),
}

impl Error {
  /// Wrap a collaborator error. Used as `.map_err(Error::storage)`.
  pub fn storage<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Storage(Box::new(err))
  }

  pub fn is_storage(&self) -> bool { matches!(self, Self::Storage(_)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
