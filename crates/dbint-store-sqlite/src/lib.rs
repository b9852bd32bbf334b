//! SQLite backend for `dbint`.
//!
//! [`SqliteStore`] reads and repairs the record tables and persists the
//! reference index in `sys_refindex`. [`LocalFileStore`] answers file
//! existence questions against a directory on disk.

mod encode;
mod files;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use files::LocalFileStore;
pub use store::SqliteStore;
