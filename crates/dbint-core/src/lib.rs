//! Core types, collaborator traits and the integrity engine for `dbint`.
//!
//! This crate has no database or filesystem dependencies.
//! Storage backends (e.g. `dbint-store-sqlite`) implement the traits in
//! [`store`]; the engine in [`check`] and [`refindex`] only talks to those
//! traits and to a [`schema::SchemaProvider`].

pub mod check;
pub mod config;
pub mod error;
pub mod extract;
pub mod orphan;
pub mod record;
pub mod reference;
pub mod refindex;
pub mod schema;
pub mod store;
pub mod tree;
pub mod validate;

#[cfg(test)]
mod testing;

pub use check::Integrity;
pub use config::{CheckConfig, RepairAction};
pub use error::{Error, Result};
