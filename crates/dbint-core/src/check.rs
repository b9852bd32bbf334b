//! [`Integrity`]: the entry point bundling schema, record storage and
//! configuration for one check invocation.
//!
//! Operations live next to the component they belong to: the tree walk in
//! [`crate::tree`], lost records in [`crate::orphan`], reference validation
//! in [`crate::validate`].

use crate::{
  CheckConfig, Error, Result,
  schema::{SchemaProvider, TableSchema},
  store::RecordStore,
};

/// Read-mostly integrity checker over one record store.
///
/// Holds no state between calls: every operation reads fresh from the
/// collaborators, and repairs require the caller to re-run the read path.
pub struct Integrity<'a, S, R> {
  pub(crate) schema:  &'a S,
  pub(crate) records: &'a R,
  pub(crate) config:  &'a CheckConfig,
}

impl<'a, S, R> Integrity<'a, S, R>
where
  S: SchemaProvider,
  R: RecordStore,
{
  pub fn new(schema: &'a S, records: &'a R, config: &'a CheckConfig) -> Result<Self> {
    config.validate()?;
    Ok(Self { schema, records, config })
  }

  pub fn config(&self) -> &CheckConfig { self.config }

  pub(crate) fn table(&self, name: &str) -> Result<&'a TableSchema> {
    self
      .schema
      .table(name)
      .ok_or_else(|| Error::UnknownTable(name.to_owned()))
  }
}
