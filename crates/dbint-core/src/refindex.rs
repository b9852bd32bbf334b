//! Reference index rebuild.
//!
//! The index is derived data: for every source record the expected entries
//! are recomputed with [`extract_references`] and compared by hash with the
//! persisted ones. A dry run only counts the difference; a commit replaces
//! each record's entries in one atomic [`IndexStore::reconcile`] call.
//!
//! Consistency is per source record, not per run. A rebuild that stops
//! early (cancellation or storage failure) leaves every record reconciled
//! so far intact, and reports where to resume.

use std::{
  collections::{BTreeMap, BTreeSet},
  fmt,
  str::FromStr,
  sync::atomic::{AtomicBool, Ordering},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  CheckConfig, Error, Result,
  extract::extract_references,
  reference::IndexEntry,
  schema::{SchemaProvider, TableSchema},
  store::{IndexStore, RecordStore},
};

// ─── Options and results ─────────────────────────────────────────────────────

/// Where a rebuild stopped: continue with rows of `table` after `after_uid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
  pub table:     String,
  pub after_uid: i64,
}

impl fmt::Display for ResumePoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.table, self.after_uid)
  }
}

impl FromStr for ResumePoint {
  type Err = Error;

  /// Parse the `table:uid` form printed by [`fmt::Display`].
  fn from_str(s: &str) -> Result<Self> {
    let (table, uid) = s
      .rsplit_once(':')
      .filter(|(table, _)| !table.is_empty())
      .ok_or_else(|| Error::Config(format!("resume point must be TABLE:UID, got {s:?}")))?;
    let after_uid = uid
      .parse()
      .map_err(|_| Error::Config(format!("resume point uid is not an integer: {uid:?}")))?;
    Ok(Self { table: table.to_owned(), after_uid })
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildOptions {
  /// Count differences without writing.
  pub dry_run: bool,
  /// Restrict the rebuild to these tables. `None` rebuilds every checked
  /// table and purges entries of tables the schema no longer declares.
  pub tables:  Option<Vec<String>>,
  pub resume:  Option<ResumePoint>,
}

/// Counters of one rebuild run.
///
/// `entries_checked` counts persisted entries read, and always equals
/// `entries_kept + entries_removed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildSummary {
  pub dry_run:         bool,
  pub records_checked: u64,
  pub entries_checked: u64,
  pub entries_added:   u64,
  pub entries_removed: u64,
  pub entries_kept:    u64,
  pub anomalies:       u64,
  /// False when the run stopped early; the counters are then partial and
  /// the run must be resumed or repeated.
  pub completed:       bool,
  pub resume:          Option<ResumePoint>,
}

impl RebuildSummary {
  pub fn is_clean(&self) -> bool {
    self.completed && self.entries_added == 0 && self.entries_removed == 0
  }
}

/// A rebuild aborted by a collaborator failure.
#[derive(Debug, Error)]
#[error(
  "reference index rebuild stopped{}: {source}",
  .resume.as_ref().map(|r| format!(" at {r}")).unwrap_or_default()
)]
pub struct RebuildError {
  /// Work done before the failure. Reconciled records stay reconciled.
  pub summary: RebuildSummary,
  pub resume:  Option<ResumePoint>,
  #[source]
  pub source:  Error,
}

/// Cooperative cancellation, observed between batches.
#[derive(Debug, Default)]
pub struct Cancellation(AtomicBool);

impl Cancellation {
  pub fn new() -> Self { Self::default() }

  pub fn cancel(&self) { self.0.store(true, Ordering::Relaxed); }

  pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::Relaxed) }
}

/// Where a rebuild currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildPhase {
  #[default]
  Idle,
  Scanning,
  Diffing,
  Reconciling,
  Reporting,
  Done,
}

// ─── Diff ────────────────────────────────────────────────────────────────────

/// Difference between the expected and persisted entries of one source.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct IndexDiff {
  pub add:     Vec<IndexEntry>,
  pub remove:  Vec<String>,
  pub kept:    usize,
  pub checked: usize,
}

impl IndexDiff {
  pub fn is_empty(&self) -> bool { self.add.is_empty() && self.remove.is_empty() }
}

/// Match persisted entries against expected ones by hash. A hash persisted
/// twice keeps one copy. A persisted entry with an unrecognised usage is
/// removed and, if still expected, written again.
pub fn diff_entries(expected: Vec<IndexEntry>, persisted: &[IndexEntry]) -> IndexDiff {
  let mut pending: BTreeMap<String, IndexEntry> =
    expected.into_iter().map(|e| (e.hash.clone(), e)).collect();

  let mut diff = IndexDiff { checked: persisted.len(), ..IndexDiff::default() };
  let mut matched = BTreeSet::new();

  for entry in persisted {
    if entry.usage.is_none() {
      tracing::warn!(
        hash = %entry.hash,
        table = %entry.source_table,
        uid = entry.source_uid,
        "index entry with unknown usage; replacing"
      );
      diff.remove.push(entry.hash.clone());
      continue;
    }
    // Removal is by hash, so a duplicate of a kept hash must count as kept.
    if pending.remove(&entry.hash).is_some() || matched.contains(entry.hash.as_str()) {
      matched.insert(entry.hash.as_str());
      diff.kept += 1;
    } else {
      diff.remove.push(entry.hash.clone());
    }
  }
  diff.add = pending.into_values().collect();
  diff
}

// ─── Builder ─────────────────────────────────────────────────────────────────

/// Rebuilds the reference index from the record tables.
pub struct IndexBuilder<'a, S, R, I> {
  schema:  &'a S,
  records: &'a R,
  index:   &'a I,
  config:  &'a CheckConfig,
  phase:   RebuildPhase,
}

impl<'a, S, R, I> IndexBuilder<'a, S, R, I>
where
  S: SchemaProvider,
  R: RecordStore,
  I: IndexStore,
{
  pub fn new(
    schema: &'a S,
    records: &'a R,
    index: &'a I,
    config: &'a CheckConfig,
  ) -> Result<Self> {
    config.validate()?;
    Ok(Self { schema, records, index, config, phase: RebuildPhase::Idle })
  }

  pub fn phase(&self) -> RebuildPhase { self.phase }

  /// Reconcile the index with the record tables.
  pub fn rebuild(
    &mut self,
    options: &RebuildOptions,
    cancel: &Cancellation,
  ) -> Result<RebuildSummary, RebuildError> {
    let mut summary = RebuildSummary { dry_run: options.dry_run, ..RebuildSummary::default() };
    self.phase = RebuildPhase::Scanning;

    let tables = match self.scope(options) {
      Ok(tables) => tables,
      Err(source) => {
        self.phase = RebuildPhase::Done;
        return Err(RebuildError { summary, resume: options.resume.clone(), source });
      }
    };

    tracing::info!(
      dry_run = options.dry_run,
      tables = tables.len(),
      resume = ?options.resume.as_ref().map(ToString::to_string),
      "reference index rebuild started"
    );

    for table in tables {
      let start = match &options.resume {
        Some(resume) if resume.table == table.name => resume.after_uid,
        _ => i64::MIN,
      };

      if let Some(point) = self.scan_table(table, start, options.dry_run, cancel, &mut summary)? {
        self.phase = RebuildPhase::Done;
        tracing::info!(resume = %point, "reference index rebuild cancelled");
        summary.resume = Some(point);
        return Ok(summary);
      }

      if let Err(source) = self.purge_vanished_sources(table, options.dry_run, &mut summary) {
        // Rows are done; resuming here only repeats the purge.
        let resume = ResumePoint { table: table.name.clone(), after_uid: i64::MAX };
        return Err(self.fail(summary, Some(resume), source));
      }
    }

    if options.tables.is_none() {
      if let Err(source) = self.purge_unknown_tables(options.dry_run, &mut summary) {
        return Err(self.fail(summary, None, source));
      }
    }

    self.phase = RebuildPhase::Done;
    summary.completed = true;
    tracing::info!(
      dry_run = summary.dry_run,
      records = summary.records_checked,
      checked = summary.entries_checked,
      added = summary.entries_added,
      removed = summary.entries_removed,
      kept = summary.entries_kept,
      anomalies = summary.anomalies,
      "reference index rebuild finished"
    );
    Ok(summary)
  }

  /// Tables to scan, sorted by name, skipping those before a resume point.
  fn scope(&self, options: &RebuildOptions) -> Result<Vec<&'a TableSchema>> {
    let mut tables = match &options.tables {
      None => self.schema.checked_tables(),
      Some(names) => names
        .iter()
        .map(|name| {
          self
            .schema
            .table(name)
            .ok_or_else(|| Error::UnknownTable(name.clone()))
        })
        .collect::<Result<Vec<_>>>()?,
    };
    tables.sort_by(|a, b| a.name.cmp(&b.name));
    tables.dedup_by(|a, b| a.name == b.name);

    if let Some(resume) = &options.resume {
      if !tables.iter().any(|t| t.name == resume.table) {
        return Err(Error::UnknownTable(resume.table.clone()));
      }
      tables.retain(|t| t.name >= resume.table);
    }
    Ok(tables)
  }

  /// Scan one table in batches. Returns the resume point when cancelled.
  fn scan_table(
    &mut self,
    table: &TableSchema,
    start: i64,
    dry_run: bool,
    cancel: &Cancellation,
    summary: &mut RebuildSummary,
  ) -> Result<Option<ResumePoint>, RebuildError> {
    let mut after = start;
    let resume_at = |after_uid| ResumePoint { table: table.name.clone(), after_uid };

    loop {
      if cancel.is_cancelled() {
        return Ok(Some(resume_at(after)));
      }

      self.phase = RebuildPhase::Scanning;
      let rows = match self.records.rows_after(table, after, self.config.batch_size) {
        Ok(rows) => rows,
        Err(e) => {
          let summary = std::mem::take(summary);
          return Err(self.fail(summary, Some(resume_at(after)), Error::storage(e)));
        }
      };
      if rows.is_empty() {
        return Ok(None);
      }

      for row in &rows {
        let expected = if row.deleted {
          vec![]
        } else {
          let extraction = extract_references(table, row);
          summary.anomalies += extraction.anomalies.len() as u64;
          extraction.entries.iter().map(|e| e.to_index_entry()).collect()
        };

        if let Err(source) = self.reconcile_source(&table.name, row.uid, expected, dry_run, summary) {
          let summary = std::mem::take(summary);
          return Err(self.fail(summary, Some(resume_at(after)), source));
        }
        summary.records_checked += 1;
        after = row.uid;
      }

      tracing::debug!(table = %table.name, after_uid = after, rows = rows.len(), "index batch done");
    }
  }

  /// Bring the persisted entries of one source in line with `expected`.
  fn reconcile_source(
    &mut self,
    table: &str,
    uid: i64,
    expected: Vec<IndexEntry>,
    dry_run: bool,
    summary: &mut RebuildSummary,
  ) -> Result<()> {
    self.phase = RebuildPhase::Diffing;
    let persisted = self.index.entries_for(table, uid).map_err(Error::storage)?;
    let diff = diff_entries(expected, &persisted);

    if !diff.is_empty() {
      if dry_run {
        self.phase = RebuildPhase::Reporting;
      } else {
        self.phase = RebuildPhase::Reconciling;
        self
          .index
          .reconcile(table, uid, &diff.remove, &diff.add)
          .map_err(Error::storage)?;
      }
      tracing::trace!(
        table,
        uid,
        add = diff.add.len(),
        remove = diff.remove.len(),
        dry_run,
        "index entries differ"
      );
    }

    summary.entries_checked += diff.checked as u64;
    summary.entries_kept += diff.kept as u64;
    summary.entries_removed += diff.remove.len() as u64;
    summary.entries_added += diff.add.len() as u64;
    Ok(())
  }

  /// Empty the entries of indexed sources whose record no longer exists.
  fn purge_vanished_sources(
    &mut self,
    table: &TableSchema,
    dry_run: bool,
    summary: &mut RebuildSummary,
  ) -> Result<()> {
    let indexed = self.index.source_uids(&table.name).map_err(Error::storage)?;

    for chunk in indexed.chunks(self.config.batch_size) {
      let existing = self
        .records
        .existing_uids(table, chunk, true)
        .map_err(Error::storage)?;
      for uid in chunk.iter().filter(|uid| !existing.contains(uid)) {
        tracing::debug!(table = %table.name, uid, "index source record vanished");
        self.reconcile_source(&table.name, *uid, vec![], dry_run, summary)?;
      }
    }
    Ok(())
  }

  /// Empty the entries of source tables the schema does not declare.
  fn purge_unknown_tables(&mut self, dry_run: bool, summary: &mut RebuildSummary) -> Result<()> {
    for table in self.index.source_tables().map_err(Error::storage)? {
      if self.schema.table(&table).is_some() {
        continue;
      }
      tracing::warn!(table = %table, "index holds entries of an undeclared table");
      for uid in self.index.source_uids(&table).map_err(Error::storage)? {
        self.reconcile_source(&table, uid, vec![], dry_run, summary)?;
      }
    }
    Ok(())
  }

  fn fail(
    &mut self,
    summary: RebuildSummary,
    resume: Option<ResumePoint>,
    source: Error,
  ) -> RebuildError {
    self.phase = RebuildPhase::Done;
    tracing::error!(error = %source, resume = ?resume.as_ref().map(ToString::to_string), "reference index rebuild failed");
    RebuildError { summary, resume, source }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    reference::{ReferenceEntry, Target},
    schema::RelationKind,
    testing::{MemoryStore, page, rec, schema},
  };

  fn seeded() -> MemoryStore {
    let store = MemoryStore::default();
    store.insert("pages", page(1, 0).set("media", "a.mp4"));
    store.insert("pages", page(2, 0));
    store.insert("tt_content", rec(10, 1).set("records", "pages_1,pages_2,tt_content_11"));
    store.insert("tt_content", rec(11, 1).set("page_ref", "2").set("image", "x.jpg,y.jpg"));
    store.insert("tt_content", rec(12, 1).set("records", "pages_1").deleted());
    store
  }

  fn rebuild(store: &MemoryStore, options: &RebuildOptions) -> RebuildSummary {
    let schema = schema();
    let config = CheckConfig { batch_size: 2, ..CheckConfig::default() };
    let mut builder = IndexBuilder::new(&schema, store, store, &config).unwrap();
    let summary = builder.rebuild(options, &Cancellation::new()).unwrap();
    assert_eq!(builder.phase(), RebuildPhase::Done);
    summary
  }

  fn commit() -> RebuildOptions { RebuildOptions::default() }

  fn dry_run() -> RebuildOptions { RebuildOptions { dry_run: true, ..RebuildOptions::default() } }

  #[test]
  fn first_commit_adds_everything() {
    let store = seeded();
    let summary = rebuild(&store, &commit());

    assert!(summary.completed);
    assert_eq!(summary.records_checked, 5);
    assert_eq!(summary.entries_added, 7);
    assert_eq!(summary.entries_checked, 0);
    assert_eq!(store.index_len(), 7);
  }

  #[test]
  fn second_commit_changes_nothing() {
    let store = seeded();
    rebuild(&store, &commit());
    let writes = store.writes();

    let again = rebuild(&store, &commit());
    assert!(again.is_clean());
    assert_eq!(again.entries_checked, 7);
    assert_eq!(again.entries_kept, 7);
    assert_eq!(store.writes(), writes);
  }

  #[test]
  fn dry_run_counts_without_writing() {
    let store = seeded();
    let summary = rebuild(&store, &dry_run());
    assert_eq!(summary.entries_added, 7);
    assert_eq!(store.index_len(), 0);
    assert_eq!(store.writes(), 0);
  }

  #[test]
  fn changed_field_replaces_only_stale_entries() {
    let store = seeded();
    rebuild(&store, &commit());

    store.update("tt_content", 10, "records", "pages_1,tt_content_11");
    let summary = rebuild(&store, &commit());

    // pages_2 at position 1 and tt_content_11 at position 2 go; tt_content_11
    // at position 1 arrives.
    assert_eq!(summary.entries_removed, 2);
    assert_eq!(summary.entries_added, 1);
    assert_eq!(summary.entries_kept + summary.entries_removed, summary.entries_checked);
    assert_eq!(store.index_len(), 6);
  }

  #[test]
  fn vanished_and_undeclared_sources_are_purged() {
    let store = seeded();
    rebuild(&store, &commit());

    store.remove("tt_content", 11);
    store.put_index(
      ReferenceEntry {
        source_table: "tx_removed".into(),
        source_uid: 1,
        source_field: "f".into(),
        kind: RelationKind::Select,
        position: 0,
        target: Target::Record { table: "pages".into(), uid: 1 },
      }
      .to_index_entry(),
    );

    let summary = rebuild(&store, &commit());
    assert_eq!(summary.entries_removed, 4);
    assert_eq!(summary.entries_added, 0);
    assert_eq!(store.index_len(), 4);
    assert!(store.index_entries().iter().all(|e| e.source_uid != 11));
  }

  #[test]
  fn scoped_rebuild_leaves_other_tables_alone() {
    let store = seeded();
    let options = RebuildOptions { tables: Some(vec!["pages".into()]), ..commit() };
    let summary = rebuild(&store, &options);

    assert_eq!(summary.records_checked, 2);
    assert_eq!(summary.entries_added, 1);
    assert!(store.index_entries().iter().all(|e| e.source_table == "pages"));
  }

  #[test]
  fn unknown_scope_table_is_an_error() {
    let store = seeded();
    let schema = schema();
    let config = CheckConfig::default();
    let mut builder = IndexBuilder::new(&schema, &store, &store, &config).unwrap();
    let options = RebuildOptions { tables: Some(vec!["nope".into()]), ..commit() };
    let err = builder.rebuild(&options, &Cancellation::new()).unwrap_err();
    assert!(matches!(err.source, Error::UnknownTable(_)));
    assert_eq!(store.writes(), 0);
  }

  #[test]
  fn cancelled_run_resumes_where_it_stopped() {
    let store = seeded();
    let schema = schema();
    let config = CheckConfig { batch_size: 1, ..CheckConfig::default() };

    let cancel = Cancellation::new();
    cancel.cancel();
    let mut builder = IndexBuilder::new(&schema, &store, &store, &config).unwrap();
    let stopped = builder.rebuild(&commit(), &cancel).unwrap();
    assert!(!stopped.completed);
    assert!(!stopped.is_clean());
    let resume = stopped.resume.clone().unwrap();
    assert_eq!(resume.table, "pages");

    let options = RebuildOptions { resume: Some(resume), ..commit() };
    let resumed = builder.rebuild(&options, &Cancellation::new()).unwrap();
    assert!(resumed.completed);
    assert_eq!(resumed.entries_added, 7);
  }

  #[test]
  fn storage_failure_keeps_committed_records() {
    let store = seeded();
    store.fail_after_writes(1);

    let schema = schema();
    let config = CheckConfig { batch_size: 1, ..CheckConfig::default() };
    let mut builder = IndexBuilder::new(&schema, &store, &store, &config).unwrap();
    let err = builder.rebuild(&commit(), &Cancellation::new()).unwrap_err();

    assert!(err.source.is_storage());
    assert!(!err.summary.completed);
    // Both pages were handled; only page 1 needed a write.
    assert_eq!(err.summary.records_checked, 2);
    assert_eq!(store.index_len(), 1);
    let resume = err.resume.clone().unwrap();
    assert_eq!(resume, ResumePoint { table: "tt_content".into(), after_uid: i64::MIN });

    store.fail_after_writes(usize::MAX);
    let options = RebuildOptions { resume: Some(resume), ..commit() };
    let resumed = builder.rebuild(&options, &Cancellation::new()).unwrap();
    assert!(resumed.completed);
    assert_eq!(store.index_len(), 7);
  }

  #[test]
  fn resume_point_round_trips_through_text() {
    let point: ResumePoint = "tt_content:-9223372036854775808".parse().unwrap();
    assert_eq!(point, ResumePoint { table: "tt_content".into(), after_uid: i64::MIN });
    assert_eq!(point.to_string().parse::<ResumePoint>().unwrap(), point);
    assert!("tt_content".parse::<ResumePoint>().is_err());
    assert!(":5".parse::<ResumePoint>().is_err());
    assert!("pages:x".parse::<ResumePoint>().is_err());
  }

  #[test]
  fn duplicate_persisted_hash_keeps_one_copy() {
    let entry = ReferenceEntry {
      source_table: "tt_content".into(),
      source_uid: 1,
      source_field: "page_ref".into(),
      kind: RelationKind::Select,
      position: 0,
      target: Target::Record { table: "pages".into(), uid: 1 },
    }
    .to_index_entry();

    let diff = diff_entries(vec![entry.clone()], &[entry.clone(), entry]);
    assert!(diff.add.is_empty());
    assert!(diff.remove.is_empty());
    assert_eq!(diff.kept, 2);
    assert_eq!(diff.checked, 2);
  }

  #[test]
  fn entry_with_unknown_usage_is_rewritten() {
    let entry = ReferenceEntry {
      source_table: "tt_content".into(),
      source_uid: 1,
      source_field: "page_ref".into(),
      kind: RelationKind::Select,
      position: 0,
      target: Target::Record { table: "pages".into(), uid: 1 },
    }
    .to_index_entry();
    let corrupt = IndexEntry { usage: None, ..entry.clone() };

    let diff = diff_entries(vec![entry.clone()], std::slice::from_ref(&corrupt));
    assert_eq!(diff.remove, [entry.hash.clone()]);
    assert_eq!(diff.add, [entry]);
    assert_eq!(diff.kept, 0);

    let unexpected = diff_entries(vec![], &[corrupt]);
    assert_eq!(unexpected.remove.len(), 1);
    assert!(unexpected.add.is_empty());
  }
}
