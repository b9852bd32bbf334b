//! Relation validation: do referenced rows and files exist?

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
  Error, Integrity, Result,
  extract::{Extraction, extract_references},
  reference::{ReferenceEntry, SchemaAnomaly, SourceRef, Target},
  schema::{RelationKind, SchemaProvider},
  store::{FileStore, RecordStore},
};

// ─── Reports ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DanglingReason {
  /// The target table is not declared in the schema.
  UnknownTable,
  /// No row with the target uid exists.
  MissingRow,
  /// The target row exists but is flagged deleted.
  DeletedRow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingRef {
  pub entry:  ReferenceEntry,
  pub reason: DanglingReason,
}

/// Dangling record references grouped by source table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DbRefReport {
  /// Number of record references examined.
  pub checked:  usize,
  pub dangling: BTreeMap<String, Vec<DanglingRef>>,
}

impl DbRefReport {
  pub fn dangling_count(&self) -> usize { self.dangling.values().map(Vec::len).sum() }
}

/// Outcome of checking file references against file storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileRefReport {
  pub checked:             usize,
  pub existing:            BTreeSet<String>,
  pub missing:             BTreeSet<String>,
  /// Who refers to each missing file.
  pub missing_sources:     BTreeMap<String, Vec<SourceRef>>,
  /// Files referenced from more than one place.
  pub multiple_references: BTreeMap<String, Vec<SourceRef>>,
  /// Files in an upload folder that nothing refers to.
  pub unreferenced:        BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationsReport {
  pub checked_at: DateTime<Utc>,
  pub files:      FileRefReport,
  pub select_db:  DbRefReport,
  pub group_db:   DbRefReport,
  pub anomalies:  Vec<SchemaAnomaly>,
}

// ─── Record references ───────────────────────────────────────────────────────

impl<S, R> Integrity<'_, S, R>
where
  S: SchemaProvider,
  R: RecordStore,
{
  /// Scan every checked table that declares relations and extract all
  /// references, batch by batch.
  pub fn collect_references(&self) -> Result<Extraction> {
    let mut all = Extraction::default();

    for table in self.schema.checked_tables() {
      if table.relations.is_empty() {
        continue;
      }

      let mut after = i64::MIN;
      loop {
        let rows = self
          .records
          .rows_after(table, after, self.config.batch_size)
          .map_err(Error::storage)?;
        let Some(last) = rows.last() else { break };
        after = last.uid;

        for row in &rows {
          all.merge(extract_references(table, row));
        }
      }
    }

    tracing::debug!(
      entries = all.entries.len(),
      anomalies = all.anomalies.len(),
      "references collected"
    );
    Ok(all)
  }

  /// Find record references whose target is missing.
  ///
  /// With `include_deleted` false, references to deleted rows dangle too.
  /// File references in `entries` are ignored.
  pub fn validate_db_refs(
    &self,
    entries: &[ReferenceEntry],
    include_deleted: bool,
  ) -> Result<DbRefReport> {
    let mut wanted: BTreeMap<&str, BTreeSet<i64>> = BTreeMap::new();
    for entry in entries {
      if let Target::Record { table, uid } = &entry.target {
        wanted.entry(table.as_str()).or_default().insert(*uid);
      }
    }

    // Per target table: rows that exist at all, and rows that count as live.
    let mut present: BTreeMap<&str, (BTreeSet<i64>, BTreeSet<i64>)> = BTreeMap::new();
    for (table, uids) in &wanted {
      let Some(schema) = self.schema.table(table) else {
        continue;
      };
      let uids: Vec<i64> = uids.iter().copied().collect();

      let mut all = BTreeSet::new();
      let mut live = BTreeSet::new();
      for chunk in uids.chunks(self.config.batch_size) {
        all.extend(
          self
            .records
            .existing_uids(schema, chunk, true)
            .map_err(Error::storage)?,
        );
        if !include_deleted {
          live.extend(
            self
              .records
              .existing_uids(schema, chunk, false)
              .map_err(Error::storage)?,
          );
        }
      }
      if include_deleted {
        live = all.clone();
      }
      present.insert(*table, (all, live));
    }

    let mut report = DbRefReport::default();
    for entry in entries {
      let Target::Record { table, uid } = &entry.target else {
        continue;
      };
      report.checked += 1;

      let reason = match present.get(table.as_str()) {
        None => Some(DanglingReason::UnknownTable),
        Some((all, _)) if !all.contains(uid) => Some(DanglingReason::MissingRow),
        Some((_, live)) if !live.contains(uid) => Some(DanglingReason::DeletedRow),
        Some(_) => None,
      };

      if let Some(reason) = reason {
        report
          .dangling
          .entry(entry.source_table.clone())
          .or_default()
          .push(DanglingRef { entry: entry.clone(), reason });
      }
    }

    for refs in report.dangling.values_mut() {
      refs.sort_by(|a, b| {
        (&a.entry.target, a.entry.source_uid, &a.entry.source_field, a.entry.position).cmp(&(
          &b.entry.target,
          b.entry.source_uid,
          &b.entry.source_field,
          b.entry.position,
        ))
      });
    }

    let dangling = report.dangling_count();
    if dangling > 0 {
      tracing::warn!(checked = report.checked, dangling, "dangling record references");
    }
    Ok(report)
  }

  /// Collect all references and validate them: files, single-table selects
  /// and group fields separately.
  pub fn relations_overview<F: FileStore>(
    &self,
    files: &F,
    include_deleted: bool,
  ) -> Result<RelationsReport> {
    let extraction = self.collect_references()?;

    let folders: BTreeSet<&str> = self
      .schema
      .checked_tables()
      .into_iter()
      .flat_map(|t| t.upload_folders())
      .collect();

    let by_kind = |kind: RelationKind| -> Vec<ReferenceEntry> {
      extraction.entries_of_kind(kind).cloned().collect()
    };

    Ok(RelationsReport {
      checked_at: Utc::now(),
      files:      validate_file_refs(&by_kind(RelationKind::File), files, &folders)?,
      select_db:  self.validate_db_refs(&by_kind(RelationKind::Select), include_deleted)?,
      group_db:   self.validate_db_refs(&by_kind(RelationKind::Group), include_deleted)?,
      anomalies:  extraction.anomalies,
    })
  }
}

// ─── File references ─────────────────────────────────────────────────────────

/// Check file references in `entries` against `files`. Files found in
/// `upload_folders` that no entry mentions are reported as unreferenced.
pub fn validate_file_refs<F, I, P>(
  entries: &[ReferenceEntry],
  files: &F,
  upload_folders: I,
) -> Result<FileRefReport>
where
  F: FileStore,
  I: IntoIterator<Item = P>,
  P: AsRef<str>,
{
  let mut sources: BTreeMap<String, Vec<SourceRef>> = BTreeMap::new();
  for entry in entries {
    if let Target::File { path } = &entry.target {
      sources.entry(path.clone()).or_default().push(entry.source());
    }
  }

  let mut report = FileRefReport {
    checked: sources.values().map(Vec::len).sum(),
    ..FileRefReport::default()
  };

  for (path, refs) in &sources {
    if files.exists(path).map_err(Error::storage)? {
      report.existing.insert(path.clone());
    } else {
      report.missing.insert(path.clone());
      report.missing_sources.insert(path.clone(), refs.clone());
    }
    if refs.len() > 1 {
      let mut refs = refs.clone();
      refs.sort();
      report.multiple_references.insert(path.clone(), refs);
    }
  }

  for folder in upload_folders {
    for path in files.list(folder.as_ref()).map_err(Error::storage)? {
      if !sources.contains_key(&path) {
        report.unreferenced.insert(path);
      }
    }
  }

  if !report.missing.is_empty() {
    tracing::warn!(
      checked = report.checked,
      missing = report.missing.len(),
      "file references point at missing files"
    );
  }
  Ok(report)
}
