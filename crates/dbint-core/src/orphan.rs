//! Lost records: records whose container is not part of the page tree.
//!
//! Detection is read-only. Repair is a separate, explicit command; after a
//! successful repair the caller re-runs the walk and detection instead of
//! patching an existing report.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
  Error, Integrity, RepairAction, Result,
  record::{PAGES, RecordRef, ROOT, is_sentinel_pid},
  schema::SchemaProvider,
  store::RecordStore,
  tree::{CycleWarning, PageStatistics, TreeWalk},
};

// ─── Reports ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LostRecord {
  #[serde(flatten)]
  pub record:  RecordRef,
  /// False when the container is itself a lost page; repairing that page
  /// brings this record back into the tree.
  pub fixable: bool,
}

/// Lost records of every checked table, each list ordered by uid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LostRecordReport {
  pub tables:     BTreeMap<String, Vec<LostRecord>>,
  pub lost_pages: BTreeSet<i64>,
  /// Pid cycles among lost pages, one warning per cycle naming its lowest
  /// page.
  pub cycles:     Vec<CycleWarning>,
}

impl LostRecordReport {
  pub fn get(&self, table: &str, uid: i64) -> Option<&LostRecord> {
    self.tables.get(table)?.iter().find(|l| l.record.uid == uid)
  }

  pub fn total(&self) -> usize { self.tables.values().map(Vec::len).sum() }

  pub fn is_empty(&self) -> bool { self.total() == 0 }
}

/// Record counts of one table restricted to known containers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCount {
  pub all:         u64,
  pub non_deleted: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoktypeCount {
  pub value: i64,
  pub label: String,
  pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableOverview {
  pub table:       String,
  pub title:       String,
  pub all:         u64,
  pub non_deleted: u64,
  pub lost:        Vec<LostRecord>,
}

/// Everything the records view shows: page statistics, page types, and per
/// table counts with lost records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordsOverview {
  pub checked_at: DateTime<Utc>,
  pub pages:      PageStatistics,
  pub cycles:     Vec<CycleWarning>,
  pub doktypes:   Vec<DoktypeCount>,
  pub tables:     Vec<TableOverview>,
  /// Outcome of a repair requested with the overview, if any.
  pub repaired:   Option<bool>,
}

// ─── Operations ──────────────────────────────────────────────────────────────

impl<S, R> Integrity<'_, S, R>
where
  S: SchemaProvider,
  R: RecordStore,
{
  /// Records of `table` whose pid is neither in `known` nor a sentinel,
  /// ordered by uid.
  pub fn find_lost_records(
    &self,
    table: &str,
    known: &BTreeSet<i64>,
  ) -> Result<Vec<RecordRef>> {
    let schema = self.table(table)?;

    let unknown: Vec<i64> = self
      .records
      .pid_counts(schema)
      .map_err(Error::storage)?
      .into_iter()
      .map(|c| c.pid)
      .filter(|pid| !is_sentinel_pid(*pid) && !known.contains(pid))
      .collect();

    let mut lost = Vec::new();
    for chunk in unknown.chunks(self.config.batch_size) {
      lost.extend(
        self
          .records
          .records_by_pids(schema, chunk)
          .map_err(Error::storage)?,
      );
    }

    // Rows may have moved between the two reads.
    lost.retain(|r| !is_sentinel_pid(r.pid) && !known.contains(&r.pid));
    lost.sort_by_key(|r| r.uid);
    Ok(lost)
  }

  /// Lost records of every checked table.
  pub fn lost_records(&self, known: &BTreeSet<i64>) -> Result<LostRecordReport> {
    let mut found = BTreeMap::new();
    for table in self.schema.checked_tables() {
      let lost = self.find_lost_records(&table.name, known)?;
      if !lost.is_empty() {
        tracing::warn!(table = %table.name, count = lost.len(), "lost records");
      }
      found.insert(table.name.clone(), lost);
    }

    let parents: BTreeMap<i64, i64> = found
      .get(PAGES)
      .map(|pages| pages.iter().map(|r| (r.uid, r.pid)).collect())
      .unwrap_or_default();
    let lost_pages: BTreeSet<i64> = parents.keys().copied().collect();
    let (cycles, in_cycle) = pid_cycles(&parents);

    let tables = found
      .into_iter()
      .map(|(table, records)| {
        let lost = records
          .into_iter()
          .map(|record| LostRecord {
            // Any page of a cycle can be repaired on its own.
            fixable: !lost_pages.contains(&record.pid)
              || (table == PAGES && in_cycle.contains(&record.uid)),
            record,
          })
          .collect();
        (table, lost)
      })
      .collect();

    Ok(LostRecordReport { tables, lost_pages, cycles })
  }

  /// Repair one lost record from `report` with the configured action.
  ///
  /// Returns `Ok(false)` without touching storage when the request is empty,
  /// names a record that is not in `report` or is not fixable, or the record
  /// changed since the report was computed.
  pub fn fix_lost_record(
    &self,
    report: &LostRecordReport,
    table: &str,
    uid: i64,
  ) -> Result<bool> {
    if table.is_empty() || uid <= 0 {
      return Ok(false);
    }

    let Some(lost) = report.get(table, uid) else {
      tracing::info!(table, uid, "repair requested for a record that is not lost");
      return Ok(false);
    };
    if !lost.fixable {
      tracing::info!(
        table,
        uid,
        pid = lost.record.pid,
        "container is a lost page; repair it first"
      );
      return Ok(false);
    }

    let schema = self.table(table)?;
    let current = self.records.record(schema, uid).map_err(Error::storage)?;
    if current.is_none_or(|r| r.pid != lost.record.pid) {
      tracing::info!(table, uid, "lost record changed since the report; not repaired");
      return Ok(false);
    }

    let changed = match self.config.repair {
      RepairAction::MoveToRoot => self.records.move_record(schema, uid, ROOT),
      RepairAction::Delete => self.records.delete_record(schema, uid),
    }
    .map_err(Error::storage)?;

    tracing::info!(
      table,
      uid,
      old_pid = lost.record.pid,
      action = ?self.config.repair,
      changed,
      "lost record repaired"
    );
    Ok(changed)
  }

  /// Per-table record counts over containers in `known`.
  pub fn count_records(
    &self,
    known: &BTreeSet<i64>,
  ) -> Result<BTreeMap<String, TableCount>> {
    let mut counts = BTreeMap::new();
    for table in self.schema.checked_tables() {
      let total = self
        .records
        .pid_counts(table)
        .map_err(Error::storage)?
        .into_iter()
        .filter(|c| known.contains(&c.pid))
        .fold(TableCount::default(), |acc, c| TableCount {
          all:         acc.all + c.all,
          non_deleted: acc.non_deleted + c.non_deleted,
        });
      counts.insert(table.name.clone(), total);
    }
    Ok(counts)
  }

  /// Assemble the records overview. When `repair` names a record, it is
  /// repaired after a first detection pass and, if that changed anything,
  /// the walk and detection run again from scratch.
  pub fn records_overview(&self, repair: Option<(&str, i64)>) -> Result<RecordsOverview> {
    let (mut walk, mut lost) = self.detect()?;

    let repaired = match repair {
      Some((table, uid)) => {
        let fixed = self.fix_lost_record(&lost, table, uid)?;
        if fixed {
          (walk, lost) = self.detect()?;
        }
        Some(fixed)
      }
      None => None,
    };

    let counts = self.count_records(&walk.known_ids())?;

    let doktypes = self
      .schema
      .doktypes()
      .iter()
      .map(|d| DoktypeCount {
        value: d.value,
        label: d.label.clone(),
        count: walk.stats.doktypes.get(&d.value).copied().unwrap_or(0),
      })
      .collect();

    let tables = self
      .schema
      .checked_tables()
      .into_iter()
      .map(|t| {
        let count = counts.get(&t.name).copied().unwrap_or_default();
        TableOverview {
          table:       t.name.clone(),
          title:       t.title.clone(),
          all:         count.all,
          non_deleted: count.non_deleted,
          lost:        lost.tables.remove(&t.name).unwrap_or_default(),
        }
      })
      .collect();

    let mut cycles = walk.cycles;
    cycles.append(&mut lost.cycles);

    Ok(RecordsOverview {
      checked_at: Utc::now(),
      pages: walk.stats,
      cycles,
      doktypes,
      tables,
      repaired,
    })
  }

  fn detect(&self) -> Result<(TreeWalk, LostRecordReport)> {
    let walk = self.build_tree(ROOT)?;
    let lost = self.lost_records(&walk.known_ids())?;
    Ok((walk, lost))
  }
}

/// Follow each lost page's pid chain through the other lost pages. Returns
/// one warning per cycle and the uids of all pages on a cycle.
fn pid_cycles(parents: &BTreeMap<i64, i64>) -> (Vec<CycleWarning>, BTreeSet<i64>) {
  let mut cycles = Vec::new();
  let mut in_cycle = BTreeSet::new();
  let mut done = BTreeSet::new();

  for &start in parents.keys() {
    let mut path = Vec::new();
    let mut current = start;
    loop {
      if done.contains(&current) {
        break;
      }
      if let Some(at) = path.iter().position(|&p| p == current) {
        let ring = &path[at..];
        let page_id = ring.iter().copied().min().unwrap_or(current);
        let parent_id = parents.get(&page_id).copied().unwrap_or(page_id);
        tracing::warn!(
          page = page_id,
          parent = parent_id,
          len = ring.len(),
          "pid cycle among lost pages"
        );
        cycles.push(CycleWarning { page_id, parent_id });
        in_cycle.extend(ring.iter().copied());
        break;
      }
      path.push(current);
      match parents.get(&current) {
        Some(&pid) => current = pid,
        None => break,
      }
    }
    done.extend(path);
  }

  (cycles, in_cycle)
}
