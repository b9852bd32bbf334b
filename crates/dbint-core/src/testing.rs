//! In-memory fakes of the collaborator traits for unit tests.

use std::{
  cell::{Cell, RefCell},
  collections::{BTreeMap, BTreeSet},
};

use crate::{
  record::{PageRow, PidCount, RecordRef, RecordRow},
  reference::IndexEntry,
  schema::{DoktypeItem, RelationDescriptor, StaticSchema, TableSchema},
  store::{FileStore, IndexStore, RecordStore},
};

#[derive(Debug, thiserror::Error)]
#[error("memory store is offline")]
pub struct Offline;

/// A row under construction; see [`page`] and [`rec`].
#[derive(Debug, Clone, Default)]
pub struct MemRow {
  pub uid:     i64,
  pub pid:     i64,
  pub title:   String,
  pub doktype: i64,
  pub hidden:  bool,
  pub deleted: bool,
  pub values:  BTreeMap<String, String>,
}

impl MemRow {
  pub fn doktype(mut self, doktype: i64) -> Self {
    self.doktype = doktype;
    self
  }

  pub fn hidden(mut self) -> Self {
    self.hidden = true;
    self
  }

  pub fn deleted(mut self) -> Self {
    self.deleted = true;
    self
  }

  pub fn set(mut self, field: &str, value: &str) -> Self {
    self.values.insert(field.into(), value.into());
    self
  }
}

pub fn page(uid: i64, pid: i64) -> MemRow {
  MemRow { uid, pid, title: format!("page {uid}"), doktype: 1, ..MemRow::default() }
}

pub fn rec(uid: i64, pid: i64) -> MemRow {
  MemRow { uid, pid, title: format!("record {uid}"), ..MemRow::default() }
}

/// `pages`, `tt_content` with one relation of each kind, a hidden `sys_log`.
pub fn schema() -> StaticSchema {
  StaticSchema::new(
    [
      TableSchema::new("pages")
        .with_relation(RelationDescriptor::file("media", "uploads/media")),
      TableSchema::new("tt_content")
        .with_label("header")
        .with_relation(RelationDescriptor::select("page_ref", "pages"))
        .with_relation(RelationDescriptor::group("records", &["pages", "tt_content"]))
        .with_relation(RelationDescriptor::file("image", "uploads/pics")),
      TableSchema::new("sys_log").hidden(),
    ],
    vec![
      DoktypeItem { value: 1, label: "Standard".into() },
      DoktypeItem { value: 254, label: "Folder".into() },
    ],
  )
}

/// Records, files and a reference index held in memory.
///
/// `fail_after_writes` lets tests make the index fail after a number of
/// successful reconciliations.
#[derive(Default)]
pub struct MemoryStore {
  tables:            RefCell<BTreeMap<String, BTreeMap<i64, MemRow>>>,
  files:             RefCell<BTreeSet<String>>,
  index:             RefCell<BTreeMap<String, IndexEntry>>,
  offline:           Cell<bool>,
  fail_after_writes: Cell<Option<usize>>,
  writes:            Cell<usize>,
}

impl MemoryStore {
  pub fn insert(&self, table: &str, row: MemRow) {
    self
      .tables
      .borrow_mut()
      .entry(table.into())
      .or_default()
      .insert(row.uid, row);
  }

  pub fn row(&self, table: &str, uid: i64) -> Option<MemRow> {
    self.tables.borrow().get(table)?.get(&uid).cloned()
  }

  pub fn update(&self, table: &str, uid: i64, field: &str, value: &str) {
    if let Some(row) = self
      .tables
      .borrow_mut()
      .get_mut(table)
      .and_then(|t| t.get_mut(&uid))
    {
      row.values.insert(field.into(), value.into());
    }
  }

  pub fn remove(&self, table: &str, uid: i64) {
    if let Some(t) = self.tables.borrow_mut().get_mut(table) {
      t.remove(&uid);
    }
  }

  pub fn add_file(&self, path: &str) { self.files.borrow_mut().insert(path.into()); }

  pub fn put_index(&self, entry: IndexEntry) {
    self.index.borrow_mut().insert(entry.hash.clone(), entry);
  }

  pub fn index_len(&self) -> usize { self.index.borrow().len() }

  pub fn index_entries(&self) -> Vec<IndexEntry> {
    self.index.borrow().values().cloned().collect()
  }

  pub fn go_offline(&self) { self.offline.set(true); }

  pub fn fail_after_writes(&self, n: usize) { self.fail_after_writes.set(Some(n)); }

  pub fn writes(&self) -> usize { self.writes.get() }

  fn online(&self) -> Result<(), Offline> {
    if self.offline.get() { Err(Offline) } else { Ok(()) }
  }

  fn rows(&self, table: &str) -> Vec<MemRow> {
    self
      .tables
      .borrow()
      .get(table)
      .map(|t| t.values().cloned().collect())
      .unwrap_or_default()
  }

  fn to_ref(table: &str, row: &MemRow) -> RecordRef {
    RecordRef {
      table:   table.into(),
      uid:     row.uid,
      pid:     row.pid,
      deleted: row.deleted,
      hidden:  row.hidden,
      title:   row.title.clone(),
    }
  }
}

impl RecordStore for MemoryStore {
  type Error = Offline;

  fn child_pages(&self, pages: &TableSchema, pid: i64) -> Result<Vec<PageRow>, Offline> {
    self.online()?;
    Ok(
      self
        .rows(&pages.name)
        .into_iter()
        .filter(|r| r.pid == pid)
        .map(|r| PageRow {
          uid:     r.uid,
          pid:     r.pid,
          title:   r.title,
          doktype: r.doktype,
          hidden:  r.hidden,
          deleted: r.deleted,
        })
        .collect(),
    )
  }

  fn pid_counts(&self, table: &TableSchema) -> Result<Vec<PidCount>, Offline> {
    self.online()?;
    let mut counts: BTreeMap<i64, PidCount> = BTreeMap::new();
    for row in self.rows(&table.name) {
      let c = counts
        .entry(row.pid)
        .or_insert(PidCount { pid: row.pid, all: 0, non_deleted: 0 });
      c.all += 1;
      if !row.deleted {
        c.non_deleted += 1;
      }
    }
    Ok(counts.into_values().collect())
  }

  fn records_by_pids(
    &self,
    table: &TableSchema,
    pids: &[i64],
  ) -> Result<Vec<RecordRef>, Offline> {
    self.online()?;
    Ok(
      self
        .rows(&table.name)
        .iter()
        .filter(|r| pids.contains(&r.pid))
        .map(|r| Self::to_ref(&table.name, r))
        .collect(),
    )
  }

  fn record(&self, table: &TableSchema, uid: i64) -> Result<Option<RecordRef>, Offline> {
    self.online()?;
    Ok(self.row(&table.name, uid).map(|r| Self::to_ref(&table.name, &r)))
  }

  fn rows_after(
    &self,
    table: &TableSchema,
    after_uid: i64,
    limit: usize,
  ) -> Result<Vec<RecordRow>, Offline> {
    self.online()?;
    Ok(
      self
        .rows(&table.name)
        .into_iter()
        .filter(|r| r.uid > after_uid)
        .take(limit)
        .map(|r| RecordRow {
          uid:     r.uid,
          pid:     r.pid,
          deleted: r.deleted,
          values:  table
            .relations
            .iter()
            .map(|rel| (rel.field.clone(), r.values.get(&rel.field).cloned()))
            .collect(),
        })
        .collect(),
    )
  }

  fn existing_uids(
    &self,
    table: &TableSchema,
    uids: &[i64],
    include_deleted: bool,
  ) -> Result<BTreeSet<i64>, Offline> {
    self.online()?;
    Ok(
      self
        .rows(&table.name)
        .into_iter()
        .filter(|r| uids.contains(&r.uid) && (include_deleted || !r.deleted))
        .map(|r| r.uid)
        .collect(),
    )
  }

  fn move_record(&self, table: &TableSchema, uid: i64, pid: i64) -> Result<bool, Offline> {
    self.online()?;
    let mut tables = self.tables.borrow_mut();
    match tables.get_mut(&table.name).and_then(|t| t.get_mut(&uid)) {
      Some(row) => {
        row.pid = pid;
        Ok(true)
      }
      None => Ok(false),
    }
  }

  fn delete_record(&self, table: &TableSchema, uid: i64) -> Result<bool, Offline> {
    self.online()?;
    let mut tables = self.tables.borrow_mut();
    match tables.get_mut(&table.name).and_then(|t| t.get_mut(&uid)) {
      Some(row) if !row.deleted => {
        row.deleted = true;
        Ok(true)
      }
      _ => Ok(false),
    }
  }
}

impl FileStore for MemoryStore {
  type Error = Offline;

  fn exists(&self, path: &str) -> Result<bool, Offline> {
    self.online()?;
    Ok(self.files.borrow().contains(path))
  }

  fn list(&self, folder: &str) -> Result<Vec<String>, Offline> {
    self.online()?;
    let prefix = format!("{}/", folder.trim_end_matches('/'));
    Ok(
      self
        .files
        .borrow()
        .iter()
        .filter(|p| p.strip_prefix(&prefix).is_some_and(|rest| !rest.contains('/')))
        .cloned()
        .collect(),
    )
  }
}

impl IndexStore for MemoryStore {
  type Error = Offline;

  fn entries_for(&self, table: &str, uid: i64) -> Result<Vec<IndexEntry>, Offline> {
    self.online()?;
    Ok(
      self
        .index
        .borrow()
        .values()
        .filter(|e| e.source_table == table && e.source_uid == uid)
        .cloned()
        .collect(),
    )
  }

  fn source_uids(&self, table: &str) -> Result<Vec<i64>, Offline> {
    self.online()?;
    let uids: BTreeSet<i64> = self
      .index
      .borrow()
      .values()
      .filter(|e| e.source_table == table)
      .map(|e| e.source_uid)
      .collect();
    Ok(uids.into_iter().collect())
  }

  fn source_tables(&self) -> Result<Vec<String>, Offline> {
    self.online()?;
    let tables: BTreeSet<String> = self
      .index
      .borrow()
      .values()
      .map(|e| e.source_table.clone())
      .collect();
    Ok(tables.into_iter().collect())
  }

  fn reconcile(
    &self,
    table: &str,
    uid: i64,
    remove: &[String],
    add: &[IndexEntry],
  ) -> Result<(), Offline> {
    self.online()?;
    if self.fail_after_writes.get().is_some_and(|n| self.writes.get() >= n) {
      return Err(Offline);
    }
    let mut index = self.index.borrow_mut();
    index.retain(|hash, e| {
      !(e.source_table == table && e.source_uid == uid && remove.contains(hash))
    });
    for entry in add {
      index.insert(entry.hash.clone(), entry.clone());
    }
    self.writes.set(self.writes.get() + 1);
    Ok(())
  }

  fn references_to(&self, ref_table: &str, ref_uid: i64) -> Result<Vec<IndexEntry>, Offline> {
    self.online()?;
    Ok(
      self
        .index
        .borrow()
        .values()
        .filter(|e| e.ref_table == ref_table && e.ref_uid == ref_uid)
        .cloned()
        .collect(),
    )
  }
}
