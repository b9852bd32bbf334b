//! [`SqliteStore`]: the SQLite implementation of [`RecordStore`] and
//! [`IndexStore`].

use std::{
  collections::{BTreeMap, BTreeSet},
  path::Path,
};

use rusqlite::{Connection, OptionalExtension as _, params, params_from_iter};

use dbint_core::{
  record::{DOKTYPE, PAGES, PageRow, PidCount, RecordRef, RecordRow},
  reference::IndexEntry,
  schema::TableSchema,
  store::{IndexStore, RecordStore},
};

use crate::{
  Result,
  encode::{INDEX_COLUMNS, RawIndexEntry, flag_expr, placeholders, quote_ident, text_expr},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// Record tables and the reference index in a single SQLite database.
pub struct SqliteStore {
  conn: Connection,
}

impl SqliteStore {
  /// Open (or create) a database at `path` and ensure the index table.
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let store = Self { conn: Connection::open(path)? };
    store.init_schema()?;
    tracing::debug!(path = %path.display(), "sqlite store opened");
    Ok(store)
  }

  /// Open an in-memory store, for tests and throwaway checks.
  pub fn open_in_memory() -> Result<Self> {
    let store = Self { conn: Connection::open_in_memory()? };
    store.init_schema()?;
    Ok(store)
  }

  fn init_schema(&self) -> Result<()> {
    self.conn.execute_batch(SCHEMA)?;
    Ok(())
  }

  /// The underlying connection, for fixtures and ad-hoc inspection.
  pub fn connection(&self) -> &Connection { &self.conn }

  /// Create a record table shaped after `table`: `uid`, `pid`, the label and
  /// flag columns, `doktype` for the page table, and one text column per
  /// relation field. Existing tables are left untouched.
  pub fn create_table(&self, table: &TableSchema) -> Result<()> {
    let mut columns = vec![
      "uid INTEGER PRIMARY KEY".to_owned(),
      "pid INTEGER NOT NULL DEFAULT 0".to_owned(),
    ];
    let mut seen = BTreeSet::from(["uid".to_owned(), "pid".to_owned()]);

    let mut add = |name: &str, decl: &str| -> Result<()> {
      if !name.is_empty() && seen.insert(name.to_owned()) {
        columns.push(format!("{} {decl}", quote_ident(name)?));
      }
      Ok(())
    };

    add(&table.label, "TEXT")?;
    if let Some(c) = table.delete_column() {
      add(c, "INTEGER NOT NULL DEFAULT 0")?;
    }
    if let Some(c) = table.hidden_column() {
      add(c, "INTEGER NOT NULL DEFAULT 0")?;
    }
    if table.name == PAGES {
      add(DOKTYPE, "INTEGER NOT NULL DEFAULT 1")?;
    }
    for relation in &table.relations {
      add(&relation.field, "TEXT")?;
    }

    let sql = format!(
      "CREATE TABLE IF NOT EXISTS {} ({})",
      quote_ident(&table.name)?,
      columns.join(", ")
    );
    self.conn.execute(&sql, [])?;
    Ok(())
  }

  /// `SELECT uid, pid, deleted, hidden, title FROM table`, the columns read
  /// by [`record_ref`].
  fn select_refs(table: &TableSchema) -> Result<String> {
    Ok(format!(
      "SELECT uid, pid, {}, {}, {} FROM {}",
      flag_expr(table.delete_column())?,
      flag_expr(table.hidden_column())?,
      text_expr(&table.label)?,
      quote_ident(&table.name)?,
    ))
  }

  fn index_rows(
    &self,
    sql: &str,
    params: impl rusqlite::Params,
  ) -> Result<Vec<IndexEntry>> {
    let mut stmt = self.conn.prepare(sql)?;
    let raws = stmt
      .query_map(params, RawIndexEntry::from_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(raws.into_iter().map(RawIndexEntry::decode).collect())
  }
}

fn record_ref(table: &str, row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRef> {
  Ok(RecordRef {
    table:   table.to_owned(),
    uid:     row.get(0)?,
    pid:     row.get(1)?,
    deleted: row.get(2)?,
    hidden:  row.get(3)?,
    title:   row.get(4)?,
  })
}

// ─── RecordStore impl ────────────────────────────────────────────────────────

impl RecordStore for SqliteStore {
  type Error = crate::Error;

  fn child_pages(&self, pages: &TableSchema, pid: i64) -> Result<Vec<PageRow>> {
    let sql = format!(
      "SELECT uid, pid, {}, COALESCE({}, 0), {}, {} FROM {} WHERE pid = ?1 ORDER BY uid",
      text_expr(&pages.label)?,
      quote_ident(DOKTYPE)?,
      flag_expr(pages.hidden_column())?,
      flag_expr(pages.delete_column())?,
      quote_ident(&pages.name)?,
    );
    let mut stmt = self.conn.prepare(&sql)?;
    let rows = stmt
      .query_map([pid], |row| {
        Ok(PageRow {
          uid:     row.get(0)?,
          pid:     row.get(1)?,
          title:   row.get(2)?,
          doktype: row.get(3)?,
          hidden:  row.get(4)?,
          deleted: row.get(5)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
  }

  fn pid_counts(&self, table: &TableSchema) -> Result<Vec<PidCount>> {
    let sql = format!(
      "SELECT pid, COUNT(*), SUM(CASE WHEN {} THEN 0 ELSE 1 END)
       FROM {} GROUP BY pid ORDER BY pid",
      flag_expr(table.delete_column())?,
      quote_ident(&table.name)?,
    );
    let mut stmt = self.conn.prepare(&sql)?;
    let counts = stmt
      .query_map([], |row| {
        Ok(PidCount {
          pid:         row.get(0)?,
          all:         row.get::<_, i64>(1)? as u64,
          non_deleted: row.get::<_, i64>(2)? as u64,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(counts)
  }

  fn records_by_pids(&self, table: &TableSchema, pids: &[i64]) -> Result<Vec<RecordRef>> {
    if pids.is_empty() {
      return Ok(vec![]);
    }
    let sql = format!(
      "{} WHERE pid IN ({}) ORDER BY uid",
      Self::select_refs(table)?,
      placeholders(pids.len())
    );
    let mut stmt = self.conn.prepare(&sql)?;
    let refs = stmt
      .query_map(params_from_iter(pids), |row| record_ref(&table.name, row))?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(refs)
  }

  fn record(&self, table: &TableSchema, uid: i64) -> Result<Option<RecordRef>> {
    let sql = format!("{} WHERE uid = ?1", Self::select_refs(table)?);
    let found = self
      .conn
      .query_row(&sql, [uid], |row| record_ref(&table.name, row))
      .optional()?;
    Ok(found)
  }

  fn rows_after(
    &self,
    table: &TableSchema,
    after_uid: i64,
    limit: usize,
  ) -> Result<Vec<RecordRow>> {
    let fields = table
      .relations
      .iter()
      .map(|r| Ok(format!("CAST({} AS TEXT)", quote_ident(&r.field)?)))
      .collect::<Result<Vec<_>>>()?;

    let mut select = vec!["uid".to_owned(), "pid".to_owned(), flag_expr(table.delete_column())?];
    select.extend(fields);

    let sql = format!(
      "SELECT {} FROM {} WHERE uid > ?1 ORDER BY uid LIMIT ?2",
      select.join(", "),
      quote_ident(&table.name)?,
    );
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let mut stmt = self.conn.prepare(&sql)?;
    let rows = stmt
      .query_map(params![after_uid, limit], |row| {
        let mut values = BTreeMap::new();
        for (i, relation) in table.relations.iter().enumerate() {
          values.insert(relation.field.clone(), row.get::<_, Option<String>>(3 + i)?);
        }
        Ok(RecordRow {
          uid: row.get(0)?,
          pid: row.get(1)?,
          deleted: row.get(2)?,
          values,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
  }

  fn existing_uids(
    &self,
    table: &TableSchema,
    uids: &[i64],
    include_deleted: bool,
  ) -> Result<BTreeSet<i64>> {
    if uids.is_empty() {
      return Ok(BTreeSet::new());
    }
    let mut sql = format!(
      "SELECT uid FROM {} WHERE uid IN ({})",
      quote_ident(&table.name)?,
      placeholders(uids.len())
    );
    if !include_deleted {
      sql.push_str(&format!(" AND NOT {}", flag_expr(table.delete_column())?));
    }

    let mut stmt = self.conn.prepare(&sql)?;
    let found = stmt
      .query_map(params_from_iter(uids), |row| row.get(0))?
      .collect::<rusqlite::Result<BTreeSet<i64>>>()?;
    Ok(found)
  }

  fn move_record(&self, table: &TableSchema, uid: i64, pid: i64) -> Result<bool> {
    let sql = format!("UPDATE {} SET pid = ?1 WHERE uid = ?2", quote_ident(&table.name)?);
    let changed = self.conn.execute(&sql, [pid, uid])?;
    Ok(changed > 0)
  }

  fn delete_record(&self, table: &TableSchema, uid: i64) -> Result<bool> {
    let name = quote_ident(&table.name)?;
    let sql = match table.delete_column() {
      Some(column) => {
        let column = quote_ident(column)?;
        format!("UPDATE {name} SET {column} = 1 WHERE uid = ?1 AND COALESCE({column}, 0) = 0")
      }
      None => format!("DELETE FROM {name} WHERE uid = ?1"),
    };
    let changed = self.conn.execute(&sql, [uid])?;
    Ok(changed > 0)
  }
}

// ─── IndexStore impl ─────────────────────────────────────────────────────────

impl IndexStore for SqliteStore {
  type Error = crate::Error;

  fn entries_for(&self, table: &str, uid: i64) -> Result<Vec<IndexEntry>> {
    self.index_rows(
      &format!(
        "SELECT {INDEX_COLUMNS} FROM sys_refindex
         WHERE tablename = ?1 AND recuid = ?2
         ORDER BY field, sorting"
      ),
      params![table, uid],
    )
  }

  fn source_uids(&self, table: &str) -> Result<Vec<i64>> {
    let mut stmt = self.conn.prepare(
      "SELECT DISTINCT recuid FROM sys_refindex WHERE tablename = ?1 ORDER BY recuid",
    )?;
    let uids = stmt
      .query_map([table], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(uids)
  }

  fn source_tables(&self) -> Result<Vec<String>> {
    let mut stmt = self
      .conn
      .prepare("SELECT DISTINCT tablename FROM sys_refindex ORDER BY tablename")?;
    let tables = stmt
      .query_map([], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(tables)
  }

  fn reconcile(
    &self,
    table: &str,
    uid: i64,
    remove: &[String],
    add: &[IndexEntry],
  ) -> Result<()> {
    let tx = self.conn.unchecked_transaction()?;
    {
      let mut delete = tx.prepare(
        "DELETE FROM sys_refindex WHERE hash = ?1 AND tablename = ?2 AND recuid = ?3",
      )?;
      for hash in remove {
        delete.execute(params![hash, table, uid])?;
      }

      let mut insert = tx.prepare(&format!(
        "INSERT OR REPLACE INTO sys_refindex ({INDEX_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
      ))?;
      for entry in add {
        insert.execute(params![
          entry.hash,
          entry.source_table,
          entry.source_uid,
          entry.source_field,
          entry.sorting,
          entry.ref_table,
          entry.ref_uid,
          entry.ref_string,
          entry.usage_str(),
        ])?;
      }
    }
    tx.commit()?;
    Ok(())
  }

  fn references_to(&self, ref_table: &str, ref_uid: i64) -> Result<Vec<IndexEntry>> {
    self.index_rows(
      &format!(
        "SELECT {INDEX_COLUMNS} FROM sys_refindex
         WHERE ref_table = ?1 AND ref_uid = ?2
         ORDER BY tablename, recuid, field, sorting"
      ),
      params![ref_table, ref_uid],
    )
  }
}
