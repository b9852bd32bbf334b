//! Reference extraction: one record plus its table schema in, the record's
//! outgoing references out.
//!
//! Extraction never fails. Values that cannot be understood become
//! [`SchemaAnomaly`] annotations and the offending item is skipped.

use serde::Serialize;

use crate::{
  record::RecordRow,
  reference::{AnomalyKind, ReferenceEntry, SchemaAnomaly, Target},
  schema::{RelationDescriptor, RelationKind, TableSchema},
};

/// References and anomalies produced by one or more extractions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Extraction {
  pub entries:   Vec<ReferenceEntry>,
  pub anomalies: Vec<SchemaAnomaly>,
}

impl Extraction {
  pub fn merge(&mut self, other: Extraction) {
    self.entries.extend(other.entries);
    self.anomalies.extend(other.anomalies);
  }

  pub fn entries_of_kind(
    &self,
    kind: RelationKind,
  ) -> impl Iterator<Item = &ReferenceEntry> {
    self.entries.iter().filter(move |e| e.kind == kind)
  }
}

/// Extract the references of `row`, a record of `table`.
pub fn extract_references(table: &TableSchema, row: &RecordRow) -> Extraction {
  let mut out = Extraction::default();

  for relation in &table.relations {
    let Some(value) = row.value(&relation.field) else {
      continue;
    };

    let mut field = FieldExtraction {
      table: &table.name,
      uid: row.uid,
      relation,
      out: &mut out,
      position: 0,
    };

    if let Some(detail) = relation.defect() {
      field.anomaly(AnomalyKind::MalformedDescriptor, detail);
      continue;
    }

    match relation.kind {
      RelationKind::Select => field.select(value),
      RelationKind::Group => field.group(value),
      RelationKind::File => field.files(value),
    }
  }

  for anomaly in &out.anomalies {
    tracing::warn!(
      table = %anomaly.table,
      uid = anomaly.uid,
      field = %anomaly.field,
      kind = ?anomaly.kind,
      "{}",
      anomaly.detail
    );
  }

  out
}

struct FieldExtraction<'a> {
  table:    &'a str,
  uid:      i64,
  relation: &'a RelationDescriptor,
  out:      &'a mut Extraction,
  position: u32,
}

impl FieldExtraction<'_> {
  fn anomaly(&mut self, kind: AnomalyKind, detail: String) {
    self.out.anomalies.push(SchemaAnomaly {
      table: self.table.to_owned(),
      uid: self.uid,
      field: self.relation.field.clone(),
      kind,
      detail,
    });
  }

  fn push(&mut self, target: Target) {
    self.out.entries.push(ReferenceEntry {
      source_table: self.table.to_owned(),
      source_uid:   self.uid,
      source_field: self.relation.field.clone(),
      kind:         self.relation.kind,
      position:     self.position,
      target,
    });
    self.position += 1;
  }

  fn select(&mut self, value: &str) {
    if value.contains(',') {
      self.anomaly(
        AnomalyKind::MultipleValues,
        format!("single-table select holds several values: {value:?}"),
      );
      return;
    }

    match value.parse::<i64>() {
      Ok(0) => {}
      Ok(uid) if uid > 0 => {
        // `defect()` returned None, so the target table is present.
        if let Some(table) = self.relation.single_target() {
          let table = table.to_owned();
          self.push(Target::Record { table, uid });
        }
      }
      _ => self.anomaly(
        AnomalyKind::InvalidItem,
        format!("select value is not a uid: {value:?}"),
      ),
    }
  }

  fn group(&mut self, value: &str) {
    for (index, item) in value.split(',').map(str::trim).enumerate() {
      if item.is_empty() {
        self.anomaly(
          AnomalyKind::EmptyItem,
          format!("empty item at index {index} in {value:?}"),
        );
        continue;
      }

      match parse_group_item(item, self.relation) {
        Ok((table, uid)) => self.push(Target::Record { table, uid }),
        Err((kind, detail)) => self.anomaly(kind, detail),
      }
    }
  }

  fn files(&mut self, value: &str) {
    // `defect()` guarantees a non-empty folder.
    let folder = self
      .relation
      .upload_folder
      .as_deref()
      .unwrap_or_default()
      .trim_end_matches('/')
      .to_owned();

    for (index, name) in value.split(',').map(str::trim).enumerate() {
      if name.is_empty() {
        self.anomaly(
          AnomalyKind::EmptyItem,
          format!("empty file name at index {index} in {value:?}"),
        );
        continue;
      }
      if name.contains('/') || name.contains('\\') || name == ".." || name == "." {
        self.anomaly(
          AnomalyKind::InvalidPath,
          format!("file name leaves the upload folder: {name:?}"),
        );
        continue;
      }
      self.push(Target::File { path: format!("{folder}/{name}") });
    }
  }
}

/// Parse `table_uid`, or a bare uid when the field allows a single table.
fn parse_group_item(
  item: &str,
  relation: &RelationDescriptor,
) -> Result<(String, i64), (AnomalyKind, String)> {
  if let Ok(uid) = item.parse::<i64>() {
    if uid <= 0 {
      return Err((AnomalyKind::InvalidItem, format!("invalid uid {uid}")));
    }
    return match relation.single_target() {
      Some(table) => Ok((table.to_owned(), uid)),
      None => Err((
        AnomalyKind::AmbiguousTable,
        format!("bare uid {uid} but field allows {:?}", relation.allowed),
      )),
    };
  }

  let invalid = || (AnomalyKind::InvalidItem, format!("cannot parse item {item:?}"));

  let (table, uid) = item.rsplit_once('_').ok_or_else(invalid)?;
  if table.is_empty() {
    return Err(invalid());
  }
  let uid = match uid.parse::<i64>() {
    Ok(uid) if uid > 0 => uid,
    _ => return Err(invalid()),
  };
  if !relation.allows(table) {
    return Err((
      AnomalyKind::DisallowedTable,
      format!("table {table:?} is not in {:?}", relation.allowed),
    ));
  }
  Ok((table.to_owned(), uid))
}
