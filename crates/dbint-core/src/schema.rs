//! Schema metadata: tables, their relation fields and page types.
//!
//! The engine never reads schema from global state. A [`SchemaProvider`] is
//! resolved once per invocation and passed in explicitly. [`StaticSchema`]
//! is the shipped implementation and deserializes from a schema file:
//!
//! ```toml
//! [[doktypes]]
//! value = 1
//! label = "Standard"
//!
//! [tables.tt_content]
//! title = "Content"
//! label = "header"
//!
//! [[tables.tt_content.relations]]
//! field   = "records"
//! kind    = "group"
//! allowed = ["tt_content", "pages"]
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Matches every table in a group field's `allowed` list.
pub const ANY_TABLE: &str = "*";

// ─── Relations ───────────────────────────────────────────────────────────────

/// How a relation field encodes its targets.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
  /// One uid of a single foreign table.
  Select,
  /// Comma-separated `table_uid` items, possibly spanning several tables.
  Group,
  /// Comma-separated file names below an upload folder.
  File,
}

impl RelationKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Select => "select",
      Self::Group => "group",
      Self::File => "file",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "select" => Some(Self::Select),
      "group" => Some(Self::Group),
      "file" => Some(Self::File),
      _ => None,
    }
  }
}

/// Schema-declared metadata of one relation field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescriptor {
  pub field:         String,
  pub kind:          RelationKind,
  /// Target tables. Select fields name exactly one; group fields may use
  /// [`ANY_TABLE`].
  #[serde(default)]
  pub allowed:       Vec<String>,
  /// Folder that file names of a file field are relative to.
  #[serde(default)]
  pub upload_folder: Option<String>,
}

impl RelationDescriptor {
  pub fn select(field: &str, table: &str) -> Self {
    Self {
      field:         field.into(),
      kind:          RelationKind::Select,
      allowed:       vec![table.into()],
      upload_folder: None,
    }
  }

  pub fn group(field: &str, allowed: &[&str]) -> Self {
    Self {
      field:         field.into(),
      kind:          RelationKind::Group,
      allowed:       allowed.iter().map(|t| (*t).to_owned()).collect(),
      upload_folder: None,
    }
  }

  pub fn file(field: &str, upload_folder: &str) -> Self {
    Self {
      field:         field.into(),
      kind:          RelationKind::File,
      allowed:       vec![],
      upload_folder: Some(upload_folder.into()),
    }
  }

  /// The only concrete table this field may point to, if there is exactly
  /// one.
  pub fn single_target(&self) -> Option<&str> {
    match self.allowed.as_slice() {
      [only] if only != ANY_TABLE && !only.is_empty() => Some(only),
      _ => None,
    }
  }

  /// Whether an item of this field may point into `table`.
  pub fn allows(&self, table: &str) -> bool {
    self.allowed.iter().any(|t| t == ANY_TABLE || t == table)
  }

  /// Describe what is wrong with this descriptor, if anything.
  pub fn defect(&self) -> Option<String> {
    match self.kind {
      RelationKind::Select if self.single_target().is_none() => Some(format!(
        "select field must name exactly one foreign table, got {:?}",
        self.allowed
      )),
      RelationKind::Group if self.allowed.iter().all(|t| t.is_empty()) => {
        Some("group field declares no allowed tables".into())
      }
      RelationKind::File
        if self.upload_folder.as_deref().is_none_or(str::is_empty) =>
      {
        Some("file field declares no upload folder".into())
      }
      _ => None,
    }
  }
}

// ─── Tables ──────────────────────────────────────────────────────────────────

/// Schema of one record table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
  /// Filled from the map key when loaded from a schema file.
  #[serde(default)]
  pub name:         String,
  #[serde(default)]
  pub title:        String,
  /// Column shown as the record title.
  #[serde(default = "default_label")]
  pub label:        String,
  /// Soft-delete flag column; empty when the table has none.
  #[serde(default = "default_delete_field")]
  pub delete_field: String,
  /// Visibility flag column; empty when the table has none.
  #[serde(default = "default_hidden_field")]
  pub hidden_field: String,
  /// Tables flagged hidden are skipped by every check.
  #[serde(default)]
  pub hide_table:   bool,
  #[serde(default)]
  pub relations:    Vec<RelationDescriptor>,
}

fn default_label() -> String { "title".into() }
fn default_delete_field() -> String { "deleted".into() }
fn default_hidden_field() -> String { "hidden".into() }

impl TableSchema {
  pub fn new(name: &str) -> Self {
    Self {
      name:         name.into(),
      title:        name.into(),
      label:        default_label(),
      delete_field: default_delete_field(),
      hidden_field: default_hidden_field(),
      hide_table:   false,
      relations:    vec![],
    }
  }

  pub fn with_relation(mut self, relation: RelationDescriptor) -> Self {
    self.relations.push(relation);
    self
  }

  pub fn with_label(mut self, label: &str) -> Self {
    self.label = label.into();
    self
  }

  pub fn hidden(mut self) -> Self {
    self.hide_table = true;
    self
  }

  pub fn delete_column(&self) -> Option<&str> {
    Some(self.delete_field.as_str()).filter(|c| !c.is_empty())
  }

  pub fn hidden_column(&self) -> Option<&str> {
    Some(self.hidden_field.as_str()).filter(|c| !c.is_empty())
  }

  /// Upload folders of all file fields, deduplicated.
  pub fn upload_folders(&self) -> impl Iterator<Item = &str> {
    self
      .relations
      .iter()
      .filter(|r| r.kind == RelationKind::File)
      .filter_map(|r| r.upload_folder.as_deref())
      .filter(|f| !f.is_empty())
  }
}

/// A declared page type (`doktype`) and its label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoktypeItem {
  pub value: i64,
  pub label: String,
}

// ─── Provider ────────────────────────────────────────────────────────────────

/// Read-only access to schema metadata.
pub trait SchemaProvider {
  fn table(&self, name: &str) -> Option<&TableSchema>;

  /// All declared tables, hidden ones included, sorted by name.
  fn tables(&self) -> Vec<&TableSchema>;

  fn doktypes(&self) -> &[DoktypeItem];

  /// Tables that take part in integrity checks.
  fn checked_tables(&self) -> Vec<&TableSchema> {
    self.tables().into_iter().filter(|t| !t.hide_table).collect()
  }
}

/// An in-memory schema, typically deserialized from a schema file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "SchemaFile")]
pub struct StaticSchema {
  tables:   BTreeMap<String, TableSchema>,
  doktypes: Vec<DoktypeItem>,
}

#[derive(Deserialize)]
struct SchemaFile {
  #[serde(default)]
  tables:   BTreeMap<String, TableSchema>,
  #[serde(default)]
  doktypes: Vec<DoktypeItem>,
}

impl From<SchemaFile> for StaticSchema {
  fn from(file: SchemaFile) -> Self {
    let tables = file
      .tables
      .into_iter()
      .map(|(name, mut table)| {
        if table.title.is_empty() {
          table.title = name.clone();
        }
        table.name = name.clone();
        (name, table)
      })
      .collect();
    Self { tables, doktypes: file.doktypes }
  }
}

impl StaticSchema {
  pub fn new(
    tables: impl IntoIterator<Item = TableSchema>,
    doktypes: Vec<DoktypeItem>,
  ) -> Self {
    Self {
      tables: tables.into_iter().map(|t| (t.name.clone(), t)).collect(),
      doktypes,
    }
  }
}

impl SchemaProvider for StaticSchema {
  fn table(&self, name: &str) -> Option<&TableSchema> { self.tables.get(name) }

  fn tables(&self) -> Vec<&TableSchema> { self.tables.values().collect() }

  fn doktypes(&self) -> &[DoktypeItem] { &self.doktypes }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn descriptor_defects() {
    assert!(RelationDescriptor::select("pid_ref", "pages").defect().is_none());
    assert!(RelationDescriptor::group("items", &["*"]).defect().is_none());
    assert!(RelationDescriptor::file("image", "uploads/pics").defect().is_none());

    let mut bad_select = RelationDescriptor::select("x", "pages");
    bad_select.allowed.push("tt_content".into());
    assert!(bad_select.defect().is_some());

    assert!(RelationDescriptor::group("items", &[]).defect().is_some());
    assert!(RelationDescriptor::file("image", "").defect().is_some());
  }

  #[test]
  fn single_target_ignores_wildcard() {
    assert_eq!(
      RelationDescriptor::group("g", &["pages"]).single_target(),
      Some("pages")
    );
    assert_eq!(RelationDescriptor::group("g", &["*"]).single_target(), None);
    assert!(RelationDescriptor::group("g", &["*"]).allows("sys_log"));
    assert!(RelationDescriptor::group("g", &["pages"]).allows("pages"));
    assert!(!RelationDescriptor::group("g", &["pages"]).allows("sys_log"));
    assert_eq!(
      RelationDescriptor::group("g", &["pages", "tt_content"]).single_target(),
      None
    );
  }

  #[test]
  fn schema_file_fills_names_and_titles() {
    let json = r#"{
      "doktypes": [{ "value": 1, "label": "Standard" }],
      "tables": {
        "pages": { "title": "Page" },
        "tt_content": {
          "label": "header",
          "delete_field": "",
          "relations": [
            { "field": "records", "kind": "group", "allowed": ["pages"] }
          ]
        }
      }
    }"#;
    let schema: StaticSchema = serde_json::from_str(json).unwrap();

    let pages = schema.table("pages").unwrap();
    assert_eq!(pages.name, "pages");
    assert_eq!(pages.title, "Page");
    assert_eq!(pages.delete_column(), Some("deleted"));

    let content = schema.table("tt_content").unwrap();
    assert_eq!(content.title, "tt_content");
    assert_eq!(content.label, "header");
    assert_eq!(content.delete_column(), None);
    assert_eq!(content.relations[0].kind, RelationKind::Group);

    let names: Vec<_> = schema.tables().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["pages", "tt_content"]);
    assert_eq!(schema.doktypes().len(), 1);
  }

  #[test]
  fn hidden_tables_are_not_checked() {
    let schema = StaticSchema::new(
      [TableSchema::new("pages"), TableSchema::new("sys_log").hidden()],
      vec![],
    );
    let checked: Vec<_> =
      schema.checked_tables().iter().map(|t| t.name.clone()).collect();
    assert_eq!(checked, ["pages"]);
  }
}
