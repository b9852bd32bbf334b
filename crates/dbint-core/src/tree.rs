//! Page tree walk: the universe of known container ids plus page statistics.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;

use crate::{
  Error, Integrity, Result,
  record::{NO_CONTAINER, PAGES, ROOT},
  schema::{SchemaProvider, TableSchema},
  store::RecordStore,
};

// ─── Results ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TreeNode {
  pub page_id:   i64,
  /// `None` only for the walk's root.
  pub parent_id: Option<i64>,
  pub depth:     u32,
}

/// Exact counts over every page reached by the walk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageStatistics {
  pub total:    u64,
  pub hidden:   u64,
  /// Uids of deleted pages, in visit order.
  pub deleted:  Vec<i64>,
  pub doktypes: BTreeMap<i64, u64>,
}

impl PageStatistics {
  fn count(&mut self, uid: i64, doktype: i64, hidden: bool, deleted: bool) {
    self.total += 1;
    if hidden {
      self.hidden += 1;
    }
    if deleted {
      self.deleted.push(uid);
    }
    *self.doktypes.entry(doktype).or_default() += 1;
  }
}

/// A page reached a second time. The second visit was skipped, so the walk
/// below this point is incomplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleWarning {
  pub page_id:   i64,
  /// The page whose children listed `page_id` again.
  pub parent_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeWalk {
  pub root:   i64,
  /// Visited nodes in breadth-first order, starting with the root.
  pub nodes:  Vec<TreeNode>,
  /// Ids of all pages below the root.
  pub ids:    BTreeSet<i64>,
  pub stats:  PageStatistics,
  pub cycles: Vec<CycleWarning>,
}

impl TreeWalk {
  /// Container ids a record may legitimately point at: every walked page,
  /// the root, and the sentinels `-1` and `0`.
  pub fn known_ids(&self) -> BTreeSet<i64> {
    let mut known = self.ids.clone();
    known.extend([NO_CONTAINER, ROOT, self.root]);
    known
  }

  pub fn has_cycles(&self) -> bool { !self.cycles.is_empty() }
}

// ─── Walk ────────────────────────────────────────────────────────────────────

impl<S, R> Integrity<'_, S, R>
where
  S: SchemaProvider,
  R: RecordStore,
{
  /// Walk the page tree below `root` (0 for the whole tree).
  pub fn build_tree(&self, root: i64) -> Result<TreeWalk> {
    let pages = self.table(PAGES)?;
    let walk = walk_pages(pages, self.records, root)?;

    tracing::debug!(
      root,
      pages = walk.stats.total,
      hidden = walk.stats.hidden,
      deleted = walk.stats.deleted.len(),
      "page tree walked"
    );
    Ok(walk)
  }
}

/// Breadth-first walk with an explicit visited set; never recurses.
pub(crate) fn walk_pages<R: RecordStore>(
  pages: &TableSchema,
  store: &R,
  root: i64,
) -> Result<TreeWalk> {
  let mut walk = TreeWalk {
    root,
    nodes: vec![TreeNode { page_id: root, parent_id: None, depth: 0 }],
    ids: BTreeSet::new(),
    stats: PageStatistics::default(),
    cycles: vec![],
  };

  let mut visited = BTreeSet::from([root]);
  let mut queue = VecDeque::from([(root, 0u32)]);

  while let Some((parent, depth)) = queue.pop_front() {
    let children = store.child_pages(pages, parent).map_err(Error::storage)?;

    for page in children {
      if !visited.insert(page.uid) {
        tracing::warn!(
          page = page.uid,
          parent,
          "page reached twice; pid cycle in page tree"
        );
        walk.cycles.push(CycleWarning { page_id: page.uid, parent_id: parent });
        continue;
      }

      walk.stats.count(page.uid, page.doktype, page.hidden, page.deleted);
      walk.ids.insert(page.uid);
      walk.nodes.push(TreeNode {
        page_id:   page.uid,
        parent_id: Some(parent),
        depth:     depth + 1,
      });
      queue.push_back((page.uid, depth + 1));
    }
  }

  Ok(walk)
}
