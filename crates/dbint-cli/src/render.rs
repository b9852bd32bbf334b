//! Plain-text rendering of engine reports. JSON output goes straight
//! through `serde_json`.

use std::io::{self, Write};

use dbint_core::{
  orphan::RecordsOverview,
  reference::{IndexEntry, Target},
  refindex::RebuildSummary,
  tree::TreeWalk,
  validate::{DbRefReport, RelationsReport},
};

pub fn tree(out: &mut dyn Write, walk: &TreeWalk) -> io::Result<()> {
  let stats = &walk.stats;
  writeln!(
    out,
    "pages below {}: {} total, {} hidden, {} deleted",
    walk.root,
    stats.total,
    stats.hidden,
    stats.deleted.len()
  )?;
  for node in &walk.nodes {
    writeln!(out, "{:indent$}{}", "", node.page_id, indent = node.depth as usize * 2)?;
  }
  for cycle in &walk.cycles {
    writeln!(out, "cycle: page {} listed again under {}", cycle.page_id, cycle.parent_id)?;
  }
  Ok(())
}

pub fn records(out: &mut dyn Write, overview: &RecordsOverview) -> io::Result<()> {
  writeln!(out, "checked at {}", overview.checked_at)?;
  writeln!(
    out,
    "pages: {} total, {} hidden, {} deleted",
    overview.pages.total,
    overview.pages.hidden,
    overview.pages.deleted.len()
  )?;
  for doktype in &overview.doktypes {
    writeln!(out, "doktype {} ({}): {}", doktype.value, doktype.label, doktype.count)?;
  }
  for cycle in &overview.cycles {
    writeln!(out, "pid cycle: page {} under page {}", cycle.page_id, cycle.parent_id)?;
  }

  for table in &overview.tables {
    writeln!(
      out,
      "{} ({}): {} records, {} not deleted, {} lost",
      table.table,
      table.title,
      table.all,
      table.non_deleted,
      table.lost.len()
    )?;
    for lost in &table.lost {
      let r = &lost.record;
      writeln!(
        out,
        "  lost {}:{} pid={} {:?}{}{}",
        r.table,
        r.uid,
        r.pid,
        r.title,
        if r.deleted { " deleted" } else { "" },
        if lost.fixable { "" } else { " (fix its page first)" }
      )?;
    }
  }

  match overview.repaired {
    Some(true) => writeln!(out, "repair: applied")?,
    Some(false) => writeln!(out, "repair: nothing changed")?,
    None => {}
  }
  Ok(())
}

fn db_refs(out: &mut dyn Write, heading: &str, report: &DbRefReport) -> io::Result<()> {
  writeln!(
    out,
    "{heading}: {} checked, {} dangling",
    report.checked,
    report.dangling_count()
  )?;
  for refs in report.dangling.values() {
    for dangling in refs {
      let e = &dangling.entry;
      writeln!(
        out,
        "  {}:{} {}[{}] -> {} ({:?})",
        e.source_table,
        e.source_uid,
        e.source_field,
        e.position,
        target(&e.target),
        dangling.reason
      )?;
    }
  }
  Ok(())
}

fn target(target: &Target) -> String {
  match target {
    Target::Record { table, uid } => format!("{table}:{uid}"),
    Target::File { path } => path.clone(),
  }
}

pub fn relations(out: &mut dyn Write, report: &RelationsReport) -> io::Result<()> {
  writeln!(out, "checked at {}", report.checked_at)?;

  let files = &report.files;
  writeln!(
    out,
    "files: {} references, {} existing, {} missing, {} unreferenced",
    files.checked,
    files.existing.len(),
    files.missing.len(),
    files.unreferenced.len()
  )?;
  for (path, sources) in &files.missing_sources {
    for source in sources {
      writeln!(out, "  missing {path} <- {}:{} {}", source.table, source.uid, source.field)?;
    }
  }
  for (path, sources) in &files.multiple_references {
    writeln!(out, "  shared {path} by {} records", sources.len())?;
  }
  for path in &files.unreferenced {
    writeln!(out, "  unreferenced {path}")?;
  }

  db_refs(out, "select", &report.select_db)?;
  db_refs(out, "group", &report.group_db)?;

  for anomaly in &report.anomalies {
    writeln!(
      out,
      "anomaly {}:{} {} {:?}: {}",
      anomaly.table, anomaly.uid, anomaly.field, anomaly.kind, anomaly.detail
    )?;
  }
  Ok(())
}

pub fn rebuild(out: &mut dyn Write, summary: &RebuildSummary) -> io::Result<()> {
  let mode = if summary.dry_run { "check" } else { "update" };
  writeln!(
    out,
    "reference index {mode}: {} records, {} entries checked, {} kept, {} added, {} removed, {} anomalies",
    summary.records_checked,
    summary.entries_checked,
    summary.entries_kept,
    summary.entries_added,
    summary.entries_removed,
    summary.anomalies
  )?;
  if !summary.completed {
    match &summary.resume {
      Some(point) => writeln!(out, "incomplete; resume with --resume {point}")?,
      None => writeln!(out, "incomplete")?,
    }
  } else if summary.dry_run && !summary.is_clean() {
    writeln!(out, "index is out of date")?;
  }
  Ok(())
}

pub fn references(out: &mut dyn Write, entries: &[IndexEntry]) -> io::Result<()> {
  for e in entries {
    writeln!(
      out,
      "{}:{} {}[{}] ({})",
      e.source_table,
      e.source_uid,
      e.source_field,
      e.sorting,
      e.usage_str()
    )?;
  }
  if entries.is_empty() {
    writeln!(out, "no references")?;
  }
  Ok(())
}
