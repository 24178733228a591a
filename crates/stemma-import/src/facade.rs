//! Record-level editing facade.
//!
//! Free functions over any [`stemma_core::store::TreeStore`] that route
//! every mutation through the change ledger: validated creation with a
//! freshly allocated identifier, trailer-stamped updates, deletion with a
//! dangling-reference warning, and whole-tree export behind a synthesised
//! file envelope.

use std::cmp::Ordering;

use chrono::Utc;
use stemma_core::{
  change::{Actor, NewChange, PendingChange},
  record::{GedcomRecord, RecordKind, Xref},
  store::TreeStore,
};
use stemma_gedcom::{
  compose::{EXPORT_TRAILER, export_header, splice_xref, stamp_trailer},
  parse_record,
};

use crate::error::{Error, Result};

/// Propose a brand-new record of `kind`.
///
/// The payload must open with a blank pointer and the matching tag, e.g.
/// `0 @@ INDI` for an individual; the allocator fills the pointer in.
pub async fn create_record<S>(
  store: &S,
  tree_id: i64,
  kind: RecordKind,
  text: &str,
  actor: &Actor,
) -> Result<PendingChange>
where
  S: TreeStore,
{
  let marker = format!("0 @@ {}", kind.tag());
  let opens_with_marker = text
    .strip_prefix(&marker)
    .is_some_and(|rest| rest.is_empty() || rest.starts_with([' ', '\r', '\n']));
  if !opens_with_marker {
    return Err(Error::Core(stemma_core::Error::malformed(
      1,
      format!("a new {kind} record must open with {marker:?}"),
    )));
  }
  let parsed = parse_record(text)?;
  let xref = store
    .allocate_xref(tree_id, kind)
    .await
    .map_err(|e| Error::Store(Box::new(e)))?;
  let spliced = splice_xref(&parsed.to_string(), &xref)?;
  let new_gedcom = stamp_trailer(&spliced, &actor.name, Utc::now());
  store
    .propose(
      NewChange { tree_id, xref, old_gedcom: String::new(), new_gedcom },
      actor,
    )
    .await
    .map_err(|e| Error::Store(Box::new(e)))
}

/// Propose replacement text for an existing record.
pub async fn update_record<S>(
  store: &S,
  tree_id: i64,
  xref: &Xref,
  text: &str,
  actor: &Actor,
) -> Result<PendingChange>
where
  S: TreeStore,
{
  let current = store
    .get_record(tree_id, xref)
    .await
    .map_err(|e| Error::Store(Box::new(e)))?
    .ok_or_else(|| {
      Error::Core(stemma_core::Error::RecordNotFound(xref.to_string()))
    })?;
  let parsed = parse_record(text)?;
  if parsed.xref.as_ref() != Some(xref) {
    return Err(Error::Core(stemma_core::Error::malformed(
      1,
      "record pointer does not match the record being updated",
    )));
  }
  let new_gedcom = stamp_trailer(&parsed.to_string(), &actor.name, Utc::now());
  store
    .propose(
      NewChange {
        tree_id,
        xref: xref.clone(),
        old_gedcom: current.gedcom,
        new_gedcom,
      },
      actor,
    )
    .await
    .map_err(|e| Error::Store(Box::new(e)))
}

/// Propose deletion of a record.
///
/// Deletion does not cascade: records pointing at the target keep their
/// pointers, so remaining references are logged as a warning.
pub async fn delete_record<S>(
  store: &S,
  tree_id: i64,
  xref: &Xref,
  actor: &Actor,
) -> Result<PendingChange>
where
  S: TreeStore,
{
  let current = store
    .get_record(tree_id, xref)
    .await
    .map_err(|e| Error::Store(Box::new(e)))?
    .ok_or_else(|| {
      Error::Core(stemma_core::Error::RecordNotFound(xref.to_string()))
    })?;
  let referents = store
    .linked_to(tree_id, xref)
    .await
    .map_err(|e| Error::Store(Box::new(e)))?;
  if !referents.is_empty() {
    tracing::warn!(
      xref = %xref,
      referents = referents.len(),
      "deleting a record other records still point at",
    );
  }
  store
    .propose(
      NewChange {
        tree_id,
        xref: xref.clone(),
        old_gedcom: current.gedcom,
        new_gedcom: String::new(),
      },
      actor,
    )
    .await
    .map_err(|e| Error::Store(Box::new(e)))
}

/// Export a tree as one GEDCOM file: synthesised header, every canonical
/// record in a stable order, terminator line.
pub async fn export_tree<S>(store: &S, tree_id: i64) -> Result<String>
where
  S: TreeStore,
{
  let tree = store
    .get_tree(tree_id)
    .await
    .map_err(|e| Error::Store(Box::new(e)))?
    .ok_or(Error::Core(stemma_core::Error::TreeNotFound(tree_id)))?;
  let mut records = store
    .list_records(tree_id, None)
    .await
    .map_err(|e| Error::Store(Box::new(e)))?;
  records.sort_by(export_order);

  let mut out = export_header(&tree.settings.source_name, Utc::now());
  for record in &records {
    out.push_str(&record.gedcom);
    if !out.ends_with('\n') {
      out.push('\n');
    }
  }
  out.push_str(EXPORT_TRAILER);
  tracing::info!(tree_id, records = records.len(), "tree exported");
  Ok(out)
}

/// Individuals first, then families, sources and everything else,
/// numerically within each class so `I2` precedes `I10`.
fn export_order(a: &GedcomRecord, b: &GedcomRecord) -> Ordering {
  let rank = |r: &GedcomRecord| match r.kind() {
    RecordKind::Individual => 0,
    RecordKind::Family => 1,
    RecordKind::Source => 2,
    RecordKind::Media => 3,
  };
  rank(a)
    .cmp(&rank(b))
    .then_with(|| natural(a.xref.as_str(), b.xref.as_str()))
}

/// Compare identifiers with a shared prefix by their numeric suffix.
fn natural(a: &str, b: &str) -> Ordering {
  fn split(s: &str) -> (&str, Option<u64>) {
    let head = s.trim_end_matches(|c: char| c.is_ascii_digit());
    let number = s[head.len()..].parse().ok();
    (head, number)
  }
  let (a_head, a_number) = split(a);
  let (b_head, b_number) = split(b);
  match (a_head == b_head, a_number, b_number) {
    (true, Some(x), Some(y)) => x.cmp(&y),
    _ => a.cmp(b),
  }
}
