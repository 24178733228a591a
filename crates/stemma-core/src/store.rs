//! The `TreeStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `stemma-store-sqlite`).
//! Higher layers (`stemma-import`, `stemma-cli`) depend on this abstraction,
//! not on any concrete backend.

use std::future::Future;

use bytes::Bytes;

use crate::{
  change::{Actor, NewChange, PendingChange},
  chunk::{ImportRun, StoredChunk},
  record::{GedcomRecord, RecordKind, Xref},
  tree::{AuditEntry, Tree, TreeSettings},
};

/// Abstraction over a Stemma storage backend.
///
/// All mutations of canonical record text flow through the change ledger:
/// [`propose`](TreeStore::propose) queues a change, and only
/// [`accept_change`](TreeStore::accept_change) (or an auto-accepting
/// proposal) writes the record and its index rows, atomically. Backends must
/// serialise writes within a tree so two resolutions of the same change never
/// interleave.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait TreeStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Trees ─────────────────────────────────────────────────────────────

  /// Create and persist a new tree. Tree names are unique.
  fn create_tree<'a>(
    &'a self,
    name: &'a str,
    settings: TreeSettings,
  ) -> impl Future<Output = Result<Tree, Self::Error>> + Send + 'a;

  /// Retrieve a tree by id. Returns `None` if not found.
  fn get_tree(
    &self,
    tree_id: i64,
  ) -> impl Future<Output = Result<Option<Tree>, Self::Error>> + Send + '_;

  /// Retrieve a tree by its unique name. Returns `None` if not found.
  fn get_tree_by_name<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Future<Output = Result<Option<Tree>, Self::Error>> + Send + 'a;

  fn list_trees(
    &self,
  ) -> impl Future<Output = Result<Vec<Tree>, Self::Error>> + Send + '_;

  /// Replace a tree's settings blob.
  fn update_settings(
    &self,
    tree_id: i64,
    settings: TreeSettings,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Delete a tree and everything scoped to it: records, index rows,
  /// changes, staged chunks, counters and logs.
  fn delete_tree(
    &self,
    tree_id: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Canonical records ─────────────────────────────────────────────────

  /// Fetch one record by identifier. Returns `None` if not found.
  fn get_record<'a>(
    &'a self,
    tree_id: i64,
    xref: &'a Xref,
  ) -> impl Future<Output = Result<Option<GedcomRecord>, Self::Error>> + Send + 'a;

  /// List records of a tree, optionally restricted to one kind, ordered by
  /// identifier.
  fn list_records(
    &self,
    tree_id: i64,
    kind: Option<RecordKind>,
  ) -> impl Future<Output = Result<Vec<GedcomRecord>, Self::Error>> + Send + '_;

  /// Identifiers of records whose indexed names contain `needle`
  /// (case-insensitive). Phase-1 implementation uses SQL LIKE.
  fn find_by_name<'a>(
    &'a self,
    tree_id: i64,
    needle: &'a str,
  ) -> impl Future<Output = Result<Vec<Xref>, Self::Error>> + Send + 'a;

  /// Identifiers of records with an indexed date overlapping the inclusive
  /// day-number range. Rows with no resolvable calendar bounds never match.
  fn find_by_date_range(
    &self,
    tree_id: i64,
    from_day: i64,
    to_day: i64,
  ) -> impl Future<Output = Result<Vec<Xref>, Self::Error>> + Send + '_;

  /// Identifiers of records with an indexed place fragment containing
  /// `needle` (case-insensitive).
  fn find_by_place<'a>(
    &'a self,
    tree_id: i64,
    needle: &'a str,
  ) -> impl Future<Output = Result<Vec<Xref>, Self::Error>> + Send + 'a;

  /// Records pointing at `to`, paired with the pointing tag. Lets callers
  /// warn before a deletion leaves dangling references.
  fn linked_to<'a>(
    &'a self,
    tree_id: i64,
    to: &'a Xref,
  ) -> impl Future<Output = Result<Vec<(Xref, String)>, Self::Error>> + Send + 'a;

  // ── Identifier allocation ─────────────────────────────────────────────

  /// Reserve the next free identifier for `kind` in this tree.
  ///
  /// The returned identifier is never handed out twice, even across
  /// concurrent calls, and never collides with an identifier already used
  /// by a record or by any change row (pending or resolved).
  fn allocate_xref(
    &self,
    tree_id: i64,
    kind: RecordKind,
  ) -> impl Future<Output = Result<Xref, Self::Error>> + Send + '_;

  // ── Change ledger ─────────────────────────────────────────────────────

  /// Queue a change for review. At most one pending change may exist per
  /// record; a second proposal for the same identifier is a conflict.
  ///
  /// If `actor.auto_accept` is set the change is accepted within the same
  /// transaction and the returned row is already `accepted`.
  fn propose<'a>(
    &'a self,
    change: NewChange,
    actor: &'a Actor,
  ) -> impl Future<Output = Result<PendingChange, Self::Error>> + Send + 'a;

  /// Apply a pending change: overwrite (or create, or delete) the canonical
  /// record, replace its index rows and mark the change `accepted` — all in
  /// one transaction. Resolving a change twice, or accepting a change whose
  /// old text no longer matches the canonical record, is a conflict.
  fn accept_change<'a>(
    &'a self,
    change_id: i64,
    actor: &'a Actor,
  ) -> impl Future<Output = Result<PendingChange, Self::Error>> + Send + 'a;

  /// Mark a pending change `rejected`. The canonical record is untouched.
  fn reject_change<'a>(
    &'a self,
    change_id: i64,
    actor: &'a Actor,
  ) -> impl Future<Output = Result<PendingChange, Self::Error>> + Send + 'a;

  /// Fetch one change row by id. Returns `None` if not found.
  fn get_change(
    &self,
    change_id: i64,
  ) -> impl Future<Output = Result<Option<PendingChange>, Self::Error>> + Send + '_;

  /// All unresolved changes of a tree, oldest first.
  fn pending_changes(
    &self,
    tree_id: i64,
  ) -> impl Future<Output = Result<Vec<PendingChange>, Self::Error>> + Send + '_;

  // ── Import staging ────────────────────────────────────────────────────

  /// Start a fresh import run, truncating any staged chunks left by a
  /// previous run for this tree.
  fn begin_import(
    &self,
    tree_id: i64,
  ) -> impl Future<Output = Result<ImportRun, Self::Error>> + Send + '_;

  /// Append one chunk and return its 1-based sequence number.
  fn append_chunk(
    &self,
    tree_id: i64,
    data: Bytes,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + '_;

  /// The lowest-`seq` chunk not yet marked imported, if any.
  fn next_unimported_chunk(
    &self,
    tree_id: i64,
  ) -> impl Future<Output = Result<Option<StoredChunk>, Self::Error>> + Send + '_;

  fn mark_chunk_imported(
    &self,
    chunk_id: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Concatenate all staged chunks in `seq` order. The result is
  /// byte-identical to the normalised input that was staged.
  fn reassemble_chunks(
    &self,
    tree_id: i64,
  ) -> impl Future<Output = Result<Bytes, Self::Error>> + Send + '_;

  /// Drop all staged chunks of a tree.
  fn clear_chunks(
    &self,
    tree_id: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Audit log ─────────────────────────────────────────────────────────

  /// Append a line to the tree's audit log.
  fn append_log<'a>(
    &'a self,
    tree_id: i64,
    message: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// All audit entries of a tree, oldest first.
  fn logs(
    &self,
    tree_id: i64,
  ) -> impl Future<Output = Result<Vec<AuditEntry>, Self::Error>> + Send + '_;
}
