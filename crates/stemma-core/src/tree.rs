//! Tree — the envelope that owns records, changes and import state.
//!
//! Everything in the store is scoped to a tree: record identifiers are unique
//! per tree, the change ledger is per tree, and deleting a tree drops all of
//! its dependent rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-tree behaviour switches, stored as a JSON blob on the tree row so new
/// settings never need a schema migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeSettings {
  /// Commit proposals immediately instead of queueing them for review.
  pub auto_accept: bool,
  /// Source name written into synthesised export headers.
  pub source_name: String,
}

impl Default for TreeSettings {
  fn default() -> Self {
    TreeSettings { auto_accept: false, source_name: "STEMMA".into() }
  }
}

/// A named genealogy tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
  pub tree_id:    i64,
  pub name:       String,
  pub created_at: DateTime<Utc>,
  pub settings:   TreeSettings,
}

/// One line of the per-tree audit log. Entries are append-only and record
/// ledger resolutions, imports and other notable events in plain text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
  pub log_id:      i64,
  pub tree_id:     i64,
  pub message:     String,
  pub recorded_at: DateTime<Utc>,
}
