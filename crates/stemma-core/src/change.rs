//! Pending changes — the moderation ledger.
//!
//! Every mutation of a record is expressed as a change row holding the full
//! old and new text. A change is born `pending` and moves exactly once to
//! `accepted` or `rejected`; only acceptance touches the canonical record.
//! Resolved rows are never deleted, so the ledger doubles as edit history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::Xref;

/// Where a change sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
  Pending,
  Accepted,
  Rejected,
}

impl ChangeStatus {
  pub fn is_pending(&self) -> bool {
    matches!(self, Self::Pending)
  }
}

/// One proposed mutation of one record.
///
/// An empty `old_gedcom` marks a creation; an empty `new_gedcom` marks a
/// deletion; both non-empty is an update. Both empty is rejected at proposal
/// time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingChange {
  pub change_id:   i64,
  pub tree_id:     i64,
  pub xref:        Xref,
  pub old_gedcom:  String,
  pub new_gedcom:  String,
  pub status:      ChangeStatus,
  /// Name of the user who proposed the change.
  pub actor:       String,
  pub recorded_at: DateTime<Utc>,
}

impl PendingChange {
  pub fn is_creation(&self) -> bool {
    self.old_gedcom.is_empty() && !self.new_gedcom.is_empty()
  }

  pub fn is_deletion(&self) -> bool {
    !self.old_gedcom.is_empty() && self.new_gedcom.is_empty()
  }
}

/// Input to [`TreeStore::propose`](crate::store::TreeStore::propose).
#[derive(Debug, Clone)]
pub struct NewChange {
  pub tree_id:    i64,
  pub xref:       Xref,
  pub old_gedcom: String,
  pub new_gedcom: String,
}

/// Who is proposing or resolving changes, and whether their proposals commit
/// immediately instead of queueing for review.
#[derive(Debug, Clone)]
pub struct Actor {
  pub name:        String,
  pub auto_accept: bool,
}

impl Actor {
  pub fn new(name: impl Into<String>) -> Actor {
    Actor { name: name.into(), auto_accept: false }
  }

  pub fn auto_accepting(name: impl Into<String>) -> Actor {
    Actor { name: name.into(), auto_accept: true }
  }
}
