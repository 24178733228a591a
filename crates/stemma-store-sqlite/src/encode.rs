//! Conversions between domain types and their SQLite column encodings.
//!
//! Raw row structs mirror table layouts exactly; `into_*` methods perform
//! the fallible decoding back into `stemma-core` types.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use stemma_core::{
  change::{ChangeStatus, PendingChange},
  chunk::StoredChunk,
  record::{GedcomRecord, Xref},
  tree::{AuditEntry, Tree, TreeSettings},
};

use crate::error::{Error, Result};

/// Timestamps are stored as RFC 3339 so they sort lexicographically.
pub(crate) fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339()
}

pub(crate) fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(format!("bad timestamp {s:?}: {e}")))
}

pub(crate) fn encode_status(status: ChangeStatus) -> &'static str {
  match status {
    ChangeStatus::Pending => "pending",
    ChangeStatus::Accepted => "accepted",
    ChangeStatus::Rejected => "rejected",
  }
}

pub(crate) fn decode_status(s: &str) -> Result<ChangeStatus> {
  match s {
    "pending" => Ok(ChangeStatus::Pending),
    "accepted" => Ok(ChangeStatus::Accepted),
    "rejected" => Ok(ChangeStatus::Rejected),
    other => Err(Error::Decode(format!("unknown change status {other:?}"))),
  }
}

pub(crate) fn encode_settings(settings: &TreeSettings) -> Result<String> {
  Ok(serde_json::to_string(settings)?)
}

pub(crate) fn decode_settings(s: &str) -> Result<TreeSettings> {
  Ok(serde_json::from_str(s)?)
}

pub(crate) fn decode_xref(s: &str) -> Result<Xref> {
  Xref::new(s).ok_or_else(|| Error::Decode(format!("bad xref {s:?}")))
}

/// Raw database row for a tree, before decoding.
pub(crate) struct RawTree {
  pub tree_id:    i64,
  pub name:       String,
  pub created_at: String,
  pub settings:   String,
}

impl RawTree {
  pub(crate) fn into_tree(self) -> Result<Tree> {
    Ok(Tree {
      tree_id:    self.tree_id,
      name:       self.name,
      created_at: decode_dt(&self.created_at)?,
      settings:   decode_settings(&self.settings)?,
    })
  }
}

/// Raw database row for a record, before decoding.
pub(crate) struct RawRecord {
  pub tree_id:     i64,
  pub xref:        String,
  pub record_type: String,
  pub gedcom:      String,
  pub updated_at:  String,
}

impl RawRecord {
  pub(crate) fn into_record(self) -> Result<GedcomRecord> {
    Ok(GedcomRecord {
      tree_id:     self.tree_id,
      xref:        decode_xref(&self.xref)?,
      record_type: self.record_type,
      gedcom:      self.gedcom,
      updated_at:  decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw database row for a change, before decoding.
pub(crate) struct RawChange {
  pub change_id:   i64,
  pub tree_id:     i64,
  pub xref:        String,
  pub old_gedcom:  String,
  pub new_gedcom:  String,
  pub status:      String,
  pub actor:       String,
  pub recorded_at: String,
}

impl RawChange {
  pub(crate) fn into_change(self) -> Result<PendingChange> {
    Ok(PendingChange {
      change_id:   self.change_id,
      tree_id:     self.tree_id,
      xref:        decode_xref(&self.xref)?,
      old_gedcom:  self.old_gedcom,
      new_gedcom:  self.new_gedcom,
      status:      decode_status(&self.status)?,
      actor:       self.actor,
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}

/// Raw database row for a staged chunk, before decoding.
pub(crate) struct RawChunk {
  pub chunk_id: i64,
  pub tree_id:  i64,
  pub seq:      i64,
  pub data:     Vec<u8>,
  pub imported: i64,
}

impl RawChunk {
  pub(crate) fn into_chunk(self) -> StoredChunk {
    StoredChunk {
      chunk_id: self.chunk_id,
      tree_id:  self.tree_id,
      seq:      self.seq,
      data:     Bytes::from(self.data),
      imported: self.imported != 0,
    }
  }
}

/// Raw database row for an audit log line, before decoding.
pub(crate) struct RawAuditEntry {
  pub log_id:      i64,
  pub tree_id:     i64,
  pub message:     String,
  pub recorded_at: String,
}

impl RawAuditEntry {
  pub(crate) fn into_entry(self) -> Result<AuditEntry> {
    Ok(AuditEntry {
      log_id:      self.log_id,
      tree_id:     self.tree_id,
      message:     self.message,
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}
