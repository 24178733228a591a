//! Import staging — persisted chunks of normalised GEDCOM text.
//!
//! An import writes the (already normalised) file into the store as a
//! sequence of record-aligned chunks before any record is parsed. Processing
//! then walks the chunks one at a time, marking each as imported, so a large
//! import survives interruption and resumes where it stopped. Chunk rows are
//! cleared once every chunk has been processed.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One staged slice of an import, holding UTF-8 text ending at a record
/// boundary. Concatenating all chunks of a tree in `seq` order yields the
/// normalised input byte-for-byte.
#[derive(Debug, Clone)]
pub struct StoredChunk {
  pub chunk_id: i64,
  pub tree_id:  i64,
  /// 1-based position within the import.
  pub seq:      i64,
  pub data:     Bytes,
  pub imported: bool,
}

/// Marker for one import run. Beginning a run truncates any chunks left over
/// from a prior (possibly abandoned) import of the same tree.
#[derive(Debug, Clone)]
pub struct ImportRun {
  pub run_id:     Uuid,
  pub tree_id:    i64,
  pub started_at: DateTime<Utc>,
}
