//! Error types for `stemma-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("tree not found: {0}")]
  TreeNotFound(i64),

  #[error("record not found: {0}")]
  RecordNotFound(String),

  #[error("change not found: {0}")]
  ChangeNotFound(i64),

  #[error("malformed record at line {line}: {reason}")]
  MalformedRecord { line: usize, reason: String },

  #[error("unsupported encoding: {0:?}")]
  UnsupportedEncoding(String),

  #[error("identifier space exhausted for prefix {0:?}")]
  AllocationExhausted(char),

  #[error("change conflict: {0}")]
  ChangeConflict(#[from] Conflict),
}

/// Why a ledger operation could not proceed. Every variant means the caller's
/// view of the record or change is stale.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Conflict {
  #[error("change {0} is already resolved")]
  AlreadyResolved(i64),

  #[error("a pending change already exists for record {0}")]
  PendingExists(String),

  #[error("record {0} was modified outside the change ledger")]
  RecordMutated(String),

  #[error("record {0} no longer exists")]
  RecordMissing(String),
}

impl Error {
  /// Shorthand for a [`Error::MalformedRecord`] with a 1-based line number.
  pub fn malformed(line: usize, reason: impl Into<String>) -> Self {
    Error::MalformedRecord { line, reason: reason.into() }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
