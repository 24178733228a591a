//! Error type for `stemma-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] stemma_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// A stored column failed to decode back into its domain type.
  #[error("column decode error: {0}")]
  Decode(String),

  #[error("tree name already in use: {0}")]
  TreeNameTaken(String),

  #[error("chunk not found: {0}")]
  ChunkNotFound(i64),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
