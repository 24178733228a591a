//! Error type for the import pipeline and facade.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("codec error: {0}")]
  Gedcom(#[from] stemma_gedcom::Error),

  #[error("core error: {0}")]
  Core(#[from] stemma_core::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
