//! Error types for the stemma-gedcom codec.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("malformed record at line {line}: {reason}")]
  Malformed { line: usize, reason: String },

  #[error("unsupported encoding: {0:?}")]
  UnsupportedEncoding(String),
}

impl Error {
  pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Error {
    Error::Malformed { line, reason: reason.into() }
  }
}

impl From<Error> for stemma_core::Error {
  fn from(e: Error) -> stemma_core::Error {
    match e {
      Error::Malformed { line, reason } => {
        stemma_core::Error::MalformedRecord { line, reason }
      }
      Error::UnsupportedEncoding(name) => {
        stemma_core::Error::UnsupportedEncoding(name)
      }
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
