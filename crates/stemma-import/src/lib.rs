//! GEDCOM import pipeline and record-editing facade for Stemma.
//!
//! Connects the [`stemma_gedcom`] codec to a
//! [`TreeStore`](stemma_core::store::TreeStore): imports stream raw file
//! bytes through character-set normalisation, stage the UTF-8 text as
//! record-aligned chunks and propose one ledger change per record. The
//! facade wraps single-record create, update and delete, and whole-tree
//! export.
//!
//! # Importing a file
//!
//! ```rust,ignore
//! let importer = Importer::new(store);
//! let summary = importer.import_bytes(tree_id, &bytes, &actor).await?;
//! println!("{} records imported", summary.imported);
//! ```

pub mod error;
pub mod facade;
pub mod importer;

pub use error::{Error, Result};
pub use importer::{
  ImportOptions, ImportSession, ImportSummary, Importer, SkippedRecord,
};

#[cfg(test)]
mod tests;
