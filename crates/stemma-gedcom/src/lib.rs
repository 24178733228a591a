//! GEDCOM 5.5.1 codec for Stemma.
//!
//! Converts between raw GEDCOM bytes and [`stemma_core`] domain types:
//! character-set normalisation, record-aligned chunking, line and record
//! parsing, index-row derivation and record composition. Pure synchronous;
//! no database dependencies.
//!
//! # Quick start
//!
//! ```no_run
//! use stemma_gedcom::{parse_record, index::derive_index};
//!
//! let text = "0 @I1@ INDI\n1 NAME John /DOE/\n1 SEX M\n";
//! let record = parse_record(text).unwrap();
//! let rows = derive_index(&record);
//! println!("{} names, {} links", rows.names.len(), rows.links.len());
//! ```

pub mod chunk;
pub mod compose;
pub mod encoding;
pub mod error;
pub mod index;
pub mod line;
pub mod record;

pub use error::{Error, Result};
pub use line::GedcomLine;
pub use record::{ParsedRecord, parse_record, split_records};
