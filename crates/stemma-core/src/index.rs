//! Index rows — denormalised search structure derived from record text.
//!
//! Index rows are a pure function of one record's GEDCOM text. They are
//! replaced wholesale whenever the canonical text changes and can be rebuilt
//! from scratch at any time; the text is the only source of truth.

use serde::{Deserialize, Serialize};

use crate::record::Xref;

/// A personal name split into its GEDCOM pieces. `full` is the display form
/// with the surname slashes removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRow {
  pub full:    String,
  pub given:   String,
  pub surname: String,
}

/// A dated fact. `day_min`/`day_max` bound the date as days from the common
/// era; `None` marks an open end (`BEF`/`AFT`). Both `None` means the raw
/// text did not parse as a date and is indexed as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRow {
  /// Tag of the enclosing fact (`BIRT`, `DEAT`, `MARR`, custom tags...).
  pub fact:    String,
  pub raw:     String,
  pub day_min: Option<i64>,
  pub day_max: Option<i64>,
}

/// One component of a place hierarchy. Level 0 is the most specific part:
/// `Springfield, Sangamon, Illinois` yields levels 0, 1 and 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceRow {
  pub name:  String,
  pub level: u32,
}

/// A cross-reference from this record to another (`FAMS`, `HUSB`, `CHIL`,
/// `SOUR` citations, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRow {
  pub to_xref: Xref,
  pub tag:     String,
}

/// Everything derived from one record, ready to swap into the index tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRows {
  pub names:  Vec<NameRow>,
  pub dates:  Vec<DateRow>,
  pub places: Vec<PlaceRow>,
  pub links:  Vec<LinkRow>,
}

impl IndexRows {
  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
      && self.dates.is_empty()
      && self.places.is_empty()
      && self.links.is_empty()
  }
}
