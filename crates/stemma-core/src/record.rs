//! Records — the fundamental unit of a Stemma tree.
//!
//! A record is a block of level-numbered GEDCOM text rooted at a level-0
//! line, e.g. `0 @I1@ INDI`. The canonical store keeps the raw text verbatim;
//! search structure is derived into index rows and can always be rebuilt from
//! the text.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The broad class of a top-level record, derived from its header tag.
///
/// The class determines the identifier prefix used by the allocator. Records
/// with tags outside the three structured classes (notes, repositories,
/// submitters, vendor extensions) all fall into the media/other bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
  Individual,
  Family,
  Source,
  Media,
}

impl RecordKind {
  pub const ALL: [RecordKind; 4] = [
    RecordKind::Individual,
    RecordKind::Family,
    RecordKind::Source,
    RecordKind::Media,
  ];

  /// The identifier prefix for records of this kind (`I`, `F`, `S`, `O`).
  pub fn prefix(self) -> char {
    match self {
      RecordKind::Individual => 'I',
      RecordKind::Family => 'F',
      RecordKind::Source => 'S',
      RecordKind::Media => 'O',
    }
  }

  /// The level-0 header tag written when creating a record of this kind.
  pub fn tag(self) -> &'static str {
    match self {
      RecordKind::Individual => "INDI",
      RecordKind::Family => "FAM",
      RecordKind::Source => "SOUR",
      RecordKind::Media => "OBJE",
    }
  }

  /// Classify a level-0 header tag. Unrecognised tags land in the
  /// media/other bucket rather than failing.
  pub fn classify(tag: &str) -> RecordKind {
    match tag {
      "INDI" => RecordKind::Individual,
      "FAM" => RecordKind::Family,
      "SOUR" => RecordKind::Source,
      _ => RecordKind::Media,
    }
  }
}

impl fmt::Display for RecordKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      RecordKind::Individual => "individual",
      RecordKind::Family => "family",
      RecordKind::Source => "source",
      RecordKind::Media => "media",
    };
    f.write_str(name)
  }
}

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Maximum length of a cross-reference identifier, per GEDCOM 5.5.1.
pub const XREF_MAX_LEN: usize = 20;

/// A cross-reference identifier, unique within one tree (e.g. `I123`).
///
/// Allocated identifiers follow `<prefix><number>`, but imported files carry
/// arbitrary labels (`SUBM1`, `X-9`), so the only enforced shape is "fits
/// inside a `@...@` pointer": non-empty, at most 20 bytes, and free of `@`,
/// whitespace and control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Xref(String);

impl Xref {
  /// Validate and wrap an identifier. Returns `None` for labels that could
  /// not round-trip through a `@...@` pointer.
  pub fn new(label: impl Into<String>) -> Option<Xref> {
    let label = label.into();
    let valid = !label.is_empty()
      && label.len() <= XREF_MAX_LEN
      && label.chars().all(|c| c != '@' && !c.is_whitespace() && !c.is_control());
    valid.then_some(Xref(label))
  }

  /// Build an allocator-shaped identifier from a kind prefix and a counter.
  pub fn from_parts(prefix: char, n: i64) -> Xref {
    Xref(format!("{prefix}{n}"))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// The kind implied by the identifier's leading character, if it follows
  /// the allocator's `<prefix><number>` shape.
  pub fn implied_kind(&self) -> Option<RecordKind> {
    let mut chars = self.0.chars();
    let prefix = chars.next()?;
    if !chars.as_str().bytes().all(|b| b.is_ascii_digit()) || chars.as_str().is_empty() {
      return None;
    }
    match prefix {
      'I' => Some(RecordKind::Individual),
      'F' => Some(RecordKind::Family),
      'S' => Some(RecordKind::Source),
      'O' => Some(RecordKind::Media),
      _ => None,
    }
  }
}

impl fmt::Display for Xref {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl AsRef<str> for Xref {
  fn as_ref(&self) -> &str {
    &self.0
  }
}

// ─── Canonical records ───────────────────────────────────────────────────────

/// A stored top-level record: verbatim GEDCOM text plus lookup metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GedcomRecord {
  pub tree_id:     i64,
  pub xref:        Xref,
  /// The raw level-0 header tag (`INDI`, `FAM`, ... or a custom tag).
  pub record_type: String,
  /// Full record text. The first line is `0 @<xref>@ <record_type>`.
  pub gedcom:      String,
  pub updated_at:  DateTime<Utc>,
}

impl GedcomRecord {
  pub fn kind(&self) -> RecordKind {
    RecordKind::classify(&self.record_type)
  }
}
