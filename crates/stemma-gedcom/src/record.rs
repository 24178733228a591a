//! Record-level parsing and splitting.
//!
//! A record is one level-0 line plus all lines beneath it. [`parse_record`]
//! validates a single record; [`split_records`] carves a normalised file
//! into record slices without copying.

use std::fmt;

use stemma_core::record::{RecordKind, Xref};

use crate::{
  error::{Error, Result},
  line::GedcomLine,
};

/// A parsed, structurally valid record.
#[derive(Debug, Clone)]
pub struct ParsedRecord {
  /// Validated label from the level-0 line; `None` when the header carries
  /// a blank pointer (`0 @@ INDI`) or no pointer at all (`0 HEAD`).
  pub xref:  Option<Xref>,
  /// The level-0 tag: `INDI`, `FAM`, `HEAD`, a vendor tag...
  pub tag:   String,
  pub lines: Vec<GedcomLine>,
}

impl ParsedRecord {
  pub fn kind(&self) -> RecordKind {
    RecordKind::classify(&self.tag)
  }

  /// True when the header carries the blank pointer an importer fills in.
  pub fn has_blank_pointer(&self) -> bool {
    self.lines.first().is_some_and(|l| l.xref.as_deref() == Some(""))
  }

  /// First line whose tag is `tag`, at any level.
  pub fn find_tag(&self, tag: &str) -> Option<&GedcomLine> {
    self.lines.iter().find(|l| l.tag == tag)
  }
}

/// Canonical text form: one LF-terminated line per [`GedcomLine`], with
/// tags uppercased, token separators written as a single space and blank
/// lines dropped. Values stay verbatim. This is the shape records are
/// stored in.
impl fmt::Display for ParsedRecord {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for line in &self.lines {
      writeln!(f, "{line}")?;
    }
    Ok(())
  }
}

/// Parse and validate one record.
///
/// Enforced structure: the first line is the only level-0 line, every line
/// tokenizes, and levels never jump upward by more than one. Blank lines are
/// tolerated and do not count as content, but do count for line numbering.
pub fn parse_record(text: &str) -> Result<ParsedRecord> {
  let mut lines: Vec<GedcomLine> = Vec::new();
  let mut header: Option<(Option<Xref>, String)> = None;

  for (idx, raw) in text.split('\n').enumerate() {
    let line_no = idx + 1;
    let stripped = raw.strip_suffix('\r').unwrap_or(raw);
    if stripped.trim().is_empty() {
      continue;
    }
    let line = GedcomLine::parse(stripped, line_no)?;

    match lines.last() {
      None => {
        if line.level != 0 {
          return Err(Error::malformed(line_no, "record must begin at level 0"));
        }
        let xref = match line.xref.as_deref() {
          Some("") | None => None,
          Some(label) => Some(Xref::new(label).ok_or_else(|| {
            Error::malformed(line_no, format!("invalid pointer label {label:?}"))
          })?),
        };
        header = Some((xref, line.tag.clone()));
      }
      Some(prev) => {
        if line.level == 0 {
          return Err(Error::malformed(line_no, "unexpected second level-0 line"));
        }
        if line.level > prev.level + 1 {
          return Err(Error::malformed(
            line_no,
            format!("level jumps from {} to {}", prev.level, line.level),
          ));
        }
      }
    }
    lines.push(line);
  }

  let Some((xref, tag)) = header else {
    return Err(Error::malformed(1, "empty record"));
  };
  Ok(ParsedRecord { xref, tag, lines })
}

/// Split normalised text into one slice per level-0 record.
///
/// Slices are verbatim (newlines included), so joining them reproduces the
/// input from the first record onward. Text before the first level-0 line is
/// returned as a leading pseudo-slice when non-blank, so callers surface it
/// as a parse error instead of silently dropping it.
pub fn split_records(text: &str) -> Vec<&str> {
  let mut starts: Vec<usize> = Vec::new();
  let mut pos = 0;
  for line in text.split_inclusive('\n') {
    if is_level0(line) {
      starts.push(pos);
    }
    pos += line.len();
  }

  let mut out = Vec::with_capacity(starts.len() + 1);
  match starts.first() {
    None => {
      if !text.trim().is_empty() {
        out.push(text);
      }
      return out;
    }
    Some(&first) if first > 0 && !text[..first].trim().is_empty() => {
      out.push(&text[..first]);
    }
    _ => {}
  }
  for (i, &start) in starts.iter().enumerate() {
    let end = starts.get(i + 1).copied().unwrap_or(text.len());
    out.push(&text[start..end]);
  }
  out
}

fn is_level0(line: &str) -> bool {
  let trimmed = line.trim_start_matches([' ', '\t']);
  trimmed.strip_prefix('0').is_some_and(|rest| rest.starts_with(' '))
}

#[cfg(test)]
mod tests {
  use super::*;

  const INDI: &str = "0 @I1@ INDI\n1 NAME John /DOE/\n1 SEX M\n";

  #[test]
  fn parses_labelled_record() {
    let r = parse_record(INDI).unwrap();
    assert_eq!(r.xref.as_ref().map(Xref::as_str), Some("I1"));
    assert_eq!(r.tag, "INDI");
    assert_eq!(r.kind(), RecordKind::Individual);
    assert_eq!(r.lines.len(), 3);
    assert!(!r.has_blank_pointer());
  }

  #[test]
  fn blank_pointer_reported() {
    let r = parse_record("0 @@ INDI\n1 SEX M\n").unwrap();
    assert!(r.xref.is_none());
    assert!(r.has_blank_pointer());
  }

  #[test]
  fn header_record_has_no_pointer() {
    let r = parse_record("0 HEAD\n1 CHAR UTF-8\n").unwrap();
    assert!(r.xref.is_none());
    assert!(!r.has_blank_pointer());
    assert_eq!(r.find_tag("CHAR").unwrap().value, "UTF-8");
  }

  #[test]
  fn unknown_header_tag_classifies_as_media() {
    let r = parse_record("0 @N1@ NOTE Some note\n").unwrap();
    assert_eq!(r.kind(), RecordKind::Media);
  }

  #[test]
  fn level_jump_rejected() {
    let err = parse_record("0 @I1@ INDI\n2 DATE 1 JAN 2000\n").unwrap_err();
    let Error::Malformed { line, .. } = err else {
      panic!("expected Malformed")
    };
    assert_eq!(line, 2);
  }

  #[test]
  fn second_level0_rejected() {
    assert!(parse_record("0 @I1@ INDI\n0 @I2@ INDI\n").is_err());
  }

  #[test]
  fn must_begin_at_level_zero() {
    assert!(parse_record("1 NAME X\n").is_err());
  }

  #[test]
  fn empty_input_rejected() {
    assert!(parse_record("").is_err());
    assert!(parse_record("\n\n").is_err());
  }

  #[test]
  fn blank_lines_tolerated_and_line_numbers_raw() {
    let r = parse_record("0 @I1@ INDI\n\n1 SEX M\n").unwrap();
    assert_eq!(r.lines.len(), 2);
    // the bad line is the 4th raw line, blank line included
    let err = parse_record("0 @I1@ INDI\n\n1 BIRT\n3 DATE X\n").unwrap_err();
    let Error::Malformed { line, .. } = err else { panic!() };
    assert_eq!(line, 4);
  }

  #[test]
  fn display_is_canonical_text() {
    let r = parse_record("0 @I1@ indi\r\n\r\n1 name  John /Doe/\r\n1 sex\r\n").unwrap();
    assert_eq!(r.to_string(), "0 @I1@ INDI\n1 NAME  John /Doe/\n1 SEX\n");
  }

  #[test]
  fn split_yields_verbatim_slices() {
    let text = "0 HEAD\n1 CHAR UTF-8\n0 @I1@ INDI\n1 SEX M\n0 TRLR\n";
    let parts = split_records(text);
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], "0 HEAD\n1 CHAR UTF-8\n");
    assert_eq!(parts[1], "0 @I1@ INDI\n1 SEX M\n");
    assert_eq!(parts[2], "0 TRLR\n");
    assert_eq!(parts.concat(), text);
  }

  #[test]
  fn split_surfaces_leading_junk() {
    let parts = split_records("garbage\n0 HEAD\n");
    assert_eq!(parts.len(), 2);
    assert!(parse_record(parts[0]).is_err());
  }

  #[test]
  fn split_of_blank_input_is_empty() {
    assert!(split_records("").is_empty());
    assert!(split_records("\n \n").is_empty());
  }
}
