//! GEDCOM line tokenizer.
//!
//! Every GEDCOM line has the shape
//!
//! ```text
//! <level> [@<label>@] <TAG> [ <value>]
//! ```
//!
//! The tokenizer is tolerant where real-world files are sloppy (leading
//! whitespace, CR-LF endings, lowercase tags) and strict where structure
//! matters (level digits, pointer delimiters, tag presence).

use std::fmt;

use crate::error::{Error, Result};

/// One tokenized GEDCOM line.
///
/// `xref` is the record label on this line: `Some("I1")` for `0 @I1@ INDI`,
/// `Some("")` for the blank pointer `0 @@ INDI` an importer fills in, `None`
/// when no pointer is present. `value` keeps the text after the tag verbatim;
/// a missing value and an empty one both yield `""`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GedcomLine {
  pub level: u8,
  pub xref:  Option<String>,
  pub tag:   String,
  pub value: String,
}

impl GedcomLine {
  /// Tokenize one line. `line_no` is 1-based and used only for errors.
  pub fn parse(raw: &str, line_no: usize) -> Result<GedcomLine> {
    let line = raw.strip_suffix('\r').unwrap_or(raw);
    let line = line.trim_start_matches([' ', '\t']);

    let digits = line.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
      return Err(Error::malformed(line_no, "missing level number"));
    }
    let level = line[..digits]
      .parse::<u8>()
      .ok()
      .filter(|l| *l <= 99)
      .ok_or_else(|| Error::malformed(line_no, "level out of range"))?;
    let rest = line[digits..]
      .strip_prefix(' ')
      .ok_or_else(|| Error::malformed(line_no, "expected space after level"))?;

    let (xref, rest) = match rest.strip_prefix('@') {
      Some(after) => {
        let close = after.find('@').ok_or_else(|| {
          Error::malformed(line_no, "unterminated pointer label")
        })?;
        let label = &after[..close];
        if label.chars().any(|c| c.is_whitespace()) {
          return Err(Error::malformed(line_no, "whitespace in pointer label"));
        }
        let rest = after[close + 1..].strip_prefix(' ').ok_or_else(|| {
          Error::malformed(line_no, "expected space after pointer label")
        })?;
        (Some(label.to_string()), rest)
      }
      None => (None, rest),
    };

    let tag_end = rest.find(' ').unwrap_or(rest.len());
    let tag = &rest[..tag_end];
    if tag.is_empty() {
      return Err(Error::malformed(line_no, "missing tag"));
    }
    if !tag.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
      return Err(Error::malformed(line_no, format!("invalid tag {tag:?}")));
    }
    let value = rest.get(tag_end + 1..).unwrap_or("").to_string();

    Ok(GedcomLine { level, xref, tag: tag.to_ascii_uppercase(), value })
  }

  /// True for custom (vendor-extension) tags, which lead with an underscore.
  pub fn is_custom_tag(&self) -> bool {
    self.tag.starts_with('_')
  }
}

impl fmt::Display for GedcomLine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.level)?;
    if let Some(label) = &self.xref {
      write!(f, " @{label}@")?;
    }
    write!(f, " {}", self.tag)?;
    if !self.value.is_empty() {
      write!(f, " {}", self.value)?;
    }
    Ok(())
  }
}
