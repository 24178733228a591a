//! Record composition: pointer splicing, change trailers and export framing.

use chrono::{DateTime, Utc};
use stemma_core::record::Xref;

use crate::error::{Error, Result};

/// Fill a blank pointer with an allocated identifier.
///
/// The record text must begin `0 @@`; the label lands at byte offset 3,
/// between the `@` pair, leaving every other byte untouched.
pub fn splice_xref(text: &str, xref: &Xref) -> Result<String> {
  if !text.starts_with("0 @@") {
    return Err(Error::malformed(1, "record has no blank pointer to fill"));
  }
  let mut out = String::with_capacity(text.len() + xref.as_str().len());
  out.push_str("0 @");
  out.push_str(xref.as_str());
  out.push_str(&text[3..]);
  Ok(out)
}

/// Replace any change trailer with a fresh one naming `actor` and `at`.
///
/// The incoming file's own `1 CHAN` subtree is dropped; the stored text
/// always ends with a trailer written by this system:
///
/// ```text
/// 1 CHAN
/// 2 DATE 22 AUG 2026
/// 3 TIME 14:03:05
/// 2 _USER alice
/// ```
pub fn stamp_trailer(text: &str, actor: &str, at: DateTime<Utc>) -> String {
  let mut out = String::with_capacity(text.len() + 64);
  let mut in_chan = false;
  for raw in text.split('\n') {
    let line = raw.strip_suffix('\r').unwrap_or(raw);
    if line.trim().is_empty() {
      continue;
    }
    let level = leading_level(line);
    if in_chan {
      if level.is_some_and(|l| l >= 2) {
        continue;
      }
      in_chan = false;
    }
    if level == Some(1) && is_chan(line) {
      in_chan = true;
      continue;
    }
    out.push_str(line);
    out.push('\n');
  }
  out.push_str("1 CHAN\n2 DATE ");
  out.push_str(&calendar_date(at));
  out.push_str("\n3 TIME ");
  out.push_str(&at.format("%H:%M:%S").to_string());
  out.push_str("\n2 _USER ");
  out.push_str(actor);
  out.push('\n');
  out
}

/// GEDCOM calendar form of a timestamp's date, e.g. `3 MAR 2024`.
pub fn calendar_date(at: DateTime<Utc>) -> String {
  at.format("%-d %b %Y").to_string().to_ascii_uppercase()
}

fn leading_level(line: &str) -> Option<u8> {
  let digits = line.bytes().take_while(|b| b.is_ascii_digit()).count();
  if digits == 0 {
    return None;
  }
  line[..digits].parse().ok()
}

fn is_chan(line: &str) -> bool {
  let digits = line.bytes().take_while(|b| b.is_ascii_digit()).count();
  let rest = &line[digits..];
  rest == " CHAN" || rest.starts_with(" CHAN ")
}

// ─── Export framing ──────────────────────────────────────────────────────────

/// Synthesised file header for exports. The stored records carry no header,
/// so one is written fresh, always declaring UTF-8.
pub fn export_header(source_name: &str, at: DateTime<Utc>) -> String {
  format!(
    "0 HEAD\n1 SOUR {source_name}\n1 DATE {}\n1 GEDC\n2 VERS 5.5.1\n2 FORM LINEAGE-LINKED\n1 CHAR UTF-8\n",
    calendar_date(at),
  )
}

/// Terminator line closing an export.
pub const EXPORT_TRAILER: &str = "0 TRLR\n";
