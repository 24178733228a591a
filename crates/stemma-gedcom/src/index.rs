//! Index-row derivation.
//!
//! Rows are a pure function of one record's text: names from `NAME` lines
//! and their piece sub-lines, dates from every `DATE` line attributed to its
//! enclosing fact, place hierarchy fragments from `PLAC` lines, and link
//! rows from every pointer-shaped value. The `CHAN` trailer subtree is never
//! indexed. Derivation never fails; values that do not parse are indexed as
//! opaque.

use chrono::{Datelike, Months, NaiveDate};
use stemma_core::{
  index::{DateRow, IndexRows, LinkRow, NameRow, PlaceRow},
  record::Xref,
};

use crate::{line::GedcomLine, record::ParsedRecord};

/// Derive every index row for one record.
pub fn derive_index(record: &ParsedRecord) -> IndexRows {
  let mut rows = IndexRows::default();
  let lines = &record.lines;
  // tag stack attributing each line to its enclosing fact
  let mut stack: Vec<String> = Vec::new();

  for (i, line) in lines.iter().enumerate() {
    stack.truncate(line.level as usize);
    let parent = stack.last().cloned().unwrap_or_default();
    stack.push(line.tag.clone());

    // edit timestamps live in the trailer, not in the record's facts
    if stack.get(1).is_some_and(|t| t == "CHAN") {
      continue;
    }

    match line.tag.as_str() {
      "NAME" if line.level == 1 => {
        rows.names.push(name_row(line, &lines[i + 1..]));
      }
      "DATE" if line.level >= 1 => {
        rows.dates.push(date_row(&parent, &line.value));
      }
      "PLAC" if line.level >= 1 => {
        place_rows(&line.value, &mut rows.places);
      }
      _ => {}
    }

    if line.level >= 1
      && let Some(target) = pointer_value(&line.value)
      && let Some(to_xref) = Xref::new(target)
    {
      rows.links.push(LinkRow { to_xref, tag: line.tag.clone() });
    }
  }
  rows
}

/// A value of the exact shape `@label@` points at another record.
fn pointer_value(value: &str) -> Option<&str> {
  let inner = value.strip_prefix('@')?.strip_suffix('@')?;
  (!inner.is_empty() && !inner.contains('@') && !inner.starts_with('#'))
    .then_some(inner)
}

// ─── Names ───────────────────────────────────────────────────────────────────

/// Split `given /Surname/` form; explicit `GIVN`/`SURN` piece lines under
/// the name override the slash form.
fn name_row(line: &GedcomLine, rest: &[GedcomLine]) -> NameRow {
  let value = line.value.trim();
  let mut given = String::new();
  let mut surname = String::new();
  match value.find('/') {
    Some(open) => {
      given = value[..open].trim().to_string();
      let after = &value[open + 1..];
      surname = match after.find('/') {
        Some(close) => after[..close].trim().to_string(),
        None => after.trim().to_string(),
      };
    }
    None => given = value.to_string(),
  }
  for sub in rest.iter().take_while(|l| l.level >= 2) {
    if sub.level == 2 {
      match sub.tag.as_str() {
        "GIVN" => given = sub.value.trim().to_string(),
        "SURN" => surname = sub.value.trim().to_string(),
        _ => {}
      }
    }
  }
  let despaced = value.replace('/', " ");
  let full = despaced.split_whitespace().collect::<Vec<_>>().join(" ");
  NameRow { full, given, surname }
}

// ─── Places ──────────────────────────────────────────────────────────────────

fn place_rows(value: &str, out: &mut Vec<PlaceRow>) {
  let parts = value.split(',').map(str::trim).filter(|p| !p.is_empty());
  for (level, name) in parts.enumerate() {
    out.push(PlaceRow { name: name.to_string(), level: level as u32 });
  }
}

// ─── Dates ───────────────────────────────────────────────────────────────────

fn date_row(fact: &str, raw: &str) -> DateRow {
  let (day_min, day_max) = parse_bounds(raw).unwrap_or((None, None));
  DateRow {
    fact: fact.to_string(),
    raw: raw.trim().to_string(),
    day_min,
    day_max,
  }
}

/// Bounds of a GEDCOM date phrase as days from the common era. `None` on a
/// side marks an open range (`BEF`, `AFT`, one-sided `FROM`/`TO`); a phrase
/// that is not a Gregorian date at all yields `None` overall and the row is
/// kept opaque.
fn parse_bounds(raw: &str) -> Option<(Option<i64>, Option<i64>)> {
  let text = raw.trim().to_ascii_uppercase();
  let mut words: Vec<&str> = text.split_whitespace().collect();
  // calendar escapes: only the default (Gregorian) calendar gets day math
  if let Some(first) = words.first() {
    if *first == "@#DGREGORIAN@" {
      words.remove(0);
    } else if first.starts_with("@#") {
      return None;
    }
  }
  let first = *words.first()?;
  match first {
    "BET" => {
      let and = words.iter().position(|w| *w == "AND")?;
      let (lo, _) = parse_calendar(&words[1..and])?;
      let (_, hi) = parse_calendar(&words[and + 1..])?;
      Some((Some(lo), Some(hi)))
    }
    "FROM" => match words.iter().position(|w| *w == "TO") {
      Some(to) => {
        let (lo, _) = parse_calendar(&words[1..to])?;
        let (_, hi) = parse_calendar(&words[to + 1..])?;
        Some((Some(lo), Some(hi)))
      }
      None => {
        let (lo, _) = parse_calendar(&words[1..])?;
        Some((Some(lo), None))
      }
    },
    "TO" => {
      let (_, hi) = parse_calendar(&words[1..])?;
      Some((None, Some(hi)))
    }
    "BEF" => {
      let (lo, _) = parse_calendar(&words[1..])?;
      Some((None, Some(lo - 1)))
    }
    "AFT" => {
      let (_, hi) = parse_calendar(&words[1..])?;
      Some((Some(hi + 1), None))
    }
    "ABT" | "EST" | "CAL" => {
      let (lo, hi) = parse_calendar(&words[1..])?;
      Some((Some(lo), Some(hi)))
    }
    _ => {
      let (lo, hi) = parse_calendar(&words)?;
      Some((Some(lo), Some(hi)))
    }
  }
}

/// `[day] [month] year` → inclusive day-number bounds. A bare year spans the
/// whole year, a month-year the whole month.
fn parse_calendar(words: &[&str]) -> Option<(i64, i64)> {
  match words {
    [y] => {
      let y = parse_year(y)?;
      span(
        NaiveDate::from_ymd_opt(y, 1, 1)?,
        NaiveDate::from_ymd_opt(y, 12, 31)?,
      )
    }
    [m, y] => {
      let m = month_number(m)?;
      let y = parse_year(y)?;
      let first = NaiveDate::from_ymd_opt(y, m, 1)?;
      let last = first.checked_add_months(Months::new(1))?.pred_opt()?;
      span(first, last)
    }
    [d, m, y] => {
      let d: u32 = d.parse().ok()?;
      let m = month_number(m)?;
      let y = parse_year(y)?;
      let date = NaiveDate::from_ymd_opt(y, m, d)?;
      span(date, date)
    }
    _ => None,
  }
}

fn span(lo: NaiveDate, hi: NaiveDate) -> Option<(i64, i64)> {
  Some((lo.num_days_from_ce() as i64, hi.num_days_from_ce() as i64))
}

fn parse_year(word: &str) -> Option<i32> {
  let y: i32 = word.parse().ok()?;
  (1..=9999).contains(&y).then_some(y)
}

fn month_number(word: &str) -> Option<u32> {
  let n = match word {
    "JAN" => 1,
    "FEB" => 2,
    "MAR" => 3,
    "APR" => 4,
    "MAY" => 5,
    "JUN" => 6,
    "JUL" => 7,
    "AUG" => 8,
    "SEP" => 9,
    "OCT" => 10,
    "NOV" => 11,
    "DEC" => 12,
    _ => return None,
  };
  Some(n)
}

#[cfg(test)]
mod tests {
  use stemma_core::record::Xref;

  use super::*;
  use crate::record::parse_record;

  fn days(y: i32, m: u32, d: u32) -> i64 {
    NaiveDate::from_ymd_opt(y, m, d).unwrap().num_days_from_ce() as i64
  }

  #[test]
  fn name_pieces_from_slash_form() {
    let r = parse_record("0 @I1@ INDI\n1 NAME John /DOE/\n").unwrap();
    let rows = derive_index(&r);
    assert_eq!(rows.names.len(), 1);
    let n = &rows.names[0];
    assert_eq!(n.full, "John DOE");
    assert_eq!(n.given, "John");
    assert_eq!(n.surname, "DOE");
  }

  #[test]
  fn explicit_pieces_override_slash_form() {
    let text = "0 @I1@ INDI\n1 NAME J /D/\n2 GIVN Johannes\n2 SURN Doeson\n";
    let rows = derive_index(&parse_record(text).unwrap());
    assert_eq!(rows.names[0].given, "Johannes");
    assert_eq!(rows.names[0].surname, "Doeson");
  }

  #[test]
  fn multiple_names_all_indexed() {
    let text = "0 @I1@ INDI\n1 NAME A /B/\n1 NAME C /D/\n2 TYPE aka\n";
    let rows = derive_index(&parse_record(text).unwrap());
    assert_eq!(rows.names.len(), 2);
  }

  #[test]
  fn date_attributed_to_enclosing_fact() {
    let text = "0 @I1@ INDI\n1 BIRT\n2 DATE 22 AUG 1984\n2 PLAC Springfield\n";
    let rows = derive_index(&parse_record(text).unwrap());
    assert_eq!(rows.dates.len(), 1);
    let d = &rows.dates[0];
    assert_eq!(d.fact, "BIRT");
    assert_eq!(d.day_min, Some(days(1984, 8, 22)));
    assert_eq!(d.day_max, Some(days(1984, 8, 22)));
  }

  #[test]
  fn year_and_month_span_their_range() {
    let text = "0 @I1@ INDI\n1 BIRT\n2 DATE 1984\n1 DEAT\n2 DATE FEB 2000\n";
    let rows = derive_index(&parse_record(text).unwrap());
    assert_eq!(rows.dates[0].day_min, Some(days(1984, 1, 1)));
    assert_eq!(rows.dates[0].day_max, Some(days(1984, 12, 31)));
    assert_eq!(rows.dates[1].day_min, Some(days(2000, 2, 1)));
    assert_eq!(rows.dates[1].day_max, Some(days(2000, 2, 29)));
  }

  #[test]
  fn ranges_and_open_ends() {
    let text = concat!(
      "0 @I1@ INDI\n",
      "1 BIRT\n2 DATE BET 1850 AND 1860\n",
      "1 DEAT\n2 DATE BEF 12 JAN 1900\n",
      "1 BURI\n2 DATE AFT 1900\n",
      "1 RESI\n2 DATE FROM 1880 TO 1885\n",
    );
    let rows = derive_index(&parse_record(text).unwrap());
    assert_eq!(rows.dates[0].day_min, Some(days(1850, 1, 1)));
    assert_eq!(rows.dates[0].day_max, Some(days(1860, 12, 31)));
    assert_eq!(rows.dates[1].day_min, None);
    assert_eq!(rows.dates[1].day_max, Some(days(1900, 1, 12) - 1));
    assert_eq!(rows.dates[2].day_min, Some(days(1900, 12, 31) + 1));
    assert_eq!(rows.dates[2].day_max, None);
    assert_eq!(rows.dates[3].day_min, Some(days(1880, 1, 1)));
    assert_eq!(rows.dates[3].day_max, Some(days(1885, 12, 31)));
  }

  #[test]
  fn unparseable_date_kept_opaque() {
    let text = "0 @I1@ INDI\n1 BIRT\n2 DATE before the war\n";
    let rows = derive_index(&parse_record(text).unwrap());
    let d = &rows.dates[0];
    assert_eq!(d.raw, "before the war");
    assert_eq!(d.day_min, None);
    assert_eq!(d.day_max, None);
  }

  #[test]
  fn non_gregorian_calendar_kept_opaque() {
    let text = "0 @I1@ INDI\n1 BIRT\n2 DATE @#DJULIAN@ 1 JAN 1700\n";
    let rows = derive_index(&parse_record(text).unwrap());
    assert_eq!(rows.dates[0].day_min, None);
  }

  #[test]
  fn custom_fact_dates_indexed() {
    let text = "0 @I1@ INDI\n1 _MILT\n2 DATE 1944\n";
    let rows = derive_index(&parse_record(text).unwrap());
    assert_eq!(rows.dates[0].fact, "_MILT");
    assert!(rows.dates[0].day_min.is_some());
  }

  #[test]
  fn place_hierarchy_fragments() {
    let text = "0 @I1@ INDI\n1 BIRT\n2 PLAC Springfield, Sangamon, Illinois\n";
    let rows = derive_index(&parse_record(text).unwrap());
    assert_eq!(rows.places.len(), 3);
    assert_eq!(rows.places[0], PlaceRow { name: "Springfield".into(), level: 0 });
    assert_eq!(rows.places[2], PlaceRow { name: "Illinois".into(), level: 2 });
  }

  #[test]
  fn pointer_values_become_links() {
    let text = "0 @F1@ FAM\n1 HUSB @I1@\n1 WIFE @I2@\n1 CHIL @I3@\n";
    let rows = derive_index(&parse_record(text).unwrap());
    assert_eq!(rows.links.len(), 3);
    assert_eq!(rows.links[0].tag, "HUSB");
    assert_eq!(rows.links[0].to_xref, Xref::new("I1").unwrap());
  }

  #[test]
  fn non_pointer_values_are_not_links() {
    let text = "0 @I1@ INDI\n1 NOTE not @ a pointer\n1 EMAIL a@b\n";
    let rows = derive_index(&parse_record(text).unwrap());
    assert!(rows.links.is_empty());
  }

  #[test]
  fn chan_trailer_not_indexed() {
    let text = concat!(
      "0 @I1@ INDI\n",
      "1 BIRT\n2 DATE 1900\n",
      "1 CHAN\n2 DATE 22 AUG 2026\n3 TIME 10:15:00\n2 _USER alice\n",
    );
    let rows = derive_index(&parse_record(text).unwrap());
    assert_eq!(rows.dates.len(), 1);
    assert_eq!(rows.dates[0].fact, "BIRT");
  }

  #[test]
  fn same_text_same_rows() {
    let text = "0 @I1@ INDI\n1 NAME A /B/\n1 BIRT\n2 DATE 1900\n2 PLAC X, Y\n1 FAMS @F1@\n";
    let r = parse_record(text).unwrap();
    assert_eq!(derive_index(&r), derive_index(&r));
  }
}
