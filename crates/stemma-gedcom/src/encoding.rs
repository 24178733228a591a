//! Character-set detection and streaming normalisation to UTF-8.
//!
//! Legacy GEDCOM files arrive in ANSEL, Windows-1252 or UTF-16 at least as
//! often as UTF-8. Everything is normalised exactly once, at import time,
//! before any text is staged or parsed; the rest of the system only ever
//! sees UTF-8. Decoding is streaming: an input block may end mid-character,
//! so the decoder carries partial state from one push to the next. Bytes
//! with no defined mapping decode to U+FFFD rather than failing the import.

use crate::error::{Error, Result};

/// A character set this codec can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
  Utf8,
  Utf16Le,
  Utf16Be,
  Ansel,
  Cp1252,
  Ascii,
}

impl Encoding {
  /// Resolve a declared character-set name, as seen on `1 CHAR` lines.
  /// `UNICODE` is GEDCOM's historical name for UTF-16; without a byte-order
  /// mark it is read big-endian.
  pub fn from_name(name: &str) -> Result<Encoding> {
    match name.trim().to_ascii_uppercase().as_str() {
      "UTF-8" | "UTF8" => Ok(Encoding::Utf8),
      "UNICODE" | "UTF-16" | "UTF16" | "UTF-16BE" => Ok(Encoding::Utf16Be),
      "UTF-16LE" => Ok(Encoding::Utf16Le),
      "ANSEL" => Ok(Encoding::Ansel),
      "ANSI" | "CP1252" | "WINDOWS-1252" => Ok(Encoding::Cp1252),
      "ASCII" | "US-ASCII" => Ok(Encoding::Ascii),
      _ => Err(Error::UnsupportedEncoding(name.trim().to_string())),
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      Encoding::Utf8 => "UTF-8",
      Encoding::Utf16Le => "UTF-16LE",
      Encoding::Utf16Be => "UTF-16BE",
      Encoding::Ansel => "ANSEL",
      Encoding::Cp1252 => "CP1252",
      Encoding::Ascii => "ASCII",
    }
  }

  fn bom(self) -> &'static [u8] {
    match self {
      Encoding::Utf8 => &[0xEF, 0xBB, 0xBF],
      Encoding::Utf16Le => &[0xFF, 0xFE],
      Encoding::Utf16Be => &[0xFE, 0xFF],
      _ => &[],
    }
  }
}

// ─── Detection ───────────────────────────────────────────────────────────────

/// Byte-order-mark detection: the encoding plus the mark's length.
pub fn sniff_bom(head: &[u8]) -> Option<(Encoding, usize)> {
  if head.starts_with(&[0xEF, 0xBB, 0xBF]) {
    return Some((Encoding::Utf8, 3));
  }
  if head.starts_with(&[0xFF, 0xFE]) {
    return Some((Encoding::Utf16Le, 2));
  }
  if head.starts_with(&[0xFE, 0xFF]) {
    return Some((Encoding::Utf16Be, 2));
  }
  None
}

/// Resolve the character set of an import from its first bytes.
///
/// Precedence: a byte-order mark wins over everything, then the NUL pattern
/// of BOM-less UTF-16, then the `1 CHAR` declaration inside the header, then
/// the caller's `declared` name. Files revealing nothing are read as UTF-8.
pub fn detect(head: &[u8], declared: Option<&str>) -> Result<Encoding> {
  if let Some((enc, _)) = sniff_bom(head) {
    return Ok(enc);
  }
  // a file starting "0 HEAD" in BOM-less UTF-16 interleaves NULs
  if head.len() >= 2 {
    if head[0] == b'0' && head[1] == 0x00 {
      return Ok(Encoding::Utf16Le);
    }
    if head[0] == 0x00 && head[1] == b'0' {
      return Ok(Encoding::Utf16Be);
    }
  }
  if let Some(name) = char_declaration(head) {
    return Encoding::from_name(&name);
  }
  if let Some(name) = declared {
    return Encoding::from_name(name);
  }
  Ok(Encoding::Utf8)
}

/// Scan the undecoded header for a `1 CHAR <name>` line. Every supported
/// non-UTF-16 set is ASCII-transparent, so a raw byte scan is safe; the scan
/// stops when the header record ends.
fn char_declaration(head: &[u8]) -> Option<String> {
  let mut level0_seen = 0u32;
  for raw in head.split(|&b| b == b'\n') {
    let line = raw.strip_suffix(b"\r").unwrap_or(raw);
    if line.starts_with(b"0 ") {
      level0_seen += 1;
      if level0_seen > 1 {
        return None;
      }
      continue;
    }
    if let Some(rest) = line.strip_prefix(b"1 CHAR ") {
      let name = String::from_utf8_lossy(rest).trim().to_string();
      if !name.is_empty() {
        return Some(name);
      }
    }
  }
  None
}

// ─── Streaming decoder ───────────────────────────────────────────────────────

/// Streaming decoder from one [`Encoding`] to UTF-8.
///
/// Feed raw bytes with [`push`](Normalizer::push) as they arrive and call
/// [`finish`](Normalizer::finish) once at end of input to flush partial
/// state. A leading byte-order mark matching the encoding is stripped.
#[derive(Debug)]
pub struct Normalizer {
  encoding:  Encoding,
  at_start:  bool,
  /// Undecoded tail: a partial UTF-8 sequence, a lone UTF-16 byte, or a
  /// possible BOM prefix at stream start.
  pending:   Vec<u8>,
  /// UTF-16 high surrogate waiting for its partner.
  surrogate: Option<u16>,
  /// ANSEL combining marks waiting for the base character they precede.
  marks:     Vec<char>,
}

impl Normalizer {
  pub fn new(encoding: Encoding) -> Normalizer {
    Normalizer {
      encoding,
      at_start: true,
      pending: Vec::new(),
      surrogate: None,
      marks: Vec::new(),
    }
  }

  pub fn encoding(&self) -> Encoding {
    self.encoding
  }

  /// Decode the next block of input, returning the text that became
  /// available. Text held back as partial state appears in a later push or
  /// in [`finish`](Normalizer::finish).
  pub fn push(&mut self, input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len() + self.pending.len());
    if self.pending.is_empty() {
      self.run(input, &mut out);
    } else {
      let mut carried = std::mem::take(&mut self.pending);
      carried.extend_from_slice(input);
      self.run(&carried, &mut out);
    }
    out
  }

  /// Flush partial state at end of input. A truncated byte sequence decodes
  /// to U+FFFD; orphaned combining marks are emitted standalone.
  pub fn finish(&mut self) -> String {
    let mut out = String::new();
    if self.surrogate.take().is_some() {
      out.push(char::REPLACEMENT_CHARACTER);
    }
    if !self.pending.is_empty() {
      out.push(char::REPLACEMENT_CHARACTER);
      self.pending.clear();
    }
    for mark in self.marks.drain(..) {
      out.push(mark);
    }
    out
  }

  fn run(&mut self, bytes: &[u8], out: &mut String) {
    let bytes = if self.at_start {
      match self.strip_bom(bytes) {
        Some(rest) => rest,
        None => return, // need more bytes to decide
      }
    } else {
      bytes
    };
    match self.encoding {
      Encoding::Utf8 => self.run_utf8(bytes, out),
      Encoding::Utf16Le => self.run_utf16(bytes, true, out),
      Encoding::Utf16Be => self.run_utf16(bytes, false, out),
      Encoding::Ansel => self.run_ansel(bytes, out),
      Encoding::Cp1252 => run_cp1252(bytes, out),
      Encoding::Ascii => run_ascii(bytes, out),
    }
  }

  /// Drop a leading BOM. Returns `None` (stashing the bytes) when the input
  /// so far is a strict prefix of the mark and the decision must wait.
  fn strip_bom<'a>(&mut self, bytes: &'a [u8]) -> Option<&'a [u8]> {
    let bom = self.encoding.bom();
    if bom.is_empty() {
      self.at_start = false;
      return Some(bytes);
    }
    if bytes.len() < bom.len() {
      if bom.starts_with(bytes) {
        self.pending = bytes.to_vec();
        return None;
      }
      self.at_start = false;
      return Some(bytes);
    }
    self.at_start = false;
    if bytes.starts_with(bom) {
      Some(&bytes[bom.len()..])
    } else {
      Some(bytes)
    }
  }

  fn run_utf8(&mut self, mut bytes: &[u8], out: &mut String) {
    loop {
      match std::str::from_utf8(bytes) {
        Ok(s) => {
          out.push_str(s);
          return;
        }
        Err(e) => {
          let valid = e.valid_up_to();
          out.push_str(&String::from_utf8_lossy(&bytes[..valid]));
          match e.error_len() {
            Some(bad) => {
              out.push(char::REPLACEMENT_CHARACTER);
              bytes = &bytes[valid + bad..];
            }
            None => {
              // incomplete sequence at the end of this block
              self.pending = bytes[valid..].to_vec();
              return;
            }
          }
        }
      }
    }
  }

  fn run_utf16(&mut self, bytes: &[u8], little: bool, out: &mut String) {
    let mut pairs = bytes.chunks_exact(2);
    for pair in &mut pairs {
      let unit = if little {
        u16::from_le_bytes([pair[0], pair[1]])
      } else {
        u16::from_be_bytes([pair[0], pair[1]])
      };
      self.push_unit(unit, out);
    }
    self.pending = pairs.remainder().to_vec();
  }

  fn push_unit(&mut self, unit: u16, out: &mut String) {
    if let Some(high) = self.surrogate.take() {
      if (0xDC00..=0xDFFF).contains(&unit) {
        let c =
          0x10000 + (((high as u32) - 0xD800) << 10) + ((unit as u32) - 0xDC00);
        out.push(char::from_u32(c).unwrap_or(char::REPLACEMENT_CHARACTER));
        return;
      }
      out.push(char::REPLACEMENT_CHARACTER);
      // fall through: classify `unit` on its own
    }
    match unit {
      0xD800..=0xDBFF => self.surrogate = Some(unit),
      0xDC00..=0xDFFF => out.push(char::REPLACEMENT_CHARACTER),
      _ => out
        .push(char::from_u32(unit as u32).unwrap_or(char::REPLACEMENT_CHARACTER)),
    }
  }

  fn run_ansel(&mut self, bytes: &[u8], out: &mut String) {
    for &b in bytes {
      match b {
        // marks never attach to line structure
        b'\n' | b'\r' | b'\t' => {
          for mark in self.marks.drain(..) {
            out.push(mark);
          }
          out.push(b as char);
        }
        0x00..=0x7F => self.emit_base(b as char, out),
        0xE0..=0xFE => match ansel_combining(b) {
          Some(mark) => self.marks.push(mark),
          None => self.emit_base(char::REPLACEMENT_CHARACTER, out),
        },
        _ => match ansel_spacing(b) {
          Some(ch) => self.emit_base(ch, out),
          None => self.emit_base(char::REPLACEMENT_CHARACTER, out),
        },
      }
    }
  }

  /// ANSEL stores combining marks before their base; Unicode wants them
  /// after. Emit the base, then release any held marks behind it.
  fn emit_base(&mut self, ch: char, out: &mut String) {
    out.push(ch);
    for mark in self.marks.drain(..) {
      out.push(mark);
    }
  }
}

/// Decode a complete buffer in one call.
pub fn decode(encoding: Encoding, bytes: &[u8]) -> String {
  let mut normalizer = Normalizer::new(encoding);
  let mut out = normalizer.push(bytes);
  out.push_str(&normalizer.finish());
  out
}

fn run_cp1252(bytes: &[u8], out: &mut String) {
  for &b in bytes {
    let ch = match b {
      0x00..=0x7F => b as char,
      0x80..=0x9F => cp1252_window(b),
      // 0xA0..=0xFF coincides with Latin-1
      _ => char::from_u32(b as u32).unwrap_or(char::REPLACEMENT_CHARACTER),
    };
    out.push(ch);
  }
}

fn run_ascii(bytes: &[u8], out: &mut String) {
  for &b in bytes {
    out.push(if b < 0x80 { b as char } else { char::REPLACEMENT_CHARACTER });
  }
}

// ─── Tables ──────────────────────────────────────────────────────────────────

/// The 0x80-0x9F window where Windows-1252 departs from Latin-1. The five
/// holes (0x81, 0x8D, 0x8F, 0x90, 0x9D) are undefined.
fn cp1252_window(b: u8) -> char {
  match b {
    0x80 => '\u{20AC}',
    0x82 => '\u{201A}',
    0x83 => '\u{0192}',
    0x84 => '\u{201E}',
    0x85 => '\u{2026}',
    0x86 => '\u{2020}',
    0x87 => '\u{2021}',
    0x88 => '\u{02C6}',
    0x89 => '\u{2030}',
    0x8A => '\u{0160}',
    0x8B => '\u{2039}',
    0x8C => '\u{0152}',
    0x8E => '\u{017D}',
    0x91 => '\u{2018}',
    0x92 => '\u{2019}',
    0x93 => '\u{201C}',
    0x94 => '\u{201D}',
    0x95 => '\u{2022}',
    0x96 => '\u{2013}',
    0x97 => '\u{2014}',
    0x98 => '\u{02DC}',
    0x99 => '\u{2122}',
    0x9A => '\u{0161}',
    0x9B => '\u{203A}',
    0x9C => '\u{0153}',
    0x9E => '\u{017E}',
    0x9F => '\u{0178}',
    _ => char::REPLACEMENT_CHARACTER,
  }
}

/// Spacing ANSEL graphics (Z39.47-1993) plus GEDCOM's 0xCF eszett extension.
fn ansel_spacing(b: u8) -> Option<char> {
  let ch = match b {
    0xA1 => '\u{0141}', // Ł
    0xA2 => '\u{00D8}', // Ø
    0xA3 => '\u{0110}', // Đ
    0xA4 => '\u{00DE}', // Þ
    0xA5 => '\u{00C6}', // Æ
    0xA6 => '\u{0152}', // Œ
    0xA7 => '\u{02B9}', // modifier prime
    0xA8 => '\u{00B7}', // middle dot
    0xA9 => '\u{266D}', // flat
    0xAA => '\u{00AE}',
    0xAB => '\u{00B1}',
    0xAC => '\u{01A0}', // Ơ
    0xAD => '\u{01AF}', // Ư
    0xAE => '\u{02BC}', // modifier apostrophe
    0xB0 => '\u{02BB}', // modifier turned comma
    0xB1 => '\u{0142}', // ł
    0xB2 => '\u{00F8}', // ø
    0xB3 => '\u{0111}', // đ
    0xB4 => '\u{00FE}', // þ
    0xB5 => '\u{00E6}', // æ
    0xB6 => '\u{0153}', // œ
    0xB7 => '\u{02BA}', // modifier double prime
    0xB8 => '\u{0131}', // ı
    0xB9 => '\u{00A3}', // £
    0xBA => '\u{00F0}', // ð
    0xBC => '\u{01A1}', // ơ
    0xBD => '\u{01B0}', // ư
    0xC0 => '\u{00B0}', // °
    0xC1 => '\u{2113}', // ℓ
    0xC2 => '\u{2117}', // ℗
    0xC3 => '\u{00A9}', // ©
    0xC4 => '\u{266F}', // sharp
    0xC5 => '\u{00BF}', // ¿
    0xC6 => '\u{00A1}', // ¡
    0xCF => '\u{00DF}', // ß
    _ => return None,
  };
  Some(ch)
}

/// Combining ANSEL marks 0xE0-0xFE, mapped to the Unicode combining
/// character that follows its base.
fn ansel_combining(b: u8) -> Option<char> {
  let ch = match b {
    0xE0 => '\u{0309}', // hook above
    0xE1 => '\u{0300}', // grave
    0xE2 => '\u{0301}', // acute
    0xE3 => '\u{0302}', // circumflex
    0xE4 => '\u{0303}', // tilde
    0xE5 => '\u{0304}', // macron
    0xE6 => '\u{0306}', // breve
    0xE7 => '\u{0307}', // dot above
    0xE8 => '\u{0308}', // diaeresis
    0xE9 => '\u{030C}', // caron
    0xEA => '\u{030A}', // ring above
    0xEB => '\u{FE20}', // ligature left half
    0xEC => '\u{FE21}', // ligature right half
    0xED => '\u{0315}', // comma above right
    0xEE => '\u{030B}', // double acute
    0xEF => '\u{0310}', // candrabindu
    0xF0 => '\u{0327}', // cedilla
    0xF1 => '\u{0328}', // ogonek
    0xF2 => '\u{0323}', // dot below
    0xF3 => '\u{0324}', // diaeresis below
    0xF4 => '\u{0325}', // ring below
    0xF5 => '\u{0333}', // double low line
    0xF6 => '\u{0332}', // low line
    0xF7 => '\u{0326}', // comma below
    0xF8 => '\u{031C}', // left half ring below
    0xF9 => '\u{032E}', // breve below
    0xFA => '\u{FE22}', // double tilde left half
    0xFB => '\u{FE23}', // double tilde right half
    0xFE => '\u{0313}', // comma above
    _ => return None,
  };
  Some(ch)
}

#[cfg(test)]
mod tests {
  use super::*;

  // ── Detection ───────────────────────────────────────────────────────────

  #[test]
  fn bom_wins_over_declaration() {
    // UTF-16LE BOM on a file whose header claims ANSEL
    let mut bytes = vec![0xFF, 0xFE];
    for b in "0 HEAD\n1 CHAR ANSEL\n".bytes() {
      bytes.push(b);
      bytes.push(0x00);
    }
    assert_eq!(detect(&bytes, Some("ANSEL")).unwrap(), Encoding::Utf16Le);
  }

  #[test]
  fn char_line_beats_caller_declaration() {
    let head = b"0 HEAD\n1 SOUR X\n1 CHAR ANSEL\n0 @I1@ INDI\n";
    assert_eq!(detect(head, Some("UTF-8")).unwrap(), Encoding::Ansel);
  }

  #[test]
  fn char_line_outside_header_ignored() {
    let head = b"0 HEAD\n0 @I1@ INDI\n1 CHAR ANSEL\n";
    assert_eq!(detect(head, None).unwrap(), Encoding::Utf8);
  }

  #[test]
  fn bomless_utf16_detected_from_nul_pattern() {
    let mut le = Vec::new();
    for b in "0 HEAD\n".bytes() {
      le.push(b);
      le.push(0x00);
    }
    assert_eq!(detect(&le, None).unwrap(), Encoding::Utf16Le);

    let mut be = Vec::new();
    for b in "0 HEAD\n".bytes() {
      be.push(0x00);
      be.push(b);
    }
    assert_eq!(detect(&be, None).unwrap(), Encoding::Utf16Be);
  }

  #[test]
  fn unknown_names_are_unsupported() {
    let err = Encoding::from_name("EBCDIC").unwrap_err();
    let Error::UnsupportedEncoding(name) = err else {
      panic!("expected UnsupportedEncoding")
    };
    assert_eq!(name, "EBCDIC");
    assert!(detect(b"0 HEAD\n1 CHAR EBCDIC\n", None).is_err());
  }

  #[test]
  fn default_is_utf8() {
    assert_eq!(detect(b"0 HEAD\n1 SOUR X\n", None).unwrap(), Encoding::Utf8);
  }

  // ── UTF-8 ───────────────────────────────────────────────────────────────

  #[test]
  fn utf8_split_mid_character() {
    let text = "1 NAME Zoë\n";
    let bytes = text.as_bytes();
    // "ë" is two bytes; split between them
    let cut = bytes.len() - 2;
    let mut n = Normalizer::new(Encoding::Utf8);
    let mut out = n.push(&bytes[..cut]);
    out.push_str(&n.push(&bytes[cut..]));
    out.push_str(&n.finish());
    assert_eq!(out, text);
  }

  #[test]
  fn invalid_utf8_replaced() {
    assert_eq!(decode(Encoding::Utf8, b"a\xFFb"), "a\u{FFFD}b");
  }

  #[test]
  fn truncated_utf8_tail_replaced_at_finish() {
    let mut n = Normalizer::new(Encoding::Utf8);
    let mut out = n.push(b"ok\xC3");
    out.push_str(&n.finish());
    assert_eq!(out, "ok\u{FFFD}");
  }

  #[test]
  fn utf8_bom_stripped() {
    assert_eq!(decode(Encoding::Utf8, b"\xEF\xBB\xBF0 HEAD\n"), "0 HEAD\n");
  }

  #[test]
  fn bom_split_across_pushes() {
    let mut n = Normalizer::new(Encoding::Utf8);
    let mut out = n.push(&[0xEF]);
    out.push_str(&n.push(&[0xBB, 0xBF, b'x']));
    out.push_str(&n.finish());
    assert_eq!(out, "x");
  }

  // ── UTF-16 ──────────────────────────────────────────────────────────────

  #[test]
  fn utf16le_with_bom() {
    let mut bytes = vec![0xFF, 0xFE];
    for b in "0 HEAD\n".bytes() {
      bytes.push(b);
      bytes.push(0x00);
    }
    assert_eq!(decode(Encoding::Utf16Le, &bytes), "0 HEAD\n");
  }

  #[test]
  fn utf16_split_mid_unit_and_mid_pair() {
    // 𝄞 (U+1D11E) is a surrogate pair
    let units: Vec<u16> = "a𝄞b".encode_utf16().collect();
    let mut bytes = Vec::new();
    for u in units {
      bytes.extend_from_slice(&u.to_be_bytes());
    }
    let mut n = Normalizer::new(Encoding::Utf16Be);
    let mut out = String::new();
    // push one byte at a time: every split lands mid-unit or mid-pair
    for b in &bytes {
      out.push_str(&n.push(std::slice::from_ref(b)));
    }
    out.push_str(&n.finish());
    assert_eq!(out, "a𝄞b");
  }

  #[test]
  fn lone_surrogate_replaced() {
    let bytes = 0xD800u16.to_be_bytes();
    let mut n = Normalizer::new(Encoding::Utf16Be);
    let mut out = n.push(&bytes);
    out.push_str(&n.finish());
    assert_eq!(out, "\u{FFFD}");
  }

  #[test]
  fn odd_trailing_byte_replaced() {
    let mut bytes = Vec::new();
    for b in "ab".bytes() {
      bytes.push(b);
      bytes.push(0x00);
    }
    bytes.push(b'c'); // stray half unit
    assert_eq!(decode(Encoding::Utf16Le, &bytes), "ab\u{FFFD}");
  }

  // ── ANSEL ───────────────────────────────────────────────────────────────

  #[test]
  fn ansel_mark_reordered_after_base() {
    // acute (0xE2) precedes 'e' in ANSEL; Unicode wants e + U+0301
    assert_eq!(decode(Encoding::Ansel, b"Jos\xE2e"), "Jose\u{301}");
  }

  #[test]
  fn ansel_mark_split_across_pushes() {
    let mut n = Normalizer::new(Encoding::Ansel);
    let mut out = n.push(b"Jos\xE2");
    out.push_str(&n.push(b"e"));
    out.push_str(&n.finish());
    assert_eq!(out, "Jose\u{301}");
  }

  #[test]
  fn ansel_stacked_marks_follow_base_in_order() {
    // circumflex + dot below on 'o'
    assert_eq!(decode(Encoding::Ansel, b"\xE3\xF2o"), "o\u{302}\u{323}");
  }

  #[test]
  fn ansel_spacing_characters() {
    assert_eq!(decode(Encoding::Ansel, b"\xA5 \xB2 \xCF"), "\u{C6} \u{F8} \u{DF}");
  }

  #[test]
  fn ansel_orphan_mark_survives_finish() {
    let mut n = Normalizer::new(Encoding::Ansel);
    let mut out = n.push(b"x\xE2");
    out.push_str(&n.finish());
    assert_eq!(out, "x\u{301}");
  }

  #[test]
  fn ansel_mark_does_not_attach_to_newline() {
    assert_eq!(decode(Encoding::Ansel, b"\xE2\na"), "\u{301}\na");
  }

  #[test]
  fn ansel_unmapped_byte_replaced() {
    assert_eq!(decode(Encoding::Ansel, b"\xBEx"), "\u{FFFD}x");
  }

  // ── Single-byte sets ────────────────────────────────────────────────────

  #[test]
  fn cp1252_window_and_latin1() {
    assert_eq!(decode(Encoding::Cp1252, b"\x93caf\xE9\x94"), "\u{201C}caf\u{E9}\u{201D}");
  }

  #[test]
  fn cp1252_holes_replaced() {
    assert_eq!(decode(Encoding::Cp1252, b"\x81"), "\u{FFFD}");
  }

  #[test]
  fn ascii_high_bytes_replaced() {
    assert_eq!(decode(Encoding::Ascii, b"ok\xE9"), "ok\u{FFFD}");
  }
}
