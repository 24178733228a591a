//! Record-aligned chunking of normalised import text.
//!
//! Imports are staged as ~64 KiB chunks so a multi-megabyte file never sits
//! in one allocation and processing can checkpoint between chunks. A chunk
//! always ends exactly after a newline whose next byte opens a level-0 line,
//! so no record ever straddles two chunks, and concatenating all chunks
//! reproduces the input byte-for-byte.

use bytes::{Bytes, BytesMut};
use memchr::{memchr_iter, memrchr_iter};

/// Target chunk size. A chunk runs longer only when a single record
/// overruns the target.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Splits a byte stream into record-boundary-aligned chunks.
#[derive(Debug)]
pub struct RecordChunker {
  target: usize,
  buf:    BytesMut,
}

impl RecordChunker {
  pub fn new(target: usize) -> RecordChunker {
    RecordChunker { target, buf: BytesMut::new() }
  }

  /// Buffer `input` and return the chunks that became complete.
  pub fn push(&mut self, input: &[u8]) -> Vec<Bytes> {
    self.buf.extend_from_slice(input);
    let mut out = Vec::new();
    while self.buf.len() > self.target {
      match self.split_point() {
        Some(cut) => out.push(self.buf.split_to(cut).freeze()),
        None => break,
      }
    }
    out
  }

  /// Flush whatever remains as the final chunk.
  pub fn finish(&mut self) -> Option<Bytes> {
    (!self.buf.is_empty()).then(|| self.buf.split().freeze())
  }

  /// Bytes buffered and not yet emitted.
  pub fn buffered(&self) -> usize {
    self.buf.len()
  }

  /// Where to cut: scanning backward from the target for the last record
  /// boundary, then forward past it when one record overruns the target.
  /// A boundary is a newline immediately followed by a `0`.
  fn split_point(&self) -> Option<usize> {
    let buf = &self.buf[..];
    let window = self.target.min(buf.len());
    for nl in memrchr_iter(b'\n', &buf[..window]) {
      if buf.get(nl + 1) == Some(&b'0') {
        return Some(nl + 1);
      }
    }
    for nl in memchr_iter(b'\n', &buf[window..]) {
      let abs = window + nl;
      if buf.get(abs + 1) == Some(&b'0') {
        return Some(abs + 1);
      }
    }
    None
  }
}

impl Default for RecordChunker {
  fn default() -> Self {
    RecordChunker::new(DEFAULT_CHUNK_SIZE)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn synthetic(records: usize) -> String {
    let mut s = String::new();
    for i in 1..=records {
      s.push_str(&format!("0 @I{i}@ INDI\n1 NAME Person /N{i}/\n1 SEX M\n"));
    }
    s
  }

  fn drain(target: usize, input: &[u8], step: usize) -> Vec<Bytes> {
    let mut chunker = RecordChunker::new(target);
    let mut chunks = Vec::new();
    for block in input.chunks(step) {
      chunks.extend(chunker.push(block));
    }
    chunks.extend(chunker.finish());
    chunks
  }

  fn assert_aligned(chunks: &[Bytes], input: &[u8]) {
    let mut joined = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
      joined.extend_from_slice(chunk);
      if i + 1 < chunks.len() {
        assert_eq!(chunk.last(), Some(&b'\n'), "chunk {i} must end at a newline");
        assert_eq!(chunks[i + 1].first(), Some(&b'0'), "chunk {} must open a record", i + 1);
      }
    }
    assert_eq!(joined, input, "concatenation must be lossless");
  }

  #[test]
  fn chunks_end_on_record_boundaries() {
    let input = synthetic(40);
    let chunks = drain(128, input.as_bytes(), 17);
    assert!(chunks.len() > 1);
    assert_aligned(&chunks, input.as_bytes());
  }

  #[test]
  fn no_chunk_exceeds_target_when_records_fit() {
    let input = synthetic(200);
    let chunks = drain(256, input.as_bytes(), 64);
    for chunk in &chunks {
      assert!(chunk.len() <= 256, "chunk of {} bytes over target", chunk.len());
    }
    assert_aligned(&chunks, input.as_bytes());
  }

  #[test]
  fn oversized_record_extends_chunk() {
    let mut input = String::from("0 @I1@ INDI\n");
    for i in 0..50 {
      input.push_str(&format!("1 NOTE filler line number {i} with padding\n"));
    }
    input.push_str("0 @I2@ INDI\n1 SEX F\n");
    let chunks = drain(64, input.as_bytes(), 1000);
    // the big record forces chunk 0 past the target, up to the next boundary
    assert!(chunks[0].len() > 64);
    assert!(chunks[0].ends_with(b"\n"));
    assert_eq!(&chunks[1][..], b"0 @I2@ INDI\n1 SEX F\n");
    assert_aligned(&chunks, input.as_bytes());
  }

  #[test]
  fn single_record_never_splits() {
    let input = b"0 @I1@ INDI\n1 NAME Solo /One/\n";
    let chunks = drain(8, input, 3);
    assert_eq!(chunks.len(), 1);
    assert_eq!(&chunks[0][..], &input[..]);
  }

  #[test]
  fn empty_input_yields_nothing() {
    let mut chunker = RecordChunker::new(64);
    assert!(chunker.push(b"").is_empty());
    assert!(chunker.finish().is_none());
  }

  #[test]
  fn crlf_boundaries_respected() {
    let input = b"0 HEAD\r\n1 CHAR UTF-8\r\n0 @I1@ INDI\r\n1 SEX M\r\n";
    let chunks = drain(20, input, 7);
    assert_aligned(&chunks, input);
  }
}
