//! The file import pipeline: character-set normalisation, chunked staging
//! and one ledger proposal per record.
//!
//! An import runs in two phases around the store's chunk table. The feed
//! phase streams raw file bytes through encoding detection and decoding and
//! stages the UTF-8 text as record-aligned chunks. The processing phase
//! walks the staged chunks in order, proposing one change per record and
//! marking each chunk off as it completes, so an interrupted import resumes
//! at the first unprocessed chunk instead of starting over.

use std::error::Error as _;

use bytes::Bytes;
use chrono::Utc;
use stemma_core::{
  change::{Actor, NewChange, PendingChange},
  store::TreeStore,
};
use stemma_gedcom::{
  ParsedRecord,
  chunk::{DEFAULT_CHUNK_SIZE, RecordChunker},
  compose::{splice_xref, stamp_trailer},
  encoding::{Encoding, Normalizer, detect},
  parse_record, split_records,
};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Bytes buffered before committing to a character set. Detection needs the
/// byte-order mark or the header's `1 CHAR` line, both of which sit well
/// inside this window.
const SNIFF_LEN: usize = 1024;

/// Knobs for one import run.
#[derive(Debug, Clone)]
pub struct ImportOptions {
  /// Target size of staged chunks, in bytes.
  pub chunk_size:        usize,
  /// Character-set name to assume when the file itself reveals nothing.
  pub declared_encoding: Option<String>,
  /// Abort on the first bad record instead of skipping it.
  pub strict:            bool,
}

impl Default for ImportOptions {
  fn default() -> Self {
    ImportOptions {
      chunk_size:        DEFAULT_CHUNK_SIZE,
      declared_encoding: None,
      strict:            false,
    }
  }
}

/// What one import run accomplished.
#[derive(Debug, Clone)]
pub struct ImportSummary {
  pub run_id:   Uuid,
  pub tree_id:  i64,
  /// Character set the staged text was decoded from. A resumed run reads
  /// already-normalised chunks and reports UTF-8.
  pub encoding: Encoding,
  /// Source system named in the file header, when present.
  pub source:   Option<String>,
  /// Chunks processed.
  pub chunks:   u64,
  /// Records proposed through the ledger.
  pub imported: u64,
  /// Records passed over in lenient mode.
  pub skipped:  Vec<SkippedRecord>,
}

/// A record a lenient import passed over.
#[derive(Debug, Clone)]
pub struct SkippedRecord {
  /// 1-based ordinal of the record within the file, header included.
  pub position: u64,
  pub reason:   String,
}

/// Imports GEDCOM files into a tree, one ledger change per record.
#[derive(Debug, Clone)]
pub struct Importer<S> {
  store:   S,
  options: ImportOptions,
}

impl<S: TreeStore> Importer<S> {
  pub fn new(store: S) -> Importer<S> {
    Importer { store, options: ImportOptions::default() }
  }

  pub fn with_options(store: S, options: ImportOptions) -> Importer<S> {
    Importer { store, options }
  }

  /// Import a complete in-memory file in one call.
  pub async fn import_bytes(
    &self,
    tree_id: i64,
    bytes: &[u8],
    actor: &Actor,
  ) -> Result<ImportSummary> {
    let mut session = self.begin(tree_id).await?;
    session.feed(bytes).await?;
    session.finish(actor).await
  }

  /// Start a staged import run, truncating chunks left by a prior run.
  pub async fn begin(&self, tree_id: i64) -> Result<ImportSession<'_, S>> {
    let run = self
      .store
      .begin_import(tree_id)
      .await
      .map_err(|e| Error::Store(Box::new(e)))?;
    tracing::info!(run_id = %run.run_id, tree_id, "import run started");
    Ok(ImportSession {
      importer:   self,
      tree_id,
      run_id:     run.run_id,
      head:       Vec::new(),
      normalizer: None,
      chunker:    RecordChunker::new(self.options.chunk_size),
      staged:     0,
    })
  }

  /// Process chunks left staged by an interrupted run. The staged text is
  /// already normalised, so the summary reports UTF-8.
  pub async fn resume(
    &self,
    tree_id: i64,
    actor: &Actor,
  ) -> Result<ImportSummary> {
    let run_id = Uuid::new_v4();
    tracing::info!(run_id = %run_id, tree_id, "resuming staged import");
    self.process(tree_id, run_id, Encoding::Utf8, actor).await
  }

  /// Import one record's UTF-8 text: reformat it canonically, fill a blank
  /// pointer from the allocator, stamp the change trailer and propose the
  /// result through the ledger. Records with no pointer at all (`HEAD`,
  /// `TRLR`, bare tags) are rejected.
  pub async fn import_record(
    &self,
    tree_id: i64,
    text: &str,
    actor: &Actor,
  ) -> Result<PendingChange> {
    let parsed = parse_record(text)?;
    self.propose_record(tree_id, &parsed, actor).await
  }

  async fn propose_record(
    &self,
    tree_id: i64,
    parsed: &ParsedRecord,
    actor: &Actor,
  ) -> Result<PendingChange> {
    let text = parsed.to_string();
    let (xref, text) = match &parsed.xref {
      Some(xref) => (xref.clone(), text),
      None if parsed.has_blank_pointer() => {
        let xref = self
          .store
          .allocate_xref(tree_id, parsed.kind())
          .await
          .map_err(|e| Error::Store(Box::new(e)))?;
        let text = splice_xref(&text, &xref)?;
        (xref, text)
      }
      None => {
        return Err(Error::Core(stemma_core::Error::malformed(
          1,
          format!("{} record has no pointer", parsed.tag),
        )));
      }
    };

    // a record arriving under an identifier we already hold is an update
    // against the current canonical text, not a conflict
    let old_gedcom = self
      .store
      .get_record(tree_id, &xref)
      .await
      .map_err(|e| Error::Store(Box::new(e)))?
      .map(|r| r.gedcom)
      .unwrap_or_default();
    let new_gedcom = stamp_trailer(&text, &actor.name, Utc::now());

    self
      .store
      .propose(NewChange { tree_id, xref, old_gedcom, new_gedcom }, actor)
      .await
      .map_err(|e| Error::Store(Box::new(e)))
  }

  async fn process(
    &self,
    tree_id: i64,
    run_id: Uuid,
    encoding: Encoding,
    actor: &Actor,
  ) -> Result<ImportSummary> {
    let mut summary = ImportSummary {
      run_id,
      tree_id,
      encoding,
      source: None,
      chunks: 0,
      imported: 0,
      skipped: Vec::new(),
    };
    let mut position: u64 = 0;

    loop {
      let Some(chunk) = self
        .store
        .next_unimported_chunk(tree_id)
        .await
        .map_err(|e| Error::Store(Box::new(e)))?
      else {
        break;
      };
      // staged chunks hold normalised UTF-8 by construction
      let text = String::from_utf8_lossy(&chunk.data);
      for slice in split_records(&text) {
        position += 1;
        self
          .import_slice(tree_id, slice, position, actor, &mut summary)
          .await?;
      }
      self
        .store
        .mark_chunk_imported(chunk.chunk_id)
        .await
        .map_err(|e| Error::Store(Box::new(e)))?;
      summary.chunks += 1;
    }

    self
      .store
      .clear_chunks(tree_id)
      .await
      .map_err(|e| Error::Store(Box::new(e)))?;
    let line = format!(
      "import {run_id} finished: {} records imported, {} skipped",
      summary.imported,
      summary.skipped.len(),
    );
    self
      .store
      .append_log(tree_id, &line)
      .await
      .map_err(|e| Error::Store(Box::new(e)))?;
    tracing::info!(
      run_id = %run_id,
      imported = summary.imported,
      skipped = summary.skipped.len(),
      "import run finished",
    );
    Ok(summary)
  }

  /// Import one record slice, honouring strict/lenient failure handling.
  async fn import_slice(
    &self,
    tree_id: i64,
    slice: &str,
    position: u64,
    actor: &Actor,
    summary: &mut ImportSummary,
  ) -> Result<()> {
    let outcome = match parse_record(slice) {
      Ok(parsed) => match parsed.tag.as_str() {
        // the file envelope is consumed, not stored
        "HEAD" => {
          summary.source = parsed
            .find_tag("SOUR")
            .map(|l| l.value.trim().to_string())
            .filter(|s| !s.is_empty());
          return Ok(());
        }
        "TRLR" => return Ok(()),
        _ => self.propose_record(tree_id, &parsed, actor).await,
      },
      Err(e) => Err(Error::Gedcom(e)),
    };
    match outcome {
      Ok(change) => {
        summary.imported += 1;
        tracing::debug!(xref = %change.xref, change_id = change.change_id, "record imported");
        Ok(())
      }
      Err(e) if self.options.strict || !record_fault(&e) => Err(e),
      Err(e) => {
        tracing::warn!(position, error = %e, "record skipped");
        summary
          .skipped
          .push(SkippedRecord { position, reason: e.to_string() });
        Ok(())
      }
    }
  }
}

/// True for failures scoped to one record, which a lenient import skips.
/// Anything else (a dead database, an exhausted identifier space, a missing
/// tree) aborts the run. Store errors are searched down their source chain;
/// backends wrap the domain error in their own type.
fn record_fault(error: &Error) -> bool {
  match error {
    Error::Gedcom(_) => true,
    Error::Core(e) => core_record_fault(e),
    Error::Store(e) => {
      let mut source: Option<&(dyn std::error::Error + 'static)> =
        Some(e.as_ref());
      while let Some(err) = source {
        if let Some(core) = err.downcast_ref::<stemma_core::Error>() {
          return core_record_fault(core);
        }
        source = err.source();
      }
      false
    }
  }
}

fn core_record_fault(error: &stemma_core::Error) -> bool {
  matches!(
    error,
    stemma_core::Error::MalformedRecord { .. }
      | stemma_core::Error::ChangeConflict(_)
  )
}

/// One staged import run against a single tree.
///
/// Built by [`Importer::begin`]. Feed raw file bytes with
/// [`feed`](ImportSession::feed) as they arrive, then call
/// [`finish`](ImportSession::finish) to flush the decoder and process every
/// staged chunk. No text is staged until the character set is resolved, so
/// an unsupported declaration fails before anything persists.
pub struct ImportSession<'a, S> {
  importer:   &'a Importer<S>,
  tree_id:    i64,
  run_id:     Uuid,
  /// Raw bytes buffered while the character set is still unresolved.
  head:       Vec<u8>,
  /// Decoder, present once the character set is resolved.
  normalizer: Option<Normalizer>,
  chunker:    RecordChunker,
  staged:     u64,
}

impl<S: TreeStore> ImportSession<'_, S> {
  pub fn run_id(&self) -> Uuid {
    self.run_id
  }

  /// Stream the next block of raw file bytes.
  pub async fn feed(&mut self, input: &[u8]) -> Result<()> {
    let text = match &mut self.normalizer {
      Some(normalizer) => normalizer.push(input),
      None => {
        self.head.extend_from_slice(input);
        if self.head.len() < SNIFF_LEN {
          return Ok(());
        }
        let mut normalizer = self.resolve()?;
        let text = normalizer.push(&std::mem::take(&mut self.head));
        self.normalizer = Some(normalizer);
        text
      }
    };
    self.stage(&text).await
  }

  /// Flush the decoder and chunker, then process every staged chunk.
  pub async fn finish(mut self, actor: &Actor) -> Result<ImportSummary> {
    let mut normalizer = match self.normalizer.take() {
      // the whole file fit inside the sniff buffer
      None => self.resolve()?,
      Some(normalizer) => normalizer,
    };
    let mut tail = normalizer.push(&std::mem::take(&mut self.head));
    tail.push_str(&normalizer.finish());
    self.stage(&tail).await?;
    if let Some(chunk) = self.chunker.finish() {
      self.append(chunk).await?;
    }
    tracing::info!(run_id = %self.run_id, chunks = self.staged, "staging finished");
    self
      .importer
      .process(self.tree_id, self.run_id, normalizer.encoding(), actor)
      .await
  }

  /// Commit to a character set from the buffered head bytes.
  fn resolve(&self) -> Result<Normalizer> {
    let declared = self.importer.options.declared_encoding.as_deref();
    let encoding = detect(&self.head, declared)?;
    tracing::info!(
      run_id = %self.run_id,
      encoding = encoding.name(),
      "character set resolved",
    );
    Ok(Normalizer::new(encoding))
  }

  /// Push decoded text through the chunker, staging completed chunks.
  async fn stage(&mut self, text: &str) -> Result<()> {
    for chunk in self.chunker.push(text.as_bytes()) {
      self.append(chunk).await?;
    }
    Ok(())
  }

  async fn append(&mut self, chunk: Bytes) -> Result<()> {
    let bytes = chunk.len();
    let seq = self
      .importer
      .store
      .append_chunk(self.tree_id, chunk)
      .await
      .map_err(|e| Error::Store(Box::new(e)))?;
    tracing::debug!(run_id = %self.run_id, seq, bytes, "chunk staged");
    self.staged += 1;
    Ok(())
  }
}
