//! [`SqliteStore`] — the SQLite implementation of [`TreeStore`].

use std::path::Path;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use stemma_core::{
  change::{Actor, ChangeStatus, NewChange, PendingChange},
  chunk::{ImportRun, StoredChunk},
  error::Conflict,
  index::IndexRows,
  record::{GedcomRecord, RecordKind, Xref, XREF_MAX_LEN},
  store::TreeStore,
  tree::{AuditEntry, Tree, TreeSettings},
};
use stemma_gedcom::index::derive_index;

use crate::{
  encode::{
    decode_xref, encode_dt, encode_settings, encode_status, RawAuditEntry,
    RawChange, RawChunk, RawRecord, RawTree,
  },
  schema::SCHEMA,
  Error, Result,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Stemma tree store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── Closure outcomes ────────────────────────────────────────────────────────
//
// Connection closures may only fail with rusqlite errors, so domain outcomes
// are smuggled out as values and mapped onto typed errors afterwards.

/// What became of a change resolution attempted inside a transaction.
enum Resolution {
  /// Resolved; the row as it now stands.
  Applied(RawChange),
  NotFound,
  AlreadyResolved,
  RecordMutated(String),
  RecordMissing(String),
  Malformed { line: usize, reason: String },
}

enum ProposeOutcome {
  Done(RawChange),
  TreeNotFound,
  PendingExists(String),
  Failed { change_id: i64, resolution: Resolution },
}

enum AllocOutcome {
  Allocated(String),
  TreeNotFound,
  Exhausted,
}

/// Map a [`Resolution`] onto the error space. Only `Applied` survives.
fn resolved(resolution: Resolution, change_id: i64) -> Result<RawChange> {
  match resolution {
    Resolution::Applied(raw) => Ok(raw),
    Resolution::NotFound => {
      Err(Error::Core(stemma_core::Error::ChangeNotFound(change_id)))
    }
    Resolution::AlreadyResolved => {
      Err(Error::Core(Conflict::AlreadyResolved(change_id).into()))
    }
    Resolution::RecordMutated(xref) => {
      Err(Error::Core(Conflict::RecordMutated(xref).into()))
    }
    Resolution::RecordMissing(xref) => {
      Err(Error::Core(Conflict::RecordMissing(xref).into()))
    }
    Resolution::Malformed { line, reason } => {
      Err(Error::Core(stemma_core::Error::malformed(line, reason)))
    }
  }
}

// ─── Trait implementation ────────────────────────────────────────────────────

impl TreeStore for SqliteStore {
  type Error = Error;

  // ── Trees ──────────────────────────────────────────────────────────────

  async fn create_tree(&self, name: &str, settings: TreeSettings) -> Result<Tree> {
    let name_owned   = name.to_owned();
    let insert_name  = name_owned.clone();
    let settings_str = encode_settings(&settings)?;
    let created_at   = Utc::now();
    let at_str       = encode_dt(created_at);

    let tree_id: Option<i64> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let taken: bool = tx
          .query_row(
            "SELECT 1 FROM trees WHERE name = ?1",
            rusqlite::params![insert_name],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        if taken {
          return Ok(None);
        }

        tx.execute(
          "INSERT INTO trees (name, created_at, settings) VALUES (?1, ?2, ?3)",
          rusqlite::params![insert_name, at_str, settings_str],
        )?;
        let tree_id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(Some(tree_id))
      })
      .await?;

    let Some(tree_id) = tree_id else {
      return Err(Error::TreeNameTaken(name_owned));
    };

    Ok(Tree { tree_id, name: name_owned, created_at, settings })
  }

  async fn get_tree(&self, tree_id: i64) -> Result<Option<Tree>> {
    let raw: Option<RawTree> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT tree_id, name, created_at, settings FROM trees WHERE tree_id = ?1",
            rusqlite::params![tree_id],
            tree_from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawTree::into_tree).transpose()
  }

  async fn get_tree_by_name(&self, name: &str) -> Result<Option<Tree>> {
    let name = name.to_owned();
    let raw: Option<RawTree> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT tree_id, name, created_at, settings FROM trees WHERE name = ?1",
            rusqlite::params![name],
            tree_from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawTree::into_tree).transpose()
  }

  async fn list_trees(&self) -> Result<Vec<Tree>> {
    let raws: Vec<RawTree> = self
      .conn
      .call(|conn| {
        let mut stmt = conn
          .prepare("SELECT tree_id, name, created_at, settings FROM trees ORDER BY tree_id")?;
        let rows = stmt
          .query_map([], tree_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawTree::into_tree).collect()
  }

  async fn update_settings(&self, tree_id: i64, settings: TreeSettings) -> Result<()> {
    let settings_str = encode_settings(&settings)?;

    let updated: usize = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE trees SET settings = ?1 WHERE tree_id = ?2",
          rusqlite::params![settings_str, tree_id],
        )?)
      })
      .await?;

    if updated == 0 {
      return Err(Error::Core(stemma_core::Error::TreeNotFound(tree_id)));
    }
    Ok(())
  }

  async fn delete_tree(&self, tree_id: i64) -> Result<()> {
    let deleted: usize = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM trees WHERE tree_id = ?1",
          rusqlite::params![tree_id],
        )?)
      })
      .await?;

    if deleted == 0 {
      return Err(Error::Core(stemma_core::Error::TreeNotFound(tree_id)));
    }
    Ok(())
  }

  // ── Canonical records ──────────────────────────────────────────────────

  async fn get_record(&self, tree_id: i64, xref: &Xref) -> Result<Option<GedcomRecord>> {
    let xref_str = xref.as_str().to_owned();

    let raw: Option<RawRecord> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT tree_id, xref, record_type, gedcom, updated_at
             FROM records WHERE tree_id = ?1 AND xref = ?2",
            rusqlite::params![tree_id, xref_str],
            record_from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawRecord::into_record).transpose()
  }

  async fn list_records(
    &self,
    tree_id: i64,
    kind: Option<RecordKind>,
  ) -> Result<Vec<GedcomRecord>> {
    let raws: Vec<RawRecord> = self
      .conn
      .call(move |conn| {
        let rows = match kind {
          // The media bucket is the catch-all for unclassified tags, so it
          // is everything the structured kinds are not.
          Some(RecordKind::Media) => {
            let mut stmt = conn.prepare(
              "SELECT tree_id, xref, record_type, gedcom, updated_at
               FROM records
               WHERE tree_id = ?1 AND record_type NOT IN ('INDI', 'FAM', 'SOUR')
               ORDER BY xref",
            )?;
            stmt
              .query_map(rusqlite::params![tree_id], record_from_row)?
              .collect::<rusqlite::Result<Vec<_>>>()?
          }
          Some(kind) => {
            let mut stmt = conn.prepare(
              "SELECT tree_id, xref, record_type, gedcom, updated_at
               FROM records
               WHERE tree_id = ?1 AND record_type = ?2
               ORDER BY xref",
            )?;
            stmt
              .query_map(rusqlite::params![tree_id, kind.tag()], record_from_row)?
              .collect::<rusqlite::Result<Vec<_>>>()?
          }
          None => {
            let mut stmt = conn.prepare(
              "SELECT tree_id, xref, record_type, gedcom, updated_at
               FROM records WHERE tree_id = ?1
               ORDER BY xref",
            )?;
            stmt
              .query_map(rusqlite::params![tree_id], record_from_row)?
              .collect::<rusqlite::Result<Vec<_>>>()?
          }
        };
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRecord::into_record).collect()
  }

  async fn find_by_name(&self, tree_id: i64, needle: &str) -> Result<Vec<Xref>> {
    let pattern = format!("%{}%", needle.trim());

    let labels: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT DISTINCT xref FROM name_index
           WHERE tree_id = ?1
             AND (full LIKE ?2 OR surname LIKE ?2 OR given LIKE ?2)
           ORDER BY xref",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![tree_id, pattern], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;

    labels.iter().map(|label| decode_xref(label)).collect()
  }

  async fn find_by_date_range(
    &self,
    tree_id: i64,
    from_day: i64,
    to_day: i64,
  ) -> Result<Vec<Xref>> {
    let labels: Vec<String> = self
      .conn
      .call(move |conn| {
        // NULL bounds are open ends; rows with neither bound are opaque
        // date phrases and never match a calendar query.
        let mut stmt = conn.prepare(
          "SELECT DISTINCT xref FROM date_index
           WHERE tree_id = ?1
             AND (day_min IS NOT NULL OR day_max IS NOT NULL)
             AND (day_min IS NULL OR day_min <= ?3)
             AND (day_max IS NULL OR day_max >= ?2)
           ORDER BY xref",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![tree_id, from_day, to_day], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;

    labels.iter().map(|label| decode_xref(label)).collect()
  }

  async fn find_by_place(&self, tree_id: i64, needle: &str) -> Result<Vec<Xref>> {
    let pattern = format!("%{}%", needle.trim());

    let labels: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT DISTINCT xref FROM place_index
           WHERE tree_id = ?1 AND name LIKE ?2
           ORDER BY xref",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![tree_id, pattern], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;

    labels.iter().map(|label| decode_xref(label)).collect()
  }

  async fn linked_to(&self, tree_id: i64, to: &Xref) -> Result<Vec<(Xref, String)>> {
    let to_str = to.as_str().to_owned();

    let rows: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT xref, tag FROM link_index
           WHERE tree_id = ?1 AND to_xref = ?2
           ORDER BY xref",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![tree_id, to_str], |row| {
            Ok((row.get(0)?, row.get(1)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(from, tag)| Ok((decode_xref(&from)?, tag)))
      .collect()
  }

  // ── Identifier allocation ──────────────────────────────────────────────

  async fn allocate_xref(&self, tree_id: i64, kind: RecordKind) -> Result<Xref> {
    let prefix = kind.prefix().to_string();

    let outcome: AllocOutcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        if !tree_exists(&tx, tree_id)? {
          return Ok(AllocOutcome::TreeNotFound);
        }

        let mut n: i64 = tx
          .query_row(
            "SELECT next_value FROM counters WHERE tree_id = ?1 AND prefix = ?2",
            rusqlite::params![tree_id, prefix],
            |row| row.get(0),
          )
          .optional()?
          .unwrap_or(1);

        // Skip over identifiers already taken by records or by any change
        // row; a resolved change pins its identifier forever.
        let label = loop {
          let candidate = format!("{prefix}{n}");
          if candidate.len() > XREF_MAX_LEN {
            return Ok(AllocOutcome::Exhausted);
          }
          let taken: bool = tx
            .query_row(
              "SELECT 1 FROM records WHERE tree_id = ?1 AND xref = ?2
               UNION ALL
               SELECT 1 FROM changes WHERE tree_id = ?1 AND xref = ?2
               LIMIT 1",
              rusqlite::params![tree_id, candidate],
              |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
          if !taken {
            break candidate;
          }
          let Some(next) = n.checked_add(1) else {
            return Ok(AllocOutcome::Exhausted);
          };
          n = next;
        };

        let Some(next) = n.checked_add(1) else {
          return Ok(AllocOutcome::Exhausted);
        };
        tx.execute(
          "INSERT INTO counters (tree_id, prefix, next_value) VALUES (?1, ?2, ?3)
           ON CONFLICT (tree_id, prefix) DO UPDATE SET next_value = excluded.next_value",
          rusqlite::params![tree_id, prefix, next],
        )?;
        tx.commit()?;
        Ok(AllocOutcome::Allocated(label))
      })
      .await?;

    match outcome {
      AllocOutcome::Allocated(label) => decode_xref(&label),
      AllocOutcome::TreeNotFound => {
        Err(Error::Core(stemma_core::Error::TreeNotFound(tree_id)))
      }
      AllocOutcome::Exhausted => Err(Error::Core(
        stemma_core::Error::AllocationExhausted(kind.prefix()),
      )),
    }
  }

  // ── Change ledger ──────────────────────────────────────────────────────

  async fn propose(&self, change: NewChange, actor: &Actor) -> Result<PendingChange> {
    if change.old_gedcom.is_empty() && change.new_gedcom.is_empty() {
      return Err(Error::Core(stemma_core::Error::malformed(
        1,
        "change proposes neither old nor new text",
      )));
    }
    // A non-empty replacement must parse, and its pointer must name the
    // record the change claims to touch.
    if !change.new_gedcom.is_empty() {
      let parsed = stemma_gedcom::parse_record(&change.new_gedcom)
        .map_err(stemma_core::Error::from)
        .map_err(Error::Core)?;
      if parsed.xref.as_ref() != Some(&change.xref) {
        return Err(Error::Core(stemma_core::Error::malformed(
          1,
          format!("record pointer does not match change target {}", change.xref),
        )));
      }
    }

    let tree_id     = change.tree_id;
    let xref_str    = change.xref.as_str().to_owned();
    let old_text    = change.old_gedcom;
    let new_text    = change.new_gedcom;
    let actor_name  = actor.name.clone();
    let auto_accept = actor.auto_accept;
    let at_str      = encode_dt(Utc::now());

    let outcome: ProposeOutcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        if !tree_exists(&tx, tree_id)? {
          return Ok(ProposeOutcome::TreeNotFound);
        }

        let pending: bool = tx
          .query_row(
            "SELECT 1 FROM changes
             WHERE tree_id = ?1 AND xref = ?2 AND status = 'pending'",
            rusqlite::params![tree_id, xref_str],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);
        if pending {
          return Ok(ProposeOutcome::PendingExists(xref_str));
        }

        tx.execute(
          "INSERT INTO changes
             (tree_id, xref, old_gedcom, new_gedcom, status, actor, recorded_at)
           VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6)",
          rusqlite::params![tree_id, xref_str, old_text, new_text, actor_name, at_str],
        )?;
        let change_id = tx.last_insert_rowid();
        log_line(
          &tx,
          tree_id,
          &format!("change {change_id} proposed for {xref_str} by {actor_name}"),
          &at_str,
        )?;

        if auto_accept {
          // Same-transaction acceptance: if it cannot apply, the proposal
          // rolls back with it and nothing is left behind.
          match apply_accept(&tx, change_id, &actor_name, &at_str)? {
            Resolution::Applied(raw) => {
              tx.commit()?;
              Ok(ProposeOutcome::Done(raw))
            }
            resolution => Ok(ProposeOutcome::Failed { change_id, resolution }),
          }
        } else {
          match load_change(&tx, change_id)? {
            Some(raw) => {
              tx.commit()?;
              Ok(ProposeOutcome::Done(raw))
            }
            None => {
              Ok(ProposeOutcome::Failed { change_id, resolution: Resolution::NotFound })
            }
          }
        }
      })
      .await?;

    match outcome {
      ProposeOutcome::Done(raw) => raw.into_change(),
      ProposeOutcome::TreeNotFound => {
        Err(Error::Core(stemma_core::Error::TreeNotFound(tree_id)))
      }
      ProposeOutcome::PendingExists(xref) => {
        Err(Error::Core(Conflict::PendingExists(xref).into()))
      }
      ProposeOutcome::Failed { change_id, resolution } => {
        let raw = resolved(resolution, change_id)?;
        raw.into_change()
      }
    }
  }

  async fn accept_change(&self, change_id: i64, actor: &Actor) -> Result<PendingChange> {
    let actor_name = actor.name.clone();
    let at_str     = encode_dt(Utc::now());

    let resolution: Resolution = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let resolution = apply_accept(&tx, change_id, &actor_name, &at_str)?;
        if matches!(resolution, Resolution::Applied(_)) {
          tx.commit()?;
        }
        Ok(resolution)
      })
      .await?;

    let raw = resolved(resolution, change_id)?;
    raw.into_change()
  }

  async fn reject_change(&self, change_id: i64, actor: &Actor) -> Result<PendingChange> {
    let actor_name = actor.name.clone();
    let at_str     = encode_dt(Utc::now());

    let resolution: Resolution = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let Some(mut raw) = load_change(&tx, change_id)? else {
          return Ok(Resolution::NotFound);
        };
        if raw.status != "pending" {
          return Ok(Resolution::AlreadyResolved);
        }

        tx.execute(
          "UPDATE changes SET status = 'rejected' WHERE change_id = ?1",
          rusqlite::params![change_id],
        )?;
        log_line(
          &tx,
          raw.tree_id,
          &format!(
            "change {change_id} rejected for {xref} by {actor_name}",
            xref = raw.xref
          ),
          &at_str,
        )?;
        tx.commit()?;

        raw.status = encode_status(ChangeStatus::Rejected).to_owned();
        Ok(Resolution::Applied(raw))
      })
      .await?;

    let raw = resolved(resolution, change_id)?;
    raw.into_change()
  }

  async fn get_change(&self, change_id: i64) -> Result<Option<PendingChange>> {
    let raw: Option<RawChange> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT change_id, tree_id, xref, old_gedcom, new_gedcom,
                    status, actor, recorded_at
             FROM changes WHERE change_id = ?1",
            rusqlite::params![change_id],
            change_from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawChange::into_change).transpose()
  }

  async fn pending_changes(&self, tree_id: i64) -> Result<Vec<PendingChange>> {
    let raws: Vec<RawChange> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT change_id, tree_id, xref, old_gedcom, new_gedcom,
                  status, actor, recorded_at
           FROM changes
           WHERE tree_id = ?1 AND status = 'pending'
           ORDER BY change_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![tree_id], change_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawChange::into_change).collect()
  }

  // ── Import staging ─────────────────────────────────────────────────────

  async fn begin_import(&self, tree_id: i64) -> Result<ImportRun> {
    let run = ImportRun {
      run_id:     Uuid::new_v4(),
      tree_id,
      started_at: Utc::now(),
    };
    let run_id = run.run_id;
    let at_str = encode_dt(run.started_at);

    let found: bool = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if !tree_exists(&tx, tree_id)? {
          return Ok(false);
        }
        // A fresh run owns the staging area outright.
        tx.execute(
          "DELETE FROM chunks WHERE tree_id = ?1",
          rusqlite::params![tree_id],
        )?;
        log_line(&tx, tree_id, &format!("import {run_id} started"), &at_str)?;
        tx.commit()?;
        Ok(true)
      })
      .await?;

    if !found {
      return Err(Error::Core(stemma_core::Error::TreeNotFound(tree_id)));
    }
    Ok(run)
  }

  async fn append_chunk(&self, tree_id: i64, data: Bytes) -> Result<i64> {
    let blob = data.to_vec();

    let seq: i64 = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let seq: i64 = tx.query_row(
          "SELECT COALESCE(MAX(seq), 0) + 1 FROM chunks WHERE tree_id = ?1",
          rusqlite::params![tree_id],
          |row| row.get(0),
        )?;
        tx.execute(
          "INSERT INTO chunks (tree_id, seq, data, imported) VALUES (?1, ?2, ?3, 0)",
          rusqlite::params![tree_id, seq, blob],
        )?;
        tx.commit()?;
        Ok(seq)
      })
      .await?;

    Ok(seq)
  }

  async fn next_unimported_chunk(&self, tree_id: i64) -> Result<Option<StoredChunk>> {
    let raw: Option<RawChunk> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT chunk_id, tree_id, seq, data, imported FROM chunks
             WHERE tree_id = ?1 AND imported = 0
             ORDER BY seq LIMIT 1",
            rusqlite::params![tree_id],
            chunk_from_row,
          )
          .optional()?)
      })
      .await?;

    Ok(raw.map(RawChunk::into_chunk))
  }

  async fn mark_chunk_imported(&self, chunk_id: i64) -> Result<()> {
    let updated: usize = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE chunks SET imported = 1 WHERE chunk_id = ?1",
          rusqlite::params![chunk_id],
        )?)
      })
      .await?;

    if updated == 0 {
      return Err(Error::ChunkNotFound(chunk_id));
    }
    Ok(())
  }

  async fn reassemble_chunks(&self, tree_id: i64) -> Result<Bytes> {
    let blobs: Vec<Vec<u8>> = self
      .conn
      .call(move |conn| {
        let mut stmt =
          conn.prepare("SELECT data FROM chunks WHERE tree_id = ?1 ORDER BY seq")?;
        let rows = stmt
          .query_map(rusqlite::params![tree_id], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<Vec<u8>>>>()?;
        Ok(rows)
      })
      .await?;

    let mut out = BytesMut::with_capacity(blobs.iter().map(Vec::len).sum());
    for blob in &blobs {
      out.extend_from_slice(blob);
    }
    Ok(out.freeze())
  }

  async fn clear_chunks(&self, tree_id: i64) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM chunks WHERE tree_id = ?1",
          rusqlite::params![tree_id],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Audit log ──────────────────────────────────────────────────────────

  async fn append_log(&self, tree_id: i64, message: &str) -> Result<()> {
    let message = message.to_owned();
    let at_str  = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        log_line(conn, tree_id, &message, &at_str)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn logs(&self, tree_id: i64) -> Result<Vec<AuditEntry>> {
    let raws: Vec<RawAuditEntry> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT log_id, tree_id, message, recorded_at FROM logs
           WHERE tree_id = ?1 ORDER BY log_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![tree_id], |row| {
            Ok(RawAuditEntry {
              log_id:      row.get(0)?,
              tree_id:     row.get(1)?,
              message:     row.get(2)?,
              recorded_at: row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAuditEntry::into_entry).collect()
  }
}

// ─── Row mapping ─────────────────────────────────────────────────────────────

fn tree_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTree> {
  Ok(RawTree {
    tree_id:    row.get(0)?,
    name:       row.get(1)?,
    created_at: row.get(2)?,
    settings:   row.get(3)?,
  })
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
  Ok(RawRecord {
    tree_id:     row.get(0)?,
    xref:        row.get(1)?,
    record_type: row.get(2)?,
    gedcom:      row.get(3)?,
    updated_at:  row.get(4)?,
  })
}

fn change_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawChange> {
  Ok(RawChange {
    change_id:   row.get(0)?,
    tree_id:     row.get(1)?,
    xref:        row.get(2)?,
    old_gedcom:  row.get(3)?,
    new_gedcom:  row.get(4)?,
    status:      row.get(5)?,
    actor:       row.get(6)?,
    recorded_at: row.get(7)?,
  })
}

fn chunk_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawChunk> {
  Ok(RawChunk {
    chunk_id: row.get(0)?,
    tree_id:  row.get(1)?,
    seq:      row.get(2)?,
    data:     row.get(3)?,
    imported: row.get(4)?,
  })
}

// ─── Transaction helpers ─────────────────────────────────────────────────────

fn tree_exists(conn: &rusqlite::Connection, tree_id: i64) -> rusqlite::Result<bool> {
  Ok(
    conn
      .query_row(
        "SELECT 1 FROM trees WHERE tree_id = ?1",
        rusqlite::params![tree_id],
        |_| Ok(true),
      )
      .optional()?
      .unwrap_or(false),
  )
}

fn load_change(
  conn: &rusqlite::Connection,
  change_id: i64,
) -> rusqlite::Result<Option<RawChange>> {
  conn
    .query_row(
      "SELECT change_id, tree_id, xref, old_gedcom, new_gedcom,
              status, actor, recorded_at
       FROM changes WHERE change_id = ?1",
      rusqlite::params![change_id],
      change_from_row,
    )
    .optional()
}

fn log_line(
  conn: &rusqlite::Connection,
  tree_id: i64,
  message: &str,
  at: &str,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO logs (tree_id, message, recorded_at) VALUES (?1, ?2, ?3)",
    rusqlite::params![tree_id, message, at],
  )?;
  Ok(())
}

/// Apply a pending change inside `tx`: record upsert or delete, index row
/// swap, status flip and an audit line. The caller commits on `Applied` and
/// lets the transaction roll back otherwise.
fn apply_accept(
  tx: &rusqlite::Transaction<'_>,
  change_id: i64,
  actor: &str,
  at: &str,
) -> rusqlite::Result<Resolution> {
  let Some(mut raw) = load_change(tx, change_id)? else {
    return Ok(Resolution::NotFound);
  };
  if raw.status != "pending" {
    return Ok(Resolution::AlreadyResolved);
  }

  let current: Option<String> = tx
    .query_row(
      "SELECT gedcom FROM records WHERE tree_id = ?1 AND xref = ?2",
      rusqlite::params![raw.tree_id, raw.xref],
      |row| row.get(0),
    )
    .optional()?;

  // The proposal was made against `old_gedcom`; the canonical text must
  // still match it exactly, or the record changed out from under us.
  match &current {
    Some(_) if raw.old_gedcom.is_empty() => {
      return Ok(Resolution::RecordMutated(raw.xref));
    }
    Some(text) if *text != raw.old_gedcom => {
      return Ok(Resolution::RecordMutated(raw.xref));
    }
    None if !raw.old_gedcom.is_empty() => {
      return Ok(Resolution::RecordMissing(raw.xref));
    }
    _ => {}
  }

  if raw.new_gedcom.is_empty() {
    tx.execute(
      "DELETE FROM records WHERE tree_id = ?1 AND xref = ?2",
      rusqlite::params![raw.tree_id, raw.xref],
    )?;
    delete_index_rows(tx, raw.tree_id, &raw.xref)?;
  } else {
    let parsed = match stemma_gedcom::parse_record(&raw.new_gedcom) {
      Ok(parsed) => parsed,
      Err(stemma_gedcom::Error::Malformed { line, reason }) => {
        return Ok(Resolution::Malformed { line, reason });
      }
      Err(other) => {
        return Ok(Resolution::Malformed { line: 0, reason: other.to_string() });
      }
    };
    tx.execute(
      "INSERT INTO records (tree_id, xref, record_type, gedcom, updated_at)
       VALUES (?1, ?2, ?3, ?4, ?5)
       ON CONFLICT (tree_id, xref) DO UPDATE SET
         record_type = excluded.record_type,
         gedcom      = excluded.gedcom,
         updated_at  = excluded.updated_at",
      rusqlite::params![raw.tree_id, raw.xref, parsed.tag, raw.new_gedcom, at],
    )?;
    delete_index_rows(tx, raw.tree_id, &raw.xref)?;
    insert_index_rows(tx, raw.tree_id, &raw.xref, &derive_index(&parsed))?;
  }

  tx.execute(
    "UPDATE changes SET status = 'accepted' WHERE change_id = ?1",
    rusqlite::params![change_id],
  )?;
  log_line(
    tx,
    raw.tree_id,
    &format!("change {change_id} accepted for {xref} by {actor}", xref = raw.xref),
    at,
  )?;

  raw.status = encode_status(ChangeStatus::Accepted).to_owned();
  Ok(Resolution::Applied(raw))
}

fn delete_index_rows(
  conn: &rusqlite::Connection,
  tree_id: i64,
  xref: &str,
) -> rusqlite::Result<()> {
  for table in ["name_index", "date_index", "place_index", "link_index"] {
    conn.execute(
      &format!("DELETE FROM {table} WHERE tree_id = ?1 AND xref = ?2"),
      rusqlite::params![tree_id, xref],
    )?;
  }
  Ok(())
}

fn insert_index_rows(
  conn: &rusqlite::Connection,
  tree_id: i64,
  xref: &str,
  rows: &IndexRows,
) -> rusqlite::Result<()> {
  for name in &rows.names {
    conn.execute(
      "INSERT INTO name_index (tree_id, xref, full, given, surname)
       VALUES (?1, ?2, ?3, ?4, ?5)",
      rusqlite::params![tree_id, xref, name.full, name.given, name.surname],
    )?;
  }
  for date in &rows.dates {
    conn.execute(
      "INSERT INTO date_index (tree_id, xref, fact, raw, day_min, day_max)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      rusqlite::params![tree_id, xref, date.fact, date.raw, date.day_min, date.day_max],
    )?;
  }
  for place in &rows.places {
    conn.execute(
      "INSERT INTO place_index (tree_id, xref, name, level)
       VALUES (?1, ?2, ?3, ?4)",
      rusqlite::params![tree_id, xref, place.name, place.level],
    )?;
  }
  for link in &rows.links {
    conn.execute(
      "INSERT INTO link_index (tree_id, xref, to_xref, tag)
       VALUES (?1, ?2, ?3, ?4)",
      rusqlite::params![tree_id, xref, link.to_xref.as_str(), link.tag],
    )?;
  }
  Ok(())
}
