//! SQL schema for the Stemma SQLite store.
//!
//! Executed at every connection startup; idempotent. Future migrations will
//! be gated on `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS trees (
    tree_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    created_at  TEXT NOT NULL,    -- ISO 8601 UTC
    settings    TEXT NOT NULL     -- JSON-encoded TreeSettings
);

-- Canonical record text. Rows are only ever written by accepting a
-- change; nothing mutates `gedcom` outside that path.
CREATE TABLE IF NOT EXISTS records (
    tree_id     INTEGER NOT NULL REFERENCES trees(tree_id) ON DELETE CASCADE,
    xref        TEXT NOT NULL,
    record_type TEXT NOT NULL,    -- level-0 tag: 'INDI', 'FAM', ...
    gedcom      TEXT NOT NULL,    -- full record text, newline-terminated lines
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (tree_id, xref)
);

-- Ledger of proposed edits. status transitions pending -> accepted or
-- pending -> rejected, exactly once; resolved rows are never reopened.
CREATE TABLE IF NOT EXISTS changes (
    change_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    tree_id     INTEGER NOT NULL REFERENCES trees(tree_id) ON DELETE CASCADE,
    xref        TEXT NOT NULL,
    old_gedcom  TEXT NOT NULL,    -- '' for a creation
    new_gedcom  TEXT NOT NULL,    -- '' for a deletion
    status      TEXT NOT NULL DEFAULT 'pending',
    actor       TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

-- At most one unresolved change per record.
CREATE UNIQUE INDEX IF NOT EXISTS changes_pending_unique
    ON changes(tree_id, xref) WHERE status = 'pending';

-- Derived search rows, rebuilt whenever a change is accepted.
CREATE TABLE IF NOT EXISTS name_index (
    tree_id     INTEGER NOT NULL REFERENCES trees(tree_id) ON DELETE CASCADE,
    xref        TEXT NOT NULL,
    full        TEXT NOT NULL,
    given       TEXT NOT NULL,
    surname     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS date_index (
    tree_id     INTEGER NOT NULL REFERENCES trees(tree_id) ON DELETE CASCADE,
    xref        TEXT NOT NULL,
    fact        TEXT NOT NULL,    -- tag of the enclosing structure: 'BIRT', ...
    raw         TEXT NOT NULL,
    day_min     INTEGER,          -- inclusive day-number bounds, NULL when open
    day_max     INTEGER
);

CREATE TABLE IF NOT EXISTS place_index (
    tree_id     INTEGER NOT NULL REFERENCES trees(tree_id) ON DELETE CASCADE,
    xref        TEXT NOT NULL,
    name        TEXT NOT NULL,
    level       INTEGER NOT NULL  -- 0 = most specific fragment
);

CREATE TABLE IF NOT EXISTS link_index (
    tree_id     INTEGER NOT NULL REFERENCES trees(tree_id) ON DELETE CASCADE,
    xref        TEXT NOT NULL,
    to_xref     TEXT NOT NULL,
    tag         TEXT NOT NULL
);

-- Staged upload chunks, cleared when an import run completes.
CREATE TABLE IF NOT EXISTS chunks (
    chunk_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    tree_id     INTEGER NOT NULL REFERENCES trees(tree_id) ON DELETE CASCADE,
    seq         INTEGER NOT NULL, -- 1-based arrival order
    data        BLOB NOT NULL,
    imported    INTEGER NOT NULL DEFAULT 0,
    UNIQUE (tree_id, seq)
);

-- Per-prefix allocation cursors; values only ever move forward.
CREATE TABLE IF NOT EXISTS counters (
    tree_id     INTEGER NOT NULL REFERENCES trees(tree_id) ON DELETE CASCADE,
    prefix      TEXT NOT NULL,
    next_value  INTEGER NOT NULL,
    PRIMARY KEY (tree_id, prefix)
);

CREATE TABLE IF NOT EXISTS logs (
    log_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    tree_id     INTEGER NOT NULL REFERENCES trees(tree_id) ON DELETE CASCADE,
    message     TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS changes_tree_status_idx ON changes(tree_id, status);
CREATE INDEX IF NOT EXISTS name_index_xref_idx     ON name_index(tree_id, xref);
CREATE INDEX IF NOT EXISTS name_index_surname_idx  ON name_index(tree_id, surname);
CREATE INDEX IF NOT EXISTS date_index_xref_idx     ON date_index(tree_id, xref);
CREATE INDEX IF NOT EXISTS date_index_range_idx    ON date_index(tree_id, day_min, day_max);
CREATE INDEX IF NOT EXISTS place_index_xref_idx    ON place_index(tree_id, xref);
CREATE INDEX IF NOT EXISTS place_index_name_idx    ON place_index(tree_id, name);
CREATE INDEX IF NOT EXISTS link_index_xref_idx     ON link_index(tree_id, xref);
CREATE INDEX IF NOT EXISTS link_index_to_idx       ON link_index(tree_id, to_xref);
CREATE INDEX IF NOT EXISTS chunks_tree_seq_idx     ON chunks(tree_id, imported, seq);

PRAGMA user_version = 1;
";
