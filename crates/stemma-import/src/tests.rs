//! Pipeline tests against the SQLite backend.

use bytes::Bytes;
use stemma_core::{
  change::{Actor, ChangeStatus},
  record::{RecordKind, Xref},
  store::TreeStore,
  tree::TreeSettings,
};
use stemma_gedcom::encoding::Encoding;
use stemma_store_sqlite::SqliteStore;

use crate::{
  ImportOptions, Importer,
  facade::{create_record, delete_record, export_tree, update_record},
};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory().await.expect("in-memory store")
}

async fn tree(store: &SqliteStore) -> i64 {
  store
    .create_tree("main", TreeSettings::default())
    .await
    .expect("create tree")
    .tree_id
}

fn importer(store: &SqliteStore) -> Importer<SqliteStore> {
  Importer::new(store.clone())
}

fn xref(label: &str) -> Xref {
  Xref::new(label).expect("valid xref")
}

fn reviewer() -> Actor {
  Actor::new("alice")
}

fn moderator() -> Actor {
  Actor::new("bob")
}

fn admin() -> Actor {
  Actor::auto_accepting("admin")
}

// ─── File import ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn one_record_file_queues_one_pending_change() {
  let store = store().await;
  let tree_id = tree(&store).await;
  let file =
    "0 HEAD\n1 SOUR GRAMPS\n1 CHAR UTF-8\n0 @@ INDI\n1 NAME John /DOE/\n1 SEX M";

  let summary = importer(&store)
    .import_bytes(tree_id, file.as_bytes(), &reviewer())
    .await
    .expect("import");
  assert_eq!(summary.imported, 1);
  assert!(summary.skipped.is_empty());
  assert_eq!(summary.encoding, Encoding::Utf8);
  assert_eq!(summary.source.as_deref(), Some("GRAMPS"));

  let pending = store.pending_changes(tree_id).await.expect("pending");
  assert_eq!(pending.len(), 1);
  let change = &pending[0];
  assert_eq!(change.xref, xref("I1"));
  assert!(change.is_creation());
  assert!(change.new_gedcom.starts_with("0 @I1@ INDI\n1 NAME John /DOE/\n"));
  // nothing canonical until the change is accepted
  let record = store.get_record(tree_id, &change.xref).await.expect("get");
  assert!(record.is_none());
}

#[tokio::test]
async fn auto_accepting_import_writes_canonical_records() {
  let store = store().await;
  let tree_id = tree(&store).await;
  let file = concat!(
    "0 HEAD\n1 CHAR UTF-8\n",
    "0 @@ INDI\n1 NAME John /DOE/\n",
    "0 @@ INDI\n1 NAME Jane /DOE/\n",
    "0 TRLR\n",
  );

  let summary = importer(&store)
    .import_bytes(tree_id, file.as_bytes(), &admin())
    .await
    .expect("import");
  assert_eq!(summary.imported, 2);
  assert!(store.pending_changes(tree_id).await.expect("pending").is_empty());

  let record = store
    .get_record(tree_id, &xref("I1"))
    .await
    .expect("get")
    .expect("stored");
  assert!(record.gedcom.contains("\n1 CHAN\n"));
  assert!(record.gedcom.ends_with("2 _USER admin\n"));

  let hits = store.find_by_name(tree_id, "jane").await.expect("search");
  assert_eq!(hits, vec![xref("I2")]);
}

#[tokio::test]
async fn reimport_proposes_updates_against_current_text() {
  let store = store().await;
  let tree_id = tree(&store).await;
  let file = "0 @I1@ INDI\n1 NAME John /DOE/\n";

  importer(&store)
    .import_bytes(tree_id, file.as_bytes(), &admin())
    .await
    .expect("first import");
  let before = store
    .get_record(tree_id, &xref("I1"))
    .await
    .expect("get")
    .expect("stored");

  importer(&store)
    .import_bytes(tree_id, file.as_bytes(), &reviewer())
    .await
    .expect("second import");
  let pending = store.pending_changes(tree_id).await.expect("pending");
  assert_eq!(pending.len(), 1);
  assert!(!pending[0].is_creation());
  assert_eq!(pending[0].old_gedcom, before.gedcom);
  assert!(pending[0].new_gedcom.ends_with("2 _USER alice\n"));
}

#[tokio::test]
async fn byte_order_mark_beats_the_declared_character_set() {
  let store = store().await;
  let tree_id = tree(&store).await;
  // a UTF-16LE BOM on a file whose own header claims ANSEL
  let text = "0 HEAD\n1 CHAR ANSEL\n0 @@ INDI\n1 NAME Zoë /Innes/\n0 TRLR\n";
  let mut bytes = vec![0xFF, 0xFE];
  for unit in text.encode_utf16() {
    bytes.extend_from_slice(&unit.to_le_bytes());
  }

  let summary = importer(&store)
    .import_bytes(tree_id, &bytes, &admin())
    .await
    .expect("import");
  assert_eq!(summary.encoding, Encoding::Utf16Le);
  assert_eq!(summary.imported, 1);

  let record = store
    .get_record(tree_id, &xref("I1"))
    .await
    .expect("get")
    .expect("stored");
  assert!(record.gedcom.contains("Zoë"));
}

#[tokio::test]
async fn unsupported_encoding_fails_before_any_chunk_persists() {
  let store = store().await;
  let tree_id = tree(&store).await;
  let file = b"0 HEAD\n1 CHAR EBCDIC\n0 @I1@ INDI\n1 SEX M\n0 TRLR\n";

  let err = importer(&store)
    .import_bytes(tree_id, file, &reviewer())
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Gedcom(stemma_gedcom::Error::UnsupportedEncoding(_))
  ));
  let staged = store.next_unimported_chunk(tree_id).await.expect("peek");
  assert!(staged.is_none());
  assert!(store.pending_changes(tree_id).await.expect("pending").is_empty());
}

#[tokio::test]
async fn many_records_stage_as_multiple_chunks() {
  let store = store().await;
  let tree_id = tree(&store).await;
  let options = ImportOptions { chunk_size: 128, ..ImportOptions::default() };
  let importer = Importer::with_options(store.clone(), options);

  let mut file = String::from("0 HEAD\n1 CHAR UTF-8\n");
  for i in 1..=20 {
    file.push_str(&format!("0 @@ INDI\n1 NAME Person /N{i}/\n1 SEX M\n"));
  }
  file.push_str("0 TRLR\n");

  let mut session = importer.begin(tree_id).await.expect("begin");
  for piece in file.as_bytes().chunks(37) {
    session.feed(piece).await.expect("feed");
  }
  let summary = session.finish(&admin()).await.expect("finish");
  assert_eq!(summary.imported, 20);
  assert!(summary.chunks > 1);

  let people = store
    .list_records(tree_id, Some(RecordKind::Individual))
    .await
    .expect("list");
  assert_eq!(people.len(), 20);
}

#[tokio::test]
async fn utf16_stream_survives_arbitrary_feed_boundaries() {
  let store = store().await;
  let tree_id = tree(&store).await;
  let mut text = String::from("0 HEAD\n1 CHAR UNICODE\n");
  for i in 1..=60 {
    text.push_str(&format!("0 @@ INDI\n1 NAME Zoë /N{i}/\n"));
  }
  text.push_str("0 TRLR\n");
  // BOM-less big-endian, as GEDCOM's UNICODE historically means
  let mut bytes = Vec::new();
  for unit in text.encode_utf16() {
    bytes.extend_from_slice(&unit.to_be_bytes());
  }

  let importer = importer(&store);
  let mut session = importer.begin(tree_id).await.expect("begin");
  for piece in bytes.chunks(97) {
    session.feed(piece).await.expect("feed");
  }
  let summary = session.finish(&admin()).await.expect("finish");
  assert_eq!(summary.encoding, Encoding::Utf16Be);
  assert_eq!(summary.imported, 60);

  let hits = store.find_by_name(tree_id, "zoë").await.expect("search");
  assert_eq!(hits.len(), 60);
}

#[tokio::test]
async fn resume_processes_leftover_chunks() {
  let store = store().await;
  let tree_id = tree(&store).await;
  // chunks staged by a run that died before processing
  store.begin_import(tree_id).await.expect("begin");
  store
    .append_chunk(tree_id, Bytes::from_static(b"0 @I1@ INDI\n1 NAME A /B/\n"))
    .await
    .expect("chunk");
  store
    .append_chunk(tree_id, Bytes::from_static(b"0 @I2@ INDI\n1 NAME C /D/\n"))
    .await
    .expect("chunk");

  let summary = importer(&store)
    .resume(tree_id, &admin())
    .await
    .expect("resume");
  assert_eq!(summary.imported, 2);
  assert_eq!(summary.chunks, 2);
  assert_eq!(summary.encoding, Encoding::Utf8);

  let record = store.get_record(tree_id, &xref("I2")).await.expect("get");
  assert!(record.is_some());
  let staged = store.next_unimported_chunk(tree_id).await.expect("peek");
  assert!(staged.is_none());
}

// ─── Failure handling ────────────────────────────────────────────────────────

const MIXED_FILE: &str = concat!(
  "0 HEAD\n1 CHAR UTF-8\n",
  "0 @I1@ INDI\n1 NAME A /B/\n",
  "0 @I2@ INDI\n3 DATE nonsense\n",
  "0 @I3@ INDI\n1 NAME C /D/\n",
  "0 TRLR\n",
);

#[tokio::test]
async fn lenient_import_skips_bad_records_and_reports_positions() {
  let store = store().await;
  let tree_id = tree(&store).await;

  let summary = importer(&store)
    .import_bytes(tree_id, MIXED_FILE.as_bytes(), &admin())
    .await
    .expect("import");
  assert_eq!(summary.imported, 2);
  assert_eq!(summary.skipped.len(), 1);
  // the header is record 1, so the broken record is the third
  assert_eq!(summary.skipped[0].position, 3);
  assert!(summary.skipped[0].reason.contains("line 2"));

  let i2 = store.get_record(tree_id, &xref("I2")).await.expect("get");
  assert!(i2.is_none());
  let i3 = store.get_record(tree_id, &xref("I3")).await.expect("get");
  assert!(i3.is_some());
}

#[tokio::test]
async fn strict_import_aborts_on_first_bad_record() {
  let store = store().await;
  let tree_id = tree(&store).await;
  let options = ImportOptions { strict: true, ..ImportOptions::default() };
  let importer = Importer::with_options(store.clone(), options);

  let err = importer
    .import_bytes(tree_id, MIXED_FILE.as_bytes(), &admin())
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::Gedcom(_)));

  // records before the failure already went through the ledger; the
  // unfinished chunk stays staged for a later resume
  let i1 = store.get_record(tree_id, &xref("I1")).await.expect("get");
  assert!(i1.is_some());
  let staged = store.next_unimported_chunk(tree_id).await.expect("peek");
  assert!(staged.is_some());
}

#[tokio::test]
async fn duplicate_record_in_one_file_is_skipped_as_conflict() {
  let store = store().await;
  let tree_id = tree(&store).await;
  let file = "0 @I1@ INDI\n1 NAME A /B/\n0 @I1@ INDI\n1 NAME A2 /B/\n";

  let summary = importer(&store)
    .import_bytes(tree_id, file.as_bytes(), &reviewer())
    .await
    .expect("import");
  assert_eq!(summary.imported, 1);
  assert_eq!(summary.skipped.len(), 1);
  assert_eq!(summary.skipped[0].position, 2);
  assert!(summary.skipped[0].reason.contains("pending change"));
}

// ─── Single records ──────────────────────────────────────────────────────────

#[tokio::test]
async fn pointerless_record_is_malformed() {
  let store = store().await;
  let tree_id = tree(&store).await;

  let err = importer(&store)
    .import_record(tree_id, "0 INDI\n1 SEX M\n", &reviewer())
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(stemma_core::Error::MalformedRecord { .. })
  ));
}

#[tokio::test]
async fn vendor_record_allocates_media_identifier() {
  let store = store().await;
  let tree_id = tree(&store).await;

  let change = importer(&store)
    .import_record(tree_id, "0 @@ _LOC\n1 NAME Springfield\n", &admin())
    .await
    .expect("import");
  assert_eq!(change.xref, xref("O1"));
  assert_eq!(change.status, ChangeStatus::Accepted);
}

#[tokio::test]
async fn stored_text_is_reformatted_canonically() {
  let store = store().await;
  let tree_id = tree(&store).await;
  let messy = "0 @i9@ indi\r\n1 name Ada /Byron/\r\n\r\n1 sex F\r\n";

  let change = importer(&store)
    .import_record(tree_id, messy, &admin())
    .await
    .expect("import");
  assert_eq!(change.xref, xref("i9"));
  assert!(change.new_gedcom.starts_with(
    "0 @i9@ INDI\n1 NAME Ada /Byron/\n1 SEX F\n1 CHAN\n"
  ));
}

// ─── Facade ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_validates_the_opening_marker() {
  let store = store().await;
  let tree_id = tree(&store).await;

  // payload tag disagrees with the requested kind
  let err = create_record(
    &store,
    tree_id,
    RecordKind::Family,
    "0 @@ INDI\n1 SEX M\n",
    &reviewer(),
  )
  .await
  .unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(stemma_core::Error::MalformedRecord { .. })
  ));

  // labelled payloads are not creations
  let err = create_record(
    &store,
    tree_id,
    RecordKind::Individual,
    "0 @I1@ INDI\n1 SEX M\n",
    &reviewer(),
  )
  .await
  .unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(stemma_core::Error::MalformedRecord { .. })
  ));

  let change = create_record(
    &store,
    tree_id,
    RecordKind::Individual,
    "0 @@ INDI\n1 NAME New /Person/\n",
    &reviewer(),
  )
  .await
  .expect("create");
  assert_eq!(change.xref, xref("I1"));
  assert_eq!(change.status, ChangeStatus::Pending);
  assert!(change.is_creation());
}

#[tokio::test]
async fn update_and_delete_flow_through_the_ledger() {
  let store = store().await;
  let tree_id = tree(&store).await;
  let created = create_record(
    &store,
    tree_id,
    RecordKind::Individual,
    "0 @@ INDI\n1 NAME Ada /Byron/\n",
    &admin(),
  )
  .await
  .expect("create");
  let target = created.xref.clone();
  let before = store
    .get_record(tree_id, &target)
    .await
    .expect("get")
    .expect("stored");

  let updated = update_record(
    &store,
    tree_id,
    &target,
    "0 @I1@ INDI\n1 NAME Ada /Lovelace/\n",
    &reviewer(),
  )
  .await
  .expect("update");
  assert_eq!(updated.old_gedcom, before.gedcom);
  store
    .accept_change(updated.change_id, &moderator())
    .await
    .expect("accept");
  let current = store
    .get_record(tree_id, &target)
    .await
    .expect("get")
    .expect("stored");
  assert!(current.gedcom.contains("Lovelace"));

  let deletion = delete_record(&store, tree_id, &target, &reviewer())
    .await
    .expect("delete");
  assert!(deletion.is_deletion());
  store
    .accept_change(deletion.change_id, &moderator())
    .await
    .expect("accept");
  let gone = store.get_record(tree_id, &target).await.expect("get");
  assert!(gone.is_none());
}

#[tokio::test]
async fn update_with_wrong_pointer_is_malformed() {
  let store = store().await;
  let tree_id = tree(&store).await;
  create_record(
    &store,
    tree_id,
    RecordKind::Individual,
    "0 @@ INDI\n1 SEX F\n",
    &admin(),
  )
  .await
  .expect("create");

  let err = update_record(
    &store,
    tree_id,
    &xref("I1"),
    "0 @I99@ INDI\n1 SEX F\n",
    &reviewer(),
  )
  .await
  .unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(stemma_core::Error::MalformedRecord { .. })
  ));
}

#[tokio::test]
async fn deleting_missing_record_is_not_found() {
  let store = store().await;
  let tree_id = tree(&store).await;

  let err = delete_record(&store, tree_id, &xref("I404"), &reviewer())
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(stemma_core::Error::RecordNotFound(_))
  ));
}

// ─── Export ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn export_frames_records_between_header_and_trailer() {
  let store = store().await;
  let tree_id = tree(&store).await;
  let file = concat!(
    "0 HEAD\n1 CHAR UTF-8\n",
    "0 @@ INDI\n1 NAME A /B/\n",
    "0 @@ FAM\n1 HUSB @I1@\n",
    "0 @@ INDI\n1 NAME C /D/\n",
    "0 TRLR\n",
  );
  importer(&store)
    .import_bytes(tree_id, file.as_bytes(), &admin())
    .await
    .expect("import");

  let out = export_tree(&store, tree_id).await.expect("export");
  assert!(out.starts_with("0 HEAD\n1 SOUR STEMMA\n"));
  assert!(out.ends_with("0 TRLR\n"));
  // individuals precede the family regardless of arrival order
  let i1 = out.find("0 @I1@ INDI\n").expect("I1 exported");
  let i2 = out.find("0 @I2@ INDI\n").expect("I2 exported");
  let f1 = out.find("0 @F1@ FAM\n").expect("F1 exported");
  assert!(i1 < i2 && i2 < f1);

  // the export is itself importable
  let copy = store
    .create_tree("copy", TreeSettings::default())
    .await
    .expect("tree")
    .tree_id;
  let summary = importer(&store)
    .import_bytes(copy, out.as_bytes(), &admin())
    .await
    .expect("reimport");
  assert_eq!(summary.imported, 3);
  assert_eq!(summary.source.as_deref(), Some("STEMMA"));
}

#[tokio::test]
async fn export_orders_identifiers_numerically() {
  let store = store().await;
  let tree_id = tree(&store).await;
  for _ in 0..11 {
    create_record(
      &store,
      tree_id,
      RecordKind::Individual,
      "0 @@ INDI\n1 SEX U\n",
      &admin(),
    )
    .await
    .expect("create");
  }

  let out = export_tree(&store, tree_id).await.expect("export");
  let i2 = out.find("0 @I2@ INDI").expect("I2 exported");
  let i10 = out.find("0 @I10@ INDI").expect("I10 exported");
  assert!(i2 < i10);
}
