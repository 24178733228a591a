//! One handler per subcommand. Results go to stdout, skipped-record
//! diagnostics to stderr, so exports can be piped.

use std::path::Path;

use anyhow::Context as _;
use chrono::{Datelike, NaiveDate};
use stemma_core::{
  change::{Actor, PendingChange},
  record::{RecordKind, Xref},
  store::TreeStore,
  tree::{Tree, TreeSettings},
};
use stemma_import::{ImportOptions, ImportSummary, Importer, facade};
use stemma_store_sqlite::SqliteStore;

// ─── Trees ────────────────────────────────────────────────────────────────────

pub async fn tree_create(
  store: &SqliteStore,
  name: &str,
  auto_accept: bool,
  source_name: Option<String>,
) -> anyhow::Result<()> {
  let settings = TreeSettings {
    auto_accept,
    source_name: source_name.unwrap_or_else(|| TreeSettings::default().source_name),
  };
  let tree = store.create_tree(name, settings).await?;
  println!("created tree {:?} (id {})", tree.name, tree.tree_id);
  Ok(())
}

pub async fn tree_list(store: &SqliteStore) -> anyhow::Result<()> {
  let trees = store.list_trees().await?;
  if trees.is_empty() {
    println!("no trees");
    return Ok(());
  }
  for tree in trees {
    let records = store.list_records(tree.tree_id, None).await?.len();
    let pending = store.pending_changes(tree.tree_id).await?.len();
    let mode = if tree.settings.auto_accept { "auto-accept" } else { "moderated" };
    println!(
      "{:>4}  {:<24} {:>6} records  {:>4} pending  {}",
      tree.tree_id, tree.name, records, pending, mode,
    );
  }
  Ok(())
}

pub async fn tree_delete(store: &SqliteStore, name: &str) -> anyhow::Result<()> {
  let tree = tree_by_name(store, name).await?;
  store.delete_tree(tree.tree_id).await?;
  println!("deleted tree {:?}", tree.name);
  Ok(())
}

// ─── Import ───────────────────────────────────────────────────────────────────

pub async fn import(
  store: &SqliteStore,
  chunk_size: usize,
  file: &Path,
  tree_name: &str,
  declared_encoding: Option<String>,
  strict: bool,
  user: String,
) -> anyhow::Result<()> {
  let tree = tree_by_name(store, tree_name).await?;
  let actor = actor_for(&tree, user);
  let bytes = tokio::fs::read(file)
    .await
    .with_context(|| format!("failed to read {}", file.display()))?;

  let options = ImportOptions { chunk_size, declared_encoding, strict };
  let importer = Importer::with_options(store.clone(), options);
  let summary = importer.import_bytes(tree.tree_id, &bytes, &actor).await?;
  report(&summary, &actor, tree_name);
  Ok(())
}

pub async fn resume(
  store: &SqliteStore,
  tree_name: &str,
  user: String,
) -> anyhow::Result<()> {
  let tree = tree_by_name(store, tree_name).await?;
  let actor = actor_for(&tree, user);
  let importer = Importer::new(store.clone());
  let summary = importer.resume(tree.tree_id, &actor).await?;
  report(&summary, &actor, tree_name);
  Ok(())
}

fn report(summary: &ImportSummary, actor: &Actor, tree_name: &str) {
  println!(
    "imported {} records in {} chunks ({})",
    summary.imported,
    summary.chunks,
    summary.encoding.name(),
  );
  if let Some(source) = &summary.source {
    println!("source system: {source}");
  }
  for skip in &summary.skipped {
    eprintln!("skipped record {}: {}", skip.position, skip.reason);
  }
  if !actor.auto_accept && summary.imported > 0 {
    println!("changes are queued; review them with `stemma changes --tree {tree_name}`");
  }
}

// ─── Change ledger ────────────────────────────────────────────────────────────

pub async fn changes(
  store: &SqliteStore,
  tree_name: &str,
  json: bool,
) -> anyhow::Result<()> {
  let tree = tree_by_name(store, tree_name).await?;
  let changes = store.pending_changes(tree.tree_id).await?;
  if json {
    println!("{}", serde_json::to_string_pretty(&changes)?);
    return Ok(());
  }
  if changes.is_empty() {
    println!("no pending changes");
    return Ok(());
  }
  for change in changes {
    println!(
      "{:>6}  {:<20} {:<7} {:<16} {}",
      change.change_id,
      change.xref,
      verb(&change),
      change.actor,
      change.recorded_at.format("%Y-%m-%d %H:%M"),
    );
  }
  Ok(())
}

pub async fn accept(
  store: &SqliteStore,
  change_id: i64,
  user: String,
) -> anyhow::Result<()> {
  let change = store.accept_change(change_id, &Actor::new(user)).await?;
  println!("change {} accepted: record {} {}d", change.change_id, change.xref, verb(&change));
  Ok(())
}

pub async fn reject(
  store: &SqliteStore,
  change_id: i64,
  user: String,
) -> anyhow::Result<()> {
  let change = store.reject_change(change_id, &Actor::new(user)).await?;
  println!("change {} rejected: record {} untouched", change.change_id, change.xref);
  Ok(())
}

fn verb(change: &PendingChange) -> &'static str {
  if change.is_creation() {
    "create"
  } else if change.is_deletion() {
    "delete"
  } else {
    "update"
  }
}

// ─── Records ──────────────────────────────────────────────────────────────────

pub async fn show(
  store: &SqliteStore,
  tree_name: &str,
  xref: &str,
  json: bool,
) -> anyhow::Result<()> {
  let tree = tree_by_name(store, tree_name).await?;
  let xref = parse_xref(xref)?;
  let record = store
    .get_record(tree.tree_id, &xref)
    .await?
    .with_context(|| format!("no record {xref} in tree {tree_name:?}"))?;
  if json {
    println!("{}", serde_json::to_string_pretty(&record)?);
  } else {
    print!("{}", record.gedcom);
  }
  Ok(())
}

pub async fn add(
  store: &SqliteStore,
  tree_name: &str,
  kind: &str,
  file: Option<&Path>,
  user: String,
) -> anyhow::Result<()> {
  let tree = tree_by_name(store, tree_name).await?;
  let actor = actor_for(&tree, user);
  let kind = parse_kind(kind)?;
  let text = payload(file).await?;
  let change = facade::create_record(store, tree.tree_id, kind, &text, &actor).await?;
  resolved(&change);
  Ok(())
}

pub async fn edit(
  store: &SqliteStore,
  tree_name: &str,
  xref: &str,
  file: Option<&Path>,
  user: String,
) -> anyhow::Result<()> {
  let tree = tree_by_name(store, tree_name).await?;
  let actor = actor_for(&tree, user);
  let xref = parse_xref(xref)?;
  let text = payload(file).await?;
  let change = facade::update_record(store, tree.tree_id, &xref, &text, &actor).await?;
  resolved(&change);
  Ok(())
}

pub async fn remove(
  store: &SqliteStore,
  tree_name: &str,
  xref: &str,
  user: String,
) -> anyhow::Result<()> {
  let tree = tree_by_name(store, tree_name).await?;
  let actor = actor_for(&tree, user);
  let xref = parse_xref(xref)?;
  let change = facade::delete_record(store, tree.tree_id, &xref, &actor).await?;
  resolved(&change);
  Ok(())
}

fn resolved(change: &PendingChange) {
  if change.status.is_pending() {
    println!("record {}: {} queued as change {}", change.xref, verb(change), change.change_id);
  } else {
    println!("record {} {}d", change.xref, verb(change));
  }
}

pub async fn export(
  store: &SqliteStore,
  tree_name: &str,
  output: Option<&Path>,
) -> anyhow::Result<()> {
  let tree = tree_by_name(store, tree_name).await?;
  let text = facade::export_tree(store, tree.tree_id).await?;
  match output {
    Some(path) => {
      tokio::fs::write(path, &text)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
      println!("wrote {} ({} bytes)", path.display(), text.len());
    }
    None => print!("{text}"),
  }
  Ok(())
}

// ─── Queries ──────────────────────────────────────────────────────────────────

pub async fn search(
  store: &SqliteStore,
  tree_name: &str,
  name: Option<String>,
  year: Option<i32>,
  place: Option<String>,
) -> anyhow::Result<()> {
  let tree = tree_by_name(store, tree_name).await?;
  let mut hits: Option<Vec<Xref>> = None;
  if let Some(needle) = name {
    narrow(&mut hits, store.find_by_name(tree.tree_id, &needle).await?);
  }
  if let Some(year) = year {
    let (from_day, to_day) = year_bounds(year)?;
    narrow(&mut hits, store.find_by_date_range(tree.tree_id, from_day, to_day).await?);
  }
  if let Some(needle) = place {
    narrow(&mut hits, store.find_by_place(tree.tree_id, &needle).await?);
  }
  let Some(hits) = hits else {
    anyhow::bail!("give at least one of --name, --year or --place");
  };
  if hits.is_empty() {
    println!("no matches");
    return Ok(());
  }
  for xref in hits {
    match store.get_record(tree.tree_id, &xref).await? {
      Some(record) => println!(
        "{:<20} {:<6} {}",
        xref,
        record.record_type,
        primary_name(&record.gedcom).unwrap_or(""),
      ),
      None => println!("{xref}"),
    }
  }
  Ok(())
}

/// Narrows the running result to identifiers also present in `found`. The
/// first criterion seeds the set, later ones intersect with it.
fn narrow(hits: &mut Option<Vec<Xref>>, found: Vec<Xref>) {
  match hits {
    None => *hits = Some(found),
    Some(held) => held.retain(|xref| found.contains(xref)),
  }
}

/// The value of the record's first `1 NAME` line, if it has one. Stored text
/// is canonical, so a plain prefix scan is enough.
fn primary_name(gedcom: &str) -> Option<&str> {
  gedcom.lines().find_map(|line| line.strip_prefix("1 NAME "))
}

pub async fn log(store: &SqliteStore, tree_name: &str) -> anyhow::Result<()> {
  let tree = tree_by_name(store, tree_name).await?;
  for entry in store.logs(tree.tree_id).await? {
    println!("{}  {}", entry.recorded_at.format("%Y-%m-%d %H:%M:%S"), entry.message);
  }
  Ok(())
}

// ─── Shared helpers ───────────────────────────────────────────────────────────

async fn tree_by_name(store: &SqliteStore, name: &str) -> anyhow::Result<Tree> {
  store
    .get_tree_by_name(name)
    .await?
    .with_context(|| format!("no tree named {name:?}"))
}

fn actor_for(tree: &Tree, name: String) -> Actor {
  Actor { name, auto_accept: tree.settings.auto_accept }
}

fn parse_xref(label: &str) -> anyhow::Result<Xref> {
  Xref::new(label).with_context(|| format!("invalid record identifier {label:?}"))
}

fn parse_kind(name: &str) -> anyhow::Result<RecordKind> {
  let kind = match name.to_ascii_lowercase().as_str() {
    "individual" | "indi" => RecordKind::Individual,
    "family" | "fam" => RecordKind::Family,
    "source" | "sour" => RecordKind::Source,
    "media" | "obje" | "other" => RecordKind::Media,
    _ => anyhow::bail!("unknown record kind {name:?} (individual, family, source or media)"),
  };
  Ok(kind)
}

async fn payload(file: Option<&Path>) -> anyhow::Result<String> {
  match file {
    Some(path) => tokio::fs::read_to_string(path)
      .await
      .with_context(|| format!("failed to read {}", path.display())),
    None => {
      use std::io::Read as _;
      let mut text = String::new();
      std::io::stdin().read_to_string(&mut text).context("failed to read stdin")?;
      Ok(text)
    }
  }
}

/// Inclusive day-number bounds of a calendar year, in the same day-of-era
/// scale the date index stores.
fn year_bounds(year: i32) -> anyhow::Result<(i64, i64)> {
  let first = NaiveDate::from_ymd_opt(year, 1, 1).context("year out of range")?;
  let last = NaiveDate::from_ymd_opt(year, 12, 31).context("year out of range")?;
  Ok((i64::from(first.num_days_from_ce()), i64::from(last.num_days_from_ce())))
}
