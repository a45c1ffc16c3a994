//! Append-only violation ledgers.
//!
//! Every backend stores the same hash-chained, signed `LedgerEntry` rows:
//! - `JsonLedger`: `violations.json`, a pretty-printed JSON array rewritten
//!   through a temp file on each append
//! - `SqliteLedger`: `violations.db`
//! - `InMemoryLedger`: tests
//!
//! A ledger that cannot be parsed is an error, never silently replaced.
//!
//! `open_ledger` hands out one shared handle per ledger file for the whole
//! process, so every writer appends under the same lock. SQLite appends
//! additionally run in an `IMMEDIATE` transaction, which serializes writers
//! in other processes too.

use anyhow::{anyhow, Context, Result};
use ed25519_dalek::SigningKey;
use rusqlite::{params, Connection, TransactionBehavior};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use super::{LedgerEntry, UnsealedEntry};
use crate::seal::GENESIS_HASH;

pub const JSON_LEDGER_FILE: &str = "violations.json";
pub const SQLITE_LEDGER_FILE: &str = "violations.db";

const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A ledger shared by every writer in the process.
pub type SharedLedger = Arc<Mutex<Box<dyn Ledger>>>;

type OpenLedgers = Mutex<HashMap<PathBuf, Weak<Mutex<Box<dyn Ledger>>>>>;

/// Ledgers currently open, keyed by canonical file path.
static OPEN_LEDGERS: OnceLock<OpenLedgers> = OnceLock::new();

pub trait Ledger: Send {
    fn name(&self) -> &'static str;

    /// All entries in append order.
    fn entries(&self) -> Result<Vec<LedgerEntry>>;

    /// Hash of the last entry, or the genesis hash when empty.
    fn head(&self) -> Result<[u8; 32]>;

    fn push(&mut self, entry: &LedgerEntry) -> Result<()>;

    /// Chains `unsealed` after the current head, signs it, and stores it.
    fn append(&mut self, unsealed: UnsealedEntry, signing_key: &SigningKey) -> Result<LedgerEntry> {
        let prev_hash = self.head()?;
        let entry = unsealed.seal(&prev_hash, signing_key)?;
        self.push(&entry)?;
        Ok(entry)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LedgerBackend {
    #[default]
    Json,
    Sqlite,
}

impl LedgerBackend {
    pub fn file_name(&self) -> &'static str {
        match self {
            LedgerBackend::Json => JSON_LEDGER_FILE,
            LedgerBackend::Sqlite => SQLITE_LEDGER_FILE,
        }
    }
}

impl fmt::Display for LedgerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LedgerBackend::Json => "json",
            LedgerBackend::Sqlite => "sqlite",
        })
    }
}

impl FromStr for LedgerBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LedgerBackend::Json),
            "sqlite" => Ok(LedgerBackend::Sqlite),
            other => Err(anyhow!(
                "unknown ledger backend '{}' (expected json or sqlite)",
                other
            )),
        }
    }
}

/// Opens the ledger for `backend` inside `dir`, creating the directory.
///
/// Returns the handle already open for that file if there is one.
pub fn open_ledger(backend: LedgerBackend, dir: &Path) -> Result<SharedLedger> {
    fs::create_dir_all(dir)
        .with_context(|| format!("create ledger directory {}", dir.display()))?;
    let dir = fs::canonicalize(dir)
        .with_context(|| format!("resolve ledger directory {}", dir.display()))?;
    let path = dir.join(backend.file_name());

    let mut open = OPEN_LEDGERS
        .get_or_init(Default::default)
        .lock()
        .map_err(|_| anyhow!("ledger registry lock poisoned"))?;
    open.retain(|_, ledger| ledger.strong_count() > 0);
    if let Some(shared) = open.get(&path).and_then(Weak::upgrade) {
        return Ok(shared);
    }

    let ledger: Box<dyn Ledger> = match backend {
        LedgerBackend::Json => Box::new(JsonLedger::new(path.clone())),
        LedgerBackend::Sqlite => Box::new(SqliteLedger::open(&path)?),
    };
    let shared = Arc::new(Mutex::new(ledger));
    open.insert(path, Arc::downgrade(&shared));
    Ok(shared)
}

/// Opens an existing ledger file, choosing the backend by extension.
pub fn open_ledger_file(path: &Path) -> Result<Box<dyn Ledger>> {
    if !path.is_file() {
        return Err(anyhow!("ledger not found: {}", path.display()));
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some("db") | Some("sqlite") | Some("sqlite3") => Ok(Box::new(SqliteLedger::open(path)?)),
        _ => Ok(Box::new(JsonLedger::new(path.to_path_buf()))),
    }
}

fn last_hash(entries: &[LedgerEntry]) -> Result<[u8; 32]> {
    match entries.last() {
        Some(entry) => entry
            .entry_hash_bytes()
            .context("corrupt ledger: last entry_hash"),
        None => Ok(GENESIS_HASH),
    }
}

// -------------------- JSON --------------------

pub struct JsonLedger {
    path: PathBuf,
}

impl JsonLedger {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_all(&self, entries: &[LedgerEntry]) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;
        Ok(())
    }
}

impl Ledger for JsonLedger {
    fn name(&self) -> &'static str {
        "json"
    }

    fn entries(&self) -> Result<Vec<LedgerEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("corrupt ledger {}", self.path.display()))
    }

    fn head(&self) -> Result<[u8; 32]> {
        last_hash(&self.entries()?)
    }

    fn push(&mut self, entry: &LedgerEntry) -> Result<()> {
        let mut entries = self.entries()?;
        entries.push(entry.clone());
        self.write_all(&entries)
    }

    fn append(&mut self, unsealed: UnsealedEntry, signing_key: &SigningKey) -> Result<LedgerEntry> {
        // One read for both the head and the rewrite.
        let mut entries = self.entries()?;
        let entry = unsealed.seal(&last_hash(&entries)?, signing_key)?;
        entries.push(entry.clone());
        self.write_all(&entries)?;
        Ok(entry)
    }
}

// -------------------- SQLite --------------------

pub struct SqliteLedger {
    conn: Connection,
}

impl SqliteLedger {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("open ledger {}", db_path.display()))?;
        conn.busy_timeout(SQLITE_BUSY_TIMEOUT)?;
        let ledger = Self { conn };
        ledger.ensure_schema()?;
        Ok(ledger)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS violations (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              track_id INTEGER NOT NULL,
              video TEXT NOT NULL,
              entry_json TEXT NOT NULL,
              entry_hash TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_violations_video ON violations(video);
            "#,
        )?;
        Ok(())
    }
}

impl Ledger for SqliteLedger {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT entry_json FROM violations ORDER BY id ASC")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let json: String = row.get(0)?;
            out.push(serde_json::from_str(&json).context("corrupt ledger row")?);
        }
        Ok(out)
    }

    fn head(&self) -> Result<[u8; 32]> {
        sqlite_head(&self.conn)
    }

    fn push(&mut self, entry: &LedgerEntry) -> Result<()> {
        sqlite_insert(&self.conn, entry)
    }

    fn append(&mut self, unsealed: UnsealedEntry, signing_key: &SigningKey) -> Result<LedgerEntry> {
        // Head read and insert under one write lock on the database.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let entry = unsealed.seal(&sqlite_head(&tx)?, signing_key)?;
        sqlite_insert(&tx, &entry)?;
        tx.commit()?;
        Ok(entry)
    }
}

fn sqlite_head(conn: &Connection) -> Result<[u8; 32]> {
    let mut stmt = conn.prepare("SELECT entry_hash FROM violations ORDER BY id DESC LIMIT 1")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let hash: String = row.get(0)?;
            crate::seal::decode_hash32(&hash).context("corrupt ledger: entry_hash")
        }
        None => Ok(GENESIS_HASH),
    }
}

fn sqlite_insert(conn: &Connection, entry: &LedgerEntry) -> Result<()> {
    let track_id = i64::try_from(entry.record.track_id)
        .map_err(|_| anyhow!("track id exceeds i64 range"))?;
    conn.execute(
        r#"
        INSERT INTO violations(track_id, video, entry_json, entry_hash)
        VALUES (?1, ?2, ?3, ?4)
        "#,
        params![
            track_id,
            entry.record.video,
            serde_json::to_string(entry)?,
            entry.entry_hash
        ],
    )?;
    Ok(())
}

// -------------------- In-memory --------------------

#[derive(Clone, Debug, Default)]
pub struct InMemoryLedger {
    entries: Vec<LedgerEntry>,
}

impl Ledger for InMemoryLedger {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn entries(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self.entries.clone())
    }

    fn head(&self) -> Result<[u8; 32]> {
        last_hash(&self.entries)
    }

    fn push(&mut self, entry: &LedgerEntry) -> Result<()> {
        self.entries.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::sample_record;
    use crate::seal::signing_key_from_seed;
    use std::thread;
    use tempfile::tempdir;

    fn unsealed(track_id: u64) -> UnsealedEntry {
        UnsealedEntry {
            record: sample_record(track_id),
            saved_at: "2026-10-19 08:15:01".to_string(),
            crop_sha256: "aa".repeat(32),
            context_sha256: "bb".repeat(32),
        }
    }

    fn assert_chained(ledger: &mut dyn Ledger) {
        let key = signing_key_from_seed("devkey:test").unwrap();
        let first = ledger.append(unsealed(1), &key).unwrap();
        let second = ledger.append(unsealed(2), &key).unwrap();

        assert_eq!(first.prev_hash, hex::encode(GENESIS_HASH));
        assert_eq!(second.prev_hash, first.entry_hash);

        let entries = ledger.entries().unwrap();
        assert_eq!(entries, vec![first, second.clone()]);
        assert_eq!(hex::encode(ledger.head().unwrap()), second.entry_hash);
    }

    #[test]
    fn json_ledger_chains_entries() {
        let dir = tempdir().unwrap();
        let ledger = open_ledger(LedgerBackend::Json, dir.path()).unwrap();
        assert_chained(&mut **ledger.lock().unwrap());

        let raw = fs::read_to_string(dir.path().join(JSON_LEDGER_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[test]
    fn sqlite_ledger_chains_entries() {
        let dir = tempdir().unwrap();
        let ledger = open_ledger(LedgerBackend::Sqlite, dir.path()).unwrap();
        assert_chained(&mut **ledger.lock().unwrap());

        let reopened = open_ledger_file(&dir.path().join(SQLITE_LEDGER_FILE)).unwrap();
        assert_eq!(reopened.entries().unwrap().len(), 2);
    }

    #[test]
    fn memory_ledger_chains_entries() {
        assert_chained(&mut InMemoryLedger::default());
    }

    #[test]
    fn corrupt_json_ledger_is_not_overwritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(JSON_LEDGER_FILE);
        fs::write(&path, "{ not json").unwrap();

        let mut ledger = JsonLedger::new(path.clone());
        let key = signing_key_from_seed("devkey:test").unwrap();
        assert!(ledger.append(unsealed(1), &key).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn backend_names_parse() {
        assert_eq!("json".parse::<LedgerBackend>().unwrap(), LedgerBackend::Json);
        assert_eq!(" SQLite ".parse::<LedgerBackend>().unwrap(), LedgerBackend::Sqlite);
        assert!("csv".parse::<LedgerBackend>().is_err());
        assert_eq!(LedgerBackend::Sqlite.to_string(), "sqlite");
    }

    fn assert_unbroken(entries: &[LedgerEntry]) {
        let mut prev = hex::encode(GENESIS_HASH);
        for entry in entries {
            assert_eq!(entry.prev_hash, prev);
            prev = entry.entry_hash.clone();
        }
    }

    /// Two writers, `per_writer` appends each, on separate threads.
    fn append_from_two_threads(a: SharedLedger, b: SharedLedger, per_writer: u64) {
        let handles: Vec<_> = [(a, 0), (b, 1000)]
            .into_iter()
            .map(|(ledger, base)| {
                thread::spawn(move || {
                    let key = signing_key_from_seed("devkey:test").unwrap();
                    for i in 0..per_writer {
                        let mut guard = ledger.lock().unwrap();
                        guard.append(unsealed(base + i), &key).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn open_ledger_shares_one_handle_per_file() {
        let dir = tempdir().unwrap();
        let first = open_ledger(LedgerBackend::Json, dir.path()).unwrap();
        let second = open_ledger(LedgerBackend::Json, &dir.path().join(".")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = tempdir().unwrap();
        let elsewhere = open_ledger(LedgerBackend::Json, other.path()).unwrap();
        assert!(!Arc::ptr_eq(&first, &elsewhere));
        let sqlite = open_ledger(LedgerBackend::Sqlite, dir.path()).unwrap();
        assert!(!Arc::ptr_eq(&first, &sqlite));
    }

    #[test]
    fn separately_opened_json_writers_lose_nothing() {
        let dir = tempdir().unwrap();
        let a = open_ledger(LedgerBackend::Json, dir.path()).unwrap();
        let b = open_ledger(LedgerBackend::Json, dir.path()).unwrap();
        append_from_two_threads(a, b, 40);

        let entries = JsonLedger::new(dir.path().join(JSON_LEDGER_FILE))
            .entries()
            .unwrap();
        assert_eq!(entries.len(), 80);
        assert_unbroken(&entries);
    }

    #[test]
    fn sqlite_connections_append_one_chain() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SQLITE_LEDGER_FILE);
        // Separate connections, bypassing the shared handle.
        let a: SharedLedger = Arc::new(Mutex::new(Box::new(SqliteLedger::open(&path).unwrap())));
        let b: SharedLedger = Arc::new(Mutex::new(Box::new(SqliteLedger::open(&path).unwrap())));
        append_from_two_threads(a, b, 25);

        let entries = SqliteLedger::open(&path).unwrap().entries().unwrap();
        assert_eq!(entries.len(), 50);
        assert_unbroken(&entries);
    }
}

