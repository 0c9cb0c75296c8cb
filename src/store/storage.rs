//! Local store trait with SQLite and in-memory implementations.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{info, warn};

use super::types::{CacheEntry, DeadRequest, QueuedRequest, RequestStatus};
use crate::net::ApiRequest;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("failed to create store directory {path}: {source}")]
  Directory {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to open local store at {path}: {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: rusqlite::Error,
  },

  #[error("database error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to serialize stored value: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("corrupt stored row: {0}")]
  Corrupt(String),

  #[error("queued request {0} not found")]
  NotFound(i64),

  #[error("store lock poisoned")]
  Poisoned,
}

/// Durable storage for queued requests, dead letters and cached reads.
///
/// Queue rows and cache rows live in disjoint tables, so callers never need to
/// coordinate between the two.
pub trait LocalStore: Send + Sync {
  /// Persist a new request as pending and assign its sequence id.
  fn insert_request(&self, request: &ApiRequest) -> Result<QueuedRequest, StoreError>;

  fn get_request(&self, seq: i64) -> Result<Option<QueuedRequest>, StoreError>;

  /// All active requests in ascending sequence order.
  fn list_requests(&self) -> Result<Vec<QueuedRequest>, StoreError>;

  /// Overwrite status, attempts, last error and token of an existing request.
  fn update_request(&self, request: &QueuedRequest) -> Result<(), StoreError>;

  /// Returns false when the request was already gone.
  fn delete_request(&self, seq: i64) -> Result<bool, StoreError>;

  /// Move a request to the dead letter table in one step.
  fn bury_request(&self, request: &QueuedRequest, reason: &str) -> Result<(), StoreError>;

  fn list_dead(&self) -> Result<Vec<DeadRequest>, StoreError>;

  /// Put requests interrupted mid-replay back to pending. Returns how many.
  fn reset_in_flight(&self) -> Result<usize, StoreError>;

  /// Insert or wholesale replace a cache entry.
  fn put_entry(&self, entry: &CacheEntry) -> Result<(), StoreError>;

  fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

  fn delete_entry(&self, key: &str) -> Result<bool, StoreError>;

  fn list_entries(&self) -> Result<Vec<CacheEntry>, StoreError>;

  /// Whether contents survive a restart.
  fn is_durable(&self) -> bool;
}

/// Open the store at `path`, falling back to memory when that is impossible.
///
/// Safe to call more than once for the same path. A store that cannot be opened
/// (read-only filesystem, full disk, corrupt file) never stops the
/// application; queued requests then only live for the session.
pub fn init(path: &Path) -> Arc<dyn LocalStore> {
  match SqliteStore::open(path) {
    Ok(store) => {
      info!(path = %path.display(), "local store ready");
      Arc::new(store)
    }
    Err(e) => {
      warn!(
        error = %e,
        "local store unavailable, queued requests will not survive a restart"
      );
      Arc::new(MemoryStore::new())
    }
  }
}

/// SQLite-backed store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

/// Schema for the store tables.
const SCHEMA: &str = r#"
-- Active queue; AUTOINCREMENT keeps sequence ids from being reused after deletes
CREATE TABLE IF NOT EXISTS queued_requests (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    method TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    body TEXT,
    auth_token TEXT,
    created_at TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    status TEXT NOT NULL DEFAULT 'pending'
);

CREATE INDEX IF NOT EXISTS idx_queued_requests_status
    ON queued_requests(status, seq);

-- Requests that will never be replayed
CREATE TABLE IF NOT EXISTS dead_requests (
    seq INTEGER PRIMARY KEY,
    method TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    body TEXT,
    auth_token TEXT,
    created_at TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    last_error TEXT,
    reason TEXT NOT NULL,
    died_at TEXT NOT NULL
);

-- Last known server state per resource
CREATE TABLE IF NOT EXISTS cache_entries (
    resource_key TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    fetched_at TEXT NOT NULL
);
"#;

const REQUEST_COLUMNS: &str =
  "seq, method, endpoint, body, auth_token, created_at, attempts, last_error, status";

impl SqliteStore {
  /// Open or create the store at the given path.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent).map_err(|source| StoreError::Directory {
          path: parent.to_path_buf(),
          source,
        })?;
      }
    }

    let conn = Connection::open(path).map_err(|source| StoreError::Open {
      path: path.to_path_buf(),
      source,
    })?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.migrate()?;

    Ok(store)
  }

  /// Store that lives only as long as the value.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self, StoreError> {
    let store = Self {
      conn: Mutex::new(Connection::open_in_memory()?),
    };
    store.migrate()?;
    Ok(store)
  }

  /// Create missing tables. Idempotent.
  pub fn migrate(&self) -> Result<(), StoreError> {
    self.conn()?.execute_batch(SCHEMA)?;
    Ok(())
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
    self.conn.lock().map_err(|_| StoreError::Poisoned)
  }
}

/// Raw queued_requests / dead_requests columns before validation.
struct RawRequest {
  seq: i64,
  method: String,
  endpoint: String,
  body: Option<String>,
  auth_token: Option<String>,
  created_at: String,
  attempts: u32,
  last_error: Option<String>,
  status: String,
}

impl RawRequest {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      seq: row.get(0)?,
      method: row.get(1)?,
      endpoint: row.get(2)?,
      body: row.get(3)?,
      auth_token: row.get(4)?,
      created_at: row.get(5)?,
      attempts: row.get(6)?,
      last_error: row.get(7)?,
      status: row.get(8)?,
    })
  }

  fn into_queued(self) -> Result<QueuedRequest, StoreError> {
    let body = self
      .body
      .as_deref()
      .map(serde_json::from_str::<Value>)
      .transpose()?;
    let status = RequestStatus::parse(&self.status)
      .ok_or_else(|| StoreError::Corrupt(format!("unknown status '{}'", self.status)))?;

    Ok(QueuedRequest {
      seq: self.seq,
      request: ApiRequest {
        method: self.method,
        endpoint: self.endpoint,
        body,
        auth_token: self.auth_token,
      },
      created_at: parse_datetime(&self.created_at)?,
      attempts: self.attempts,
      last_error: self.last_error,
      status,
    })
  }
}

fn encode_body(request: &ApiRequest) -> Result<Option<String>, StoreError> {
  Ok(request.body.as_ref().map(serde_json::to_string).transpose()?)
}

impl LocalStore for SqliteStore {
  fn insert_request(&self, request: &ApiRequest) -> Result<QueuedRequest, StoreError> {
    let conn = self.conn()?;
    let created_at = Utc::now();

    conn.execute(
      "INSERT INTO queued_requests (method, endpoint, body, auth_token, created_at, attempts, status)
       VALUES (?, ?, ?, ?, ?, 0, ?)",
      params![
        request.method,
        request.endpoint,
        encode_body(request)?,
        request.auth_token,
        format_datetime(&created_at),
        RequestStatus::Pending.as_str(),
      ],
    )?;

    Ok(QueuedRequest {
      seq: conn.last_insert_rowid(),
      request: request.clone(),
      created_at,
      attempts: 0,
      last_error: None,
      status: RequestStatus::Pending,
    })
  }

  fn get_request(&self, seq: i64) -> Result<Option<QueuedRequest>, StoreError> {
    let conn = self.conn()?;
    let raw = conn
      .query_row(
        &format!("SELECT {} FROM queued_requests WHERE seq = ?", REQUEST_COLUMNS),
        params![seq],
        RawRequest::from_row,
      )
      .optional()?;

    raw.map(RawRequest::into_queued).transpose()
  }

  fn list_requests(&self) -> Result<Vec<QueuedRequest>, StoreError> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(&format!(
      "SELECT {} FROM queued_requests ORDER BY seq ASC",
      REQUEST_COLUMNS
    ))?;

    let rows = stmt
      .query_map([], RawRequest::from_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter().map(RawRequest::into_queued).collect()
  }

  fn update_request(&self, request: &QueuedRequest) -> Result<(), StoreError> {
    let conn = self.conn()?;
    let changed = conn.execute(
      "UPDATE queued_requests
       SET auth_token = ?, attempts = ?, last_error = ?, status = ?
       WHERE seq = ?",
      params![
        request.request.auth_token,
        request.attempts,
        request.last_error,
        request.status.as_str(),
        request.seq,
      ],
    )?;

    if changed == 0 {
      return Err(StoreError::NotFound(request.seq));
    }
    Ok(())
  }

  fn delete_request(&self, seq: i64) -> Result<bool, StoreError> {
    let conn = self.conn()?;
    let changed = conn.execute("DELETE FROM queued_requests WHERE seq = ?", params![seq])?;
    Ok(changed > 0)
  }

  fn bury_request(&self, request: &QueuedRequest, reason: &str) -> Result<(), StoreError> {
    let mut conn = self.conn()?;
    let tx = conn.transaction()?;

    tx.execute(
      "INSERT OR REPLACE INTO dead_requests
         (seq, method, endpoint, body, auth_token, created_at, attempts, last_error, reason, died_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        request.seq,
        request.request.method,
        request.request.endpoint,
        encode_body(&request.request)?,
        request.request.auth_token,
        format_datetime(&request.created_at),
        request.attempts,
        request.last_error,
        reason,
        format_datetime(&Utc::now()),
      ],
    )?;
    tx.execute(
      "DELETE FROM queued_requests WHERE seq = ?",
      params![request.seq],
    )?;

    tx.commit()?;
    Ok(())
  }

  fn list_dead(&self) -> Result<Vec<DeadRequest>, StoreError> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(
      "SELECT seq, method, endpoint, body, auth_token, created_at, attempts, last_error,
              'dead', reason, died_at
       FROM dead_requests ORDER BY seq ASC",
    )?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          RawRequest::from_row(row)?,
          row.get::<_, String>(9)?,
          row.get::<_, String>(10)?,
        ))
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    rows
      .into_iter()
      .map(|(raw, reason, died_at)| {
        Ok(DeadRequest {
          entry: raw.into_queued()?,
          reason,
          died_at: parse_datetime(&died_at)?,
        })
      })
      .collect()
  }

  fn reset_in_flight(&self) -> Result<usize, StoreError> {
    let conn = self.conn()?;
    let changed = conn.execute(
      "UPDATE queued_requests SET status = ? WHERE status = ?",
      params![
        RequestStatus::Pending.as_str(),
        RequestStatus::InFlight.as_str()
      ],
    )?;
    Ok(changed)
  }

  fn put_entry(&self, entry: &CacheEntry) -> Result<(), StoreError> {
    let conn = self.conn()?;
    let payload = serde_json::to_string(&entry.payload)?;

    conn.execute(
      "INSERT OR REPLACE INTO cache_entries (resource_key, payload, fetched_at)
       VALUES (?, ?, ?)",
      params![entry.key, payload, format_datetime(&entry.fetched_at)],
    )?;
    Ok(())
  }

  fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
    let conn = self.conn()?;
    let row: Option<(String, String)> = conn
      .query_row(
        "SELECT payload, fetched_at FROM cache_entries WHERE resource_key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()?;

    match row {
      Some((payload, fetched_at)) => Ok(Some(CacheEntry {
        key: key.to_string(),
        payload: serde_json::from_str(&payload)?,
        fetched_at: parse_datetime(&fetched_at)?,
      })),
      None => Ok(None),
    }
  }

  fn delete_entry(&self, key: &str) -> Result<bool, StoreError> {
    let conn = self.conn()?;
    let changed = conn.execute(
      "DELETE FROM cache_entries WHERE resource_key = ?",
      params![key],
    )?;
    Ok(changed > 0)
  }

  fn list_entries(&self) -> Result<Vec<CacheEntry>, StoreError> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(
      "SELECT resource_key, payload, fetched_at FROM cache_entries ORDER BY resource_key",
    )?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
        ))
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    rows
      .into_iter()
      .map(|(key, payload, fetched_at)| {
        Ok(CacheEntry {
          key,
          payload: serde_json::from_str(&payload)?,
          fetched_at: parse_datetime(&fetched_at)?,
        })
      })
      .collect()
  }

  fn is_durable(&self) -> bool {
    true
  }
}

/// Store used when persistent storage is unavailable.
#[derive(Default)]
pub struct MemoryStore {
  inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
  last_seq: i64,
  requests: BTreeMap<i64, QueuedRequest>,
  dead: BTreeMap<i64, DeadRequest>,
  entries: HashMap<String, CacheEntry>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn inner(&self) -> Result<MutexGuard<'_, MemoryInner>, StoreError> {
    self.inner.lock().map_err(|_| StoreError::Poisoned)
  }
}

impl LocalStore for MemoryStore {
  fn insert_request(&self, request: &ApiRequest) -> Result<QueuedRequest, StoreError> {
    let mut inner = self.inner()?;
    inner.last_seq += 1;

    let queued = QueuedRequest {
      seq: inner.last_seq,
      request: request.clone(),
      created_at: Utc::now(),
      attempts: 0,
      last_error: None,
      status: RequestStatus::Pending,
    };
    inner.requests.insert(queued.seq, queued.clone());
    Ok(queued)
  }

  fn get_request(&self, seq: i64) -> Result<Option<QueuedRequest>, StoreError> {
    Ok(self.inner()?.requests.get(&seq).cloned())
  }

  fn list_requests(&self) -> Result<Vec<QueuedRequest>, StoreError> {
    Ok(self.inner()?.requests.values().cloned().collect())
  }

  fn update_request(&self, request: &QueuedRequest) -> Result<(), StoreError> {
    let mut inner = self.inner()?;
    let existing = inner
      .requests
      .get_mut(&request.seq)
      .ok_or(StoreError::NotFound(request.seq))?;

    existing.request.auth_token = request.request.auth_token.clone();
    existing.attempts = request.attempts;
    existing.last_error = request.last_error.clone();
    existing.status = request.status;
    Ok(())
  }

  fn delete_request(&self, seq: i64) -> Result<bool, StoreError> {
    Ok(self.inner()?.requests.remove(&seq).is_some())
  }

  fn bury_request(&self, request: &QueuedRequest, reason: &str) -> Result<(), StoreError> {
    let mut inner = self.inner()?;
    inner.requests.remove(&request.seq);

    let mut entry = request.clone();
    entry.status = RequestStatus::Dead;
    inner.dead.insert(
      request.seq,
      DeadRequest {
        entry,
        reason: reason.to_string(),
        died_at: Utc::now(),
      },
    );
    Ok(())
  }

  fn list_dead(&self) -> Result<Vec<DeadRequest>, StoreError> {
    Ok(self.inner()?.dead.values().cloned().collect())
  }

  fn reset_in_flight(&self) -> Result<usize, StoreError> {
    let mut inner = self.inner()?;
    let mut count = 0;
    for request in inner.requests.values_mut() {
      if request.status == RequestStatus::InFlight {
        request.status = RequestStatus::Pending;
        count += 1;
      }
    }
    Ok(count)
  }

  fn put_entry(&self, entry: &CacheEntry) -> Result<(), StoreError> {
    self
      .inner()?
      .entries
      .insert(entry.key.clone(), entry.clone());
    Ok(())
  }

  fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
    Ok(self.inner()?.entries.get(key).cloned())
  }

  fn delete_entry(&self, key: &str) -> Result<bool, StoreError> {
    Ok(self.inner()?.entries.remove(key).is_some())
  }

  fn list_entries(&self) -> Result<Vec<CacheEntry>, StoreError> {
    let mut entries: Vec<CacheEntry> = self.inner()?.entries.values().cloned().collect();
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
  }

  fn is_durable(&self) -> bool {
    false
  }
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp written by `format_datetime`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn signup() -> ApiRequest {
    ApiRequest::new(
      "POST",
      "/auth/register",
      Some(json!({"email": "ana@example.com", "name": "Ana"})),
    )
  }

  fn stores() -> Vec<Box<dyn LocalStore>> {
    vec![
      Box::new(SqliteStore::open_in_memory().unwrap()),
      Box::new(MemoryStore::new()),
    ]
  }

  #[test]
  fn test_requests_listed_in_sequence_order() {
    for store in stores() {
      let a = store.insert_request(&signup()).unwrap();
      let b = store
        .insert_request(&ApiRequest::new("POST", "/trips", Some(json!({"name": "Coast"}))))
        .unwrap();
      let c = store
        .insert_request(&ApiRequest::new("DELETE", "/trips/3", None))
        .unwrap();

      assert!(a.seq < b.seq && b.seq < c.seq);

      let listed: Vec<i64> = store.list_requests().unwrap().iter().map(|r| r.seq).collect();
      assert_eq!(listed, vec![a.seq, b.seq, c.seq]);

      let loaded = store.get_request(b.seq).unwrap().unwrap();
      assert_eq!(loaded.request, b.request);
      assert_eq!(loaded.status, RequestStatus::Pending);
    }
  }

  #[test]
  fn test_sequence_not_reused_after_delete() {
    for store in stores() {
      let first = store.insert_request(&signup()).unwrap();
      assert!(store.delete_request(first.seq).unwrap());
      assert!(!store.delete_request(first.seq).unwrap());

      let second = store.insert_request(&signup()).unwrap();
      assert!(second.seq > first.seq);
    }
  }

  #[test]
  fn test_stored_body_serializes_to_same_bytes() {
    let body = json!({
      "odometer": -10.082461730695897,
      "tiny": 1.0715660391465826e-75,
      "huge": 1.7976931348623157e308,
      "third": 0.1 + 0.2,
      "count": 7,
    });
    let original = serde_json::to_vec(&body).unwrap();

    for store in stores() {
      let queued = store
        .insert_request(&ApiRequest::new("POST", "/trips", Some(body.clone())))
        .unwrap();
      let loaded = store.get_request(queued.seq).unwrap().unwrap();

      let replayed = serde_json::to_vec(loaded.request.body.as_ref().unwrap()).unwrap();
      assert_eq!(
        String::from_utf8(replayed).unwrap(),
        String::from_utf8(original.clone()).unwrap()
      );
    }
  }

  #[test]
  fn test_update_and_reset_in_flight() {
    for store in stores() {
      let mut queued = store.insert_request(&signup()).unwrap();
      queued.status = RequestStatus::InFlight;
      queued.attempts = 1;
      queued.last_error = Some("reset".into());
      store.update_request(&queued).unwrap();

      let loaded = store.get_request(queued.seq).unwrap().unwrap();
      assert_eq!(loaded.status, RequestStatus::InFlight);
      assert_eq!(loaded.attempts, 1);

      assert_eq!(store.reset_in_flight().unwrap(), 1);
      let loaded = store.get_request(queued.seq).unwrap().unwrap();
      assert_eq!(loaded.status, RequestStatus::Pending);
      assert_eq!(loaded.attempts, 1);
    }
  }

  #[test]
  fn test_update_missing_request_fails() {
    for store in stores() {
      let queued = store.insert_request(&signup()).unwrap();
      store.delete_request(queued.seq).unwrap();
      assert!(matches!(
        store.update_request(&queued),
        Err(StoreError::NotFound(_))
      ));
    }
  }

  #[test]
  fn test_bury_moves_to_dead_letters() {
    for store in stores() {
      let queued = store.insert_request(&signup()).unwrap();
      store.bury_request(&queued, "422: email taken").unwrap();

      assert!(store.list_requests().unwrap().is_empty());
      let dead = store.list_dead().unwrap();
      assert_eq!(dead.len(), 1);
      assert_eq!(dead[0].entry.seq, queued.seq);
      assert_eq!(dead[0].entry.request, queued.request);
      assert_eq!(dead[0].reason, "422: email taken");
    }
  }

  #[test]
  fn test_cache_entry_overwritten_wholesale() {
    for store in stores() {
      store
        .put_entry(&CacheEntry::new("trips", json!({"items": [1, 2], "total": 2})))
        .unwrap();
      store
        .put_entry(&CacheEntry::new("trips", json!({"items": [3]})))
        .unwrap();

      let entry = store.get_entry("trips").unwrap().unwrap();
      assert_eq!(entry.payload, json!({"items": [3]}));
      assert_eq!(store.list_entries().unwrap().len(), 1);

      assert!(store.delete_entry("trips").unwrap());
      assert!(store.get_entry("trips").unwrap().is_none());
    }
  }

  #[test]
  fn test_requests_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("roadbook.db");

    let kept = {
      let store = SqliteStore::open(&path).unwrap();
      let delivered = store.insert_request(&signup()).unwrap();
      let kept = store
        .insert_request(&ApiRequest::new("POST", "/trips", Some(json!({"name": "Coast"}))))
        .unwrap();
      store.delete_request(delivered.seq).unwrap();
      kept
    };

    let store = SqliteStore::open(&path).unwrap();
    let listed = store.list_requests().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].seq, kept.seq);
    assert_eq!(listed[0].request, kept.request);
    assert!(store.is_durable());
  }

  #[test]
  fn test_init_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roadbook.db");

    let first = init(&path);
    first.insert_request(&signup()).unwrap();
    let second = init(&path);

    assert!(second.is_durable());
    assert_eq!(second.list_requests().unwrap().len(), 1);
  }

  #[test]
  fn test_init_falls_back_to_memory() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-directory");
    std::fs::write(&blocker, b"file").unwrap();

    let store = init(&blocker.join("roadbook.db"));
    assert!(!store.is_durable());

    // Still usable for the session
    let queued = store.insert_request(&signup()).unwrap();
    assert_eq!(store.list_requests().unwrap()[0].seq, queued.seq);
  }
}
