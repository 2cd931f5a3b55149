//! Cache storage trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use url::Url;

use super::traits::{CachedEntry, RequestKey};
use crate::net::Response;

/// Trait for cache storage backends.
///
/// A backend holds any number of named generations. Entries inside a generation keep
/// their insertion order; replacing an entry moves it to the newest position.
pub trait CacheStorage: Send + Sync {
  /// Create the generation if it does not exist yet.
  fn open_generation(&self, name: &str) -> Result<()>;

  /// Names of every generation, oldest first.
  fn generations(&self) -> Result<Vec<String>>;

  /// Delete a generation and all of its entries. Returns false if it did not exist.
  fn delete_generation(&self, name: &str) -> Result<bool>;

  /// Look up the snapshot stored for `key`.
  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Store `response` under `key`, replacing any previous entry.
  fn put(&self, generation: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Delete the entry for `key`. Returns false if there was none.
  #[allow(dead_code)]
  fn delete(&self, generation: &str, key: &RequestKey) -> Result<bool>;

  /// Keys of the generation in insertion order.
  fn keys(&self, generation: &str) -> Result<Vec<RequestKey>>;

  /// Number of entries in the generation.
  fn count(&self, generation: &str) -> Result<usize>;

  /// Delete the oldest entry of the generation, returning its key.
  fn delete_oldest(&self, generation: &str) -> Result<Option<RequestKey>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at `path`, or at the default location when `None`.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private database that lives only as long as this value.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offline-agent").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per named cache generation
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots; seq records insertion order
CREATE TABLE IF NOT EXISTS entries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    generation TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    response_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (generation, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_generation_seq ON entries(generation, seq);
"#;

impl CacheStorage for SqliteStorage {
  fn open_generation(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO generations (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache generation {}: {}", name, e))?;
    Ok(())
  }

  fn generations(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM generations ORDER BY created_at, rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache generation: {}", e))?;

    Ok(names)
  }

  fn delete_generation(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE generation = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM generations WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache generation {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT response_url, status, headers, body, stored_at FROM entries
         WHERE generation = ? AND key_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(String, u16, String, Vec<u8>, String)> = stmt
      .query_row(params![generation, key.cache_hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry for {}: {}", key.url(), e))?;

    match row {
      Some((response_url, status, headers, body, stored_at)) => {
        let url = Url::parse(&response_url)
          .map_err(|e| eyre!("Corrupt response url '{}': {}", response_url, e))?;
        let headers: Vec<(String, Vec<u8>)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

        Ok(Some(CachedEntry {
          response: Response {
            url,
            status,
            headers,
            body,
          },
          stored_at: parse_datetime(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, generation: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
    let key_hash = key.cache_hash();

    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO generations (name) VALUES (?)",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to open cache generation {}: {}", generation, e))?;

    // Replacing an entry moves it to the newest position
    tx.execute(
      "DELETE FROM entries WHERE generation = ? AND key_hash = ?",
      params![generation, key_hash],
    )
    .map_err(|e| eyre!("Failed to replace cache entry: {}", e))?;

    tx.execute(
      "INSERT INTO entries (generation, key_hash, url, response_url, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        generation,
        key_hash,
        key.url().as_str(),
        response.url.as_str(),
        response.status,
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry for {}: {}", key.url(), e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn delete(&self, generation: &str, key: &RequestKey) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn
      .execute(
        "DELETE FROM entries WHERE generation = ? AND key_hash = ?",
        params![generation, key.cache_hash()],
      )
      .map_err(|e| eyre!("Failed to delete cache entry: {}", e))?;
    Ok(removed > 0)
  }

  fn keys(&self, generation: &str) -> Result<Vec<RequestKey>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT url FROM entries WHERE generation = ? ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let urls = stmt
      .query_map(params![generation], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to list cache keys: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache key: {}", e))?;

    urls
      .iter()
      .map(|u| parse_key(u))
      .collect::<Result<Vec<_>>>()
  }

  fn count(&self, generation: &str) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE generation = ?",
        params![generation],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count cache entries: {}", e))?;
    Ok(count as usize)
  }

  fn delete_oldest(&self, generation: &str) -> Result<Option<RequestKey>> {
    let conn = self.lock()?;
    let oldest: Option<(i64, String)> = conn
      .query_row(
        "SELECT seq, url FROM entries WHERE generation = ? ORDER BY seq LIMIT 1",
        params![generation],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to find oldest cache entry: {}", e))?;

    let Some((seq, url)) = oldest else {
      return Ok(None);
    };

    conn
      .execute("DELETE FROM entries WHERE seq = ?", params![seq])
      .map_err(|e| eyre!("Failed to delete cache entry: {}", e))?;

    parse_key(&url).map(Some)
  }
}

fn parse_key(url: &str) -> Result<RequestKey> {
  Url::parse(url)
    .map(|u| RequestKey::get(&u))
    .map_err(|e| eyre!("Corrupt cache key '{}': {}", url, e))
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(path: &str) -> RequestKey {
    RequestKey::get(&Url::parse("http://localhost:5000").unwrap().join(path).unwrap())
  }

  fn response(path: &str, body: &str) -> Response {
    Response::new(key(path).url().clone(), 200, body).with_header("content-type", "text/css")
  }

  #[test]
  fn test_put_and_get_roundtrip_preserves_snapshot() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let original = response("/style.css", "body { color: red }");
    storage.put("v1", &key("/style.css"), &original).unwrap();

    let entry = storage.get("v1", &key("/style.css")).unwrap().unwrap();
    assert_eq!(entry.response, original);
    assert!(storage.get("v1", &key("/other.css")).unwrap().is_none());
    assert!(storage.get("v2", &key("/style.css")).unwrap().is_none());
  }

  #[test]
  fn test_binary_body_and_headers_are_kept_byte_for_byte() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let bytes: Vec<u8> = (0..=255).collect();
    let original = Response::new(key("/icon.png").url().clone(), 200, bytes.clone())
      .with_header("content-disposition", b"inline; filename=\"caf\xe9.png\"");
    storage.put("v1", &key("/icon.png"), &original).unwrap();

    let entry = storage.get("v1", &key("/icon.png")).unwrap().unwrap();
    assert_eq!(entry.response.body, bytes);
    assert_eq!(entry.response.headers, original.headers);
  }

  #[test]
  fn test_keys_follow_insertion_order_and_replace_moves_to_end() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    for path in ["/a", "/b", "/c"] {
      storage.put("v1", &key(path), &response(path, path)).unwrap();
    }
    storage.put("v1", &key("/a"), &response("/a", "new")).unwrap();

    let keys: Vec<String> = storage
      .keys("v1")
      .unwrap()
      .iter()
      .map(|k| k.url().path().to_string())
      .collect();
    assert_eq!(keys, vec!["/b", "/c", "/a"]);
    assert_eq!(storage.count("v1").unwrap(), 3);
  }

  #[test]
  fn test_delete_oldest() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert!(storage.delete_oldest("v1").unwrap().is_none());

    storage.put("v1", &key("/a"), &response("/a", "a")).unwrap();
    storage.put("v1", &key("/b"), &response("/b", "b")).unwrap();

    assert_eq!(storage.delete_oldest("v1").unwrap(), Some(key("/a")));
    assert_eq!(storage.count("v1").unwrap(), 1);
    assert!(storage.delete("v1", &key("/b")).unwrap());
    assert!(!storage.delete("v1", &key("/b")).unwrap());
  }

  #[test]
  fn test_generations_are_isolated_and_deletable() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_generation("v1").unwrap();
    storage.put("v2", &key("/a"), &response("/a", "a")).unwrap();
    storage.put("v1", &key("/a"), &response("/a", "old")).unwrap();

    assert_eq!(storage.generations().unwrap(), vec!["v1", "v2"]);

    assert!(storage.delete_generation("v1").unwrap());
    assert!(!storage.delete_generation("v1").unwrap());
    assert_eq!(storage.generations().unwrap(), vec!["v2"]);
    assert_eq!(storage.count("v1").unwrap(), 0);
    assert_eq!(storage.count("v2").unwrap(), 1);
  }

  #[test]
  fn test_open_creates_database_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open(Some(&path)).unwrap();
      storage.put("v1", &key("/"), &response("/", "home")).unwrap();
    }

    let reopened = SqliteStorage::open(Some(&path)).unwrap();
    assert_eq!(reopened.count("v1").unwrap(), 1);
  }
}
