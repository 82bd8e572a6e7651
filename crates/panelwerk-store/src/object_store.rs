// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Object storage — keyed blobs addressed by URL.
//
// `LocalObjectStore` writes blobs below `<root>/objects/` and records each one
// (size, SHA-256, upload time) in a SQLite index at `<root>/index.db`. Blobs
// are written to `<root>/staging/` first and renamed into place, so the
// staging names never overlap the key space.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

use panelwerk_core::error::{PanelwerkError, Result};

use crate::integrity::{hash_bytes, verify_hash};

const URL_SCHEME: &str = "file://";

/// Index entry for a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// Storage backend for restored pages and exported documents.
pub trait ObjectStore {
    /// Store `bytes` under `key`, replacing any previous object. Returns the
    /// object's URL.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<String>;

    /// Fetch the object behind a URL returned by [`ObjectStore::put`].
    fn get(&self, url: &str) -> Result<Vec<u8>>;

    /// Remove `key`. Removing a missing key succeeds.
    fn delete(&self, key: &str) -> Result<()>;

    /// Objects whose key starts with `prefix`, ordered by key.
    fn list(&self, prefix: &str) -> Result<Vec<StoredObject>>;
}

fn db_err(e: rusqlite::Error) -> PanelwerkError {
    PanelwerkError::Database(e.to_string())
}

/// Reject keys that are empty, absolute, or escape the store.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(PanelwerkError::Storage("object key is empty".into()));
    }
    if key.starts_with('/') {
        return Err(PanelwerkError::Storage(format!(
            "object key must be relative: {key}"
        )));
    }
    if key.contains('\\') {
        return Err(PanelwerkError::Storage(format!(
            "object key must use '/' separators: {key}"
        )));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(PanelwerkError::Storage(format!(
                "invalid segment {segment:?} in object key {key}"
            )));
        }
    }
    Ok(())
}

/// Filesystem-backed object store with a SQLite index.
pub struct LocalObjectStore {
    objects_dir: PathBuf,
    staging_dir: PathBuf,
    conn: Connection,
}

impl LocalObjectStore {
    /// Open (or create) a store rooted at `root`.
    #[instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root.join("objects"))?;
        fs::create_dir_all(root.join("staging"))?;
        let root = root.canonicalize()?;
        let objects_dir = root.join("objects");
        let staging_dir = root.join("staging");

        let conn = Connection::open(root.join("index.db")).map_err(db_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             CREATE TABLE IF NOT EXISTS objects (
                 key          TEXT PRIMARY KEY,
                 size         INTEGER NOT NULL,
                 sha256       TEXT NOT NULL,
                 uploaded_at  TEXT NOT NULL
             );",
        )
        .map_err(db_err)?;

        info!(objects = %objects_dir.display(), "object store opened");
        Ok(Self {
            objects_dir,
            staging_dir,
            conn,
        })
    }

    /// URL an object stored under `key` is reachable at.
    pub fn url_for(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        Ok(format!("{URL_SCHEME}{}", self.blob_path(key).display()))
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        key.split('/')
            .fold(self.objects_dir.clone(), |path, segment| path.join(segment))
    }

    /// Map a `file://` URL back to its key.
    fn key_from_url(&self, url: &str) -> Result<String> {
        let path = url
            .strip_prefix(URL_SCHEME)
            .map(Path::new)
            .ok_or_else(|| PanelwerkError::Storage(format!("not a file URL: {url}")))?;
        let relative = path
            .strip_prefix(&self.objects_dir)
            .map_err(|_| PanelwerkError::Storage(format!("URL outside this store: {url}")))?;

        let segments = relative
            .components()
            .map(|c| {
                c.as_os_str()
                    .to_str()
                    .map(str::to_owned)
                    .ok_or_else(|| PanelwerkError::Storage(format!("non UTF-8 URL: {url}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let key = segments.join("/");
        validate_key(&key)?;
        Ok(key)
    }

    fn digest_of(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT sha256 FROM objects WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)
    }
}

impl ObjectStore for LocalObjectStore {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        validate_key(key)?;
        let path = self.blob_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Readers never see a partial blob.
        let mut staged = NamedTempFile::new_in(&self.staging_dir)?;
        staged.write_all(bytes)?;
        staged.persist(&path).map_err(|e| PanelwerkError::Io(e.error))?;

        let digest = hash_bytes(bytes);
        self.conn
            .execute(
                "INSERT INTO objects (key, size, sha256, uploaded_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                     size = excluded.size,
                     sha256 = excluded.sha256,
                     uploaded_at = excluded.uploaded_at",
                params![key, bytes.len() as i64, digest, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;

        debug!(sha256 = %digest, "object stored");
        Ok(format!("{URL_SCHEME}{}", path.display()))
    }

    #[instrument(skip(self))]
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        let key = self.key_from_url(url)?;
        let expected = self
            .digest_of(&key)?
            .ok_or_else(|| PanelwerkError::Storage(format!("no object stored under {key}")))?;

        let bytes = fs::read(self.blob_path(&key))?;
        if let Err(e) = verify_hash(&bytes, &expected) {
            warn!(key = %key, "stored object failed integrity check");
            return Err(e);
        }
        Ok(bytes)
    }

    #[instrument(skip(self))]
    fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        match fs::remove_file(self.blob_path(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let removed = self
            .conn
            .execute("DELETE FROM objects WHERE key = ?1", params![key])
            .map_err(db_err)?;
        debug!(removed, "object deleted");
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT key, size, uploaded_at FROM objects
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![prefix], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(db_err)?;

        let mut objects = Vec::new();
        for row in rows {
            let (key, size, uploaded_at) = row.map_err(db_err)?;
            let uploaded_at = DateTime::parse_from_rfc3339(&uploaded_at)
                .map_err(|e| PanelwerkError::Database(format!("bad timestamp for {key}: {e}")))?
                .with_timezone(&Utc);
            objects.push(StoredObject {
                key,
                size: u64::try_from(size).unwrap_or(0),
                uploaded_at,
            });
        }
        Ok(objects)
    }
}
