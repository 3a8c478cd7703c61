// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LedgerError;
use crate::feed::Episode;

/// Name of the single table holding handled-episode records
const TABLE_ADDED: &str = "added";

/// Durable record of one handled episode identity.
///
/// Existence of a record is the sole "already handled" signal; the
/// dispatcher never re-attempts submission for an identity that has one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Full snapshot of the episode at first sight
    pub episode: Episode,
}

/// Outcome of atomically observing an episode in the ledger
#[derive(Debug, Clone)]
pub struct Observation {
    /// True when no record existed before this observation
    pub first_seen: bool,
    pub record: LedgerRecord,
}

/// Durable idempotency ledger backed by a single SQLite file.
///
/// Records are keyed by lowercase `info_hash` and stored as the JSON
/// payload `{created, updated, episode}`. Writes commit synchronously;
/// the status endpoint reads a consistent snapshot concurrently.
pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    /// Open (or create) the ledger database at `path`
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path).map_err(|e| LedgerError::OpenFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        // WAL keeps the read-only status endpoint from blocking the
        // dispatcher; synchronous=FULL makes every put durable before it
        // returns.
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=FULL;",
        )?;
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {TABLE_ADDED} (
                     info_hash TEXT PRIMARY KEY,
                     record TEXT NOT NULL
                 )"
            ),
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Read the record for one identity, if present
    pub fn get(&self, info_hash: &str) -> Result<Option<LedgerRecord>, LedgerError> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn
            .query_row(
                &format!("SELECT record FROM {TABLE_ADDED} WHERE info_hash = ?1"),
                params![info_hash],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|data| decode(info_hash, &data)).transpose()
    }

    /// Atomically record an observation of `episode`.
    ///
    /// Creates the record with `created = updated = now` on first sight;
    /// on a repeat sighting only `updated` is refreshed. The
    /// read-then-write runs in one transaction so concurrent readers see
    /// either the old or the new record, never a partial state.
    pub fn observe(
        &self,
        episode: &Episode,
        now: DateTime<Utc>,
    ) -> Result<Observation, LedgerError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row(
                &format!("SELECT record FROM {TABLE_ADDED} WHERE info_hash = ?1"),
                params![episode.info_hash],
                |row| row.get(0),
            )
            .optional()?;

        let (first_seen, record) = match existing {
            Some(data) => {
                let mut record = decode(&episode.info_hash, &data)?;
                record.updated = now;
                (false, record)
            }
            None => (
                true,
                LedgerRecord {
                    created: now,
                    updated: now,
                    episode: episode.clone(),
                },
            ),
        };

        let data = serde_json::to_string(&record).map_err(LedgerError::Encode)?;
        tx.execute(
            &format!(
                "INSERT INTO {TABLE_ADDED} (info_hash, record) VALUES (?1, ?2)
                 ON CONFLICT(info_hash) DO UPDATE SET record = excluded.record"
            ),
            params![episode.info_hash, data],
        )?;
        tx.commit()?;

        debug!(info_hash = %episode.info_hash, first_seen, "ledger observation");
        Ok(Observation { first_seen, record })
    }

    /// Raw JSON payloads of every record, in key order, read in one
    /// transaction. Used by the status endpoint, which streams them
    /// without re-validating.
    pub fn raw_records(&self) -> Result<Vec<String>, LedgerError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare(&format!("SELECT record FROM {TABLE_ADDED} ORDER BY info_hash"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Number of records in the ledger
    pub fn len(&self) -> Result<usize, LedgerError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {TABLE_ADDED}"),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn decode(info_hash: &str, data: &str) -> Result<LedgerRecord, LedgerError> {
    serde_json::from_str(data).map_err(|e| LedgerError::Decode {
        info_hash: info_hash.to_string(),
        source: e,
    })
}
