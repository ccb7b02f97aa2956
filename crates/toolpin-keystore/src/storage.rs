//! # Persistent Pin Storage
//!
//! This module provides the durable half of the Key Store using Sled, an
//! embedded database. Each pinned key is stored as one JSON record keyed by
//! its tool id, so uniqueness of `tool_id` is enforced by the tree itself.
//!
//! ## Threat Model
//!
//! The storage layer defends against:
//!
//! - **Racing First Trust**: `insert_if_vacant` is a compare-and-swap, so two
//!   callers establishing first trust for the same tool id cannot both win.
//! - **Lost Overwrites**: `upsert` hands back the record it replaced, so an
//!   overwrite of an active pin is always visible to the caller.
//! - **Lost Updates**: counters are updated with `update_and_fetch`, which
//!   retries atomically instead of doing read-then-write.
//!
//! ## Storage Structure
//!
//! | Tree | Key | Value | Purpose |
//! |------|-----|-------|---------|
//! | `pins` | tool id | JSON `PinnedKeyRecord` | Trust anchors |
//!
//! ## Security Notes
//!
//! - The database file should be stored with permissions restricted to the
//!   process that consumes tool schemas.
//! - Records are never physically deleted; revocation is a flag.

use crate::error::{Result, StoreError};
use crate::models::PinnedKeyRecord;
use std::path::Path;

/// Tree name for pinned key records.
const PIN_TREE: &str = "pins";

/// Wrapper around a Sled database holding pinned key records.
///
/// # Thread Safety
///
/// The underlying Sled tree is thread-safe and cheap to clone. Every
/// mutation is a single atomic tree operation.
///
/// # Example
///
/// ```rust
/// use toolpin_keystore::storage::PinStorage;
/// use toolpin_keystore::{KeyMetadata, PinnedKeyRecord, ToolId};
///
/// let storage = PinStorage::temporary().unwrap();
/// let record = PinnedKeyRecord::new(
///     ToolId::new("example.com", "read_file"),
///     "example.com",
///     "-----BEGIN PUBLIC KEY-----\n...\n-----END PUBLIC KEY-----",
///     KeyMetadata::new(),
/// );
///
/// assert!(storage.upsert(&record).unwrap().is_none());
/// assert!(storage.get("example.com/read_file").unwrap().is_some());
/// ```
#[derive(Clone)]
pub struct PinStorage {
    /// The underlying Sled database.
    db: sled::Db,

    /// Tree holding one record per tool id.
    pins: sled::Tree,
}

impl PinStorage {
    /// Opens or creates a pin database at the given path.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the path is unusable or the
    /// database is corrupted or locked by another process.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        let pins = db.open_tree(PIN_TREE)?;

        Ok(PinStorage { db, pins })
    }

    /// Creates an in-memory pin store that is discarded on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        let pins = db.open_tree(PIN_TREE)?;

        Ok(PinStorage { db, pins })
    }

    /// Writes `record`, replacing whatever was stored under its tool id.
    ///
    /// # Returns
    ///
    /// The record that was replaced, if any. The swap is atomic, so two
    /// concurrent writers each see exactly the value the other overwrote.
    pub fn upsert(&self, record: &PinnedKeyRecord) -> Result<Option<PinnedKeyRecord>> {
        let key = record.tool_id.as_str();
        let bytes = serde_json::to_vec(record)?;

        match self.pins.insert(key.as_bytes(), bytes)? {
            Some(previous) => Ok(Some(decode(key, &previous)?)),
            None => Ok(None),
        }
    }

    /// Writes `record` only if no active pin exists for its tool id.
    ///
    /// A revoked record counts as vacant and is replaced.
    ///
    /// # Returns
    ///
    /// - `Ok(Ok(previous))` when the write landed; `previous` is the revoked
    ///   record it replaced, if any.
    /// - `Ok(Err(winner))` when an active pin already exists.
    pub fn insert_if_vacant(
        &self,
        record: &PinnedKeyRecord,
    ) -> Result<std::result::Result<Option<PinnedKeyRecord>, PinnedKeyRecord>> {
        let key = record.tool_id.as_str();
        let bytes = serde_json::to_vec(record)?;
        let mut current = self.pins.get(key.as_bytes())?;

        loop {
            let existing = match &current {
                Some(raw) => Some(decode(key, raw)?),
                None => None,
            };

            if let Some(active) = existing.as_ref().filter(|r| r.is_active()) {
                return Ok(Err(active.clone()));
            }

            match self
                .pins
                .compare_and_swap(key.as_bytes(), current.as_ref(), Some(bytes.clone()))?
            {
                Ok(()) => return Ok(Ok(existing)),
                // Lost the race; re-examine whatever the winner wrote.
                Err(conflict) => current = conflict.current,
            }
        }
    }

    /// Atomically applies `change` to the record stored under `tool_id`.
    ///
    /// `change` returns whether it modified the record. It may be invoked
    /// more than once if another writer interleaves.
    ///
    /// # Returns
    ///
    /// The stored record after the update and whether `change` reported a
    /// modification, or `None` if no record exists.
    pub fn modify<F>(&self, tool_id: &str, mut change: F) -> Result<Option<(PinnedKeyRecord, bool)>>
    where
        F: FnMut(&mut PinnedKeyRecord) -> bool,
    {
        let mut changed = false;
        let mut corrupt = None;

        let updated = self.pins.update_and_fetch(tool_id.as_bytes(), |old| {
            let raw = old?;
            match serde_json::from_slice::<PinnedKeyRecord>(raw) {
                Ok(mut record) => {
                    changed = change(&mut record);
                    if !changed {
                        return Some(raw.to_vec());
                    }
                    match serde_json::to_vec(&record) {
                        Ok(bytes) => Some(bytes),
                        Err(e) => {
                            changed = false;
                            corrupt = Some(e.to_string());
                            Some(raw.to_vec())
                        }
                    }
                }
                Err(e) => {
                    corrupt = Some(e.to_string());
                    Some(raw.to_vec())
                }
            }
        })?;

        if let Some(reason) = corrupt {
            return Err(StoreError::CorruptRecord {
                tool_id: tool_id.to_string(),
                reason,
            });
        }

        match updated {
            Some(raw) => Ok(Some((decode(tool_id, &raw)?, changed))),
            None => Ok(None),
        }
    }

    /// Loads the record stored under `tool_id`, revoked or not.
    pub fn get(&self, tool_id: &str) -> Result<Option<PinnedKeyRecord>> {
        match self.pins.get(tool_id.as_bytes())? {
            Some(raw) => Ok(Some(decode(tool_id, &raw)?)),
            None => Ok(None),
        }
    }

    /// Lists every stored record in tool id order.
    pub fn list(&self) -> Result<Vec<PinnedKeyRecord>> {
        let mut records = Vec::new();

        for entry in self.pins.iter() {
            let (key, value) = entry?;
            let tool_id = String::from_utf8_lossy(&key).into_owned();
            records.push(decode(&tool_id, &value)?);
        }

        Ok(records)
    }

    /// Returns the number of stored records, including revoked ones.
    pub fn len(&self) -> usize {
        self.pins.len()
    }

    /// Returns true if nothing has ever been pinned.
    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<usize> {
        Ok(self.db.flush()?)
    }
}

impl std::fmt::Debug for PinStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinStorage")
            .field("records", &self.len())
            .finish()
    }
}

fn decode(tool_id: &str, raw: &[u8]) -> Result<PinnedKeyRecord> {
    serde_json::from_slice(raw).map_err(|e| StoreError::CorruptRecord {
        tool_id: tool_id.to_string(),
        reason: e.to_string(),
    })
}
