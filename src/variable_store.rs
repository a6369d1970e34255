//! Content-addressed key/value storage for serialized variable snapshots.
//!
//! A `(names, version)` pair is written at most once across the whole commit graph: once a
//! `VersionedName` has been stored at some commit, every descendant commit that needs it
//! again just points at that row instead of re-serializing the value.

use std::collections::HashSet;
use std::path::Path;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::ahg::VersionedName;
use crate::error::{KishuError, Result};

/// The checkpoint KV store: `variable_kv` holds the serialized blob, `namespace` holds the
/// name list a `names_hash` expands to (hashes aren't reversible on their own).
pub struct VariableStore {
    conn: Connection,
}

impl VariableStore {
    /// Opens (creating if absent) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_database()?;
        Ok(store)
    }

    /// Opens a private in-memory store, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_database()?;
        Ok(store)
    }

    fn init_database(&self) -> Result<()> {
        self.conn.execute_batch(
            "create table if not exists variable_kv (
                 commit_id text, names_hash integer, version integer, blob blob,
                 primary key (commit_id, names_hash, version)
             );
             create table if not exists namespace (
                 commit_id text, names_hash integer, version integer, names_blob text,
                 primary key (commit_id, names_hash, version)
             );",
        )?;
        Ok(())
    }

    /// Persists `blob` for `versioned_name` as written at `commit_id`.
    pub fn put(&self, commit_id: &str, versioned_name: &VersionedName, blob: &[u8]) -> Result<()> {
        let hash = versioned_name.names_hash() as i64;
        let names_json = serde_json::to_string(&versioned_name.names)?;
        self.conn.execute(
            "insert or replace into variable_kv (commit_id, names_hash, version, blob) values (?1, ?2, ?3, ?4)",
            params![commit_id, hash, versioned_name.version as i64, blob],
        )?;
        self.conn.execute(
            "insert or replace into namespace (commit_id, names_hash, version, names_blob) values (?1, ?2, ?3, ?4)",
            params![commit_id, hash, versioned_name.version as i64, names_json],
        )?;
        Ok(())
    }

    /// Every `VersionedName` already stored at any of `commit_ids` — used by the planner to
    /// skip re-storing VSes an ancestor already persisted.
    pub fn get_stored_versioned_names(&self, commit_ids: &[String]) -> Result<HashSet<VersionedName>> {
        if commit_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let placeholders = vec!["?"; commit_ids.len()].join(", ");
        let sql = format!(
            "select version, names_blob from namespace where commit_id in ({placeholders})"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(commit_ids.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut result = HashSet::new();
        for row in rows {
            let (version, names_blob) = row?;
            let names: Vec<String> = serde_json::from_str(&names_blob)?;
            result.insert(VersionedName::new(names, version as u64));
        }
        Ok(result)
    }

    /// Finds which of `commit_ids` (searched in order) actually holds `versioned_name`'s blob.
    /// A stored `(names_hash, version)` pair is written at exactly one commit under
    /// incremental storage, but full (non-incremental) checkpoints can repeat the same pair
    /// at several commits, so the caller's order decides which one wins — callers pass the
    /// target commit's ancestry nearest-first so a restore always binds to the closest one.
    pub fn find_storing_commit(&self, commit_ids: &[String], versioned_name: &VersionedName) -> Result<Option<String>> {
        let hash = versioned_name.names_hash() as i64;
        for commit_id in commit_ids {
            let found: Option<i64> = self
                .conn
                .query_row(
                    "select 1 from variable_kv where commit_id = ?1 and names_hash = ?2 and version = ?3",
                    params![commit_id, hash, versioned_name.version as i64],
                    |row| row.get(0),
                )
                .optional()?;
            if found.is_some() {
                return Ok(Some(commit_id.clone()));
            }
        }
        Ok(None)
    }

    /// Fetches one stored blob, or errs if it was never written at `commit_id`.
    pub fn get_variable_snapshot(&self, commit_id: &str, versioned_name: &VersionedName) -> Result<Vec<u8>> {
        let hash = versioned_name.names_hash() as i64;
        self.conn
            .query_row(
                "select blob from variable_kv where commit_id = ?1 and names_hash = ?2 and version = ?3",
                params![commit_id, hash, versioned_name.version as i64],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| {
                KishuError::Storage(format!(
                    "no stored snapshot for {:?}@{} at commit {commit_id:?}",
                    versioned_name.names, versioned_name.version
                ))
            })
    }

    /// Fetches several stored blobs in request order. Errs on the first missing entry.
    pub fn get_variable_snapshots(
        &self,
        requests: &[(String, VersionedName)],
    ) -> Result<Vec<Vec<u8>>> {
        requests
            .iter()
            .map(|(commit_id, versioned_name)| self.get_variable_snapshot(commit_id, versioned_name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let store = VariableStore::open_in_memory().unwrap();
        let vn = VersionedName::new(["x".to_string()], 1);
        store.put("c1", &vn, b"payload").unwrap();
        assert_eq!(store.get_variable_snapshot("c1", &vn).unwrap(), b"payload");
    }

    #[test]
    fn missing_snapshot_errors() {
        let store = VariableStore::open_in_memory().unwrap();
        let vn = VersionedName::new(["x".to_string()], 1);
        let err = store.get_variable_snapshot("c1", &vn).unwrap_err();
        assert!(matches!(err, KishuError::Storage(_)));
    }

    #[test]
    fn find_storing_commit_picks_nearest_ancestor_with_the_blob() {
        let store = VariableStore::open_in_memory().unwrap();
        let vn = VersionedName::new(["x".to_string()], 1);
        store.put("c1", &vn, b"payload").unwrap();

        let found = store
            .find_storing_commit(&["c3".to_string(), "c2".to_string(), "c1".to_string()], &vn)
            .unwrap();
        assert_eq!(found.as_deref(), Some("c1"));
    }

    #[test]
    fn find_storing_commit_is_none_when_never_written() {
        let store = VariableStore::open_in_memory().unwrap();
        let vn = VersionedName::new(["x".to_string()], 1);
        let found = store.find_storing_commit(&["c1".to_string()], &vn).unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn get_stored_versioned_names_spans_many_commits() {
        let store = VariableStore::open_in_memory().unwrap();
        let vn1 = VersionedName::new(["x".to_string()], 1);
        let vn2 = VersionedName::new(["y".to_string()], 1);
        store.put("c1", &vn1, b"a").unwrap();
        store.put("c2", &vn2, b"b").unwrap();

        let stored = store
            .get_stored_versioned_names(&["c1".to_string(), "c2".to_string()])
            .unwrap();
        assert!(stored.contains(&vn1));
        assert!(stored.contains(&vn2));
    }
}
