//! Relational metadata: commit entries, session state, branches, tags, and the variable
//! version index. Backed by a single `rusqlite` connection per session, in the manner of the
//! storage engine ancestor's `SqliteGraphDB` (one struct wrapping a `Connection`, plain SQL
//! strings, `serde_json` for anything that doesn't fit a column).

pub mod branch;
pub mod commit_entry;
pub mod connection;
pub mod head;
pub mod tag;

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

pub use branch::{random_branch_name, BranchRow};
pub use commit_entry::{CellType, CommitEntry, CommitEntryKind, FormattedCell};
pub use self::connection::Connection as HostConnection;
pub use head::Head;
pub use tag::TagRow;

use crate::error::{KishuError, Result};

/// What a partial commit id prefix resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Exactly one commit matched.
    One(String),
    /// More than one commit matched; these are the candidates.
    Ambiguous(Vec<String>),
    /// No commit matched.
    NotFound,
}

/// The relational half of a notebook session's store.
pub struct MetadataStore {
    conn: Connection,
}

impl MetadataStore {
    /// Opens (creating if absent) the database at `path` and ensures every table exists.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_database()?;
        Ok(store)
    }

    /// Opens a private in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_database()?;
        Ok(store)
    }

    fn init_database(&self) -> Result<()> {
        self.conn.execute_batch(
            "create table if not exists commit_entry (commit_id text primary key, data blob);
             create table if not exists session_state (commit_id text primary key, data blob);
             create table if not exists branch (branch_name text primary key, commit_id text);
             create table if not exists tag (tag_name text primary key, commit_id text, message text);
             create table if not exists variable_version (name text primary key, commit_id text);
             create table if not exists commit_variable_version (
                 commit_id text, name text, version integer,
                 primary key (commit_id, name)
             );",
        )?;
        Ok(())
    }

    // ---- commit_entry / session_state -------------------------------------------------

    /// Stores a commit entry and its active-VS fingerprint. Fails if `commit_id` already has
    /// an entry — commits are append-only once recorded.
    pub fn store_commit(&self, entry: &CommitEntry, active_vs_fingerprint: &[u8]) -> Result<()> {
        let data = serde_json::to_vec(entry)?;
        self.conn.execute(
            "insert into commit_entry (commit_id, data) values (?1, ?2)",
            params![entry.commit_id, data],
        )?;
        self.conn.execute(
            "insert into session_state (commit_id, data) values (?1, ?2)",
            params![entry.commit_id, active_vs_fingerprint],
        )?;
        Ok(())
    }

    /// Overwrites an existing commit entry's data (e.g. an edited message), leaving its
    /// session state untouched.
    pub fn update_commit(&self, entry: &CommitEntry) -> Result<()> {
        let data = serde_json::to_vec(entry)?;
        let changed = self.conn.execute(
            "update commit_entry set data = ?1 where commit_id = ?2",
            params![data, entry.commit_id],
        )?;
        if changed == 0 {
            return Err(KishuError::CommitNotFound(entry.commit_id.clone()));
        }
        Ok(())
    }

    /// Fetches one commit entry.
    pub fn get_commit(&self, commit_id: &str) -> Result<CommitEntry> {
        self.conn
            .query_row(
                "select data from commit_entry where commit_id = ?1",
                params![commit_id],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    KishuError::CommitNotFound(commit_id.to_string())
                }
                other => other.into(),
            })
            .and_then(|data| Ok(serde_json::from_slice(&data)?))
    }

    /// Fetches several commit entries at once. Missing ids are silently absent from the
    /// result map.
    pub fn get_commits(&self, commit_ids: &[String]) -> Result<HashMap<String, CommitEntry>> {
        if commit_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; commit_ids.len()].join(", ");
        let sql = format!("select commit_id, data from commit_entry where commit_id in ({placeholders})");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(commit_ids.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        let mut result = HashMap::new();
        for row in rows {
            let (commit_id, data) = row?;
            result.insert(commit_id, serde_json::from_slice(&data)?);
        }
        Ok(result)
    }

    /// Fetches the active-VS fingerprint bytes recorded alongside a commit.
    pub fn get_session_state(&self, commit_id: &str) -> Result<Vec<u8>> {
        self.conn
            .query_row(
                "select data from session_state where commit_id = ?1",
                params![commit_id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    KishuError::CommitNotFound(commit_id.to_string())
                }
                other => other.into(),
            })
    }

    /// Lists every stored commit id with the given prefix.
    pub fn keys_like(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{prefix}%");
        let mut stmt = self
            .conn
            .prepare("select commit_id from commit_entry where commit_id like ?1")?;
        let rows = stmt.query_map(params![pattern], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Resolves a possibly-abbreviated commit id against stored commits: exact match wins
    /// outright, otherwise falls back to unique-prefix matching.
    pub fn resolve_commit_id(&self, input: &str) -> Result<Resolved> {
        let exists: bool = self
            .conn
            .query_row(
                "select 1 from commit_entry where commit_id = ?1",
                params![input],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if exists {
            return Ok(Resolved::One(input.to_string()));
        }
        let matches = self.keys_like(input)?;
        Ok(match matches.len() {
            0 => Resolved::NotFound,
            1 => Resolved::One(matches.into_iter().next().unwrap()),
            _ => Resolved::Ambiguous(matches),
        })
    }

    // ---- branch --------------------------------------------------------------------------

    /// Creates or moves a branch to point at `commit_id`.
    pub fn upsert_branch(&self, branch_name: &str, commit_id: &str) -> Result<()> {
        self.conn.execute(
            "insert or replace into branch (branch_name, commit_id) values (?1, ?2)",
            params![branch_name, commit_id],
        )?;
        Ok(())
    }

    /// Looks up a single branch by name.
    pub fn get_branch(&self, branch_name: &str) -> Result<Option<BranchRow>> {
        self.conn
            .query_row(
                "select branch_name, commit_id from branch where branch_name = ?1",
                params![branch_name],
                |row| {
                    Ok(BranchRow {
                        branch_name: row.get(0)?,
                        commit_id: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Lists every branch.
    pub fn list_branch(&self) -> Result<Vec<BranchRow>> {
        let mut stmt = self
            .conn
            .prepare("select branch_name, commit_id from branch")?;
        let rows = stmt.query_map([], |row| {
            Ok(BranchRow {
                branch_name: row.get(0)?,
                commit_id: row.get(1)?,
            })
        })?;
        let mut branches = Vec::new();
        for row in rows {
            branches.push(row?);
        }
        Ok(branches)
    }

    /// Lists every branch pointing at `commit_id`.
    pub fn branches_for_commit(&self, commit_id: &str) -> Result<Vec<BranchRow>> {
        let mut stmt = self
            .conn
            .prepare("select branch_name, commit_id from branch where commit_id = ?1")?;
        let rows = stmt.query_map(params![commit_id], |row| {
            Ok(BranchRow {
                branch_name: row.get(0)?,
                commit_id: row.get(1)?,
            })
        })?;
        let mut branches = Vec::new();
        for row in rows {
            branches.push(row?);
        }
        Ok(branches)
    }

    /// Groups branches by commit id, for the many commits in `commit_ids` at once.
    pub fn branches_for_commits(&self, commit_ids: &[String]) -> Result<HashMap<String, Vec<BranchRow>>> {
        if commit_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; commit_ids.len()].join(", ");
        let sql = format!("select branch_name, commit_id from branch where commit_id in ({placeholders})");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(commit_ids.iter()), |row| {
            Ok(BranchRow {
                branch_name: row.get(0)?,
                commit_id: row.get(1)?,
            })
        })?;
        let mut by_commit: HashMap<String, Vec<BranchRow>> = HashMap::new();
        for row in rows {
            let branch = row?;
            by_commit.entry(branch.commit_id.clone()).or_default().push(branch);
        }
        Ok(by_commit)
    }

    /// Deletes a branch. Refuses to delete the branch HEAD is currently attached to.
    pub fn delete_branch(&self, branch_name: &str, head: &Head) -> Result<()> {
        if head.branch_name.as_deref() == Some(branch_name) {
            return Err(KishuError::BranchConflict(
                "cannot delete the currently checked-out branch".into(),
            ));
        }
        if self.get_branch(branch_name)?.is_none() {
            return Err(KishuError::BranchNotFound(branch_name.to_string()));
        }
        self.conn
            .execute("delete from branch where branch_name = ?1", params![branch_name])?;
        Ok(())
    }

    /// Renames a branch, refusing a collision with an existing name. Returns `true` if HEAD
    /// was attached to `old_name` and the caller should update HEAD to `new_name`.
    pub fn rename_branch(&self, old_name: &str, new_name: &str, head: &Head) -> Result<bool> {
        if self.get_branch(old_name)?.is_none() {
            return Err(KishuError::BranchNotFound(old_name.to_string()));
        }
        if self.get_branch(new_name)?.is_some() {
            return Err(KishuError::BranchConflict(format!(
                "branch {new_name:?} already exists"
            )));
        }
        self.conn.execute(
            "update branch set branch_name = ?1 where branch_name = ?2",
            params![new_name, old_name],
        )?;
        Ok(head.branch_name.as_deref() == Some(old_name))
    }

    // ---- tag -----------------------------------------------------------------------------

    /// Creates a tag. Fails if the name is already taken — tags are immutable once created.
    pub fn create_tag(&self, tag_name: &str, commit_id: &str, message: &str) -> Result<()> {
        self.conn
            .execute(
                "insert into tag (tag_name, commit_id, message) values (?1, ?2, ?3)",
                params![tag_name, commit_id, message],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation => {
                    KishuError::BranchConflict(format!("tag {tag_name:?} already exists"))
                }
                other => other.into(),
            })?;
        Ok(())
    }

    /// Looks up a single tag by name.
    pub fn get_tag(&self, tag_name: &str) -> Result<Option<TagRow>> {
        self.conn
            .query_row(
                "select tag_name, commit_id, message from tag where tag_name = ?1",
                params![tag_name],
                |row| {
                    Ok(TagRow {
                        tag_name: row.get(0)?,
                        commit_id: row.get(1)?,
                        message: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Lists every tag.
    pub fn list_tag(&self) -> Result<Vec<TagRow>> {
        let mut stmt = self
            .conn
            .prepare("select tag_name, commit_id, message from tag")?;
        let rows = stmt.query_map([], |row| {
            Ok(TagRow {
                tag_name: row.get(0)?,
                commit_id: row.get(1)?,
                message: row.get(2)?,
            })
        })?;
        let mut tags = Vec::new();
        for row in rows {
            tags.push(row?);
        }
        Ok(tags)
    }

    /// Deletes a tag.
    pub fn delete_tag(&self, tag_name: &str) -> Result<()> {
        if self.get_tag(tag_name)?.is_none() {
            return Err(KishuError::TagNotFound(tag_name.to_string()));
        }
        self.conn
            .execute("delete from tag where tag_name = ?1", params![tag_name])?;
        Ok(())
    }

    // ---- variable_version / commit_variable_version ---------------------------------------

    /// Records that `name` was last (re)stored fresh at `commit_id`, with `version` as its
    /// storage generation counter.
    pub fn record_variable_version(&self, commit_id: &str, name: &str, version: u64) -> Result<()> {
        self.conn.execute(
            "insert or replace into commit_variable_version (commit_id, name, version) values (?1, ?2, ?3)",
            params![commit_id, name, version as i64],
        )?;
        self.conn.execute(
            "insert or replace into variable_version (name, commit_id) values (?1, ?2)",
            params![name, commit_id],
        )?;
        Ok(())
    }

    /// The commit that most recently stored a fresh copy of `name`, if any.
    pub fn latest_commit_for_variable(&self, name: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "select commit_id from variable_version where name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// The storage generation of `name` as of `commit_id`, if it was stored there.
    pub fn variable_version_at(&self, commit_id: &str, name: &str) -> Result<Option<u64>> {
        self.conn
            .query_row(
                "select version from commit_variable_version where commit_id = ?1 and name = ?2",
                params![commit_id, name],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map(|opt| opt.map(|v| v as u64))
            .map_err(Into::into)
    }
}
