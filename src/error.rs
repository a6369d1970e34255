//! Error taxonomy for the Kishu session-state engine.
//!
//! Variants are grouped by the collaborator that raises them (connection, notebook,
//! resolution, storage, planning) rather than by Rust type, matching the error policy of
//! the spec this crate implements: connection/resolution errors surface verbatim, storage
//! and planning errors trigger fallbacks where one is defined.

use std::io;
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tracing::error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, KishuError>;

/// All error conditions the engine can raise.
#[derive(Debug, Error)]
pub enum KishuError {
    /// I/O failure reading or writing a session store.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The underlying relational store reported an error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A JSON document (HEAD, config merge, a serialized snapshot) failed to encode/decode.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A fixed-slot record was corrupt or truncated.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// A commit id had no matching entry.
    #[error("commit {0:?} not found")]
    CommitNotFound(String),

    /// A prefix matched more than one commit id.
    #[error("commit prefix {0:?} is ambiguous")]
    AmbiguousCommit(String),

    /// A branch name had no matching entry.
    #[error("branch {0:?} not found")]
    BranchNotFound(String),

    /// A tag name had no matching entry.
    #[error("tag {0:?} not found")]
    TagNotFound(String),

    /// A branch operation conflicted with the current HEAD or an existing name.
    #[error("branch conflict: {0}")]
    BranchConflict(String),

    /// The host connection info was missing or stale.
    #[error("connection error: {0}")]
    Connection(String),

    /// `post_cell` arrived without a matching `pre_cell`.
    #[error("post_cell called without a matching pre_cell")]
    PostWithoutPre,

    /// The notebook carried no kishu metadata block.
    #[error("notebook missing kishu metadata")]
    MissingNotebookMetadata,

    /// A restore plan could not be constructed or executed.
    #[error("planning error: {0}")]
    Planning(String),

    /// A config file had an unrecognized section or malformed value.
    #[error("config error: {0}")]
    Config(String),

    /// An argument was invalid for the requested operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<rusqlite::Error> for KishuError {
    fn from(e: rusqlite::Error) -> Self {
        KishuError::Storage(e.to_string())
    }
}

/// Locks `mutex`, converting a poisoned lock into a [`KishuError::Corruption`] instead of
/// panicking — a poisoned session-registry lock means a prior panic left shared state
/// inconsistent, which callers should be able to report and recover from.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| {
        error!("session lock poisoned");
        KishuError::Corruption("session lock poisoned".into())
    })
}
