//! Kishu: a git-like versioning system for interactive computation sessions.
//!
//! A notebook's live variable namespace is checkpointed around each cell execution into an
//! append-only commit graph, a relational metadata store, and a content-addressed variable
//! store, so any prior point in a session can be restored on demand.

pub mod ahg;
pub mod cli;
pub mod commit_graph;
pub mod config;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod namespace;
pub mod path;
pub mod planner;
pub mod session;
pub mod variable_store;

pub use error::{KishuError, Result};
