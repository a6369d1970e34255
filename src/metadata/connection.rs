//! `connection.json`: how `list`/session discovery finds the kernel backing a notebook.
//!
//! Mirrors [`super::head::Head`]'s read/write shape — tolerant reads, atomic writes — since
//! both are small JSON documents a CLI invocation and a live host process can race on.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Host discovery record written at `init` time and consulted by `list`/`fegraph` to tell a
/// live session from an orphaned one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Jupyter kernel id, if the host process reported one.
    pub kernel_id: Option<String>,
    /// Absolute path to the notebook file at the time of `init`.
    pub notebook_path: Option<String>,
}

impl Connection {
    /// Reads `path`, treating a missing or malformed file as "no connection recorded".
    pub fn read(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    /// Atomically writes this record to `path` via a sibling `.tmp` file plus rename.
    pub fn write(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_connection_file_reads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let connection = Connection::read(&dir.path().join("connection.json"));
        assert_eq!(connection, Connection::default());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connection.json");
        let connection = Connection {
            kernel_id: Some("k-1".into()),
            notebook_path: Some("/tmp/nb.ipynb".into()),
        };
        connection.write(&path).unwrap();
        assert_eq!(Connection::read(&path), connection);
    }
}
