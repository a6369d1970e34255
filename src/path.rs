//! Per-session on-disk layout.
//!
//! Each notebook gets its own directory (keyed by `notebook_key`, typically a hash of the
//! notebook path) holding `kishu.db`, a `commit_graph/` segment directory, `head.json`, and
//! `connection.json`. `PathLayout` is the single place that knows these names, matching the
//! storage engine ancestor's convention of deriving every on-disk path from one header/layout
//! type rather than scattering string literals.

use std::path::{Path, PathBuf};

/// Derives the fixed set of paths used by one notebook's session store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathLayout {
    root: PathBuf,
}

impl PathLayout {
    /// Returns the default root directory under which all session directories live
    /// (`$XDG_DATA_HOME/kishu` or platform equivalent, falling back to `.kishu` in the
    /// current directory if no data directory can be resolved).
    pub fn default_sessions_root() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("kishu"))
            .unwrap_or_else(|| PathBuf::from(".kishu"))
    }

    /// Builds the layout for `notebook_key` under `sessions_root`.
    pub fn new(sessions_root: &Path, notebook_key: &str) -> Self {
        Self {
            root: sessions_root.join(notebook_key),
        }
    }

    /// Builds the layout for `notebook_key` under the default sessions root.
    pub fn for_notebook(notebook_key: &str) -> Self {
        Self::new(&Self::default_sessions_root(), notebook_key)
    }

    /// The session's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the relational metadata/variable store.
    pub fn database_path(&self) -> PathBuf {
        self.root.join("kishu.db")
    }

    /// Directory holding the commit graph's fixed-slot segment files.
    pub fn commit_graph_dir(&self) -> PathBuf {
        self.root.join("commit_graph")
    }

    /// Path to the atomically-replaced HEAD file.
    pub fn head_path(&self) -> PathBuf {
        self.root.join("head.json")
    }

    /// Path to the host discovery file.
    pub fn connection_path(&self) -> PathBuf {
        self.root.join("connection.json")
    }

    /// Path to the optional configuration overrides file.
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Creates the session directory (and commit graph subdirectory) if absent.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.commit_graph_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_derived_under_notebook_root() {
        let layout = PathLayout::new(Path::new("/tmp/kishu-sessions"), "nb-1");
        assert_eq!(
            layout.database_path(),
            PathBuf::from("/tmp/kishu-sessions/nb-1/kishu.db")
        );
        assert_eq!(
            layout.commit_graph_dir(),
            PathBuf::from("/tmp/kishu-sessions/nb-1/commit_graph")
        );
        assert_eq!(
            layout.head_path(),
            PathBuf::from("/tmp/kishu-sessions/nb-1/head.json")
        );
    }

    #[test]
    fn ensure_dirs_creates_commit_graph_subdir() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = PathLayout::new(tmp.path(), "nb-2");
        layout.ensure_dirs().unwrap();
        assert!(layout.commit_graph_dir().is_dir());
    }
}
