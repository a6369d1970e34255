//! HEAD: the session's current branch/commit pointer, persisted outside the database so it
//! can be read without opening a connection.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The session's current position: a branch name (if attached) and the commit currently
/// checked out. `branch_name` is `None` when HEAD is detached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Head {
    /// The attached branch, or `None` if detached.
    pub branch_name: Option<String>,
    /// The currently checked-out commit, or `None` before the first commit.
    pub commit_id: Option<String>,
}

impl Head {
    /// Reads HEAD from `path`. A missing or unparseable file is treated as a fresh,
    /// unattached HEAD rather than an error, matching a brand-new session's starting state.
    pub fn read(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    /// Writes HEAD to `path` via a temp-file-then-rename so a crash mid-write never leaves a
    /// half-written `head.json` behind.
    pub fn write(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string(self)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, text)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Applies an update in place: attaching/detaching the branch and/or moving the commit
    /// pointer, then persists the result.
    pub fn update(
        path: &Path,
        branch_name: Option<&str>,
        commit_id: Option<&str>,
        detach: bool,
    ) -> Result<Self> {
        let mut head = Self::read(path);
        if detach {
            head.branch_name = None;
        } else if let Some(name) = branch_name {
            head.branch_name = Some(name.to_string());
        }
        if let Some(id) = commit_id {
            head.commit_id = Some(id.to_string());
        }
        head.write(path)?;
        Ok(head)
    }

    /// True if HEAD is not attached to any branch.
    pub fn is_detached(&self) -> bool {
        self.branch_name.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_head_file_is_unattached() {
        let dir = tempfile::tempdir().unwrap();
        let head = Head::read(&dir.path().join("head.json"));
        assert_eq!(head, Head::default());
        assert!(head.is_detached());
    }

    #[test]
    fn update_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("head.json");

        let head = Head::update(&path, Some("main"), Some("c1"), false).unwrap();
        assert_eq!(head.branch_name.as_deref(), Some("main"));
        assert_eq!(head.commit_id.as_deref(), Some("c1"));

        let reloaded = Head::read(&path);
        assert_eq!(reloaded, head);

        let detached = Head::update(&path, None, Some("c2"), true).unwrap();
        assert!(detached.is_detached());
        assert_eq!(detached.commit_id.as_deref(), Some("c2"));
    }
}
