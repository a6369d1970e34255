//! Tag table: named, immutable pointers to a commit.

/// One row of the `tag` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRow {
    /// The tag's name.
    pub tag_name: String,
    /// The commit the tag points to.
    pub commit_id: String,
    /// Optional free-form annotation.
    pub message: String,
}
