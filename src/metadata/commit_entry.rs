//! `CommitEntry` and the cell-formatting types it carries.

use serde::{Deserialize, Serialize};

/// How a commit came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitEntryKind {
    /// Created by an explicit `commit` call.
    Manual,
    /// Created automatically by a cell's post-execution hook.
    CellTriggered,
    /// Kind not recorded (e.g. legacy data, or a synthetic root).
    Unspecified,
}

impl Default for CommitEntryKind {
    fn default() -> Self {
        Self::Unspecified
    }
}

/// The kind of a notebook cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    /// An executable code cell.
    Code,
    /// A markdown documentation cell.
    Markdown,
    /// An unprocessed raw cell.
    Raw,
}

/// A single notebook cell as rendered for display/export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedCell {
    /// The cell's kind.
    pub cell_type: CellType,
    /// The cell's source text.
    pub source: String,
    /// Captured stdout/result text, if any.
    pub output: Option<String>,
    /// The notebook's own execution counter for this cell, if known.
    pub execution_count: Option<i64>,
}

/// One node's durable metadata: everything about a commit except the commit graph edge
/// itself (that lives in [`crate::commit_graph::CommitGraph`]) and the active-VS
/// fingerprint (that lives in the `session_state` table, see
/// [`super::MetadataStore::get_session_state`]).
///
/// `restore_plan` is intentionally absent: per the open-question decision in `DESIGN.md`,
/// restore plans are rebuilt on demand by the planner from the AHG and the session-state
/// fingerprint rather than persisted verbatim.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommitEntry {
    /// This commit's id.
    pub commit_id: String,
    /// How the commit was created.
    pub kind: CommitEntryKind,
    /// Unix-epoch seconds when the commit was recorded.
    pub timestamp: f64,
    /// User- or auto-supplied commit message.
    pub message: String,
    /// Source of every cell executed since the session began, in execution order.
    pub executed_cells: Vec<String>,
    /// The raw notebook JSON captured at commit time, if the host provided one.
    pub raw_notebook: Option<String>,
    /// Cells formatted for display/export.
    pub formatted_cells: Vec<FormattedCell>,
    /// Hash of the code executed since the parent commit.
    pub code_version: u64,
    /// Hash of the active variable-set partition.
    pub varset_version: u64,
    /// Total wall-clock time of the cell execution(s) this commit covers.
    pub runtime_s: Option<f64>,
    /// Wall-clock time spent in the checkpoint pipeline itself.
    pub checkpoint_runtime_s: Option<f64>,
    /// Epoch seconds the covered execution started.
    pub start_time: Option<f64>,
    /// Epoch seconds the covered execution ended.
    pub end_time: Option<f64>,
    /// The raw source of the single cell that triggered this commit, for cell-triggered
    /// commits.
    pub raw_cell: Option<String>,
    /// The host's own execution counter, for cell-triggered commits.
    pub execution_count: Option<i64>,
    /// Error text if the cell failed before execution started (e.g. a syntax error).
    pub error_before_exec: Option<String>,
    /// Error text if the cell raised during execution.
    pub error_in_exec: Option<String>,
    /// `repr()`-style text of the cell's return value, if any.
    pub result_repr: Option<String>,
}

impl CommitEntry {
    /// Builds a manual commit entry with an empty execution history.
    pub fn manual(commit_id: impl Into<String>, message: impl Into<String>, timestamp: f64) -> Self {
        Self {
            commit_id: commit_id.into(),
            kind: CommitEntryKind::Manual,
            timestamp,
            message: message.into(),
            ..Default::default()
        }
    }
}
