//! The session state machine: `Idle → PreCell → Executing → PostCell → Idle`, owning one
//! notebook's stores and live namespace.

pub mod registry;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::RngCore;

use crate::ahg::{Ahg, ChangedVariables};
use crate::commit_graph::CommitGraph;
use crate::config::Config;
use crate::error::{KishuError, Result};
use crate::metadata::{CommitEntry, CommitEntryKind, Head, MetadataStore, Resolved};
use crate::namespace::{FlatReferenceGraph, InMemoryNamespace, JsonCodec, Namespace};
use crate::path::PathLayout;
use crate::planner::{CellExecutor, FallbackedAction, Planner};
use crate::variable_store::VariableStore;

pub use registry::SessionRegistry;

fn now_epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn generate_commit_id(config: &Config, notebook_key: &str, counter: u64) -> String {
    if config.experiment.deterministic_ids {
        return format!("{notebook_key}:{counter}");
    }
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A no-op executor for hosts/tests that never trigger a rerun fallback.
#[derive(Debug, Default)]
pub struct NoopExecutor;

impl CellExecutor for NoopExecutor {
    fn execute(&mut self, _code: &str, _namespace: &mut dyn Namespace) -> Result<()> {
        Err(KishuError::Planning("no executor configured for rerun fallback".into()))
    }
}

/// Host-issued notebook save, polled for completion before a cell starts executing (so the
/// cell's own stdout isn't racing the save). A host that can't report completion (or isn't
/// running one at all, e.g. this crate's own CLI-only tests) can leave this as the default,
/// which issues the save and immediately reports it done.
pub trait NotebookHost {
    /// Asks the host to save the notebook file. Returns once the host has issued the save;
    /// does not itself wait for the file to change on disk.
    fn request_save(&mut self) {}

    /// Whether the notebook file has changed since `request_save` was called. Polled with
    /// backoff by [`poll_notebook_saved`] until it reports `true` or the cap is hit.
    fn is_saved(&mut self) -> bool {
        true
    }
}

/// A host with no notebook to save (headless sessions, tests).
#[derive(Debug, Default)]
pub struct NoopHost;

impl NotebookHost for NoopHost {}

/// Polls `host.is_saved()` with a doubling-ish backoff starting at `start` and capped at `cap`,
/// mirroring the bounded wait a live Jupyter frontend needs to flush a save to disk. Returns
/// `true` if the host reported completion before the cap was reached.
pub fn poll_notebook_saved(host: &mut dyn NotebookHost, start: Duration, cap: Duration) -> bool {
    host.request_save();
    let mut backoff = start;
    loop {
        std::thread::sleep(backoff);
        if host.is_saved() {
            return true;
        }
        if backoff >= cap {
            return false;
        }
        backoff = std::cmp::min(backoff.mul_f64(1.2), cap);
    }
}

/// Where a session's state machine currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Between cells; ready for a new `pre_cell`/`commit`/`checkout`.
    Idle,
    /// `pre_cell` has run; waiting for the host to execute the cell and call `post_cell`.
    PreCell,
}

/// Owns one notebook's commit graph, metadata, variable store, AHG, and live namespace, and
/// drives them through the pre/post-cell and commit/checkout operations.
pub struct SessionController {
    notebook_key: String,
    layout: PathLayout,
    config: Config,
    metadata: MetadataStore,
    variable_store: VariableStore,
    commit_graph: CommitGraph,
    ahg: Ahg,
    namespace: InMemoryNamespace,
    executor: Box<dyn CellExecutor + Send>,
    host: Box<dyn NotebookHost + Send>,
    state: SessionState,
    pending_start_time: Option<f64>,
    pending_code: Option<String>,
    executed_cells: Vec<String>,
    commit_counter: u64,
}

impl SessionController {
    /// Attaches to `notebook_key`'s store under `layout`, creating it fresh if absent, and
    /// re-primes the commit graph cursor from the persisted HEAD.
    pub fn install(layout: PathLayout, notebook_key: &str, config: Config) -> Result<Self> {
        layout.ensure_dirs()?;
        let metadata = MetadataStore::open(&layout.database_path())?;
        let variable_store = VariableStore::open(&layout.database_path())?;
        let mut commit_graph = CommitGraph::open(&layout.commit_graph_dir())?;

        let head = Head::read(&layout.head_path());
        if let Some(commit_id) = &head.commit_id {
            commit_graph.jump(commit_id)?;
        }

        Ok(Self {
            notebook_key: notebook_key.to_string(),
            layout,
            config,
            metadata,
            variable_store,
            commit_graph,
            ahg: Ahg::new(),
            namespace: InMemoryNamespace::new(),
            executor: Box::new(NoopExecutor),
            host: Box::new(NoopHost),
            state: SessionState::Idle,
            pending_start_time: None,
            pending_code: None,
            executed_cells: Vec::new(),
            commit_counter: 0,
        })
    }

    /// Installs a host-provided executor, used to satisfy `RerunCell` restore actions.
    pub fn set_executor(&mut self, executor: Box<dyn CellExecutor + Send>) {
        self.executor = executor;
    }

    /// Installs a host-provided notebook save hook, polled from `pre_cell`.
    pub fn set_host(&mut self, host: Box<dyn NotebookHost + Send>) {
        self.host = host;
    }

    /// The live namespace, for host read/write access outside the pre/post hooks.
    pub fn namespace_mut(&mut self) -> &mut InMemoryNamespace {
        &mut self.namespace
    }

    /// Current HEAD.
    pub fn head(&self) -> Head {
        Head::read(&self.layout.head_path())
    }

    /// Saves the notebook, diffs the pre-execution namespace, and moves to `PreCell`. The save
    /// happens before diffing so a cell's own stdout doesn't race the save command's output.
    pub fn pre_cell(&mut self, code: &str) -> Result<()> {
        self.maybe_save_notebook();
        self.ahg.pre_cell_update(&self.namespace);
        self.pending_start_time = Some(now_epoch_seconds());
        self.pending_code = Some(code.to_string());
        self.state = SessionState::PreCell;
        Ok(())
    }

    fn maybe_save_notebook(&mut self) {
        if !self.config.jupyterint.notebook_save_enabled {
            return;
        }
        let start = Duration::from_millis(self.config.jupyterint.notebook_save_backoff_start_ms);
        let cap = Duration::from_millis(self.config.jupyterint.notebook_save_backoff_cap_ms);
        if !poll_notebook_saved(self.host.as_mut(), start, cap) {
            tracing::warn!(notebook_key = %self.notebook_key, "notebook save is taking too long; kishu may not capture every cell");
        }
    }

    /// Diffs the namespace, runs the checkpoint pipeline, and records a cell-triggered commit.
    /// Errs with [`KishuError::PostWithoutPre`] if `pre_cell` wasn't called first.
    pub fn post_cell(
        &mut self,
        runtime_s: f64,
        execution_count: Option<i64>,
        result_repr: Option<String>,
        error_in_exec: Option<String>,
    ) -> Result<String> {
        if self.state != SessionState::PreCell {
            return Err(KishuError::PostWithoutPre);
        }
        let start_time = self.pending_start_time.take();
        let code = self.pending_code.take().unwrap_or_default();

        let changed = self
            .ahg
            .post_cell_update(&mut self.namespace, &FlatReferenceGraph, &code, runtime_s)?;
        self.executed_cells.push(code.clone());

        let mut entry = self.build_commit_entry(CommitEntryKind::CellTriggered, String::new());
        entry.start_time = start_time;
        entry.end_time = Some(now_epoch_seconds());
        entry.runtime_s = Some(runtime_s);
        entry.raw_cell = Some(code);
        entry.execution_count = execution_count;
        entry.result_repr = result_repr;
        entry.error_in_exec = error_in_exec;

        let commit_id = self.checkpoint(entry, &changed)?;
        self.state = SessionState::Idle;
        Ok(commit_id)
    }

    /// Manually records a commit of the current namespace state, outside any cell hook.
    pub fn commit(&mut self, message: Option<String>) -> Result<String> {
        self.maybe_save_notebook();
        let entry = self.build_commit_entry(CommitEntryKind::Manual, message.unwrap_or_default());
        self.checkpoint(entry, &ChangedVariables::default())
    }

    fn build_commit_entry(&self, kind: CommitEntryKind, message: String) -> CommitEntry {
        CommitEntry {
            kind,
            timestamp: now_epoch_seconds(),
            message,
            executed_cells: self.executed_cells.clone(),
            ..Default::default()
        }
    }

    fn checkpoint(&mut self, mut entry: CommitEntry, _changed: &ChangedVariables) -> Result<String> {
        self.commit_counter += 1;
        let commit_id = generate_commit_id(&self.config, &self.notebook_key, self.commit_counter);
        entry.commit_id = commit_id.clone();

        let active = self.ahg.get_active_variable_snapshots();
        let ancestors: Vec<String> = self
            .commit_graph
            .list_history(None)
            .into_iter()
            .map(|info| info.commit_id)
            .collect();

        let planner = Planner::new(self.config.planner.clone());
        let codec = JsonCodec;
        let plan = planner.plan_checkpoint(&active, &ancestors, &self.variable_store, &self.namespace, &codec)?;
        plan.run(&commit_id, &self.variable_store)?;
        for action in &plan.actions {
            self.metadata
                .record_variable_version(&commit_id, &action.versioned_name.names.join(","), action.versioned_name.version)?;
        }

        let fingerprint = self.ahg.serialize_active_vses()?;
        self.metadata.store_commit(&entry, &fingerprint)?;
        self.commit_graph.step(&commit_id)?;

        let head = self.head();
        Head::update(&self.layout.head_path(), head.branch_name.as_deref(), Some(&commit_id), false)?;
        if let Some(branch_name) = head.branch_name {
            self.metadata.upsert_branch(&branch_name, &commit_id)?;
        }

        self.executed_cells.clear();
        Ok(commit_id)
    }

    /// Resolves `reference` (a branch name, then an abbreviated commit id), restores the
    /// target's namespace, and moves HEAD. Attaches HEAD to the branch if `reference` named
    /// one, otherwise detaches it at the resolved commit.
    pub fn checkout(&mut self, reference: &str, skip_notebook: bool) -> Result<(String, Vec<FallbackedAction>)> {
        let (target_commit_id, attach_branch) = self.resolve_checkout_target(reference)?;

        let target_entry = self.metadata.get_commit(&target_commit_id)?;
        let target_fingerprint = self.metadata.get_session_state(&target_commit_id)?;
        let target_frontier = Ahg::deserialize_active_vses(&target_fingerprint)?;
        let current_frontier = self.ahg.get_active_variable_snapshots();
        let target_ancestry: Vec<String> = self
            .commit_graph
            .list_history(Some(&target_commit_id))
            .into_iter()
            .map(|info| info.commit_id)
            .collect();

        // A VS's identity carries no content hash, only a version counter, so a name that
        // reaches the same version independently on two diverged branches would look movable
        // under a plain current/target intersection. Restricting to names also live at the
        // lowest common ancestor rules that out.
        let lca_frontier = match self.head().commit_id {
            Some(current_commit_id) => {
                match self.commit_graph.get_common_ancestor(&current_commit_id, &target_commit_id) {
                    Some(lca_commit_id) => {
                        let lca_fingerprint = self.metadata.get_session_state(&lca_commit_id)?;
                        Ahg::deserialize_active_vses(&lca_fingerprint)?
                    }
                    None => Vec::new(),
                }
            }
            None => Vec::new(),
        };

        let planner = Planner::new(self.config.planner.clone());
        let plan = planner.plan_restore(
            &target_frontier,
            &current_frontier,
            &lca_frontier,
            &target_commit_id,
            &target_ancestry,
            self.ahg.cells(),
            &self.variable_store,
        )?;

        let codec = JsonCodec;
        let (restored, fallbacked) = plan.run(&self.namespace, &self.variable_store, &codec, self.executor.as_mut())?;

        let restored_keys: std::collections::HashSet<String> = restored.keys().into_iter().collect();
        for key in self.namespace.keys() {
            if !restored_keys.contains(&key) {
                self.namespace.delete(&key);
            }
        }
        for key in restored.keys() {
            if let Some(value) = restored.get(&key) {
                self.namespace.set(&key, value);
            }
        }
        self.ahg.reset_to_frontier(&target_frontier);

        self.commit_graph.jump(&target_commit_id)?;
        Head::update(
            &self.layout.head_path(),
            attach_branch.as_deref(),
            Some(&target_commit_id),
            attach_branch.is_none(),
        )?;

        if skip_notebook && self.config.jupyterint.auto_commit_on_skip_notebook {
            self.commit(Some(format!("checkout to {target_commit_id}")))?;
        }

        let _ = target_entry;
        Ok((target_commit_id, fallbacked))
    }

    fn resolve_checkout_target(&self, reference: &str) -> Result<(String, Option<String>)> {
        if let Some(branch) = self.metadata.get_branch(reference)? {
            return Ok((branch.commit_id, Some(reference.to_string())));
        }
        match self.metadata.resolve_commit_id(reference)? {
            Resolved::One(commit_id) => Ok((commit_id, None)),
            Resolved::Ambiguous(_) => Err(KishuError::AmbiguousCommit(reference.to_string())),
            Resolved::NotFound => Err(KishuError::CommitNotFound(reference.to_string())),
        }
    }
}
