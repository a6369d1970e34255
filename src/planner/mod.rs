//! Cost-based checkpoint/restore planning: decides what to persist on commit and how to
//! reconstruct a namespace on checkout.

pub mod plans;

use std::collections::HashSet;

use crate::ahg::{Ahg, CellExecution, VariableSnapshot};
use crate::config::PlannerConfig;
use crate::namespace::{Namespace, Value, ValueCodec};
use crate::variable_store::VariableStore;

pub use plans::{CellExecutor, CheckpointPlan, FallbackedAction, RestoreAction, RestorePlan, StoreVariable};

/// Builds checkpoint and restore plans from the AHG's frontier and cell history.
pub struct Planner {
    config: PlannerConfig,
}

impl Planner {
    /// Builds a planner tuned by `config`.
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Builds the ordered `StoreVariable` actions for `active` (the current frontier),
    /// skipping any VS already stored at one of `ancestor_commit_ids` when incremental
    /// storage is enabled. VSes containing an unserializable (`Value::Opaque`) or missing
    /// name are silently skipped — they become rerun candidates the next time they're needed.
    pub fn plan_checkpoint(
        &self,
        active: &[VariableSnapshot],
        ancestor_commit_ids: &[String],
        variable_store: &VariableStore,
        namespace: &dyn Namespace,
        codec: &dyn ValueCodec,
    ) -> crate::error::Result<CheckpointPlan> {
        let stored = if self.config.incremental_store {
            variable_store.get_stored_versioned_names(ancestor_commit_ids)?
        } else {
            HashSet::new()
        };

        let mut actions = Vec::new();
        for vs in active {
            if vs.deleted || stored.contains(&vs.versioned_name) {
                continue;
            }
            let mut values = Vec::with_capacity(vs.versioned_name.names.len());
            let mut serializable = true;
            for name in &vs.versioned_name.names {
                match namespace.get(name) {
                    Some(value) if !matches!(value, Value::Opaque) => values.push(value),
                    _ => {
                        serializable = false;
                        break;
                    }
                }
            }
            if !serializable {
                continue;
            }
            if let Ok(blob) = plans::encode_component(codec, values) {
                actions.push(StoreVariable {
                    versioned_name: vs.versioned_name.clone(),
                    blob,
                });
            }
        }
        Ok(CheckpointPlan { actions })
    }

    /// Builds a restore plan for reaching `target_frontier` (as of `target_commit_id`, whose
    /// ancestry nearest-first is `target_ancestry`) from `current_frontier`, using `cells` to
    /// find the writer of each VS for cost estimation and rerun fallback. `lca_frontier` is the
    /// frontier at `current`'s and `target`'s lowest common ancestor, empty if there is none.
    ///
    /// Choice rule per target VS, in order: already live via the LCA frontier → move; cheaper
    /// (or only) to load → load, falling back to the writing cell on failure; otherwise →
    /// rerun the writing cell directly. A VS can have been stored at any ancestor commit, not
    /// just `target_commit_id` itself (incremental storage only (re-)writes a VS at the
    /// commit that first introduces it), so each load is bound to the nearest ancestor that
    /// actually holds it via `variable_store`.
    pub fn plan_restore(
        &self,
        target_frontier: &[VariableSnapshot],
        current_frontier: &[VariableSnapshot],
        lca_frontier: &[VariableSnapshot],
        target_commit_id: &str,
        target_ancestry: &[String],
        cells: &[CellExecution],
        variable_store: &VariableStore,
    ) -> crate::error::Result<RestorePlan> {
        let movable = Ahg::get_common_ancestor_frontier(current_frontier, target_frontier, lca_frontier);
        let movable_set: HashSet<_> = movable.into_iter().collect();

        let mut actions = Vec::new();
        for (idx, vs) in target_frontier.iter().enumerate() {
            let cell_num = idx as u64 + 1;
            if movable_set.contains(&vs.versioned_name) {
                actions.push(RestoreAction::MoveVariable {
                    cell_num,
                    names: vs.versioned_name.names.clone(),
                });
                continue;
            }

            let writer = cells.iter().find(|ce| ce.writes.contains(&vs.versioned_name));
            let rerun_cost = writer.map(|ce| ce.runtime_s).unwrap_or(f64::INFINITY);
            let load_cost = vs
                .size
                .map(|bytes| bytes as f64 * self.config.deserialize_cost_per_byte)
                .unwrap_or(0.0);

            let fallback_cells: Vec<(u64, String)> = writer
                .map(|ce| vec![(ce.cell_num, ce.code.clone())])
                .unwrap_or_default();

            if load_cost <= rerun_cost || writer.is_none() {
                let storing_commit = variable_store
                    .find_storing_commit(target_ancestry, &vs.versioned_name)?
                    .unwrap_or_else(|| target_commit_id.to_string());
                actions.push(RestoreAction::LoadVariable {
                    cell_num,
                    commit_id: storing_commit,
                    versioned_name: vs.versioned_name.clone(),
                    fallback_cells,
                });
            } else if let Some(ce) = writer {
                actions.push(RestoreAction::RerunCell {
                    cell_num,
                    code: ce.code.clone(),
                });
            }
        }
        Ok(RestorePlan { actions })
    }
}
