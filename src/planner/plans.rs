//! Concrete checkpoint/restore actions and their execution.

use serde::{Deserialize, Serialize};

use crate::ahg::VersionedName;
use crate::error::{KishuError, Result};
use crate::namespace::{InMemoryNamespace, Namespace, Value, ValueCodec};
use crate::variable_store::VariableStore;

/// Executes a cell's code against a namespace. Abstracts the host's real evaluator so the
/// planner's rerun path can be driven by a test double.
pub trait CellExecutor {
    /// Runs `code` with `namespace` as its live bindings, writing results back into it.
    fn execute(&mut self, code: &str, namespace: &mut dyn Namespace) -> Result<()>;
}

/// One `StoreVariable` step of a [`CheckpointPlan`].
#[derive(Debug, Clone)]
pub struct StoreVariable {
    /// The snapshot being persisted.
    pub versioned_name: VersionedName,
    /// Its encoded bytes.
    pub blob: Vec<u8>,
}

/// An ordered sequence of `StoreVariable` actions covering the delta since the nearest
/// ancestor that already has each VS.
#[derive(Debug, Clone, Default)]
pub struct CheckpointPlan {
    /// The actions, in write order.
    pub actions: Vec<StoreVariable>,
}

impl CheckpointPlan {
    /// Executes every action against `store`, tagging each row with `commit_id`. Unlike
    /// restore, a failed encode here has already happened by the time an action exists
    /// (the planner only emits a `StoreVariable` for values it could encode), so this simply
    /// persists.
    pub fn run(&self, commit_id: &str, store: &VariableStore) -> Result<()> {
        for action in &self.actions {
            store.put(commit_id, &action.versioned_name, &action.blob)?;
        }
        Ok(())
    }
}

/// One step of a [`RestorePlan`].
#[derive(Debug, Clone)]
pub enum RestoreAction {
    /// Deserialize one stored blob under `names`. Falls back to rerunning `fallback_cells` if
    /// the blob is missing or fails to decode.
    LoadVariable {
        /// The cell number this load logically attaches to, for ordering/diagnostics.
        cell_num: u64,
        /// Commit the blob was stored at.
        commit_id: String,
        /// Identity of the stored snapshot.
        versioned_name: VersionedName,
        /// Cells to rerun, in order, if the load fails.
        fallback_cells: Vec<(u64, String)>,
    },
    /// Batched version of `LoadVariable` spanning several commits' snapshots at once.
    IncrementalLoad {
        /// The cell number this load logically attaches to.
        cell_num: u64,
        /// `(commit_id, versioned_name)` pairs to load, in order.
        loads: Vec<(String, VersionedName)>,
        /// Cells to rerun, in order, if any load in the batch fails.
        fallback_cells: Vec<(u64, String)>,
    },
    /// Copy `names` straight out of the live namespace instead of reloading them.
    MoveVariable {
        /// The cell number this move logically attaches to.
        cell_num: u64,
        /// Names to copy over unchanged.
        names: Vec<String>,
    },
    /// Re-execute `code` to reproduce values that were never (or could not be) serialized.
    RerunCell {
        /// The cell number being rerun.
        cell_num: u64,
        /// Its source.
        code: String,
    },
}

/// A restore action that fell back to rerunning code, recorded for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackedAction {
    /// The cell number of the action that fell back.
    pub cell_num: u64,
    /// Why the primary action failed.
    pub reason: String,
}

/// An ordered sequence of restore actions that reconstructs a namespace from commit history.
#[derive(Debug, Clone, Default)]
pub struct RestorePlan {
    /// The actions, in execution order.
    pub actions: Vec<RestoreAction>,
}

impl RestorePlan {
    /// Executes every action, reading blobs from `store` (decoded with `codec`) and moving
    /// values out of `current_namespace` where asked, falling back to `executor` for reruns.
    /// Returns the assembled namespace and the list of actions that fell back.
    pub fn run(
        &self,
        current_namespace: &dyn Namespace,
        store: &VariableStore,
        codec: &dyn ValueCodec,
        executor: &mut dyn CellExecutor,
    ) -> Result<(InMemoryNamespace, Vec<FallbackedAction>)> {
        let mut result = InMemoryNamespace::new();
        let mut fallbacked = Vec::new();

        if self.actions.is_empty() {
            return Err(KishuError::Planning(
                "restore plan has no actions and target commit has no stored snapshots".into(),
            ));
        }

        for action in &self.actions {
            match action {
                RestoreAction::MoveVariable { names, .. } => {
                    for name in names {
                        if let Some(value) = current_namespace.get(name) {
                            result.set(name, value);
                        }
                    }
                }
                RestoreAction::RerunCell { code, .. } => {
                    executor.execute(code, &mut result)?;
                }
                RestoreAction::LoadVariable {
                    cell_num,
                    commit_id,
                    versioned_name,
                    fallback_cells,
                } => {
                    match load_one(store, codec, commit_id, versioned_name) {
                        Ok(values) => bind_values(&mut result, versioned_name, values),
                        Err(reason) => {
                            run_fallback(executor, &mut result, fallback_cells)?;
                            fallbacked.push(FallbackedAction {
                                cell_num: *cell_num,
                                reason,
                            });
                        }
                    }
                }
                RestoreAction::IncrementalLoad {
                    cell_num,
                    loads,
                    fallback_cells,
                } => {
                    let mut failure = None;
                    for (commit_id, versioned_name) in loads {
                        match load_one(store, codec, commit_id, versioned_name) {
                            Ok(values) => bind_values(&mut result, versioned_name, values),
                            Err(reason) => {
                                failure = Some(reason);
                                break;
                            }
                        }
                    }
                    if let Some(reason) = failure {
                        run_fallback(executor, &mut result, fallback_cells)?;
                        fallbacked.push(FallbackedAction {
                            cell_num: *cell_num,
                            reason,
                        });
                    }
                }
            }
        }

        Ok((result, fallbacked))
    }
}

/// Encodes a component's values (one per name, in `versioned_name.names` order) as a single
/// blob: a `Value::List` run through `codec`. Keeping the wire shape uniform regardless of
/// component size means `load_one` never needs to special-case a lone variable.
pub fn encode_component(codec: &dyn ValueCodec, values: Vec<Value>) -> Result<Vec<u8>> {
    codec.encode(&Value::List(values))
}

fn load_one(
    store: &VariableStore,
    codec: &dyn ValueCodec,
    commit_id: &str,
    versioned_name: &VersionedName,
) -> std::result::Result<Vec<Value>, String> {
    let blob = store
        .get_variable_snapshot(commit_id, versioned_name)
        .map_err(|e| e.to_string())?;
    match codec.decode(&blob).map_err(|e| e.to_string())? {
        Value::List(values) => Ok(values),
        other => Ok(vec![other]),
    }
}

fn bind_values(result: &mut InMemoryNamespace, versioned_name: &VersionedName, values: Vec<Value>) {
    for (name, value) in versioned_name.names.iter().zip(values) {
        result.set(name, value);
    }
}

fn run_fallback(
    executor: &mut dyn CellExecutor,
    result: &mut InMemoryNamespace,
    fallback_cells: &[(u64, String)],
) -> Result<()> {
    for (_, code) in fallback_cells {
        executor.execute(code, result)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::JsonCodec;

    struct NoopExecutor;
    impl CellExecutor for NoopExecutor {
        fn execute(&mut self, _code: &str, _namespace: &mut dyn Namespace) -> Result<()> {
            Ok(())
        }
    }

    struct RerunTracker(Vec<String>);
    impl CellExecutor for RerunTracker {
        fn execute(&mut self, code: &str, namespace: &mut dyn Namespace) -> Result<()> {
            self.0.push(code.to_string());
            namespace.set("x", Value::Int(99));
            Ok(())
        }
    }

    #[test]
    fn move_variable_copies_from_current_namespace() {
        let store = VariableStore::open_in_memory().unwrap();
        let mut current = InMemoryNamespace::new();
        current.set("x", Value::Int(1));

        let plan = RestorePlan {
            actions: vec![RestoreAction::MoveVariable {
                cell_num: 1,
                names: vec!["x".to_string()],
            }],
        };
        let (result, fallbacked) = plan
            .run(&current, &store, &JsonCodec, &mut NoopExecutor)
            .unwrap();
        assert_eq!(result.get("x"), Some(Value::Int(1)));
        assert!(fallbacked.is_empty());
    }

    #[test]
    fn load_variable_falls_back_to_rerun_on_missing_blob() {
        let store = VariableStore::open_in_memory().unwrap();
        let current = InMemoryNamespace::new();
        let plan = RestorePlan {
            actions: vec![RestoreAction::LoadVariable {
                cell_num: 2,
                commit_id: "c1".to_string(),
                versioned_name: VersionedName::new(["x".to_string()], 1),
                fallback_cells: vec![(1, "x = 99".to_string())],
            }],
        };
        let mut executor = RerunTracker(Vec::new());
        let (result, fallbacked) = plan
            .run(&current, &store, &JsonCodec, &mut executor)
            .unwrap();
        assert_eq!(result.get("x"), Some(Value::Int(99)));
        assert_eq!(fallbacked.len(), 1);
        assert_eq!(executor.0, vec!["x = 99".to_string()]);
    }

    #[test]
    fn load_variable_succeeds_when_blob_present() {
        let store = VariableStore::open_in_memory().unwrap();
        let vn = VersionedName::new(["x".to_string()], 1);
        store.put("c1", &vn, &JsonCodec.encode(&Value::Int(7)).unwrap()).unwrap();

        let current = InMemoryNamespace::new();
        let plan = RestorePlan {
            actions: vec![RestoreAction::LoadVariable {
                cell_num: 1,
                commit_id: "c1".to_string(),
                versioned_name: vn,
                fallback_cells: vec![],
            }],
        };
        let (result, fallbacked) = plan
            .run(&current, &store, &JsonCodec, &mut NoopExecutor)
            .unwrap();
        assert_eq!(result.get("x"), Some(Value::Int(7)));
        assert!(fallbacked.is_empty());
    }

    #[test]
    fn empty_plan_is_commit_id_not_exist() {
        let store = VariableStore::open_in_memory().unwrap();
        let current = InMemoryNamespace::new();
        let plan = RestorePlan::default();
        let err = plan.run(&current, &store, &JsonCodec, &mut NoopExecutor).unwrap_err();
        assert!(matches!(err, KishuError::Planning(_)));
    }
}
