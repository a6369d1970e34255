//! The Application History Graph: a bipartite DAG of variable snapshots (VSes) and cell
//! executions (CEs) that the planner walks to decide what to store and what to restore.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

use crate::error::{KishuError, Result};
use crate::namespace::{Namespace, ReferenceGraph, Value};

/// A variable name.
pub type Name = String;

/// `(names, version)`: the primary key of a variable snapshot, and of its storage row in the
/// variable store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionedName {
    /// The co-linked variable names this snapshot covers, sorted and deduplicated.
    pub names: Vec<Name>,
    /// The write generation of this component.
    pub version: u64,
}

impl VersionedName {
    /// Builds a versioned name from an arbitrary iterator of names, normalizing order.
    pub fn new(names: impl IntoIterator<Item = Name>, version: u64) -> Self {
        let mut names: Vec<Name> = names.into_iter().collect();
        names.sort();
        names.dedup();
        Self { names, version }
    }

    /// A stable hash of `names`, used as the `names_hash` key column in the variable store.
    pub fn names_hash(&self) -> u64 {
        xxh64(self.names.join("\u{0}").as_bytes(), 0)
    }
}

/// One snapshot of a connected component of variables, as of one write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSnapshot {
    /// This snapshot's identity.
    pub versioned_name: VersionedName,
    /// Encoded size in bytes, once known (filled in after a successful checkpoint write).
    pub size: Option<u64>,
    /// Whether every name in this snapshot has since been deleted from the namespace.
    pub deleted: bool,
}

impl VariableSnapshot {
    fn new(versioned_name: VersionedName) -> Self {
        Self {
            versioned_name,
            size: None,
            deleted: false,
        }
    }
}

/// One cell's contribution to the graph: what it read and what it wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellExecution {
    /// 1-based execution order.
    pub cell_num: u64,
    /// The cell's source.
    pub code: String,
    /// Wall-clock execution time.
    pub runtime_s: f64,
    /// VSes whose names this cell's code accessed.
    pub reads: Vec<VersionedName>,
    /// VSes this cell produced.
    pub writes: Vec<VersionedName>,
}

/// The result of diffing the namespace across one cell's execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedVariables {
    /// Names bound for the first time.
    pub added: Vec<Name>,
    /// Names whose value changed.
    pub modified: Vec<Name>,
    /// Names that were bound before and are gone now.
    pub deleted: Vec<Name>,
}

fn value_fingerprint(value: &Value) -> u64 {
    // Opaque values never compare equal across pre/post snapshots, so any cell touching one
    // is conservatively treated as having modified it.
    if matches!(value, Value::Opaque) {
        return xxh64(format!("{value:?}{:p}", value).as_bytes(), 0);
    }
    let encoded = serde_json::to_vec(value).unwrap_or_default();
    xxh64(&encoded, 0)
}

/// The bipartite graph of VSes and CEs for one session.
#[derive(Debug, Default)]
pub struct Ahg {
    vses: Vec<VariableSnapshot>,
    /// name -> index into `vses` of the VS currently holding it.
    active: FxHashMap<Name, usize>,
    cells: Vec<CellExecution>,
    pre_fingerprint: Option<FxHashMap<Name, u64>>,
}

impl Ahg {
    /// Builds an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the pre-execution fingerprint: every live name and a content hash of its
    /// current value. Must be called before [`Ahg::post_cell_update`].
    pub fn pre_cell_update(&mut self, namespace: &dyn Namespace) {
        let mut fingerprint = FxHashMap::default();
        for name in namespace.keys() {
            if let Some(value) = namespace.get(&name) {
                fingerprint.insert(name, value_fingerprint(&value));
            }
        }
        self.pre_fingerprint = Some(fingerprint);
    }

    /// Diffs the namespace against the last `pre_cell_update` fingerprint, folds the result
    /// into the graph as new/updated VSes, and records a new [`CellExecution`].
    pub fn post_cell_update(
        &mut self,
        namespace: &mut dyn Namespace,
        reference_graph: &dyn ReferenceGraph,
        code: &str,
        runtime_s: f64,
    ) -> Result<ChangedVariables> {
        let pre = self.pre_fingerprint.take().ok_or(KishuError::PostWithoutPre)?;
        let accessed = namespace.drain_access_trace();

        let post_names: FxHashSet<Name> = namespace.keys().into_iter().collect();
        let pre_names: FxHashSet<Name> = pre.keys().cloned().collect();

        let added: Vec<Name> = post_names.difference(&pre_names).cloned().collect();
        let deleted: Vec<Name> = pre_names.difference(&post_names).cloned().collect();
        let modified: Vec<Name> = post_names
            .intersection(&pre_names)
            .filter(|name| {
                let current = namespace.get(name).map(|v| value_fingerprint(&v));
                current != pre.get(*name).copied()
            })
            .cloned()
            .collect();

        for name in &deleted {
            self.retire_name(name);
        }

        let mut touched: FxHashSet<Name> = added.iter().chain(modified.iter()).cloned().collect();
        for name in touched.clone() {
            if let Some(&idx) = self.active.get(&name) {
                for sibling in self.vses[idx].versioned_name.names.clone() {
                    touched.insert(sibling);
                }
            }
        }
        let mut candidates: Vec<Name> = touched.into_iter().collect();
        candidates.sort();

        let mut writes = Vec::new();
        if !candidates.is_empty() {
            for component in reference_graph.components(namespace, &candidates) {
                let next_version = component
                    .iter()
                    .filter_map(|name| self.active.get(name))
                    .map(|&idx| self.vses[idx].versioned_name.version)
                    .max()
                    .map(|v| v + 1)
                    .unwrap_or(1);
                for name in &component {
                    self.retire_name(name);
                }
                let versioned_name = VersionedName::new(component, next_version);
                let idx = self.vses.len();
                self.vses.push(VariableSnapshot::new(versioned_name.clone()));
                for name in &self.vses[idx].versioned_name.names.clone() {
                    self.active.insert(name.clone(), idx);
                }
                writes.push(versioned_name);
            }
        }

        let reads: Vec<VersionedName> = {
            let mut seen = FxHashSet::default();
            let mut reads = Vec::new();
            for name in &accessed {
                if let Some(&idx) = self.active.get(name) {
                    if seen.insert(idx) {
                        reads.push(self.vses[idx].versioned_name.clone());
                    }
                }
            }
            reads
        };

        self.cells.push(CellExecution {
            cell_num: self.cells.len() as u64 + 1,
            code: code.to_string(),
            runtime_s,
            reads,
            writes,
        });

        Ok(ChangedVariables {
            added,
            modified,
            deleted,
        })
    }

    fn retire_name(&mut self, name: &str) {
        if let Some(idx) = self.active.remove(name) {
            if !self.vses[idx].versioned_name.names.iter().any(|n| self.active.contains_key(n)) {
                self.vses[idx].deleted = true;
            }
        }
    }

    /// The current frontier: one VS per live connected component.
    pub fn get_active_variable_snapshots(&self) -> Vec<VariableSnapshot> {
        let mut seen = FxHashSet::default();
        let mut frontier = Vec::new();
        for &idx in self.active.values() {
            if seen.insert(idx) {
                frontier.push(self.vses[idx].clone());
            }
        }
        frontier.sort_by(|a, b| a.versioned_name.names.cmp(&b.versioned_name.names));
        frontier
    }

    /// All cell executions recorded so far, oldest first.
    pub fn cells(&self) -> &[CellExecution] {
        &self.cells
    }

    /// Compacts the active frontier into the bytes stored as a commit's session-state
    /// fingerprint.
    pub fn serialize_active_vses(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.get_active_variable_snapshots())?)
    }

    /// Reconstructs a frontier previously produced by [`Ahg::serialize_active_vses`].
    pub fn deserialize_active_vses(bytes: &[u8]) -> Result<Vec<VariableSnapshot>> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The VersionedNames common to `current`'s, `target`'s, **and** `lca`'s frontiers — the
    /// set a checkout can satisfy via `MoveVariable` instead of reloading from storage.
    ///
    /// A plain two-way `current`∩`target` intersection is not enough: two diverged branches can
    /// independently reach the same `(names, version)` pair from a common ancestor (e.g. both
    /// write `x` four times from the same starting point, but with different values), and a VS's
    /// identity carries no content hash, only a version counter. Requiring membership in `lca`'s
    /// frontier too rules this out — a version only present on one side's path since the
    /// ancestor can't also be in the ancestor's own frontier.
    pub fn get_common_ancestor_frontier(
        current: &[VariableSnapshot],
        target: &[VariableSnapshot],
        lca: &[VariableSnapshot],
    ) -> Vec<VersionedName> {
        let current_set: FxHashSet<&VersionedName> =
            current.iter().map(|vs| &vs.versioned_name).collect();
        let lca_set: FxHashSet<&VersionedName> = lca.iter().map(|vs| &vs.versioned_name).collect();
        target
            .iter()
            .map(|vs| &vs.versioned_name)
            .filter(|vn| current_set.contains(vn) && lca_set.contains(vn))
            .cloned()
            .collect()
    }

    /// Replaces the live frontier bookkeeping (`vses`/`active`) with `frontier`, e.g. after a
    /// checkout has swapped the namespace out from under the graph. Subsequent `post_cell_update`
    /// calls then compute next versions off the restored state rather than whatever was active
    /// before the checkout. Past `cells()` history is left untouched.
    pub fn reset_to_frontier(&mut self, frontier: &[VariableSnapshot]) {
        self.vses.clear();
        self.active.clear();
        for vs in frontier {
            let idx = self.vses.len();
            self.vses.push(vs.clone());
            if !vs.deleted {
                for name in &vs.versioned_name.names {
                    self.active.insert(name.clone(), idx);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::{FlatReferenceGraph, InMemoryNamespace};

    #[test]
    fn single_write_creates_one_active_vs() {
        let mut ahg = Ahg::new();
        let mut ns = InMemoryNamespace::new();

        ahg.pre_cell_update(&ns);
        ns.set("x", Value::Int(1));
        let changed = ahg
            .post_cell_update(&mut ns, &FlatReferenceGraph, "x = 1", 0.01)
            .unwrap();
        assert_eq!(changed.added, vec!["x".to_string()]);

        let frontier = ahg.get_active_variable_snapshots();
        assert_eq!(frontier.len(), 1);
        assert_eq!(frontier[0].versioned_name.names, vec!["x".to_string()]);
        assert_eq!(frontier[0].versioned_name.version, 1);
    }

    #[test]
    fn rewrite_bumps_version_and_supersedes_old_vs() {
        let mut ahg = Ahg::new();
        let mut ns = InMemoryNamespace::new();

        ahg.pre_cell_update(&ns);
        ns.set("x", Value::Int(1));
        ahg.post_cell_update(&mut ns, &FlatReferenceGraph, "x = 1", 0.0).unwrap();

        ahg.pre_cell_update(&ns);
        ns.set("x", Value::Int(2));
        let changed = ahg
            .post_cell_update(&mut ns, &FlatReferenceGraph, "x = 2", 0.0)
            .unwrap();
        assert_eq!(changed.modified, vec!["x".to_string()]);

        let frontier = ahg.get_active_variable_snapshots();
        assert_eq!(frontier.len(), 1);
        assert_eq!(frontier[0].versioned_name.version, 2);
    }

    #[test]
    fn ref_linked_names_share_one_vs() {
        let mut ahg = Ahg::new();
        let mut ns = InMemoryNamespace::new();

        ahg.pre_cell_update(&ns);
        ns.set("a", Value::Int(1));
        ns.set("b", Value::Ref("a".into()));
        ahg.post_cell_update(&mut ns, &FlatReferenceGraph, "b = a", 0.0).unwrap();

        let frontier = ahg.get_active_variable_snapshots();
        assert_eq!(frontier.len(), 1);
        assert_eq!(
            frontier[0].versioned_name.names,
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn delete_retires_the_vs_when_all_members_gone() {
        let mut ahg = Ahg::new();
        let mut ns = InMemoryNamespace::new();

        ahg.pre_cell_update(&ns);
        ns.set("x", Value::Int(1));
        ahg.post_cell_update(&mut ns, &FlatReferenceGraph, "x = 1", 0.0).unwrap();

        ahg.pre_cell_update(&ns);
        ns.delete("x");
        let changed = ahg
            .post_cell_update(&mut ns, &FlatReferenceGraph, "del x", 0.0)
            .unwrap();
        assert_eq!(changed.deleted, vec!["x".to_string()]);
        assert!(ahg.get_active_variable_snapshots().is_empty());
    }

    #[test]
    fn common_ancestor_frontier_requires_membership_in_all_three() {
        let v1 = VariableSnapshot::new(VersionedName::new(["x".to_string()], 1));
        let v2 = VariableSnapshot::new(VersionedName::new(["x".to_string()], 2));
        let y = VariableSnapshot::new(VersionedName::new(["y".to_string()], 1));

        // x@1 is live on current and target but was already superseded by the time of the
        // LCA, so it isn't movable; y@1 is unchanged across all three and is.
        let movable = Ahg::get_common_ancestor_frontier(
            &[v1.clone(), y.clone()],
            &[v1, y.clone()],
            &[v2, y],
        );
        assert_eq!(movable, vec![VersionedName::new(["y".to_string()], 1)]);
    }

    #[test]
    fn reset_to_frontier_makes_the_next_write_version_off_the_restored_state() {
        let mut ahg = Ahg::new();
        let mut ns = InMemoryNamespace::new();

        ahg.pre_cell_update(&ns);
        ns.set("x", Value::Int(1));
        ahg.post_cell_update(&mut ns, &FlatReferenceGraph, "x = 1", 0.0).unwrap();

        ahg.pre_cell_update(&ns);
        ns.set("x", Value::Int(2));
        ahg.post_cell_update(&mut ns, &FlatReferenceGraph, "x = 2", 0.0).unwrap();

        // Simulate a checkout back to the state right after the first write.
        let restored_frontier = vec![VariableSnapshot::new(VersionedName::new(["x".to_string()], 1))];
        ahg.reset_to_frontier(&restored_frontier);
        assert_eq!(ahg.get_active_variable_snapshots(), restored_frontier);

        ahg.pre_cell_update(&ns);
        ns.set("x", Value::Int(3));
        ahg.post_cell_update(&mut ns, &FlatReferenceGraph, "x = 3", 0.0).unwrap();

        // Without the reset, this would collide with version 3 left over from before the
        // checkout instead of continuing from the restored version 1.
        let frontier = ahg.get_active_variable_snapshots();
        assert_eq!(frontier.len(), 1);
        assert_eq!(frontier[0].versioned_name.version, 2);
    }

    #[test]
    fn post_without_pre_errors() {
        let mut ahg = Ahg::new();
        let mut ns = InMemoryNamespace::new();
        let err = ahg
            .post_cell_update(&mut ns, &FlatReferenceGraph, "x = 1", 0.0)
            .unwrap_err();
        assert!(matches!(err, KishuError::PostWithoutPre));
    }
}
