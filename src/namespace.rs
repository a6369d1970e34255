//! The host namespace: the live variable mapping the session controller observes and
//! rewrites around each cell, abstracted behind a trait so the planner and AHG never touch a
//! concrete interpreter binding.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{KishuError, Result};

/// A value held in the namespace. `Ref` lets a reference-graph walk discover that two names
/// share state without needing real object identity; `Opaque` never encodes, standing in for
/// values a real interpreter can't pickle (open file handles, generators, lambdas).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// The Python/R-style `None`/`null`.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Points at another name in the same namespace that this value aliases or contains.
    Ref(String),
    /// Deliberately unserializable; forces the planner onto the rerun path.
    Opaque,
}

/// Encodes/decodes [`Value`]s to and from the bytes stored in the [`crate::variable_store`].
pub trait ValueCodec {
    /// Serializes `value`. Errs for values that can never round-trip (e.g. `Value::Opaque`).
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;
    /// Deserializes bytes previously produced by [`ValueCodec::encode`].
    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

/// The default codec: plain `serde_json`, matching the ambient stack's serialization choice
/// everywhere else in this crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        if matches!(value, Value::Opaque) {
            return Err(KishuError::Planning("value is opaque and cannot be serialized".into()));
        }
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// The live mapping a session observes: variable names to values, plus a record of which
/// names were read since the trace was last drained.
pub trait Namespace {
    /// Reads a value by name.
    fn get(&self, name: &str) -> Option<Value>;
    /// Writes (or overwrites) a value.
    fn set(&mut self, name: &str, value: Value);
    /// Removes a name, returning its prior value if present.
    fn delete(&mut self, name: &str) -> Option<Value>;
    /// Every name currently bound.
    fn keys(&self) -> Vec<String>;
    /// Returns every name read via [`Namespace::get`] since the last drain, and clears the
    /// trace.
    fn drain_access_trace(&mut self) -> HashSet<String>;
}

/// A plain in-memory namespace, the reference implementation used by tests and by
/// [`crate::planner::plans::RestorePlan::run`]'s result namespace.
#[derive(Debug, Default)]
pub struct InMemoryNamespace {
    values: HashMap<String, Value>,
    trace: RefCell<HashSet<String>>,
}

impl InMemoryNamespace {
    /// Builds an empty namespace.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Namespace for InMemoryNamespace {
    fn get(&self, name: &str) -> Option<Value> {
        let value = self.values.get(name).cloned();
        if value.is_some() {
            self.trace.borrow_mut().insert(name.to_string());
        }
        value
    }

    fn set(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    fn delete(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    fn drain_access_trace(&mut self) -> HashSet<String> {
        std::mem::take(&mut *self.trace.borrow_mut())
    }
}

/// Groups a set of candidate names into connected components: names that must be serialized
/// (and versioned) together because they reference or are referenced by one another.
pub trait ReferenceGraph {
    /// Partitions `names` into components, using `namespace` to resolve `Value::Ref` edges.
    fn components(&self, namespace: &dyn Namespace, names: &[String]) -> Vec<Vec<String>>;
}

/// Default reference graph: a name shares a component with another name in the candidate set
/// only if one directly `Value::Ref`s the other. This is a conservative approximation of a
/// real object graph walk (no transitive container inspection), adequate for the common case
/// of aliases and simple containers while staying cheap.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatReferenceGraph;

impl ReferenceGraph for FlatReferenceGraph {
    fn components(&self, namespace: &dyn Namespace, names: &[String]) -> Vec<Vec<String>> {
        let candidates: HashSet<&str> = names.iter().map(String::as_str).collect();
        let mut parent: HashMap<String, String> = names.iter().map(|n| (n.clone(), n.clone())).collect();

        fn find(parent: &mut HashMap<String, String>, name: &str) -> String {
            let next = parent.get(name).cloned().unwrap_or_else(|| name.to_string());
            if next == name {
                name.to_string()
            } else {
                let root = find(parent, &next);
                parent.insert(name.to_string(), root.clone());
                root
            }
        }

        for name in names {
            if let Some(Value::Ref(target)) = namespace.get(name) {
                if candidates.contains(target.as_str()) {
                    let a = find(&mut parent, name);
                    let b = find(&mut parent, &target);
                    if a != b {
                        parent.insert(a, b);
                    }
                }
            }
        }

        let mut groups: HashMap<String, Vec<String>> = HashMap::new();
        for name in names {
            let root = find(&mut parent, name);
            groups.entry(root).or_default().push(name.clone());
        }
        let mut components: Vec<Vec<String>> = groups.into_values().collect();
        for component in &mut components {
            component.sort();
        }
        components.sort();
        components
    }
}
