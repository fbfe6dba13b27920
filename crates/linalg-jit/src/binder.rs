use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::statement::StorageId;

/// How kernel arguments are deduplicated across the leaves of a statement set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingPolicy {
    /// Every leaf gets its own arguments, even when leaves alias.
    Independent,
    /// Leaves backed by the same storage share one set of arguments.
    Shared,
}

/// Assigns symbolic names to storage for exactly one generation or
/// argument-binding call.
#[derive(Debug)]
pub struct SymbolicBinder {
    policy: BindingPolicy,
    memory: HashMap<StorageId, String>,
    current_id: usize,
}

impl SymbolicBinder {
    pub fn new(policy: BindingPolicy) -> Self {
        Self {
            policy,
            memory: HashMap::new(),
            current_id: 0,
        }
    }

    pub fn policy(&self) -> BindingPolicy {
        self.policy
    }

    /// Returns `true` when arguments for `handle` still have to be emitted.
    pub fn bind(&mut self, handle: &StorageId) -> bool {
        match self.policy {
            BindingPolicy::Independent => true,
            BindingPolicy::Shared => {
                if self.memory.contains_key(handle) {
                    return false;
                }
                let name = self.next_name();
                self.memory.insert(*handle, name);
                true
            }
        }
    }

    /// Symbolic name for `handle`. Storage-less leaves always get a fresh name.
    pub fn get(&mut self, handle: Option<&StorageId>) -> String {
        match (self.policy, handle) {
            (BindingPolicy::Shared, Some(handle)) => {
                if let Some(name) = self.memory.get(handle) {
                    return name.clone();
                }
                let name = self.next_name();
                self.memory.insert(*handle, name.clone());
                name
            }
            _ => self.next_name(),
        }
    }

    fn next_name(&mut self) -> String {
        let name = format!("obj{}", self.current_id);
        self.current_id += 1;
        name
    }
}
