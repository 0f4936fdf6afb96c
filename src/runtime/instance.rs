use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::EngineError;
use crate::runtime::token::{TokenId, TokenTree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionState {
    Active,
    Completed,
    Terminated,
    Suspended,
}

/// Link from a sub-process-as-instance back to the token in the parent
/// instance that is waiting on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuperLink {
    pub instance_id: Uuid,
    pub token: TokenId,
}

/// Aggregate root owning the full token tree for one run of a process
/// definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInstance {
    id: Uuid,
    definition_id: String,
    state: ExecutionState,
    last_state_time: SystemTime,
    tree: TokenTree,
    variables: HashMap<String, Value>,
    super_link: Option<SuperLink>,
    /// Optimistic-concurrency revision, bumped by the store on save.
    pub revision: u64,
}

impl ProcessInstance {
    pub fn new(
        definition_id: &str,
        variables: HashMap<String, Value>,
        super_link: Option<SuperLink>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            definition_id: definition_id.to_string(),
            state: ExecutionState::Active,
            last_state_time: SystemTime::now(),
            tree: TokenTree::new(),
            variables,
            super_link,
            revision: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn definition_id(&self) -> &str {
        &self.definition_id
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn last_state_time(&self) -> SystemTime {
        self.last_state_time
    }

    pub fn root(&self) -> TokenId {
        self.tree.root()
    }

    pub fn tree(&self) -> &TokenTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut TokenTree {
        &mut self.tree
    }

    /// Process-instance-level variables: the final fallback of variable
    /// resolution.
    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.variables
    }

    pub fn set_process_variable(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn super_link(&self) -> Option<&SuperLink> {
        self.super_link.as_ref()
    }

    /// Takes the super link exactly once, for resumption after completion.
    pub fn take_super_link(&mut self) -> Option<SuperLink> {
        self.super_link.take()
    }

    /// Resolves a variable from the token chain: the token's own map first,
    /// then ancestors, exclusive of the root token, and finally the
    /// instance-level map.
    pub fn resolve_variable(&self, token: TokenId, name: &str) -> Option<Value> {
        let mut current = Some(token);
        while let Some(id) = current {
            let t = self.tree.token(id).ok()?;
            if t.parent.is_none() {
                break;
            }
            if let Some(value) = t.variables.get(name) {
                return Some(value.clone());
            }
            current = t.parent;
        }
        self.variables.get(name).cloned()
    }

    /// Flattened variable view for expression evaluation: instance-level
    /// variables shadowed by the token chain, nearest token winning.
    pub fn variable_snapshot(&self, token: TokenId) -> HashMap<String, Value> {
        let mut snapshot = self.variables.clone();
        let mut chain = Vec::new();
        let mut current = Some(token);
        while let Some(id) = current {
            let Ok(t) = self.tree.token(id) else { break };
            if t.parent.is_none() {
                break;
            }
            chain.push(id);
            current = t.parent;
        }
        // Outermost first, so nearer tokens overwrite.
        for id in chain.into_iter().rev() {
            if let Ok(t) = self.tree.token(id) {
                for (k, v) in &t.variables {
                    snapshot.insert(k.clone(), v.clone());
                }
            }
        }
        snapshot
    }

    pub fn set_variable_local(
        &mut self,
        token: TokenId,
        name: &str,
        value: Value,
    ) -> Result<(), EngineError> {
        self.tree
            .token_mut(token)?
            .variables
            .insert(name.to_string(), value);
        Ok(())
    }

    pub fn variable_local(&self, token: TokenId, name: &str) -> Option<Value> {
        self.tree
            .token(token)
            .ok()
            .and_then(|t| t.variables.get(name).cloned())
    }

    /// Transitions to Completed. Monotonic: once completed (or terminated)
    /// the state never reverts.
    pub fn complete(&mut self) {
        if self.state == ExecutionState::Active {
            self.state = ExecutionState::Completed;
            self.last_state_time = SystemTime::now();
        }
    }

    /// Kills every live token and marks the instance Terminated.
    pub fn terminate(&mut self) {
        if self.state == ExecutionState::Active {
            self.tree.clear();
            self.state = ExecutionState::Terminated;
            self.last_state_time = SystemTime::now();
        }
    }

    pub fn suspend(&mut self) {
        if self.state == ExecutionState::Active {
            self.state = ExecutionState::Suspended;
            self.last_state_time = SystemTime::now();
        }
    }

    pub fn resume(&mut self) {
        if self.state == ExecutionState::Suspended {
            self.state = ExecutionState::Active;
            self.last_state_time = SystemTime::now();
        }
    }
}
