use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::EngineError;
use crate::graph::ProcessDefinition;
use crate::runtime::engine::Services;
use crate::runtime::history::ActivityEvent;
use crate::runtime::instance::ProcessInstance;
use crate::runtime::token::TokenId;

/// The engine's working unit: wraps exactly one token and drives it through
/// node-enter, node-leave and end transitions.
///
/// A chain of automatic nodes executes synchronously within one logical
/// step: `enter_node` invokes the behavior, which calls back into
/// `leave_node`, which re-enters the transition target. Long-running nodes
/// park by returning from `execute` without leaving; a later signal resumes
/// them through a fresh context.
pub struct ExecutionContext<'e> {
    services: &'e Services,
    definition: Arc<ProcessDefinition>,
    instance: &'e mut ProcessInstance,
    token: TokenId,
    transition: Option<String>,
    transition_source: Option<String>,
    /// Transient per-step cache of resolved variables.
    variable_cache: HashMap<String, Value>,
}

impl<'e> ExecutionContext<'e> {
    pub fn new(
        services: &'e Services,
        definition: Arc<ProcessDefinition>,
        instance: &'e mut ProcessInstance,
    ) -> Self {
        let root = instance.root();
        Self::for_token(services, definition, instance, root)
    }

    pub fn for_token(
        services: &'e Services,
        definition: Arc<ProcessDefinition>,
        instance: &'e mut ProcessInstance,
        token: TokenId,
    ) -> Self {
        Self {
            services,
            definition,
            instance,
            token,
            transition: None,
            transition_source: None,
            variable_cache: HashMap::new(),
        }
    }

    /// Context for resuming a parked token; the token must still be live.
    pub fn resume(
        services: &'e Services,
        definition: Arc<ProcessDefinition>,
        instance: &'e mut ProcessInstance,
        token: TokenId,
    ) -> Result<Self, EngineError> {
        if !instance.tree().token(token)?.is_active {
            return Err(EngineError::InvalidState(format!(
                "token {token} is no longer active"
            )));
        }
        Ok(Self::for_token(services, definition, instance, token))
    }

    pub fn token(&self) -> TokenId {
        self.token
    }

    pub fn instance(&self) -> &ProcessInstance {
        self.instance
    }

    pub fn definition(&self) -> &Arc<ProcessDefinition> {
        &self.definition
    }

    pub fn services(&self) -> &Services {
        self.services
    }

    pub fn transition_source(&self) -> Option<&str> {
        self.transition_source.as_deref()
    }

    pub fn current_node_id(&self) -> Result<String, EngineError> {
        self.instance
            .tree()
            .token(self.token)?
            .node
            .clone()
            .ok_or_else(|| {
                EngineError::InvalidState(format!(
                    "token {} is not positioned at a node",
                    self.token
                ))
            })
    }

    /// Outgoing sequence-flow ids of the current node.
    pub fn outgoing(&self) -> Result<Vec<String>, EngineError> {
        let node_id = self.current_node_id()?;
        Ok(self.definition.node(&node_id)?.outgoing.clone())
    }

    pub fn incoming_count(&self) -> Result<usize, EngineError> {
        let node_id = self.current_node_id()?;
        Ok(self.definition.node(&node_id)?.incoming.len())
    }

    /// Entry point for a fresh process instance or sub-process.
    pub async fn start(&mut self, initial_node: &str) -> Result<(), EngineError> {
        if initial_node.is_empty() {
            return Err(EngineError::InvalidArgument(
                "initial node must not be empty".to_string(),
            ));
        }
        self.enter_node(initial_node).await
    }

    /// Sets the token's node and dispatches to the node's behavior.
    ///
    /// If the behavior declines activation (a join gate with missing
    /// arrivals) the token stays parked at the node after a "ready" history
    /// record. Otherwise the behavior's `execute` runs and is expected to
    /// eventually leave or end.
    pub async fn enter_node(&mut self, node_id: &str) -> Result<(), EngineError> {
        let definition = self.definition.clone();
        let behavior = definition.node(node_id)?.behavior.clone();

        self.instance.tree_mut().token_mut(self.token)?.node = Some(node_id.to_string());

        let Some(behavior) = behavior else {
            return Err(EngineError::UnsupportedNode(node_id.to_string()));
        };

        let mut joined = Vec::new();
        if !behavior.can_activate(self, &mut joined).await? {
            self.ensure_activity_instance()?;
            let event = self.activity_event()?;
            self.services
                .history
                .record_activity_ready(&event, &joined)
                .await?;
            debug!(node = node_id, token = %self.token, "activation deferred, token parked");
            return Ok(());
        }

        self.ensure_activity_instance()?;
        let event = self.activity_event()?;
        self.services
            .history
            .record_activity_ready(&event, &joined)
            .await?;

        self.set_transition(None)?;
        self.transition_source = None;

        let event = self.activity_event()?;
        self.services.history.record_activity_start(&event).await?;

        behavior.execute(self).await
    }

    /// Leaves the current node through a single outgoing transition and
    /// re-enters at its target.
    pub async fn leave_node(&mut self, transition_id: &str) -> Result<(), EngineError> {
        if transition_id.is_empty() {
            return Err(EngineError::InvalidArgument(
                "transition id must not be empty".to_string(),
            ));
        }
        let definition = self.definition.clone();
        definition.flow(transition_id)?;

        let event = self.activity_event()?;
        self.services.history.record_activity_end(&event).await?;

        self.transition_source = self.instance.tree().token(self.token)?.node.clone();
        self.set_transition(Some(transition_id.to_string()))?;
        self.take().await
    }

    /// Convenience for nodes with exactly one outgoing transition.
    pub async fn leave_default(&mut self) -> Result<(), EngineError> {
        let outgoing = self.outgoing()?;
        match outgoing.as_slice() {
            [single] => {
                let flow = single.clone();
                self.leave_node(&flow).await
            }
            _ => Err(EngineError::InvalidState(format!(
                "node '{}' has {} outgoing transitions, expected exactly one",
                self.current_node_id()?,
                outgoing.len()
            ))),
        }
    }

    /// The fork/join exit path: reconciles the joined branches into one
    /// surviving token, persists, records "end", then forks one child token
    /// per transition and drives each sequentially.
    pub async fn leave_all(
        &mut self,
        transition_ids: &[String],
        joined: Vec<TokenId>,
    ) -> Result<(), EngineError> {
        if transition_ids.is_empty() {
            return Err(EngineError::InvalidArgument(
                "leave_all requires at least one transition".to_string(),
            ));
        }

        self.join(joined)?;
        self.services.store.save(&mut *self.instance).await?;

        let event = self.activity_event()?;
        self.services.history.record_activity_end(&event).await?;

        let mut forks = Vec::with_capacity(transition_ids.len());
        for flow_id in transition_ids {
            self.definition.flow(flow_id)?;
            let child = self.instance.tree_mut().create_child(self.token)?;
            self.instance.tree_mut().token_mut(child)?.transition_id = Some(flow_id.clone());
            forks.push((child, flow_id.clone()));
        }
        self.services.store.save(&mut *self.instance).await?;

        for (child, flow_id) in forks {
            if !self.instance.tree().token(child)?.is_active {
                // A sibling's drive already ended this branch.
                continue;
            }
            let mut child_ctx = self.context_for(child);
            child_ctx.transition = Some(flow_id);
            child_ctx.take().await?;
        }
        Ok(())
    }

    /// Join reconciliation followed by a single-transition leave, for join
    /// gateways with one outgoing path.
    pub async fn leave_joined(
        &mut self,
        transition_id: &str,
        joined: Vec<TokenId>,
    ) -> Result<(), EngineError> {
        self.join(joined)?;
        self.services.store.save(&mut *self.instance).await?;
        self.leave_node(transition_id).await
    }

    /// Delegates to the node's signal capability.
    pub async fn signal(
        &mut self,
        event: &str,
        data: HashMap<String, Value>,
    ) -> Result<(), EngineError> {
        let node_id = self.current_node_id()?;
        let behavior = self
            .definition
            .node(&node_id)?
            .behavior
            .clone()
            .ok_or_else(|| EngineError::UnsupportedNode(node_id.clone()))?;

        match behavior.as_signallable() {
            Some(signallable) => signallable.signal(self, event, data).await,
            None => Err(EngineError::UnsupportedOperation {
                node: node_id,
                operation: "signal",
            }),
        }
    }

    /// Ends the current token and resolves completion upward: either the
    /// enclosing sub-process finishes (its `leave` capability fires on the
    /// surviving ancestor) or the process instance itself completes.
    pub async fn end(&mut self) -> Result<(), EngineError> {
        self.instance.tree_mut().token_mut(self.token)?.is_active = false;

        let event = self.activity_event()?;
        self.services.history.record_activity_end(&event).await?;

        let (parent, node_id) = {
            let token = self.instance.tree().token(self.token)?;
            (token.parent, token.node.clone())
        };
        let node_id = node_id.ok_or_else(|| {
            EngineError::InvalidState(format!("token {} ended while mid-transition", self.token))
        })?;
        let container = self.definition.node(&node_id)?.container.clone();

        if let (Some(parent), Some(container_id)) = (parent, container) {
            let (is_scope, scope_behavior) = {
                let c = self.definition.node(&container_id)?;
                (c.is_scope, c.behavior.clone())
            };
            if is_scope {
                self.instance.tree_mut().remove(self.token)?;
                if !self.instance.tree().children(parent).is_empty() {
                    // Concurrent branches still running inside the sub-process.
                    return Ok(());
                }

                // Collapse exhausted branches upward until the token sitting
                // at the sub-process node itself.
                let mut p = parent;
                while self.instance.tree().token(p)?.node.as_deref() != Some(container_id.as_str())
                {
                    if !self.instance.tree().children(p).is_empty() {
                        return Ok(());
                    }
                    let up = self.instance.tree().token(p)?.parent.ok_or_else(|| {
                        EngineError::InvalidState(format!(
                            "no token at sub-process '{container_id}' above {p}"
                        ))
                    })?;
                    self.instance.tree_mut().remove(p)?;
                    p = up;
                }

                let behavior = scope_behavior
                    .ok_or_else(|| EngineError::UnsupportedNode(container_id.clone()))?;
                let Some(scope) = behavior.as_scope() else {
                    return Err(EngineError::UnsupportedOperation {
                        node: container_id,
                        operation: "leave",
                    });
                };
                let mut scope_ctx = self.context_for(p);
                return scope.leave(&mut scope_ctx).await;
            }
        }

        self.instance.tree_mut().remove(self.token)?;
        if self.instance.tree().has_live_tokens() {
            return Ok(());
        }

        self.instance.complete();
        info!(instance_id = %self.instance.id(), "process instance completed");
        self.services.store.flush().await?;
        Ok(())
    }

    /// Kills every live token and terminates the whole instance.
    pub async fn terminate(&mut self) -> Result<(), EngineError> {
        let event = self.activity_event()?;
        self.services.history.record_activity_end(&event).await?;

        self.instance.terminate();
        info!(instance_id = %self.instance.id(), "process instance terminated");
        self.services.store.flush().await?;
        Ok(())
    }

    /// Creates a child token under the current one and starts it at
    /// `start_node` (sub-process entry).
    pub async fn enter_child(&mut self, start_node: &str) -> Result<TokenId, EngineError> {
        let child = self.instance.tree_mut().create_child(self.token)?;
        let mut child_ctx = self.context_for(child);
        child_ctx.start(start_node).await?;
        Ok(child)
    }

    // --- variables ---

    /// Resolves a variable: transient cache, then the token chain upward
    /// (exclusive of the root token), then the instance-level map.
    pub fn get_variable(&mut self, name: &str) -> Option<Value> {
        if let Some(value) = self.variable_cache.get(name) {
            return Some(value.clone());
        }
        let value = self.instance.resolve_variable(self.token, name)?;
        self.variable_cache.insert(name.to_string(), value.clone());
        Some(value)
    }

    /// Reads only the current token's own map, no ancestor fallback.
    pub fn get_variable_local(&self, name: &str) -> Option<Value> {
        self.instance.variable_local(self.token, name)
    }

    /// Writes to the current token; there is no write-through to ancestors.
    pub fn set_variable(&mut self, name: &str, value: Value) -> Result<(), EngineError> {
        self.variable_cache.insert(name.to_string(), value.clone());
        self.instance.set_variable_local(self.token, name, value)
    }

    pub fn set_variable_local(&mut self, name: &str, value: Value) -> Result<(), EngineError> {
        self.set_variable(name, value)
    }

    /// Writes a process-instance-level variable (outlives any one token).
    pub fn set_process_variable(&mut self, name: &str, value: Value) {
        self.variable_cache.remove(name);
        self.instance.set_process_variable(name, value);
    }

    pub fn evaluate(&self, expression: &str) -> Result<Value, EngineError> {
        let vars = self.instance.variable_snapshot(self.token);
        self.services.evaluator.evaluate(expression, &vars)
    }

    pub fn evaluate_condition(&self, expression: &str) -> Result<bool, EngineError> {
        let vars = self.instance.variable_snapshot(self.token);
        self.services.evaluator.evaluate_condition(expression, &vars)
    }

    // --- internals ---

    /// Collapses the joined branches; if the current token itself got
    /// collapsed away, adopts the survivor as the new active token.
    fn join(&mut self, joined: Vec<TokenId>) -> Result<(), EngineError> {
        let definition = self.definition.clone();
        let survivor = self
            .instance
            .tree_mut()
            .reconcile_join(&definition, self.token, joined)?;
        if survivor != self.token {
            self.instance.tree_mut().adopt(self.token, survivor)?;
            debug!(old = %self.token, survivor = %survivor, "join collapsed current branch");
            self.token = survivor;
            self.variable_cache.clear();
        }
        Ok(())
    }

    async fn take(&mut self) -> Result<(), EngineError> {
        let flow_id = self.transition.clone().ok_or_else(|| {
            EngineError::InvalidArgument("no pending transition to take".to_string())
        })?;
        let target = self.definition.flow(&flow_id)?.target.clone();
        {
            let token = self.instance.tree_mut().token_mut(self.token)?;
            token.node = None;
            token.activity_instance = None;
        }
        self.enter_node(&target).await
    }

    fn context_for(&mut self, token: TokenId) -> ExecutionContext<'_> {
        ExecutionContext {
            services: self.services,
            definition: self.definition.clone(),
            instance: &mut *self.instance,
            token,
            transition: None,
            transition_source: None,
            variable_cache: HashMap::new(),
        }
    }

    fn set_transition(&mut self, transition: Option<String>) -> Result<(), EngineError> {
        self.instance
            .tree_mut()
            .token_mut(self.token)?
            .transition_id = transition.clone();
        self.transition = transition;
        Ok(())
    }

    fn ensure_activity_instance(&mut self) -> Result<(), EngineError> {
        let token = self.instance.tree_mut().token_mut(self.token)?;
        if token.activity_instance.is_none() {
            token.activity_instance = Some(Uuid::new_v4());
        }
        Ok(())
    }

    fn activity_event(&self) -> Result<ActivityEvent, EngineError> {
        let token = self.instance.tree().token(self.token)?;
        Ok(ActivityEvent {
            instance_id: self.instance.id(),
            token: self.token,
            activity_instance: token.activity_instance,
            node: token.node.clone(),
            transition: token.transition_id.clone(),
        })
    }
}
