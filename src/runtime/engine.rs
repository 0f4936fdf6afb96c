use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::behaviors::task::{NoopWorkItemService, WorkItemService};
use crate::error::EngineError;
use crate::expr::{EvalexprEvaluator, ExpressionEvaluator};
use crate::graph::ProcessDefinition;
use crate::runtime::execution::ExecutionContext;
use crate::runtime::history::{HistoryRecorder, TracingRecorder};
use crate::runtime::instance::{ExecutionState, ProcessInstance, SuperLink};
use crate::runtime::store::{InMemoryStore, RuntimeStore};
use crate::runtime::token::TokenId;

/// Event raised on a waiting super token when its sub-process instance
/// completes. Carries the child's instance variables as payload.
pub const SUBPROCESS_COMPLETED_EVENT: &str = "subprocess.completed";

/// A stale write is retried from a fresh load at most this many times.
const MAX_CONFLICT_RETRIES: usize = 3;

/// Collaborators the execution contexts work against.
pub struct Services {
    pub store: Arc<dyn RuntimeStore>,
    pub history: Arc<dyn HistoryRecorder>,
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    pub work_items: Arc<dyn WorkItemService>,
}

impl Services {
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            history: Arc::new(TracingRecorder),
            evaluator: Arc::new(EvalexprEvaluator),
            work_items: Arc::new(NoopWorkItemService),
        }
    }
}

/// Process engine: holds deployed definitions and drives instances.
///
/// Operations on distinct instances proceed in parallel; operations on one
/// instance are serialized behind its mutex, because token-tree mutation is
/// not safe under concurrent access.
pub struct Engine {
    definitions: DashMap<String, Arc<ProcessDefinition>>,
    instances: DashMap<Uuid, Arc<Mutex<ProcessInstance>>>,
    services: Services,
}

impl Engine {
    pub fn new(services: Services) -> Self {
        Self {
            definitions: DashMap::new(),
            instances: DashMap::new(),
            services,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Services::in_memory())
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Registers an immutable definition version. Deploying the same id
    /// again replaces it for new instances; running instances are driven by
    /// the definition they were started with only as long as the ids match.
    pub fn deploy(&self, definition: ProcessDefinition) {
        info!(definition = %definition.id, version = definition.version, "definition deployed");
        self.definitions
            .insert(definition.id.clone(), Arc::new(definition));
    }

    pub fn definition(&self, id: &str) -> Option<Arc<ProcessDefinition>> {
        self.definitions.get(id).map(|d| d.value().clone())
    }

    /// Creates an instance with a single root token at the start node and
    /// drives it until every branch has ended or parked.
    pub async fn start_process(
        &self,
        definition_id: &str,
        variables: HashMap<String, Value>,
    ) -> Result<Uuid, EngineError> {
        self.start_internal(definition_id, variables, None).await
    }

    /// Starts a sub-process-as-instance: on completion the engine signals
    /// the linked super token with [`SUBPROCESS_COMPLETED_EVENT`].
    pub async fn start_subprocess(
        &self,
        definition_id: &str,
        variables: HashMap<String, Value>,
        super_link: SuperLink,
    ) -> Result<Uuid, EngineError> {
        self.start_internal(definition_id, variables, Some(super_link))
            .await
    }

    async fn start_internal(
        &self,
        definition_id: &str,
        variables: HashMap<String, Value>,
        super_link: Option<SuperLink>,
    ) -> Result<Uuid, EngineError> {
        let definition = self
            .definitions
            .get(definition_id)
            .map(|d| d.value().clone())
            .ok_or_else(|| EngineError::UnknownDefinition(definition_id.to_string()))?;

        let mut instance = ProcessInstance::new(definition_id, variables, super_link);
        let instance_id = instance.id();
        self.services.store.save(&mut instance).await?;
        info!(instance_id = %instance_id, definition = definition_id, "process instance starting");

        let start = definition.start.clone();
        {
            let mut ctx = ExecutionContext::new(&self.services, definition, &mut instance);
            ctx.start(&start).await?;
        }
        self.persist(&mut instance).await?;

        let cell = Arc::new(Mutex::new(instance));
        self.instances.insert(instance_id, cell.clone());
        self.after_step(&cell).await?;
        Ok(instance_id)
    }

    /// Resumes a parked token with a named event.
    ///
    /// A `ConcurrencyConflict` from the store is the one retryable failure:
    /// the instance is reloaded and the event replayed, up to a bounded
    /// number of attempts.
    pub async fn signal(
        &self,
        instance_id: Uuid,
        token: TokenId,
        event: &str,
        data: HashMap<String, Value>,
    ) -> Result<(), EngineError> {
        let cell = self.cell(instance_id)?;
        {
            let mut guard = cell.lock().await;
            if guard.state() != ExecutionState::Active {
                return Err(EngineError::InvalidState(format!(
                    "process instance {instance_id} is not active"
                )));
            }
            let definition = self.definition_for(&guard)?;

            let mut attempt = 0;
            loop {
                let step = async {
                    let mut ctx = ExecutionContext::resume(
                        &self.services,
                        definition.clone(),
                        &mut guard,
                        token,
                    )?;
                    ctx.signal(event, data.clone()).await?;
                    self.persist(&mut guard).await
                };
                match step.await {
                    Err(EngineError::ConcurrencyConflict(_))
                        if attempt + 1 < MAX_CONFLICT_RETRIES =>
                    {
                        attempt += 1;
                        warn!(
                            instance_id = %instance_id,
                            attempt,
                            "stale write detected, reloading instance and replaying event"
                        );
                        *guard = self.services.store.load(instance_id).await?;
                    }
                    other => {
                        other?;
                        break;
                    }
                }
            }
        }
        self.after_step(&cell).await
    }

    /// Completes a parked human task.
    pub async fn complete_task(
        &self,
        instance_id: Uuid,
        token: TokenId,
        data: HashMap<String, Value>,
    ) -> Result<(), EngineError> {
        self.signal(instance_id, token, "complete", data).await
    }

    pub async fn suspend(&self, instance_id: Uuid) -> Result<(), EngineError> {
        let cell = self.cell(instance_id)?;
        let mut guard = cell.lock().await;
        guard.suspend();
        self.persist(&mut guard).await
    }

    pub async fn resume(&self, instance_id: Uuid) -> Result<(), EngineError> {
        let cell = self.cell(instance_id)?;
        let mut guard = cell.lock().await;
        guard.resume();
        self.persist(&mut guard).await
    }

    pub async fn instance_state(&self, instance_id: Uuid) -> Result<ExecutionState, EngineError> {
        let cell = self.cell(instance_id)?;
        let guard = cell.lock().await;
        Ok(guard.state())
    }

    /// Reads an instance-level variable.
    pub async fn variable(
        &self,
        instance_id: Uuid,
        name: &str,
    ) -> Result<Option<Value>, EngineError> {
        let cell = self.cell(instance_id)?;
        let guard = cell.lock().await;
        Ok(guard.variables().get(name).cloned())
    }

    /// Active tokens currently parked at `node`.
    pub async fn tokens_at(
        &self,
        instance_id: Uuid,
        node: &str,
    ) -> Result<Vec<TokenId>, EngineError> {
        let cell = self.cell(instance_id)?;
        let guard = cell.lock().await;
        Ok(guard.tree().tokens_at(node))
    }

    pub async fn live_token_count(&self, instance_id: Uuid) -> Result<usize, EngineError> {
        let cell = self.cell(instance_id)?;
        let guard = cell.lock().await;
        Ok(guard.tree().live_tokens().len())
    }

    fn cell(&self, instance_id: Uuid) -> Result<Arc<Mutex<ProcessInstance>>, EngineError> {
        self.instances
            .get(&instance_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::UnknownInstance(instance_id))
    }

    fn definition_for(
        &self,
        instance: &ProcessInstance,
    ) -> Result<Arc<ProcessDefinition>, EngineError> {
        self.definitions
            .get(instance.definition_id())
            .map(|d| d.value().clone())
            .ok_or_else(|| EngineError::UnknownDefinition(instance.definition_id().to_string()))
    }

    async fn persist(&self, instance: &mut ProcessInstance) -> Result<(), EngineError> {
        self.services.store.save(instance).await?;
        let removed = instance.tree_mut().take_removed();
        if !removed.is_empty() {
            self.services
                .store
                .remove_tokens(instance.id(), &removed)
                .await?;
        }
        Ok(())
    }

    /// If the step completed a sub-process-as-instance, resume the waiting
    /// super token exactly once.
    async fn after_step(&self, cell: &Arc<Mutex<ProcessInstance>>) -> Result<(), EngineError> {
        let resumption = {
            let mut guard = cell.lock().await;
            if guard.state() != ExecutionState::Completed {
                None
            } else if let Some(link) = guard.take_super_link() {
                // Persist the consumed link so a replay cannot double-signal.
                self.persist(&mut guard).await?;
                Some((link, guard.variables().clone()))
            } else {
                None
            }
        };

        if let Some((link, variables)) = resumption {
            info!(
                super_instance = %link.instance_id,
                super_token = %link.token,
                "sub-process instance completed, resuming super token"
            );
            Box::pin(self.signal(
                link.instance_id,
                link.token,
                SUBPROCESS_COMPLETED_EVENT,
                variables,
            ))
            .await?;
        }
        Ok(())
    }
}
