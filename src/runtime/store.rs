use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::EngineError;
use crate::runtime::instance::ProcessInstance;
use crate::runtime::token::TokenId;

/// Persists process-instance and token state.
///
/// `save` must reject a stale write with `ConcurrencyConflict` rather than
/// apply it; on success it bumps the instance revision. `flush` makes the
/// writes of the current step durable.
#[async_trait]
pub trait RuntimeStore: Send + Sync {
    async fn load(&self, instance_id: Uuid) -> Result<ProcessInstance, EngineError>;

    async fn save(&self, instance: &mut ProcessInstance) -> Result<(), EngineError>;

    async fn remove_tokens(
        &self,
        instance_id: Uuid,
        tokens: &[TokenId],
    ) -> Result<(), EngineError>;

    async fn flush(&self) -> Result<(), EngineError>;
}

struct StoredInstance {
    revision: u64,
    body: String,
}

/// In-memory store: JSON snapshots keyed by instance id, with a revision
/// counter for optimistic-concurrency checks.
#[derive(Default)]
pub struct InMemoryStore {
    instances: DashMap<Uuid, StoredInstance>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuntimeStore for InMemoryStore {
    async fn load(&self, instance_id: Uuid) -> Result<ProcessInstance, EngineError> {
        let stored = self
            .instances
            .get(&instance_id)
            .ok_or(EngineError::UnknownInstance(instance_id))?;
        serde_json::from_str(&stored.body).map_err(|e| EngineError::Store(e.into()))
    }

    async fn save(&self, instance: &mut ProcessInstance) -> Result<(), EngineError> {
        if let Some(stored) = self.instances.get(&instance.id())
            && stored.revision != instance.revision
        {
            return Err(EngineError::ConcurrencyConflict(instance.id()));
        }
        instance.revision += 1;
        let body = serde_json::to_string(instance).map_err(|e| EngineError::Store(e.into()))?;
        self.instances.insert(
            instance.id(),
            StoredInstance {
                revision: instance.revision,
                body,
            },
        );
        Ok(())
    }

    async fn remove_tokens(
        &self,
        instance_id: Uuid,
        tokens: &[TokenId],
    ) -> Result<(), EngineError> {
        // Instance snapshots carry the whole tree; nothing to delete separately.
        debug!(instance_id = %instance_id, count = tokens.len(), "tokens removed");
        Ok(())
    }

    async fn flush(&self) -> Result<(), EngineError> {
        Ok(())
    }
}
