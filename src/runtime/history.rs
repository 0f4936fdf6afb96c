use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::EngineError;
use crate::runtime::token::TokenId;

/// Snapshot of the activity a lifecycle notification refers to.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEvent {
    pub instance_id: Uuid,
    pub token: TokenId,
    pub activity_instance: Option<Uuid>,
    pub node: Option<String>,
    pub transition: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActivityPhase {
    Ready,
    Started,
    Ended,
}

/// Receives activity lifecycle notifications for the audit trail.
///
/// Fire-and-observe: the engine only cares about success or failure.
#[async_trait]
pub trait HistoryRecorder: Send + Sync {
    async fn record_activity_ready(
        &self,
        event: &ActivityEvent,
        arrived: &[TokenId],
    ) -> Result<(), EngineError>;

    async fn record_activity_start(&self, event: &ActivityEvent) -> Result<(), EngineError>;

    async fn record_activity_end(&self, event: &ActivityEvent) -> Result<(), EngineError>;
}

/// Default recorder: structured log lines, no storage.
#[derive(Debug, Default)]
pub struct TracingRecorder;

#[async_trait]
impl HistoryRecorder for TracingRecorder {
    async fn record_activity_ready(
        &self,
        event: &ActivityEvent,
        arrived: &[TokenId],
    ) -> Result<(), EngineError> {
        info!(
            instance_id = %event.instance_id,
            token = %event.token,
            node = event.node.as_deref().unwrap_or("-"),
            arrived = arrived.len(),
            "activity ready"
        );
        Ok(())
    }

    async fn record_activity_start(&self, event: &ActivityEvent) -> Result<(), EngineError> {
        info!(
            instance_id = %event.instance_id,
            token = %event.token,
            node = event.node.as_deref().unwrap_or("-"),
            "activity started"
        );
        Ok(())
    }

    async fn record_activity_end(&self, event: &ActivityEvent) -> Result<(), EngineError> {
        info!(
            instance_id = %event.instance_id,
            token = %event.token,
            node = event.node.as_deref().unwrap_or("-"),
            "activity ended"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub phase: ActivityPhase,
    pub event: ActivityEvent,
    pub arrived: Vec<TokenId>,
}

/// Recorder that keeps every notification in memory, mainly as a test
/// assertion surface.
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Number of recorded notifications for `node` in the given phase.
    pub fn count(&self, phase: ActivityPhase, node: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.phase == phase && e.event.node.as_deref() == Some(node))
            .count()
    }

    fn push(&self, phase: ActivityPhase, event: &ActivityEvent, arrived: &[TokenId]) {
        self.entries.lock().unwrap().push(HistoryEntry {
            phase,
            event: event.clone(),
            arrived: arrived.to_vec(),
        });
    }
}

#[async_trait]
impl HistoryRecorder for InMemoryRecorder {
    async fn record_activity_ready(
        &self,
        event: &ActivityEvent,
        arrived: &[TokenId],
    ) -> Result<(), EngineError> {
        self.push(ActivityPhase::Ready, event, arrived);
        Ok(())
    }

    async fn record_activity_start(&self, event: &ActivityEvent) -> Result<(), EngineError> {
        self.push(ActivityPhase::Started, event, &[]);
        Ok(())
    }

    async fn record_activity_end(&self, event: &ActivityEvent) -> Result<(), EngineError> {
        self.push(ActivityPhase::Ended, event, &[]);
        Ok(())
    }
}
