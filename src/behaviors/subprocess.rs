use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::behaviors::{NodeBehavior, ScopeBehavior, Signallable};
use crate::error::EngineError;
use crate::runtime::engine::SUBPROCESS_COMPLETED_EVENT;
use crate::runtime::execution::ExecutionContext;

/// Embedded sub-process: a scope-defining container node.
///
/// Entering it forks a child token that runs the internal path; when the
/// last internal token ends, the engine walks back up and calls `leave`
/// on the token still sitting at this node.
#[derive(Debug)]
pub struct SubProcessBehavior {
    start: String,
}

impl SubProcessBehavior {
    pub fn new(start: &str) -> Self {
        Self {
            start: start.to_string(),
        }
    }
}

#[async_trait]
impl NodeBehavior for SubProcessBehavior {
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), EngineError> {
        ctx.enter_child(&self.start).await?;
        Ok(())
    }

    fn as_scope(&self) -> Option<&dyn ScopeBehavior> {
        Some(self)
    }
}

#[async_trait]
impl ScopeBehavior for SubProcessBehavior {
    async fn leave(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), EngineError> {
        ctx.leave_default().await
    }
}

/// Sub-process invoked as a separate process instance.
///
/// Entering parks the token; the orchestrating caller starts the child
/// instance with a super link back to this token. On child completion the
/// engine signals [`SUBPROCESS_COMPLETED_EVENT`] here, carrying the child's
/// instance variables, which are merged before leaving.
#[derive(Debug)]
pub struct CallActivityBehavior {
    definition_id: String,
}

impl CallActivityBehavior {
    pub fn new(definition_id: &str) -> Self {
        Self {
            definition_id: definition_id.to_string(),
        }
    }

    pub fn definition_id(&self) -> &str {
        &self.definition_id
    }
}

#[async_trait]
impl NodeBehavior for CallActivityBehavior {
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), EngineError> {
        info!(
            instance_id = %ctx.instance().id(),
            token = %ctx.token(),
            definition = %self.definition_id,
            "awaiting sub-process instance"
        );
        // Parked until the child instance completes.
        Ok(())
    }

    fn as_signallable(&self) -> Option<&dyn Signallable> {
        Some(self)
    }
}

#[async_trait]
impl Signallable for CallActivityBehavior {
    async fn signal(
        &self,
        ctx: &mut ExecutionContext<'_>,
        event: &str,
        data: HashMap<String, Value>,
    ) -> Result<(), EngineError> {
        if event != SUBPROCESS_COMPLETED_EVENT {
            return Err(EngineError::InvalidArgument(format!(
                "call activity for '{}' does not understand event '{event}'",
                self.definition_id
            )));
        }
        for (name, value) in data {
            ctx.set_process_variable(&name, value);
        }
        ctx.leave_default().await
    }
}
