use async_trait::async_trait;

use crate::behaviors::NodeBehavior;
use crate::error::EngineError;
use crate::runtime::execution::ExecutionContext;

/// Start event: immediately leaves through the single outgoing flow.
#[derive(Debug, Default)]
pub struct StartEventBehavior;

#[async_trait]
impl NodeBehavior for StartEventBehavior {
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), EngineError> {
        ctx.leave_default().await
    }
}

/// End event: ends the current token and lets completion propagate upward.
#[derive(Debug, Default)]
pub struct EndEventBehavior;

#[async_trait]
impl NodeBehavior for EndEventBehavior {
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), EngineError> {
        ctx.end().await
    }
}

/// Terminate end event: kills every live token of the instance.
#[derive(Debug, Default)]
pub struct TerminateEndEventBehavior;

#[async_trait]
impl NodeBehavior for TerminateEndEventBehavior {
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), EngineError> {
        ctx.terminate().await
    }
}
