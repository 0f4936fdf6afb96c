use async_trait::async_trait;

use crate::behaviors::NodeBehavior;
use crate::error::EngineError;
use crate::runtime::execution::ExecutionContext;
use crate::runtime::token::TokenId;

/// Active tokens currently arriving at the context's node.
fn arrivals(ctx: &ExecutionContext<'_>) -> Result<Vec<TokenId>, EngineError> {
    let node_id = ctx.current_node_id()?;
    Ok(ctx.instance().tree().tokens_at(&node_id))
}

/// Parallel gateway: forks on multiple outgoing flows, joins on multiple
/// incoming ones.
///
/// As a join it declines activation until one token has arrived per
/// incoming flow; the last arrival activates the gate and supplies the
/// parked siblings as joined tokens for reconciliation.
#[derive(Debug, Default)]
pub struct ParallelGatewayBehavior;

#[async_trait]
impl NodeBehavior for ParallelGatewayBehavior {
    async fn can_activate(
        &self,
        ctx: &mut ExecutionContext<'_>,
        joined: &mut Vec<TokenId>,
    ) -> Result<bool, EngineError> {
        let expected = ctx.incoming_count()?.max(1);
        let arrived = arrivals(ctx)?;
        let ready = arrived.len() >= expected;
        *joined = arrived;
        Ok(ready)
    }

    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), EngineError> {
        let joined = arrivals(ctx)?;
        let outgoing = ctx.outgoing()?;
        match outgoing.as_slice() {
            [] => Err(EngineError::InvalidState(format!(
                "parallel gateway '{}' has no outgoing flow",
                ctx.current_node_id()?
            ))),
            [single] => {
                let flow = single.clone();
                ctx.leave_joined(&flow, joined).await
            }
            _ => ctx.leave_all(&outgoing, joined).await,
        }
    }
}

/// Exclusive gateway: takes the first outgoing flow whose condition holds.
///
/// Flows without a condition match unconditionally; the configured default
/// flow is only taken when nothing else matched.
#[derive(Debug, Default)]
pub struct ExclusiveGatewayBehavior {
    default_flow: Option<String>,
}

impl ExclusiveGatewayBehavior {
    pub fn new(default_flow: Option<&str>) -> Self {
        Self {
            default_flow: default_flow.map(str::to_string),
        }
    }
}

#[async_trait]
impl NodeBehavior for ExclusiveGatewayBehavior {
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), EngineError> {
        let outgoing = ctx.outgoing()?;
        let definition = ctx.definition().clone();

        for flow_id in &outgoing {
            if self.default_flow.as_deref() == Some(flow_id.as_str()) {
                continue;
            }
            let matched = match &definition.flow(flow_id)?.condition {
                Some(condition) => ctx.evaluate_condition(condition)?,
                None => true,
            };
            if matched {
                return ctx.leave_node(flow_id).await;
            }
        }

        if let Some(default_flow) = &self.default_flow {
            let flow = default_flow.clone();
            return ctx.leave_node(&flow).await;
        }

        Err(EngineError::InvalidState(format!(
            "exclusive gateway '{}' has no matching outgoing flow",
            ctx.current_node_id()?
        )))
    }
}
