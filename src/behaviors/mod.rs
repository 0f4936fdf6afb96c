pub mod event;
pub mod gateway;
pub mod subprocess;
pub mod task;

use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::EngineError;
use crate::runtime::execution::ExecutionContext;
use crate::runtime::token::TokenId;

/// Pluggable logic attached to a flow node, invoked by the engine.
///
/// Optional capabilities (signal handling, sub-process leave) are exposed
/// through the `as_*` accessors and queried by capability-check, never by
/// downcast.
#[async_trait]
pub trait NodeBehavior: Send + Sync + Debug {
    /// Whether the arriving token may activate this node.
    ///
    /// Join gates decline until every expected arrival is present; either
    /// way `joined` receives the set of tokens currently arriving here.
    async fn can_activate(
        &self,
        _ctx: &mut ExecutionContext<'_>,
        _joined: &mut Vec<TokenId>,
    ) -> Result<bool, EngineError> {
        Ok(true)
    }

    /// Drives the node. Expected to eventually call back into the context
    /// to leave or end, or to return early and leave the token parked.
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), EngineError>;

    fn as_signallable(&self) -> Option<&dyn Signallable> {
        None
    }

    fn as_scope(&self) -> Option<&dyn ScopeBehavior> {
        None
    }
}

/// Capability of nodes that can be resumed by a named event.
#[async_trait]
pub trait Signallable: Send + Sync {
    async fn signal(
        &self,
        ctx: &mut ExecutionContext<'_>,
        event: &str,
        data: HashMap<String, Value>,
    ) -> Result<(), EngineError>;
}

/// Capability of sub-process container nodes: hands control back to the
/// containing graph once the internal path has finished.
#[async_trait]
pub trait ScopeBehavior: Send + Sync {
    async fn leave(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), EngineError>;
}
