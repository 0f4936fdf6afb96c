use thiserror::Error;
use uuid::Uuid;

use crate::runtime::token::TokenId;

/// Engine error kinds.
///
/// Structural/contract errors (`InvalidArgument`, `InvalidState`,
/// `UnsupportedNode`) abort the current step and leave persisted state
/// untouched. `ConcurrencyConflict` is the one retryable condition: reload
/// the instance and replay the triggering event.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("node '{0}' has no attached behavior")]
    UnsupportedNode(String),

    #[error("node '{node}' does not support '{operation}'")]
    UnsupportedOperation {
        node: String,
        operation: &'static str,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("concurrent modification of process instance {0}")]
    ConcurrencyConflict(Uuid),

    #[error("process definition '{0}' is not deployed")]
    UnknownDefinition(String),

    #[error("process instance {0} not found")]
    UnknownInstance(Uuid),

    #[error("token {0} not found")]
    UnknownToken(TokenId),

    #[error("task handler '{name}' failed")]
    Handler {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to evaluate expression '{expression}'")]
    Expression {
        expression: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("store operation failed")]
    Store(#[source] anyhow::Error),
}
