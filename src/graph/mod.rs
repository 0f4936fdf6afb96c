pub mod builder;

use std::collections::HashMap;
use std::sync::Arc;

use crate::behaviors::NodeBehavior;
use crate::error::EngineError;

/// Immutable process definition: the flow graph the engine interprets.
///
/// Built once at deployment time via [`builder::DefinitionBuilder`] and
/// shared read-only across all running instances.
#[derive(Debug)]
pub struct ProcessDefinition {
    pub id: String,
    pub version: i32,
    pub start: String,
    nodes: HashMap<String, FlowNode>,
    flows: HashMap<String, SequenceFlow>,
}

/// A vertex in the flow graph (task, gateway, event, sub-process boundary).
#[derive(Debug)]
pub struct FlowNode {
    pub id: String,
    pub name: String,
    pub incoming: Vec<String>,
    pub outgoing: Vec<String>,
    /// Enclosing sub-process node id, if this node sits inside one.
    pub container: Option<String>,
    /// True for scope-defining elements (sub-process boundaries).
    pub is_scope: bool,
    pub behavior: Option<Arc<dyn NodeBehavior>>,
}

/// A directed edge between flow nodes, optionally guarded by a condition.
#[derive(Debug, Clone)]
pub struct SequenceFlow {
    pub id: String,
    pub source: String,
    pub target: String,
    pub condition: Option<String>,
}

impl ProcessDefinition {
    /// Resolves a flow node by activity id. Used both for dispatch and to
    /// re-hydrate a token whose node reference was persisted as an id.
    pub fn node(&self, id: &str) -> Result<&FlowNode, EngineError> {
        self.nodes
            .get(id)
            .ok_or_else(|| EngineError::InvalidArgument(format!("unknown node '{id}'")))
    }

    pub fn flow(&self, id: &str) -> Result<&SequenceFlow, EngineError> {
        self.flows
            .get(id)
            .ok_or_else(|| EngineError::InvalidArgument(format!("unknown sequence flow '{id}'")))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &FlowNode> {
        self.nodes.values()
    }
}
