use std::collections::HashMap;
use std::sync::Arc;

use crate::behaviors::NodeBehavior;
use crate::behaviors::subprocess::SubProcessBehavior;
use crate::error::EngineError;
use crate::graph::{FlowNode, ProcessDefinition, SequenceFlow};

struct NodeSpec {
    id: String,
    name: String,
    container: Option<String>,
    is_scope: bool,
    behavior: Option<Arc<dyn NodeBehavior>>,
}

/// Fluent builder for [`ProcessDefinition`].
///
/// The behavior object is attached to each node here, at deployment time;
/// after `build()` the definition is immutable.
pub struct DefinitionBuilder {
    id: String,
    version: i32,
    start: Option<String>,
    nodes: Vec<NodeSpec>,
    flows: Vec<SequenceFlow>,
}

impl DefinitionBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            version: 1,
            start: None,
            nodes: Vec::new(),
            flows: Vec::new(),
        }
    }

    pub fn version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    /// Marks the initial node. Defaults to the first node added.
    pub fn start(mut self, id: &str) -> Self {
        self.start = Some(id.to_string());
        self
    }

    pub fn node(self, id: &str, behavior: impl NodeBehavior + 'static) -> Self {
        self.push(id, None, false, Some(Arc::new(behavior)))
    }

    /// Adds a node contained in a sub-process scope.
    pub fn node_in(self, id: &str, container: &str, behavior: impl NodeBehavior + 'static) -> Self {
        self.push(id, Some(container), false, Some(Arc::new(behavior)))
    }

    /// Adds a sub-process boundary node whose internal path starts at
    /// `inner_start`.
    pub fn sub_process(self, id: &str, inner_start: &str) -> Self {
        let behavior = SubProcessBehavior::new(inner_start);
        self.push(id, None, true, Some(Arc::new(behavior)))
    }

    /// A sub-process nested inside another sub-process.
    pub fn sub_process_in(self, id: &str, container: &str, inner_start: &str) -> Self {
        let behavior = SubProcessBehavior::new(inner_start);
        self.push(id, Some(container), true, Some(Arc::new(behavior)))
    }

    /// Adds a node with no attached behavior. Entering it fails with
    /// `UnsupportedNode`.
    pub fn bare_node(self, id: &str) -> Self {
        self.push(id, None, false, None)
    }

    pub fn flow(mut self, id: &str, source: &str, target: &str) -> Self {
        self.flows.push(SequenceFlow {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            condition: None,
        });
        self
    }

    pub fn conditional_flow(mut self, id: &str, source: &str, target: &str, cond: &str) -> Self {
        self.flows.push(SequenceFlow {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            condition: Some(cond.to_string()),
        });
        self
    }

    fn push(
        mut self,
        id: &str,
        container: Option<&str>,
        is_scope: bool,
        behavior: Option<Arc<dyn NodeBehavior>>,
    ) -> Self {
        self.nodes.push(NodeSpec {
            id: id.to_string(),
            name: id.to_string(),
            container: container.map(str::to_string),
            is_scope,
            behavior,
        });
        self
    }

    pub fn build(self) -> Result<ProcessDefinition, EngineError> {
        let start = self
            .start
            .clone()
            .or_else(|| self.nodes.first().map(|n| n.id.clone()))
            .ok_or_else(|| {
                EngineError::InvalidArgument(format!("definition '{}' has no nodes", self.id))
            })?;

        let mut nodes: HashMap<String, FlowNode> = HashMap::new();
        for spec in self.nodes {
            if nodes.contains_key(&spec.id) {
                return Err(EngineError::InvalidArgument(format!(
                    "duplicate node id '{}'",
                    spec.id
                )));
            }
            nodes.insert(
                spec.id.clone(),
                FlowNode {
                    id: spec.id,
                    name: spec.name,
                    incoming: Vec::new(),
                    outgoing: Vec::new(),
                    container: spec.container,
                    is_scope: spec.is_scope,
                    behavior: spec.behavior,
                },
            );
        }

        // Containers must reference scope nodes.
        let containers: Vec<(String, String)> = nodes
            .values()
            .filter_map(|n| n.container.clone().map(|c| (n.id.clone(), c)))
            .collect();
        for (node_id, container) in containers {
            match nodes.get(&container) {
                Some(c) if c.is_scope => {}
                Some(_) => {
                    return Err(EngineError::InvalidArgument(format!(
                        "node '{node_id}' is contained in '{container}', which is not a scope"
                    )));
                }
                None => {
                    return Err(EngineError::InvalidArgument(format!(
                        "node '{node_id}' references unknown container '{container}'"
                    )));
                }
            }
        }

        let mut flows: HashMap<String, SequenceFlow> = HashMap::new();
        for flow in self.flows {
            if !nodes.contains_key(&flow.source) || !nodes.contains_key(&flow.target) {
                return Err(EngineError::InvalidArgument(format!(
                    "sequence flow '{}' references unknown nodes",
                    flow.id
                )));
            }
            nodes
                .get_mut(&flow.source)
                .unwrap()
                .outgoing
                .push(flow.id.clone());
            nodes
                .get_mut(&flow.target)
                .unwrap()
                .incoming
                .push(flow.id.clone());
            if flows.insert(flow.id.clone(), flow).is_some() {
                return Err(EngineError::InvalidArgument(
                    "duplicate sequence flow id".to_string(),
                ));
            }
        }

        if !nodes.contains_key(&start) {
            return Err(EngineError::InvalidArgument(format!(
                "start node '{start}' does not exist"
            )));
        }

        Ok(ProcessDefinition {
            id: self.id,
            version: self.version,
            start,
            nodes,
            flows,
        })
    }
}
