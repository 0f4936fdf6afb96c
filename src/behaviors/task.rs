use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use crate::behaviors::{NodeBehavior, Signallable};
use crate::error::EngineError;
use crate::runtime::execution::ExecutionContext;
use crate::runtime::token::TokenId;

/// Pluggable payload logic for service tasks.
#[async_trait]
pub trait TaskHandler: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn validate(&self, params: &Value) -> Result<()>;

    async fn execute(&self, params: Value, vars: &HashMap<String, Value>) -> Result<Value>;
}

/// External work-item creation, consumed as a collaborator contract: the
/// engine only announces that a human task is waiting.
#[async_trait]
pub trait WorkItemService: Send + Sync {
    async fn create_work_item(&self, item: WorkItem) -> std::result::Result<(), EngineError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkItem {
    pub instance_id: Uuid,
    pub token: TokenId,
    pub node: String,
    pub name: String,
}

/// Default work-item sink: logs and forgets.
#[derive(Debug, Default)]
pub struct NoopWorkItemService;

#[async_trait]
impl WorkItemService for NoopWorkItemService {
    async fn create_work_item(&self, item: WorkItem) -> std::result::Result<(), EngineError> {
        info!(
            instance_id = %item.instance_id,
            token = %item.token,
            node = %item.node,
            name = %item.name,
            "work item created"
        );
        Ok(())
    }
}

/// Replaces top-level `${var}` string params with resolved variable values.
fn resolve_placeholders(mut params: Value, ctx: &mut ExecutionContext<'_>) -> Value {
    if let Some(obj) = params.as_object_mut() {
        for (_, v) in obj.iter_mut() {
            if let Some(s) = v.as_str()
                && let Some(name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}'))
                && let Some(value) = ctx.get_variable(name)
            {
                *v = value;
            }
        }
    }
    params
}

/// Automatic task backed by a [`TaskHandler`]: runs the handler, stores the
/// result, leaves through the single outgoing flow.
#[derive(Debug)]
pub struct ServiceTaskBehavior {
    handler: Arc<dyn TaskHandler>,
    params: Value,
    result_var: Option<String>,
}

impl ServiceTaskBehavior {
    pub fn new(
        handler: Arc<dyn TaskHandler>,
        params: Value,
        result_var: Option<&str>,
    ) -> std::result::Result<Self, EngineError> {
        handler.validate(&params).map_err(|e| EngineError::Handler {
            name: handler.name().to_string(),
            source: e,
        })?;
        Ok(Self {
            handler,
            params,
            result_var: result_var.map(str::to_string),
        })
    }
}

#[async_trait]
impl NodeBehavior for ServiceTaskBehavior {
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> std::result::Result<(), EngineError> {
        let params = resolve_placeholders(self.params.clone(), ctx);
        let vars = ctx.instance().variable_snapshot(ctx.token());

        let result = self
            .handler
            .execute(params, &vars)
            .await
            .map_err(|e| EngineError::Handler {
                name: self.handler.name().to_string(),
                source: e,
            })?;

        if let Some(var) = &self.result_var {
            ctx.set_process_variable(var, result);
        }
        ctx.leave_default().await
    }
}

/// Automatic task that evaluates an expression through the injected
/// evaluator and optionally stores the result.
#[derive(Debug)]
pub struct ScriptTaskBehavior {
    expression: String,
    result_var: Option<String>,
}

impl ScriptTaskBehavior {
    pub fn new(expression: &str, result_var: Option<&str>) -> Self {
        Self {
            expression: expression.to_string(),
            result_var: result_var.map(str::to_string),
        }
    }
}

#[async_trait]
impl NodeBehavior for ScriptTaskBehavior {
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> std::result::Result<(), EngineError> {
        let value = ctx.evaluate(&self.expression)?;
        if let Some(var) = &self.result_var {
            ctx.set_process_variable(var, value);
        }
        ctx.leave_default().await
    }
}

/// Human task: announces a work item and parks the token. A later
/// `"complete"` signal merges the completion payload into the instance
/// variables and leaves.
#[derive(Debug)]
pub struct UserTaskBehavior {
    name: String,
}

impl UserTaskBehavior {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl NodeBehavior for UserTaskBehavior {
    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> std::result::Result<(), EngineError> {
        let item = WorkItem {
            instance_id: ctx.instance().id(),
            token: ctx.token(),
            node: ctx.current_node_id()?,
            name: self.name.clone(),
        };
        ctx.services().work_items.create_work_item(item).await?;
        // Parked until completion is signalled.
        Ok(())
    }

    fn as_signallable(&self) -> Option<&dyn Signallable> {
        Some(self)
    }
}

#[async_trait]
impl Signallable for UserTaskBehavior {
    async fn signal(
        &self,
        ctx: &mut ExecutionContext<'_>,
        event: &str,
        data: HashMap<String, Value>,
    ) -> std::result::Result<(), EngineError> {
        if event != "complete" {
            return Err(EngineError::InvalidArgument(format!(
                "user task '{}' does not understand event '{event}'",
                self.name
            )));
        }
        for (name, value) in data {
            ctx.set_process_variable(&name, value);
        }
        ctx.leave_default().await
    }
}

/// Handler that logs its `msg` param.
#[derive(Debug, Default)]
pub struct LogTaskHandler;

#[async_trait]
impl TaskHandler for LogTaskHandler {
    fn name(&self) -> &str {
        "log"
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, params: Value, _vars: &HashMap<String, Value>) -> Result<Value> {
        if let Some(msg) = params.get("msg").and_then(|v| v.as_str()) {
            info!("[LOG] {}", msg);
        } else {
            info!("[LOG] {:?}", params);
        }
        Ok(Value::Null)
    }
}

/// Handler that performs an HTTP call described by its params.
#[derive(Debug)]
pub struct HttpTaskHandler {
    client: Client,
}

impl HttpTaskHandler {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HttpTaskHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskHandler for HttpTaskHandler {
    fn name(&self) -> &str {
        "http"
    }

    fn validate(&self, params: &Value) -> Result<()> {
        if params.get("url").is_none() {
            return Err(anyhow!("missing required parameter: url"));
        }
        Ok(())
    }

    async fn execute(&self, params: Value, _vars: &HashMap<String, Value>) -> Result<Value> {
        let url = params
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("invalid url"))?;

        let method_str = params.get("method").and_then(|v| v.as_str()).unwrap_or("GET");
        let method = method_str
            .parse::<reqwest::Method>()
            .map_err(|_| anyhow!("invalid HTTP method: {}", method_str))?;

        let mut builder = self.client.request(method, url);

        if let Some(body) = params.get("body") {
            builder = builder.json(body);
        }

        if let Some(headers) = params.get("headers").and_then(|v| v.as_object()) {
            for (k, v) in headers {
                if let Some(v_str) = v.as_str() {
                    builder = builder.header(k, v_str);
                }
            }
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let data = response.json::<Value>().await.unwrap_or(Value::Null);

        Ok(json!({
            "status": status,
            "data": data
        }))
    }
}
