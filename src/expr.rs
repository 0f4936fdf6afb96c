use std::collections::HashMap;

use anyhow::anyhow;
use evalexpr::{
    ContextWithMutableVariables, DefaultNumericTypes, HashMapContext, eval_boolean_with_context,
    eval_with_context,
};
use serde_json::{Value, json};

use crate::error::EngineError;

/// Injected expression-evaluation collaborator.
///
/// The engine never constructs a scripting runtime itself; sequence-flow
/// conditions and script tasks go through this trait.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, vars: &HashMap<String, Value>)
    -> Result<Value, EngineError>;

    fn evaluate_condition(
        &self,
        expression: &str,
        vars: &HashMap<String, Value>,
    ) -> Result<bool, EngineError>;
}

/// Default evaluator backed by `evalexpr`.
#[derive(Debug, Default)]
pub struct EvalexprEvaluator;

impl EvalexprEvaluator {
    fn build_context(
        expression: &str,
        vars: &HashMap<String, Value>,
    ) -> Result<HashMapContext<DefaultNumericTypes>, EngineError> {
        let mut eval_ctx = HashMapContext::<DefaultNumericTypes>::new();
        for (k, v) in vars {
            let ev = match v {
                Value::String(s) => Some(evalexpr::Value::String(s.clone())),
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Some(evalexpr::Value::Int(i))
                    } else {
                        n.as_f64().map(evalexpr::Value::Float)
                    }
                }
                Value::Bool(b) => Some(evalexpr::Value::Boolean(*b)),
                _ => None,
            };
            if let Some(ev) = ev {
                eval_ctx
                    .set_value(k.clone(), ev)
                    .map_err(|e| EngineError::Expression {
                        expression: expression.to_string(),
                        source: anyhow!(e.to_string()),
                    })?;
            }
        }
        Ok(eval_ctx)
    }
}

/// Strips an optional `${...}` wrapper from an expression.
pub fn extract_expression(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("${")
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(trimmed)
        .trim()
}

impl ExpressionEvaluator for EvalexprEvaluator {
    fn evaluate(
        &self,
        expression: &str,
        vars: &HashMap<String, Value>,
    ) -> Result<Value, EngineError> {
        let expr = extract_expression(expression);
        let eval_ctx = Self::build_context(expression, vars)?;

        let result = eval_with_context(expr, &eval_ctx).map_err(|e| EngineError::Expression {
            expression: expression.to_string(),
            source: anyhow!(e.to_string()),
        })?;

        let value = match result {
            evalexpr::Value::String(s) => Value::String(s),
            evalexpr::Value::Int(i) => json!(i),
            evalexpr::Value::Float(f) => json!(f),
            evalexpr::Value::Boolean(b) => Value::Bool(b),
            _ => Value::Null,
        };
        Ok(value)
    }

    fn evaluate_condition(
        &self,
        expression: &str,
        vars: &HashMap<String, Value>,
    ) -> Result<bool, EngineError> {
        let expr = extract_expression(expression);
        let eval_ctx = Self::build_context(expression, vars)?;

        eval_boolean_with_context(expr, &eval_ctx).map_err(|e| EngineError::Expression {
            expression: expression.to_string(),
            source: anyhow!(e.to_string()),
        })
    }
}
