//! Form rendering using minijinja templates.
//!
//! Every string in a node's `form` map is a template rendered against the
//! incoming output just before execution:
//!
//! ```json
//! { "field": "{{ data.webhook.data.body.user }}", "greeting": "Hello {{ data.name }}!" }
//! ```
//!
//! The context exposes `data` and `metadata` from the upstream output.
//! Objects and arrays are walked recursively; non-string values pass through
//! unchanged. Strict validation happens here, after rendering - structural
//! readiness checks earlier in the lifecycle only require template-bearing
//! fields to be non-empty.

use minijinja::Environment;
use serde_json::{Map, Value};

use crate::error::NodeError;
use crate::output::NodeOutput;

/// Render a node's form against an incoming output.
pub fn render_form(
  node_id: &str,
  form: &Map<String, Value>,
  input: &NodeOutput,
) -> Result<Map<String, Value>, NodeError> {
  let env = Environment::new();
  let context = minijinja::Value::from_serialize(&serde_json::json!({
    "data": input.data,
    "metadata": input.metadata,
  }));

  let mut rendered = Map::new();
  for (field, value) in form {
    rendered.insert(field.clone(), render_value(&env, node_id, field, value, &context)?);
  }
  Ok(rendered)
}

fn render_value(
  env: &Environment<'_>,
  node_id: &str,
  field: &str,
  value: &Value,
  context: &minijinja::Value,
) -> Result<Value, NodeError> {
  match value {
    Value::String(template) => {
      let out = env
        .render_str(template, context.clone())
        .map_err(|e| NodeError::Template {
          node_id: node_id.to_string(),
          field: field.to_string(),
          message: e.to_string(),
        })?;
      Ok(Value::String(out))
    }
    Value::Array(items) => {
      let rendered: Result<Vec<Value>, NodeError> = items
        .iter()
        .map(|item| render_value(env, node_id, field, item, context))
        .collect();
      Ok(Value::Array(rendered?))
    }
    Value::Object(map) => {
      let mut rendered = Map::new();
      for (key, item) in map {
        rendered.insert(key.clone(), render_value(env, node_id, field, item, context)?);
      }
      Ok(Value::Object(rendered))
    }
    other => Ok(other.clone()),
  }
}
