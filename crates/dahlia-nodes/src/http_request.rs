use async_trait::async_trait;
use dahlia_node::{Node, NodeConfig, NodeError, NodeOutput, NodeVariant, RunState};
use serde_json::{Map, Value, json};
use tracing::debug;

/// Performs an HTTP request and merges the response into the payload.
///
/// Form: `url` (template), optional `method` (default GET), `headers`
/// (object of templates) and `body` (sent as JSON on methods with a body).
/// The response lands under a `http` key as `{ status, body }`, with the
/// body parsed as JSON when possible.
pub struct HttpRequest {
  config: NodeConfig,
  state: RunState,
  client: reqwest::Client,
}

impl HttpRequest {
  pub fn new(config: NodeConfig) -> Self {
    Self {
      config,
      state: RunState::new(),
      client: reqwest::Client::new(),
    }
  }

  fn method(&self, form: &Map<String, Value>) -> Result<reqwest::Method, NodeError> {
    let raw = form
      .get("method")
      .and_then(Value::as_str)
      .unwrap_or("GET")
      .to_ascii_uppercase();
    reqwest::Method::from_bytes(raw.as_bytes())
      .map_err(|_| NodeError::execution(&self.config.id, format!("invalid http method '{raw}'")))
  }
}

#[async_trait]
impl Node for HttpRequest {
  fn identifier(&self) -> &str {
    "http-request"
  }

  fn config(&self) -> &NodeConfig {
    &self.config
  }

  fn state(&self) -> &RunState {
    &self.state
  }

  fn variant(&self) -> NodeVariant {
    NodeVariant::Blocking
  }

  fn required_fields(&self) -> &[&str] {
    &["url"]
  }

  async fn execute(
    &self,
    form: Map<String, Value>,
    mut input: NodeOutput,
  ) -> Result<NodeOutput, NodeError> {
    let url = form
      .get("url")
      .and_then(Value::as_str)
      .ok_or_else(|| NodeError::execution(&self.config.id, "url is not configured"))?;
    let method = self.method(&form)?;

    let mut request = self.client.request(method.clone(), url);
    if let Some(Value::Object(headers)) = form.get("headers") {
      for (name, value) in headers {
        let value = match value {
          Value::String(s) => s.clone(),
          other => other.to_string(),
        };
        request = request.header(name, value);
      }
    }
    if let Some(body) = form.get("body")
      && method != reqwest::Method::GET
      && method != reqwest::Method::HEAD
    {
      request = request.json(body);
    }

    debug!(node_id = %self.config.id, method = %method, url = %url, "http request");
    let response = request
      .send()
      .await
      .map_err(|e| NodeError::transport(&self.config.id, e.to_string()))?;

    let status = response.status().as_u16();
    let text = response
      .text()
      .await
      .map_err(|e| NodeError::transport(&self.config.id, e.to_string()))?;
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

    let iteration = self.state.execution_count() + 1;
    let key = self.unique_output_key(&input, "http");
    input.data.insert(key, json!({ "status": status, "body": body }));
    input.note_provenance(&self.config.id, "http_request", iteration);
    input.id = self.config.id.clone();
    Ok(input)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn node_with(form: Map<String, Value>) -> HttpRequest {
    HttpRequest::new(NodeConfig::new("fetch", "http-request").with_form(form))
  }

  #[test]
  fn url_is_required() {
    let node = node_with(Map::new());
    let readiness = node.is_ready();
    assert!(!readiness.is_ok());
    assert!(readiness.errors().contains_key("url"));
  }

  #[test]
  fn templated_url_passes_readiness() {
    let mut form = Map::new();
    form.insert("url".to_string(), json!("{{ data.endpoint }}"));
    assert!(node_with(form).is_ready().is_ok());
  }

  #[test]
  fn method_defaults_to_get_and_normalizes_case() {
    let node = node_with(Map::new());
    assert_eq!(node.method(&Map::new()).unwrap(), reqwest::Method::GET);

    let mut form = Map::new();
    form.insert("method".to_string(), json!("post"));
    assert_eq!(node.method(&form).unwrap(), reqwest::Method::POST);

    form.insert("method".to_string(), json!("not a method"));
    assert!(node.method(&form).is_err());
  }
}
