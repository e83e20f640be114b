//! Comparison operators for condition nodes.
//!
//! A strategy registry: defaults are registered at startup and new operators
//! are a registration, not a new match arm in the node.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

type Operator = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// Registry of named comparison operators.
pub struct OperatorRegistry {
  entries: HashMap<String, Operator>,
}

impl OperatorRegistry {
  pub fn new() -> Self {
    Self {
      entries: HashMap::new(),
    }
  }

  /// A registry with the standard comparison set, each under a word name and
  /// a symbol alias.
  pub fn with_defaults() -> Self {
    let mut registry = Self::new();

    registry.register_aliased(&["equals", "=="], |a, b| compare(a, b) == Some(Ordering::Equal));
    registry.register_aliased(&["not_equals", "!="], |a, b| {
      compare(a, b) != Some(Ordering::Equal)
    });
    registry.register_aliased(&["greater_than", ">"], |a, b| {
      compare(a, b) == Some(Ordering::Greater)
    });
    registry.register_aliased(&["greater_or_equal", ">="], |a, b| {
      matches!(compare(a, b), Some(Ordering::Greater | Ordering::Equal))
    });
    registry.register_aliased(&["less_than", "<"], |a, b| {
      compare(a, b) == Some(Ordering::Less)
    });
    registry.register_aliased(&["less_or_equal", "<="], |a, b| {
      matches!(compare(a, b), Some(Ordering::Less | Ordering::Equal))
    });
    registry.register_aliased(&["contains"], contains);
    registry.register_aliased(&["not_contains"], |a, b| !contains(a, b));
    registry.register_aliased(&["is_empty"], |a, _| text(a).is_empty());
    registry.register_aliased(&["is_not_empty"], |a, _| !text(a).is_empty());

    registry
  }

  pub fn register<F>(&mut self, name: impl Into<String>, operator: F)
  where
    F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
  {
    self.entries.insert(name.into(), Arc::new(operator));
  }

  pub fn lookup(&self, name: &str) -> Option<&Operator> {
    self.entries.get(name)
  }

  fn register_aliased<F>(&mut self, names: &[&str], operator: F)
  where
    F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
  {
    let operator: Operator = Arc::new(operator);
    for name in names {
      self.entries.insert((*name).to_string(), operator.clone());
    }
  }
}

impl Default for OperatorRegistry {
  fn default() -> Self {
    Self::with_defaults()
  }
}

/// Compare two values, numerically when both sides parse as numbers (form
/// rendering yields strings, so `"5" > "3"` must compare as 5 > 3).
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
  if let (Some(a), Some(b)) = (numeric(a), numeric(b)) {
    return a.partial_cmp(&b);
  }
  Some(text(a).cmp(&text(b)))
}

fn numeric(value: &Value) -> Option<f64> {
  match value {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

fn text(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}

fn contains(a: &Value, b: &Value) -> bool {
  match a {
    Value::Array(items) => items.iter().any(|item| compare(item, b) == Some(Ordering::Equal)),
    _ => text(a).contains(&text(b)),
  }
}
