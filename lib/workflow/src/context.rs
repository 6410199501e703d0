//! Run-scoped variables visible to condition expressions and executors.
//!
//! The context holds the run input under `input` and the output of every
//! node that has succeeded under the node's id:
//!
//! ```text
//! {
//!   "input": { "total": 240 },
//!   "fetch": { "status": 200, "items": [ ... ] }
//! }
//! ```
//!
//! Paths are dotted (`fetch.items.0.sku`); numeric segments index arrays.

use crate::node::NodeId;
use serde_json::{Map, Value as JsonValue};

/// Top-level key holding the run input.
pub const INPUT_KEY: &str = "input";

/// Variables of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableContext {
    variables: Map<String, JsonValue>,
}

impl VariableContext {
    /// Creates a context holding only the run input.
    #[must_use]
    pub fn new(input: Map<String, JsonValue>) -> Self {
        let mut variables = Map::new();
        variables.insert(INPUT_KEY.to_string(), JsonValue::Object(input));
        Self { variables }
    }

    /// Returns the run input.
    #[must_use]
    pub fn input(&self) -> &JsonValue {
        self.variables.get(INPUT_KEY).unwrap_or(&JsonValue::Null)
    }

    /// Records the output of a successful node.
    pub fn set_output(&mut self, node_id: &NodeId, output: JsonValue) {
        self.variables.insert(node_id.to_string(), output);
    }

    /// Returns a node's recorded output.
    #[must_use]
    pub fn output(&self, node_id: &NodeId) -> Option<&JsonValue> {
        self.variables.get(node_id.as_str())
    }

    /// Resolves a dotted path such as `input.customer.email`.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<&JsonValue> {
        let segments: Vec<&str> = path.split('.').collect();
        self.resolve_segments(&segments)
    }

    /// Resolves a path that has already been split into segments.
    #[must_use]
    pub fn resolve_segments<S: AsRef<str>>(&self, segments: &[S]) -> Option<&JsonValue> {
        let (first, rest) = segments.split_first()?;
        let mut current = self.variables.get(first.as_ref())?;
        for segment in rest {
            let segment = segment.as_ref();
            current = match current {
                JsonValue::Object(map) => map.get(segment)?,
                JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Returns every variable as one JSON object.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(self.variables.clone())
    }
}
