//! Editor-assigned identifiers for nodes and connections.
//!
//! Unlike workflow and run ids these are plain strings: the graph editor
//! chooses them (`"fetch-orders"`, `"e1-2"`) and the engine only requires
//! that they are unique within one workflow. Fresh ids use a ULID suffix.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use ulid::Ulid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident => $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generates a fresh, unique identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Ulid::new()))
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifies a node within one workflow.
    NodeId => "node"
);

string_id!(
    /// Identifies a connection within one workflow.
    ConnectionId => "conn"
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_are_prefixed_and_unique() {
        let a = NodeId::new();
        let b = NodeId::new();
        assert!(a.as_str().starts_with("node_"));
        assert!(ConnectionId::new().as_str().starts_with("conn_"));
        assert_ne!(a, b);
    }

    #[test]
    fn ids_order_lexicographically() {
        let mut ids = vec![NodeId::from("b"), NodeId::from("a"), NodeId::from("c")];
        ids.sort();
        let names: Vec<_> = ids.iter().map(NodeId::as_str).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn lookup_by_str() {
        let set: HashSet<NodeId> = [NodeId::from("fetch")].into_iter().collect();
        assert!(set.contains("fetch"));
    }
}
