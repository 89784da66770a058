//! Newtype wrappers for identifiers to ensure type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Create a new id from a string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a new random id.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Get the inner string reference.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner string.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id! {
    /// Unique identifier for a Task.
    TaskId
}

string_id! {
    /// Unique identifier for a task-processor node.
    ProcessorId
}

string_id! {
    /// Unique identifier for a bus message, used for de-duplication.
    MessageId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_unique() {
        assert_ne!(TaskId::generate(), TaskId::generate());
        assert_ne!(ProcessorId::generate(), ProcessorId::generate());
    }

    #[test]
    fn test_roundtrip_through_string() {
        let id = TaskId::new("task-1");
        assert_eq!(id.as_str(), "task-1");
        assert_eq!(TaskId::from(id.clone().into_inner()), id);
        assert_eq!(format!("{}", MessageId::new("m-1")), "m-1");
    }
}
