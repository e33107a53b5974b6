//! A concrete error value carrying a message, an optional code, and
//! optional structured metadata.
//!
//! Policies and combinators in this crate are generic over the caller's
//! error type; `Fault` is the batteries-included choice for callers that
//! do not want to define their own.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

/// Error value with a human message, an optional machine code, and an
/// optional metadata mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    message: String,
    code: Option<String>,
    metadata: Option<BTreeMap<String, Value>>,
}

impl Fault {
    /// Create a fault from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), code: None, metadata: None }
    }

    /// Attach a machine-readable code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach a metadata entry. Creates the mapping on first use.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.get_or_insert_with(BTreeMap::new).insert(key.into(), value.into());
        self
    }

    /// The fault produced when a value is extracted from an absent or
    /// failed variant (`or_fault`, `expect_valid` and friends).
    pub fn unwrap_failure(what: impl fmt::Display) -> Self {
        Self::new(format!("attempted to unwrap {what}, but no value was present"))
            .with_code("unwrap")
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn metadata(&self) -> Option<&BTreeMap<String, Value>> {
        self.metadata.as_ref()
    }

    /// True when this fault carries the distinguished unwrap code.
    pub fn is_unwrap_failure(&self) -> bool {
        self.code.as_deref() == Some("unwrap")
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} [{}]", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for Fault {}

impl From<String> for Fault {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for Fault {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
