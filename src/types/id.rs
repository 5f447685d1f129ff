// ABOUTME: Container identifier returned by the runtime.
// ABOUTME: A newtype so IDs are not confused with container names.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[must_use = "IDs reference containers and should not be ignored"]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
