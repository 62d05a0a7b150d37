use std::borrow::Borrow;
use std::sync::Arc;

/// Client identifier, cheap to clone and usable as a map key looked up by `&str`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(Arc<str>);

/// Prefix of identifiers the broker assigns to clients that connect with an
/// empty one.
pub const ASSIGNED_CLIENT_ID_PREFIX: &str = "auto-";

impl ClientId {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        ClientId(value.into())
    }

    pub fn generate(n: u64) -> Self {
        ClientId::new(format!("{}{:016X}", ASSIGNED_CLIENT_ID_PREFIX, n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ClientId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        ClientId::new(value)
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        ClientId::new(value)
    }
}

impl core::fmt::Display for ClientId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
