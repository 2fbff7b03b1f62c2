//! Identifiers attached to each proxied request
//!
//! Request identifiers are UUID v7 so that log lines and captured records sort
//! by arrival time.

use nutype::nutype;
use uuid::Uuid;

/// Correlates log lines, captured requests and cache writes for one request
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRef
))]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }

    /// Accepts an incoming `x-request-id` value when it is a valid UUID
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self::new)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::generate()
    }
}
