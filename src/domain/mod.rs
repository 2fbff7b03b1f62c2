//! Domain records persisted by the proxy
//!
//! Cache entries and captured requests are plain serde records. They know how
//! to convert to and from `http` types but nothing about storage or transport.

pub mod identifiers;
pub mod records;

pub use identifiers::*;
pub use records::*;
