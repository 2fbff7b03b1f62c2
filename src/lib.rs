//! Replay Cache - a transparent caching reverse proxy
//!
//! Requests are forwarded to an upstream chosen by path prefix. Every upstream
//! response answered with `200 OK` is captured into a document store keyed by
//! request URL, and later requests for the same URL are replayed from the store
//! without contacting the upstream again.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod proxy;

pub use application::Application;
pub use error::{Error, Result};
