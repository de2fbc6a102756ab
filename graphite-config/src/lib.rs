//! Configuration for the Graphite CLI and servers.
//!
//! The configuration lives in a folder holding a single `config.yml`. Every section and field is
//! optional and falls back to its default:
//!
//! ```yaml
//! graphite:
//!   host: 0.0.0.0
//!   carbon_port: 2003
//!   render_port: 8080
//! logging:
//!   level: info
//! store:
//!   kind: memory
//! ```
#![warn(missing_docs)]

mod config;

pub use crate::config::*;
