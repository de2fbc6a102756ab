//! Graphite protocol servers.
//!
//! This crate implements the two network protocols of Graphite:
//!
//!  - **Carbon**: a TCP endpoint receiving plaintext lines of the form `<path> <value>
//!    <timestamp>`. Parsed batches are passed to a [`CarbonListener`].
//!  - **Render**: an HTTP endpoint answering `/render`, `/metrics/find` and
//!    `/metrics/index.json` through a [`RenderListener`]. Additional paths can be served by
//!    [`HttpRequestListener`]s.
//!
//! A [`Server`] pairs both engines on one host. The [`Manager`] decides whether to run a single
//! server or one server per network interface, retries failed binds and rolls back a partial
//! start.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use graphite_server::{LocalInterfaces, Manager, ServerConfig};
//!
//! # async fn run() -> Result<(), graphite_server::ManagerError> {
//! let mut manager = Manager::new(ServerConfig::default(), Arc::new(LocalInterfaces));
//! manager.start().await?;
//! println!("listening on {:?}", manager.bound_addresses()?);
//! manager.stop().await
//! # }
//! ```

#![warn(missing_docs)]

mod carbon;
mod config;
mod interfaces;
mod listener;
mod manager;
mod net;
mod render;
mod server;
mod statsd;

pub use self::carbon::CarbonEngine;
pub use self::config::*;
pub use self::interfaces::*;
pub use self::listener::{CarbonListener, HttpRequestListener, ListenerError, RenderListener};
pub use self::manager::{Manager, ManagerError};
pub use self::net::BindError;
pub use self::render::{InvalidListenerPath, RenderEngine};
pub use self::server::{Server, ServerError};
