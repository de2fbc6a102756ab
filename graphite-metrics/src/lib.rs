//! Data model of the Graphite protocols.
//!
//! A [`Metrics`] value is a named series of [`DataPoint`]s. Series arrive over the Carbon
//! plaintext protocol, one sample per line:
//!
//! ```text
//! <dot.delimited.name> <float value> <unix seconds>
//! ```
//!
//! Whole feeds are parsed into a [`MetricsSet`], which merges lines of the same series and keeps
//! every valid line even when others are rejected:
//!
//! ```
//! use graphite_metrics::MetricsSet;
//!
//! let feed = MetricsSet::parse_plain_text(b"servers.web.cpu 0.5 1500000000\nbroken\n");
//! assert_eq!(feed.metrics.data_point_count(), 1);
//! assert!(feed.error.is_some());
//! ```
//!
//! Render requests are described by a [`Query`], whose `from` and `until` bounds are given as
//! time [`expression`]s such as `-1h`, `now` or `04:00_20170101`.
#![warn(missing_docs)]

mod datapoint;
pub mod expression;
mod metrics;
mod query;
mod set;
mod time;

pub use self::datapoint::*;
pub use self::metrics::*;
pub use self::query::*;
pub use self::set::*;
pub use self::time::*;
