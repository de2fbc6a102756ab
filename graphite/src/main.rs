//! The Graphite server binary.
//!
//! Runs the Carbon plaintext ingestion server and the Render HTTP API on top of a storage backend
//! selected in the configuration. Without a subcommand, `graphite` runs the servers with the
//! config folder `.graphite` in the current directory, or with defaults if it does not exist.
//!
//! ```text
//! graphite config init
//! graphite run --carbon-port 2003 --render-port 8080 --store memory
//! ```

mod cli;
mod setup;

use std::process;

#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            graphite_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
