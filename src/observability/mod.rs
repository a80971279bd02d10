//! Observability for archive runs.
//!
//! Every batch boundary emits structured `tracing` events; this module
//! installs the subscriber that renders them (pretty, compact or JSON).

#[cfg(feature = "cli")]
mod tracing_init;

#[cfg(feature = "cli")]
pub use tracing_init::*;
