//! Command implementations.
//!
//! Each subcommand is implemented in its own module.

pub(crate) mod completions;
pub(crate) mod hex_info;
pub(crate) mod ports;
pub(crate) mod telemetry;
pub(crate) mod update;
