//! CLI subcommands.

pub mod calibrate;
pub mod devices;
pub mod monitor;
pub mod serve;
