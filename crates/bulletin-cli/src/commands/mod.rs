//! Subcommand implementations.

pub mod converge_once;
pub mod simulate;
