//! hieradata CLI library
//!
//! Exposes the CLI entry point so other binaries can embed the `hieradata`
//! command.

mod cli;

pub use cli::run;
