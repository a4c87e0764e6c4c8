//! CLI command implementations

pub mod args;
pub mod commands;
pub mod error;

pub use args::{Cli, Commands};
pub use commands::execute;
pub use error::CliError;
