//! Command line interface module
//!
//! This module provides argument parsing, `@file` input resolution and the
//! runner that maps each subcommand onto a client operation.

pub mod args;
pub mod input;
pub mod runner;

pub use args::{Args, Command, PyxisArgs};
pub use runner::Runner;
