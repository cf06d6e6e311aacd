//! Pyxis client library
//!
//! This file serves as the library root for the pubtools-pyxis crate,
//! organizing and exposing the modules that make up the client and its CLI.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod registry;

pub use config::ClientConfig;
pub use error::{PyxisError, Result};
pub use output::OutputManager;
pub use registry::{Client, ClientBuilder};
