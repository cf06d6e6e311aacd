//! Registry module for Pyxis API interactions
//!
//! This module provides the sessions, authentication and client logic used to
//! talk to the Pyxis REST API: operator indices, repository metadata and
//! container signatures.

pub mod auth;
pub mod client;
pub mod pagination;
pub mod parallel;
pub mod response;
pub mod session;
pub mod worker;

pub use auth::{AuthProvider, AuthSettings, CertificateAuth, KerberosAuth};
pub use client::{Client, ClientBuilder, INTERNAL_REGISTRY, PARTNER_REGISTRY, RegistrySelection};
pub use session::{ApiResponse, RequestOptions, Session, SessionId};
pub use worker::WorkerId;
