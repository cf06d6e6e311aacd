//! Command-line argument parsing

use crate::config::DEFAULT_REQUEST_THREADS_LIMIT;
use crate::registry::AuthSettings;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pubtools-pyxis")]
#[command(about = "Query and update Pyxis: operator indices, repository metadata and container signatures")]
#[command(version, author)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

/// Connection and authentication options shared by every subcommand.
#[derive(ClapArgs, Debug, Clone)]
pub struct PyxisArgs {
    #[arg(long = "pyxis-server", env = "PYXIS_SERVER", help = "Pyxis service hostname")]
    pub pyxis_server: String,

    #[arg(long = "pyxis-insecure", help = "Allow insecure connection to Pyxis")]
    pub pyxis_insecure: bool,

    #[arg(
        long = "pyxis-krb-principal",
        env = "PYXIS_KRB_PRINCIPAL",
        help = "Pyxis kerberos principal in form: name@REALM"
    )]
    pub pyxis_krb_principal: Option<String>,

    #[arg(
        long = "pyxis-krb-ktfile",
        env = "PYXIS_KRB_KTFILE",
        help = "Pyxis Kerberos client keytab. Used for login if TGT is not available"
    )]
    pub pyxis_krb_ktfile: Option<PathBuf>,

    #[arg(
        long = "pyxis-ssl-crtfile",
        env = "PYXIS_SSL_CRTFILE",
        help = "Path to .crt file for the SSL authentication"
    )]
    pub pyxis_ssl_crtfile: Option<PathBuf>,

    #[arg(
        long = "pyxis-ssl-keyfile",
        env = "PYXIS_SSL_KEYFILE",
        help = "Path to .key file for the SSL authentication"
    )]
    pub pyxis_ssl_keyfile: Option<PathBuf>,

    #[arg(long = "verbose", short = 'v', help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(long = "quiet", short = 'q', conflicts_with = "verbose", help = "Only log errors")]
    pub quiet: bool,
}

impl PyxisArgs {
    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            krb_principal: self.pyxis_krb_principal.clone(),
            krb_ktfile: self.pyxis_krb_ktfile.clone(),
            ssl_crtfile: self.pyxis_ssl_crtfile.clone(),
            ssl_keyfile: self.pyxis_ssl_keyfile.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Get index images satisfying an OCP versions range
    GetOperatorIndices {
        #[command(flatten)]
        pyxis: PyxisArgs,

        #[arg(long = "ocp-versions-range", help = "Supported OCP versions range")]
        ocp_versions_range: String,

        #[arg(long = "organization", help = "Organization as understood by IIB")]
        organization: Option<String>,
    },

    /// Get metadata of a repository
    GetRepoMetadata {
        #[command(flatten)]
        pyxis: PyxisArgs,

        #[arg(long = "repo-name", help = "Name of the repository")]
        repo_name: String,

        #[arg(
            long = "custom-registry",
            help = "Custom registry address. Used instead of the default addresses"
        )]
        custom_registry: Option<String>,

        #[arg(long = "only-internal-registry", help = "Check only internal registry")]
        only_internal_registry: bool,

        #[arg(long = "only-partner-registry", help = "Check only partner registry")]
        only_partner_registry: bool,
    },

    /// Upload signatures from JSON or a file
    UploadSignatures {
        #[command(flatten)]
        pyxis: PyxisArgs,

        #[arg(
            long = "signatures",
            help = "Signatures in JSON format or an @-prefixed path to a JSON file, e.g. --signatures=@/tmp/sigs.json"
        )]
        signatures: String,

        #[arg(
            long = "request-threads",
            default_value_t = DEFAULT_REQUEST_THREADS_LIMIT,
            help = "Maximum number of parallel requests"
        )]
        request_threads: usize,
    },

    /// Get container signature metadata
    GetSignatures {
        #[command(flatten)]
        pyxis: PyxisArgs,

        #[arg(
            long = "manifest-digest",
            help = "Comma separated manifest digests to search, or an @-prefixed JSON file"
        )]
        manifest_digest: Option<String>,

        #[arg(
            long = "reference",
            help = "Comma separated container pull references to search, or an @-prefixed JSON file"
        )]
        reference: Option<String>,
    },

    /// Remove existing signatures
    DeleteSignatures {
        #[command(flatten)]
        pyxis: PyxisArgs,

        #[arg(
            long = "ids",
            help = "Comma separated signature IDs to remove, or an @-prefixed JSON file"
        )]
        ids: String,

        #[arg(
            long = "request-threads",
            default_value_t = DEFAULT_REQUEST_THREADS_LIMIT,
            help = "Maximum number of parallel requests"
        )]
        request_threads: usize,
    },
}

impl Command {
    pub fn pyxis(&self) -> &PyxisArgs {
        match self {
            Command::GetOperatorIndices { pyxis, .. }
            | Command::GetRepoMetadata { pyxis, .. }
            | Command::UploadSignatures { pyxis, .. }
            | Command::GetSignatures { pyxis, .. }
            | Command::DeleteSignatures { pyxis, .. } => pyxis,
        }
    }

    /// What the command does, for error messages.
    pub fn action(&self) -> &'static str {
        match self {
            Command::GetOperatorIndices { .. } => "getting operator indices",
            Command::GetRepoMetadata { .. } => "getting repository metadata",
            Command::UploadSignatures { .. } => "uploading signatures",
            Command::GetSignatures { .. } => "getting signatures",
            Command::DeleteSignatures { .. } => "deleting signatures",
        }
    }

    pub fn request_threads(&self) -> usize {
        match self {
            Command::UploadSignatures { request_threads, .. }
            | Command::DeleteSignatures { request_threads, .. } => *request_threads,
            _ => DEFAULT_REQUEST_THREADS_LIMIT,
        }
    }
}
