//! Authentication providers for Pyxis sessions
//!
//! Two strategies are supported: a client certificate pair, and Kerberos
//! tickets presented through SPNEGO (`Authorization: Negotiate ...`).
//! Each provider configures a freshly created [`Session`] once, before the
//! session sends anything.

use crate::error::{PyxisError, Result};
use crate::registry::session::{RequestAuthenticator, Session};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Identity, Request};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const CCACHE_ENV: &str = "KRB5CCNAME";

#[async_trait]
pub trait AuthProvider: Send + Sync + fmt::Debug {
    /// Configure authentication on a session that has not been used yet.
    async fn apply_to_session(&self, session: &mut Session) -> Result<()>;
}

/// Client certificate authentication.
#[derive(Debug, Clone)]
pub struct CertificateAuth {
    crt_path: PathBuf,
    key_path: PathBuf,
}

impl CertificateAuth {
    pub fn new(crt_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            crt_path: crt_path.into(),
            key_path: key_path.into(),
        }
    }

    pub fn crt_path(&self) -> &Path {
        &self.crt_path
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    async fn read_pem(path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| PyxisError::Auth(format!("Cannot read {}: {}", path.display(), e)))
    }
}

#[async_trait]
impl AuthProvider for CertificateAuth {
    async fn apply_to_session(&self, session: &mut Session) -> Result<()> {
        let crt = Self::read_pem(&self.crt_path).await?;
        let key = Self::read_pem(&self.key_path).await?;
        let identity = Identity::from_pkcs8_pem(&crt, &key).map_err(|e| {
            PyxisError::Auth(format!(
                "Invalid certificate pair ({}, {}): {}",
                self.crt_path.display(),
                self.key_path.display(),
                e
            ))
        })?;
        session.set_identity(identity)?;
        debug!(session = %session.id(), crt = %self.crt_path.display(), "client certificate installed");
        Ok(())
    }
}

/// Runs the external Kerberos tools.
#[async_trait]
pub trait CommandRunner: Send + Sync + fmt::Debug {
    /// Returns whether the command exited successfully.
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<bool>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<bool> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            debug!(
                program,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "command failed"
            );
        }
        Ok(output.status.success())
    }
}

/// What happened to the ticket cache during a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialRefresh {
    /// A valid ticket already existed and no keytab forced a renewal
    Existing,
    /// kinit was invoked; `success` is its exit status
    Renewed { success: bool },
}

/// Kerberos ticket authentication.
#[derive(Debug, Clone)]
pub struct KerberosAuth {
    principal: String,
    service: String,
    ccache_file: PathBuf,
    keytab: Option<PathBuf>,
    runner: Arc<dyn CommandRunner>,
    /// Outcome of the one refresh shared by every session of this provider
    refreshed: Arc<OnceCell<CredentialRefresh>>,
}

impl KerberosAuth {
    pub fn new(
        principal: impl Into<String>,
        service: impl Into<String>,
        ccache_file: impl Into<PathBuf>,
        keytab: Option<PathBuf>,
    ) -> Self {
        Self {
            principal: principal.into(),
            service: service.into(),
            ccache_file: ccache_file.into(),
            keytab,
            runner: Arc::new(SystemCommandRunner),
            refreshed: Arc::new(OnceCell::new()),
        }
    }

    pub fn with_command_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn keytab(&self) -> Option<&Path> {
        self.keytab.as_deref()
    }

    fn kinit_args(&self) -> Vec<String> {
        let mut args = vec![self.principal.clone(), "-k".to_string()];
        if let Some(keytab) = &self.keytab {
            args.push("-t".to_string());
            args.push(keytab.display().to_string());
        }
        args.push("-c".to_string());
        args.push(self.ccache_file.display().to_string());
        args
    }

    /// Obtain a ticket unless a valid one exists. An explicit keytab always
    /// triggers a fresh kinit.
    pub async fn refresh_credentials(&self) -> Result<CredentialRefresh> {
        let has_ticket = match self.runner.run("klist", &["-s".to_string()]).await {
            Ok(valid) => valid,
            Err(e) => {
                debug!(error = %e, "klist unavailable, assuming no valid ticket");
                false
            }
        };

        if has_ticket && self.keytab.is_none() {
            debug!(principal = %self.principal, "using existing Kerberos ticket");
            return Ok(CredentialRefresh::Existing);
        }

        let args = self.kinit_args();
        let success = self
            .runner
            .run("kinit", &args)
            .await
            .map_err(|e| PyxisError::Auth(format!("Failed to run kinit: {}", e)))?;
        if success {
            info!(principal = %self.principal, ccache = %self.ccache_file.display(), "obtained Kerberos ticket");
        } else {
            warn!(principal = %self.principal, "kinit failed, requests may be rejected");
        }
        self.export_ccache();
        Ok(CredentialRefresh::Renewed { success })
    }

    /// Refresh once per provider. Concurrent callers wait for the first
    /// refresh; a failed refresh is attempted again by the next caller.
    pub async fn ensure_credentials(&self) -> Result<CredentialRefresh> {
        self.refreshed
            .get_or_try_init(|| self.refresh_credentials())
            .await
            .copied()
    }

    fn export_ccache(&self) {
        // SAFETY: the GSSAPI library reads the cache location only from the
        // environment. This runs inside the provider's single refresh, which
        // every session of the provider awaits before its first request.
        unsafe { std::env::set_var(CCACHE_ENV, &self.ccache_file) };
    }
}

#[async_trait]
impl AuthProvider for KerberosAuth {
    async fn apply_to_session(&self, session: &mut Session) -> Result<()> {
        self.ensure_credentials().await?;
        let authenticator = NegotiateAuthenticator::new(&self.service)?;
        session.set_authenticator(Arc::new(authenticator));
        debug!(session = %session.id(), service = %self.service, "Kerberos authentication attached");
        Ok(())
    }
}

/// Attaches a fresh SPNEGO token to every request, without waiting for a
/// 401 challenge. Mutual authentication of the server reply is not checked.
#[derive(Debug, Clone)]
pub struct NegotiateAuthenticator {
    default_host: String,
}

impl NegotiateAuthenticator {
    pub fn new(service: &str) -> Result<Self> {
        let default_host = service_host(service)?;
        if !cfg!(feature = "kerberos") {
            return Err(PyxisError::Config(
                "Kerberos authentication requires building with the `kerberos` feature"
                    .to_string(),
            ));
        }
        Ok(Self { default_host })
    }

    fn target(&self, request: &Request) -> String {
        let host = request.url().host_str().unwrap_or(&self.default_host);
        format!("HTTP@{}", host)
    }

    #[cfg(feature = "kerberos")]
    fn token(&self, target: &str) -> Result<String> {
        use base64::Engine;
        use base64::engine::general_purpose::STANDARD;
        use cross_krb5::{ClientCtx, InitiateFlags};

        let (_pending, token) = ClientCtx::new(InitiateFlags::empty(), None, target, None)
            .map_err(|e| PyxisError::Auth(format!("Cannot create SPNEGO token for {}: {}", target, e)))?;
        Ok(STANDARD.encode(&*token))
    }

    #[cfg(not(feature = "kerberos"))]
    fn token(&self, target: &str) -> Result<String> {
        Err(PyxisError::Config(format!(
            "Cannot create SPNEGO token for {}: built without the `kerberos` feature",
            target
        )))
    }
}

impl RequestAuthenticator for NegotiateAuthenticator {
    fn authorize(&self, request: &mut Request) -> Result<()> {
        let token = self.token(&self.target(request))?;
        let value = HeaderValue::from_str(&format!("Negotiate {}", token))
            .map_err(|e| PyxisError::Auth(format!("Invalid Negotiate token: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}

fn service_host(service: &str) -> Result<String> {
    let with_scheme = if service.contains("://") {
        service.to_string()
    } else {
        format!("https://{}", service)
    };
    url::Url::parse(&with_scheme)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .ok_or_else(|| PyxisError::Config(format!("Invalid Kerberos service '{}'", service)))
}

/// Authentication options as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct AuthSettings {
    pub krb_principal: Option<String>,
    pub krb_ktfile: Option<PathBuf>,
    pub ssl_crtfile: Option<PathBuf>,
    pub ssl_keyfile: Option<PathBuf>,
}

impl AuthSettings {
    /// Pick the provider to use. Kerberos wins when both kinds are given.
    pub fn into_provider(self, service: &str, ccache_file: &Path) -> Result<Arc<dyn AuthProvider>> {
        if let Some(principal) = self.krb_principal {
            return Ok(Arc::new(KerberosAuth::new(
                principal,
                service,
                ccache_file,
                self.krb_ktfile,
            )));
        }
        match (self.ssl_crtfile, self.ssl_keyfile) {
            (Some(crt), Some(key)) => Ok(Arc::new(CertificateAuth::new(crt, key))),
            _ => Err(PyxisError::Config(
                "Either Kerberos principal (and optionally keytab) or .crt and .key files \
                 must be provided for Pyxis authentication."
                    .to_string(),
            )),
        }
    }
}
