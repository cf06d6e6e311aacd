// This file contains the implementation of the Client struct, which talks to
// the Pyxis REST API: per-worker sessions, the five domain operations, the
// paging protocol and registry fallback.

use crate::config::ClientConfig;
use crate::error::{PyxisError, Result};
use crate::registry::auth::AuthProvider;
use crate::registry::pagination::{Envelope, signature_filter};
use crate::registry::response::handle_json_response;
use crate::registry::session::{ApiResponse, RequestOptions, Session};
use crate::registry::worker::WorkerId;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

pub const INTERNAL_REGISTRY: &str = "registry.access.redhat.com";
pub const PARTNER_REGISTRY: &str = "registry.connect.redhat.com";

const SIGNATURES_ENDPOINT: &str = "signatures";

/// Which registry (or registries) repository metadata is looked up in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrySelection {
    Custom(String),
    InternalOnly,
    PartnerOnly,
    /// Internal first; partner only when internal answers 404
    InternalThenPartner,
}

impl RegistrySelection {
    pub fn resolve(
        custom_registry: Option<&str>,
        only_internal: bool,
        only_partner: bool,
    ) -> Result<Self> {
        if only_internal && only_partner {
            return Err(PyxisError::Config(
                "Can't check only internal registry as well as only partner registry".to_string(),
            ));
        }
        Ok(match custom_registry.filter(|r| !r.is_empty()) {
            Some(registry) => RegistrySelection::Custom(registry.to_string()),
            None if only_internal => RegistrySelection::InternalOnly,
            None if only_partner => RegistrySelection::PartnerOnly,
            None => RegistrySelection::InternalThenPartner,
        })
    }
}

fn repository_endpoint(registry: &str, repo_name: &str) -> String {
    format!("repositories/registry/{}/repository/{}", registry, repo_name)
}

pub struct ClientBuilder {
    config: ClientConfig,
    auth: Option<Arc<dyn AuthProvider>>,
}

impl ClientBuilder {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            config: ClientConfig::new(hostname),
            auth: None,
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.config.retries = retries;
        self
    }

    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.config.backoff_factor = backoff_factor;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.config.verify = verify;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.config.threads = threads;
        self
    }

    pub fn with_auth(mut self, auth: Option<Arc<dyn AuthProvider>>) -> Self {
        self.auth = auth;
        self
    }

    pub fn build(self) -> Result<Client> {
        self.config.validate()?;
        Ok(Client {
            inner: Arc::new(ClientInner {
                config: self.config,
                auth: self.auth,
                sessions: Mutex::new(HashMap::new()),
            }),
        })
    }
}

struct ClientInner {
    config: ClientConfig,
    auth: Option<Arc<dyn AuthProvider>>,
    sessions: Mutex<HashMap<WorkerId, Arc<Session>>>,
}

/// Pyxis requests wrapper. Cheap to clone; clones share the session cache.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(config: ClientConfig, auth: Option<Arc<dyn AuthProvider>>) -> Result<Self> {
        ClientBuilder::new(config.hostname.clone())
            .with_config(config)
            .with_auth(auth)
            .build()
    }

    pub fn builder(hostname: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(hostname)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<WorkerId, Arc<Session>>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Session of the calling worker, created and authenticated on first use.
    pub async fn session(&self) -> Result<Arc<Session>> {
        let worker = WorkerId::current();
        let cached = self.sessions().get(&worker).cloned();
        if let Some(session) = cached {
            return Ok(session);
        }

        let mut session = Session::from_config(&self.inner.config)?;
        if let Some(auth) = &self.inner.auth {
            auth.apply_to_session(&mut session).await?;
        }
        debug!(%worker, session = %session.id(), host = %session.hostname(), "created session");

        let session = Arc::new(session);
        Ok(self.sessions().entry(worker).or_insert(session).clone())
    }

    /// Drop the calling worker's session; the next request creates a new one.
    pub fn reset_session(&self) {
        self.evict(WorkerId::current());
    }

    pub(crate) fn evict(&self, worker: WorkerId) {
        let removed = self.sessions().remove(&worker);
        if let Some(session) = removed {
            debug!(%worker, session = %session.id(), "discarding session");
            if let Ok(mut session) = Arc::try_unwrap(session) {
                session.close();
            }
        }
    }

    /// Number of live cached sessions.
    pub fn cached_sessions(&self) -> usize {
        self.sessions().len()
    }

    /// Get a list of index images satisfying versioning and organization conditions.
    pub async fn get_operator_indices(
        &self,
        ocp_versions_range: &str,
        organization: Option<&str>,
    ) -> Result<Vec<Value>> {
        let mut options = RequestOptions::new().query("ocp_versions_range", ocp_versions_range);
        if let Some(organization) = organization.filter(|o| !o.is_empty()) {
            options = options.query("organization", organization);
        }

        let response = self.session().await?.get("operators/indices", options).await?;
        let body = handle_json_response(response).await?;
        match body {
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::Array(data)) => Ok(data),
                _ => Err(PyxisError::Protocol(
                    "operator indices response has no 'data' list".to_string(),
                )),
            },
            _ => Err(PyxisError::Protocol(
                "operator indices response is not an object".to_string(),
            )),
        }
    }

    /// Get metadata of a repository.
    ///
    /// Unless a custom registry or a single registry is requested, the
    /// internal registry is checked first and the partner registry only if
    /// the repository is not found there.
    pub async fn get_repository_metadata(
        &self,
        repo_name: &str,
        custom_registry: Option<&str>,
        only_internal: bool,
        only_partner: bool,
    ) -> Result<Value> {
        let selection = RegistrySelection::resolve(custom_registry, only_internal, only_partner)?;
        let session = self.session().await?;
        let get = |registry: &str| {
            let endpoint = repository_endpoint(registry, repo_name);
            let session = session.clone();
            async move { session.get(&endpoint, RequestOptions::new()).await }
        };

        let response = match &selection {
            RegistrySelection::Custom(registry) => get(registry).await?,
            RegistrySelection::InternalOnly => get(INTERNAL_REGISTRY).await?,
            RegistrySelection::PartnerOnly => get(PARTNER_REGISTRY).await?,
            RegistrySelection::InternalThenPartner => {
                let response = get(INTERNAL_REGISTRY).await?;
                if response.status() == StatusCode::NOT_FOUND {
                    debug!(repo = repo_name, "not in internal registry, trying partner registry");
                    get(PARTNER_REGISTRY).await?
                } else {
                    response
                }
            }
        };
        handle_json_response(response).await
    }

    /// Fetch every page of a paginated endpoint, in page order.
    pub async fn get_items_from_all_pages(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<Vec<Value>> {
        let session = self.session().await?;
        let first = session.get(endpoint, options.clone()).await?;
        let envelope = Envelope::from_value(handle_json_response(first).await?)?;

        let total_pages = envelope.total_pages();
        let mut items = envelope.data;
        for page in 1..total_pages {
            debug!(endpoint, page, total_pages, "fetching page");
            let response = session
                .get(endpoint, options.clone().query("page", page.to_string()))
                .await?;
            let envelope = Envelope::from_value(handle_json_response(response).await?)?;
            items.extend(envelope.data);
        }
        Ok(items)
    }

    /// Get container signature metadata matching manifest digests and/or
    /// pull references.
    pub async fn get_container_signatures<S: AsRef<str>>(
        &self,
        manifest_digests: Option<&[S]>,
        references: Option<&[S]>,
    ) -> Result<Vec<Value>> {
        let filter = signature_filter(manifest_digests, references).ok_or_else(|| {
            PyxisError::Config(
                "At least one manifest digest or reference filter is required".to_string(),
            )
        })?;
        self.get_items_from_all_pages(SIGNATURES_ENDPOINT, RequestOptions::new().query("filter", filter))
            .await
    }

    /// Upload signatures in parallel. Results come back in completion order.
    pub async fn upload_signatures(&self, signatures: Vec<Value>) -> Result<Vec<Value>> {
        let count = signatures.len();
        let client = self.clone();
        let results = self
            .do_parallel_requests(
                move |signature: Value| {
                    let client = client.clone();
                    async move { client.post_signature(signature).await }
                },
                signatures,
            )
            .await?;
        info!(count, "uploaded signatures");
        Ok(results)
    }

    async fn post_signature(&self, signature: Value) -> Result<ApiResponse> {
        let response = self
            .session()
            .await?
            .post(SIGNATURES_ENDPOINT, RequestOptions::new().json(signature.clone()))
            .await?;
        if response.status() != StatusCode::INTERNAL_SERVER_ERROR {
            return Ok(response);
        }

        // A 500 here usually comes from a misbehaving sidecar; a new
        // connection pool gets a healthy one.
        warn!(worker = %WorkerId::current(), "signature upload failed with 500, retrying on a new session");
        drop(response);
        self.reset_session();
        self.session()
            .await?
            .post(SIGNATURES_ENDPOINT, RequestOptions::new().json(signature))
            .await
    }

    /// Remove signatures by id in parallel. Already-deleted ids are not an error.
    pub async fn delete_container_signatures(&self, signature_ids: Vec<String>) -> Result<Vec<Value>> {
        let count = signature_ids.len();
        let client = self.clone();
        let results = self
            .do_parallel_requests(
                move |id: String| {
                    let client = client.clone();
                    async move {
                        let endpoint = format!("{}/id/{}", SIGNATURES_ENDPOINT, id);
                        client.session().await?.delete(&endpoint, RequestOptions::new()).await
                    }
                },
                signature_ids,
            )
            .await?;
        info!(count, "deleted signatures");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_selection() {
        assert_eq!(
            RegistrySelection::resolve(Some("some.registry.com"), false, false).unwrap(),
            RegistrySelection::Custom("some.registry.com".to_string())
        );
        assert_eq!(
            RegistrySelection::resolve(Some("some.registry.com"), true, false).unwrap(),
            RegistrySelection::Custom("some.registry.com".to_string())
        );
        assert_eq!(
            RegistrySelection::resolve(None, true, false).unwrap(),
            RegistrySelection::InternalOnly
        );
        assert_eq!(
            RegistrySelection::resolve(None, false, true).unwrap(),
            RegistrySelection::PartnerOnly
        );
        assert_eq!(
            RegistrySelection::resolve(None, false, false).unwrap(),
            RegistrySelection::InternalThenPartner
        );
        assert!(matches!(
            RegistrySelection::resolve(None, true, true),
            Err(PyxisError::Config(_))
        ));
        assert!(RegistrySelection::resolve(Some("x"), true, true).is_err());
    }

    #[test]
    fn test_repository_endpoint() {
        assert_eq!(
            repository_endpoint(INTERNAL_REGISTRY, "some-repo/name"),
            "repositories/registry/registry.access.redhat.com/repository/some-repo/name"
        );
    }

    #[test]
    fn test_build_is_lazy() {
        let client = Client::builder("pyxis.example.com")
            .with_retries(5)
            .with_backoff_factor(3.0)
            .with_verify(true)
            .build()
            .unwrap();
        assert_eq!(client.cached_sessions(), 0);
        assert_eq!(client.config().retries, 5);
        assert_eq!(client.config().backoff_factor, 3.0);
    }

    #[test]
    fn test_build_rejects_zero_threads() {
        let err = Client::builder("pyxis.example.com")
            .with_threads(0)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PyxisError::Config(_)));
    }

    #[tokio::test]
    async fn test_session_is_cached_per_worker() {
        let client = Client::builder("pyxis.example.com").build().unwrap();
        let first = client.session().await.unwrap();
        let second = client.session().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let worker = WorkerId::next();
        let other = worker.scope(client.session()).await.unwrap();
        assert_ne!(first.id(), other.id());
        assert_eq!(client.cached_sessions(), 2);
    }

    #[tokio::test]
    async fn test_reset_only_affects_calling_worker() {
        let client = Client::builder("pyxis.example.com").build().unwrap();
        let worker = WorkerId::next();
        let before = worker.scope(client.session()).await.unwrap();
        let caller = client.session().await.unwrap();

        worker.scope(async { client.reset_session() }).await;
        let after = worker.scope(client.session()).await.unwrap();

        assert_ne!(before.id(), after.id());
        assert!(Arc::ptr_eq(&caller, &client.session().await.unwrap()));
    }

    #[tokio::test]
    async fn test_signatures_require_a_filter() {
        let client = Client::builder("pyxis.example.com").build().unwrap();
        let err = client
            .get_container_signatures::<String>(None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PyxisError::Config(_)));
        assert_eq!(client.cached_sessions(), 0);
    }
}
