//! Runs one parsed subcommand against Pyxis

use crate::cli::args::{Args, Command};
use crate::cli::input::{InlineFormat, deserialize_list, deserialize_strings};
use crate::error::{PyxisError, Result};
use crate::output::OutputManager;
use crate::registry::{Client, RegistrySelection};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::debug;

pub struct Runner {
    command: Command,
    output: OutputManager,
}

impl Runner {
    pub fn new(args: Args) -> Self {
        Self {
            command: args.command,
            output: OutputManager::new(),
        }
    }

    /// Run the command and print its result. Returns the process exit code.
    pub async fn run(&self) -> i32 {
        match self.execute().await {
            Ok(result) => {
                if let Some(value) = result {
                    if let Err(err) = self.output.print_json(&value) {
                        self.output.error("writing output", &err);
                        return 1;
                    }
                }
                0
            }
            Err(err) => {
                self.output.error(self.command.action(), &err);
                1
            }
        }
    }

    /// Authenticate, send the requests and return what should be printed.
    pub async fn execute(&self) -> Result<Option<Value>> {
        self.validate()?;

        // The ticket cache must outlive every request of the command.
        let ccache = NamedTempFile::new()?;
        let client = self.build_client(&ccache)?;
        self.dispatch(&client).await
    }

    /// Argument checks that do not need the network.
    fn validate(&self) -> Result<()> {
        match &self.command {
            Command::GetRepoMetadata {
                custom_registry,
                only_internal_registry,
                only_partner_registry,
                ..
            } => {
                RegistrySelection::resolve(
                    custom_registry.as_deref(),
                    *only_internal_registry,
                    *only_partner_registry,
                )?;
            }
            Command::GetSignatures {
                manifest_digest: None,
                reference: None,
                ..
            } => {
                return Err(PyxisError::Config(
                    "Give at least 1 filter, --manifest-digest and/or --reference".to_string(),
                ));
            }
            _ => {}
        }
        Ok(())
    }

    fn build_client(&self, ccache: &NamedTempFile) -> Result<Client> {
        let pyxis = self.command.pyxis();
        let auth = pyxis
            .auth_settings()
            .into_provider(&pyxis.pyxis_server, ccache.path())?;
        debug!(server = %pyxis.pyxis_server, auth = ?auth, "configuring Pyxis client");

        Client::builder(pyxis.pyxis_server.clone())
            .with_verify(!pyxis.pyxis_insecure)
            .with_threads(self.command.request_threads())
            .with_auth(Some(auth))
            .build()
    }

    /// Send the command's requests with an already configured client.
    pub async fn dispatch(&self, client: &Client) -> Result<Option<Value>> {
        match &self.command {
            Command::GetOperatorIndices {
                ocp_versions_range,
                organization,
                ..
            } => {
                let indices = client
                    .get_operator_indices(ocp_versions_range, organization.as_deref())
                    .await?;
                Ok(Some(Value::Array(indices)))
            }
            Command::GetRepoMetadata {
                repo_name,
                custom_registry,
                only_internal_registry,
                only_partner_registry,
                ..
            } => {
                let metadata = client
                    .get_repository_metadata(
                        repo_name,
                        custom_registry.as_deref(),
                        *only_internal_registry,
                        *only_partner_registry,
                    )
                    .await?;
                Ok(Some(metadata))
            }
            Command::UploadSignatures { signatures, .. } => {
                let signatures = deserialize_list(signatures, InlineFormat::Json).await?;
                let uploaded = client.upload_signatures(signatures).await?;
                Ok(Some(Value::Array(uploaded)))
            }
            Command::GetSignatures {
                manifest_digest,
                reference,
                ..
            } => {
                let digests = match manifest_digest {
                    Some(value) => Some(deserialize_strings(value).await?),
                    None => None,
                };
                let references = match reference {
                    Some(value) => Some(deserialize_strings(value).await?),
                    None => None,
                };
                let signatures = client
                    .get_container_signatures(digests.as_deref(), references.as_deref())
                    .await?;
                Ok(Some(Value::Array(signatures)))
            }
            Command::DeleteSignatures { ids, .. } => {
                let ids = deserialize_strings(ids).await?;
                client.delete_container_signatures(ids).await?;
                Ok(None)
            }
        }
    }
}
