//! CodeDeploy client
//!
//! Wraps the deployment-creation call and the three read operations the
//! watcher polls. Read operations return typed snapshots and classified
//! `ProviderError`s; the write path uses `anyhow` like the rest of the
//! orchestration layer.

use anyhow::{Context, Result};
use aws_sdk_codedeploy::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_codedeploy::types::{BundleType, RevisionLocation, RevisionLocationType, S3Location};
use aws_sdk_codedeploy::Client;
use tracing::info;

use crate::aws::context::AwsContext;
use crate::aws::error::{classify_codedeploy_error, ProviderError};
use crate::status::{
    DeploymentSnapshot, DeploymentStatus, InstanceSnapshot, InstanceStatus, LifecycleEvent,
    Overview,
};
use crate::watch::StatusProvider;

/// Parameters for one CreateDeployment call.
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub application_name: String,
    pub deployment_group: String,
    pub deployment_config: String,
    pub description: Option<String>,
    pub bucket: String,
    pub key: String,
    pub etag: String,
}

/// CodeDeploy client for creating and observing deployments
pub struct CodeDeployClient {
    client: Client,
    region: String,
}

impl CodeDeployClient {
    /// Create a new CodeDeploy client (loads AWS config from environment)
    pub async fn new(region: &str) -> Result<Self> {
        let ctx = AwsContext::new(region).await;
        Ok(Self::from_context(&ctx))
    }

    /// Create a CodeDeploy client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.codedeploy_client(),
            region: ctx.region().to_string(),
        }
    }

    /// Create a deployment from a pushed S3 revision, returning its id.
    ///
    /// `ignore_application_stop_failures` is always set: ApplicationStop runs
    /// the scripts of the *previous* successful revision, so a first deploy
    /// (or one after a revision without that hook) would otherwise fail every
    /// time.
    pub async fn create_deployment(&self, request: &DeploymentRequest) -> Result<String> {
        info!(
            application = %request.application_name,
            deployment_group = %request.deployment_group,
            bucket = %request.bucket,
            "Creating deployment"
        );

        let s3_location = S3Location::builder()
            .bucket(request.bucket.as_str())
            .key(request.key.as_str())
            .bundle_type(BundleType::TarGZip)
            .e_tag(request.etag.as_str())
            .build();

        let revision = RevisionLocation::builder()
            .revision_type(RevisionLocationType::S3)
            .s3_location(s3_location)
            .build();

        let response = self
            .client
            .create_deployment()
            .application_name(request.application_name.as_str())
            .deployment_group_name(request.deployment_group.as_str())
            .deployment_config_name(request.deployment_config.as_str())
            .set_description(request.description.clone())
            .ignore_application_stop_failures(true)
            .revision(revision)
            .send()
            .await
            .context("Failed to create deployment")?;

        let deployment_id = response
            .deployment_id()
            .context("CreateDeployment response missing deployment id")?
            .to_string();

        info!(deployment_id = %deployment_id, "Created deployment");
        let region = &self.region;
        info!(
            "To follow along, browse to: \
             https://{region}.console.aws.amazon.com/codedeploy/home?region={region}#/deployments/{deployment_id}"
        );

        Ok(deployment_id)
    }

    /// Fetch the deployment's aggregate status and overview.
    pub async fn deployment_snapshot(
        &self,
        deployment_id: &str,
    ) -> Result<DeploymentSnapshot, ProviderError> {
        let response = self
            .client
            .get_deployment()
            .deployment_id(deployment_id)
            .send()
            .await
            .map_err(classify)?;

        let deployment_info = response.deployment_info().ok_or_else(|| {
            ProviderError::MalformedResponse("GetDeployment response missing deploymentInfo".into())
        })?;

        let status = deployment_info
            .status()
            .and_then(|s| DeploymentStatus::parse(s.as_str()))
            .ok_or_else(|| {
                ProviderError::MalformedResponse(format!(
                    "unrecognized deployment status for {deployment_id}"
                ))
            })?;

        let overview = deployment_info.deployment_overview().map(|o| Overview {
            pending: o.pending(),
            in_progress: o.in_progress(),
            succeeded: o.succeeded(),
            failed: o.failed(),
            skipped: o.skipped(),
        });

        Ok(DeploymentSnapshot { status, overview })
    }

    /// List instance ids registered to the deployment, in service order.
    pub async fn deployment_instance_ids(
        &self,
        deployment_id: &str,
    ) -> Result<Vec<String>, ProviderError> {
        let response = self
            .client
            .list_deployment_instances()
            .deployment_id(deployment_id)
            .send()
            .await
            .map_err(classify)?;

        Ok(response.instances_list().to_vec())
    }

    /// Fetch one instance's status and lifecycle events.
    pub async fn instance_snapshot(
        &self,
        deployment_id: &str,
        instance_id: &str,
    ) -> Result<InstanceSnapshot, ProviderError> {
        let response = self
            .client
            .get_deployment_instance()
            .deployment_id(deployment_id)
            .instance_id(instance_id)
            .send()
            .await
            .map_err(classify)?;

        let summary = response.instance_summary().ok_or_else(|| {
            ProviderError::MalformedResponse(format!(
                "GetDeploymentInstance response missing instanceSummary for {instance_id}"
            ))
        })?;

        #[allow(deprecated)]
        let status = summary
            .status()
            .map(|s| InstanceStatus::parse(s.as_str()))
            .unwrap_or(InstanceStatus::Unknown);

        let events = summary
            .lifecycle_events()
            .iter()
            .map(|e| LifecycleEvent {
                name: e.lifecycle_event_name().unwrap_or_default().to_string(),
                log_tail: e
                    .diagnostics()
                    .and_then(|d| d.log_tail())
                    .map(str::to_string),
            })
            .collect();

        Ok(InstanceSnapshot {
            instance_id: summary.instance_id().unwrap_or(instance_id).to_string(),
            status,
            events,
        })
    }
}

impl StatusProvider for CodeDeployClient {
    async fn get_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<DeploymentSnapshot, ProviderError> {
        CodeDeployClient::deployment_snapshot(self, deployment_id).await
    }

    async fn list_instances(&self, deployment_id: &str) -> Result<Vec<String>, ProviderError> {
        CodeDeployClient::deployment_instance_ids(self, deployment_id).await
    }

    async fn get_instance(
        &self,
        deployment_id: &str,
        instance_id: &str,
    ) -> Result<InstanceSnapshot, ProviderError> {
        CodeDeployClient::instance_snapshot(self, deployment_id, instance_id).await
    }
}

/// Classify an SDK error into the provider taxonomy using its error metadata.
fn classify<E>(err: SdkError<E>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let meta = ProvideErrorMetadata::meta(&err);
    let code = meta.code().map(str::to_string);
    match meta.message().map(str::to_string) {
        Some(message) => classify_codedeploy_error(code.as_deref(), Some(&message)),
        // No service-level metadata (timeouts, connect errors): fall back to
        // the error's own rendering so the operator sees something useful.
        None => classify_codedeploy_error(code.as_deref(), Some(&err.to_string())),
    }
}
