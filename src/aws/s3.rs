//! S3 revision bundle upload

use anyhow::{Context, Result};
use aws_sdk_s3::{primitives::ByteStream, Client};
use std::path::Path;
use tracing::{debug, info};

use crate::aws::context::AwsContext;

/// S3 client for pushing revision bundles
pub struct S3Client {
    client: Client,
}

impl S3Client {
    /// Create a new S3 client (loads AWS config from environment)
    pub async fn new(region: &str) -> Result<Self> {
        let ctx = AwsContext::new(region).await;
        Ok(Self::from_context(&ctx))
    }

    /// Create an S3 client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.s3_client(),
        }
    }

    /// Upload a revision bundle, returning its ETag.
    ///
    /// The ETag identifies the exact bundle version in the subsequent
    /// CreateDeployment call. S3 returns it wrapped in quotes; those are
    /// stripped here.
    pub async fn upload_bundle(&self, bucket: &str, key: &str, path: &Path) -> Result<String> {
        debug!(bucket = %bucket, key = %key, path = %path.display(), "Uploading bundle");

        let body = ByteStream::from_path(path)
            .await
            .context("Failed to read bundle")?;

        let response = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .context("Failed to upload bundle")?;

        let etag = response
            .e_tag()
            .context("PutObject response missing ETag")?
            .trim_matches('"')
            .to_string();

        info!(bucket = %bucket, key = %key, etag = %etag, "Uploaded revision bundle");

        Ok(etag)
    }
}
