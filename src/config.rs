//! Configuration types for deploy runs

use std::path::PathBuf;
use std::time::Duration;

/// Default CodeDeploy deployment configuration
pub const DEFAULT_DEPLOYMENT_CONFIG: &str = "CodeDeployDefault.OneAtATime";

/// Default poll interval for the deployment watcher, in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;

/// Default hook script timeout in seconds
pub const DEFAULT_HOOK_TIMEOUT_SECS: u32 = 300;

/// Configuration for one deploy run
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// CodeDeploy application name
    pub application_name: String,

    /// CodeDeploy deployment group
    pub deployment_group: String,

    /// CodeDeploy deployment configuration name
    pub deployment_config: String,

    /// Operator-supplied description of this deployment
    pub description: Option<String>,

    /// S3 bucket receiving the revision bundle
    pub bucket: String,

    /// docker-compose file to deploy; hello-world revision when absent
    pub compose_file: Option<PathBuf>,

    /// AWS region
    pub region: String,

    /// Timeout for each hook script
    pub hook_timeout_secs: u32,

    /// Watcher poll interval
    pub poll_interval: Duration,

    /// Push the revision but skip the deploy step
    pub no_deploy: bool,

    /// Deploy but don't watch the deployment to completion
    pub no_wait: bool,
}

/// Default bucket name for an application's revisions.
pub fn default_bucket(application_name: &str) -> String {
    format!("{application_name}-deploy")
}

/// S3 object key for a deployment group's revision bundle.
pub fn bundle_key(application_name: &str, deployment_group: &str) -> String {
    format!("{application_name}/{deployment_group}.tar.gz")
}
