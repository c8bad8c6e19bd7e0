//! compose-deploy: push a revision, create a CodeDeploy deployment, and
//! watch it to completion.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use compose_deploy::aws::{AwsContext, CodeDeployClient, DeploymentRequest, S3Client};
use compose_deploy::config::{
    self, DeployConfig, DEFAULT_DEPLOYMENT_CONFIG, DEFAULT_HOOK_TIMEOUT_SECS,
    DEFAULT_POLL_INTERVAL_SECS,
};
use compose_deploy::revision::{DockerComposeRevision, Revision};
use compose_deploy::watch::{watch_deployment, TracingReporter};

#[derive(Parser, Debug)]
#[command(name = "compose-deploy")]
#[command(about = "CodeDeploy deployments for docker-compose services")]
#[command(version)]
struct Args {
    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push a revision, deploy it, and watch the deployment
    Deploy {
        /// CodeDeploy application name
        #[arg(long)]
        application_name: String,

        /// CodeDeploy deployment group
        #[arg(long)]
        deployment_group: String,

        /// CodeDeploy deployment configuration
        #[arg(long, default_value = DEFAULT_DEPLOYMENT_CONFIG)]
        deployment_config: String,

        /// Description of this deployment
        #[arg(long)]
        description: Option<String>,

        /// Revision bucket; defaults to "<application-name>-deploy"
        #[arg(long)]
        bucket: Option<String>,

        /// docker-compose file to deploy (omit for a hello-world test revision)
        #[arg(long)]
        compose_file: Option<PathBuf>,

        /// AWS region
        #[arg(long, default_value = "us-east-1")]
        region: String,

        /// Per-hook script timeout in seconds
        #[arg(long, default_value_t = DEFAULT_HOOK_TIMEOUT_SECS)]
        hook_timeout: u32,

        /// Watcher poll interval in seconds
        #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
        poll_interval: u64,

        /// Push the revision but skip the deploy step
        #[arg(long)]
        no_deploy: bool,

        /// Deploy but don't watch the deployment
        #[arg(long)]
        no_wait: bool,
    },

    /// Watch an existing deployment to completion
    Watch {
        /// CodeDeploy deployment id to poll
        #[arg(long)]
        deployment_id: String,

        /// AWS region
        #[arg(long, default_value = "us-east-1")]
        region: String,

        /// Poll interval in seconds
        #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
        poll_interval: u64,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Command::Deploy {
            application_name,
            deployment_group,
            deployment_config,
            description,
            bucket,
            compose_file,
            region,
            hook_timeout,
            poll_interval,
            no_deploy,
            no_wait,
        } => {
            let bucket = bucket.unwrap_or_else(|| config::default_bucket(&application_name));
            let config = DeployConfig {
                application_name,
                deployment_group,
                deployment_config,
                description,
                bucket,
                compose_file,
                region,
                hook_timeout_secs: hook_timeout,
                poll_interval: Duration::from_secs(poll_interval),
                no_deploy,
                no_wait,
            };
            deploy(config).await
        }

        Command::Watch {
            deployment_id,
            region,
            poll_interval,
        } => {
            let codedeploy = CodeDeployClient::new(&region).await?;
            watch_deployment(
                &codedeploy,
                &TracingReporter,
                &deployment_id,
                Duration::from_secs(poll_interval),
            )
            .await?;
            Ok(())
        }
    }
}

/// Push the revision, create the deployment, and watch it.
async fn deploy(config: DeployConfig) -> Result<()> {
    let ctx = AwsContext::new(&config.region).await;
    let s3 = S3Client::from_context(&ctx);
    let codedeploy = CodeDeployClient::from_context(&ctx);

    let revision = build_revision(&config)?;

    info!(
        application = %config.application_name,
        deployment_group = %config.deployment_group,
        bucket = %config.bucket,
        "Pushing revision"
    );
    let bundle = revision.bundle()?;
    let key = config::bundle_key(&config.application_name, &config.deployment_group);
    let etag = s3
        .upload_bundle(&config.bucket, &key, bundle.path())
        .await?;

    if config.no_deploy {
        return Ok(());
    }

    let deployment_id = codedeploy
        .create_deployment(&DeploymentRequest {
            application_name: config.application_name.clone(),
            deployment_group: config.deployment_group.clone(),
            deployment_config: config.deployment_config.clone(),
            description: config.description.clone(),
            bucket: config.bucket.clone(),
            key,
            etag,
        })
        .await?;

    if config.no_wait {
        return Ok(());
    }

    watch_deployment(
        &codedeploy,
        &TracingReporter,
        &deployment_id,
        config.poll_interval,
    )
    .await?;

    Ok(())
}

/// Build the revision for this run: docker-compose when a compose file was
/// given, the hello-world smoke test otherwise.
fn build_revision(config: &DeployConfig) -> Result<Revision> {
    match &config.compose_file {
        Some(path) => {
            let compose_yaml = fs::read_to_string(path)
                .with_context(|| format!("Failed to read compose file {}", path.display()))?;
            let compose = DockerComposeRevision::parse(
                &config.deployment_group,
                &compose_yaml,
                config.hook_timeout_secs,
            )?;
            Ok(Revision::DockerCompose(compose))
        }
        None => Ok(Revision::HelloWorld),
    }
}
