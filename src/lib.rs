//! compose-deploy - CodeDeploy CLI with docker-compose revision support
//!
//! This crate packages an application revision (a hello-world smoke test or
//! a single-service docker-compose definition), uploads it to S3, creates a
//! CodeDeploy deployment, and watches that deployment until every instance
//! finishes.
//!
//! The deployment orchestration itself (instance selection, rollout
//! strategy, health checks) is CodeDeploy's job; this tool prepares inputs
//! and watches outputs.

pub mod aws;
pub mod config;
pub mod revision;
pub mod status;
pub mod watch;
