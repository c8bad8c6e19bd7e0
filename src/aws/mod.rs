//! AWS service clients

pub mod codedeploy;
pub mod context;
pub mod error;
pub mod s3;

pub use codedeploy::{CodeDeployClient, DeploymentRequest};
pub use context::AwsContext;
pub use s3::S3Client;
