//! CodeDeploy error classification
//!
//! Provides typed errors for Status Provider operations using the SDK's
//! `.code()` metadata instead of string matching on Debug format.

use thiserror::Error;

/// Errors surfaced by the Status Provider.
///
/// Everything except `InstancesNotReady` is fatal to a watch: the watcher
/// does not retry transport or auth failures.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The deployment has not finished registering its instances yet.
    /// Expected early in a deployment's life; the watcher skips the
    /// instance phase for one tick and polls again.
    #[error("deployment has not finished registering instances")]
    InstancesNotReady,

    /// A response was missing a field this tool requires.
    #[error("malformed CodeDeploy response: {0}")]
    MalformedResponse(String),

    /// Generic CodeDeploy API error with code and message.
    #[error("CodeDeploy error: {message}")]
    Api {
        code: Option<String>,
        message: String,
    },
}

impl ProviderError {
    /// Check if this is the transient "instances not registered yet" condition.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, ProviderError::InstancesNotReady)
    }
}

/// Error codes CodeDeploy returns while a deployment is still registering
/// its instances.
const NOT_READY_CODES: &[&str] = &["DeploymentNotStartedException"];

/// Classify a CodeDeploy API error using the error code.
///
/// Falls back to a message substring for the not-ready condition because
/// older API frontends have been seen returning it without a typed code.
pub fn classify_codedeploy_error(code: Option<&str>, message: Option<&str>) -> ProviderError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if NOT_READY_CODES.contains(&c) => ProviderError::InstancesNotReady,
        _ if message.contains("hasn't completed adding instances") => {
            ProviderError::InstancesNotReady
        }
        _ => ProviderError::Api {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}
