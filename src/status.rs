//! Typed deployment and instance statuses
//!
//! CodeDeploy reports statuses as strings on the wire. These enums give the
//! watcher typed values to diff between polls instead of comparing raw
//! strings pulled out of API responses.

use std::fmt;

/// Aggregate status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeploymentStatus {
    Created,
    Queued,
    InProgress,
    Baking,
    Ready,
    Succeeded,
    Failed,
    Stopped,
}

impl DeploymentStatus {
    /// Parse from the wire string.
    ///
    /// Returns `None` for values this tool does not know about.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Created" => Some(Self::Created),
            "Queued" => Some(Self::Queued),
            "InProgress" => Some(Self::InProgress),
            "Baking" => Some(Self::Baking),
            "Ready" => Some(Self::Ready),
            "Succeeded" => Some(Self::Succeeded),
            "Failed" => Some(Self::Failed),
            "Stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Queued => "Queued",
            Self::InProgress => "InProgress",
            Self::Baking => "Baking",
            Self::Ready => "Ready",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Stopped => "Stopped",
        }
    }

    /// Check if the status represents a failed outcome
    pub fn is_failed(self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single instance within a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Skipped,
    Ready,
    Unknown,
}

impl InstanceStatus {
    /// Parse from the wire string.
    ///
    /// CodeDeploy itself uses "Unknown" as a real value, so unrecognized
    /// strings map there rather than failing the poll.
    pub fn parse(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "InProgress" => Self::InProgress,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            "Skipped" => Self::Skipped,
            "Ready" => Self::Ready,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "InProgress",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Skipped => "Skipped",
            Self::Ready => "Ready",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if the status represents a failed outcome
    pub fn is_failed(self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-status instance counts for a deployment at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overview {
    pub pending: i64,
    pub in_progress: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub skipped: i64,
}

impl Overview {
    /// Number of instances that have reached a terminal state.
    pub fn finished(&self) -> i64 {
        self.failed + self.succeeded + self.skipped
    }
}

/// One poll's view of a deployment's aggregate state.
#[derive(Debug, Clone)]
pub struct DeploymentSnapshot {
    pub status: DeploymentStatus,
    /// Absent until CodeDeploy starts tracking instances for the deployment.
    pub overview: Option<Overview>,
}

/// A named lifecycle phase of an instance's deployment execution.
///
/// The log tail only appears on failures; once observed for a given event
/// name it is never revisited with new content.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub name: String,
    pub log_tail: Option<String>,
}

/// One poll's view of a single instance.
#[derive(Debug, Clone)]
pub struct InstanceSnapshot {
    pub instance_id: String,
    pub status: InstanceStatus,
    pub events: Vec<LifecycleEvent>,
}
