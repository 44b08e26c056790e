//! Error taxonomy for resource-graph assembly.
//!
//! Every variant is fatal: assembly stops at the first error and no partial
//! graph is returned.

use efs_backup_state::{StackStatus, StateError};

/// Assembly errors.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("configuration error: {field}: {reason}")]
    Configuration { field: String, reason: String },

    #[error("cannot find {resource_type} in stack {stack_name} ({region})")]
    MissingCrossStackResource {
        region: String,
        stack_name: String,
        resource_type: String,
    },

    #[error("producer stack {stack_name} ({region}) is {status:?}, its resources are not live")]
    UnusableProducerStack {
        region: String,
        stack_name: String,
        status: StackStatus,
    },

    #[error(
        "stack {stack_name} ({region}) exports {count} resources of type {resource_type}, expected exactly one"
    )]
    AmbiguousCrossStackResource {
        region: String,
        stack_name: String,
        resource_type: String,
        count: usize,
    },

    #[error("invalid policy statement: {0}")]
    InvalidStatement(String),

    #[error("volume '{volume}' has no mount point")]
    UnmountedVolume { volume: String },

    #[error("mount point {container_path} references undeclared volume '{volume}'")]
    UnknownVolume {
        volume: String,
        container_path: String,
    },

    #[error("invalid task sizing {cpu} cpu / {memory_mib} MiB: {reason}")]
    InvalidSizing {
        cpu: u32,
        memory_mib: u32,
        reason: String,
    },

    #[error("invalid schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("override '{key}' collides with the task's base environment")]
    EnvironmentCollision { key: String },

    #[error("invalid role wiring: {0}")]
    RoleWiring(String),

    #[error("cannot find {kind} '{name}' in {region}")]
    MissingLookup {
        kind: &'static str,
        name: String,
        region: String,
    },

    #[error("state lookup failed: {0}")]
    State(#[from] StateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AssemblyError {
    pub(crate) fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AssemblyError::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn schedule(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        AssemblyError::InvalidSchedule {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for assembly operations.
pub type Result<T> = std::result::Result<T, AssemblyError>;
