//! EFS backup core library
//!
//! Assembles the resource graph for a scheduled Fargate task that copies an
//! EFS filesystem to S3, and renders it as a CloudFormation template.

pub mod alert;
pub mod context;
pub mod cron;
pub mod error;
pub mod graph;
pub mod naming;
pub mod network;
pub mod obs;
pub mod permissions;
pub mod profile;
pub mod render;
pub mod resolver;
pub mod schedule;
pub mod task;
pub mod telemetry;

pub use alert::{
    ExitCodeSet, FailureAlertBuilder, FailureExitCode, FailureMatcher, NotificationSink,
    TaskStateChangeEvent,
};
pub use context::EnvironmentContext;
pub use cron::CronExpression;
pub use error::{AssemblyError, Result};
pub use graph::{assemble, AssemblyInputs, ResourceGraph};
pub use naming::{LogicalIds, NamePattern};
pub use network::{Cluster, NetworkPolicy, NetworkTopology, NetworkTopologyResolver};
pub use permissions::{
    Capability, IdentityRole, PermissionComposer, PermissionTable, PolicyStatement,
    ResourcePattern, RoleKind,
};
pub use profile::{production_pair, ImageSettings, ProfileName, StackProfile};
pub use render::{to_template, to_template_string};
pub use resolver::{CrossStackResolver, EFS_FILE_SYSTEM_TYPE};
pub use schedule::{BindingRequest, EnvOverrides, ScheduleBinding, ScheduleGraphBuilder};
pub use task::{RegistryCoordinate, TaskSizing, TaskSpecBuilder, TaskSpecification};
pub use telemetry::init_tracing;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
