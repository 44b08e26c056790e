//! Fargate task specification.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AssemblyError, Result};
use crate::permissions::{IdentityRole, RoleKind};

/// Fargate platform version the scheduled targets pin.
pub const FARGATE_PLATFORM_VERSION: &str = "1.4.0";

/// CPU units and memory for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSizing {
    pub cpu: u32,
    pub memory_mib: u32,
}

impl TaskSizing {
    pub const fn new(cpu: u32, memory_mib: u32) -> Self {
        Self { cpu, memory_mib }
    }

    /// Whether Fargate accepts this cpu/memory pairing.
    pub fn is_valid_fargate(&self) -> bool {
        let (min, max, step) = match self.cpu {
            256 => return matches!(self.memory_mib, 512 | 1024 | 2048),
            512 => (1024, 4096, 1024),
            1024 => (2048, 8192, 1024),
            2048 => (4096, 16384, 1024),
            4096 => (8192, 30720, 1024),
            8192 => (16384, 61440, 4096),
            16384 => (32768, 122880, 8192),
            _ => return false,
        };
        (min..=max).contains(&self.memory_mib) && (self.memory_mib - min) % step == 0
    }
}

/// Where the container image lives. The registry account may differ from
/// the deploying account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCoordinate {
    pub account: String,
    pub region: String,
    pub repository: String,
    pub tag: String,
}

impl RegistryCoordinate {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("registry_account", &self.account),
            ("registry_region", &self.region),
            ("repository", &self.repository),
            ("image_tag", &self.tag),
        ] {
            if value.trim().is_empty() {
                return Err(AssemblyError::configuration(field, "must not be empty"));
            }
        }
        Ok(())
    }

    pub fn image_uri(&self) -> String {
        format!(
            "{}.dkr.ecr.{}.amazonaws.com/{}:{}",
            self.account, self.region, self.repository, self.tag
        )
    }

    pub fn repository_arn(&self) -> String {
        format!(
            "arn:aws:ecr:{}:{}:repository/{}",
            self.region, self.account, self.repository
        )
    }

    pub fn is_cross_account(&self, deploying_account: &str) -> bool {
        self.account != deploying_account
    }
}

/// An EFS filesystem exposed to the task as a named volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EfsVolume {
    pub name: String,
    pub file_system_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountPoint {
    pub source_volume: String,
    pub container_path: String,
    pub read_only: bool,
}

/// Log group the container writes to through the `awslogs` driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogSink {
    pub logical_id: String,
    /// `None` keeps logs forever.
    pub retention_days: Option<u32>,
    pub stream_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerDefinition {
    pub name: String,
    pub image: RegistryCoordinate,
    pub essential: bool,
    pub environment: BTreeMap<String, String>,
    pub mount_points: Vec<MountPoint>,
    pub log_sink: LogSink,
}

/// Identity of a task definition inside the graph.
///
/// Rendered as a `Ref`, which resolves to the task definition ARN at deploy
/// time. Matchers compare identities, never concrete ARNs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskDefinitionIdentity(String);

impl TaskDefinitionIdentity {
    pub(crate) fn new(logical_id: impl Into<String>) -> Self {
        Self(logical_id.into())
    }

    pub fn logical_id(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskDefinitionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A runnable unit shared by every schedule binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSpecification {
    identity: TaskDefinitionIdentity,
    pub sizing: TaskSizing,
    pub execution_role_id: String,
    pub task_role_id: String,
    pub volumes: Vec<EfsVolume>,
    pub container: ContainerDefinition,
}

impl TaskSpecification {
    pub fn identity(&self) -> &TaskDefinitionIdentity {
        &self.identity
    }

    pub fn base_environment(&self) -> &BTreeMap<String, String> {
        &self.container.environment
    }
}

/// Composes a [`TaskSpecification`] under a fixed sizing policy.
#[derive(Debug, Clone)]
pub struct TaskSpecBuilder {
    logical_id: String,
    container_name: String,
    policy_sizing: TaskSizing,
    requested_sizing: Option<TaskSizing>,
    volumes: Vec<EfsVolume>,
    mount_points: Vec<MountPoint>,
    environment: BTreeMap<String, String>,
    image: Option<RegistryCoordinate>,
    log_sink: Option<LogSink>,
}

impl TaskSpecBuilder {
    /// `policy_sizing` is the only pairing `build` will accept.
    pub fn new(
        logical_id: impl Into<String>,
        container_name: impl Into<String>,
        policy_sizing: TaskSizing,
    ) -> Self {
        Self {
            logical_id: logical_id.into(),
            container_name: container_name.into(),
            policy_sizing,
            requested_sizing: None,
            volumes: Vec::new(),
            mount_points: Vec::new(),
            environment: BTreeMap::new(),
            image: None,
            log_sink: None,
        }
    }

    pub fn sizing(mut self, sizing: TaskSizing) -> Self {
        self.requested_sizing = Some(sizing);
        self
    }

    pub fn volume(mut self, volume: EfsVolume) -> Self {
        self.volumes.push(volume);
        self
    }

    pub fn mount(mut self, mount: MountPoint) -> Self {
        self.mount_points.push(mount);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: BTreeMap<String, String>) -> Self {
        self.environment.extend(vars);
        self
    }

    pub fn image(mut self, image: RegistryCoordinate) -> Self {
        self.image = Some(image);
        self
    }

    pub fn log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn build(
        self,
        execution_role: &IdentityRole,
        task_role: &IdentityRole,
    ) -> Result<TaskSpecification> {
        if execution_role.kind() != RoleKind::Execution {
            return Err(AssemblyError::RoleWiring(format!(
                "execution role slot holds a {:?} role",
                execution_role.kind()
            )));
        }
        if task_role.kind() != RoleKind::Task {
            return Err(AssemblyError::RoleWiring(format!(
                "task role slot holds a {:?} role",
                task_role.kind()
            )));
        }
        if execution_role.logical_id() == task_role.logical_id() {
            return Err(AssemblyError::RoleWiring(
                "execution and task roles must be distinct principals".to_string(),
            ));
        }

        let sizing = self.requested_sizing.unwrap_or(self.policy_sizing);
        if sizing != self.policy_sizing {
            return Err(AssemblyError::InvalidSizing {
                cpu: sizing.cpu,
                memory_mib: sizing.memory_mib,
                reason: format!(
                    "profile fixes {} cpu / {} MiB",
                    self.policy_sizing.cpu, self.policy_sizing.memory_mib
                ),
            });
        }
        if !sizing.is_valid_fargate() {
            return Err(AssemblyError::InvalidSizing {
                cpu: sizing.cpu,
                memory_mib: sizing.memory_mib,
                reason: "not a valid Fargate combination".to_string(),
            });
        }

        for mount in &self.mount_points {
            if !self.volumes.iter().any(|v| v.name == mount.source_volume) {
                return Err(AssemblyError::UnknownVolume {
                    volume: mount.source_volume.clone(),
                    container_path: mount.container_path.clone(),
                });
            }
        }
        for volume in &self.volumes {
            if volume.file_system_id.trim().is_empty() {
                return Err(AssemblyError::configuration(
                    "file_system_id",
                    format!("volume '{}' has no filesystem id", volume.name),
                ));
            }
            if !self
                .mount_points
                .iter()
                .any(|m| m.source_volume == volume.name)
            {
                return Err(AssemblyError::UnmountedVolume {
                    volume: volume.name.clone(),
                });
            }
        }

        let image = self
            .image
            .ok_or_else(|| AssemblyError::configuration("image", "no container image set"))?;
        image.validate()?;
        let log_sink = self
            .log_sink
            .ok_or_else(|| AssemblyError::configuration("log_sink", "no log sink set"))?;

        debug!(
            task_definition = %self.logical_id,
            cpu = sizing.cpu,
            memory_mib = sizing.memory_mib,
            image = %image.image_uri(),
            "built task specification"
        );

        Ok(TaskSpecification {
            identity: TaskDefinitionIdentity::new(self.logical_id),
            sizing,
            execution_role_id: execution_role.logical_id().to_string(),
            task_role_id: task_role.logical_id().to_string(),
            volumes: self.volumes,
            container: ContainerDefinition {
                name: self.container_name,
                image,
                essential: true,
                environment: self.environment,
                mount_points: self.mount_points,
                log_sink,
            },
        })
    }
}
