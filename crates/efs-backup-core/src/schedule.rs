//! Schedule → task bindings.
//!
//! Every binding runs the same [`TaskSpecification`] with its own container
//! overrides. A conditional binding may bring grants for the task role; those
//! are staged on a copy of the role and only committed once the binding has
//! been built.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::cron::CronExpression;
use crate::error::{AssemblyError, Result};
use crate::naming::LogicalIds;
use crate::network::{Cluster, NetworkTopology, SecurityGroupRef};
use crate::obs;
use crate::permissions::{IdentityRole, PermissionComposer, PermissionTable, RoleKind};
use crate::task::{TaskDefinitionIdentity, TaskSpecification, FARGATE_PLATFORM_VERSION};

/// Environment overrides for one binding.
///
/// Keys already present in the task's base environment must be declared
/// with [`EnvOverrides::shadow`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnvOverrides {
    vars: BTreeMap<String, String>,
    shadows: BTreeSet<String>,
}

impl EnvOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Override a key that the base environment also defines.
    pub fn shadow(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.shadows.insert(key.clone());
        self.vars.insert(key, value.into());
        self
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn is_shadow(&self, key: &str) -> bool {
        self.shadows.contains(key)
    }

    fn check_collisions(&self, base: &BTreeMap<String, String>) -> Result<()> {
        match self
            .vars
            .keys()
            .find(|k| base.contains_key(*k) && !self.is_shadow(k.as_str()))
        {
            Some(key) => Err(AssemblyError::EnvironmentCollision { key: key.clone() }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerOverride {
    pub container_name: String,
    pub environment: BTreeMap<String, String>,
}

/// A cron rule that starts the task on the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleBinding {
    pub logical_id: String,
    pub name: String,
    pub description: String,
    pub schedule: CronExpression,
    pub cluster_id: String,
    pub task_definition: TaskDefinitionIdentity,
    /// Scheduler role the rule target assumes.
    pub role_id: String,
    pub subnet_ids: Vec<String>,
    pub security_groups: Vec<SecurityGroupRef>,
    pub platform_version: String,
    pub task_count: u32,
    pub container_override: ContainerOverride,
    pub propagate_tags_from_task_definition: bool,
    /// Created only because a context predicate held.
    pub conditional: bool,
}

impl ScheduleBinding {
    /// Base environment with this binding's overrides applied.
    pub fn effective_environment(&self, task: &TaskSpecification) -> BTreeMap<String, String> {
        let mut env = task.base_environment().clone();
        env.extend(
            self.container_override
                .environment
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        env
    }
}

/// One requested binding.
#[derive(Debug, Clone)]
pub struct BindingRequest {
    /// Construct name, e.g. `cronJobTriggerArchive`.
    pub name: String,
    pub schedule: CronExpression,
    pub description: String,
    pub overrides: EnvOverrides,
}

/// Accumulates bindings that share one task, cluster and network placement.
pub struct ScheduleGraphBuilder<'a> {
    ids: &'a LogicalIds,
    task: &'a TaskSpecification,
    cluster: &'a Cluster,
    network: &'a NetworkTopology,
    scheduler: &'a IdentityRole,
    bindings: Vec<ScheduleBinding>,
}

impl<'a> ScheduleGraphBuilder<'a> {
    /// The scheduler role must already be allowed to pass both task roles.
    pub fn new(
        ids: &'a LogicalIds,
        task: &'a TaskSpecification,
        cluster: &'a Cluster,
        network: &'a NetworkTopology,
        scheduler: &'a IdentityRole,
    ) -> Result<Self> {
        if scheduler.kind() != RoleKind::Scheduler {
            return Err(AssemblyError::RoleWiring(format!(
                "schedule rules need the scheduler role, got {:?}",
                scheduler.kind()
            )));
        }
        for role_id in [&task.execution_role_id, &task.task_role_id] {
            if !scheduler.pass_role_targets().iter().any(|t| t == role_id) {
                return Err(AssemblyError::RoleWiring(format!(
                    "scheduler role cannot pass {}",
                    role_id
                )));
            }
        }
        Ok(Self {
            ids,
            task,
            cluster,
            network,
            scheduler,
            bindings: Vec::new(),
        })
    }

    /// Add an unconditional binding.
    pub fn bind(&mut self, request: BindingRequest) -> Result<&ScheduleBinding> {
        let binding = self.make_binding(request, false)?;
        Ok(self.push(binding))
    }

    /// Add a binding together with the task-role grants it needs.
    ///
    /// Either both the binding and every grant land, or neither does and
    /// `task_role` is left untouched.
    pub fn bind_with_grants(
        &mut self,
        request: BindingRequest,
        task_role: &mut IdentityRole,
        grants: &PermissionTable,
    ) -> Result<&ScheduleBinding> {
        if task_role.logical_id() != self.task.task_role_id {
            return Err(AssemblyError::RoleWiring(format!(
                "grants target {} but the task runs as {}",
                task_role.logical_id(),
                self.task.task_role_id
            )));
        }

        let staged = PermissionComposer::attach_table(task_role.clone(), grants)?;
        let binding = self.make_binding(request, true)?;

        *task_role = staged;
        debug!(
            role = %task_role.logical_id(),
            grants = grants.grants().len(),
            "committed conditional grants"
        );
        Ok(self.push(binding))
    }

    pub fn bindings(&self) -> &[ScheduleBinding] {
        &self.bindings
    }

    pub fn finish(self) -> Vec<ScheduleBinding> {
        self.bindings
    }

    fn push(&mut self, binding: ScheduleBinding) -> &ScheduleBinding {
        obs::emit_binding_created(
            &binding.logical_id,
            &binding.schedule.schedule_expression(),
            binding.conditional,
        );
        self.bindings.push(binding);
        &self.bindings[self.bindings.len() - 1]
    }

    fn make_binding(&self, request: BindingRequest, conditional: bool) -> Result<ScheduleBinding> {
        let logical_id = self.ids.id(&request.name);
        if self.bindings.iter().any(|b| b.logical_id == logical_id) {
            return Err(AssemblyError::configuration(
                "binding",
                format!("'{}' is bound twice", request.name),
            ));
        }
        request
            .overrides
            .check_collisions(self.task.base_environment())?;

        Ok(ScheduleBinding {
            logical_id,
            name: request.name,
            description: request.description,
            schedule: request.schedule,
            cluster_id: self.cluster.logical_id.clone(),
            task_definition: self.task.identity().clone(),
            role_id: self.scheduler.logical_id().to_string(),
            subnet_ids: self.network.subnet_ids.clone(),
            security_groups: self.network.security_groups(),
            platform_version: FARGATE_PLATFORM_VERSION.to_string(),
            task_count: 1,
            container_override: ContainerOverride {
                container_name: self.task.container.name.clone(),
                environment: request.overrides.vars,
            },
            propagate_tags_from_task_definition: true,
            conditional,
        })
    }
}
