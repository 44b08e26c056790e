//! Resource-graph assembly.
//!
//! [`assemble`] is a single synchronous pass over an immutable context. The
//! filesystem id is resolved before anything else is built, and any error
//! aborts the pass without returning a partial graph.

use efs_backup_state::{EnvironmentLookup, StackResourceLookup};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::alert::{FailureAlertBuilder, FailureMatcher, NotificationSink};
use crate::context::EnvironmentContext;
use crate::error::{AssemblyError, Result};
use crate::naming::LogicalIds;
use crate::network::{Cluster, NetworkTopology, NetworkTopologyResolver};
use crate::obs::{self, AssemblySpan};
use crate::permissions::{IdentityRole, PermissionComposer, RoleKind};
use crate::profile::{FileSystemSource, KeySource, ProfileName, SinkSource, StackProfile};
use crate::resolver::CrossStackResolver;
use crate::schedule::{ScheduleBinding, ScheduleGraphBuilder};
use crate::task::{
    EfsVolume, LogSink, MountPoint, RegistryCoordinate, TaskSizing, TaskSpecBuilder,
    TaskSpecification,
};

/// Caller inputs that are not part of the deployment context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyInputs {
    pub image: RegistryCoordinate,
    /// Required by profiles that do not resolve the filesystem themselves.
    pub file_system_id: Option<String>,
    /// Requested task sizing; must equal the profile's when set.
    pub sizing: Option<TaskSizing>,
}

/// The assembled, not yet provisioned stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceGraph {
    pub stack_name: String,
    pub profile: ProfileName,
    pub region: String,
    pub account_id: String,
    pub file_system_id: String,
    /// Execution, task and scheduler roles, in that order.
    pub roles: Vec<IdentityRole>,
    pub log_group: LogSink,
    pub task_spec: TaskSpecification,
    pub cluster: Cluster,
    pub network: NetworkTopology,
    pub schedule_bindings: Vec<ScheduleBinding>,
    pub failure_matcher: FailureMatcher,
}

impl ResourceGraph {
    pub fn role(&self, kind: RoleKind) -> Option<&IdentityRole> {
        self.roles.iter().find(|r| r.kind() == kind)
    }

    /// Number of template resources this graph renders to.
    pub fn resource_count(&self) -> usize {
        // log group, task definition, cluster, security group, failure rule
        self.roles.len() + 5 + self.schedule_bindings.len()
    }

    /// SHA-256 of the canonical JSON form. Equal inputs give equal digests.
    pub fn digest(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

/// Assemble the resource graph for `ctx` under `profile`.
pub fn assemble(
    ctx: &EnvironmentContext,
    profile: &StackProfile,
    inputs: &AssemblyInputs,
    stacks: &dyn StackResourceLookup,
    environment: &dyn EnvironmentLookup,
) -> Result<ResourceGraph> {
    let stack_name = profile.stack_name.render(ctx)?;
    let _span = AssemblySpan::enter(&stack_name, profile.name.as_str());
    obs::emit_assembly_started(&stack_name, &ctx.stage, &ctx.zone, &ctx.slice);

    let assembler = Assembler {
        ctx,
        profile,
        stacks,
        environment,
        ids: LogicalIds::new(stack_name.clone()),
    };
    match assembler.run(inputs).and_then(|graph| graph.digest().map(|d| (graph, d))) {
        Ok((graph, digest)) => {
            obs::emit_assembly_finished(
                &stack_name,
                graph.resource_count(),
                graph.schedule_bindings.len(),
                &digest,
            );
            Ok(graph)
        }
        Err(err) => {
            obs::emit_assembly_failed(&stack_name, &err);
            Err(err)
        }
    }
}

struct Assembler<'a> {
    ctx: &'a EnvironmentContext,
    profile: &'a StackProfile,
    stacks: &'a dyn StackResourceLookup,
    environment: &'a dyn EnvironmentLookup,
    ids: LogicalIds,
}

impl Assembler<'_> {
    fn run(&self, inputs: &AssemblyInputs) -> Result<ResourceGraph> {
        let ctx = self.ctx;
        let profile = self.profile;
        ctx.validate()?;
        inputs.image.validate()?;

        let file_system_id = self.file_system_id(inputs)?;
        let network = NetworkTopologyResolver::new(self.environment).resolve(
            ctx,
            &profile.network,
            &self.ids,
        )?;
        let primary_key = self.resolve_key(profile.primary.key.as_ref())?;
        let sink = self.resolve_sink()?;

        let composer = PermissionComposer::new(self.ids.clone());
        let execution_role = composer.role(RoleKind::Execution)?;
        let task_role = composer.role(RoleKind::Task)?;
        let mut task_role = PermissionComposer::attach_table(
            task_role,
            &profile.baseline_grants(ctx, primary_key.as_deref())?,
        )?;
        let mut scheduler_role = composer.role(RoleKind::Scheduler)?;
        PermissionComposer::grant_pass_role(&mut scheduler_role, &execution_role)?;
        PermissionComposer::grant_pass_role(&mut scheduler_role, &task_role)?;

        let log_group = LogSink {
            logical_id: self.ids.id("LogGroup"),
            retention_days: profile.log_retention_days,
            stream_prefix: profile.log_stream_prefix.clone(),
        };
        let mut task_builder = TaskSpecBuilder::new(
            self.ids.id("taskDefinition"),
            profile.container_name.clone(),
            profile.sizing,
        )
        .volume(EfsVolume {
            name: profile.volume_name.clone(),
            file_system_id: file_system_id.clone(),
        })
        .mount(MountPoint {
            source_volume: profile.volume_name.clone(),
            container_path: profile.container_path.clone(),
            read_only: false,
        })
        .envs(profile.base_environment.render(ctx))
        .image(inputs.image.clone())
        .log_sink(log_group.clone());
        if let Some(sizing) = inputs.sizing {
            task_builder = task_builder.sizing(sizing);
        }
        let task_spec = task_builder.build(&execution_role, &task_role)?;

        let cluster = Cluster::new(&self.ids, &network);

        let mut schedules =
            ScheduleGraphBuilder::new(&self.ids, &task_spec, &cluster, &network, &scheduler_role)?;
        schedules.bind(profile.primary.binding_request(ctx)?)?;
        if let Some(secondary) = profile.active_secondary(ctx) {
            let key = self.resolve_key(secondary.key.as_ref())?;
            let grants = secondary.grants(ctx, key.as_deref())?;
            schedules.bind_with_grants(secondary.binding_request(ctx)?, &mut task_role, &grants)?;
        } else {
            debug!(profile = %profile.name, "secondary destination not active");
        }
        let schedule_bindings = schedules.finish();

        let failure_matcher = FailureAlertBuilder::new(&self.ids).watch(
            &task_spec,
            profile.exit_codes.clone(),
            sink,
        )?;

        Ok(ResourceGraph {
            stack_name: self.ids.stack_name().to_string(),
            profile: profile.name,
            region: ctx.region.clone(),
            account_id: ctx.account_id.clone(),
            file_system_id,
            roles: vec![execution_role, task_role, scheduler_role],
            log_group,
            task_spec,
            cluster,
            network,
            schedule_bindings,
            failure_matcher,
        })
    }

    fn file_system_id(&self, inputs: &AssemblyInputs) -> Result<String> {
        let supplied = inputs
            .file_system_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        match (&self.profile.file_system, supplied) {
            (FileSystemSource::CrossStack { .. }, Some(_)) => Err(AssemblyError::configuration(
                "file_system_id",
                format!(
                    "the {} profile resolves its filesystem from the producer stack",
                    self.profile.name
                ),
            )),
            (
                FileSystemSource::CrossStack {
                    producer,
                    resource_type,
                },
                None,
            ) => CrossStackResolver::new(self.stacks).resolve(
                &self.ctx.region,
                &producer.render(self.ctx)?,
                resource_type,
            ),
            (FileSystemSource::Supplied, Some(id)) => Ok(id.to_string()),
            (FileSystemSource::Supplied, None) => Err(AssemblyError::configuration(
                "file_system_id",
                "cannot find EFS file system id",
            )),
        }
    }

    fn resolve_key(&self, key: Option<&KeySource>) -> Result<Option<String>> {
        match key {
            None => Ok(None),
            Some(KeySource::Arn(arn)) => Ok(Some(arn.clone())),
            Some(KeySource::Alias(alias)) => {
                let record = self
                    .environment
                    .key_alias(&self.ctx.region, alias)?
                    .ok_or_else(|| AssemblyError::MissingLookup {
                        kind: "key alias",
                        name: format!("alias/{}", alias),
                        region: self.ctx.region.clone(),
                    })?;
                Ok(Some(record.key_arn))
            }
        }
    }

    fn resolve_sink(&self) -> Result<NotificationSink> {
        let topic_arn = match &self.profile.sink {
            SinkSource::Arn(pattern) => pattern.render(self.ctx)?,
            SinkSource::Lookup(pattern) => {
                let name = pattern.render(self.ctx)?;
                self.environment
                    .topic(&self.ctx.region, &name)?
                    .ok_or_else(|| AssemblyError::MissingLookup {
                        kind: "topic",
                        name,
                        region: self.ctx.region.clone(),
                    })?
                    .topic_arn
            }
        };
        Ok(NotificationSink { topic_arn })
    }
}
