//! VPC, subnet selection, security boundary and cluster.

use efs_backup_state::{EnvironmentLookup, SubnetGroup};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::EnvironmentContext;
use crate::error::{AssemblyError, Result};
use crate::naming::{LogicalIds, NamePattern};

/// How a profile places its task inside the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    /// Name of the existing VPC, e.g. `{network_handle}` or `vpc-{account_name}`.
    pub vpc: NamePattern,
    /// Subnet tier the task runs in.
    pub subnet_group: SubnetGroup,
    /// Existing groups to join, e.g. the one allowed to reach the filesystem.
    pub peer_security_groups: Vec<NamePattern>,
    pub egress_description: String,
}

/// Security group created by this stack. Allows all outbound traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EgressSecurityGroup {
    pub logical_id: String,
    pub description: String,
    pub vpc_id: String,
}

/// Reference to a security group attached to the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SecurityGroupRef {
    Owned { logical_id: String },
    Imported { name: String, group_id: String },
}

/// Resolved placement of the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkTopology {
    pub vpc_name: String,
    pub vpc_id: String,
    pub subnet_group: SubnetGroup,
    pub subnet_ids: Vec<String>,
    pub egress_group: EgressSecurityGroup,
    pub peer_groups: Vec<SecurityGroupRef>,
}

impl NetworkTopology {
    /// Groups attached to the task: the owned egress group first, then peers.
    pub fn security_groups(&self) -> Vec<SecurityGroupRef> {
        std::iter::once(SecurityGroupRef::Owned {
            logical_id: self.egress_group.logical_id.clone(),
        })
        .chain(self.peer_groups.iter().cloned())
        .collect()
    }
}

/// ECS cluster hosting the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cluster {
    pub logical_id: String,
    pub vpc_id: String,
}

impl Cluster {
    pub fn new(ids: &LogicalIds, network: &NetworkTopology) -> Self {
        Self {
            logical_id: ids.id("cluster"),
            vpc_id: network.vpc_id.clone(),
        }
    }
}

pub struct NetworkTopologyResolver<'a> {
    lookup: &'a dyn EnvironmentLookup,
}

impl<'a> NetworkTopologyResolver<'a> {
    pub fn new(lookup: &'a dyn EnvironmentLookup) -> Self {
        Self { lookup }
    }

    pub fn resolve(
        &self,
        ctx: &EnvironmentContext,
        policy: &NetworkPolicy,
        ids: &LogicalIds,
    ) -> Result<NetworkTopology> {
        let vpc_name = policy.vpc.render(ctx)?;
        let vpc = self
            .lookup
            .vpc(&ctx.region, &vpc_name)?
            .ok_or_else(|| AssemblyError::MissingLookup {
                kind: "vpc",
                name: vpc_name.clone(),
                region: ctx.region.clone(),
            })?;

        let subnet_ids: Vec<String> = vpc
            .subnets
            .iter()
            .filter(|s| s.group == policy.subnet_group)
            .map(|s| s.subnet_id.clone())
            .collect();
        if subnet_ids.is_empty() {
            return Err(AssemblyError::MissingLookup {
                kind: "subnet group",
                name: format!("{:?} in {}", policy.subnet_group, vpc.name),
                region: ctx.region.clone(),
            });
        }

        let mut peer_groups = Vec::with_capacity(policy.peer_security_groups.len());
        for pattern in &policy.peer_security_groups {
            let name = pattern.render(ctx)?;
            let group = self
                .lookup
                .security_group(&ctx.region, &vpc.vpc_id, &name)?
                .ok_or_else(|| AssemblyError::MissingLookup {
                    kind: "security group",
                    name: name.clone(),
                    region: ctx.region.clone(),
                })?;
            debug!(name = %name, group_id = %group.group_id, "resolved peer security group");
            peer_groups.push(SecurityGroupRef::Imported {
                name,
                group_id: group.group_id,
            });
        }

        Ok(NetworkTopology {
            vpc_name: vpc.name,
            subnet_group: policy.subnet_group,
            subnet_ids,
            egress_group: EgressSecurityGroup {
                logical_id: ids.id("EcsEgressSg"),
                description: policy.egress_description.clone(),
                vpc_id: vpc.vpc_id.clone(),
            },
            vpc_id: vpc.vpc_id,
            peer_groups,
        })
    }
}
