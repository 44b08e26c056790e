//! Lookup trait definitions for already-deployed state
//!
//! These traits define the read-only questions the assembly core asks about
//! infrastructure it does not own:
//! - `StackResourceLookup`: resources exported by independently deployed stacks
//! - `EnvironmentLookup`: VPCs, security groups, key aliases and topics
//!
//! Lookups are synchronous. The snapshot backend answers from a JSON file
//! loaded up front; in-memory fakes are provided via the `fakes` module.

use serde::{Deserialize, Serialize};

use crate::error::StateResult;

// ---------------------------------------------------------------------------
// Stacks
// ---------------------------------------------------------------------------

/// Deployment status of a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackStatus {
    CreateInProgress,
    CreateFailed,
    CreateComplete,
    RollbackInProgress,
    RollbackFailed,
    RollbackComplete,
    DeleteInProgress,
    DeleteFailed,
    DeleteComplete,
    UpdateInProgress,
    UpdateCompleteCleanupInProgress,
    UpdateComplete,
    UpdateFailed,
    UpdateRollbackInProgress,
    UpdateRollbackFailed,
    UpdateRollbackCompleteCleanupInProgress,
    UpdateRollbackComplete,
    ImportInProgress,
    ImportComplete,
    ImportRollbackInProgress,
    ImportRollbackFailed,
    ImportRollbackComplete,
    #[serde(other)]
    Unknown,
}

impl StackStatus {
    /// Whether the stack's resources can be trusted as live.
    ///
    /// Updates, rollbacks of updates and their cleanup phases keep the
    /// previously deployed resources in place. Stacks that never finished
    /// creating, were rolled back on create, or are being torn down are not.
    pub fn is_usable(&self) -> bool {
        matches!(
            self,
            StackStatus::CreateComplete
                | StackStatus::UpdateInProgress
                | StackStatus::UpdateCompleteCleanupInProgress
                | StackStatus::UpdateComplete
                | StackStatus::UpdateRollbackInProgress
                | StackStatus::UpdateRollbackCompleteCleanupInProgress
                | StackStatus::UpdateRollbackComplete
                | StackStatus::ImportComplete
                | StackStatus::ImportRollbackComplete
        )
    }
}

/// A single resource inside a deployed stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackResourceRecord {
    /// Logical id inside the producing template
    pub logical_id: String,
    /// CloudFormation resource type, e.g. `AWS::EFS::FileSystem`
    pub resource_type: String,
    /// Physical id assigned at deploy time
    pub physical_id: String,
}

/// A deployed stack and its resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackRecord {
    pub region: String,
    pub name: String,
    pub status: StackStatus,
    #[serde(default)]
    pub resources: Vec<StackResourceRecord>,
}

impl StackRecord {
    /// Resources of the given CloudFormation type, in template order.
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = &'a StackResourceRecord> + 'a {
        self.resources
            .iter()
            .filter(move |r| r.resource_type == resource_type)
    }
}

/// Read access to stacks deployed by other teams or pipelines.
pub trait StackResourceLookup: Send + Sync {
    /// Find a stack by region and exact name. `Ok(None)` if it does not exist.
    fn stack(&self, region: &str, stack_name: &str) -> StateResult<Option<StackRecord>>;
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Subnet tier inside a VPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubnetGroup {
    Public,
    Private,
    Isolated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetRecord {
    pub subnet_id: String,
    pub group: SubnetGroup,
    pub availability_zone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcRecord {
    pub region: String,
    pub name: String,
    pub vpc_id: String,
    #[serde(default)]
    pub subnets: Vec<SubnetRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupRecord {
    pub region: String,
    pub vpc_id: String,
    pub name: String,
    pub group_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAliasRecord {
    pub region: String,
    /// Alias name without the `alias/` prefix
    pub alias: String,
    pub key_arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRecord {
    pub region: String,
    pub name: String,
    pub topic_arn: String,
}

/// Read access to shared account infrastructure.
pub trait EnvironmentLookup: Send + Sync {
    /// Find a VPC by its name tag.
    fn vpc(&self, region: &str, name: &str) -> StateResult<Option<VpcRecord>>;

    /// Find a security group by name within a VPC.
    fn security_group(
        &self,
        region: &str,
        vpc_id: &str,
        name: &str,
    ) -> StateResult<Option<SecurityGroupRecord>>;

    /// Resolve a KMS alias (without `alias/`) to its key.
    fn key_alias(&self, region: &str, alias: &str) -> StateResult<Option<KeyAliasRecord>>;

    /// Find a notification topic by name.
    fn topic(&self, region: &str, name: &str) -> StateResult<Option<TopicRecord>>;
}
