//! Identity roles and least-privilege policy composition.
//!
//! Statements are generated from a declarative [`PermissionTable`] keyed by
//! capability and resource pattern, so the action verbs attached to a role
//! always come from the capability they were declared for.

use serde::Serialize;
use tracing::debug;

use crate::error::{AssemblyError, Result};
use crate::naming::LogicalIds;

/// Principal assumed by ECS tasks (execution and task roles).
pub const ECS_TASKS_PRINCIPAL: &str = "ecs-tasks.amazonaws.com";
/// Principal assumed by EventBridge when it starts the task.
pub const EVENTS_PRINCIPAL: &str = "events.amazonaws.com";

const ECS_TASK_EXECUTION_POLICY: &str = "service-role/AmazonECSTaskExecutionRolePolicy";
const ECS_EVENTS_POLICY: &str = "service-role/AmazonEC2ContainerServiceEventsRole";

// ---------------------------------------------------------------------------
// Principals and managed policies
// ---------------------------------------------------------------------------

/// The three roles a backup stack needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    /// Used by the platform to pull the image and write logs.
    Execution,
    /// Used by the running backup program.
    Task,
    /// Used by the schedule rule to start the task.
    Scheduler,
}

impl RoleKind {
    /// Construct path used for the role's logical id.
    pub fn construct_path(&self) -> &'static str {
        match self {
            RoleKind::Execution => "executionRole",
            RoleKind::Task => "taskRole",
            RoleKind::Scheduler => "eventsRuleRole",
        }
    }

    pub fn trust_principal(&self) -> ServicePrincipal {
        match self {
            RoleKind::Execution | RoleKind::Task => ServicePrincipal::new(ECS_TASKS_PRINCIPAL),
            RoleKind::Scheduler => ServicePrincipal::new(EVENTS_PRINCIPAL),
        }
    }

    pub fn managed_policies(&self) -> Vec<ManagedPolicy> {
        match self {
            RoleKind::Execution | RoleKind::Task => {
                vec![ManagedPolicy::aws(ECS_TASK_EXECUTION_POLICY)]
            }
            RoleKind::Scheduler => vec![ManagedPolicy::aws(ECS_EVENTS_POLICY)],
        }
    }
}

/// A service principal allowed to assume a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ServicePrincipal(String);

impl ServicePrincipal {
    pub fn new(service: impl Into<String>) -> Self {
        Self(service.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An AWS-managed policy, referenced by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ManagedPolicy(String);

impl ManagedPolicy {
    pub fn aws(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn arn(&self) -> String {
        format!("arn:aws:iam::aws:policy/{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// Resources a statement applies to.
///
/// `Wildcard` is the only way to express "all resources"; an empty
/// `Listed` set is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceSet {
    Listed(Vec<String>),
    Wildcard,
}

impl ResourceSet {
    pub fn arns(&self) -> Vec<String> {
        match self {
            ResourceSet::Listed(arns) => arns.clone(),
            ResourceSet::Wildcard => vec!["*".to_string()],
        }
    }

    fn covers(&self, arn: &str) -> bool {
        match self {
            ResourceSet::Listed(arns) => arns.iter().any(|a| a == arn),
            ResourceSet::Wildcard => true,
        }
    }
}

/// What a statement lets the principal do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Read and write backup objects.
    ObjectReadWrite,
    /// Encrypt with a customer-managed key.
    KeyEncrypt,
    /// Read and write SSM parameters.
    ParameterReadWrite,
}

impl Capability {
    pub fn actions(&self) -> &'static [&'static str] {
        match self {
            Capability::ObjectReadWrite => &["s3:Get*", "s3:ListBucket*", "s3:PutObject*"],
            Capability::KeyEncrypt => &[
                "kms:Encrypt",
                "kms:DescribeKey",
                "kms:GenerateDataKeyWithoutPlaintext",
                "kms:GenerateDataKey",
            ],
            Capability::ParameterReadWrite => &[
                "ssm:PutParameter*",
                "ssm:GetParameter*",
                "ssm:DescribeParameters",
            ],
        }
    }
}

/// A resource pattern a capability is granted over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ResourcePattern {
    /// A bucket and every object in it.
    Bucket(String),
    /// A KMS key ARN.
    Key(String),
    /// An SSM parameter path, any region and account.
    Parameter(String),
}

impl ResourcePattern {
    pub fn arns(&self) -> Vec<String> {
        match self {
            ResourcePattern::Bucket(bucket) => vec![
                format!("arn:aws:s3:::{}", bucket),
                format!("arn:aws:s3:::{}/*", bucket),
            ],
            ResourcePattern::Key(arn) => vec![arn.clone()],
            ResourcePattern::Parameter(path) => vec![format!(
                "arn:aws:ssm:*:*:parameter/{}",
                path.trim_start_matches('/')
            )],
        }
    }

    fn fits(&self, capability: Capability) -> bool {
        matches!(
            (self, capability),
            (ResourcePattern::Bucket(_), Capability::ObjectReadWrite)
                | (ResourcePattern::Key(_), Capability::KeyEncrypt)
                | (ResourcePattern::Parameter(_), Capability::ParameterReadWrite)
        )
    }
}

/// One permission grant. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyStatement {
    effect: Effect,
    actions: Vec<String>,
    resources: ResourceSet,
}

impl PolicyStatement {
    /// Build a statement, rejecting empty action or resource sets.
    pub fn new(effect: Effect, actions: Vec<String>, resources: ResourceSet) -> Result<Self> {
        let statement = Self {
            effect,
            actions,
            resources,
        };
        statement.validate()?;
        Ok(statement)
    }

    /// Allow `capability` over `pattern`.
    pub fn grant(capability: Capability, pattern: &ResourcePattern) -> Result<Self> {
        if !pattern.fits(capability) {
            return Err(AssemblyError::InvalidStatement(format!(
                "capability {:?} cannot be granted over {:?}",
                capability, pattern
            )));
        }
        Self::new(
            Effect::Allow,
            capability.actions().iter().map(|a| a.to_string()).collect(),
            ResourceSet::Listed(pattern.arns()),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.actions.is_empty() {
            return Err(AssemblyError::InvalidStatement(
                "action set must not be empty".to_string(),
            ));
        }
        if let Some(blank) = self.actions.iter().find(|a| a.trim().is_empty()) {
            return Err(AssemblyError::InvalidStatement(format!(
                "blank action '{}'",
                blank
            )));
        }
        match &self.resources {
            ResourceSet::Listed(arns) if arns.is_empty() => Err(AssemblyError::InvalidStatement(
                "resource set must not be empty; use ResourceSet::Wildcard for all resources"
                    .to_string(),
            )),
            ResourceSet::Listed(arns) if arns.iter().any(|a| a.trim().is_empty()) => Err(
                AssemblyError::InvalidStatement("blank resource ARN".to_string()),
            ),
            _ => Ok(()),
        }
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    pub fn resources(&self) -> &ResourceSet {
        &self.resources
    }

    /// Whether this statement allows `action` on `arn`.
    pub fn allows(&self, action: &str, arn: &str) -> bool {
        self.effect == Effect::Allow
            && self.actions.iter().any(|a| a == action)
            && self.resources.covers(arn)
    }
}

// ---------------------------------------------------------------------------
// Permission table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionGrant {
    pub capability: Capability,
    pub pattern: ResourcePattern,
}

/// Declarative list of grants for one role kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PermissionTable {
    grants: Vec<PermissionGrant>,
}

impl PermissionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, capability: Capability, pattern: ResourcePattern) -> Self {
        self.grants.push(PermissionGrant {
            capability,
            pattern,
        });
        self
    }

    pub fn grants(&self) -> &[PermissionGrant] {
        &self.grants
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// Expand every grant into a statement, in table order.
    pub fn statements(&self) -> Result<Vec<PolicyStatement>> {
        self.grants
            .iter()
            .map(|g| PolicyStatement::grant(g.capability, &g.pattern))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// A permission principal in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityRole {
    logical_id: String,
    kind: RoleKind,
    trust: ServicePrincipal,
    managed_policies: Vec<ManagedPolicy>,
    statements: Vec<PolicyStatement>,
    /// Logical ids of roles this role may pass to the service it calls.
    pass_role_targets: Vec<String>,
}

impl IdentityRole {
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    pub fn kind(&self) -> RoleKind {
        self.kind
    }

    pub fn trust(&self) -> &ServicePrincipal {
        &self.trust
    }

    pub fn managed_policies(&self) -> &[ManagedPolicy] {
        &self.managed_policies
    }

    pub fn statements(&self) -> &[PolicyStatement] {
        &self.statements
    }

    pub fn pass_role_targets(&self) -> &[String] {
        &self.pass_role_targets
    }

    /// Whether any attached statement allows `action` on `arn`.
    pub fn allows(&self, action: &str, arn: &str) -> bool {
        self.statements.iter().any(|s| s.allows(action, arn))
    }
}

/// Builds roles and attaches statements for one stack.
#[derive(Debug, Clone)]
pub struct PermissionComposer {
    ids: LogicalIds,
}

impl PermissionComposer {
    pub fn new(ids: LogicalIds) -> Self {
        Self { ids }
    }

    /// Build a role with an explicit trust principal and managed policies.
    pub fn build_role(
        &self,
        kind: RoleKind,
        trust: ServicePrincipal,
        managed_policies: Vec<ManagedPolicy>,
    ) -> Result<IdentityRole> {
        if trust.as_str().trim().is_empty() {
            return Err(AssemblyError::RoleWiring(format!(
                "{:?} role has an empty trust principal",
                kind
            )));
        }
        let role = IdentityRole {
            logical_id: self.ids.id(kind.construct_path()),
            kind,
            trust,
            managed_policies,
            statements: Vec::new(),
            pass_role_targets: Vec::new(),
        };
        debug!(role = %role.logical_id, kind = ?kind, "built role");
        Ok(role)
    }

    /// Build a role with the standard principal and managed policies for its kind.
    pub fn role(&self, kind: RoleKind) -> Result<IdentityRole> {
        self.build_role(kind, kind.trust_principal(), kind.managed_policies())
    }

    /// Append a statement to a role.
    pub fn attach(mut role: IdentityRole, statement: PolicyStatement) -> Result<IdentityRole> {
        statement.validate()?;
        if statement.actions().iter().any(|a| a == "iam:PassRole") {
            return Err(AssemblyError::InvalidStatement(
                "pass-role rights are granted with grant_pass_role, not as a statement"
                    .to_string(),
            ));
        }
        role.statements.push(statement);
        Ok(role)
    }

    /// Append every statement of a table, all or nothing.
    pub fn attach_table(role: IdentityRole, table: &PermissionTable) -> Result<IdentityRole> {
        table
            .statements()?
            .into_iter()
            .try_fold(role, Self::attach)
    }

    /// Let `delegate` pass `target` to the service it invokes.
    pub fn grant_pass_role(delegate: &mut IdentityRole, target: &IdentityRole) -> Result<()> {
        if delegate.kind != RoleKind::Scheduler {
            return Err(AssemblyError::RoleWiring(format!(
                "only the scheduler role may pass roles, not {:?}",
                delegate.kind
            )));
        }
        if target.kind == RoleKind::Scheduler {
            return Err(AssemblyError::RoleWiring(
                "the scheduler role cannot pass itself".to_string(),
            ));
        }
        if !delegate
            .pass_role_targets
            .iter()
            .any(|t| t == &target.logical_id)
        {
            delegate.pass_role_targets.push(target.logical_id.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn composer() -> PermissionComposer {
        PermissionComposer::new(LogicalIds::new("TestStack"))
    }

    #[test]
    fn test_empty_actions_rejected() {
        let err = PolicyStatement::new(
            Effect::Allow,
            vec![],
            ResourceSet::Listed(vec!["arn:aws:s3:::b".to_string()]),
        )
        .unwrap_err();
        assert!(matches!(err, AssemblyError::InvalidStatement(_)));
    }

    #[test]
    fn test_empty_resources_rejected_without_wildcard() {
        let err = PolicyStatement::new(
            Effect::Allow,
            vec!["s3:Get*".to_string()],
            ResourceSet::Listed(vec![]),
        )
        .unwrap_err();
        assert!(matches!(err, AssemblyError::InvalidStatement(_)));

        let wildcard =
            PolicyStatement::new(Effect::Allow, vec!["s3:Get*".to_string()], ResourceSet::Wildcard);
        assert!(wildcard.is_ok());
    }

    #[test]
    fn test_capability_must_fit_pattern() {
        let err =
            PolicyStatement::grant(Capability::KeyEncrypt, &ResourcePattern::Bucket("b".into()))
                .unwrap_err();
        assert!(matches!(err, AssemblyError::InvalidStatement(_)));
    }

    #[test]
    fn test_bucket_grant_covers_bucket_and_objects() {
        let stmt = PolicyStatement::grant(
            Capability::ObjectReadWrite,
            &ResourcePattern::Bucket("archive".into()),
        )
        .unwrap();
        assert!(stmt.allows("s3:PutObject*", "arn:aws:s3:::archive/*"));
        assert!(stmt.allows("s3:ListBucket*", "arn:aws:s3:::archive"));
        assert!(!stmt.allows("s3:DeleteObject", "arn:aws:s3:::archive/*"));
        assert!(stmt
            .actions()
            .iter()
            .all(|a| a.starts_with("s3:")));
    }

    #[test]
    fn test_parameter_pattern_arn() {
        let arns = ResourcePattern::Parameter("/s3copy/secret".into()).arns();
        assert_eq!(arns, vec!["arn:aws:ssm:*:*:parameter/s3copy/secret"]);
    }

    #[test]
    fn test_execution_and_task_roles_distinct() {
        let c = composer();
        let exec = c.role(RoleKind::Execution).unwrap();
        let task = c.role(RoleKind::Task).unwrap();
        assert_ne!(exec.logical_id(), task.logical_id());
        assert_eq!(exec.trust(), task.trust());
        assert_eq!(exec.trust().as_str(), ECS_TASKS_PRINCIPAL);
    }

    #[test]
    fn test_attach_is_append_only() {
        let c = composer();
        let role = c.role(RoleKind::Task).unwrap();
        let table = PermissionTable::new()
            .grant(Capability::ObjectReadWrite, ResourcePattern::Bucket("a".into()))
            .grant(Capability::ParameterReadWrite, ResourcePattern::Parameter("p".into()));
        let role = PermissionComposer::attach_table(role, &table).unwrap();
        assert_eq!(role.statements().len(), 2);

        let extra = PolicyStatement::grant(
            Capability::KeyEncrypt,
            &ResourcePattern::Key("arn:aws:kms:r:1:key/k".into()),
        )
        .unwrap();
        let role = PermissionComposer::attach(role, extra).unwrap();
        assert_eq!(role.statements().len(), 3);
        assert!(role.allows("s3:Get*", "arn:aws:s3:::a"));
    }

    #[test]
    fn test_pass_role_is_not_a_statement() {
        let c = composer();
        let role = c.role(RoleKind::Scheduler).unwrap();
        let stmt = PolicyStatement::new(
            Effect::Allow,
            vec!["iam:PassRole".to_string()],
            ResourceSet::Wildcard,
        )
        .unwrap();
        assert!(PermissionComposer::attach(role, stmt).is_err());
    }

    #[test]
    fn test_grant_pass_role() {
        let c = composer();
        let mut scheduler = c.role(RoleKind::Scheduler).unwrap();
        let exec = c.role(RoleKind::Execution).unwrap();
        let task = c.role(RoleKind::Task).unwrap();

        PermissionComposer::grant_pass_role(&mut scheduler, &exec).unwrap();
        PermissionComposer::grant_pass_role(&mut scheduler, &task).unwrap();
        PermissionComposer::grant_pass_role(&mut scheduler, &task).unwrap();

        assert_eq!(scheduler.pass_role_targets().len(), 2);
        assert!(scheduler.statements().is_empty());
    }

    #[test]
    fn test_only_scheduler_passes_roles() {
        let c = composer();
        let mut task = c.role(RoleKind::Task).unwrap();
        let exec = c.role(RoleKind::Execution).unwrap();
        assert!(matches!(
            PermissionComposer::grant_pass_role(&mut task, &exec),
            Err(AssemblyError::RoleWiring(_))
        ));
    }

    #[test]
    fn test_empty_trust_principal_rejected() {
        let c = composer();
        let err = c
            .build_role(RoleKind::Task, ServicePrincipal::new(""), vec![])
            .unwrap_err();
        assert!(matches!(err, AssemblyError::RoleWiring(_)));
    }
}
