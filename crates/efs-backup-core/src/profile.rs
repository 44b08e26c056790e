//! Named deployment profiles.
//!
//! A profile fixes everything that is policy rather than input: sizing,
//! exit codes, destinations, the producer of the filesystem, where alerts go.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use efs_backup_state::SubnetGroup;
use serde::{Deserialize, Serialize};

use crate::alert::ExitCodeSet;
use crate::context::EnvironmentContext;
use crate::cron::CronExpression;
use crate::error::{AssemblyError, Result};
use crate::naming::NamePattern;
use crate::network::NetworkPolicy;
use crate::permissions::{Capability, PermissionTable, ResourcePattern};
use crate::resolver::EFS_FILE_SYSTEM_TYPE;
use crate::schedule::{BindingRequest, EnvOverrides};
use crate::task::{RegistryCoordinate, TaskSizing};

const EGRESS_DESCRIPTION: &str = "Allows all outbound traffic to facilitate s3Copy";
const DAILY_DESCRIPTION: &str = "Runs daily at specific time";
const DEMO_REGISTRY_ACCOUNT: &str = "054671736399";
const ARCHIVE_REGISTRY_REGION: &str = "ap-southeast-2";
const ARCHIVE_KEY_ALIAS: &str = "nib-rqp-whics-backups";
const AUDIT_BUCKET: &str = "nib-audit-backups-archive-ap-southeast-2";
const AUDIT_KEY_ARN: &str =
    "arn:aws:kms:ap-southeast-2:785810436068:key/56149550-16e7-479b-b2ba-b68e1b42fd6c";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileName {
    /// Nightly copy of the application filesystem to the archive bucket,
    /// plus an audit copy for the production pair.
    Archive,
    /// Single-account demo with an explicitly supplied filesystem.
    Demo,
}

impl ProfileName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileName::Archive => "archive",
            ProfileName::Demo => "demo",
        }
    }
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileName {
    type Err = AssemblyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "archive" => Ok(ProfileName::Archive),
            "demo" => Ok(ProfileName::Demo),
            other => Err(AssemblyError::configuration(
                "profile",
                format!("unknown profile '{}' (expected archive or demo)", other),
            )),
        }
    }
}

/// Where the filesystem id comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileSystemSource {
    /// Exported by an independently deployed stack.
    CrossStack {
        producer: NamePattern,
        resource_type: String,
    },
    /// Passed in by the caller.
    Supplied,
}

/// Encryption key used by a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum KeySource {
    /// Alias name without the `alias/` prefix, resolved through lookup.
    Alias(String),
    Arn(String),
}

/// A bucket the backup is written to, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
    /// Construct name of the schedule rule.
    pub rule_name: String,
    pub bucket: NamePattern,
    pub key: Option<KeySource>,
    pub hour: u32,
    pub minute: u32,
    /// Pass `ENVIRONMENT_NAME` to the container.
    pub include_environment_name: bool,
}

impl Destination {
    /// Container overrides telling the backup program where to write.
    pub fn overrides(&self, ctx: &EnvironmentContext) -> Result<EnvOverrides> {
        let mut overrides = EnvOverrides::new().set("S3_BUCKET", self.bucket.render(ctx)?);
        overrides = match &self.key {
            Some(KeySource::Alias(alias)) => overrides
                .set("KMS_KEY_ARN", "false")
                .set("KMS_KEY", alias.as_str()),
            Some(KeySource::Arn(arn)) => overrides
                .set("KMS_KEY_ARN", "true")
                .set("KMS_KEY", arn.as_str()),
            None => overrides,
        };
        if self.include_environment_name {
            overrides = overrides.set("ENVIRONMENT_NAME", ctx.environment_name.as_str());
        }
        Ok(overrides)
    }

    /// Task-role grants this destination needs. `key_arn` is the resolved key.
    pub fn grants(
        &self,
        ctx: &EnvironmentContext,
        key_arn: Option<&str>,
    ) -> Result<PermissionTable> {
        let mut table = PermissionTable::new().grant(
            Capability::ObjectReadWrite,
            ResourcePattern::Bucket(self.bucket.render(ctx)?),
        );
        match (&self.key, key_arn) {
            (Some(_), Some(arn)) => {
                table = table.grant(Capability::KeyEncrypt, ResourcePattern::Key(arn.to_string()));
            }
            (Some(key), None) => {
                return Err(AssemblyError::configuration(
                    "key",
                    format!("key {:?} for {} was not resolved", key, self.rule_name),
                ));
            }
            (None, _) => {}
        }
        Ok(table)
    }

    pub fn binding_request(&self, ctx: &EnvironmentContext) -> Result<BindingRequest> {
        Ok(BindingRequest {
            name: self.rule_name.clone(),
            schedule: CronExpression::daily(self.hour, self.minute)?,
            description: DAILY_DESCRIPTION.to_string(),
            overrides: self.overrides(ctx)?,
        })
    }
}

/// A destination that only exists when `predicate` holds for the context.
#[derive(Debug, Clone, Serialize)]
pub struct SecondaryDestination {
    pub destination: Destination,
    /// Human-readable form of the predicate.
    pub condition: &'static str,
    #[serde(skip)]
    pub predicate: fn(&EnvironmentContext) -> bool,
}

impl SecondaryDestination {
    pub fn applies_to(&self, ctx: &EnvironmentContext) -> bool {
        (self.predicate)(ctx)
    }
}

/// The production stage of the production slice.
pub fn production_pair(ctx: &EnvironmentContext) -> bool {
    ctx.stage == "prod" && ctx.slice == "prod"
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseEnvironment {
    /// Deployment identity (`RQP_*`) plus fixed backup settings.
    Identity,
    Empty,
}

impl BaseEnvironment {
    pub fn render(&self, ctx: &EnvironmentContext) -> BTreeMap<String, String> {
        match self {
            BaseEnvironment::Identity => [
                ("RQP_REPOSITORY", ctx.repository.as_str()),
                ("RQP_APPLICATION", ctx.application.as_str()),
                ("RQP_APPLICATION_VERSION", ctx.application_version.as_str()),
                ("RQP_REGION", ctx.region.as_str()),
                ("RQP_STAGE", ctx.stage.as_str()),
                ("RQP_ZONE", ctx.zone.as_str()),
                ("RQP_SLICE", ctx.slice.as_str()),
                ("COMPANY", "nib"),
                ("DAYS", "2"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            BaseEnvironment::Empty => BTreeMap::new(),
        }
    }
}

/// Where the failure topic comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SinkSource {
    /// Existing topic, found by name.
    Lookup(NamePattern),
    /// Topic ARN built from the context.
    Arn(NamePattern),
}

/// Which repository the image is pulled from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    /// Repository named after the application, tagged with its version.
    Application,
    /// Repository and tag supplied by the caller. An absent tag means `none`.
    Supplied,
}

/// Caller-supplied image settings; which ones are needed depends on the profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSettings {
    pub registry_account: Option<String>,
    pub registry_region: Option<String>,
    pub repository: Option<String>,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StackProfile {
    pub name: ProfileName,
    pub stack_name: NamePattern,
    pub sizing: TaskSizing,
    pub exit_codes: ExitCodeSet,
    pub container_name: String,
    pub volume_name: String,
    pub container_path: String,
    pub file_system: FileSystemSource,
    pub network: NetworkPolicy,
    pub primary: Destination,
    pub secondary: Option<SecondaryDestination>,
    /// SSM parameter the backup program keeps its state in.
    pub parameter_path: Option<String>,
    pub base_environment: BaseEnvironment,
    pub log_retention_days: Option<u32>,
    pub log_stream_prefix: String,
    pub sink: SinkSource,
    pub image: ImageSource,
    pub default_registry_account: Option<String>,
    /// Registry region when none is supplied; `None` follows the deployment region.
    pub default_registry_region: Option<String>,
}

impl StackProfile {
    pub fn named(name: ProfileName) -> Self {
        match name {
            ProfileName::Archive => Self::archive(),
            ProfileName::Demo => Self::demo(),
        }
    }

    pub fn archive() -> Self {
        Self {
            name: ProfileName::Archive,
            stack_name: NamePattern::new("EFSBackupToS3Stack"),
            sizing: TaskSizing::new(2048, 8192),
            exit_codes: ExitCodeSet::standard(),
            container_name: "taskDefinitionContainer".to_string(),
            volume_name: "efs".to_string(),
            container_path: "/mnt/whicsefs".to_string(),
            file_system: FileSystemSource::CrossStack {
                producer: NamePattern::new("rqp-whics-app-{zone}-{slice}-stack"),
                resource_type: EFS_FILE_SYSTEM_TYPE.to_string(),
            },
            network: NetworkPolicy {
                vpc: NamePattern::new("{network_handle}"),
                subnet_group: SubnetGroup::Private,
                peer_security_groups: vec![NamePattern::new(
                    "rqp-whics-app-{zone}-{slice}-efsSgForFargate",
                )],
                egress_description: EGRESS_DESCRIPTION.to_string(),
            },
            primary: Destination {
                rule_name: "cronJobTriggerArchive".to_string(),
                bucket: NamePattern::new("nib-{stage}-{zone}-backups-archive-{region}"),
                key: Some(KeySource::Alias(ARCHIVE_KEY_ALIAS.to_string())),
                hour: 15,
                minute: 0,
                include_environment_name: false,
            },
            secondary: Some(SecondaryDestination {
                destination: Destination {
                    rule_name: "cronJobTriggerAudit".to_string(),
                    bucket: NamePattern::new(AUDIT_BUCKET),
                    key: Some(KeySource::Arn(AUDIT_KEY_ARN.to_string())),
                    hour: 17,
                    minute: 0,
                    include_environment_name: false,
                },
                condition: "stage == prod && slice == prod",
                predicate: production_pair,
            }),
            parameter_path: Some("s3copy/secret".to_string()),
            base_environment: BaseEnvironment::Identity,
            log_retention_days: Some(7),
            log_stream_prefix: "ecs".to_string(),
            sink: SinkSource::Lookup(NamePattern::new("rqp-{stage}-{zone}-alerts")),
            image: ImageSource::Application,
            default_registry_account: None,
            default_registry_region: Some(ARCHIVE_REGISTRY_REGION.to_string()),
        }
    }

    pub fn demo() -> Self {
        Self {
            name: ProfileName::Demo,
            stack_name: NamePattern::new("ecs-efs-{environment_name}"),
            sizing: TaskSizing::new(2048, 4096),
            exit_codes: ExitCodeSet::standard(),
            container_name: "taskDefinitionContainer".to_string(),
            volume_name: "efs".to_string(),
            container_path: "/mnt/data".to_string(),
            file_system: FileSystemSource::Supplied,
            network: NetworkPolicy {
                vpc: NamePattern::new("vpc-{account_name}"),
                subnet_group: SubnetGroup::Private,
                peer_security_groups: vec![],
                egress_description: EGRESS_DESCRIPTION.to_string(),
            },
            primary: Destination {
                rule_name: "cronJobTriggerArchive".to_string(),
                bucket: NamePattern::new("aws-cdk-ecs-output-{account_name}"),
                key: None,
                hour: 15,
                minute: 0,
                include_environment_name: true,
            },
            secondary: None,
            parameter_path: None,
            base_environment: BaseEnvironment::Empty,
            log_retention_days: None,
            log_stream_prefix: "ecs".to_string(),
            sink: SinkSource::Arn(NamePattern::new(
                "arn:aws:sns:{region}:{account_id}:aws-cdk-ecs-demo",
            )),
            image: ImageSource::Supplied,
            default_registry_account: Some(DEMO_REGISTRY_ACCOUNT.to_string()),
            default_registry_region: None,
        }
    }

    /// Task-role grants every deployment gets. `primary_key_arn` is the
    /// resolved key of the primary destination, if it has one.
    pub fn baseline_grants(
        &self,
        ctx: &EnvironmentContext,
        primary_key_arn: Option<&str>,
    ) -> Result<PermissionTable> {
        let mut table = self.primary.grants(ctx, primary_key_arn)?;
        if let Some(path) = &self.parameter_path {
            table = table.grant(
                Capability::ParameterReadWrite,
                ResourcePattern::Parameter(path.clone()),
            );
        }
        Ok(table)
    }

    /// Secondary destination if its predicate holds for `ctx`.
    pub fn active_secondary(&self, ctx: &EnvironmentContext) -> Option<&Destination> {
        self.secondary
            .as_ref()
            .filter(|s| s.applies_to(ctx))
            .map(|s| &s.destination)
    }

    /// Container image coordinate for this profile.
    pub fn image_coordinate(
        &self,
        ctx: &EnvironmentContext,
        settings: &ImageSettings,
    ) -> Result<RegistryCoordinate> {
        let account = settings
            .registry_account
            .clone()
            .or_else(|| self.default_registry_account.clone())
            .ok_or_else(|| {
                AssemblyError::configuration("registry_account", "no image registry account set")
            })?;
        let region = settings
            .registry_region
            .clone()
            .or_else(|| self.default_registry_region.clone())
            .unwrap_or_else(|| ctx.region.clone());

        let (repository, tag) = match self.image {
            ImageSource::Application => (
                settings
                    .repository
                    .clone()
                    .unwrap_or_else(|| ctx.application.clone()),
                settings
                    .tag
                    .clone()
                    .unwrap_or_else(|| ctx.application_version.clone()),
            ),
            ImageSource::Supplied => (
                settings.repository.clone().ok_or_else(|| {
                    AssemblyError::configuration("repository", "no image repository set")
                })?,
                settings.tag.clone().unwrap_or_else(|| "none".to_string()),
            ),
        };

        let coordinate = RegistryCoordinate {
            account,
            region,
            repository,
            tag,
        };
        coordinate.validate()?;
        Ok(coordinate)
    }
}
