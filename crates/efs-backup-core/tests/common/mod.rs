//! Shared fixtures for assembly integration tests.

#![allow(dead_code)]

use efs_backup_core::{AssemblyInputs, EnvironmentContext, RegistryCoordinate};
use efs_backup_state::fakes::MemoryStateLookup;

pub const REGION: &str = "ap-southeast-2";
pub const VPC_ID: &str = "vpc-0abc";
pub const KEY_ARN: &str = "arn:aws:kms:ap-southeast-2:123456789012:key/archive";
pub const TOPIC_ARN: &str = "arn:aws:sns:ap-southeast-2:123456789012:rqp-alerts";

pub fn context(stage: &str, slice: &str) -> EnvironmentContext {
    EnvironmentContext {
        region: REGION.to_string(),
        account_id: "123456789012".to_string(),
        account_name: "sandpit1".to_string(),
        environment_name: "kate".to_string(),
        stage: stage.to_string(),
        zone: "z1".to_string(),
        slice: slice.to_string(),
        application: "efs-backup".to_string(),
        application_version: "1.4.2".to_string(),
        repository: "efs-backup-to-s3".to_string(),
        network_handle: "vpc-main".to_string(),
    }
}

pub fn archive_inputs() -> AssemblyInputs {
    AssemblyInputs {
        image: RegistryCoordinate {
            account: "999999999999".to_string(),
            region: REGION.to_string(),
            repository: "efs-backup".to_string(),
            tag: "1.4.2".to_string(),
        },
        file_system_id: None,
        sizing: None,
    }
}

/// Deployed state answering every archive-profile lookup for `ctx`.
pub fn archive_state(ctx: &EnvironmentContext) -> MemoryStateLookup {
    MemoryStateLookup::new()
        .with_stack_resource(
            REGION,
            &format!("rqp-whics-app-{}-{}-stack", ctx.zone, ctx.slice),
            "AWS::EFS::FileSystem",
            "fs-0123456789",
        )
        .with_vpc(REGION, &ctx.network_handle, VPC_ID, &["a", "b", "c"])
        .with_security_group(
            REGION,
            VPC_ID,
            &format!("rqp-whics-app-{}-{}-efsSgForFargate", ctx.zone, ctx.slice),
            "sg-efs",
        )
        .with_key_alias(REGION, "nib-rqp-whics-backups", KEY_ARN)
        .with_topic(
            REGION,
            &format!("rqp-{}-{}-alerts", ctx.stage, ctx.zone),
            TOPIC_ARN,
        )
}
