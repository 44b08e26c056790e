//! End-to-end assembly scenarios over in-memory deployed state.

mod common;

use common::*;
use efs_backup_core::{
    assemble, AssemblyError, AssemblyInputs, ImageSettings, ProfileName, RoleKind, StackProfile,
    TaskSizing,
};
use efs_backup_state::fakes::{LookupCall, MemoryStateLookup, UnavailableLookup};
use efs_backup_state::StateSnapshot;

const AUDIT_BUCKET_ARN: &str = "arn:aws:s3:::nib-audit-backups-archive-ap-southeast-2/*";
const AUDIT_KEY_ARN: &str =
    "arn:aws:kms:ap-southeast-2:785810436068:key/56149550-16e7-479b-b2ba-b68e1b42fd6c";

// ===========================================================================
// Binding matrix
// ===========================================================================

#[test]
fn secondary_binding_exists_only_for_production_pair() {
    let profile = StackProfile::archive();
    for stage in ["dev", "staging", "prod"] {
        for slice in ["prod", "non-prod"] {
            let ctx = context(stage, slice);
            let state = archive_state(&ctx);
            let graph = assemble(&ctx, &profile, &archive_inputs(), &state, &state)
                .unwrap_or_else(|e| panic!("{}/{} failed: {}", stage, slice, e));

            let expected = if stage == "prod" && slice == "prod" { 2 } else { 1 };
            assert_eq!(
                graph.schedule_bindings.len(),
                expected,
                "{}/{} binding count",
                stage,
                slice
            );
            assert_eq!(
                graph.schedule_bindings.iter().filter(|b| b.conditional).count(),
                expected - 1
            );
        }
    }
}

#[test]
fn every_graph_has_one_execution_and_one_task_role() {
    let ctx = context("staging", "non-prod");
    let state = archive_state(&ctx);
    let graph =
        assemble(&ctx, &StackProfile::archive(), &archive_inputs(), &state, &state).unwrap();

    for kind in [RoleKind::Execution, RoleKind::Task, RoleKind::Scheduler] {
        assert_eq!(graph.roles.iter().filter(|r| r.kind() == kind).count(), 1);
    }
    assert!(graph.roles.iter().all(|r| !r.trust().as_str().is_empty()));
    assert_ne!(
        graph.role(RoleKind::Execution).unwrap().logical_id(),
        graph.role(RoleKind::Task).unwrap().logical_id()
    );
}

// ===========================================================================
// Scenarios
// ===========================================================================

#[test]
fn dev_non_prod_gets_primary_only() {
    let ctx = context("dev", "non-prod");
    let state = archive_state(&ctx);
    let graph =
        assemble(&ctx, &StackProfile::archive(), &archive_inputs(), &state, &state).unwrap();

    assert_eq!(graph.schedule_bindings.len(), 1);
    let primary = &graph.schedule_bindings[0];
    assert_eq!(primary.schedule.schedule_expression(), "cron(0 15 * * ? *)");

    let env = primary.effective_environment(&graph.task_spec);
    assert_eq!(env["S3_BUCKET"], "nib-dev-z1-backups-archive-ap-southeast-2");
    assert_eq!(env["KMS_KEY_ARN"], "false");
    assert_eq!(env["KMS_KEY"], "nib-rqp-whics-backups");
    assert_eq!(env["RQP_SLICE"], "non-prod");
    assert_eq!(env["DAYS"], "2");

    let task_role = graph.role(RoleKind::Task).unwrap();
    assert!(task_role.allows(
        "s3:PutObject*",
        "arn:aws:s3:::nib-dev-z1-backups-archive-ap-southeast-2/*"
    ));
    assert!(task_role.allows("kms:GenerateDataKey", KEY_ARN));
    assert!(task_role.allows(
        "ssm:GetParameter*",
        "arn:aws:ssm:*:*:parameter/s3copy/secret"
    ));
    assert!(!task_role.allows("s3:PutObject*", AUDIT_BUCKET_ARN));
    assert!(!task_role.allows("kms:Encrypt", AUDIT_KEY_ARN));
    assert_eq!(task_role.statements().len(), 3);
}

#[test]
fn prod_prod_adds_audit_binding_and_grants() {
    let ctx = context("prod", "prod");
    let state = archive_state(&ctx);
    let graph =
        assemble(&ctx, &StackProfile::archive(), &archive_inputs(), &state, &state).unwrap();

    assert_eq!(graph.schedule_bindings.len(), 2);
    let audit = &graph.schedule_bindings[1];
    assert!(audit.conditional);
    assert_eq!(audit.schedule.schedule_expression(), "cron(0 17 * * ? *)");
    let env = audit.effective_environment(&graph.task_spec);
    assert_eq!(env["S3_BUCKET"], "nib-audit-backups-archive-ap-southeast-2");
    assert_eq!(env["KMS_KEY_ARN"], "true");
    assert_eq!(env["KMS_KEY"], AUDIT_KEY_ARN);

    let task_role = graph.role(RoleKind::Task).unwrap();
    assert_eq!(task_role.statements().len(), 5);
    assert!(task_role.allows("s3:PutObject*", AUDIT_BUCKET_ARN));
    assert!(task_role.allows("kms:Encrypt", AUDIT_KEY_ARN));
    assert!(task_role.allows("kms:Encrypt", KEY_ARN));
}

#[test]
fn bindings_share_task_cluster_and_network() {
    let ctx = context("prod", "prod");
    let state = archive_state(&ctx);
    let graph =
        assemble(&ctx, &StackProfile::archive(), &archive_inputs(), &state, &state).unwrap();

    let scheduler = graph.role(RoleKind::Scheduler).unwrap();
    for binding in &graph.schedule_bindings {
        assert_eq!(binding.task_definition, *graph.task_spec.identity());
        assert_eq!(binding.cluster_id, graph.cluster.logical_id);
        assert_eq!(binding.role_id, scheduler.logical_id());
        assert_eq!(binding.subnet_ids, graph.network.subnet_ids);
        assert_eq!(binding.security_groups.len(), 2);
    }
    assert_eq!(scheduler.pass_role_targets().len(), 2);
    assert!(scheduler.statements().is_empty());
}

#[test]
fn matcher_watches_the_assembled_task() {
    let ctx = context("dev", "non-prod");
    let state = archive_state(&ctx);
    let graph =
        assemble(&ctx, &StackProfile::archive(), &archive_inputs(), &state, &state).unwrap();

    assert_eq!(
        graph.failure_matcher.pattern.task_definition,
        *graph.task_spec.identity()
    );
    assert_eq!(graph.failure_matcher.sink.topic_arn, TOPIC_ARN);
    assert_eq!(graph.failure_matcher.pattern.exit_codes.codes(), vec![1, 137, 139, 255]);
}

#[test]
fn no_statement_is_empty() {
    let ctx = context("prod", "prod");
    let state = archive_state(&ctx);
    let graph =
        assemble(&ctx, &StackProfile::archive(), &archive_inputs(), &state, &state).unwrap();

    for role in &graph.roles {
        for statement in role.statements() {
            assert!(!statement.actions().is_empty());
            assert!(!statement.resources().arns().is_empty());
            assert!(statement.validate().is_ok());
        }
    }
}

#[test]
fn task_spec_mounts_resolved_filesystem() {
    let ctx = context("dev", "non-prod");
    let state = archive_state(&ctx);
    let graph =
        assemble(&ctx, &StackProfile::archive(), &archive_inputs(), &state, &state).unwrap();

    assert_eq!(graph.file_system_id, "fs-0123456789");
    assert_eq!(graph.task_spec.volumes[0].file_system_id, "fs-0123456789");
    assert_eq!(graph.task_spec.container.mount_points[0].container_path, "/mnt/whicsefs");
    assert_eq!(graph.task_spec.sizing.cpu, 2048);
    assert_eq!(graph.task_spec.sizing.memory_mib, 8192);
    assert_eq!(graph.log_group.retention_days, Some(7));
}

#[test]
fn digest_is_deterministic() {
    let ctx = context("prod", "prod");
    let profile = StackProfile::archive();
    let first = {
        let state = archive_state(&ctx);
        assemble(&ctx, &profile, &archive_inputs(), &state, &state).unwrap()
    };
    let second = {
        let state = archive_state(&ctx);
        assemble(&ctx, &profile, &archive_inputs(), &state, &state).unwrap()
    };
    assert_eq!(first, second);
    assert_eq!(first.digest().unwrap(), second.digest().unwrap());

    let other_ctx = context("dev", "prod");
    let state = archive_state(&other_ctx);
    let other = assemble(&other_ctx, &profile, &archive_inputs(), &state, &state).unwrap();
    assert_ne!(first.digest().unwrap(), other.digest().unwrap());
}

// ===========================================================================
// Failures
// ===========================================================================

#[test]
fn missing_producer_stack_fails_before_any_other_lookup() {
    let ctx = context("prod", "prod");
    let state = MemoryStateLookup::new()
        .with_vpc(REGION, &ctx.network_handle, VPC_ID, &["a"])
        .with_key_alias(REGION, "nib-rqp-whics-backups", KEY_ARN);

    let err = assemble(&ctx, &StackProfile::archive(), &archive_inputs(), &state, &state)
        .unwrap_err();
    match err {
        AssemblyError::MissingCrossStackResource { stack_name, .. } => {
            assert_eq!(stack_name, "rqp-whics-app-z1-prod-stack");
        }
        other => panic!("expected MissingCrossStackResource, got {:?}", other),
    }
    assert_eq!(
        state.calls(),
        vec![LookupCall::Stack {
            region: REGION.to_string(),
            name: "rqp-whics-app-z1-prod-stack".to_string(),
        }]
    );
}

#[test]
fn producer_in_other_slice_is_not_used() {
    let ctx = context("prod", "prod");
    let state = archive_state(&context("prod", "non-prod"));
    let err = assemble(&ctx, &StackProfile::archive(), &archive_inputs(), &state, &state)
        .unwrap_err();
    assert!(matches!(err, AssemblyError::MissingCrossStackResource { .. }));
}

/// Archive state for dev/non-prod with the key alias and topic optional.
fn partial_archive_state(with_key: bool, with_topic: bool) -> MemoryStateLookup {
    let mut state = MemoryStateLookup::new()
        .with_stack_resource(
            REGION,
            "rqp-whics-app-z1-non-prod-stack",
            "AWS::EFS::FileSystem",
            "fs-1",
        )
        .with_vpc(REGION, "vpc-main", VPC_ID, &["a"])
        .with_security_group(REGION, VPC_ID, "rqp-whics-app-z1-non-prod-efsSgForFargate", "sg-1");
    if with_key {
        state = state.with_key_alias(REGION, "nib-rqp-whics-backups", KEY_ARN);
    }
    if with_topic {
        state = state.with_topic(REGION, "rqp-dev-z1-alerts", TOPIC_ARN);
    }
    state
}

#[test]
fn missing_key_alias_is_a_lookup_error() {
    let ctx = context("dev", "non-prod");
    let state = partial_archive_state(false, true);
    let err = assemble(&ctx, &StackProfile::archive(), &archive_inputs(), &state, &state)
        .unwrap_err();
    assert!(matches!(err, AssemblyError::MissingLookup { kind: "key alias", .. }));
}

#[test]
fn missing_alert_topic_is_a_lookup_error() {
    let ctx = context("dev", "non-prod");
    let state = partial_archive_state(true, false);
    let err = assemble(&ctx, &StackProfile::archive(), &archive_inputs(), &state, &state)
        .unwrap_err();
    assert!(matches!(err, AssemblyError::MissingLookup { kind: "topic", .. }));

    let state = partial_archive_state(true, true);
    assert!(assemble(&ctx, &StackProfile::archive(), &archive_inputs(), &state, &state).is_ok());
}

#[test]
fn backend_failure_aborts_assembly() {
    let ctx = context("dev", "non-prod");
    let lookup = UnavailableLookup::new("throttled");
    let err = assemble(&ctx, &StackProfile::archive(), &archive_inputs(), &lookup, &lookup)
        .unwrap_err();
    assert!(matches!(err, AssemblyError::State(_)));
}

#[test]
fn invalid_context_is_rejected_before_lookups() {
    let mut ctx = context("dev", "non-prod");
    ctx.stage = String::new();
    let state = archive_state(&context("dev", "non-prod"));
    let err = assemble(&ctx, &StackProfile::archive(), &archive_inputs(), &state, &state)
        .unwrap_err();
    assert!(matches!(err, AssemblyError::Configuration { .. }));
    assert!(state.calls().is_empty());
}

#[test]
fn archive_rejects_explicit_filesystem_id() {
    let ctx = context("dev", "non-prod");
    let state = archive_state(&ctx);
    let inputs = AssemblyInputs {
        file_system_id: Some("fs-explicit".to_string()),
        ..archive_inputs()
    };
    let err = assemble(&ctx, &StackProfile::archive(), &inputs, &state, &state).unwrap_err();
    assert!(matches!(err, AssemblyError::Configuration { .. }));
}

#[test]
fn requested_sizing_must_match_profile() {
    let ctx = context("dev", "non-prod");
    let state = archive_state(&ctx);

    let matching = AssemblyInputs {
        sizing: Some(TaskSizing::new(2048, 8192)),
        ..archive_inputs()
    };
    let graph = assemble(&ctx, &StackProfile::archive(), &matching, &state, &state).unwrap();
    assert_eq!(graph.task_spec.sizing, TaskSizing::new(2048, 8192));

    let other = AssemblyInputs {
        sizing: Some(TaskSizing::new(1024, 2048)),
        ..archive_inputs()
    };
    let err = assemble(&ctx, &StackProfile::archive(), &other, &state, &state).unwrap_err();
    assert!(matches!(
        err,
        AssemblyError::InvalidSizing { cpu: 1024, memory_mib: 2048, .. }
    ));
}

// ===========================================================================
// Demo profile
// ===========================================================================

fn demo_state() -> MemoryStateLookup {
    MemoryStateLookup::new().with_vpc(REGION, "vpc-sandpit1", "vpc-demo", &["a", "b"])
}

fn demo_inputs(file_system_id: Option<&str>) -> AssemblyInputs {
    let ctx = context("dev", "non-prod");
    AssemblyInputs {
        image: StackProfile::demo()
            .image_coordinate(
                &ctx,
                &ImageSettings {
                    repository: Some("s3copy".to_string()),
                    ..Default::default()
                },
            )
            .unwrap(),
        file_system_id: file_system_id.map(str::to_string),
        sizing: None,
    }
}

#[test]
fn demo_profile_uses_supplied_filesystem() {
    let ctx = context("prod", "prod");
    let state = demo_state();
    let profile = StackProfile::demo();
    let graph = assemble(&ctx, &profile, &demo_inputs(Some("fs-demo")), &state, &state).unwrap();

    assert_eq!(graph.profile, ProfileName::Demo);
    assert_eq!(graph.stack_name, "ecs-efs-kate");
    assert_eq!(graph.file_system_id, "fs-demo");
    assert_eq!(graph.schedule_bindings.len(), 1);
    assert_eq!(graph.task_spec.sizing.memory_mib, 4096);
    assert!(graph.task_spec.base_environment().is_empty());
    assert_eq!(
        graph.failure_matcher.sink.topic_arn,
        "arn:aws:sns:ap-southeast-2:123456789012:aws-cdk-ecs-demo"
    );

    let env = graph.schedule_bindings[0].effective_environment(&graph.task_spec);
    assert_eq!(env["S3_BUCKET"], "aws-cdk-ecs-output-sandpit1");
    assert_eq!(env["ENVIRONMENT_NAME"], "kate");

    let task_role = graph.role(RoleKind::Task).unwrap();
    assert_eq!(task_role.statements().len(), 1);
    assert!(state
        .calls()
        .iter()
        .all(|c| !matches!(c, LookupCall::Stack { .. })));
}

#[test]
fn demo_profile_requires_filesystem_id() {
    let ctx = context("dev", "non-prod");
    let state = demo_state();
    for missing in [None, Some("  ")] {
        let err = assemble(&ctx, &StackProfile::demo(), &demo_inputs(missing), &state, &state)
            .unwrap_err();
        assert!(matches!(err, AssemblyError::Configuration { .. }));
    }
}

// ===========================================================================
// Snapshot file backend
// ===========================================================================

#[tokio::test]
async fn assembles_from_snapshot_file() {
    let ctx = context("dev", "non-prod");
    let snapshot = serde_json::json!({
        "stacks": [{
            "region": REGION,
            "name": "rqp-whics-app-z1-non-prod-stack",
            "status": "UPDATE_COMPLETE",
            "resources": [{
                "logical_id": "FileSystem",
                "resource_type": "AWS::EFS::FileSystem",
                "physical_id": "fs-from-file"
            }]
        }],
        "vpcs": [{
            "region": REGION,
            "name": "vpc-main",
            "vpc_id": VPC_ID,
            "subnets": [
                { "subnet_id": "subnet-1", "group": "private", "availability_zone": "ap-southeast-2a" },
                { "subnet_id": "subnet-2", "group": "public", "availability_zone": "ap-southeast-2a" }
            ]
        }],
        "security_groups": [{
            "region": REGION,
            "vpc_id": VPC_ID,
            "name": "rqp-whics-app-z1-non-prod-efsSgForFargate",
            "group_id": "sg-file"
        }],
        "key_aliases": [{ "region": REGION, "alias": "nib-rqp-whics-backups", "key_arn": KEY_ARN }],
        "topics": [{ "region": REGION, "name": "rqp-dev-z1-alerts", "topic_arn": TOPIC_ARN }]
    });

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    tokio::fs::write(&path, serde_json::to_vec_pretty(&snapshot).unwrap())
        .await
        .unwrap();

    let state = StateSnapshot::load(&path).await.unwrap();
    let graph =
        assemble(&ctx, &StackProfile::archive(), &archive_inputs(), &state, &state).unwrap();
    assert_eq!(graph.file_system_id, "fs-from-file");
    assert_eq!(graph.network.subnet_ids, vec!["subnet-1"]);
}
