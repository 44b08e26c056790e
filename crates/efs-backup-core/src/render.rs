//! CloudFormation rendering.
//!
//! Graph-internal references become `Ref` / `Fn::GetAtt`; referenced
//! resources (imported security groups, the filesystem, the topic, keys)
//! are rendered as literal identifiers.

use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::graph::ResourceGraph;
use crate::network::SecurityGroupRef;
use crate::permissions::{Effect, IdentityRole, PolicyStatement, ResourceSet};
use crate::schedule::ScheduleBinding;

const TEMPLATE_VERSION: &str = "2010-09-09";
const POLICY_VERSION: &str = "2012-10-17";

fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

fn statement_json(statement: &PolicyStatement) -> Value {
    let effect = match statement.effect() {
        Effect::Allow => "Allow",
        Effect::Deny => "Deny",
    };
    let resource = match statement.resources() {
        ResourceSet::Wildcard => json!("*"),
        ResourceSet::Listed(arns) => json!(arns),
    };
    json!({
        "Action": statement.actions(),
        "Effect": effect,
        "Resource": resource,
    })
}

fn role_json(role: &IdentityRole) -> Value {
    let mut properties = Map::new();
    properties.insert(
        "AssumeRolePolicyDocument".to_string(),
        json!({
            "Statement": [{
                "Action": "sts:AssumeRole",
                "Effect": "Allow",
                "Principal": { "Service": role.trust().as_str() },
            }],
            "Version": POLICY_VERSION,
        }),
    );
    if !role.managed_policies().is_empty() {
        let arns: Vec<String> = role.managed_policies().iter().map(|p| p.arn()).collect();
        properties.insert("ManagedPolicyArns".to_string(), json!(arns));
    }

    let mut statements: Vec<Value> = role.statements().iter().map(statement_json).collect();
    if !role.pass_role_targets().is_empty() {
        let targets: Vec<Value> = role
            .pass_role_targets()
            .iter()
            .map(|id| get_att(id, "Arn"))
            .collect();
        statements.push(json!({
            "Action": "iam:PassRole",
            "Effect": "Allow",
            "Resource": targets,
        }));
    }
    if !statements.is_empty() {
        properties.insert(
            "Policies".to_string(),
            json!([{
                "PolicyDocument": { "Statement": statements, "Version": POLICY_VERSION },
                "PolicyName": "DefaultPolicy",
            }]),
        );
    }

    json!({ "Type": "AWS::IAM::Role", "Properties": properties })
}

fn security_group_json(group: &SecurityGroupRef) -> Value {
    match group {
        SecurityGroupRef::Owned { logical_id } => get_att(logical_id, "GroupId"),
        SecurityGroupRef::Imported { group_id, .. } => json!(group_id),
    }
}

/// The ECS target `Input`: a JSON string carrying the container overrides.
fn override_input(binding: &ScheduleBinding) -> Result<String> {
    let environment: Vec<Value> = binding
        .container_override
        .environment
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    let input = json!({
        "containerOverrides": [{
            "name": binding.container_override.container_name,
            "environment": environment,
        }]
    });
    Ok(serde_json::to_string(&input)?)
}

fn binding_json(binding: &ScheduleBinding) -> Result<Value> {
    let security_groups: Vec<Value> = binding
        .security_groups
        .iter()
        .map(security_group_json)
        .collect();
    let mut ecs_parameters = json!({
        "LaunchType": "FARGATE",
        "NetworkConfiguration": {
            "AwsVpcConfiguration": {
                "AssignPublicIp": "DISABLED",
                "SecurityGroups": security_groups,
                "Subnets": binding.subnet_ids,
            }
        },
        "PlatformVersion": binding.platform_version,
        "TaskCount": binding.task_count,
        "TaskDefinitionArn": reference(binding.task_definition.logical_id()),
    });
    if binding.propagate_tags_from_task_definition {
        ecs_parameters["PropagateTags"] = json!("TASK_DEFINITION");
    }

    Ok(json!({
        "Type": "AWS::Events::Rule",
        "Properties": {
            "Description": binding.description,
            "ScheduleExpression": binding.schedule.schedule_expression(),
            "State": "ENABLED",
            "Targets": [{
                "Arn": get_att(&binding.cluster_id, "Arn"),
                "EcsParameters": ecs_parameters,
                "Id": "Target0",
                "Input": override_input(binding)?,
                "RoleArn": get_att(&binding.role_id, "Arn"),
            }],
        }
    }))
}

/// Render the graph as a CloudFormation template.
pub fn to_template(graph: &ResourceGraph) -> Result<Value> {
    let mut resources = Map::new();

    for role in &graph.roles {
        resources.insert(role.logical_id().to_string(), role_json(role));
    }

    let mut log_properties = Map::new();
    if let Some(days) = graph.log_group.retention_days {
        log_properties.insert("RetentionInDays".to_string(), json!(days));
    }
    resources.insert(
        graph.log_group.logical_id.clone(),
        json!({
            "Type": "AWS::Logs::LogGroup",
            "Properties": log_properties,
            "UpdateReplacePolicy": "Retain",
            "DeletionPolicy": "Retain",
        }),
    );

    let task = &graph.task_spec;
    let container = &task.container;
    let environment: Vec<Value> = container
        .environment
        .iter()
        .map(|(name, value)| json!({ "Name": name, "Value": value }))
        .collect();
    let mount_points: Vec<Value> = container
        .mount_points
        .iter()
        .map(|m| {
            json!({
                "ContainerPath": m.container_path,
                "ReadOnly": m.read_only,
                "SourceVolume": m.source_volume,
            })
        })
        .collect();
    let volumes: Vec<Value> = task
        .volumes
        .iter()
        .map(|v| {
            json!({
                "EFSVolumeConfiguration": { "FilesystemId": v.file_system_id },
                "Name": v.name,
            })
        })
        .collect();
    let mut container_json = json!({
        "Essential": container.essential,
        "Image": container.image.image_uri(),
        "LogConfiguration": {
            "LogDriver": "awslogs",
            "Options": {
                "awslogs-group": reference(&container.log_sink.logical_id),
                "awslogs-region": graph.region,
                "awslogs-stream-prefix": container.log_sink.stream_prefix,
            }
        },
        "MountPoints": mount_points,
        "Name": container.name,
    });
    if !environment.is_empty() {
        container_json["Environment"] = json!(environment);
    }
    resources.insert(
        task.identity().logical_id().to_string(),
        json!({
            "Type": "AWS::ECS::TaskDefinition",
            "Properties": {
                "ContainerDefinitions": [container_json],
                "Cpu": task.sizing.cpu.to_string(),
                "ExecutionRoleArn": get_att(&task.execution_role_id, "Arn"),
                "Family": format!("{}{}", graph.stack_name, task.identity()),
                "Memory": task.sizing.memory_mib.to_string(),
                "NetworkMode": "awsvpc",
                "RequiresCompatibilities": ["FARGATE"],
                "TaskRoleArn": get_att(&task.task_role_id, "Arn"),
                "Volumes": volumes,
            }
        }),
    );

    resources.insert(
        graph.cluster.logical_id.clone(),
        json!({ "Type": "AWS::ECS::Cluster" }),
    );

    let egress = &graph.network.egress_group;
    resources.insert(
        egress.logical_id.clone(),
        json!({
            "Type": "AWS::EC2::SecurityGroup",
            "Properties": {
                "GroupDescription": egress.description,
                "SecurityGroupEgress": [{
                    "CidrIp": "0.0.0.0/0",
                    "Description": "Allow all outbound traffic by default",
                    "IpProtocol": "-1",
                }],
                "VpcId": egress.vpc_id,
            }
        }),
    );

    for binding in &graph.schedule_bindings {
        resources.insert(binding.logical_id.clone(), binding_json(binding)?);
    }

    let matcher = &graph.failure_matcher;
    resources.insert(
        matcher.logical_id.clone(),
        json!({
            "Type": "AWS::Events::Rule",
            "Properties": {
                "Description": matcher.description,
                "EventPattern": matcher
                    .pattern
                    .to_json(reference(matcher.pattern.task_definition.logical_id())),
                "State": "ENABLED",
                "Targets": [{ "Arn": matcher.sink.topic_arn, "Id": "Target0" }],
            }
        }),
    );

    Ok(json!({
        "AWSTemplateFormatVersion": TEMPLATE_VERSION,
        "Description": format!(
            "Scheduled EFS backup to S3 ({} profile)",
            graph.profile
        ),
        "Resources": resources,
        "Outputs": {
            "TaskDefinitionArn": { "Value": reference(task.identity().logical_id()) },
            "ClusterName": { "Value": reference(&graph.cluster.logical_id) },
        }
    }))
}

/// Pretty-printed template.
pub fn to_template_string(graph: &ResourceGraph) -> Result<String> {
    Ok(serde_json::to_string_pretty(&to_template(graph)?)?)
}
