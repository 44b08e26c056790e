//! Failure detection for the backup task.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AssemblyError, Result};
use crate::naming::LogicalIds;
use crate::task::{TaskDefinitionIdentity, TaskSpecification};

pub const ECS_EVENT_SOURCE: &str = "aws.ecs";
pub const TASK_STATE_CHANGE: &str = "ECS Task State Change";
pub const STOPPED: &str = "STOPPED";
pub const ESSENTIAL_CONTAINER_EXITED: &str = "Essential container in task exited";

/// Container exit codes treated as a failed backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum FailureExitCode {
    GenericFailure,
    /// SIGKILL, usually the OOM killer.
    Killed,
    SegmentationFault,
    UncleanTermination,
}

impl FailureExitCode {
    pub const ALL: [FailureExitCode; 4] = [
        FailureExitCode::GenericFailure,
        FailureExitCode::Killed,
        FailureExitCode::SegmentationFault,
        FailureExitCode::UncleanTermination,
    ];

    pub fn code(&self) -> i32 {
        match self {
            FailureExitCode::GenericFailure => 1,
            FailureExitCode::Killed => 137,
            FailureExitCode::SegmentationFault => 139,
            FailureExitCode::UncleanTermination => 255,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

/// Non-empty set of exit codes a matcher reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExitCodeSet(BTreeSet<FailureExitCode>);

impl ExitCodeSet {
    pub fn new(codes: impl IntoIterator<Item = FailureExitCode>) -> Result<Self> {
        let codes: BTreeSet<_> = codes.into_iter().collect();
        if codes.is_empty() {
            return Err(AssemblyError::configuration(
                "exit_codes",
                "a failure matcher needs at least one exit code",
            ));
        }
        Ok(Self(codes))
    }

    /// All four maintained codes.
    pub fn standard() -> Self {
        Self(FailureExitCode::ALL.into_iter().collect())
    }

    /// Numeric codes in ascending order.
    pub fn codes(&self) -> Vec<i32> {
        let mut codes: Vec<i32> = self.0.iter().map(|c| c.code()).collect();
        codes.sort_unstable();
        codes
    }

    pub fn contains_code(&self, code: i32) -> bool {
        FailureExitCode::from_code(code).is_some_and(|c| self.0.contains(&c))
    }
}

/// Existing topic that receives failure alerts. Referenced, never created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationSink {
    pub topic_arn: String,
}

/// The structural filter over task state change events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventPattern {
    pub source: String,
    pub detail_type: String,
    pub exit_codes: ExitCodeSet,
    pub last_status: String,
    pub stopped_reason: String,
    pub task_definition: TaskDefinitionIdentity,
}

impl EventPattern {
    /// EventBridge pattern JSON. `task_definition_arn` is whatever the
    /// caller renders for the identity, typically a `Ref`.
    pub fn to_json(&self, task_definition_arn: Value) -> Value {
        json!({
            "source": [self.source],
            "detail-type": [self.detail_type],
            "detail": {
                "containers": { "exitCode": self.exit_codes.codes() },
                "lastStatus": [self.last_status],
                "stoppedReason": [self.stopped_reason],
                "taskDefinitionArn": [task_definition_arn],
            }
        })
    }
}

/// A task state change event as delivered by EventBridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStateChangeEvent {
    pub source: String,
    #[serde(rename = "detail-type")]
    pub detail_type: String,
    pub detail: TaskStateDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStateDetail {
    pub last_status: String,
    #[serde(default)]
    pub stopped_reason: Option<String>,
    pub task_definition_arn: String,
    #[serde(default)]
    pub containers: Vec<ContainerState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureMatcher {
    pub logical_id: String,
    pub description: String,
    pub pattern: EventPattern,
    pub sink: NotificationSink,
}

impl FailureMatcher {
    /// Evaluate a concrete event against this matcher once the task
    /// definition is deployed as `deployed_arn`.
    ///
    /// Like EventBridge array matching, one container with a listed exit code
    /// is enough.
    pub fn matches(&self, event: &TaskStateChangeEvent, deployed_arn: &str) -> bool {
        let p = &self.pattern;
        event.source == p.source
            && event.detail_type == p.detail_type
            && event.detail.last_status == p.last_status
            && event.detail.stopped_reason.as_deref() == Some(p.stopped_reason.as_str())
            && event.detail.task_definition_arn == deployed_arn
            && event
                .detail
                .containers
                .iter()
                .filter_map(|c| c.exit_code)
                .any(|code| p.exit_codes.contains_code(code))
    }
}

pub struct FailureAlertBuilder<'a> {
    ids: &'a LogicalIds,
}

impl<'a> FailureAlertBuilder<'a> {
    pub fn new(ids: &'a LogicalIds) -> Self {
        Self { ids }
    }

    pub fn watch(
        &self,
        task: &TaskSpecification,
        exit_codes: ExitCodeSet,
        sink: NotificationSink,
    ) -> Result<FailureMatcher> {
        if sink.topic_arn.trim().is_empty() {
            return Err(AssemblyError::configuration(
                "topic_arn",
                "failure alerts need a notification topic",
            ));
        }
        Ok(FailureMatcher {
            logical_id: self.ids.id("filterFailedEFSBackup"),
            description: "Filters for failed ECS tasks".to_string(),
            pattern: EventPattern {
                source: ECS_EVENT_SOURCE.to_string(),
                detail_type: TASK_STATE_CHANGE.to_string(),
                exit_codes,
                last_status: STOPPED.to_string(),
                stopped_reason: ESSENTIAL_CONTAINER_EXITED.to_string(),
                task_definition: task.identity().clone(),
            },
            sink,
        })
    }
}
