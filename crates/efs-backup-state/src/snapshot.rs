//! JSON snapshot of deployed state.
//!
//! A snapshot is exported once (e.g. from `describe-stack-resources`,
//! `describe-vpcs` and friends) and answers every lookup the assembly needs
//! without talking to a live account.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::lookup_traits::*;

/// Point-in-time view of deployed infrastructure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub stacks: Vec<StackRecord>,
    #[serde(default)]
    pub vpcs: Vec<VpcRecord>,
    #[serde(default)]
    pub security_groups: Vec<SecurityGroupRecord>,
    #[serde(default)]
    pub key_aliases: Vec<KeyAliasRecord>,
    #[serde(default)]
    pub topics: Vec<TopicRecord>,
}

impl StateSnapshot {
    /// Parse and validate a snapshot from JSON text.
    pub fn from_json_str(json: &str) -> StateResult<Self> {
        let snapshot: StateSnapshot = serde_json::from_str(json)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Read, parse and validate a snapshot file.
    pub async fn load(path: &Path) -> StateResult<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| StateError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let snapshot = Self::from_json_str(&json)?;
        debug!(
            path = %path.display(),
            stacks = snapshot.stacks.len(),
            vpcs = snapshot.vpcs.len(),
            "loaded state snapshot"
        );
        Ok(snapshot)
    }

    /// Stack names must be unique per region.
    pub fn validate(&self) -> StateResult<()> {
        let mut seen = HashSet::new();
        for stack in &self.stacks {
            if !seen.insert((stack.region.as_str(), stack.name.as_str())) {
                return Err(StateError::DuplicateStack {
                    region: stack.region.clone(),
                    name: stack.name.clone(),
                });
            }
        }
        Ok(())
    }
}

impl StackResourceLookup for StateSnapshot {
    fn stack(&self, region: &str, stack_name: &str) -> StateResult<Option<StackRecord>> {
        Ok(self
            .stacks
            .iter()
            .find(|s| s.region == region && s.name == stack_name)
            .cloned())
    }
}

impl EnvironmentLookup for StateSnapshot {
    fn vpc(&self, region: &str, name: &str) -> StateResult<Option<VpcRecord>> {
        Ok(self
            .vpcs
            .iter()
            .find(|v| v.region == region && v.name == name)
            .cloned())
    }

    fn security_group(
        &self,
        region: &str,
        vpc_id: &str,
        name: &str,
    ) -> StateResult<Option<SecurityGroupRecord>> {
        Ok(self
            .security_groups
            .iter()
            .find(|g| g.region == region && g.vpc_id == vpc_id && g.name == name)
            .cloned())
    }

    fn key_alias(&self, region: &str, alias: &str) -> StateResult<Option<KeyAliasRecord>> {
        let alias = alias.strip_prefix("alias/").unwrap_or(alias);
        Ok(self
            .key_aliases
            .iter()
            .find(|k| k.region == region && k.alias == alias)
            .cloned())
    }

    fn topic(&self, region: &str, name: &str) -> StateResult<Option<TopicRecord>> {
        Ok(self
            .topics
            .iter()
            .find(|t| t.region == region && t.name == name)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "stacks": [
            {
                "region": "ap-southeast-2",
                "name": "app-stack",
                "status": "CREATE_COMPLETE",
                "resources": [
                    {"logical_id": "Fs", "resource_type": "AWS::EFS::FileSystem", "physical_id": "fs-0abc"}
                ]
            }
        ],
        "key_aliases": [
            {"region": "ap-southeast-2", "alias": "backups", "key_arn": "arn:aws:kms:ap-southeast-2:111111111111:key/k1"}
        ]
    }"#;

    #[test]
    fn test_parse_with_missing_sections() {
        let snapshot = StateSnapshot::from_json_str(SNAPSHOT).unwrap();
        assert_eq!(snapshot.stacks.len(), 1);
        assert!(snapshot.vpcs.is_empty());
        assert!(snapshot.topics.is_empty());
    }

    #[test]
    fn test_stack_lookup_is_region_scoped() {
        let snapshot = StateSnapshot::from_json_str(SNAPSHOT).unwrap();
        assert!(snapshot.stack("ap-southeast-2", "app-stack").unwrap().is_some());
        assert!(snapshot.stack("us-east-1", "app-stack").unwrap().is_none());
    }

    #[test]
    fn test_key_alias_accepts_prefixed_name() {
        let snapshot = StateSnapshot::from_json_str(SNAPSHOT).unwrap();
        let plain = snapshot.key_alias("ap-southeast-2", "backups").unwrap();
        let prefixed = snapshot.key_alias("ap-southeast-2", "alias/backups").unwrap();
        assert_eq!(plain, prefixed);
        assert!(plain.is_some());
    }

    #[test]
    fn test_duplicate_stack_rejected() {
        let json = r#"{"stacks": [
            {"region": "r", "name": "s", "status": "CREATE_COMPLETE"},
            {"region": "r", "name": "s", "status": "UPDATE_COMPLETE"}
        ]}"#;
        let err = StateSnapshot::from_json_str(json).unwrap_err();
        assert!(matches!(err, StateError::DuplicateStack { .. }));
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = StateSnapshot::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, StateError::Parse(_)));
    }
}
