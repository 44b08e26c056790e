//! In-memory fakes for lookup traits (testing only)
//!
//! Provides `MemoryStateLookup`, which records every question it is asked,
//! and `UnavailableLookup`, which fails every call.

use std::sync::Mutex;

use crate::error::{StateError, StateResult};
use crate::lookup_traits::*;
use crate::snapshot::StateSnapshot;

// ---------------------------------------------------------------------------
// MemoryStateLookup
// ---------------------------------------------------------------------------

/// A single recorded lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupCall {
    Stack { region: String, name: String },
    Vpc { region: String, name: String },
    SecurityGroup { region: String, name: String },
    KeyAlias { region: String, alias: String },
    Topic { region: String, name: String },
}

/// Snapshot-backed fake that records the order of lookups.
#[derive(Debug, Default)]
pub struct MemoryStateLookup {
    state: StateSnapshot,
    calls: Mutex<Vec<LookupCall>>,
}

impl MemoryStateLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(state: StateSnapshot) -> Self {
        Self {
            state,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Add a usable stack exporting one resource.
    pub fn with_stack_resource(
        mut self,
        region: &str,
        stack_name: &str,
        resource_type: &str,
        physical_id: &str,
    ) -> Self {
        let resource = StackResourceRecord {
            logical_id: format!("Resource{}", self.state.stacks.len()),
            resource_type: resource_type.to_string(),
            physical_id: physical_id.to_string(),
        };
        match self
            .state
            .stacks
            .iter_mut()
            .find(|s| s.region == region && s.name == stack_name)
        {
            Some(stack) => stack.resources.push(resource),
            None => self.state.stacks.push(StackRecord {
                region: region.to_string(),
                name: stack_name.to_string(),
                status: StackStatus::CreateComplete,
                resources: vec![resource],
            }),
        }
        self
    }

    pub fn with_stack(mut self, stack: StackRecord) -> Self {
        self.state.stacks.push(stack);
        self
    }

    /// Add a VPC with one private subnet per availability zone suffix.
    pub fn with_vpc(mut self, region: &str, name: &str, vpc_id: &str, zones: &[&str]) -> Self {
        let subnets = zones
            .iter()
            .enumerate()
            .flat_map(|(i, zone)| {
                [
                    SubnetRecord {
                        subnet_id: format!("subnet-priv{}", i),
                        group: SubnetGroup::Private,
                        availability_zone: format!("{}{}", region, zone),
                    },
                    SubnetRecord {
                        subnet_id: format!("subnet-pub{}", i),
                        group: SubnetGroup::Public,
                        availability_zone: format!("{}{}", region, zone),
                    },
                ]
            })
            .collect();
        self.state.vpcs.push(VpcRecord {
            region: region.to_string(),
            name: name.to_string(),
            vpc_id: vpc_id.to_string(),
            subnets,
        });
        self
    }

    pub fn with_security_group(
        mut self,
        region: &str,
        vpc_id: &str,
        name: &str,
        group_id: &str,
    ) -> Self {
        self.state.security_groups.push(SecurityGroupRecord {
            region: region.to_string(),
            vpc_id: vpc_id.to_string(),
            name: name.to_string(),
            group_id: group_id.to_string(),
        });
        self
    }

    pub fn with_key_alias(mut self, region: &str, alias: &str, key_arn: &str) -> Self {
        self.state.key_aliases.push(KeyAliasRecord {
            region: region.to_string(),
            alias: alias.to_string(),
            key_arn: key_arn.to_string(),
        });
        self
    }

    pub fn with_topic(mut self, region: &str, name: &str, topic_arn: &str) -> Self {
        self.state.topics.push(TopicRecord {
            region: region.to_string(),
            name: name.to_string(),
            topic_arn: topic_arn.to_string(),
        });
        self
    }

    /// Every lookup made so far, oldest first.
    pub fn calls(&self) -> Vec<LookupCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: LookupCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl StackResourceLookup for MemoryStateLookup {
    fn stack(&self, region: &str, stack_name: &str) -> StateResult<Option<StackRecord>> {
        self.record(LookupCall::Stack {
            region: region.to_string(),
            name: stack_name.to_string(),
        });
        self.state.stack(region, stack_name)
    }
}

impl EnvironmentLookup for MemoryStateLookup {
    fn vpc(&self, region: &str, name: &str) -> StateResult<Option<VpcRecord>> {
        self.record(LookupCall::Vpc {
            region: region.to_string(),
            name: name.to_string(),
        });
        self.state.vpc(region, name)
    }

    fn security_group(
        &self,
        region: &str,
        vpc_id: &str,
        name: &str,
    ) -> StateResult<Option<SecurityGroupRecord>> {
        self.record(LookupCall::SecurityGroup {
            region: region.to_string(),
            name: name.to_string(),
        });
        self.state.security_group(region, vpc_id, name)
    }

    fn key_alias(&self, region: &str, alias: &str) -> StateResult<Option<KeyAliasRecord>> {
        self.record(LookupCall::KeyAlias {
            region: region.to_string(),
            alias: alias.to_string(),
        });
        self.state.key_alias(region, alias)
    }

    fn topic(&self, region: &str, name: &str) -> StateResult<Option<TopicRecord>> {
        self.record(LookupCall::Topic {
            region: region.to_string(),
            name: name.to_string(),
        });
        self.state.topic(region, name)
    }
}

// ---------------------------------------------------------------------------
// UnavailableLookup
// ---------------------------------------------------------------------------

/// Fails every lookup with `StateError::Unavailable`.
#[derive(Debug, Clone)]
pub struct UnavailableLookup {
    reason: String,
}

impl UnavailableLookup {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn fail<T>(&self) -> StateResult<T> {
        Err(StateError::Unavailable(self.reason.clone()))
    }
}

impl StackResourceLookup for UnavailableLookup {
    fn stack(&self, _region: &str, _stack_name: &str) -> StateResult<Option<StackRecord>> {
        self.fail()
    }
}

impl EnvironmentLookup for UnavailableLookup {
    fn vpc(&self, _region: &str, _name: &str) -> StateResult<Option<VpcRecord>> {
        self.fail()
    }

    fn security_group(
        &self,
        _region: &str,
        _vpc_id: &str,
        _name: &str,
    ) -> StateResult<Option<SecurityGroupRecord>> {
        self.fail()
    }

    fn key_alias(&self, _region: &str, _alias: &str) -> StateResult<Option<KeyAliasRecord>> {
        self.fail()
    }

    fn topic(&self, _region: &str, _name: &str) -> StateResult<Option<TopicRecord>> {
        self.fail()
    }
}
