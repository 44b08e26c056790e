//! efs-backup-state: deployed-state lookups for the EFS backup stack
//!
//! The assembly core never creates the VPC, the filesystem, the KMS key or
//! the alert topic it wires together. This crate answers where those live.
//!
//! ## Key Components
//!
//! - `StackResourceLookup`: resources exported by other stacks
//! - `EnvironmentLookup`: VPCs, security groups, key aliases, topics
//! - `StateSnapshot`: JSON-file backend implementing both traits
//! - `fakes`: in-memory and failing lookups for tests

mod error;
pub mod fakes;
pub mod lookup_traits;
mod snapshot;

pub use error::{StateError, StateResult};
pub use lookup_traits::{
    EnvironmentLookup, KeyAliasRecord, SecurityGroupRecord, StackRecord, StackResourceLookup,
    StackResourceRecord, StackStatus, SubnetGroup, SubnetRecord, TopicRecord, VpcRecord,
};
pub use snapshot::StateSnapshot;
