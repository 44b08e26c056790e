//! Cross-stack reference resolution.

use efs_backup_state::StackResourceLookup;
use tracing::{debug, warn};

use crate::error::{AssemblyError, Result};
use crate::obs;

/// CloudFormation type of the filesystem exported by the application stack.
pub const EFS_FILE_SYSTEM_TYPE: &str = "AWS::EFS::FileSystem";

/// Resolves physical ids exported by independently deployed stacks.
pub struct CrossStackResolver<'a> {
    lookup: &'a dyn StackResourceLookup,
}

impl<'a> CrossStackResolver<'a> {
    pub fn new(lookup: &'a dyn StackResourceLookup) -> Self {
        Self { lookup }
    }

    /// Physical id of the single `resource_type` resource in `producer_stack`.
    ///
    /// Missing stacks, and stacks without such a resource, fail with
    /// `MissingCrossStackResource`. A stack whose resources are not live fails
    /// with `UnusableProducerStack`. More than one match is ambiguous.
    pub fn resolve(
        &self,
        region: &str,
        producer_stack: &str,
        resource_type: &str,
    ) -> Result<String> {
        let missing = || AssemblyError::MissingCrossStackResource {
            region: region.to_string(),
            stack_name: producer_stack.to_string(),
            resource_type: resource_type.to_string(),
        };

        let stack = self
            .lookup
            .stack(region, producer_stack)?
            .ok_or_else(missing)?;

        if !stack.status.is_usable() {
            warn!(
                stack = %producer_stack,
                status = ?stack.status,
                "producer stack is not in a usable state"
            );
            return Err(AssemblyError::UnusableProducerStack {
                region: region.to_string(),
                stack_name: producer_stack.to_string(),
                status: stack.status,
            });
        }

        let ids: Vec<&str> = stack
            .resources_of_type(resource_type)
            .map(|r| r.physical_id.as_str())
            .filter(|id| !id.trim().is_empty())
            .collect();

        match ids.as_slice() {
            [] => Err(missing()),
            [id] => {
                debug!(
                    stack = %producer_stack,
                    resource_type = %resource_type,
                    "resolved cross-stack id"
                );
                obs::emit_cross_stack_resolved(producer_stack, resource_type, id);
                Ok(id.to_string())
            }
            many => Err(AssemblyError::AmbiguousCrossStackResource {
                region: region.to_string(),
                stack_name: producer_stack.to_string(),
                resource_type: resource_type.to_string(),
                count: many.len(),
            }),
        }
    }
}
