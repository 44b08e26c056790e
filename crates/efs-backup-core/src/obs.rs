//! Structured lifecycle events for resource-graph assembly.
//!
//! Events are emitted at `info!` level; assembly failures at `warn!`.
//! Filter with `RUST_LOG` and switch to JSON output with `--json`.

use tracing::info;

/// RAII guard that enters an assembly-scoped span.
///
/// ```ignore
/// let _span = AssemblySpan::enter("EFSBackupToS3Stack", "archive");
/// // every event below carries stack and profile
/// ```
pub struct AssemblySpan {
    _span: tracing::span::EnteredSpan,
}

impl AssemblySpan {
    pub fn enter(stack_name: &str, profile: &str) -> Self {
        let span =
            tracing::info_span!("efs_backup.assembly", stack = %stack_name, profile = %profile);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_assembly_started(stack_name: &str, stage: &str, zone: &str, slice: &str) {
    info!(
        event = "assembly.started",
        stack = %stack_name,
        stage = %stage,
        zone = %zone,
        slice = %slice,
    );
}

/// Emit event: a cross-stack id was resolved.
pub fn emit_cross_stack_resolved(producer_stack: &str, resource_type: &str, physical_id: &str) {
    info!(
        event = "cross_stack.resolved",
        producer = %producer_stack,
        resource_type = %resource_type,
        physical_id = %physical_id,
    );
}

pub fn emit_binding_created(logical_id: &str, schedule: &str, conditional: bool) {
    info!(
        event = "binding.created",
        logical_id = %logical_id,
        schedule = %schedule,
        conditional = conditional,
    );
}

/// Emit event: assembly finished with resource count and graph digest.
pub fn emit_assembly_finished(stack_name: &str, resources: usize, bindings: usize, digest: &str) {
    info!(
        event = "assembly.finished",
        stack = %stack_name,
        resources = resources,
        bindings = bindings,
        digest = %digest,
    );
}

/// Emit event: assembly aborted (warning level).
pub fn emit_assembly_failed(stack_name: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "assembly.failed", stack = %stack_name, error = %error);
}
