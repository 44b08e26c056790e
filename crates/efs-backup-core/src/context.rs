//! Deployment coordinates supplied by the caller.

use serde::{Deserialize, Serialize};

use crate::error::{AssemblyError, Result};

/// Resolved configuration for one deployment.
///
/// Built by the entry point from flags and environment variables; the core
/// only reads it. Call [`EnvironmentContext::validate`] before assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentContext {
    pub region: String,
    pub account_id: String,
    pub account_name: String,
    /// Environment label exposed to the backup program as `ENVIRONMENT_NAME`.
    pub environment_name: String,
    pub stage: String,
    pub zone: String,
    pub slice: String,
    pub application: String,
    pub application_version: String,
    pub repository: String,
    /// Name of the existing VPC the task runs in.
    pub network_handle: String,
}

impl EnvironmentContext {
    /// Fields in declaration order, paired with their names.
    pub fn fields(&self) -> [(&'static str, &str); 11] {
        [
            ("region", self.region.as_str()),
            ("account_id", self.account_id.as_str()),
            ("account_name", self.account_name.as_str()),
            ("environment_name", self.environment_name.as_str()),
            ("stage", self.stage.as_str()),
            ("zone", self.zone.as_str()),
            ("slice", self.slice.as_str()),
            ("application", self.application.as_str()),
            ("application_version", self.application_version.as_str()),
            ("repository", self.repository.as_str()),
            ("network_handle", self.network_handle.as_str()),
        ]
    }

    /// Look up a field by name, as used by name-pattern placeholders.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields()
            .into_iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }

    /// Reject empty fields and malformed account ids.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in self.fields() {
            if value.trim().is_empty() {
                return Err(AssemblyError::configuration(field, "must not be empty"));
            }
        }
        if self.account_id.len() != 12 || !self.account_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(AssemblyError::configuration(
                "account_id",
                format!("'{}' is not a 12-digit account id", self.account_id),
            ));
        }
        Ok(())
    }
}
