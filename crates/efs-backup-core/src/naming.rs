//! Name patterns and template logical ids.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::context::EnvironmentContext;
use crate::error::{AssemblyError, Result};

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").expect("placeholder regex"))
}

/// A name with `{field}` placeholders filled from the [`EnvironmentContext`].
///
/// `rqp-whics-app-{zone}-{slice}-stack` keeps peer deployments in different
/// zones and slices from resolving each other's resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamePattern(String);

impl NamePattern {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn template(&self) -> &str {
        &self.0
    }

    /// Substitute every placeholder. Unknown placeholders are a configuration error.
    pub fn render(&self, ctx: &EnvironmentContext) -> Result<String> {
        let mut unknown = None;
        let rendered = placeholder_regex().replace_all(&self.0, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match ctx.field(name) {
                Some(value) => value.to_string(),
                None => {
                    unknown.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });
        if let Some(name) = unknown {
            return Err(AssemblyError::configuration(
                "name_pattern",
                format!("unknown placeholder {{{}}} in '{}'", name, self.0),
            ));
        }
        Ok(rendered.into_owned())
    }
}

impl std::fmt::Display for NamePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Allocates template logical ids scoped to one stack.
///
/// Ids are the PascalCase construct path followed by an 8-character hash of
/// `<stack>/<path>`, so the same construct always gets the same id.
#[derive(Debug, Clone)]
pub struct LogicalIds {
    stack_name: String,
}

impl LogicalIds {
    pub fn new(stack_name: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
        }
    }

    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    /// Logical id for a construct path such as `taskRole` or `cronJobTriggerArchive`.
    pub fn id(&self, path: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.stack_name.as_bytes());
        hasher.update(b"/");
        hasher.update(path.as_bytes());
        let suffix = hex::encode_upper(&hasher.finalize()[..4]);
        format!("{}{}", pascal_case(path), suffix)
    }
}

fn pascal_case(path: &str) -> String {
    path.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
