//! Per-operation policy declarations
//!
//! A [`PolicyDeclaration`] is attached to an operation once, when the
//! operation is registered, and is never mutated afterwards. The
//! [`OperationPolicy`] type is its declarative (serde) form, the shape used in
//! configuration files:
//!
//! ```toml
//! [operations.hello]
//! requireAuthentication = true
//! role = { values = ["ROLE_ADMIN"], requireAll = false, message = "Admin permission required" }
//! preHandle = { enabled = true, order = 0 }
//! ```

use crate::error::{AuthzError, Result};
use crate::types::Authority;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

/// Default message when authentication is missing
pub const DEFAULT_UNAUTHENTICATED_MESSAGE: &str = "Not logged in";

/// Default message when a role or permission requirement fails
pub const DEFAULT_FAILURE_MESSAGE: &str = "Insufficient permissions";

/// How the required authorities of a requirement combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    /// AND: every required authority must be held
    All,
    /// OR: holding any one required authority suffices
    #[default]
    Any,
}

impl Combinator {
    pub fn from_require_all(require_all: bool) -> Self {
        if require_all {
            Combinator::All
        } else {
            Combinator::Any
        }
    }
}

/// Role or permission requirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// Required authorities
    pub required: BTreeSet<Authority>,

    /// AND / OR combination
    pub combinator: Combinator,

    /// Message reported when the requirement is not met
    pub failure_message: String,
}

impl Requirement {
    /// Requirement satisfied by any one of `values`
    pub fn any_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Authority>,
    {
        Self {
            required: values.into_iter().map(Into::into).collect(),
            combinator: Combinator::Any,
            failure_message: DEFAULT_FAILURE_MESSAGE.to_string(),
        }
    }

    /// Requirement satisfied only by holding all of `values`
    pub fn all_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Authority>,
    {
        Self {
            combinator: Combinator::All,
            ..Self::any_of(values)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.failure_message = message.into();
        self
    }

    /// A requirement with no values can never be satisfied
    pub fn is_unsatisfiable(&self) -> bool {
        self.required.is_empty()
    }
}

/// Advisory hook stage settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreHandle {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sort key; lower runs first
    #[serde(default)]
    pub order: i32,
}

impl Default for PreHandle {
    fn default() -> Self {
        Self {
            enabled: true,
            order: 0,
        }
    }
}

pub(crate) fn default_true() -> bool {
    true
}

/// Immutable access-control metadata for one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDeclaration {
    /// Whether an authenticated principal is required
    pub require_authentication: bool,

    /// Message reported when authentication is missing
    pub unauthenticated_message: String,

    /// Role gate requirement
    pub role: Option<Requirement>,

    /// Permission gate requirement
    pub permission: Option<Requirement>,

    /// Pre-handle stage settings; `None` means no pre-handle stage
    pub pre_handle: Option<PreHandle>,
}

impl Default for PolicyDeclaration {
    fn default() -> Self {
        Self {
            require_authentication: false,
            unauthenticated_message: DEFAULT_UNAUTHENTICATED_MESSAGE.to_string(),
            role: None,
            permission: None,
            pre_handle: None,
        }
    }
}

impl PolicyDeclaration {
    /// Declaration with no gates (audit only)
    pub fn open() -> Self {
        Self::default()
    }

    pub fn require_authentication(mut self, message: impl Into<String>) -> Self {
        self.require_authentication = true;
        self.unauthenticated_message = message.into();
        self
    }

    pub fn with_role(mut self, requirement: Requirement) -> Self {
        self.role = Some(requirement);
        self
    }

    pub fn with_permission(mut self, requirement: Requirement) -> Self {
        self.permission = Some(requirement);
        self
    }

    pub fn with_pre_handle(mut self, pre_handle: PreHandle) -> Self {
        self.pre_handle = Some(pre_handle);
        self
    }

    /// Whether any gate consults the principal
    pub fn has_gates(&self) -> bool {
        self.require_authentication || self.role.is_some() || self.permission.is_some()
    }

    /// Build a declaration from its configuration form
    pub fn from_config(action: &str, config: &OperationPolicy) -> Result<Self> {
        let declaration = Self {
            require_authentication: config.require_authentication,
            unauthenticated_message: config
                .unauthenticated_message
                .clone()
                .unwrap_or_else(|| DEFAULT_UNAUTHENTICATED_MESSAGE.to_string()),
            role: config.role.as_ref().map(RequirementConfig::to_requirement),
            permission: config.permission.as_ref().map(RequirementConfig::to_requirement),
            pre_handle: config.pre_handle,
        };

        declaration.validate(action)?;
        Ok(declaration)
    }

    /// Check the declaration before it is attached to an operation
    ///
    /// Empty requirement sets are accepted but reported: they deny every call.
    pub fn validate(&self, action: &str) -> Result<()> {
        if self.unauthenticated_message.trim().is_empty() {
            return Err(AuthzError::InvalidPolicy(format!(
                "operation '{}' has an empty unauthenticated message",
                action
            )));
        }

        for (gate, requirement) in [("role", &self.role), ("permission", &self.permission)] {
            let Some(requirement) = requirement else {
                continue;
            };

            if requirement.required.iter().any(|a| a.trim().is_empty()) {
                return Err(AuthzError::InvalidPolicy(format!(
                    "operation '{}' declares a blank {} authority",
                    action, gate
                )));
            }

            if requirement.is_unsatisfiable() {
                warn!(
                    "Operation '{}' declares an empty {} requirement; every call will be denied",
                    action, gate
                );
            }
        }

        Ok(())
    }
}

/// Declarative role / permission requirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementConfig {
    pub values: Vec<Authority>,

    #[serde(default)]
    pub require_all: bool,

    #[serde(default = "default_failure_message")]
    pub message: String,
}

fn default_failure_message() -> String {
    DEFAULT_FAILURE_MESSAGE.to_string()
}

impl RequirementConfig {
    fn to_requirement(&self) -> Requirement {
        Requirement {
            required: self.values.iter().cloned().collect(),
            combinator: Combinator::from_require_all(self.require_all),
            failure_message: self.message.clone(),
        }
    }
}

/// Declarative per-operation configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationPolicy {
    #[serde(default)]
    pub require_authentication: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unauthenticated_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<RequirementConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<RequirementConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_handle: Option<PreHandle>,

    /// Symbolic action recorded in audit records (defaults to the operation name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit: Option<String>,
}
