//! Core data model: principals, gate results and denials

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Opaque authority string (a role or a permission)
pub type Authority = String;

/// Actor recorded for calls that resolved no principal
pub const ANONYMOUS_ACTOR: &str = "anonymous";

/// Resolved identity for one call
///
/// Built once per call by whatever resolves identity (token filter, session
/// lookup, test double) and only read by the interception chain. Roles and
/// permissions share the `authorities` namespace; a `ROLE_` prefix is a
/// caller convention and is not interpreted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal identifier (e.g., a username)
    pub id: String,

    /// Granted authorities
    #[serde(default)]
    pub authorities: BTreeSet<Authority>,

    /// Whether the identity was actually authenticated
    #[serde(default = "default_authenticated")]
    pub authenticated: bool,
}

fn default_authenticated() -> bool {
    true
}

impl Principal {
    /// Create an authenticated principal with no authorities
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            authorities: BTreeSet::new(),
            authenticated: true,
        }
    }

    /// Create a principal whose identity was presented but not authenticated
    pub fn unauthenticated(id: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            ..Self::new(id)
        }
    }

    /// Grant one authority
    pub fn with_authority(mut self, authority: impl Into<Authority>) -> Self {
        self.authorities.insert(authority.into());
        self
    }

    /// Grant several authorities
    pub fn with_authorities<I, S>(mut self, authorities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Authority>,
    {
        self.authorities
            .extend(authorities.into_iter().map(Into::into));
        self
    }

    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.contains(authority)
    }
}

/// Kind of failure a denial surfaces as
///
/// The binding layer maps these onto transport codes (401 / 403 for HTTP).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusKind {
    /// No authenticated identity where one is required
    Unauthorized,
    /// Identity present but its authorities are insufficient
    Forbidden,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusKind::Unauthorized => write!(f, "UNAUTHORIZED"),
            StatusKind::Forbidden => write!(f, "FORBIDDEN"),
        }
    }
}

/// Policy gate kinds, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    Authentication,
    Role,
    Permission,
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateKind::Authentication => write!(f, "authentication"),
            GateKind::Role => write!(f, "role"),
            GateKind::Permission => write!(f, "permission"),
        }
    }
}

/// Structured refusal returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    /// Gate that refused the call
    pub gate: GateKind,

    /// Status the binding layer should report
    pub status: StatusKind,

    /// Human-readable reason
    pub message: String,
}

impl Denial {
    pub fn unauthorized(gate: GateKind, message: impl Into<String>) -> Self {
        Self {
            gate,
            status: StatusKind::Unauthorized,
            message: message.into(),
        }
    }

    pub fn forbidden(gate: GateKind, message: impl Into<String>) -> Self {
        Self {
            gate,
            status: StatusKind::Forbidden,
            message: message.into(),
        }
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} gate): {}", self.status, self.gate, self.message)
    }
}

/// Result of a single gate evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateResult {
    Allow,
    Deny(Denial),
}

impl GateResult {
    pub fn is_allow(&self) -> bool {
        matches!(self, GateResult::Allow)
    }

    /// Convert into a `Result` so gates can be chained with `?`
    pub fn into_result(self) -> std::result::Result<(), Denial> {
        match self {
            GateResult::Allow => Ok(()),
            GateResult::Deny(denial) => Err(denial),
        }
    }
}
