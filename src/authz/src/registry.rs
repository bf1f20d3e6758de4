//! Operation registry
//!
//! Holds the immutable [`PolicyDeclaration`] of every registered operation.
//! Declarations are validated on registration; once registered they are
//! shared by reference between the chains built from them.

use crate::audit::AuditRecorder;
use crate::chain::ChainBuilder;
use crate::chain::InterceptionChain;
use crate::error::{AuthzError, Result};
use crate::policy::{OperationPolicy, PolicyDeclaration};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
struct Entry {
    declaration: Arc<PolicyDeclaration>,
    audit_action: String,
}

/// Registered operations, keyed by name
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    entries: BTreeMap<String, Entry>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from declarative operation policies
    pub fn from_config(operations: &BTreeMap<String, OperationPolicy>) -> Result<Self> {
        let mut registry = Self::new();

        for (action, policy) in operations {
            let declaration = PolicyDeclaration::from_config(action, policy)?;
            let audit_action = policy.audit.clone().unwrap_or_else(|| action.clone());
            registry.insert(action, declaration, audit_action)?;
        }

        info!(
            "OperationRegistry initialized with {} operations",
            registry.len()
        );
        Ok(registry)
    }

    /// Register an operation whose audit action is its own name
    pub fn register(
        &mut self,
        action: impl Into<String>,
        declaration: PolicyDeclaration,
    ) -> Result<()> {
        let action = action.into();
        let audit_action = action.clone();
        self.insert(&action, declaration, audit_action)
    }

    /// Register an operation with a distinct symbolic audit action
    pub fn register_audited(
        &mut self,
        action: impl Into<String>,
        declaration: PolicyDeclaration,
        audit_action: impl Into<String>,
    ) -> Result<()> {
        let action = action.into();
        self.insert(&action, declaration, audit_action.into())
    }

    fn insert(
        &mut self,
        action: &str,
        declaration: PolicyDeclaration,
        audit_action: String,
    ) -> Result<()> {
        if action.trim().is_empty() {
            return Err(AuthzError::InvalidInput(
                "operation name must not be empty".to_string(),
            ));
        }
        if self.entries.contains_key(action) {
            return Err(AuthzError::InvalidPolicy(format!(
                "operation '{}' is already registered",
                action
            )));
        }

        declaration.validate(action)?;
        self.entries.insert(
            action.to_string(),
            Entry {
                declaration: Arc::new(declaration),
                audit_action,
            },
        );
        Ok(())
    }

    /// Declaration of a registered operation
    pub fn get(&self, action: &str) -> Result<Arc<PolicyDeclaration>> {
        self.entries
            .get(action)
            .map(|entry| Arc::clone(&entry.declaration))
            .ok_or_else(|| AuthzError::PolicyNotFound(action.to_string()))
    }

    /// Symbolic audit action of a registered operation
    pub fn audit_action(&self, action: &str) -> Option<&str> {
        self.entries.get(action).map(|entry| entry.audit_action.as_str())
    }

    /// Start a chain for a registered operation
    ///
    /// The builder is preloaded with the declaration and the audit action;
    /// callers add metrics, hooks or a custom evaluator before `build`.
    pub fn chain(&self, action: &str, recorder: Arc<dyn AuditRecorder>) -> Result<ChainBuilder> {
        let entry = self
            .entries
            .get(action)
            .ok_or_else(|| AuthzError::PolicyNotFound(action.to_string()))?;

        Ok(
            InterceptionChain::builder(action, Arc::clone(&entry.declaration), recorder)
                .audit_action(entry.audit_action.clone()),
        )
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
