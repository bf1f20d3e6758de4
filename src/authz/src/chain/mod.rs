//! Interception chain
//!
//! Wraps one operation with its policy gates and audit emission. The chain is
//! composed once, at registration time, from the operation's
//! [`PolicyDeclaration`]; each call then runs the fixed pipeline:
//!
//! ```text
//! Pending → PreHandling → Authenticating → RoleChecking → PermissionChecking → Invoking → Completed
//!                                │               │                 │
//!                                └──── Deny ─────┴──────── Deny ───┴──────────────────▶ Completed
//!
//! Completed always submits one AuditRecord before control returns.
//! ```
//!
//! Gates run synchronously on the caller's thread and never suspend. An
//! authentication failure always preempts role and permission failures: any
//! operation that declares a role or permission requirement also gets an
//! authentication gate, so a caller never sees a 403 before a 401.

mod guard;
pub mod hook;

pub use hook::{HookContext, PreHandleHook, TracingPreHandle};

use crate::audit::{AuditOutcome, AuditRecorder};
use crate::context::SecurityContextAccessor;
use crate::error::{AuthzError, Result};
use crate::evaluator::{Evaluator, PolicyEvaluator};
use crate::metrics::GateMetrics;
use crate::policy::PolicyDeclaration;
use crate::types::{Denial, GateKind, Principal, ANONYMOUS_ACTOR};
use guard::AuditGuard;
use hook::{sort_hooks, RegisteredHook};
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Result of an intercepted call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    /// Every gate passed and the operation returned `Ok`
    Allowed(T),
    /// A gate refused the call; the operation was not invoked
    Denied(Denial),
    /// The operation ran and returned this error, unchanged
    OperationFailed(E),
}

impl<T, E> Outcome<T, E> {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Outcome::Allowed(_))
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Outcome::Denied(_))
    }

    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Outcome::Denied(denial) => Some(denial),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U, E> {
        match self {
            Outcome::Allowed(value) => Outcome::Allowed(f(value)),
            Outcome::Denied(denial) => Outcome::Denied(denial),
            Outcome::OperationFailed(err) => Outcome::OperationFailed(err),
        }
    }

    /// Split into the gate decision and the operation's own result
    pub fn into_result(self) -> std::result::Result<std::result::Result<T, E>, Denial> {
        match self {
            Outcome::Allowed(value) => Ok(Ok(value)),
            Outcome::OperationFailed(err) => Ok(Err(err)),
            Outcome::Denied(denial) => Err(denial),
        }
    }
}

/// Pipeline stage of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    PreHandling,
    Authenticating,
    RoleChecking,
    PermissionChecking,
    Invoking,
    Completed,
}

/// Builder for [`InterceptionChain`]
pub struct ChainBuilder {
    action: String,
    audit_action: Option<String>,
    declaration: Arc<PolicyDeclaration>,
    recorder: Arc<dyn AuditRecorder>,
    evaluator: Option<Arc<dyn Evaluator>>,
    metrics: Option<Arc<GateMetrics>>,
    hooks: Vec<RegisteredHook>,
}

impl ChainBuilder {
    /// Symbolic action written to audit records (defaults to the operation name)
    pub fn audit_action(mut self, audit_action: impl Into<String>) -> Self {
        self.audit_action = Some(audit_action.into());
        self
    }

    /// Replace the default [`PolicyEvaluator`]
    pub fn evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn metrics(mut self, metrics: Arc<GateMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register a pre-handle hook; lower `order` runs first
    pub fn hook(mut self, order: i32, hook: Arc<dyn PreHandleHook>) -> Self {
        self.hooks.push(RegisteredHook { order, hook });
        self
    }

    pub fn build(self) -> Result<InterceptionChain> {
        if self.action.trim().is_empty() {
            return Err(AuthzError::InvalidInput(
                "operation name must not be empty".to_string(),
            ));
        }
        self.declaration.validate(&self.action)?;

        let hooks = match self.declaration.pre_handle {
            Some(pre_handle) if pre_handle.enabled => {
                let mut hooks = Vec::with_capacity(self.hooks.len() + 1);
                hooks.push(RegisteredHook {
                    order: pre_handle.order,
                    hook: Arc::new(TracingPreHandle::new(pre_handle.order)),
                });
                hooks.extend(self.hooks);
                sort_hooks(&mut hooks);
                hooks
            }
            _ => {
                if !self.hooks.is_empty() {
                    warn!(
                        "Operation '{}' registers {} pre-handle hook(s) but its pre-handle stage is disabled",
                        self.action,
                        self.hooks.len()
                    );
                }
                Vec::new()
            }
        };

        let audit_action = self.audit_action.unwrap_or_else(|| self.action.clone());

        debug!(
            "Chain built for '{}': authentication={}, role={}, permission={}, hooks={}",
            self.action,
            self.declaration.require_authentication,
            self.declaration.role.is_some(),
            self.declaration.permission.is_some(),
            hooks.len()
        );

        Ok(InterceptionChain {
            action: self.action,
            audit_action,
            declaration: self.declaration,
            hooks,
            evaluator: self
                .evaluator
                .unwrap_or_else(|| Arc::new(PolicyEvaluator::new())),
            recorder: self.recorder,
            metrics: self.metrics,
        })
    }
}

/// Gates and audit emission wrapped around one operation
pub struct InterceptionChain {
    action: String,
    audit_action: String,
    declaration: Arc<PolicyDeclaration>,
    hooks: Vec<RegisteredHook>,
    evaluator: Arc<dyn Evaluator>,
    recorder: Arc<dyn AuditRecorder>,
    metrics: Option<Arc<GateMetrics>>,
}

impl fmt::Debug for InterceptionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptionChain")
            .field("action", &self.action)
            .field("audit_action", &self.audit_action)
            .field("declaration", &self.declaration)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl InterceptionChain {
    pub fn builder(
        action: impl Into<String>,
        declaration: impl Into<Arc<PolicyDeclaration>>,
        recorder: Arc<dyn AuditRecorder>,
    ) -> ChainBuilder {
        ChainBuilder {
            action: action.into(),
            audit_action: None,
            declaration: declaration.into(),
            recorder,
            evaluator: None,
            metrics: None,
            hooks: Vec::new(),
        }
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn audit_action(&self) -> &str {
        &self.audit_action
    }

    pub fn declaration(&self) -> &PolicyDeclaration {
        &self.declaration
    }

    /// Run the gates and, if they all allow, the operation
    ///
    /// `args` is rendered with `Debug` into the audit detail before the
    /// operation consumes it. The principal is passed through to the
    /// operation unchanged.
    pub fn call<A, T, E, F>(&self, principal: Option<&Principal>, args: A, op: F) -> Outcome<T, E>
    where
        A: fmt::Debug,
        F: FnOnce(Option<&Principal>, A) -> std::result::Result<T, E>,
    {
        let guard = self.open_audit(principal, &args);

        if let Err(denial) = self.admit(principal) {
            self.trace_stage(Stage::Completed);
            guard.finish(AuditOutcome::Denied {
                status: denial.status,
            });
            return Outcome::Denied(denial);
        }

        self.trace_stage(Stage::Invoking);
        let result = op(principal, args);
        self.trace_stage(Stage::Completed);

        self.complete(guard, result)
    }

    /// Resolve the principal through `context`, then [`call`](Self::call)
    pub fn call_with<A, T, E, F>(
        &self,
        context: &dyn SecurityContextAccessor,
        args: A,
        op: F,
    ) -> Outcome<T, E>
    where
        A: fmt::Debug,
        F: FnOnce(Option<&Principal>, A) -> std::result::Result<T, E>,
    {
        let principal = context.resolve_principal();
        self.call(principal.as_ref(), args, op)
    }

    /// Async variant of [`call`](Self::call)
    ///
    /// Gate evaluation still completes before the first `.await`. If the
    /// returned future is dropped mid-operation the call is audited as
    /// cancelled.
    pub async fn call_async<'p, A, T, E, F, Fut>(
        &self,
        principal: Option<&'p Principal>,
        args: A,
        op: F,
    ) -> Outcome<T, E>
    where
        A: fmt::Debug,
        F: FnOnce(Option<&'p Principal>, A) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let guard = self.open_audit(principal, &args);

        if let Err(denial) = self.admit(principal) {
            self.trace_stage(Stage::Completed);
            guard.finish(AuditOutcome::Denied {
                status: denial.status,
            });
            return Outcome::Denied(denial);
        }

        self.trace_stage(Stage::Invoking);
        let result = op(principal, args).await;
        self.trace_stage(Stage::Completed);

        self.complete(guard, result)
    }

    /// Pre-handle stage plus every declared gate, without invoking anything
    ///
    /// Does not emit an audit record; use [`call`](Self::call) for that.
    pub fn admit(&self, principal: Option<&Principal>) -> std::result::Result<(), Denial> {
        let start = Instant::now();

        self.run_pre_handle(principal);
        let decision = self.evaluate_gates(principal);

        if let Some(metrics) = &self.metrics {
            metrics.record_gate_latency(start.elapsed());
            match &decision {
                Ok(()) => metrics.record_allowed(),
                Err(denial) => metrics.record_denied(denial.status),
            }
        }

        match &decision {
            Ok(()) => debug!(
                "All gates passed for '{}' - user: {}",
                self.action,
                actor(principal)
            ),
            Err(denial) => warn!(
                "Call to '{}' denied by {} gate - user: {}, status: {}, reason: {}",
                self.action,
                denial.gate,
                actor(principal),
                denial.status,
                denial.message
            ),
        }

        decision
    }

    fn open_audit<A: fmt::Debug>(&self, principal: Option<&Principal>, args: &A) -> AuditGuard {
        self.trace_stage(Stage::Pending);
        AuditGuard::new(
            Arc::clone(&self.recorder),
            self.metrics.clone(),
            principal.map(|p| p.id.clone()),
            self.audit_action.clone(),
            format!("{:?}", args),
        )
    }

    fn complete<T, E>(
        &self,
        guard: AuditGuard,
        result: std::result::Result<T, E>,
    ) -> Outcome<T, E> {
        match result {
            Ok(value) => {
                guard.finish(AuditOutcome::Allowed);
                Outcome::Allowed(value)
            }
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_operation_failure();
                }
                debug!("Operation '{}' returned an error", self.action);
                guard.finish(AuditOutcome::Failed);
                Outcome::OperationFailed(err)
            }
        }
    }

    fn run_pre_handle(&self, principal: Option<&Principal>) {
        if self.hooks.is_empty() {
            return;
        }

        self.trace_stage(Stage::PreHandling);
        let ctx = HookContext {
            action: &self.action,
            principal,
        };

        for registered in &self.hooks {
            let hook = &registered.hook;
            match panic::catch_unwind(AssertUnwindSafe(|| hook.pre_handle(&ctx))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        "Pre-handle hook '{}' failed for '{}': {:#}",
                        hook.name(),
                        self.action,
                        e
                    );
                    self.record_hook_fault();
                }
                Err(_) => {
                    error!(
                        "Pre-handle hook '{}' panicked for '{}'",
                        hook.name(),
                        self.action
                    );
                    self.record_hook_fault();
                }
            }
        }
    }

    fn evaluate_gates(&self, principal: Option<&Principal>) -> std::result::Result<(), Denial> {
        let declaration = &self.declaration;

        if !declaration.has_gates() {
            return Ok(());
        }

        self.trace_stage(Stage::Authenticating);
        self.evaluator
            .evaluate_authentication(principal, &declaration.unauthenticated_message)
            .into_result()?;

        // A custom evaluator may admit a missing principal; requirement gates
        // still need one.
        let requirements = [
            (Stage::RoleChecking, GateKind::Role, &declaration.role),
            (Stage::PermissionChecking, GateKind::Permission, &declaration.permission),
        ];

        for (stage, gate, requirement) in requirements {
            let Some(requirement) = requirement else {
                continue;
            };

            self.trace_stage(stage);
            let Some(principal) = principal else {
                return Err(Denial::unauthorized(
                    GateKind::Authentication,
                    declaration.unauthenticated_message.clone(),
                ));
            };

            self.evaluator
                .evaluate_requirement(principal, requirement, gate)
                .into_result()?;
        }

        Ok(())
    }

    fn record_hook_fault(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_pre_handle_fault();
        }
    }

    fn trace_stage(&self, stage: Stage) {
        debug!("{} -> {:?}", self.action, stage);
    }
}

fn actor(principal: Option<&Principal>) -> &str {
    principal.map(|p| p.id.as_str()).unwrap_or(ANONYMOUS_ACTOR)
}
