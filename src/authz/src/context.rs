//! Identity resolution for the current call
//!
//! The chain never reads identity from ambient state. A binding layer
//! resolves the principal through a [`SecurityContextAccessor`] once per
//! call and passes it explicitly to
//! [`InterceptionChain::call`](crate::chain::InterceptionChain::call).

use crate::types::Principal;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Resolves the calling principal, or reports that there is none
pub trait SecurityContextAccessor: Send + Sync {
    /// Pure lookup; must not mutate identity state
    fn resolve_principal(&self) -> Option<Principal>;
}

/// Context that always resolves the same (optional) principal
#[derive(Debug, Clone, Default)]
pub struct StaticContext {
    principal: Option<Principal>,
}

impl StaticContext {
    pub fn new(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
        }
    }

    /// Context with no principal
    pub fn anonymous() -> Self {
        Self { principal: None }
    }
}

impl SecurityContextAccessor for StaticContext {
    fn resolve_principal(&self) -> Option<Principal> {
        self.principal.clone()
    }
}

/// Context backed by a closure
pub struct FnContext<F>(F);

impl<F> FnContext<F>
where
    F: Fn() -> Option<Principal> + Send + Sync,
{
    pub fn new(resolve: F) -> Self {
        Self(resolve)
    }
}

impl<F> SecurityContextAccessor for FnContext<F>
where
    F: Fn() -> Option<Principal> + Send + Sync,
{
    fn resolve_principal(&self) -> Option<Principal> {
        (self.0)()
    }
}

/// Wrapper that counts how often identity was resolved
pub struct CountingContext<C> {
    inner: C,
    resolutions: AtomicUsize,
}

impl<C: SecurityContextAccessor> CountingContext<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            resolutions: AtomicUsize::new(0),
        }
    }

    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }
}

impl<C: SecurityContextAccessor> SecurityContextAccessor for CountingContext<C> {
    fn resolve_principal(&self) -> Option<Principal> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve_principal()
    }
}
