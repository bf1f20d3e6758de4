//! Gate decision logic
//!
//! [`PolicyEvaluator`] is pure: no I/O, no clocks, no shared state. The same
//! `(principal, requirement)` always produces the same [`GateResult`].
//! The [`Evaluator`] trait exists so the chain can be driven by an
//! instrumented evaluator in tests.

use crate::policy::{Combinator, Requirement};
use crate::types::{Denial, GateKind, GateResult, Principal};
use tracing::debug;

/// Decision logic consulted by the interception chain
pub trait Evaluator: Send + Sync {
    /// Allow iff a principal is present and authenticated
    fn evaluate_authentication(
        &self,
        principal: Option<&Principal>,
        unauthenticated_message: &str,
    ) -> GateResult;

    /// Evaluate a role or permission requirement against the principal
    ///
    /// `gate` only labels the resulting denial; role and permission checks
    /// share the same combinator semantics.
    fn evaluate_requirement(
        &self,
        principal: &Principal,
        requirement: &Requirement,
        gate: GateKind,
    ) -> GateResult;
}

/// Stateless default evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyEvaluator;

impl PolicyEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Whether `principal` satisfies `requirement`
    ///
    /// An empty requirement set is never satisfied, for either combinator.
    pub fn satisfies(principal: &Principal, requirement: &Requirement) -> bool {
        if requirement.is_unsatisfiable() {
            return false;
        }

        match requirement.combinator {
            Combinator::All => requirement.required.is_subset(&principal.authorities),
            Combinator::Any => requirement
                .required
                .iter()
                .any(|authority| principal.authorities.contains(authority)),
        }
    }
}

impl Evaluator for PolicyEvaluator {
    fn evaluate_authentication(
        &self,
        principal: Option<&Principal>,
        unauthenticated_message: &str,
    ) -> GateResult {
        match principal {
            Some(p) if p.authenticated => GateResult::Allow,
            _ => GateResult::Deny(Denial::unauthorized(
                GateKind::Authentication,
                unauthenticated_message,
            )),
        }
    }

    fn evaluate_requirement(
        &self,
        principal: &Principal,
        requirement: &Requirement,
        gate: GateKind,
    ) -> GateResult {
        if Self::satisfies(principal, requirement) {
            GateResult::Allow
        } else {
            debug!(
                "{} requirement not met - user: {}, has: {:?}, required: {:?} ({:?})",
                gate,
                principal.id,
                principal.authorities,
                requirement.required,
                requirement.combinator
            );
            GateResult::Deny(Denial::forbidden(gate, requirement.failure_message.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StatusKind;

    fn user() -> Principal {
        Principal::new("alice").with_authority("ROLE_USER")
    }

    #[test]
    fn test_authentication_allows_authenticated_principal() {
        let evaluator = PolicyEvaluator::new();
        assert!(evaluator
            .evaluate_authentication(Some(&user()), "Not logged in")
            .is_allow());
    }

    #[test]
    fn test_authentication_denies_missing_principal() {
        let result = PolicyEvaluator.evaluate_authentication(None, "Please login first");
        assert_eq!(
            result,
            GateResult::Deny(Denial::unauthorized(
                GateKind::Authentication,
                "Please login first"
            ))
        );
    }

    #[test]
    fn test_authentication_denies_unauthenticated_principal() {
        let principal = Principal::unauthenticated("alice").with_authority("ROLE_ADMIN");
        let result = PolicyEvaluator.evaluate_authentication(Some(&principal), "Not logged in");
        assert!(!result.is_allow());
    }

    #[test]
    fn test_any_denies_without_overlap() {
        let requirement = Requirement::any_of(["ROLE_ADMIN"]);
        let result = PolicyEvaluator.evaluate_requirement(&user(), &requirement, GateKind::Role);

        match result {
            GateResult::Deny(denial) => {
                assert_eq!(denial.status, StatusKind::Forbidden);
                assert_eq!(denial.gate, GateKind::Role);
                assert_eq!(denial.message, "Insufficient permissions");
            }
            GateResult::Allow => panic!("ROLE_USER must not satisfy ROLE_ADMIN"),
        }
    }

    #[test]
    fn test_any_allows_single_match() {
        let requirement = Requirement::any_of(["ROLE_ADMIN", "ROLE_USER"]);
        assert!(PolicyEvaluator
            .evaluate_requirement(&user(), &requirement, GateKind::Role)
            .is_allow());
    }

    #[test]
    fn test_all_requires_every_authority() {
        let admin = Principal::new("root").with_authorities(["ROLE_ADMIN", "ROLE_USER"]);
        let requirement = Requirement::all_of(["ROLE_ADMIN", "ROLE_USER"]);

        assert!(PolicyEvaluator
            .evaluate_requirement(&admin, &requirement, GateKind::Role)
            .is_allow());
        assert!(!PolicyEvaluator
            .evaluate_requirement(&user(), &requirement, GateKind::Role)
            .is_allow());
    }

    #[test]
    fn test_empty_requirement_never_allows() {
        let admin = Principal::new("root").with_authorities(["ROLE_ADMIN", "ROLE_USER"]);

        for requirement in [
            Requirement::all_of(Vec::<String>::new()),
            Requirement::any_of(Vec::<String>::new()),
        ] {
            let result =
                PolicyEvaluator.evaluate_requirement(&admin, &requirement, GateKind::Permission);
            assert!(!result.is_allow());
        }
    }

    #[test]
    fn test_prefix_is_not_interpreted() {
        let principal = Principal::new("alice").with_authority("ADMIN");
        let requirement = Requirement::any_of(["ROLE_ADMIN"]);
        assert!(!PolicyEvaluator::satisfies(&principal, &requirement));
    }

    #[test]
    fn test_permission_denial_uses_custom_message() {
        let requirement = Requirement::all_of(["user:delete"]).with_message("Cannot delete users");
        let result =
            PolicyEvaluator.evaluate_requirement(&user(), &requirement, GateKind::Permission);

        let denial = result.into_result().unwrap_err();
        assert_eq!(denial.gate, GateKind::Permission);
        assert_eq!(denial.message, "Cannot delete users");
    }
}
