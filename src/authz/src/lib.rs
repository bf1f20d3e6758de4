//! # Warden
//!
//! Declarative per-operation access control with an unconditional audit trail.
//!
//! ## Features
//!
//! - **Policy declarations** attached to operations at registration time
//! - **Ordered gates**: pre-handle hooks, authentication, role, permission
//! - **AND / OR requirements** over a flat authority namespace
//! - **Exactly one audit record per call**, including panics and cancellation
//! - **Non-blocking audit sink** with bounded queue, retries and backoff
//! - **Prometheus metrics** for gate decisions and audit health
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use warden_authz::{
//!     AuditSink, AuditSinkConfig, InMemoryAuditStore, InterceptionChain, Outcome,
//!     PolicyDeclaration, Principal, Requirement,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryAuditStore::new());
//!     let sink = Arc::new(AuditSink::start(AuditSinkConfig::default(), store.clone())?);
//!
//!     let admin = Requirement::any_of(["ROLE_ADMIN"]).with_message("Admin permission required");
//!     let declaration = PolicyDeclaration::open().with_role(admin);
//!     let chain = InterceptionChain::builder("hello", declaration, sink.clone())
//!         .audit_action("HELLO")
//!         .build()?;
//!
//!     let admin = Principal::new("alice").with_authority("ROLE_ADMIN");
//!     let outcome: Outcome<String, ()> =
//!         chain.call(Some(&admin), (), |_, _| Ok("Hello".to_string()));
//!     assert!(outcome.is_allowed());
//!
//!     sink.shutdown().await;
//!     assert_eq!(store.len(), 1);
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod chain;
pub mod config;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod policy;
pub mod registry;
pub mod types;

// Re-export commonly used types
pub use audit::{
    AuditOutcome, AuditRecord, AuditRecorder, AuditSink, AuditSinkConfig, AuditStats,
    AuditStore, InMemoryAuditStore, OverflowPolicy,
};
#[cfg(feature = "postgres")]
pub use audit::PostgresAuditStore;
pub use chain::{ChainBuilder, HookContext, InterceptionChain, Outcome, PreHandleHook, Stage};
pub use config::WardenConfig;
pub use context::{SecurityContextAccessor, StaticContext};
pub use error::{AuthzError, Result};
pub use evaluator::{Evaluator, PolicyEvaluator};
pub use metrics::{GateMetrics, PipelineMetrics};
pub use policy::{Combinator, OperationPolicy, PolicyDeclaration, PreHandle, Requirement};
pub use registry::OperationRegistry;
pub use types::{Denial, GateKind, GateResult, Principal, StatusKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
