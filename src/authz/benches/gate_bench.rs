//! Gate evaluation and audit submission benchmarks
//!
//! The gate path runs on the caller's thread for every intercepted call;
//! these keep an eye on its per-call overhead.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tokio::runtime::Runtime;
use warden_authz::{
    AuditRecord, AuditRecorder, AuditSink, AuditSinkConfig, Evaluator, GateKind,
    InMemoryAuditStore, InterceptionChain, Outcome, PolicyDeclaration, PolicyEvaluator, Principal,
    Requirement,
};

struct NullRecorder;

impl AuditRecorder for NullRecorder {
    fn submit(&self, record: AuditRecord) {
        black_box(record);
    }
}

fn authorities(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("perm:{}", i)).collect()
}

fn bench_requirement_evaluation(c: &mut Criterion) {
    let evaluator = PolicyEvaluator::new();
    let mut group = c.benchmark_group("requirement_evaluation");

    for count in [1usize, 10, 100] {
        let principal = Principal::new("alice").with_authorities(authorities(count));
        let any = Requirement::any_of([format!("perm:{}", count - 1), "missing".to_string()]);
        let all = Requirement::all_of(authorities(count));

        group.bench_with_input(BenchmarkId::new("any", count), &principal, |b, principal| {
            b.iter(|| evaluator.evaluate_requirement(black_box(principal), &any, GateKind::Role))
        });
        group.bench_with_input(BenchmarkId::new("all", count), &principal, |b, principal| {
            b.iter(|| {
                evaluator.evaluate_requirement(black_box(principal), &all, GateKind::Permission)
            })
        });
    }

    group.finish();
}

fn bench_chain_call(c: &mut Criterion) {
    let declaration = PolicyDeclaration::open()
        .require_authentication("Not logged in")
        .with_role(Requirement::any_of(["ROLE_ADMIN", "ROLE_USER"]))
        .with_permission(Requirement::all_of(["user:read"]));
    let chain = InterceptionChain::builder("users", declaration, Arc::new(NullRecorder))
        .build()
        .unwrap();

    let allowed = Principal::new("alice").with_authorities(["ROLE_USER", "user:read"]);
    let forbidden = Principal::new("bob").with_authority("ROLE_GUEST");

    let mut group = c.benchmark_group("chain_call");
    group.bench_function("allowed", |b| {
        b.iter(|| {
            let outcome: Outcome<u32, ()> = chain.call(Some(&allowed), 42u32, |_, v| Ok(v));
            black_box(outcome)
        })
    });
    group.bench_function("forbidden", |b| {
        b.iter(|| {
            let outcome: Outcome<u32, ()> = chain.call(Some(&forbidden), 42u32, |_, v| Ok(v));
            black_box(outcome)
        })
    });
    group.bench_function("anonymous", |b| {
        b.iter(|| {
            let outcome: Outcome<u32, ()> = chain.call(None, 42u32, |_, v| Ok(v));
            black_box(outcome)
        })
    });
    group.finish();
}

fn bench_sink_submit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let sink = rt.block_on(async {
        let config = AuditSinkConfig {
            capacity: 100_000,
            workers: 2,
            ..Default::default()
        };
        AuditSink::start(config, Arc::new(InMemoryAuditStore::with_capacity(100_000))).unwrap()
    });

    let mut group = c.benchmark_group("audit_sink");
    group.throughput(Throughput::Elements(1));
    group.bench_function("submit", |b| {
        b.iter(|| {
            sink.submit(AuditRecord::new(
                Some("alice"),
                "HELLO",
                "[]",
                warden_authz::AuditOutcome::Allowed,
            ))
        })
    });
    group.finish();

    rt.block_on(sink.shutdown());
}

criterion_group!(
    benches,
    bench_requirement_evaluation,
    bench_chain_call,
    bench_sink_submit
);
criterion_main!(benches);
