//! Benchmark harness.
//!
//! Performance regression tracking for the build → project → check
//! pipeline.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mpstk::semantics::create_initial_context;
use mpstk::semantics::SafetyProperty;
use mpstk::*;
use std::sync::Arc;

fn roles(names: &[&str]) -> Vec<RoleName> {
    names.iter().map(|n| RoleName::new(*n)).collect()
}

fn oauth() -> GlobalProtocolDecl {
    GlobalProtocolDecl::new(
        "OAuth",
        roles(&["s", "c", "a"]),
        vec![GlobalInteraction::choice(
            "s",
            vec![
                (
                    "ok",
                    vec![
                        GlobalInteraction::message("s", "c", "login"),
                        GlobalInteraction::message_with_payload("c", "a", "passwd", "Str"),
                        GlobalInteraction::message_with_payload("a", "s", "auth", "Bool"),
                    ],
                ),
                (
                    "no",
                    vec![
                        GlobalInteraction::message("s", "c", "cancel"),
                        GlobalInteraction::message("c", "a", "quit"),
                    ],
                ),
            ],
        )],
    )
}

fn long_pipeline(stages: usize) -> GlobalProtocolDecl {
    let mut body = Vec::new();
    for i in 0..stages {
        body.push(GlobalInteraction::message(
            "A",
            "B",
            format!("step{}", i).as_str(),
        ));
        body.push(GlobalInteraction::message(
            "B",
            "A",
            format!("ack{}", i).as_str(),
        ));
    }
    GlobalProtocolDecl::new("Pipeline", roles(&["A", "B"]), body)
}

fn bench_cfg_build(c: &mut Criterion) {
    let decl = long_pipeline(50);
    c.bench_function("cfg_build_100_actions", |b| {
        b.iter(|| build_cfg(black_box(&decl)).unwrap());
    });
}

fn bench_projection(c: &mut Criterion) {
    let cfg = build_cfg(&oauth()).unwrap();
    c.bench_function("project_all_oauth", |b| {
        b.iter(|| project_all(black_box(&cfg)));
    });
}

fn bench_verification(c: &mut Criterion) {
    let cfg = build_cfg(&oauth()).unwrap();
    c.bench_function("verify_oauth", |b| {
        b.iter(|| verify_protocol(black_box(&cfg)));
    });
}

fn bench_safety(c: &mut Criterion) {
    let cfg = build_cfg(&oauth()).unwrap();
    let set = project_all(&cfg);
    let machines: Vec<(RoleName, Arc<Cfsm>)> = set
        .cfsms
        .into_iter()
        .map(|(role, machine)| (role, Arc::new(machine)))
        .collect();
    c.bench_function("basic_safety_oauth", |b| {
        b.iter(|| {
            let ctx = create_initial_context(machines.clone(), "bench");
            BasicSafety::new().check(black_box(&ctx))
        });
    });
}

criterion_group!(
    benches,
    bench_cfg_build,
    bench_projection,
    bench_verification,
    bench_safety
);
criterion_main!(benches);
