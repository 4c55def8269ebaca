//! Benchmarks for keyed list reconciliation.
//!
//! Each iteration rewrites the source list of a bootstrapped instance and
//! runs one turn, so the numbers include the watcher notification, the
//! differ flush and mutation delivery.
//!
//! Run with: cargo bench -p weave-runtime --bench reconcile_bench

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;
use weave_dom::NullBackend;
use weave_reactive::Value;
use weave_runtime::{App, Binding, ComponentDef, NodeTemplate, RepeatSpec, RuntimeConfig, Vm};

fn list_app(len: usize, track_by: bool) -> (App, Vm) {
    let items: Vec<_> = (0..len).map(|i| json!({"id": i, "name": format!("row {i}")})).collect();
    let mut spec = RepeatSpec::new(Binding::path("rows")).value("row");
    if track_by {
        spec = spec.track_by("id");
    }
    let app = App::new("bench", RuntimeConfig::default(), NullBackend);
    app.register_component(
        ComponentDef::builder("list")
            .data(json!({ "rows": items }))
            .template(
                NodeTemplate::new("div").child(
                    NodeTemplate::new("text")
                        .attr("value", Binding::path("row.name"))
                        .repeat(spec),
                ),
            )
            .build(),
    );
    let vm = app.bootstrap("list", None).expect("bootstrap");
    (app, vm)
}

fn rows(vm: &Vm) -> weave_reactive::ObservableArray {
    vm.get("rows").as_array().cloned().expect("rows array")
}

// =============================================================================
// Keyed
// =============================================================================

fn bench_keyed(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile/keyed");

    for len in [100usize, 1_000] {
        group.bench_with_input(BenchmarkId::new("reverse", len), &len, |b, &len| {
            b.iter_batched(
                || list_app(len, true),
                |(app, vm)| {
                    rows(&vm).reverse();
                    black_box(app.tick());
                },
                BatchSize::LargeInput,
            )
        });

        group.bench_with_input(BenchmarkId::new("rotate", len), &len, |b, &len| {
            b.iter_batched(
                || list_app(len, true),
                |(app, vm)| {
                    let rows = rows(&vm);
                    if let Some(first) = rows.shift() {
                        rows.push(first);
                    }
                    black_box(app.tick());
                },
                BatchSize::LargeInput,
            )
        });

        group.bench_with_input(BenchmarkId::new("remove_middle", len), &len, |b, &len| {
            b.iter_batched(
                || list_app(len, true),
                |(app, vm)| {
                    rows(&vm).remove_at(len / 2);
                    black_box(app.tick());
                },
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

// =============================================================================
// Positional
// =============================================================================

fn bench_positional(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile/positional");

    for len in [100usize, 1_000] {
        group.bench_with_input(BenchmarkId::new("prepend", len), &len, |b, &len| {
            b.iter_batched(
                || list_app(len, false),
                |(app, vm)| {
                    rows(&vm).unshift([Value::from_json(json!({"id": -1, "name": "new"}))]);
                    black_box(app.tick());
                },
                BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_keyed, bench_positional);
criterion_main!(benches);
