use std::sync::{Arc, OnceLock};

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use indexmap::IndexSet;

use cellgraph_core::{key, Cell, EngineConfig, EvalError, Model, Node, ObjectId, Value};

/// `f(0) = 0`, `f(n) = f(n - 1) + 1`: one trace edge per step.
fn chain_model() -> (Model, ObjectId) {
    let mut model = Model::with_config(EngineConfig::new().with_max_depth(100_000));
    let slot: Arc<OnceLock<ObjectId>> = Arc::new(OnceLock::new());
    let me = slot.clone();
    let f = model.add_cell(Cell::new("f", &["n"], move |ex, k| {
        let n = k.get(0).and_then(Value::as_i64).unwrap_or(0);
        if n == 0 {
            return Ok(Value::Int(0));
        }
        let f = me.get().copied().ok_or_else(|| EvalError::msg("unbound"))?;
        let prev = ex.eval(f, key![n - 1])?.as_i64().unwrap_or(0);
        Ok(Value::Int(prev + 1))
    }));
    let _ = slot.set(f);
    (model, f)
}

fn bench_trace_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("TraceGraph");
    group.sample_size(20);

    let sizes: [i64; 3] = [1_000, 5_000, 10_000];

    for n in sizes.iter() {
        // Cold evaluation builds the whole chain of trace edges
        group.bench_with_input(BenchmarkId::new("Evaluate/Chain", n), n, |b, &n| {
            b.iter_batched(
                chain_model,
                |(mut model, f)| model.evaluate(f, key![black_box(n)]),
                BatchSize::LargeInput,
            )
        });

        // Clearing the root walks every dependent
        group.bench_with_input(BenchmarkId::new("Invalidate/Root", n), n, |b, &n| {
            b.iter_batched(
                || {
                    let (mut model, f) = chain_model();
                    let _ = model.evaluate(f, key![n]);
                    (model, f)
                },
                |(mut model, f)| model.invalidate(f, key![0]),
                BatchSize::LargeInput,
            )
        });

        // Planning a batch recompute of the top of the chain
        let (mut model, f) = chain_model();
        let _ = model.evaluate(f, key![*n]);
        let targets: IndexSet<Node> = [Node::eval(f, key![*n])].into_iter().collect();
        let universe: IndexSet<Node> = model.trace_graph().nodes().cloned().collect();
        group.bench_with_input(BenchmarkId::new("Plan/Block64", n), n, |b, _| {
            b.iter(|| model.plan_recompute(black_box(&targets), &universe, 64))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_trace_graph);
criterion_main!(benches);
