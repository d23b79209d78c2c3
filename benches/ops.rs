//! Engine benchmarks over realistic workloads.
//!
//! Run with:
//! ```bash
//! cargo bench --bench ops
//! ```

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use netbdd::{Bdd, BddFactory};

/// N-Queens: the canonical BDD stress test. Returns the solution count as
/// a sanity anchor.
fn solve_queens(factory: &BddFactory, n: usize) -> Bdd {
    factory.set_var_num(n * n).unwrap();
    let var = |i: usize, j: usize| factory.ith_var((i * n + j) as u32).unwrap();

    let mut result = factory.one();

    for i in 0..n {
        // At least one queen per row.
        let row: Vec<Bdd> = (0..n).map(|j| var(i, j)).collect();
        let refs: Vec<&Bdd> = row.iter().collect();
        result = result.and_with(factory.or_all(&refs).unwrap()).unwrap();

        // At most one queen per row.
        for j1 in 0..n {
            for j2 in (j1 + 1)..n {
                let not_both = var(i, j1)
                    .not()
                    .unwrap()
                    .or_with(var(i, j2).not().unwrap())
                    .unwrap();
                result = result.and_with(not_both).unwrap();
            }
        }
    }

    // At most one queen per column.
    for j in 0..n {
        for i1 in 0..n {
            for i2 in (i1 + 1)..n {
                let not_both = var(i1, j)
                    .not()
                    .unwrap()
                    .or_with(var(i2, j).not().unwrap())
                    .unwrap();
                result = result.and_with(not_both).unwrap();
            }
        }
    }

    // Diagonals.
    for i1 in 0..n {
        for j1 in 0..n {
            for i2 in (i1 + 1)..n {
                let di = i2 - i1;
                for j2 in [j1.checked_sub(di), Some(j1 + di)].into_iter().flatten() {
                    if j2 < n {
                        let not_both = var(i1, j1)
                            .not()
                            .unwrap()
                            .or_with(var(i2, j2).not().unwrap())
                            .unwrap();
                        result = result.and_with(not_both).unwrap();
                    }
                }
            }
        }
    }

    result
}

fn build_random_formula(factory: &BddFactory, num_vars: usize, num_ops: usize, seed: u64) -> Bdd {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut nodes: Vec<Bdd> = (0..num_vars as u32)
        .map(|v| {
            if rng.random_bool(0.5) {
                factory.ith_var(v).unwrap()
            } else {
                factory.nith_var(v).unwrap()
            }
        })
        .collect();

    for _ in 0..num_ops {
        let i = rng.random_range(0..nodes.len());
        let j = rng.random_range(0..nodes.len());
        if i == j {
            continue;
        }
        nodes[i] = match rng.random_range(0..4) {
            0 => nodes[i].and(&nodes[j]).unwrap(),
            1 => nodes[i].or(&nodes[j]).unwrap(),
            2 => nodes[i].xor(&nodes[j]).unwrap(),
            _ => nodes[i].imp(&nodes[j]).unwrap(),
        };
    }

    let refs: Vec<&Bdd> = nodes.iter().collect();
    factory.and_all(&refs).unwrap()
}

fn bench_queens_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("bdd/queens_scaling");
    group.sample_size(10);

    for n in [4, 5, 6] {
        group.bench_with_input(BenchmarkId::new("queens", n), &n, |b, &n| {
            b.iter(|| {
                let factory = BddFactory::init(1 << 16, 1 << 14);
                let result = solve_queens(&factory, n);
                let count = result.sat_count().unwrap();
                (result, count)
            });
        });
    }

    group.finish();
}

fn bench_random_formula(c: &mut Criterion) {
    let mut group = c.benchmark_group("bdd/random_formula");

    let num_vars = 20;
    let num_ops = 1000;
    let seed = 42;

    for cache_size in [1usize << 12, 1 << 14, 1 << 16] {
        group.bench_with_input(
            BenchmarkId::new("v=20,ops=1000", format!("cache={}", cache_size)),
            &cache_size,
            |b, &cache_size| {
                b.iter(|| {
                    let factory = BddFactory::init(1 << 16, cache_size);
                    factory.set_var_num(num_vars).unwrap();
                    build_random_formula(&factory, num_vars, num_ops, seed)
                });
            },
        );
    }

    group.finish();
}

fn bench_integer_ranges(c: &mut Criterion) {
    use netbdd::BddInteger;

    let mut group = c.benchmark_group("bdd/integer_ranges");

    for width in [8usize, 16, 32] {
        group.bench_with_input(BenchmarkId::new("range", width), &width, |b, &width| {
            b.iter(|| {
                let factory = BddFactory::init(1 << 14, 1 << 12);
                let field = BddInteger::new(&factory, width).unwrap();
                let hi = if width >= 63 { u64::MAX / 2 } else { (1u64 << width) - 2 };
                field.range(1, hi).unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_queens_scaling,
    bench_random_formula,
    bench_integer_ranges
);
criterion_main!(benches);
