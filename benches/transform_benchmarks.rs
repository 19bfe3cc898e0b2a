//! Benchmarks for parsing, peeling and tiling.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use structloop::transform::{Pipeline, PipelineConfig};

const NEST: &str = r#"
    func @nest(%n: i64, %m: i64) {
      %c0 = constant() {value = 0} : i64
      %c4 = constant() {value = 4} : i64
      %c8 = constant() {value = 8} : i64
      %r = for(%c0, %c0, %n, %m, %c4, %c8, %c0) {dims = 2} ({
      ^bb0(%i: i64, %j: i64, %acc: i64):
        %x = mul(%i, %j) : i64
        %s = add(%acc, %x) : i64
        yield(%s)
      }) : i64
      return(%r)
    }
"#;

const MATRIX: &str = r#"
    func @scale(%a: tensor<?x?xi64>, %out: tensor<?x?xi64>) {
      %r = generic(%a, %out) {inputs = 1, iterators = ["parallel", "parallel"], maps = [[0, 1], [0, 1]]} ({
      ^bb0(%x: i64, %y: i64):
        %s = add(%x, %y) : i64
        yield(%s)
      }) : tensor<?x?xi64>
      return(%r)
    }
"#;

/// Benchmark parsing speed.
fn bench_parsing(c: &mut Criterion) {
    c.bench_function("lex_nest", |b| {
        b.iter(|| {
            let lexer = structloop::frontend::Lexer::new(black_box(NEST));
            lexer.tokenize().unwrap()
        })
    });

    c.bench_function("parse_nest", |b| {
        b.iter(|| structloop::parse(black_box(NEST)).unwrap())
    });
}

/// Benchmark peeling a symbolic 2-d nest.
fn bench_peeling(c: &mut Criterion) {
    let func = structloop::parse(NEST).unwrap();
    let pipeline = Pipeline::new(PipelineConfig::peel_only());
    c.bench_function("peel_2d_nest", |b| {
        b.iter_batched(
            || func.clone(),
            |mut func| pipeline.run(&mut func).unwrap(),
            BatchSize::SmallInput,
        )
    });
}

/// Benchmark tiling followed by peeling of the generated loops.
fn bench_tile_and_peel(c: &mut Criterion) {
    let func = structloop::parse(MATRIX).unwrap();
    let pipeline = Pipeline::new(PipelineConfig::tile_and_peel(vec![32, 16]));
    c.bench_function("tile_and_peel_2d", |b| {
        b.iter_batched(
            || func.clone(),
            |mut func| pipeline.run(&mut func).unwrap(),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_parsing, bench_peeling, bench_tile_and_peel);
criterion_main!(benches);
