use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use valign::align::AlignmentAnalyzer;
use valign::ir::{BufferParam, Expr, Ident, Load, ScalarType};
use valign::modulus::ModulusRemainder;
use valign::pass::PassId;
use valign::pipeline::{run_pipeline, CompilationState};
use valign::program_query::analysis_options;

const TILE: &str = r#"
set alignment = 128
buffer input: u8 align 128
buffer out: u8 align 128
alloc tmp: i16
scalar n: i32

for y in 0..n {
  let row = y * 1024
  for x in 0..1024 step 128 {
    store<u8>(out, ramp(row + x, 1, 128), load<u8>(input, ramp(row + x + 3, 1, 128)))
    store<i16>(tmp, ramp(x / 2, 1, 64), cast<i16>(load<u8>(input, ramp(row + x, 2, 64))))
  }
}
"#;

/// A program with `n_loops` sibling tiles, each re-binding `x`.
fn generate_tiles(n_loops: usize) -> String {
    let mut src = String::from("buffer input: u8 align 128\nbuffer out: u8 align 128\nscalar n: i32\n");
    src.push_str("for y in 0..n {\n  let row = y * 4096\n");
    for t in 0..n_loops {
        src.push_str(&format!("  for x in {}..4096 step 128 {{\n", t * 8));
        src.push_str(&format!(
            "    store<u8>(out, ramp(row + x, 1, 128), load<u8>(input, ramp(row + x + {}, 1, 128)))\n",
            t
        ));
        src.push_str("  }\n");
    }
    src.push_str("}\n");
    src
}

fn analyze_source(source: &str) {
    let parse_result = valign::parser::parse(source);
    let program = parse_result
        .program
        .expect("benchmark program must parse");
    let options = analysis_options(&program, None);
    let mut state = CompilationState::new(program, options);
    run_pipeline(&mut state, PassId::Align, |_, _| {}).expect("benchmark program must analyze");
    black_box(&state.report);
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    group.bench_function("tile", |b| {
        b.iter(|| {
            let r = valign::parser::parse(black_box(TILE));
            black_box(&r.program);
        });
    });
    group.finish();
}

fn bench_full_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_pipeline");
    group.bench_function("tile", |b| b.iter(|| analyze_source(black_box(TILE))));
    group.finish();
}

// Pipeline scaling vs number of sibling loops.
fn bench_pipeline_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_scaling");
    for n_loops in [1_usize, 8, 32, 128] {
        let source = generate_tiles(n_loops);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}loops", n_loops)),
            &source,
            |b, source| b.iter(|| analyze_source(black_box(source.as_str()))),
        );
    }
    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    let mut analyzer = AlignmentAnalyzer::standalone(128).expect("valid alignment");
    analyzer.push_fact("x", ModulusRemainder::new(256, 40));
    analyzer.push_fact("row", ModulusRemainder::new(1024, 0));

    let base = valign::parser::parse_expr("row + x * 3 + 8").expect("base parses");
    for stride in [1_i64, 2, 4] {
        let load = Load {
            buffer: Ident::new("input"),
            ty: ScalarType::Int(16),
            index: Box::new(Expr::ramp(base.clone(), Expr::int(stride), 64)),
            param: Some(BufferParam::new("input", 128)),
        };
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("stride{}", stride)),
            &load,
            |b, load| b.iter(|| black_box(analyzer.classify(black_box(load)))),
        );
    }

    group.bench_function("push_pop", |b| {
        b.iter_batched(
            || AlignmentAnalyzer::standalone(128).expect("valid alignment"),
            |mut analyzer| {
                for i in 0..64 {
                    analyzer.push_fact("t", ModulusRemainder::new(128, i));
                }
                for _ in 0..64 {
                    analyzer.pop("t");
                }
                black_box(analyzer.fact("t"))
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_parse,
    bench_full_pipeline,
    bench_pipeline_scaling,
    bench_classify
);
criterion_main!(benches);
