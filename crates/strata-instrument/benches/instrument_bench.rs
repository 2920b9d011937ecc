use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use indexmap::IndexSet;

use strata_instrument::{
    transform_layer, CivlTypeInfo, DuplicateMap, ImplOrigin, InstrumentationOptions,
    LinearTypeInfo, MoverType, RefinementBlocks, YieldingProc,
};
use strata_ir::{Block, CallCmd, Cmd, CmdId, Expr, Implementation, ParCallCmd, Procedure, Program, Type, Variable};

struct Input {
    program: Program,
    civl: CivlTypeInfo,
    duplicates: DuplicateMap,
    yielding_procs: IndexSet<String>,
}

/// `impls` implementations of `blocks` blocks each. Every block yields,
/// runs a parallel call and loops back to the previous block.
fn build_input(impls: usize, blocks: usize) -> Input {
    let globals: Vec<Variable> = (0..4).map(|i| Variable::new(format!("g{i}"), Type::Int)).collect();
    let mut program = Program::new();
    for g in &globals {
        program.add_global(g.clone());
    }
    program.add_procedure(Procedure::new("Left", vec![], vec![]));
    program.add_procedure(Procedure::new("Right", vec![], vec![]));

    let mut civl = CivlTypeInfo::new(globals);
    let mut duplicates = DuplicateMap::new();
    let mut yielding_procs = IndexSet::new();
    let mut next_id = 0u32;
    let mut fresh = || {
        next_id += 1;
        CmdId(next_id)
    };

    for i in 0..impls {
        let name = format!("Proc{i}");
        let mut imp = Implementation::new(format!("{name}_dup"), name.clone(), vec![], vec![]);
        for b in 0..blocks {
            let cmds = vec![
                Cmd::assign(vec!["g0".into()], vec![Expr::var("g0").add(Expr::int(1))]),
                Cmd::Yield(fresh()),
                Cmd::assert(Expr::var("g0").ge(Expr::int(0))),
                Cmd::ParallelCall(ParCallCmd::new(
                    fresh(),
                    vec![
                        CallCmd::new(fresh(), "Left", vec![], vec![]),
                        CallCmd::new(fresh(), "Right", vec![], vec![]),
                    ],
                )),
            ];
            let block = if b + 1 == blocks {
                Block::returning(format!("B{b}"), cmds)
            } else {
                let mut targets = vec![format!("B{}", b + 1)];
                if b > 0 {
                    targets.push(format!("B{}", b - 1));
                }
                Block::goto(format!("B{b}"), cmds, targets)
            };
            imp.blocks.push(block);
        }
        let labels: Vec<String> = imp.blocks.iter().map(|b| b.label.clone()).collect();
        duplicates.add_identity_copy(
            &imp.name,
            ImplOrigin {
                implementation: name.clone(),
                procedure: name.clone(),
            },
            labels.iter().map(String::as_str),
        );
        program.add_procedure(Procedure::new(name.clone(), vec![], vec![]));
        program.add_implementation(imp);
        civl.add_yielding_proc(name.clone(), YieldingProc::mover(MoverType::Non, 2));
        yielding_procs.insert(name);
    }

    Input {
        program,
        civl,
        duplicates,
        yielding_procs,
    }
}

fn bench_transform(c: &mut Criterion, name: &str, impls: usize, blocks: usize) {
    let input = build_input(impls, blocks);
    let linear = LinearTypeInfo::new();
    let refinement_blocks = RefinementBlocks::new();
    let options = InstrumentationOptions::default();
    c.bench_function(name, |b| {
        b.iter_batched(
            || input.program.clone(),
            |mut program| {
                transform_layer(
                    black_box(&mut program),
                    &input.civl,
                    &linear,
                    1,
                    &input.duplicates,
                    &input.yielding_procs,
                    &refinement_blocks,
                    &options,
                )
                .unwrap()
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_transform_small(c: &mut Criterion) {
    bench_transform(c, "instrument_layer_4x8", 4, 8);
}

fn bench_transform_large(c: &mut Criterion) {
    bench_transform(c, "instrument_layer_32x64", 32, 64);
}

criterion_group!(benches, bench_transform_small, bench_transform_large);
criterion_main!(benches);
