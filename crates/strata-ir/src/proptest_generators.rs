//! Proptest strategies for generating well-formed `Implementation` instances.

use proptest::prelude::*;

use crate::expr::{Expr, Type, Variable};
use crate::program::{Block, CallCmd, Cmd, CmdId, Implementation, ParCallCmd};

/// Procedures invoked by generated calls and parallel calls. Generated
/// callees take no arguments and return nothing.
pub const CALLEES: [&str; 2] = ["Left", "Right"];

#[derive(Debug, Clone, Copy)]
enum CmdKind {
    Yield,
    Assert,
    Assume,
    Assign,
    Call,
    ParallelCall(usize),
}

fn arb_cmd_kind() -> impl Strategy<Value = CmdKind> {
    prop_oneof![
        Just(CmdKind::Yield),
        Just(CmdKind::Assert),
        Just(CmdKind::Assume),
        Just(CmdKind::Assign),
        Just(CmdKind::Call),
        (1..=CALLEES.len()).prop_map(CmdKind::ParallelCall),
    ]
}

fn label(i: usize) -> String {
    format!("b{i}")
}

fn build_cmd(kind: CmdKind, next_id: &mut u32) -> Cmd {
    let mut fresh = || {
        let id = CmdId(*next_id);
        *next_id += 1;
        id
    };
    let x = Expr::var("x");
    match kind {
        CmdKind::Yield => Cmd::Yield(fresh()),
        CmdKind::Assert => Cmd::assert(x.ge(Expr::int(0))),
        CmdKind::Assume => Cmd::assume(x.lt(Expr::int(100))),
        CmdKind::Assign => Cmd::assign(vec!["x".into()], vec![x.add(Expr::int(1))]),
        CmdKind::Call => Cmd::Call(CallCmd::new(fresh(), CALLEES[0], vec![], vec![])),
        CmdKind::ParallelCall(n) => {
            let calls = CALLEES[..n]
                .iter()
                .map(|callee| CallCmd::new(fresh(), *callee, vec![], vec![]))
                .collect();
            Cmd::ParallelCall(ParCallCmd::new(fresh(), calls))
        }
    }
}

/// Strategy for a reducible implementation of procedure `Proc`.
///
/// Generated implementations have:
/// - 1–6 blocks `b0..bN` chained by fall-through edges, the last one returning
/// - optional back edges from a block to itself or an earlier block
/// - optional early exits to the last block
/// - up to 4 commands per block, mixing yields, parallel calls, calls,
///   predicates and assignments over the local `x`
/// - distinct command identities
pub fn arb_implementation() -> impl Strategy<Value = Implementation> {
    (1..=6usize)
        .prop_flat_map(|nblocks| {
            let cmds = proptest::collection::vec(
                proptest::collection::vec(arb_cmd_kind(), 0..=4),
                nblocks..=nblocks,
            );
            let back_edges =
                proptest::collection::vec(proptest::option::of(0..nblocks), nblocks..=nblocks);
            let early_exits = proptest::collection::vec(any::<bool>(), nblocks..=nblocks);
            (Just(nblocks), cmds, back_edges, early_exits)
        })
        .prop_map(|(nblocks, cmds, back_edges, early_exits)| {
            let mut imp = Implementation::new("Impl", "Proc", vec![], vec![]);
            imp.locals.push(Variable::new("x", Type::Int));

            let last = nblocks - 1;
            let mut next_id = 0;
            for (i, kinds) in cmds.into_iter().enumerate() {
                let body = kinds
                    .into_iter()
                    .map(|kind| build_cmd(kind, &mut next_id))
                    .collect();
                if i == last {
                    imp.blocks.push(Block::returning(label(i), body));
                    continue;
                }

                // Back edges only target the current block or earlier ones,
                // and early exits only target the returning block, so every
                // cycle is entered through its header.
                let mut targets = vec![label(i + 1)];
                if let Some(k) = back_edges[i] {
                    targets.push(label(k.min(i)));
                }
                if early_exits[i] && i + 1 != last {
                    targets.push(label(last));
                }
                imp.blocks.push(Block::goto(label(i), body, targets));
            }
            imp
        })
}
