use std::collections::{HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, warn};

use strata_ir::{
    prune_unreachable_blocks, Block, CallCmd, Cmd, CmdId, ControlFlowGraph, Expr, Implementation,
    ParCallCmd, Procedure, Transfer, Variable,
};

use super::{
    parallel, referenced_refinement_blocks, YieldingProcInstrumentation, INIT_BLOCK, LOOP_REFINEMENT_CHECKER_BLOCK,
    NONINTERFERENCE_CHECKER_BLOCK, REFINEMENT_CHECKER_BLOCK, RETURN_CHECKER_BLOCK,
    UNIFIED_RETURN_BLOCK,
};
use crate::civl::BlockRef;
use crate::linear::PermissionSite;
use crate::preflight::PlannedImpl;
use crate::refinement::RefinementInstrumentation;

/// Preemption point at the head of a block after splitting.
enum Marker {
    Yield,
    /// Component calls of a parallel call with whether each one is marked.
    Parallel(Vec<(CmdId, bool)>),
}

/// Splits every block so that each yield and parallel call heads its own
/// block. The pieces are labeled `{label}_{n}`, numbered from the end of
/// the block, skipping existing labels and `reserved`.
pub(super) fn split_blocks<'r>(imp: &mut Implementation, reserved: impl IntoIterator<Item = &'r str>) {
    let mut taken: HashSet<String> = imp
        .blocks
        .iter()
        .map(|b| b.label.clone())
        .chain(reserved.into_iter().map(str::to_string))
        .collect();
    let mut pieces = Vec::new();
    for block in &mut imp.blocks {
        let mut transfer = std::mem::replace(&mut block.transfer, Transfer::Return);
        let mut next = 0;
        for i in (0..block.cmds.len()).rev() {
            if !block.cmds[i].is_preemption_point() {
                continue;
            }
            let label = fresh_label(&block.label, &mut next, &mut taken);
            let tail = block.cmds.split_off(i);
            pieces.push(Block::new(label.clone(), tail, transfer));
            transfer = Transfer::Goto(vec![label]);
        }
        block.transfer = transfer;
    }
    imp.blocks.extend(pieces);
}

fn fresh_label(base: &str, next: &mut usize, taken: &mut HashSet<String>) -> String {
    loop {
        let label = format!("{base}_{next}");
        *next += 1;
        if taken.insert(label.clone()) {
            return label;
        }
    }
}

fn block_markers(imp: &Implementation) -> HashMap<String, Marker> {
    imp.blocks
        .iter()
        .filter_map(|b| {
            let marker = match b.head()? {
                Cmd::Yield(_) => Marker::Yield,
                Cmd::ParallelCall(par) => Marker::Parallel(
                    par.calls.iter().map(|c| (c.id, c.is_refining())).collect(),
                ),
                _ => return None,
            };
            Some((b.label.clone(), marker))
        })
        .collect()
}

impl<'a> YieldingProcInstrumentation<'a> {
    /// Rewrites the control flow of `imp` so that every yield-to-yield
    /// fragment is checked for noninterference and refinement.
    pub(super) fn desugar_concurrency(
        &mut self,
        imp: &mut Implementation,
        plan: &PlannedImpl<'a>,
        procedures: &IndexMap<String, Procedure>,
        preconditions: Vec<Cmd>,
        refinement: &RefinementInstrumentation,
    ) {
        let scope: Vec<Variable> = imp.all_variables().cloned().collect();

        let spliced_labels: Vec<&str> = referenced_refinement_blocks(imp, self.refinement_blocks)
            .into_values()
            .map(|b| b.label.as_str())
            .collect();
        split_blocks(imp, spliced_labels);
        debug_assert!(imp
            .blocks
            .iter()
            .all(|b| b.cmds.iter().skip(1).all(|c| !c.is_preemption_point())));

        let (headers, in_loops) = self.compute_yielding_loops(imp);

        let cfg = ControlFlowGraph::build(imp);
        for header in &headers {
            let predecessors: Vec<String> = cfg
                .predecessors(header)
                .into_iter()
                .map(str::to_string)
                .collect();
            for pred in predecessors {
                imp.add_edge(&pred, NONINTERFERENCE_CHECKER_BLOCK);
                let checker = if in_loops.contains(&pred) {
                    LOOP_REFINEMENT_CHECKER_BLOCK
                } else {
                    REFINEMENT_CHECKER_BLOCK
                };
                imp.add_edge(&pred, checker);
            }

            let site = self.linear.header_site(&imp.name, header);
            let invariants = self.loop_invariant_cmds(&imp.name, header);
            let collector = self
                .noninterference
                .updates_to_permission_collector(&site, &scope);
            let Some(block) = imp.block_mut(header) else {
                continue;
            };
            let old = std::mem::take(&mut block.cmds);
            let split = old.iter().take_while(|c| c.is_predicate()).count();
            let mut rest = old.into_iter();
            let mut cmds: Vec<Cmd> = rest.by_ref().take(split).collect();
            cmds.extend(refinement.assume_cmds());
            cmds.extend(invariants);
            cmds.extend(self.loop_target_assignment());
            cmds.extend(self.snapshot.update_cmds());
            cmds.extend(refinement.updates_to_old_output_vars());
            cmds.extend(collector);
            cmds.extend(rest);
            block.cmds = cmds;
        }

        let markers = block_markers(imp);
        let mut spliced: IndexMap<CmdId, Block> = IndexMap::new();
        for block in &mut imp.blocks {
            if matches!(block.transfer, Transfer::Return) {
                block.transfer = Transfer::Goto(vec![
                    RETURN_CHECKER_BLOCK.to_string(),
                    UNIFIED_RETURN_BLOCK.to_string(),
                    NONINTERFERENCE_CHECKER_BLOCK.to_string(),
                ]);
                continue;
            }
            let mut preempted = false;
            for target in block.successors().to_vec() {
                match markers.get(&target) {
                    Some(Marker::Yield) => preempted = true,
                    Some(Marker::Parallel(components)) => {
                        for &(id, marked) in components {
                            let Some(precomputed) = self.refinement_blocks.get(&id) else {
                                continue;
                            };
                            if spliced.contains_key(&id) {
                                warn!(
                                    implementation = %imp.name,
                                    block = %precomputed.label,
                                    "Refinement block reached from several predecessors; spliced once"
                                );
                            } else {
                                let fixed = self.fix_up_refinement_block(precomputed, marked, refinement);
                                spliced.insert(id, fixed);
                            }
                            block.add_successor(&precomputed.label);
                        }
                        preempted = true;
                    }
                    None => {}
                }
            }
            if preempted {
                block.add_successor(NONINTERFERENCE_CHECKER_BLOCK);
                block.add_successor(if in_loops.contains(&block.label) {
                    LOOP_REFINEMENT_CHECKER_BLOCK
                } else {
                    REFINEMENT_CHECKER_BLOCK
                });
            }
        }

        let mut yields = 0;
        let mut parallel_calls = 0;
        for block in &mut imp.blocks {
            let in_loop = in_loops.contains(&block.label);
            let mut cmds = std::mem::take(&mut block.cmds).into_iter();
            block.cmds = match cmds.next() {
                Some(Cmd::Yield(id)) => {
                    yields += 1;
                    self.desugar_yield(id, cmds.collect(), in_loop, &scope, refinement)
                }
                Some(Cmd::ParallelCall(par)) => {
                    parallel_calls += 1;
                    self.desugar_parallel_call(par, cmds, in_loop, &scope, procedures, refinement)
                }
                Some(head) => std::iter::once(head).chain(cmds).collect(),
                None => Vec::new(),
            };
        }

        imp.blocks.push(Block::sink(
            NONINTERFERENCE_CHECKER_BLOCK,
            self.noninterference.call_to_dispatcher(),
        ));
        imp.blocks.push(Block::sink(REFINEMENT_CHECKER_BLOCK, refinement.assert_cmds()));
        let mut loop_checks = refinement.unchanged_globals_assert_cmds();
        loop_checks.extend(refinement.unchanged_outputs_assert_cmds());
        imp.blocks.push(Block::sink(LOOP_REFINEMENT_CHECKER_BLOCK, loop_checks));
        let mut return_checks = refinement.assert_cmds();
        return_checks.extend(refinement.updates_to_refinement_vars(false));
        return_checks.extend(refinement.return_assert_cmds());
        imp.blocks.push(Block::sink(RETURN_CHECKER_BLOCK, return_checks));
        imp.blocks.push(Block::returning(UNIFIED_RETURN_BLOCK, vec![]));
        imp.blocks.extend(spliced.into_values());

        let entry = imp.entry_label().map(str::to_string).unwrap_or_default();
        let mut init = preconditions;
        init.extend(self.snapshot.init_cmds());
        init.extend(refinement.init_cmds());
        init.extend(self.noninterference.init_cmds(
            &PermissionSite::Entry(plan.origin.implementation.clone()),
            &imp.inputs,
        ));
        imp.blocks.insert(0, Block::goto(INIT_BLOCK, init, vec![entry]));

        debug!(
            implementation = %imp.name,
            yields,
            parallel_calls,
            yielding_loops = headers.len(),
            "Desugared concurrency"
        );
    }

    /// Yielding-loop headers of `imp` at this layer and the blocks of their
    /// natural loops. Unreachable blocks are pruned first.
    fn compute_yielding_loops(
        &self,
        imp: &mut Implementation,
    ) -> (Vec<String>, IndexSet<String>) {
        let mut headers: Vec<String> = imp
            .blocks
            .iter()
            .filter(|b| self.is_yielding_loop_header(&imp.name, &b.label))
            .map(|b| b.label.clone())
            .collect();

        let removed = prune_unreachable_blocks(imp);
        if !removed.is_empty() {
            debug!(implementation = %imp.name, ?removed, "Pruned unreachable blocks");
        }
        let cfg = ControlFlowGraph::build(imp);
        headers.retain(|h| cfg.contains(h));
        let in_loops = cfg.blocks_in_loops_of(headers.iter().map(String::as_str));
        (headers, in_loops)
    }

    fn original_header(&self, implementation: &str, label: &str) -> Option<&'a BlockRef> {
        self.duplicates
            .original_block(&BlockRef::new(implementation, label))
    }

    fn is_yielding_loop_header(&self, implementation: &str, label: &str) -> bool {
        self.original_header(implementation, label)
            .and_then(|original| self.civl.yielding_loop_layers(original))
            .is_some_and(|layers| layers.contains(&self.layer))
    }

    /// Active yield invariants of a loop header, inlined: free clauses are
    /// assumed, the others asserted.
    fn loop_invariant_cmds(&self, implementation: &str, header: &str) -> Vec<Cmd> {
        let Some(yielding_loop) = self
            .original_header(implementation, header)
            .and_then(|original| self.civl.yielding_loops.get(original))
        else {
            return Vec::new();
        };
        let mut cmds = Vec::new();
        for call in &yielding_loop.yield_invariants {
            let Some(invariant) = self.active_invariant(call) else {
                continue;
            };
            let subst = Self::invariant_substitution(invariant, call, Expr::clone);
            cmds.extend(invariant.requires.iter().map(|req| {
                let condition = req.condition.substitute(&subst);
                if req.free {
                    Cmd::assume(condition)
                } else {
                    Cmd::assert(condition)
                }
            }));
        }
        cmds
    }

    /// `g := g` for every global, so that loop analysis treats all globals
    /// as modified by the loop.
    fn loop_target_assignment(&self) -> Vec<Cmd> {
        if self.globals().is_empty() {
            return Vec::new();
        }
        let globals = self.civl.global_names();
        let idents = globals.iter().map(|g| Expr::var(g.clone())).collect();
        vec![Cmd::assign(globals, idents)]
    }

    /// Prepares a precomputed refinement block: arbitrary globals in which
    /// the refinement assumptions hold, fresh snapshots, then the block's
    /// own commands and an edge to the matching checker.
    fn fix_up_refinement_block(
        &self,
        precomputed: &Block,
        marked: bool,
        refinement: &RefinementInstrumentation,
    ) -> Block {
        let mut block = precomputed.clone();
        let mut cmds = self.havoc_globals();
        cmds.extend(refinement.assume_cmds());
        cmds.extend(self.snapshot.update_cmds());
        cmds.extend(refinement.updates_to_old_output_vars());
        cmds.append(&mut block.cmds);
        block.cmds = cmds;
        block.add_successor(if marked {
            RETURN_CHECKER_BLOCK
        } else {
            LOOP_REFINEMENT_CHECKER_BLOCK
        });
        block
    }

    /// Replaces the yield `id`, followed by `rest`, by the havoc of the globals and the
    /// assumptions that hold after other threads ran.
    fn desugar_yield(
        &self,
        id: CmdId,
        rest: Vec<Cmd>,
        in_loop: bool,
        scope: &[Variable],
        refinement: &RefinementInstrumentation,
    ) -> Vec<Cmd> {
        let predicates = crate::checker::leading_predicates(&rest);

        let mut out = Vec::new();
        if !in_loop {
            out.extend(refinement.updates_to_refinement_vars(false));
        }
        out.extend(predicates.iter().cloned());
        out.extend(self.havoc_globals());
        out.extend(refinement.assume_cmds());
        let site = PermissionSite::Command(id);
        out.extend(self.linear.disjointness_assume_cmds(&site, scope, true));
        out.extend(self.snapshot.update_cmds());
        out.extend(refinement.updates_to_old_output_vars());
        out.extend(
            self.noninterference
                .updates_to_permission_collector(&site, scope),
        );
        out.extend(
            predicates
                .iter()
                .filter_map(Cmd::predicate)
                .map(|e| Cmd::assume(e.clone())),
        );
        out.extend(rest.into_iter().skip(predicates.len()));
        out
    }

    /// Replaces `par` by one call to the aggregator of its callees.
    fn desugar_parallel_call(
        &mut self,
        par: ParCallCmd,
        rest: impl Iterator<Item = Cmd>,
        in_loop: bool,
        scope: &[Variable],
        procedures: &IndexMap<String, Procedure>,
        refinement: &RefinementInstrumentation,
    ) -> Vec<Cmd> {
        let mut out = Vec::new();
        if !in_loop {
            out.extend(refinement.updates_to_refinement_vars(par.is_refining()));
        }
        out.push(Cmd::Call(self.aggregator_call(&par, procedures)));
        out.extend(refinement.assume_cmds());
        out.extend(self.snapshot.update_cmds());
        out.extend(refinement.updates_to_old_output_vars());
        out.extend(
            self.noninterference
                .updates_to_permission_collector(&PermissionSite::Command(par.id), scope),
        );
        out.extend(rest);
        out
    }

    fn aggregator_call(
        &mut self,
        par: &ParCallCmd,
        procedures: &IndexMap<String, Procedure>,
    ) -> CallCmd {
        let name = parallel::aggregator_name(par);
        if !self.aggregators.contains_key(&name) {
            let aggregator = parallel::build_aggregator(&name, par, procedures, self.globals());
            debug!(aggregator = %name, "Created parallel-call aggregator");
            self.aggregators.insert(name.clone(), aggregator);
        }
        let ins = par.calls.iter().flat_map(|c| c.ins.iter().cloned()).collect();
        let outs = par.calls.iter().flat_map(|c| c.outs.iter().cloned()).collect();
        let mut call = CallCmd::new(par.id, name, ins, outs);
        call.attributes = par.attributes.clone();
        call
    }
}
