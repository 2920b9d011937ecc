//! Validation of a layer's input before anything is rewritten.
//!
//! Instrumentation is all-or-nothing per layer: every lookup the rewrite
//! performs is checked here first, so a malformed input is reported without
//! leaving a half-instrumented program behind.

use std::collections::HashSet;

use strata_ir::{CallCmd, Cmd, ControlFlowGraph, Implementation, Program};

use crate::civl::{
    AtomicAction, BlockRef, CivlTypeInfo, DuplicateMap, ImplOrigin, Layer, YieldingProc,
};
use crate::error::InstrumentationError;
use crate::options::InstrumentationOptions;
use crate::yielding::{referenced_refinement_blocks, RefinementBlocks, RESERVED_LABELS};

/// A duplicated implementation that passed validation, with the facts the
/// rewrite needs about it.
#[derive(Debug, Clone)]
pub struct PlannedImpl<'a> {
    pub name: String,
    pub origin: &'a ImplOrigin,
    pub yielding: &'a YieldingProc,
    /// Action the implementation refines at this layer, if it disappears
    /// here as an action procedure.
    pub refined_action: Option<&'a AtomicAction>,
}

/// Checks every duplicated implementation of `layer` and returns the plan
/// in duplicate-map order.
pub fn validate_layer<'a>(
    program: &Program,
    civl: &'a CivlTypeInfo,
    layer: Layer,
    duplicates: &'a DuplicateMap,
    refinement_blocks: &RefinementBlocks,
    options: &InstrumentationOptions,
) -> Result<Vec<PlannedImpl<'a>>, InstrumentationError> {
    let mut plans = Vec::new();
    for (name, origin) in duplicates.implementations() {
        let imp = program
            .implementation(name)
            .ok_or_else(|| InstrumentationError::UnknownImplementation(name.to_string()))?;
        let yielding = civl
            .yielding_proc(&origin.procedure)
            .ok_or_else(|| InstrumentationError::UnknownYieldingProc(origin.procedure.clone()))?;
        if layer > yielding.upper_layer {
            return Err(InstrumentationError::ClassificationMismatch {
                procedure: origin.procedure.clone(),
                upper_layer: yielding.upper_layer,
                layer,
            });
        }

        let proc = program
            .procedure(&imp.proc_name)
            .ok_or_else(|| InstrumentationError::UnknownProcedure(imp.proc_name.clone()))?;
        check_arity("implementation inputs", &imp.name, proc.inputs.len(), imp.inputs.len())?;
        check_arity("implementation outputs", &imp.name, proc.outputs.len(), imp.outputs.len())?;

        for call in yielding.yield_requires.iter().chain(&yielding.yield_ensures) {
            check_invariant_call(civl, call)?;
        }

        check_blocks(imp)?;

        let mut refined_action = None;
        if yielding.upper_layer == layer {
            if let Some(action_name) = yielding.refined_action() {
                let action = civl
                    .atomic_action(action_name)
                    .ok_or_else(|| InstrumentationError::UnknownAtomicAction(action_name.to_string()))?;
                check_arity("refined action inputs", action_name, action.inputs.len(), imp.inputs.len())?;
                check_arity("refined action outputs", action_name, action.outputs.len(), imp.outputs.len())?;
                refined_action = Some(action);
            }
        }

        if !yielding.disappears_at(layer) {
            check_desugarable(program, civl, layer, duplicates, refinement_blocks, imp)?;
        }

        plans.push(PlannedImpl {
            name: name.to_string(),
            origin,
            yielding,
            refined_action,
        });
    }

    if !options.trust_noninterference {
        for target in civl.pending_async_targets(layer) {
            civl.atomic_action(target)
                .ok_or_else(|| InstrumentationError::UnknownAtomicAction(target.to_string()))?;
            program
                .procedure(target)
                .ok_or_else(|| InstrumentationError::UnknownProcedure(target.to_string()))?;
        }
    }

    Ok(plans)
}

fn check_arity(
    what: &'static str,
    name: &str,
    expected: usize,
    found: usize,
) -> Result<(), InstrumentationError> {
    if expected == found {
        return Ok(());
    }
    Err(InstrumentationError::ArityMismatch {
        what,
        name: name.to_string(),
        expected,
        found,
    })
}

fn check_invariant_call(civl: &CivlTypeInfo, call: &CallCmd) -> Result<(), InstrumentationError> {
    let invariant = civl
        .yield_invariant(&call.callee)
        .ok_or_else(|| InstrumentationError::UnknownYieldInvariant(call.callee.clone()))?;
    check_arity("yield invariant call", &call.callee, invariant.inputs.len(), call.ins.len())
}

fn check_blocks(imp: &Implementation) -> Result<(), InstrumentationError> {
    if imp.blocks.is_empty() {
        return Err(InstrumentationError::MissingEntry(imp.name.clone()));
    }
    let labels: HashSet<&str> = imp.blocks.iter().map(|b| b.label.as_str()).collect();
    for block in &imp.blocks {
        if let Some(target) = block.successors().iter().find(|t| !labels.contains(t.as_str())) {
            return Err(InstrumentationError::DanglingTarget {
                implementation: imp.name.clone(),
                block: block.label.clone(),
                target: target.clone(),
            });
        }
    }
    Ok(())
}

fn check_desugarable(
    program: &Program,
    civl: &CivlTypeInfo,
    layer: Layer,
    duplicates: &DuplicateMap,
    refinement_blocks: &RefinementBlocks,
    imp: &Implementation,
) -> Result<(), InstrumentationError> {
    if let Some(block) = imp
        .blocks
        .iter()
        .find(|b| RESERVED_LABELS.contains(&b.label.as_str()))
    {
        return Err(InstrumentationError::ReservedLabel {
            implementation: imp.name.clone(),
            label: block.label.clone(),
        });
    }

    // Spliced block labels must stay unique in the desugared implementation.
    let mut spliced = HashSet::new();
    for block in referenced_refinement_blocks(imp, refinement_blocks).into_values() {
        let label = block.label.as_str();
        if RESERVED_LABELS.contains(&label) || imp.block(label).is_some() || !spliced.insert(label) {
            return Err(InstrumentationError::RefinementBlockLabelClash {
                implementation: imp.name.clone(),
                label: label.to_string(),
            });
        }
    }

    if !ControlFlowGraph::build(imp).is_reducible() {
        return Err(InstrumentationError::IrreducibleControlFlow(imp.name.clone()));
    }

    for block in &imp.blocks {
        let original = duplicates.original_block(&BlockRef::new(imp.name.as_str(), block.label.as_str()));
        if let Some(yielding_loop) = original.and_then(|o| civl.yielding_loops.get(o)) {
            if yielding_loop.layers.contains(&layer) {
                for call in &yielding_loop.yield_invariants {
                    check_invariant_call(civl, call)?;
                }
            }
        }

        for cmd in &block.cmds {
            let Cmd::ParallelCall(par) = cmd else {
                continue;
            };
            for call in &par.calls {
                let callee = program
                    .procedure(&call.callee)
                    .ok_or_else(|| InstrumentationError::UnknownProcedure(call.callee.clone()))?;
                if !callee.type_params.is_empty() {
                    return Err(InstrumentationError::TypeParametersOnParallelCall {
                        implementation: imp.name.clone(),
                        callee: call.callee.clone(),
                    });
                }
                check_arity("parallel call inputs", &call.callee, callee.inputs.len(), call.ins.len())?;
                check_arity("parallel call outputs", &call.callee, callee.outputs.len(), call.outs.len())?;
            }
        }
    }
    Ok(())
}
