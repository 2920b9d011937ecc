//! Per-layer instrumentation of yielding procedures.
//!
//! For one layer, every duplicated implementation of a yielding procedure is
//! rewritten into an ordinary sequential program whose verification
//! establishes noninterference of the invariants it assumes at yields and
//! refinement of its atomic action. The rewrite runs in this order:
//!
//! 1. noninterference checkers for active yield invariants, implementations
//!    and procedures
//! 2. entry preconditions of every implementation
//! 3. active yield requires/ensures inlined into procedure contracts
//! 4. per implementation: disjointness assumptions, then control-flow
//!    desugaring unless it is a mover at its disappearing layer
//! 5. pending-async checkers and the dispatcher

mod desugar;
mod parallel;
mod pending_async;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, info};

use strata_ir::{
    Block, CallCmd, Cmd, CmdId, Declaration, Expr, Implementation, Procedure, Program,
    Substitution, Variable,
};

use crate::checker::{self, CheckerSubject};
use crate::civl::{CivlTypeInfo, DuplicateMap, Layer, YieldInvariant};
use crate::error::InstrumentationError;
use crate::linear::{LinearPermissionInstrumentation, LinearTypeInfo, PermissionSite};
use crate::noninterference::NoninterferenceInstrumentation;
use crate::options::InstrumentationOptions;
use crate::preflight::{self, PlannedImpl};
use crate::refinement::{ActionRefinement, RefinementInstrumentation};
use crate::snapshot::GlobalSnapshotInstrumentation;
use crate::summary::LayerSummary;

pub use parallel::aggregator_name;

pub const INIT_BLOCK: &str = "__init";
pub const NONINTERFERENCE_CHECKER_BLOCK: &str = "NoninterferenceChecker";
pub const REFINEMENT_CHECKER_BLOCK: &str = "RefinementChecker";
pub const LOOP_REFINEMENT_CHECKER_BLOCK: &str = "RefinementCheckerForYieldingLoops";
pub const RETURN_CHECKER_BLOCK: &str = "ReturnChecker";
pub const UNIFIED_RETURN_BLOCK: &str = "UnifiedReturn";

/// Labels of the blocks the desugaring adds to every implementation.
pub const RESERVED_LABELS: [&str; 6] = [
    INIT_BLOCK,
    NONINTERFERENCE_CHECKER_BLOCK,
    REFINEMENT_CHECKER_BLOCK,
    LOOP_REFINEMENT_CHECKER_BLOCK,
    RETURN_CHECKER_BLOCK,
    UNIFIED_RETURN_BLOCK,
];

/// Precomputed refinement-checking blocks, keyed by the component call of
/// a parallel call they check.
pub type RefinementBlocks = IndexMap<CmdId, Block>;

/// Precomputed refinement blocks of the parallel-call components of `imp`,
/// once per component.
pub(crate) fn referenced_refinement_blocks<'b>(
    imp: &Implementation,
    refinement_blocks: &'b RefinementBlocks,
) -> IndexMap<CmdId, &'b Block> {
    imp.blocks
        .iter()
        .flat_map(|b| &b.cmds)
        .filter_map(|cmd| match cmd {
            Cmd::ParallelCall(par) => Some(&par.calls),
            _ => None,
        })
        .flatten()
        .filter_map(|call| refinement_blocks.get(&call.id).map(|block| (call.id, block)))
        .collect()
}

/// Declarations a layer adds to the program, plus a summary of the work.
#[derive(Debug, Clone)]
pub struct LayerOutput {
    /// Checkers, aggregators, pending-async checkers, then the dispatcher
    /// procedure and implementation.
    pub declarations: Vec<Declaration>,
    pub summary: LayerSummary,
}

/// Instruments every duplicated implementation of `layer` in place and
/// returns the declarations the instrumented program additionally needs.
///
/// Nothing is mutated when the input is rejected.
#[allow(clippy::too_many_arguments)]
pub fn transform_layer(
    program: &mut Program,
    civl: &CivlTypeInfo,
    linear: &LinearTypeInfo,
    layer: Layer,
    duplicates: &DuplicateMap,
    yielding_procs: &IndexSet<String>,
    refinement_blocks: &RefinementBlocks,
    options: &InstrumentationOptions,
) -> Result<LayerOutput, InstrumentationError> {
    let plans = preflight::validate_layer(program, civl, layer, duplicates, refinement_blocks, options)?;

    let mut instrumentation = YieldingProcInstrumentation::new(
        civl,
        linear,
        layer,
        duplicates,
        refinement_blocks,
        options,
    );
    instrumentation.add_noninterference_checkers(program, &plans);
    let preconditions = instrumentation.create_preconditions(program, &plans);
    instrumentation.inline_yield_requires_and_ensures(program, &plans);
    instrumentation.transform_impls(program, &plans, yielding_procs, preconditions);
    let output = instrumentation.finish();

    info!(
        layer,
        transformed = output.summary.transformed_implementations.len(),
        skipped = output.summary.skipped_implementations.len(),
        checkers = output.summary.noninterference_checkers.len(),
        aggregators = output.summary.aggregators.len(),
        "Layer instrumented"
    );
    Ok(output)
}

/// Layer-scoped state of the rewrite. Nothing here outlives the layer.
struct YieldingProcInstrumentation<'a> {
    civl: &'a CivlTypeInfo,
    layer: Layer,
    duplicates: &'a DuplicateMap,
    refinement_blocks: &'a RefinementBlocks,
    trust_noninterference: bool,
    linear: LinearPermissionInstrumentation<'a>,
    snapshot: GlobalSnapshotInstrumentation,
    noninterference: NoninterferenceInstrumentation<'a>,
    dispatcher: Procedure,
    checker_decls: Vec<Declaration>,
    aggregators: IndexMap<String, Procedure>,
    summary: LayerSummary,
}

impl<'a> YieldingProcInstrumentation<'a> {
    fn new(
        civl: &'a CivlTypeInfo,
        linear: &'a LinearTypeInfo,
        layer: Layer,
        duplicates: &'a DuplicateMap,
        refinement_blocks: &'a RefinementBlocks,
        options: &InstrumentationOptions,
    ) -> Self {
        let linear = LinearPermissionInstrumentation::new(linear, &civl.globals, duplicates);
        let snapshot = GlobalSnapshotInstrumentation::new(&civl.globals);
        let dispatcher = checker::dispatcher_procedure(
            &checker::dispatcher_name(layer),
            checker::checker_inputs(&linear, &civl.globals),
        );
        let noninterference = if options.trust_noninterference {
            NoninterferenceInstrumentation::Trusted
        } else {
            NoninterferenceInstrumentation::checked(linear, &snapshot, dispatcher.name.clone())
        };
        Self {
            civl,
            layer,
            duplicates,
            refinement_blocks,
            trust_noninterference: options.trust_noninterference,
            linear,
            snapshot,
            noninterference,
            summary: LayerSummary {
                layer,
                dispatcher: dispatcher.name.clone(),
                ..LayerSummary::default()
            },
            dispatcher,
            checker_decls: Vec::new(),
            aggregators: IndexMap::new(),
        }
    }

    fn globals(&self) -> &'a [Variable] {
        &self.civl.globals
    }

    /// Invariant called by `call`, if it is checked at this layer.
    fn active_invariant(&self, call: &CallCmd) -> Option<&'a YieldInvariant> {
        self.civl
            .yield_invariant(&call.callee)
            .filter(|inv| inv.is_active(self.layer))
    }

    /// Formals of the invariant called by `call` mapped to the call's actuals.
    fn invariant_substitution(
        invariant: &YieldInvariant,
        call: &CallCmd,
        actual: impl Fn(&Expr) -> Expr,
    ) -> Substitution {
        Substitution::from_formals(&invariant.inputs, call.ins.iter().map(actual))
    }

    fn havoc_globals(&self) -> Vec<Cmd> {
        if self.globals().is_empty() {
            return Vec::new();
        }
        vec![Cmd::havoc(self.civl.global_names())]
    }

    fn add_noninterference_checkers(&mut self, program: &Program, plans: &[PlannedImpl<'a>]) {
        if self.trust_noninterference {
            return;
        }
        let mut decls = Vec::new();
        for invariant in self.civl.active_yield_invariants(self.layer) {
            decls.extend(checker::create_noninterference_checkers(
                &self.linear,
                self.globals(),
                CheckerSubject::Invariant(invariant),
            ));
        }
        for plan in plans {
            let Some(imp) = program.implementation(&plan.name) else {
                continue;
            };
            decls.extend(checker::create_noninterference_checkers(
                &self.linear,
                self.globals(),
                CheckerSubject::Implementation(imp),
            ));
            if plan.yielding.disappears_at(self.layer) {
                continue;
            }
            if let Some(proc) = program.procedure(&imp.proc_name) {
                decls.extend(checker::create_noninterference_checkers(
                    &self.linear,
                    self.globals(),
                    CheckerSubject::Procedure(proc),
                ));
            }
        }
        self.checker_decls = decls;
    }

    /// Entry assumptions of each implementation: arbitrary globals that are
    /// disjoint from the inputs' permissions and satisfy the procedure's
    /// requires and active yield requires.
    fn create_preconditions(
        &self,
        program: &Program,
        plans: &[PlannedImpl<'a>],
    ) -> IndexMap<String, Vec<Cmd>> {
        let mut preconditions = IndexMap::new();
        for plan in plans {
            let Some(imp) = program.implementation(&plan.name) else {
                continue;
            };
            let Some(proc) = program.procedure(&imp.proc_name) else {
                continue;
            };

            let mut cmds = self.havoc_globals();
            let entry = PermissionSite::Entry(plan.origin.implementation.clone());
            cmds.extend(self.linear.disjointness_assume_cmds(&entry, &imp.inputs, true));

            let proc_to_impl =
                Substitution::from_formals(&proc.inputs, imp.inputs.iter().map(Variable::ident));
            cmds.extend(
                proc.requires
                    .iter()
                    .map(|req| Cmd::assume(req.condition.substitute(&proc_to_impl))),
            );

            for call in &plan.yielding.yield_requires {
                let Some(invariant) = self.active_invariant(call) else {
                    continue;
                };
                let to_old_actuals =
                    Self::invariant_substitution(invariant, call, |e| e.clone().old());
                cmds.extend(invariant.requires.iter().map(|req| {
                    Cmd::assume(
                        req.condition
                            .substitute(&to_old_actuals)
                            .substitute(&proc_to_impl),
                    )
                }));
            }
            preconditions.insert(plan.name.clone(), cmds);
        }
        preconditions
    }

    /// Adds active yield requires/ensures to the contracts of the
    /// implemented procedures.
    fn inline_yield_requires_and_ensures(&self, program: &mut Program, plans: &[PlannedImpl<'a>]) {
        for plan in plans {
            let Some(proc_name) = program
                .implementation(&plan.name)
                .map(|imp| imp.proc_name.clone())
            else {
                continue;
            };
            let Some(proc) = program.procedures.get_mut(&proc_name) else {
                continue;
            };
            for call in &plan.yielding.yield_requires {
                if let Some(invariant) = self.active_invariant(call) {
                    let subst = Self::invariant_substitution(invariant, call, Expr::clone);
                    proc.requires
                        .extend(invariant.requires.iter().map(|c| c.map(|e| e.substitute(&subst))));
                }
            }
            // Invariants only carry requires clauses; those are what holds on exit.
            for call in &plan.yielding.yield_ensures {
                if let Some(invariant) = self.active_invariant(call) {
                    let subst = Self::invariant_substitution(invariant, call, Expr::clone);
                    proc.ensures
                        .extend(invariant.requires.iter().map(|c| c.map(|e| e.substitute(&subst))));
                }
            }
        }
    }

    fn transform_impls(
        &mut self,
        program: &mut Program,
        plans: &[PlannedImpl<'a>],
        yielding_procs: &IndexSet<String>,
        mut preconditions: IndexMap<String, Vec<Cmd>>,
    ) {
        let Program {
            procedures,
            implementations,
            ..
        } = program;
        for plan in plans {
            let Some(imp) = implementations.get_mut(&plan.name) else {
                continue;
            };
            // A mover at its disappearing layer has no yields, so the
            // assumptions after calls and at loop headers are all it needs.
            self.linear.add_disjointness_assumptions(imp, yielding_procs);
            if plan.yielding.disappears_at(self.layer) {
                debug!(implementation = %imp.name, "Mover at its disappearing layer; not desugared");
                self.summary.skipped_implementations.push(imp.name.clone());
                continue;
            }

            let refinement = match plan.refined_action {
                Some(action) => RefinementInstrumentation::Action(ActionRefinement::new(
                    imp,
                    action,
                    &self.snapshot,
                )),
                None => RefinementInstrumentation::None,
            };
            let entry_cmds = preconditions.shift_remove(&plan.name).unwrap_or_default();
            self.desugar_concurrency(imp, plan, procedures, entry_cmds, &refinement);

            imp.locals.extend(self.snapshot.new_locals().iter().cloned());
            imp.locals.extend(refinement.new_locals());
            imp.locals.extend(self.noninterference.new_locals());
            self.summary.transformed_implementations.push(imp.name.clone());
        }
    }

    fn finish(mut self) -> LayerOutput {
        let pending = self.pending_async_checkers();

        let checkers: Vec<&Procedure> = self
            .checker_decls
            .iter()
            .filter_map(Declaration::as_procedure)
            .collect();
        let dispatcher_impl = checker::dispatcher_implementation(&self.dispatcher, &checkers);

        self.summary.noninterference_checkers = checkers.iter().map(|p| p.name.clone()).collect();
        self.summary.aggregators = self.aggregators.keys().cloned().collect();
        self.summary.pending_async_checkers = pending
            .iter()
            .filter_map(Declaration::as_procedure)
            .map(|p| p.name.clone())
            .collect();

        let mut declarations = self.checker_decls;
        declarations.extend(self.aggregators.into_values().map(Declaration::Procedure));
        declarations.extend(pending);
        declarations.push(Declaration::Procedure(self.dispatcher));
        declarations.push(Declaration::Implementation(dispatcher_impl));
        LayerOutput {
            declarations,
            summary: self.summary,
        }
    }
}
