use strata_ir::{Cmd, Expr, Implementation, Substitution, Type, Variable};

use crate::civl::AtomicAction;
use crate::snapshot::GlobalSnapshotInstrumentation;

pub const INITIAL_STATE_MESSAGE: &str = "Transition invariant in initial state violated";
pub const FINAL_STATE_MESSAGE: &str = "Transition invariant in final state violated";
pub const RETURN_MESSAGE: &str = "Failed to execute atomic action before procedure return";
pub const MARKED_TWICE_MESSAGE: &str =
    "A yield-to-yield fragment modifies abstract state after another fragment already did";
pub const LOOP_GLOBALS_MESSAGE: &str = "Global variables modified in a yielding loop";
pub const LOOP_OUTPUTS_MESSAGE: &str = "Output variables modified in a yielding loop";

/// Whether an implementation must be shown to refine an atomic action at
/// the current layer.
#[derive(Debug, Clone)]
pub enum RefinementInstrumentation {
    None,
    Action(ActionRefinement),
}

/// Refinement of an atomic action by the yield-to-yield fragments of an
/// implementation.
///
/// `pc` records that some fragment already performed the action's state
/// change; afterwards every fragment must leave globals and outputs
/// unchanged. `ok` records that the action was executed at all, which must
/// hold on return.
#[derive(Debug, Clone)]
pub struct ActionRefinement {
    pc: Variable,
    ok: Variable,
    outputs: Vec<Variable>,
    old_outputs: Vec<Variable>,
    /// Gate of the action over the implementation's inputs.
    alpha: Expr,
    /// Transition relation from the snapshot to the current state.
    beta: Expr,
    unchanged_globals: Option<Expr>,
    unchanged_outputs: Option<Expr>,
}

impl ActionRefinement {
    /// Instantiates `action` for `implementation`, whose inputs and outputs
    /// correspond positionally to the action's.
    pub fn new(
        implementation: &Implementation,
        action: &AtomicAction,
        snapshot: &GlobalSnapshotInstrumentation,
    ) -> Self {
        let outputs = implementation.outputs.clone();
        let old_outputs: Vec<Variable> = outputs
            .iter()
            .map(|o| o.renamed(format!("__old_out_{}", o.name)))
            .collect();

        let mut always =
            Substitution::from_formals(&action.inputs, implementation.inputs.iter().map(Variable::ident));
        for (formal, actual) in action.outputs.iter().zip(&implementation.outputs) {
            always.insert(formal.name.clone(), actual.ident());
        }
        let old_globals = snapshot.old_global_map();

        let alpha = Expr::conjunction(action.gate.iter().cloned()).substitute(&always);
        let beta = action
            .transition_relation
            .substitute_replacing_old(&always, &old_globals);

        let unchanged_globals = (!old_globals.is_empty()).then(|| {
            Expr::conjunction(
                old_globals
                    .iter()
                    .map(|(g, snap)| Expr::var(g.clone()).eq(snap.clone())),
            )
        });
        let unchanged_outputs = (!outputs.is_empty()).then(|| {
            Expr::conjunction(
                outputs
                    .iter()
                    .zip(&old_outputs)
                    .map(|(o, old)| o.ident().eq(old.ident())),
            )
        });

        Self {
            pc: Variable::new("__pc", Type::Bool),
            ok: Variable::new("__ok", Type::Bool),
            outputs,
            old_outputs,
            alpha,
            beta,
            unchanged_globals,
            unchanged_outputs,
        }
    }

    fn unchanged(&self) -> Expr {
        Expr::conjunction(
            self.unchanged_globals
                .iter()
                .chain(&self.unchanged_outputs)
                .cloned(),
        )
    }

    fn update_old_outputs(&self) -> Vec<Cmd> {
        if self.outputs.is_empty() {
            return Vec::new();
        }
        vec![Cmd::assign(
            self.old_outputs.iter().map(|v| v.name.clone()).collect(),
            self.outputs.iter().map(Variable::ident).collect(),
        )]
    }

    fn refinement_var_names(&self) -> Vec<String> {
        vec![self.pc.name.clone(), self.ok.name.clone()]
    }
}

impl RefinementInstrumentation {
    pub fn new_locals(&self) -> Vec<Variable> {
        match self {
            RefinementInstrumentation::None => Vec::new(),
            RefinementInstrumentation::Action(r) => [r.pc.clone(), r.ok.clone()]
                .into_iter()
                .chain(r.old_outputs.iter().cloned())
                .collect(),
        }
    }

    /// `pc, ok := false, false` and the initial output copy.
    pub fn init_cmds(&self) -> Vec<Cmd> {
        let RefinementInstrumentation::Action(r) = self else {
            return Vec::new();
        };
        let mut cmds = vec![Cmd::assign(
            r.refinement_var_names(),
            vec![Expr::FALSE, Expr::FALSE],
        )];
        cmds.extend(r.update_old_outputs());
        cmds
    }

    /// `assume pc || gate`: until the action has happened its gate holds.
    pub fn assume_cmds(&self) -> Vec<Cmd> {
        let RefinementInstrumentation::Action(r) = self else {
            return Vec::new();
        };
        vec![Cmd::assume(r.pc.ident().or(r.alpha.clone()))]
    }

    /// A fragment either stutters or performs the action, and stutters once
    /// the action has happened.
    pub fn assert_cmds(&self) -> Vec<Cmd> {
        let RefinementInstrumentation::Action(r) = self else {
            return Vec::new();
        };
        let unchanged = r.unchanged();
        vec![
            Cmd::assert_with(
                r.pc.ident().or(unchanged.clone()).or(r.beta.clone()),
                INITIAL_STATE_MESSAGE,
            ),
            Cmd::assert_with(r.pc.ident().implies(unchanged), FINAL_STATE_MESSAGE),
        ]
    }

    pub fn unchanged_globals_assert_cmds(&self) -> Vec<Cmd> {
        match self {
            RefinementInstrumentation::Action(ActionRefinement {
                unchanged_globals: Some(e),
                ..
            }) => vec![Cmd::assert_with(e.clone(), LOOP_GLOBALS_MESSAGE)],
            _ => Vec::new(),
        }
    }

    pub fn unchanged_outputs_assert_cmds(&self) -> Vec<Cmd> {
        match self {
            RefinementInstrumentation::Action(ActionRefinement {
                unchanged_outputs: Some(e),
                ..
            }) => vec![Cmd::assert_with(e.clone(), LOOP_OUTPUTS_MESSAGE)],
            _ => Vec::new(),
        }
    }

    pub fn return_assert_cmds(&self) -> Vec<Cmd> {
        let RefinementInstrumentation::Action(r) = self else {
            return Vec::new();
        };
        vec![Cmd::assert_with(r.ok.ident(), RETURN_MESSAGE)]
    }

    /// Accounts for the fragment that just ended. A marked fragment is the
    /// one that performs the action; an unmarked one may or may not.
    pub fn updates_to_refinement_vars(&self, marked: bool) -> Vec<Cmd> {
        let RefinementInstrumentation::Action(r) = self else {
            return Vec::new();
        };
        if marked {
            return vec![
                Cmd::assert_with(r.pc.ident().not(), MARKED_TWICE_MESSAGE),
                Cmd::assign(r.refinement_var_names(), vec![Expr::TRUE, Expr::TRUE]),
            ];
        }
        let unchanged_globals = r.unchanged_globals.clone().unwrap_or(Expr::TRUE);
        vec![Cmd::assign(
            r.refinement_var_names(),
            vec![
                unchanged_globals.implies(r.pc.ident()),
                r.ok.ident().or(r.beta.clone()),
            ],
        )]
    }

    pub fn updates_to_old_output_vars(&self) -> Vec<Cmd> {
        match self {
            RefinementInstrumentation::None => Vec::new(),
            RefinementInstrumentation::Action(r) => r.update_old_outputs(),
        }
    }
}
