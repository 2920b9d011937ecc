//! Noninterference checker procedures and the dispatcher that runs them.
//!
//! A checker restates the predicates a thread relies on at its yields. It
//! takes the globals as they were before some other thread's step (the
//! snapshot formals) and the permissions the yielding thread held, assumes
//! the predicates held over the snapshot, and asserts they still hold over
//! the current globals. Every path through a yield block ends in
//! `assume false`, so the checker contributes nothing but its assertions.

use strata_ir::program::INLINE_ATTRIBUTE;
use strata_ir::{
    Block, CallCmd, Clause, Cmd, CmdId, Declaration, Expr, Implementation, Procedure,
    Substitution, Variable,
};

use crate::civl::{Layer, YieldInvariant};
use crate::linear::LinearPermissionInstrumentation;

pub const NONINTERFERENCE_MESSAGE: &str = "Non-interference check failed";

/// Whose yields a checker restates.
#[derive(Debug, Clone, Copy)]
pub enum CheckerSubject<'a> {
    /// The invariant's requires clauses form one yield.
    Invariant(&'a YieldInvariant),
    /// Requires and ensures clauses each form one yield.
    Procedure(&'a Procedure),
    /// Every yield together with the predicates right after it.
    Implementation(&'a Implementation),
}

impl CheckerSubject<'_> {
    pub fn checker_name(&self) -> String {
        match self {
            CheckerSubject::Invariant(inv) => format!("NoninterferenceChecker_invariant_{}", inv.name),
            CheckerSubject::Procedure(p) => format!("NoninterferenceChecker_proc_{}", p.name),
            CheckerSubject::Implementation(i) => format!("NoninterferenceChecker_impl_{}", i.name),
        }
    }

    fn variables(&self) -> Vec<Variable> {
        match self {
            CheckerSubject::Invariant(inv) => inv.inputs.clone(),
            CheckerSubject::Procedure(p) => p.inputs.iter().chain(&p.outputs).cloned().collect(),
            CheckerSubject::Implementation(i) => i.all_variables().cloned().collect(),
        }
    }

    fn yields(&self) -> Vec<Vec<Cmd>> {
        match self {
            CheckerSubject::Invariant(inv) => vec![clause_predicates(&inv.requires)],
            CheckerSubject::Procedure(p) => {
                vec![clause_predicates(&p.requires), clause_predicates(&p.ensures)]
            }
            CheckerSubject::Implementation(i) => i
                .blocks
                .iter()
                .flat_map(|b| {
                    b.cmds.iter().enumerate().filter_map(|(idx, cmd)| {
                        matches!(cmd, Cmd::Yield(_)).then(|| leading_predicates(&b.cmds[idx + 1..]))
                    })
                })
                .collect(),
        }
    }
}

fn clause_predicates(clauses: &[Clause]) -> Vec<Cmd> {
    clauses
        .iter()
        .map(|c| {
            if c.free {
                Cmd::assume(c.condition.clone())
            } else {
                Cmd::assert(c.condition.clone())
            }
        })
        .collect()
}

/// The run of assert/assume commands at the start of `cmds`.
pub(crate) fn leading_predicates(cmds: &[Cmd]) -> Vec<Cmd> {
    cmds.iter()
        .take_while(|c| c.is_predicate())
        .cloned()
        .collect()
}

/// Formal carrying the value a global had before the interfering step.
pub fn old_global_formal(global: &Variable) -> Variable {
    global.renamed(format!("__old_{}", global.name))
}

/// Inputs shared by every checker and the dispatcher: one permission formal
/// per linear domain followed by one snapshot formal per global.
pub fn checker_inputs(linear: &LinearPermissionInstrumentation<'_>, globals: &[Variable]) -> Vec<Variable> {
    linear
        .domains()
        .map(|d| d.in_formal())
        .chain(globals.iter().map(old_global_formal))
        .collect()
}

/// Builds the checker procedure and implementation for `subject`.
pub fn create_noninterference_checkers(
    linear: &LinearPermissionInstrumentation<'_>,
    globals: &[Variable],
    subject: CheckerSubject<'_>,
) -> Vec<Declaration> {
    let name = subject.checker_name();
    let inputs = checker_inputs(linear, globals);
    let locals = subject.variables();

    let old_globals: Substitution = globals
        .iter()
        .map(|g| (g.name.clone(), old_global_formal(g).ident()))
        .collect();
    let current = Substitution::new();

    let disjointness: Vec<Cmd> = linear
        .domains()
        .filter_map(|d| linear.disjointness_with(d, &d.in_formal(), &locals))
        .map(Cmd::assume)
        .collect();

    let exit = Block::returning("exit", vec![]);
    let mut targets = vec![exit.label.clone()];
    let mut yield_blocks = vec![exit];
    for predicates in subject.yields().into_iter().filter(|p| !p.is_empty()) {
        let mut cmds: Vec<Cmd> = predicates
            .iter()
            .filter_map(Cmd::predicate)
            .map(|e| Cmd::assume(e.substitute_replacing_old(&old_globals, &old_globals)))
            .collect();
        cmds.extend(disjointness.iter().cloned());
        for predicate in &predicates {
            if let Cmd::Assert { condition, .. } = predicate {
                cmds.push(Cmd::assert_with(
                    condition.substitute_replacing_old(&current, &old_globals),
                    NONINTERFERENCE_MESSAGE,
                ));
            }
        }
        let label = format!("L{}", yield_blocks.len() - 1);
        targets.push(label.clone());
        yield_blocks.push(Block::sink(label, cmds));
    }

    let mut blocks = vec![Block::goto("enter", vec![], targets)];
    blocks.extend(yield_blocks);

    let mut proc = Procedure::new(name.clone(), inputs.clone(), vec![]);
    proc.attributes.push(INLINE_ATTRIBUTE.to_string());
    let mut imp = Implementation::new(name.clone(), name, inputs, vec![]);
    imp.locals = locals;
    imp.blocks = blocks;
    imp.attributes.push(INLINE_ATTRIBUTE.to_string());
    vec![Declaration::Procedure(proc), Declaration::Implementation(imp)]
}

pub fn dispatcher_name(layer: Layer) -> String {
    format!("NoninterferenceDispatcher_{layer}")
}

/// The dispatcher procedure. Yields call it instead of every checker.
pub fn dispatcher_procedure(name: &str, inputs: Vec<Variable>) -> Procedure {
    let mut proc = Procedure::new(name, inputs, vec![]);
    proc.attributes.push(INLINE_ATTRIBUTE.to_string());
    proc
}

/// Nondeterministically calls one of `checkers`, or returns at once when
/// there are none.
pub fn dispatcher_implementation(proc: &Procedure, checkers: &[&Procedure]) -> Implementation {
    let args: Vec<Expr> = proc.inputs.iter().map(Variable::ident).collect();
    let mut blocks = Vec::with_capacity(checkers.len() + 1);
    let mut targets = Vec::with_capacity(checkers.len());
    for (i, checker) in checkers.iter().enumerate() {
        let label = format!("L_{i}");
        let call = CallCmd::new(CmdId::SYNTHESIZED, checker.name.clone(), args.clone(), vec![]);
        targets.push(label.clone());
        blocks.push(Block::returning(label, vec![Cmd::Call(call)]));
    }
    let enter = if targets.is_empty() {
        Block::returning("enter", vec![])
    } else {
        Block::goto("enter", vec![], targets)
    };
    blocks.insert(0, enter);

    let mut imp = Implementation::new(proc.name.clone(), proc.name.clone(), proc.inputs.clone(), vec![]);
    imp.blocks = blocks;
    imp.attributes.push(INLINE_ATTRIBUTE.to_string());
    imp
}
