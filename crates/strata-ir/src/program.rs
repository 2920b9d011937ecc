use indexmap::IndexMap;

use crate::expr::{Expr, Variable};

/// Attribute marking a call whose completion refines the caller's atomic action.
pub const REFINES_ATTRIBUTE: &str = "refines";
/// Attribute asking downstream verification-condition generation to inline a procedure.
pub const INLINE_ATTRIBUTE: &str = "inline";

/// Stable identity of a call, yield or parallel-call command.
///
/// Identities survive per-layer duplication, so facts computed on the
/// original program (available linear permissions, precomputed refinement
/// blocks) can be looked up from a duplicated command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CmdId(pub u32);

impl CmdId {
    /// Identity shared by every command the instrumentation synthesizes.
    pub const SYNTHESIZED: CmdId = CmdId(u32::MAX);
}

/// A procedure call `call outs := callee(ins)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallCmd {
    pub id: CmdId,
    pub callee: String,
    pub ins: Vec<Expr>,
    pub outs: Vec<String>,
    pub attributes: Vec<String>,
}

impl CallCmd {
    pub fn new(id: CmdId, callee: impl Into<String>, ins: Vec<Expr>, outs: Vec<String>) -> Self {
        Self {
            id,
            callee: callee.into(),
            ins,
            outs,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attributes.push(attribute.into());
        self
    }

    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes.iter().any(|a| a == attribute)
    }

    /// Whether this call is marked as refining the caller's atomic action.
    pub fn is_refining(&self) -> bool {
        self.has_attribute(REFINES_ATTRIBUTE)
    }
}

/// Simultaneous invocation of several procedures by forked threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParCallCmd {
    pub id: CmdId,
    pub calls: Vec<CallCmd>,
    pub attributes: Vec<String>,
}

impl ParCallCmd {
    pub fn new(id: CmdId, calls: Vec<CallCmd>) -> Self {
        Self {
            id,
            calls,
            attributes: Vec::new(),
        }
    }

    /// A parallel call is marked if any component is marked.
    pub fn is_refining(&self) -> bool {
        self.calls.iter().any(CallCmd::is_refining)
    }
}

/// Commands of a basic block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cmd {
    /// Simultaneous assignment `lhs_1, .., lhs_n := rhs_1, .., rhs_n`.
    Assign { lhs: Vec<String>, rhs: Vec<Expr> },
    Havoc(Vec<String>),
    Assume(Expr),
    Assert {
        condition: Expr,
        message: Option<String>,
    },
    Call(CallCmd),
    /// Preemption point.
    Yield(CmdId),
    ParallelCall(ParCallCmd),
}

impl Cmd {
    pub fn assign(lhs: Vec<String>, rhs: Vec<Expr>) -> Self {
        debug_assert_eq!(lhs.len(), rhs.len());
        Cmd::Assign { lhs, rhs }
    }

    pub fn havoc(vars: Vec<String>) -> Self {
        Cmd::Havoc(vars)
    }

    pub fn assume(condition: Expr) -> Self {
        Cmd::Assume(condition)
    }

    pub fn assert(condition: Expr) -> Self {
        Cmd::Assert {
            condition,
            message: None,
        }
    }

    pub fn assert_with(condition: Expr, message: impl Into<String>) -> Self {
        Cmd::Assert {
            condition,
            message: Some(message.into()),
        }
    }

    /// `assume false`: proves the preceding assertions, then discards the path.
    pub fn assume_false() -> Self {
        Cmd::Assume(Expr::FALSE)
    }

    pub fn is_assume_false(&self) -> bool {
        matches!(self, Cmd::Assume(e) if e.is_false())
    }

    /// Assert and assume are predicate commands.
    pub fn is_predicate(&self) -> bool {
        matches!(self, Cmd::Assume(_) | Cmd::Assert { .. })
    }

    pub fn predicate(&self) -> Option<&Expr> {
        match self {
            Cmd::Assume(e) => Some(e),
            Cmd::Assert { condition, .. } => Some(condition),
            _ => None,
        }
    }

    /// Yield and parallel call are the commands at which other threads may interleave.
    pub fn is_preemption_point(&self) -> bool {
        matches!(self, Cmd::Yield(_) | Cmd::ParallelCall(_))
    }
}

/// Block terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    Return,
    /// Nondeterministic branch to the named successors.
    Goto(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub label: String,
    pub cmds: Vec<Cmd>,
    pub transfer: Transfer,
}

impl Block {
    pub fn new(label: impl Into<String>, cmds: Vec<Cmd>, transfer: Transfer) -> Self {
        Self {
            label: label.into(),
            cmds,
            transfer,
        }
    }

    pub fn goto(label: impl Into<String>, cmds: Vec<Cmd>, targets: Vec<String>) -> Self {
        Self::new(label, cmds, Transfer::Goto(targets))
    }

    pub fn returning(label: impl Into<String>, cmds: Vec<Cmd>) -> Self {
        Self::new(label, cmds, Transfer::Return)
    }

    /// A verification-only sink: runs `cmds`, then `assume false`.
    pub fn sink(label: impl Into<String>, mut cmds: Vec<Cmd>) -> Self {
        cmds.push(Cmd::assume_false());
        Self::new(label, cmds, Transfer::Return)
    }

    pub fn is_sink(&self) -> bool {
        self.cmds.last().is_some_and(Cmd::is_assume_false)
    }

    pub fn successors(&self) -> &[String] {
        match &self.transfer {
            Transfer::Return => &[],
            Transfer::Goto(targets) => targets,
        }
    }

    /// Adds `target` as a successor unless it already is one. A returning
    /// block becomes a branch to `target`.
    pub fn add_successor(&mut self, target: &str) {
        match &mut self.transfer {
            Transfer::Goto(targets) => {
                if !targets.iter().any(|t| t == target) {
                    targets.push(target.to_string());
                }
            }
            Transfer::Return => self.transfer = Transfer::Goto(vec![target.to_string()]),
        }
    }

    pub fn head(&self) -> Option<&Cmd> {
        self.cmds.first()
    }
}

/// Requires or ensures clause. Free clauses are assumed but never checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub free: bool,
    pub condition: Expr,
}

impl Clause {
    pub fn checked(condition: Expr) -> Self {
        Self {
            free: false,
            condition,
        }
    }

    pub fn free(condition: Expr) -> Self {
        Self {
            free: true,
            condition,
        }
    }

    pub fn map(&self, f: impl FnOnce(&Expr) -> Expr) -> Self {
        Self {
            free: self.free,
            condition: f(&self.condition),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    pub name: String,
    pub type_params: Vec<String>,
    pub inputs: Vec<Variable>,
    pub outputs: Vec<Variable>,
    pub requires: Vec<Clause>,
    pub modifies: Vec<String>,
    pub ensures: Vec<Clause>,
    pub attributes: Vec<String>,
}

impl Procedure {
    pub fn new(name: impl Into<String>, inputs: Vec<Variable>, outputs: Vec<Variable>) -> Self {
        Self {
            name: name.into(),
            type_params: Vec::new(),
            inputs,
            outputs,
            requires: Vec::new(),
            modifies: Vec::new(),
            ensures: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes.iter().any(|a| a == attribute)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Implementation {
    pub name: String,
    /// Name of the procedure this implementation implements.
    pub proc_name: String,
    pub type_params: Vec<String>,
    pub inputs: Vec<Variable>,
    pub outputs: Vec<Variable>,
    pub locals: Vec<Variable>,
    /// Blocks in order; the first one is the entry.
    pub blocks: Vec<Block>,
    pub attributes: Vec<String>,
}

impl Implementation {
    pub fn new(
        name: impl Into<String>,
        proc_name: impl Into<String>,
        inputs: Vec<Variable>,
        outputs: Vec<Variable>,
    ) -> Self {
        Self {
            name: name.into(),
            proc_name: proc_name.into(),
            type_params: Vec::new(),
            inputs,
            outputs,
            locals: Vec::new(),
            blocks: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn entry_label(&self) -> Option<&str> {
        self.blocks.first().map(|b| b.label.as_str())
    }

    pub fn block_index(&self, label: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.label == label)
    }

    pub fn block(&self, label: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.label == label)
    }

    pub fn block_mut(&mut self, label: &str) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.label == label)
    }

    /// Adds the edge `from -> to`. Returns false if `from` names no block.
    pub fn add_edge(&mut self, from: &str, to: &str) -> bool {
        match self.block_mut(from) {
            Some(block) => {
                block.add_successor(to);
                true
            }
            None => false,
        }
    }

    /// Formals followed by locals.
    pub fn all_variables(&self) -> impl Iterator<Item = &Variable> {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .chain(self.locals.iter())
    }

    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes.iter().any(|a| a == attribute)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    Procedure(Procedure),
    Implementation(Implementation),
}

impl Declaration {
    pub fn name(&self) -> &str {
        match self {
            Declaration::Procedure(p) => &p.name,
            Declaration::Implementation(i) => &i.name,
        }
    }

    pub fn as_procedure(&self) -> Option<&Procedure> {
        match self {
            Declaration::Procedure(p) => Some(p),
            Declaration::Implementation(_) => None,
        }
    }

    pub fn as_implementation(&self) -> Option<&Implementation> {
        match self {
            Declaration::Procedure(_) => None,
            Declaration::Implementation(i) => Some(i),
        }
    }
}

/// A whole program: shared globals plus procedures and their implementations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub globals: Vec<Variable>,
    pub procedures: IndexMap<String, Procedure>,
    pub implementations: IndexMap<String, Implementation>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_global(&mut self, var: Variable) {
        self.globals.push(var);
    }

    pub fn add_procedure(&mut self, proc: Procedure) {
        self.procedures.insert(proc.name.clone(), proc);
    }

    pub fn add_implementation(&mut self, implementation: Implementation) {
        self.implementations
            .insert(implementation.name.clone(), implementation);
    }

    pub fn add_declarations(&mut self, decls: impl IntoIterator<Item = Declaration>) {
        for decl in decls {
            match decl {
                Declaration::Procedure(p) => self.add_procedure(p),
                Declaration::Implementation(i) => self.add_implementation(i),
            }
        }
    }

    pub fn global_names(&self) -> Vec<String> {
        self.globals.iter().map(|g| g.name.clone()).collect()
    }

    pub fn procedure(&self, name: &str) -> Option<&Procedure> {
        self.procedures.get(name)
    }

    pub fn implementation(&self, name: &str) -> Option<&Implementation> {
        self.implementations.get(name)
    }
}
