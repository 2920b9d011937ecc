#![allow(dead_code)]

use indexmap::IndexSet;

use strata_instrument::yielding::{
    LOOP_REFINEMENT_CHECKER_BLOCK, NONINTERFERENCE_CHECKER_BLOCK, REFINEMENT_CHECKER_BLOCK,
    RETURN_CHECKER_BLOCK,
};
use strata_instrument::{
    transform_layer, CivlTypeInfo, DuplicateMap, ImplOrigin, InstrumentationError,
    InstrumentationOptions, Layer, LayerOutput, LinearTypeInfo, RefinementBlocks, YieldingProc,
};
use strata_ir::{
    Block, CallCmd, Cmd, CmdId, Declaration, Expr, Implementation, ParCallCmd, Procedure,
    Program, Type, Variable,
};

/// Labels of the sink blocks every desugared implementation receives.
pub const CHECKER_BLOCKS: [&str; 4] = [
    NONINTERFERENCE_CHECKER_BLOCK,
    REFINEMENT_CHECKER_BLOCK,
    LOOP_REFINEMENT_CHECKER_BLOCK,
    RETURN_CHECKER_BLOCK,
];

/// A program plus everything layer type checking would hand to the
/// instrumentation.
pub struct Fixture {
    pub program: Program,
    pub civl: CivlTypeInfo,
    pub linear: LinearTypeInfo,
    pub duplicates: DuplicateMap,
    pub yielding_procs: IndexSet<String>,
    pub refinement_blocks: RefinementBlocks,
    pub options: InstrumentationOptions,
}

impl Fixture {
    pub fn new(globals: Vec<Variable>) -> Self {
        let mut program = Program::new();
        for global in &globals {
            program.add_global(global.clone());
        }
        Self {
            program,
            civl: CivlTypeInfo::new(globals),
            linear: LinearTypeInfo::new(),
            duplicates: DuplicateMap::new(),
            yielding_procs: IndexSet::new(),
            refinement_blocks: RefinementBlocks::new(),
            options: InstrumentationOptions::default(),
        }
    }

    pub fn add_procedure(&mut self, proc: Procedure) {
        self.program.add_procedure(proc);
    }

    /// Registers `imp` as the original of a yielding procedure and adds its
    /// per-layer duplicate (see [`duplicate_name`]) to the program. The
    /// procedure is declared with the implementation's signature unless it
    /// already exists.
    pub fn add_yielding(&mut self, imp: Implementation, yielding: YieldingProc) {
        if self.program.procedure(&imp.proc_name).is_none() {
            self.program.add_procedure(Procedure::new(
                imp.proc_name.clone(),
                imp.inputs.clone(),
                imp.outputs.clone(),
            ));
        }
        let dup = duplicate_name(&imp.name);
        let origin = ImplOrigin {
            implementation: imp.name.clone(),
            procedure: imp.proc_name.clone(),
        };
        self.duplicates
            .add_identity_copy(&dup, origin, imp.blocks.iter().map(|b| b.label.as_str()));
        self.civl.add_yielding_proc(imp.proc_name.clone(), yielding);
        self.yielding_procs.insert(imp.proc_name.clone());

        let mut copy = imp;
        copy.name = dup;
        self.program.add_implementation(copy);
    }

    pub fn run(&mut self, layer: Layer) -> Result<LayerOutput, InstrumentationError> {
        transform_layer(
            &mut self.program,
            &self.civl,
            &self.linear,
            layer,
            &self.duplicates,
            &self.yielding_procs,
            &self.refinement_blocks,
            &self.options,
        )
    }

    pub fn implementation(&self, original: &str) -> &Implementation {
        let dup = duplicate_name(original);
        self.program
            .implementation(&dup)
            .unwrap_or_else(|| panic!("missing implementation {dup}"))
    }
}

pub fn duplicate_name(original: &str) -> String {
    format!("{original}_dup")
}

pub fn int(name: &str) -> Variable {
    Variable::new(name, Type::Int)
}

pub fn assign(var: &str, value: Expr) -> Cmd {
    Cmd::assign(vec![var.to_string()], vec![value])
}

pub fn call(id: u32, callee: &str, ins: Vec<Expr>) -> CallCmd {
    CallCmd::new(CmdId(id), callee, ins, vec![])
}

pub fn par_call(id: u32, calls: Vec<CallCmd>) -> Cmd {
    Cmd::ParallelCall(ParCallCmd::new(CmdId(id), calls))
}

/// Implementation `name` of procedure `name` without formals.
pub fn implementation(name: &str, blocks: Vec<Block>) -> Implementation {
    let mut imp = Implementation::new(name, name, vec![], vec![]);
    imp.blocks = blocks;
    imp
}

pub fn block<'a>(imp: &'a Implementation, label: &str) -> &'a Block {
    imp.block(label)
        .unwrap_or_else(|| panic!("missing block {label} in {}", imp.name))
}

pub fn successors<'a>(imp: &'a Implementation, label: &str) -> Vec<&'a str> {
    block(imp, label)
        .successors()
        .iter()
        .map(String::as_str)
        .collect()
}

pub fn occurrences(targets: &[&str], label: &str) -> usize {
    targets.iter().filter(|t| **t == label).count()
}

pub fn procedure_names(decls: &[Declaration]) -> Vec<&str> {
    decls
        .iter()
        .filter_map(Declaration::as_procedure)
        .map(|p| p.name.as_str())
        .collect()
}

pub fn declared_implementation<'a>(decls: &'a [Declaration], name: &str) -> &'a Implementation {
    decls
        .iter()
        .filter_map(Declaration::as_implementation)
        .find(|i| i.name == name)
        .unwrap_or_else(|| panic!("missing declared implementation {name}"))
}

pub fn has_marker(imp: &Implementation) -> bool {
    imp.blocks
        .iter()
        .flat_map(|b| &b.cmds)
        .any(Cmd::is_preemption_point)
}
