#![doc = include_str!("../README.md")]

//! Strata intermediate representation.
//!
//! This crate defines the program representation consumed by the layered
//! instrumentation pass: typed expressions with capture-avoiding
//! substitution, commands and basic blocks, procedures and implementations,
//! a Boogie-style printer, and control-flow-graph analysis (dominators,
//! back edges, natural loops).

pub mod expr;
pub mod graph;
pub mod printer;
pub mod program;
#[cfg(any(test, feature = "proptest"))]
pub mod proptest_generators;

pub use expr::{BinOp, Expr, Substitution, Type, Variable};
pub use graph::{prune_unreachable_blocks, ControlFlowGraph};
pub use program::{
    Block, CallCmd, Clause, Cmd, CmdId, Declaration, Implementation, ParCallCmd, Procedure,
    Program, Transfer,
};
