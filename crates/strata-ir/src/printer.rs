//! Boogie-style concrete syntax for dumping programs.

use std::fmt;

use crate::expr::{BinOp, Expr, Type, Variable};
use crate::program::{
    Block, CallCmd, Clause, Cmd, Declaration, Implementation, Procedure, Program, Transfer,
};

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Map(dom, rng) => write!(f, "[{dom}]{rng}"),
            Type::Named(name) => write!(f, "{name}"),
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.linear_domain {
            Some(domain) => write!(f, "{{:linear \"{domain}\"}} {}: {}", self.name, self.ty),
            None => write!(f, "{}: {}", self.name, self.ty),
        }
    }
}

fn precedence(op: BinOp) -> u8 {
    match op {
        BinOp::Implies => 1,
        BinOp::Or => 2,
        BinOp::And => 3,
        BinOp::Eq | BinOp::Neq | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 4,
        BinOp::Add | BinOp::Sub => 5,
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr, parent: u8) -> fmt::Result {
    match expr {
        Expr::Binary(op, ..) if precedence(*op) <= parent => write!(f, "({expr})"),
        Expr::Forall(..) | Expr::Exists(..) => write!(f, "({expr})"),
        _ => write!(f, "{expr}"),
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::BoolLit(b) => write!(f, "{b}"),
            Expr::IntLit(n) => write!(f, "{n}"),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Old(inner) => write!(f, "old({inner})"),
            Expr::Not(inner) => {
                write!(f, "!")?;
                write_operand(f, inner, u8::MAX)
            }
            Expr::Binary(op, lhs, rhs) => {
                let prec = precedence(*op);
                write_operand(f, lhs, prec)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, rhs, prec)
            }
            Expr::App(name, args) => {
                write!(f, "{name}(")?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Expr::Forall(vars, body) => {
                write!(f, "forall ")?;
                write_list(f, vars)?;
                write!(f, " :: {body}")
            }
            Expr::Exists(vars, body) => {
                write!(f, "exists ")?;
                write_list(f, vars)?;
                write!(f, " :: {body}")
            }
        }
    }
}

fn write_attributes(f: &mut fmt::Formatter<'_>, attributes: &[String]) -> fmt::Result {
    for attribute in attributes {
        write!(f, "{{:{attribute}}} ")?;
    }
    Ok(())
}

impl fmt::Display for CallCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_attributes(f, &self.attributes)?;
        if !self.outs.is_empty() {
            write_list(f, &self.outs)?;
            write!(f, " := ")?;
        }
        write!(f, "{}(", self.callee)?;
        write_list(f, &self.ins)?;
        write!(f, ")")
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cmd::Assign { lhs, rhs } => {
                write_list(f, lhs)?;
                write!(f, " := ")?;
                write_list(f, rhs)?;
                write!(f, ";")
            }
            Cmd::Havoc(vars) => {
                write!(f, "havoc ")?;
                write_list(f, vars)?;
                write!(f, ";")
            }
            Cmd::Assume(e) => write!(f, "assume {e};"),
            Cmd::Assert { condition, message } => match message {
                Some(msg) => write!(f, "assert {{:msg \"{msg}\"}} {condition};"),
                None => write!(f, "assert {condition};"),
            },
            Cmd::Call(call) => write!(f, "call {call};"),
            Cmd::Yield(_) => write!(f, "yield;"),
            Cmd::ParallelCall(par) => {
                write!(f, "par ")?;
                write_attributes(f, &par.attributes)?;
                for (i, call) in par.calls.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{call}")?;
                }
                write!(f, ";")
            }
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  {}:", self.label)?;
        for cmd in &self.cmds {
            writeln!(f, "    {cmd}")?;
        }
        match &self.transfer {
            Transfer::Return => writeln!(f, "    return;"),
            Transfer::Goto(targets) => {
                write!(f, "    goto ")?;
                write_list(f, targets)?;
                writeln!(f, ";")
            }
        }
    }
}

fn write_signature(
    f: &mut fmt::Formatter<'_>,
    type_params: &[String],
    inputs: &[Variable],
    outputs: &[Variable],
) -> fmt::Result {
    if !type_params.is_empty() {
        write!(f, "<")?;
        write_list(f, type_params)?;
        write!(f, ">")?;
    }
    write!(f, "(")?;
    write_list(f, inputs)?;
    write!(f, ")")?;
    if !outputs.is_empty() {
        write!(f, " returns (")?;
        write_list(f, outputs)?;
        write!(f, ")")?;
    }
    Ok(())
}

fn write_clause(f: &mut fmt::Formatter<'_>, keyword: &str, clause: &Clause) -> fmt::Result {
    if clause.free {
        writeln!(f, "  free {keyword} {};", clause.condition)
    } else {
        writeln!(f, "  {keyword} {};", clause.condition)
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "procedure ")?;
        write_attributes(f, &self.attributes)?;
        write!(f, "{}", self.name)?;
        write_signature(f, &self.type_params, &self.inputs, &self.outputs)?;
        writeln!(f, ";")?;
        for req in &self.requires {
            write_clause(f, "requires", req)?;
        }
        if !self.modifies.is_empty() {
            write!(f, "  modifies ")?;
            write_list(f, &self.modifies)?;
            writeln!(f, ";")?;
        }
        for ens in &self.ensures {
            write_clause(f, "ensures", ens)?;
        }
        Ok(())
    }
}

impl fmt::Display for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "implementation ")?;
        write_attributes(f, &self.attributes)?;
        write!(f, "{}", self.name)?;
        write_signature(f, &self.type_params, &self.inputs, &self.outputs)?;
        writeln!(f)?;
        writeln!(f, "{{")?;
        for local in &self.locals {
            writeln!(f, "  var {local};")?;
        }
        if !self.locals.is_empty() {
            writeln!(f)?;
        }
        for block in &self.blocks {
            write!(f, "{block}")?;
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Declaration::Procedure(p) => write!(f, "{p}"),
            Declaration::Implementation(i) => write!(f, "{i}"),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for global in &self.globals {
            writeln!(f, "var {global};")?;
        }
        for proc in self.procedures.values() {
            writeln!(f)?;
            write!(f, "{proc}")?;
        }
        for implementation in self.implementations.values() {
            writeln!(f)?;
            write!(f, "{implementation}")?;
        }
        Ok(())
    }
}
