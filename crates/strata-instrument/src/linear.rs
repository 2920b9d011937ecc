//! Linear permissions and the disjointness facts they justify.
//!
//! Every linear variable belongs to a domain. The permissions a variable
//! holds are `<domain>_collect(x)`; permissions held by distinct variables
//! of one domain are pairwise disjoint, which is what lets a thread assume
//! its resources were untouched by others across a yield.

use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;

use strata_ir::{Cmd, CmdId, ControlFlowGraph, Expr, Implementation, Type, Variable};

use crate::civl::{BlockRef, DuplicateMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearDomain {
    pub name: String,
    pub element_type: Type,
}

impl LinearDomain {
    pub fn new(name: impl Into<String>, element_type: Type) -> Self {
        Self {
            name: name.into(),
            element_type,
        }
    }

    /// Permission sets are characteristic maps over the element type.
    pub fn permission_type(&self) -> Type {
        Type::map(self.element_type.clone(), Type::Bool)
    }

    pub fn collect(&self, var: &Variable) -> Expr {
        Expr::app(format!("{}_collect", self.name), vec![var.ident()])
    }

    /// Union of permission sets; the empty set for no operands.
    pub fn union(&self, mut perms: Vec<Expr>) -> Expr {
        match perms.len() {
            0 => Expr::app(format!("{}_empty", self.name), vec![]),
            1 => perms.remove(0),
            _ => Expr::app(format!("{}_union", self.name), perms),
        }
    }

    /// Pairwise disjointness of permission sets. Fewer than two sets are
    /// trivially disjoint.
    pub fn disjoint(&self, perms: Vec<Expr>) -> Option<Expr> {
        if perms.len() < 2 {
            return None;
        }
        Some(Expr::app(format!("{}_disjoint", self.name), perms))
    }

    /// Formal through which checkers receive the permissions a yielding
    /// thread held at its last yield.
    pub fn in_formal(&self) -> Variable {
        Variable::new(format!("__linear_{}_in", self.name), self.permission_type())
    }
}

/// Program point at which linear type checking recorded the available
/// linear variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PermissionSite {
    /// Entry of an original implementation or atomic action.
    Entry(String),
    /// Head of an original loop-header block.
    LoopHeader(BlockRef),
    /// After a call, yield or parallel call.
    Command(CmdId),
}

/// Output of linear type checking.
#[derive(Debug, Clone, Default)]
pub struct LinearTypeInfo {
    pub domains: IndexMap<String, LinearDomain>,
    available: HashMap<PermissionSite, Vec<String>>,
}

impl LinearTypeInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_domain(&mut self, domain: LinearDomain) {
        self.domains.insert(domain.name.clone(), domain);
    }

    pub fn set_available(&mut self, site: PermissionSite, vars: impl IntoIterator<Item = String>) {
        self.available.insert(site, vars.into_iter().collect());
    }

    /// Linear variables available at `site`, if recorded.
    pub fn available(&self, site: &PermissionSite) -> Option<&[String]> {
        self.available.get(site).map(Vec::as_slice)
    }

    pub fn domain(&self, name: &str) -> Option<&LinearDomain> {
        self.domains.get(name)
    }
}

/// Turns linear type-checking results into permission expressions and
/// disjointness assumptions for one layer.
#[derive(Debug, Clone, Copy)]
pub struct LinearPermissionInstrumentation<'a> {
    linear: &'a LinearTypeInfo,
    globals: &'a [Variable],
    duplicates: &'a DuplicateMap,
}

impl<'a> LinearPermissionInstrumentation<'a> {
    pub fn new(
        linear: &'a LinearTypeInfo,
        globals: &'a [Variable],
        duplicates: &'a DuplicateMap,
    ) -> Self {
        Self {
            linear,
            globals,
            duplicates,
        }
    }

    pub fn domains(&self) -> impl Iterator<Item = &'a LinearDomain> {
        self.linear.domains.values()
    }

    /// Linear variables of `scope` available at `site`. Unrecorded entry
    /// sites make every linear variable of `scope` available; other
    /// unrecorded sites make none available.
    fn available<'v>(&self, site: &PermissionSite, scope: &'v [Variable]) -> Vec<&'v Variable> {
        let linear = scope.iter().filter(|v| v.linear_domain.is_some());
        match self.linear.available(site) {
            Some(names) => linear.filter(|v| names.contains(&v.name)).collect(),
            None if matches!(site, PermissionSite::Entry(_)) => linear.collect(),
            None => Vec::new(),
        }
    }

    fn collected_by_domain<'v>(
        &self,
        vars: impl IntoIterator<Item = &'v Variable>,
    ) -> IndexMap<&'a str, Vec<Expr>> {
        let mut perms: IndexMap<&'a str, Vec<Expr>> = self
            .linear
            .domains
            .values()
            .map(|d| (d.name.as_str(), Vec::new()))
            .collect();
        for var in vars {
            let Some(domain) = var.linear_domain.as_deref().and_then(|d| self.linear.domain(d))
            else {
                continue;
            };
            if let Some(list) = perms.get_mut(domain.name.as_str()) {
                list.push(domain.collect(var));
            }
        }
        perms
    }

    /// Per-domain union of the permissions available at `site`, for every
    /// declared domain.
    pub fn permission_exprs(
        &self,
        site: &PermissionSite,
        scope: &[Variable],
    ) -> IndexMap<String, Expr> {
        self.collected_by_domain(self.available(site, scope))
            .into_iter()
            .filter_map(|(name, perms)| {
                let domain = self.linear.domain(name)?;
                Some((name.to_string(), domain.union(perms)))
            })
            .collect()
    }

    /// Disjointness of the permissions available at `site`, optionally
    /// together with the permissions held by linear globals.
    pub fn disjointness_exprs(
        &self,
        site: &PermissionSite,
        scope: &[Variable],
        add_globals: bool,
    ) -> Vec<Expr> {
        let mut vars = self.available(site, scope);
        if add_globals {
            vars.extend(self.globals.iter().filter(|g| g.linear_domain.is_some()));
        }
        self.collected_by_domain(vars)
            .into_iter()
            .filter_map(|(name, perms)| self.linear.domain(name)?.disjoint(perms))
            .collect()
    }

    pub fn disjointness_assume_cmds(
        &self,
        site: &PermissionSite,
        scope: &[Variable],
        add_globals: bool,
    ) -> Vec<Cmd> {
        self.disjointness_exprs(site, scope, add_globals)
            .into_iter()
            .map(Cmd::assume)
            .collect()
    }

    /// Disjointness of `perm_formal` (permissions of a yielding thread) with
    /// the given linear variables of `domain`.
    pub fn disjointness_with(
        &self,
        domain: &LinearDomain,
        perm_formal: &Variable,
        vars: &[Variable],
    ) -> Option<Expr> {
        let mut perms = vec![perm_formal.ident()];
        perms.extend(
            vars.iter()
                .filter(|v| v.linear_domain.as_deref() == Some(domain.name.as_str()))
                .map(|v| domain.collect(v)),
        );
        domain.disjoint(perms)
    }

    /// Loop-header block of `implementation` as recorded by linear type
    /// checking: the original block when `label` is a duplicate.
    pub fn header_site(&self, implementation: &str, label: &str) -> PermissionSite {
        let duplicate = BlockRef::new(implementation, label);
        let original = self
            .duplicates
            .original_block(&duplicate)
            .cloned()
            .unwrap_or(duplicate);
        PermissionSite::LoopHeader(original)
    }

    /// Assumes disjointness after every parallel call and every call to a
    /// yielding procedure, and at the head of every natural-loop header.
    pub fn add_disjointness_assumptions(
        &self,
        implementation: &mut Implementation,
        yielding_procs: &IndexSet<String>,
    ) {
        let scope: Vec<Variable> = implementation.all_variables().cloned().collect();

        for block in &mut implementation.blocks {
            let mut cmds = Vec::with_capacity(block.cmds.len());
            for cmd in block.cmds.drain(..) {
                let site = match &cmd {
                    Cmd::Call(call) if yielding_procs.contains(&call.callee) => {
                        Some(PermissionSite::Command(call.id))
                    }
                    Cmd::ParallelCall(par) => Some(PermissionSite::Command(par.id)),
                    _ => None,
                };
                cmds.push(cmd);
                if let Some(site) = site {
                    cmds.extend(self.disjointness_assume_cmds(&site, &scope, false));
                }
            }
            block.cmds = cmds;
        }

        let cfg = ControlFlowGraph::build(implementation);
        for header in cfg.loop_headers() {
            let site = self.header_site(&implementation.name, &header);
            let assumes = self.disjointness_assume_cmds(&site, &scope, false);
            if let Some(block) = implementation.block_mut(&header) {
                let rest = std::mem::take(&mut block.cmds);
                block.cmds = assumes.into_iter().chain(rest).collect();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_ir::{Block, CallCmd, ParCallCmd};

    fn tid_domain() -> LinearDomain {
        LinearDomain::new("tid", Type::Int)
    }

    fn linear_info() -> LinearTypeInfo {
        let mut info = LinearTypeInfo::new();
        info.add_domain(tid_domain());
        info
    }

    fn scope() -> Vec<Variable> {
        vec![
            Variable::linear("a", Type::Int, "tid"),
            Variable::linear("b", Type::Int, "tid"),
            Variable::new("n", Type::Int),
        ]
    }

    #[test]
    fn entry_sites_default_to_every_linear_variable_in_scope() {
        let info = linear_info();
        let dups = DuplicateMap::new();
        let lin = LinearPermissionInstrumentation::new(&info, &[], &dups);

        let exprs = lin.disjointness_exprs(&PermissionSite::Entry("I".into()), &scope(), false);
        let domain = tid_domain();
        assert_eq!(
            exprs,
            vec![Expr::app(
                "tid_disjoint",
                vec![domain.collect(&scope()[0]), domain.collect(&scope()[1])]
            )]
        );
    }

    #[test]
    fn recorded_sites_restrict_available_variables() {
        let mut info = linear_info();
        info.set_available(PermissionSite::Command(CmdId(7)), ["a".to_string()]);
        let dups = DuplicateMap::new();
        let lin = LinearPermissionInstrumentation::new(&info, &[], &dups);

        let site = PermissionSite::Command(CmdId(7));
        assert!(lin.disjointness_exprs(&site, &scope(), false).is_empty());

        let perms = lin.permission_exprs(&site, &scope());
        assert_eq!(perms.get("tid"), Some(&tid_domain().collect(&scope()[0])));

        // Unrecorded command sites hold nothing
        let empty = lin.permission_exprs(&PermissionSite::Command(CmdId(8)), &scope());
        assert_eq!(empty.get("tid"), Some(&Expr::app("tid_empty", vec![])));
    }

    #[test]
    fn linear_globals_join_when_requested() {
        let mut info = linear_info();
        info.set_available(PermissionSite::Command(CmdId(1)), ["a".to_string()]);
        let globals = vec![Variable::linear("owner", Type::Int, "tid")];
        let dups = DuplicateMap::new();
        let lin = LinearPermissionInstrumentation::new(&info, &globals, &dups);

        let site = PermissionSite::Command(CmdId(1));
        assert!(lin.disjointness_exprs(&site, &scope(), false).is_empty());
        assert_eq!(lin.disjointness_exprs(&site, &scope(), true).len(), 1);
    }

    #[test]
    fn assumptions_follow_parallel_calls_and_yielding_calls() {
        let info = {
            let mut info = linear_info();
            for id in [1, 2, 3] {
                info.set_available(
                    PermissionSite::Command(CmdId(id)),
                    ["a".to_string(), "b".to_string()],
                );
            }
            info
        };
        let dups = DuplicateMap::new();
        let lin = LinearPermissionInstrumentation::new(&info, &[], &dups);

        let mut imp = Implementation::new("I", "P", scope(), vec![]);
        imp.blocks.push(Block::returning(
            "entry",
            vec![
                Cmd::Call(CallCmd::new(CmdId(1), "Yielding", vec![], vec![])),
                Cmd::Call(CallCmd::new(CmdId(2), "Atomic", vec![], vec![])),
                Cmd::ParallelCall(ParCallCmd::new(CmdId(3), vec![])),
            ],
        ));
        let yielding: IndexSet<String> = ["Yielding".to_string()].into_iter().collect();
        lin.add_disjointness_assumptions(&mut imp, &yielding);

        let kinds: Vec<&str> = imp.blocks[0]
            .cmds
            .iter()
            .map(|c| match c {
                Cmd::Call(_) => "call",
                Cmd::ParallelCall(_) => "par",
                Cmd::Assume(_) => "assume",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["call", "assume", "call", "par", "assume"]);
    }

    #[test]
    fn loop_headers_receive_assumptions_at_their_head() {
        let mut info = linear_info();
        info.set_available(
            PermissionSite::LoopHeader(BlockRef::new("I", "H")),
            ["a".to_string(), "b".to_string()],
        );
        let mut dups = DuplicateMap::new();
        dups.add_block(BlockRef::new("I@2", "H"), BlockRef::new("I", "H"));
        let lin = LinearPermissionInstrumentation::new(&info, &[], &dups);

        let mut imp = Implementation::new("I@2", "P", scope(), vec![]);
        imp.blocks.push(Block::goto("entry", vec![], vec!["H".into()]));
        imp.blocks.push(Block::goto(
            "H",
            vec![Cmd::assign(vec!["n".into()], vec![Expr::int(0)])],
            vec!["H".into(), "exit".into()],
        ));
        imp.blocks.push(Block::returning("exit", vec![]));
        lin.add_disjointness_assumptions(&mut imp, &IndexSet::new());

        let header = imp.block("H").unwrap();
        assert!(matches!(header.cmds[0], Cmd::Assume(_)));
        assert_eq!(header.cmds.len(), 2);
        assert!(imp.block("entry").unwrap().cmds.is_empty());
    }
}
