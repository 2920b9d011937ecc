use strata_ir::{CallCmd, Cmd, CmdId, Expr, Variable};

use crate::linear::{LinearPermissionInstrumentation, PermissionSite};
use crate::snapshot::GlobalSnapshotInstrumentation;

/// How yields account for interference by other threads.
#[derive(Debug, Clone)]
pub enum NoninterferenceInstrumentation<'a> {
    /// Interference is assumed harmless; nothing is emitted.
    Trusted,
    Checked(CheckedNoninterference<'a>),
}

/// Tracks the permissions held at the latest yield and calls the dispatcher
/// with them and the global snapshot.
#[derive(Debug, Clone)]
pub struct CheckedNoninterference<'a> {
    linear: LinearPermissionInstrumentation<'a>,
    /// One permission collector per linear domain, in domain order.
    collectors: Vec<Variable>,
    snapshots: Vec<Variable>,
    dispatcher: String,
}

impl<'a> NoninterferenceInstrumentation<'a> {
    pub fn checked(
        linear: LinearPermissionInstrumentation<'a>,
        snapshot: &GlobalSnapshotInstrumentation,
        dispatcher: impl Into<String>,
    ) -> Self {
        let collectors = linear
            .domains()
            .map(|d| Variable::new(format!("__perm_{}", d.name), d.permission_type()))
            .collect();
        NoninterferenceInstrumentation::Checked(CheckedNoninterference {
            linear,
            collectors,
            snapshots: snapshot.new_locals().to_vec(),
            dispatcher: dispatcher.into(),
        })
    }

    pub fn new_locals(&self) -> Vec<Variable> {
        match self {
            NoninterferenceInstrumentation::Trusted => Vec::new(),
            NoninterferenceInstrumentation::Checked(ni) => ni.collectors.clone(),
        }
    }

    /// Collects the permissions available on entry. `inputs` are the formals
    /// of the implementation or action being entered.
    pub fn init_cmds(&self, entry: &PermissionSite, inputs: &[Variable]) -> Vec<Cmd> {
        self.updates_to_permission_collector(entry, inputs)
    }

    pub fn updates_to_permission_collector(
        &self,
        site: &PermissionSite,
        scope: &[Variable],
    ) -> Vec<Cmd> {
        let NoninterferenceInstrumentation::Checked(ni) = self else {
            return Vec::new();
        };
        if ni.collectors.is_empty() {
            return Vec::new();
        }
        let perms = ni.linear.permission_exprs(site, scope);
        vec![Cmd::assign(
            ni.collectors.iter().map(|c| c.name.clone()).collect(),
            perms.into_values().collect(),
        )]
    }

    /// Runs every noninterference checker against the current state.
    pub fn call_to_dispatcher(&self) -> Vec<Cmd> {
        let NoninterferenceInstrumentation::Checked(ni) = self else {
            return Vec::new();
        };
        let ins: Vec<Expr> = ni
            .collectors
            .iter()
            .chain(&ni.snapshots)
            .map(Variable::ident)
            .collect();
        vec![Cmd::Call(CallCmd::new(
            CmdId::SYNTHESIZED,
            ni.dispatcher.clone(),
            ins,
            Vec::new(),
        ))]
    }
}
