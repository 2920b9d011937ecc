use strata_ir::{
    Block, CallCmd, Clause, Cmd, CmdId, Declaration, Implementation, Procedure, Variable,
};

use super::YieldingProcInstrumentation;
use crate::linear::PermissionSite;

impl YieldingProcInstrumentation<'_> {
    /// One checker per distinct pending-async target created at this layer.
    ///
    /// A checker runs the target action from any state satisfying its gate
    /// and then calls the dispatcher, so the target is checked against every
    /// yield predicate of the layer.
    pub(super) fn pending_async_checkers(&self) -> Vec<Declaration> {
        if self.trust_noninterference {
            return Vec::new();
        }
        let mut decls = Vec::new();
        for target in self.civl.pending_async_targets(self.layer) {
            let Some(action) = self.civl.atomic_action(target) else {
                continue;
            };
            let name = format!("PendingAsyncNoninterferenceChecker_{target}_{}", self.layer);

            let mut proc = Procedure::new(name.clone(), action.inputs.clone(), action.outputs.clone());
            proc.requires = action.gate.iter().cloned().map(Clause::checked).collect();
            proc.modifies = self.civl.global_names();

            let mut cmds = self.snapshot.init_cmds();
            cmds.extend(
                self.noninterference
                    .init_cmds(&PermissionSite::Entry(target.to_string()), &action.inputs),
            );
            cmds.push(Cmd::Call(CallCmd::new(
                CmdId::SYNTHESIZED,
                target,
                action.inputs.iter().map(Variable::ident).collect(),
                action.outputs.iter().map(|v| v.name.clone()).collect(),
            )));
            cmds.extend(self.noninterference.call_to_dispatcher());

            let mut imp = Implementation::new(
                name.clone(),
                name,
                action.inputs.clone(),
                action.outputs.clone(),
            );
            imp.locals = self
                .snapshot
                .new_locals()
                .iter()
                .cloned()
                .chain(self.noninterference.new_locals())
                .collect();
            imp.blocks = vec![Block::returning("entry", cmds)];

            decls.push(Declaration::Procedure(proc));
            decls.push(Declaration::Implementation(imp));
        }
        decls
    }
}
