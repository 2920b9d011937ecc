use indexmap::IndexMap;

use strata_ir::{ParCallCmd, Procedure, Substitution, Variable};

/// Name of the aggregator procedure shared by every parallel call with the
/// same callee sequence.
pub fn aggregator_name(par: &ParCallCmd) -> String {
    par.calls
        .iter()
        .fold(String::from("ParallelCall"), |mut name, call| {
            name.push('_');
            name.push_str(&call.callee);
            name
        })
}

fn component_formal(var: &Variable, count: usize) -> Variable {
    var.renamed(format!("__p{count}_{}", var.name))
}

/// Procedure whose contract is the conjunction of the callees' contracts,
/// with each callee's formals renamed apart by its position in the call.
/// It may modify every global.
pub(super) fn build_aggregator(
    name: &str,
    par: &ParCallCmd,
    procedures: &IndexMap<String, Procedure>,
    globals: &[Variable],
) -> Procedure {
    let mut aggregator = Procedure::new(name, Vec::new(), Vec::new());
    for (count, call) in par.calls.iter().enumerate() {
        let Some(callee) = procedures.get(&call.callee) else {
            continue;
        };
        let mut subst = Substitution::new();
        for (formal, is_input) in callee
            .inputs
            .iter()
            .map(|v| (v, true))
            .chain(callee.outputs.iter().map(|v| (v, false)))
        {
            let renamed = component_formal(formal, count);
            subst.insert(formal.name.clone(), renamed.ident());
            if is_input {
                aggregator.inputs.push(renamed);
            } else {
                aggregator.outputs.push(renamed);
            }
        }
        aggregator
            .requires
            .extend(callee.requires.iter().map(|c| c.map(|e| e.substitute(&subst))));
        aggregator
            .ensures
            .extend(callee.ensures.iter().map(|c| c.map(|e| e.substitute(&subst))));
    }
    aggregator.modifies = globals.iter().map(|g| g.name.clone()).collect();
    aggregator
}
