use strata_ir::{Cmd, Substitution, Variable};

/// Shadow copies of the shared globals, refreshed at every yield.
///
/// Between two yields the snapshot holds the globals as they were right
/// after the earlier one, which is the pre-state of the atomic step being
/// checked.
#[derive(Debug, Clone)]
pub struct GlobalSnapshotInstrumentation {
    globals: Vec<Variable>,
    snapshots: Vec<Variable>,
}

impl GlobalSnapshotInstrumentation {
    pub fn new(globals: &[Variable]) -> Self {
        let snapshots = globals
            .iter()
            .map(|g| g.renamed(snapshot_name(&g.name)))
            .collect();
        Self {
            globals: globals.to_vec(),
            snapshots,
        }
    }

    pub fn new_locals(&self) -> &[Variable] {
        &self.snapshots
    }

    pub fn init_cmds(&self) -> Vec<Cmd> {
        self.update_cmds()
    }

    /// `snapshot_g := g` for every global, as one simultaneous assignment.
    pub fn update_cmds(&self) -> Vec<Cmd> {
        if self.globals.is_empty() {
            return Vec::new();
        }
        vec![Cmd::assign(
            self.snapshots.iter().map(|s| s.name.clone()).collect(),
            self.globals.iter().map(Variable::ident).collect(),
        )]
    }

    /// Maps every global to its snapshot.
    pub fn old_global_map(&self) -> Substitution {
        self.globals
            .iter()
            .zip(&self.snapshots)
            .map(|(g, s)| (g.name.clone(), s.ident()))
            .collect()
    }
}

pub(crate) fn snapshot_name(global: &str) -> String {
    format!("__snapshot_{global}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_ir::{Expr, Type};

    #[test]
    fn snapshots_shadow_every_global() {
        let globals = vec![
            Variable::new("x", Type::Int),
            Variable::new("m", Type::map(Type::Int, Type::Bool)),
        ];
        let snapshot = GlobalSnapshotInstrumentation::new(&globals);

        let names: Vec<&str> = snapshot.new_locals().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["__snapshot_x", "__snapshot_m"]);
        assert_eq!(snapshot.new_locals()[1].ty, globals[1].ty);

        assert_eq!(
            snapshot.update_cmds(),
            vec![Cmd::assign(
                vec!["__snapshot_x".into(), "__snapshot_m".into()],
                vec![Expr::var("x"), Expr::var("m")]
            )]
        );
        assert_eq!(
            snapshot.old_global_map().get("m"),
            Some(&Expr::var("__snapshot_m"))
        );
    }

    #[test]
    fn no_globals_means_no_commands() {
        let snapshot = GlobalSnapshotInstrumentation::new(&[]);
        assert!(snapshot.init_cmds().is_empty());
        assert!(snapshot.old_global_map().is_empty());
    }
}
