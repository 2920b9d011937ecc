use indexmap::{IndexMap, IndexSet};

/// Types of program variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Bool,
    Int,
    /// Map from the first type to the second.
    Map(Box<Type>, Box<Type>),
    /// Uninterpreted or user-declared type.
    Named(String),
}

impl Type {
    pub fn map(domain: Type, range: Type) -> Self {
        Type::Map(Box::new(domain), Box::new(range))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Type::Named(name.into())
    }
}

/// A typed variable declaration (global, formal, local or bound).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variable {
    pub name: String,
    pub ty: Type,
    /// Linear domain the variable's value belongs to, if it is linear.
    pub linear_domain: Option<String>,
}

impl Variable {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            linear_domain: None,
        }
    }

    pub fn linear(name: impl Into<String>, ty: Type, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty,
            linear_domain: Some(domain.into()),
        }
    }

    /// Copy of this declaration under a different name, keeping type and domain.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: self.ty.clone(),
            linear_domain: self.linear_domain.clone(),
        }
    }

    pub fn ident(&self) -> Expr {
        Expr::Var(self.name.clone())
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    And,
    Or,
    Implies,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Implies => "==>",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Add => "+",
            BinOp::Sub => "-",
        }
    }
}

/// Expression representation shared by commands and contracts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    BoolLit(bool),
    IntLit(i64),
    /// Variable reference by name.
    Var(String),
    /// Value of the inner expression in the procedure's pre-state.
    Old(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Application of a named (uninterpreted or builtin) function.
    App(String, Vec<Expr>),
    Forall(Vec<Variable>, Box<Expr>),
    Exists(Vec<Variable>, Box<Expr>),
}

#[allow(clippy::should_implement_trait)]
impl Expr {
    pub const TRUE: Expr = Expr::BoolLit(true);
    pub const FALSE: Expr = Expr::BoolLit(false);

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn int(n: i64) -> Self {
        Expr::IntLit(n)
    }

    pub fn bool(b: bool) -> Self {
        Expr::BoolLit(b)
    }

    pub fn app(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::App(name.into(), args)
    }

    pub fn old(self) -> Self {
        Expr::Old(Box::new(self))
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn and(self, other: Expr) -> Self {
        Self::binary(BinOp::And, self, other)
    }

    pub fn or(self, other: Expr) -> Self {
        Self::binary(BinOp::Or, self, other)
    }

    pub fn implies(self, other: Expr) -> Self {
        Self::binary(BinOp::Implies, self, other)
    }

    pub fn eq(self, other: Expr) -> Self {
        Self::binary(BinOp::Eq, self, other)
    }

    pub fn neq(self, other: Expr) -> Self {
        Self::binary(BinOp::Neq, self, other)
    }

    pub fn lt(self, other: Expr) -> Self {
        Self::binary(BinOp::Lt, self, other)
    }

    pub fn le(self, other: Expr) -> Self {
        Self::binary(BinOp::Le, self, other)
    }

    pub fn gt(self, other: Expr) -> Self {
        Self::binary(BinOp::Gt, self, other)
    }

    pub fn ge(self, other: Expr) -> Self {
        Self::binary(BinOp::Ge, self, other)
    }

    pub fn add(self, other: Expr) -> Self {
        Self::binary(BinOp::Add, self, other)
    }

    pub fn sub(self, other: Expr) -> Self {
        Self::binary(BinOp::Sub, self, other)
    }

    pub fn forall(vars: Vec<Variable>, body: Expr) -> Self {
        Expr::Forall(vars, Box::new(body))
    }

    pub fn exists(vars: Vec<Variable>, body: Expr) -> Self {
        Expr::Exists(vars, Box::new(body))
    }

    /// Left-nested conjunction; `true` for an empty sequence.
    pub fn conjunction(exprs: impl IntoIterator<Item = Expr>) -> Self {
        exprs
            .into_iter()
            .reduce(|acc, e| acc.and(e))
            .unwrap_or(Expr::TRUE)
    }

    /// Left-nested disjunction; `false` for an empty sequence.
    pub fn disjunction(exprs: impl IntoIterator<Item = Expr>) -> Self {
        exprs
            .into_iter()
            .reduce(|acc, e| acc.or(e))
            .unwrap_or(Expr::FALSE)
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Expr::BoolLit(false))
    }

    /// Free variables in first-occurrence order.
    pub fn free_vars(&self) -> IndexSet<String> {
        let mut out = IndexSet::new();
        collect_free_vars(self, &mut Vec::new(), &mut out);
        out
    }

    /// Capture-avoiding substitution. `old(..)` wrappers are preserved and
    /// substituted into like any other subterm.
    pub fn substitute(&self, subst: &Substitution) -> Expr {
        if subst.is_empty() {
            return self.clone();
        }
        Substituter {
            always: subst,
            for_old: None,
        }
        .apply(self, false)
    }

    /// Substitution that eliminates `old(..)`: outside `old` only `always`
    /// applies; inside, `for_old` takes precedence over `always` and the
    /// `old` wrapper is dropped.
    pub fn substitute_replacing_old(&self, always: &Substitution, for_old: &Substitution) -> Expr {
        Substituter {
            always,
            for_old: Some(for_old),
        }
        .apply(self, false)
    }
}

fn collect_free_vars(expr: &Expr, bound: &mut Vec<String>, out: &mut IndexSet<String>) {
    match expr {
        Expr::BoolLit(_) | Expr::IntLit(_) => {}
        Expr::Var(name) => {
            if !bound.iter().any(|b| b == name) {
                out.insert(name.clone());
            }
        }
        Expr::Old(inner) | Expr::Not(inner) => collect_free_vars(inner, bound, out),
        Expr::Binary(_, lhs, rhs) => {
            collect_free_vars(lhs, bound, out);
            collect_free_vars(rhs, bound, out);
        }
        Expr::App(_, args) => {
            for arg in args {
                collect_free_vars(arg, bound, out);
            }
        }
        Expr::Forall(vars, body) | Expr::Exists(vars, body) => {
            let depth = bound.len();
            bound.extend(vars.iter().map(|v| v.name.clone()));
            collect_free_vars(body, bound, out);
            bound.truncate(depth);
        }
    }
}

/// Ordered mapping from variable names to replacement expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitution {
    map: IndexMap<String, Expr>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairs formals with actuals positionally; extra entries on either side
    /// are ignored.
    pub fn from_formals<'a>(
        formals: impl IntoIterator<Item = &'a Variable>,
        actuals: impl IntoIterator<Item = Expr>,
    ) -> Self {
        formals
            .into_iter()
            .zip(actuals)
            .map(|(formal, actual)| (formal.name.clone(), actual))
            .collect()
    }

    pub fn insert(&mut self, name: impl Into<String>, replacement: Expr) {
        self.map.insert(name.into(), replacement);
    }

    pub fn get(&self, name: &str) -> Option<&Expr> {
        self.map.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Expr)> {
        self.map.iter()
    }

    fn without(&self, names: &[Variable]) -> Substitution {
        let mut map = self.map.clone();
        for var in names {
            map.shift_remove(&var.name);
        }
        Substitution { map }
    }

    fn replacement_free_vars(&self) -> IndexSet<String> {
        let mut out = IndexSet::new();
        for expr in self.map.values() {
            out.extend(expr.free_vars());
        }
        out
    }
}

impl FromIterator<(String, Expr)> for Substitution {
    fn from_iter<T: IntoIterator<Item = (String, Expr)>>(iter: T) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

struct Substituter<'a> {
    always: &'a Substitution,
    for_old: Option<&'a Substitution>,
}

impl Substituter<'_> {
    fn apply(&self, expr: &Expr, in_old: bool) -> Expr {
        match expr {
            Expr::BoolLit(_) | Expr::IntLit(_) => expr.clone(),
            Expr::Var(name) => {
                let replacement = if in_old {
                    self.for_old
                        .and_then(|m| m.get(name))
                        .or_else(|| self.always.get(name))
                } else {
                    self.always.get(name)
                };
                replacement.cloned().unwrap_or_else(|| expr.clone())
            }
            Expr::Old(inner) => match self.for_old {
                Some(_) => self.apply(inner, true),
                None => Expr::Old(Box::new(self.apply(inner, in_old))),
            },
            Expr::Not(inner) => Expr::Not(Box::new(self.apply(inner, in_old))),
            Expr::Binary(op, lhs, rhs) => Expr::Binary(
                *op,
                Box::new(self.apply(lhs, in_old)),
                Box::new(self.apply(rhs, in_old)),
            ),
            Expr::App(name, args) => Expr::App(
                name.clone(),
                args.iter().map(|a| self.apply(a, in_old)).collect(),
            ),
            Expr::Forall(vars, body) => {
                let (vars, body) = self.apply_binder(vars, body, in_old);
                Expr::Forall(vars, Box::new(body))
            }
            Expr::Exists(vars, body) => {
                let (vars, body) = self.apply_binder(vars, body, in_old);
                Expr::Exists(vars, Box::new(body))
            }
        }
    }

    fn apply_binder(&self, vars: &[Variable], body: &Expr, in_old: bool) -> (Vec<Variable>, Expr) {
        let mut always = self.always.without(vars);
        let mut for_old = self.for_old.map(|m| m.without(vars));

        let mut captured = always.replacement_free_vars();
        if let Some(m) = &for_old {
            captured.extend(m.replacement_free_vars());
        }
        let body_vars = body.free_vars();

        let mut renamed = Vec::with_capacity(vars.len());
        for var in vars {
            if !captured.contains(&var.name) {
                renamed.push(var.clone());
                continue;
            }
            let fresh = fresh_name(&var.name, |candidate| {
                captured.contains(candidate)
                    || body_vars.contains(candidate)
                    || vars.iter().any(|v| v.name == candidate)
            });
            always.insert(var.name.clone(), Expr::var(fresh.clone()));
            if let Some(m) = for_old.as_mut() {
                m.insert(var.name.clone(), Expr::var(fresh.clone()));
            }
            renamed.push(var.renamed(fresh));
        }

        let inner = Substituter {
            always: &always,
            for_old: for_old.as_ref(),
        };
        (renamed, inner.apply(body, in_old))
    }
}

fn fresh_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    (0..)
        .map(|i| format!("{base}#{i}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| format!("{base}#"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_replaces_free_occurrences() {
        let e = Expr::var("x").add(Expr::var("y")).gt(Expr::int(0));
        let subst: Substitution = [("x".to_string(), Expr::var("a"))].into_iter().collect();
        assert_eq!(
            e.substitute(&subst),
            Expr::var("a").add(Expr::var("y")).gt(Expr::int(0))
        );
    }

    #[test]
    fn bound_variables_shadow_the_substitution() {
        let e = Expr::forall(
            vec![Variable::new("x", Type::Int)],
            Expr::var("x").gt(Expr::var("y")),
        );
        let subst: Substitution = [("x".to_string(), Expr::int(7))].into_iter().collect();
        assert_eq!(e.substitute(&subst), e);
    }

    #[test]
    fn substitution_renames_binders_that_would_capture() {
        // forall x :: x > y   with   y := x + 1
        let e = Expr::forall(
            vec![Variable::new("x", Type::Int)],
            Expr::var("x").gt(Expr::var("y")),
        );
        let subst: Substitution = [("y".to_string(), Expr::var("x").add(Expr::int(1)))]
            .into_iter()
            .collect();
        let Expr::Forall(vars, body) = e.substitute(&subst) else {
            panic!("expected a quantifier");
        };
        assert_eq!(vars.len(), 1);
        assert_ne!(vars[0].name, "x");
        assert_eq!(
            *body,
            Expr::var(vars[0].name.clone()).gt(Expr::var("x").add(Expr::int(1)))
        );
        assert!(body.free_vars().contains("x"));
    }

    #[test]
    fn replacing_old_uses_the_old_map_inside_old() {
        let e = Expr::var("g").eq(Expr::var("g").old());
        let always = Substitution::new();
        let for_old: Substitution = [("g".to_string(), Expr::var("snap_g"))].into_iter().collect();
        assert_eq!(
            e.substitute_replacing_old(&always, &for_old),
            Expr::var("g").eq(Expr::var("snap_g"))
        );
    }

    #[test]
    fn plain_substitution_keeps_old_wrappers() {
        let e = Expr::var("x").old();
        let subst: Substitution = [("x".to_string(), Expr::var("z"))].into_iter().collect();
        assert_eq!(e.substitute(&subst), Expr::var("z").old());
    }

    #[test]
    fn conjunction_of_nothing_is_true() {
        assert_eq!(Expr::conjunction(Vec::new()), Expr::TRUE);
        assert_eq!(Expr::disjunction(Vec::new()), Expr::FALSE);
        assert_eq!(
            Expr::conjunction(vec![Expr::var("a"), Expr::var("b")]),
            Expr::var("a").and(Expr::var("b"))
        );
    }
}
