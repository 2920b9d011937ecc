//! Facts established by layer type checking.
//!
//! The instrumentation consumes these read-only: which procedures yield,
//! the layer each one disappears at, the atomic action it refines, which
//! yield invariants and yielding loops are active at a layer, and how the
//! per-layer duplicates of implementations and blocks relate to the input
//! program.

use indexmap::{IndexMap, IndexSet};
use std::collections::{BTreeSet, HashMap};

use strata_ir::{CallCmd, Clause, Expr, Variable};

pub type Layer = u32;

/// Inclusive range of layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerRange {
    pub lower: Layer,
    pub upper: Layer,
}

impl LayerRange {
    pub fn new(lower: Layer, upper: Layer) -> Self {
        Self { lower, upper }
    }

    pub fn single(layer: Layer) -> Self {
        Self::new(layer, layer)
    }

    pub fn contains(&self, layer: Layer) -> bool {
        self.lower <= layer && layer <= self.upper
    }
}

/// A named predicate over its inputs and the globals, assumed at yields and
/// checked against interference at exactly one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YieldInvariant {
    pub name: String,
    pub layer: Layer,
    pub inputs: Vec<Variable>,
    pub requires: Vec<Clause>,
}

impl YieldInvariant {
    pub fn is_active(&self, layer: Layer) -> bool {
        self.layer == layer
    }
}

/// Commutativity class of a mover procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoverType {
    Left,
    Right,
    Both,
    Non,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YieldingProcKind {
    /// Commutes with concurrent actions and becomes atomic at its upper layer.
    Mover { mover_type: MoverType },
    /// Refines `refined_action` at its upper layer.
    Action { refined_action: String },
}

/// Classification of a yielding procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YieldingProc {
    pub kind: YieldingProcKind,
    /// Layer at which the procedure becomes atomic and disappears.
    pub upper_layer: Layer,
    /// Calls to yield invariants assumed on entry.
    pub yield_requires: Vec<CallCmd>,
    /// Calls to yield invariants established on exit.
    pub yield_ensures: Vec<CallCmd>,
}

impl YieldingProc {
    pub fn mover(mover_type: MoverType, upper_layer: Layer) -> Self {
        Self {
            kind: YieldingProcKind::Mover { mover_type },
            upper_layer,
            yield_requires: Vec::new(),
            yield_ensures: Vec::new(),
        }
    }

    pub fn action(refined_action: impl Into<String>, upper_layer: Layer) -> Self {
        Self {
            kind: YieldingProcKind::Action {
                refined_action: refined_action.into(),
            },
            upper_layer,
            yield_requires: Vec::new(),
            yield_ensures: Vec::new(),
        }
    }

    pub fn is_mover(&self) -> bool {
        matches!(self.kind, YieldingProcKind::Mover { .. })
    }

    /// A mover at its upper layer is atomic there: its body is not desugared.
    pub fn disappears_at(&self, layer: Layer) -> bool {
        self.is_mover() && self.upper_layer == layer
    }

    pub fn refined_action(&self) -> Option<&str> {
        match &self.kind {
            YieldingProcKind::Action { refined_action } => Some(refined_action),
            YieldingProcKind::Mover { .. } => None,
        }
    }
}

/// An atomic action: a gate plus a transition relation over the action's
/// formals, the current globals and `old(global)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicAction {
    pub name: String,
    pub inputs: Vec<Variable>,
    pub outputs: Vec<Variable>,
    pub gate: Vec<Expr>,
    pub transition_relation: Expr,
    pub layer_range: LayerRange,
    /// Actions this action may create as pending asyncs.
    pub pending_asyncs: Vec<String>,
}

impl AtomicAction {
    pub fn new(name: impl Into<String>, layer_range: LayerRange) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            gate: Vec::new(),
            transition_relation: Expr::TRUE,
            layer_range,
            pending_asyncs: Vec::new(),
        }
    }

    pub fn has_pending_asyncs(&self) -> bool {
        !self.pending_asyncs.is_empty()
    }
}

/// A block of a specific implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockRef {
    pub implementation: String,
    pub label: String,
}

impl BlockRef {
    pub fn new(implementation: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            implementation: implementation.into(),
            label: label.into(),
        }
    }
}

/// Loop header whose iterations are separated by yields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct YieldingLoop {
    pub layers: BTreeSet<Layer>,
    /// Calls to yield invariants that serve as loop invariants.
    pub yield_invariants: Vec<CallCmd>,
}

/// Original identity of a duplicated implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImplOrigin {
    pub implementation: String,
    pub procedure: String,
}

/// Back references from the per-layer duplicates to the input program.
///
/// Only used to recover original identities; nothing is ever mutated
/// through it.
#[derive(Debug, Clone, Default)]
pub struct DuplicateMap {
    implementations: IndexMap<String, ImplOrigin>,
    blocks: HashMap<BlockRef, BlockRef>,
}

impl DuplicateMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that implementation `duplicate` copies `origin`.
    pub fn add_implementation(&mut self, duplicate: impl Into<String>, origin: ImplOrigin) {
        self.implementations.insert(duplicate.into(), origin);
    }

    pub fn add_block(&mut self, duplicate: BlockRef, original: BlockRef) {
        self.blocks.insert(duplicate, original);
    }

    /// Records the duplicate `duplicate` of `implementation`, mapping each of
    /// the given block labels to the same label in the original.
    pub fn add_identity_copy<'a>(
        &mut self,
        duplicate: &str,
        origin: ImplOrigin,
        labels: impl IntoIterator<Item = &'a str>,
    ) {
        for label in labels {
            self.add_block(
                BlockRef::new(duplicate, label),
                BlockRef::new(origin.implementation.clone(), label),
            );
        }
        self.add_implementation(duplicate, origin);
    }

    /// Duplicated implementations in insertion order.
    pub fn implementations(&self) -> impl Iterator<Item = (&str, &ImplOrigin)> {
        self.implementations.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn original_block(&self, duplicate: &BlockRef) -> Option<&BlockRef> {
        self.blocks.get(duplicate)
    }
}

/// Everything layer type checking hands to the instrumentation.
#[derive(Debug, Clone, Default)]
pub struct CivlTypeInfo {
    pub globals: Vec<Variable>,
    /// Keyed by procedure name.
    pub yielding_procs: IndexMap<String, YieldingProc>,
    pub yield_invariants: IndexMap<String, YieldInvariant>,
    pub atomic_actions: IndexMap<String, AtomicAction>,
    /// Keyed by the original header block.
    pub yielding_loops: IndexMap<BlockRef, YieldingLoop>,
}

impl CivlTypeInfo {
    pub fn new(globals: Vec<Variable>) -> Self {
        Self {
            globals,
            ..Self::default()
        }
    }

    pub fn global_names(&self) -> Vec<String> {
        self.globals.iter().map(|g| g.name.clone()).collect()
    }

    pub fn add_yielding_proc(&mut self, procedure: impl Into<String>, proc: YieldingProc) {
        self.yielding_procs.insert(procedure.into(), proc);
    }

    pub fn add_yield_invariant(&mut self, invariant: YieldInvariant) {
        self.yield_invariants
            .insert(invariant.name.clone(), invariant);
    }

    pub fn add_atomic_action(&mut self, action: AtomicAction) {
        self.atomic_actions.insert(action.name.clone(), action);
    }

    pub fn add_yielding_loop(&mut self, header: BlockRef, yielding_loop: YieldingLoop) {
        self.yielding_loops.insert(header, yielding_loop);
    }

    pub fn yielding_proc(&self, procedure: &str) -> Option<&YieldingProc> {
        self.yielding_procs.get(procedure)
    }

    pub fn yield_invariant(&self, name: &str) -> Option<&YieldInvariant> {
        self.yield_invariants.get(name)
    }

    pub fn atomic_action(&self, name: &str) -> Option<&AtomicAction> {
        self.atomic_actions.get(name)
    }

    /// Layers at which `header` (an original block) is a yielding loop.
    pub fn yielding_loop_layers(&self, header: &BlockRef) -> Option<&BTreeSet<Layer>> {
        self.yielding_loops.get(header).map(|l| &l.layers)
    }

    /// Yield invariants active at `layer`, in declaration order.
    pub fn active_yield_invariants(&self, layer: Layer) -> impl Iterator<Item = &YieldInvariant> {
        self.yield_invariants
            .values()
            .filter(move |inv| inv.is_active(layer))
    }

    /// Targets of pending asyncs created by actions available at `layer`.
    pub fn pending_async_targets(&self, layer: Layer) -> IndexSet<&str> {
        self.atomic_actions
            .values()
            .filter(|a| a.layer_range.contains(layer) && a.has_pending_asyncs())
            .flat_map(|a| a.pending_asyncs.iter().map(String::as_str))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_range_is_inclusive() {
        let range = LayerRange::new(1, 3);
        assert!(range.contains(1));
        assert!(range.contains(3));
        assert!(!range.contains(0));
        assert!(!range.contains(4));
    }

    #[test]
    fn mover_disappears_only_at_its_upper_layer() {
        let mover = YieldingProc::mover(MoverType::Both, 2);
        assert!(mover.disappears_at(2));
        assert!(!mover.disappears_at(1));
        assert!(!YieldingProc::action("A", 2).disappears_at(2));
    }

    #[test]
    fn pending_async_targets_are_deduplicated() {
        let mut civl = CivlTypeInfo::default();
        let mut a = AtomicAction::new("A", LayerRange::new(1, 2));
        a.pending_asyncs = vec!["P".into(), "Q".into()];
        let mut b = AtomicAction::new("B", LayerRange::single(1));
        b.pending_asyncs = vec!["Q".into()];
        let mut c = AtomicAction::new("C", LayerRange::single(5));
        c.pending_asyncs = vec!["R".into()];
        civl.add_atomic_action(a);
        civl.add_atomic_action(b);
        civl.add_atomic_action(c);

        let targets: Vec<&str> = civl.pending_async_targets(1).into_iter().collect();
        assert_eq!(targets, vec!["P", "Q"]);
        assert!(civl.pending_async_targets(3).is_empty());
    }

    #[test]
    fn duplicate_blocks_resolve_to_their_original() {
        let mut map = DuplicateMap::new();
        map.add_identity_copy(
            "Impl@1",
            ImplOrigin {
                implementation: "Impl".into(),
                procedure: "Proc".into(),
            },
            ["A", "B"],
        );
        assert_eq!(
            map.original_block(&BlockRef::new("Impl@1", "B")),
            Some(&BlockRef::new("Impl", "B"))
        );
        assert_eq!(map.original_block(&BlockRef::new("Impl@1", "C")), None);
        let (duplicate, origin) = map.implementations().next().unwrap();
        assert_eq!(duplicate, "Impl@1");
        assert_eq!(origin.procedure, "Proc");
    }
}
