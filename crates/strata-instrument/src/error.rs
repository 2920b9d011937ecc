use thiserror::Error;

use crate::civl::Layer;

/// Well-formedness failures of a layer's input.
///
/// Every variant is detected before the program is touched, so a layer that
/// fails to instrument leaves the program exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstrumentationError {
    #[error("Unknown implementation '{0}'")]
    UnknownImplementation(String),
    #[error("Unknown procedure '{0}'")]
    UnknownProcedure(String),
    #[error("Procedure '{0}' is not a yielding procedure")]
    UnknownYieldingProc(String),
    #[error("Unknown yield invariant '{0}'")]
    UnknownYieldInvariant(String),
    #[error("Unknown atomic action '{0}'")]
    UnknownAtomicAction(String),
    #[error("Arity mismatch for {what} '{name}': expected {expected}, found {found}")]
    ArityMismatch {
        what: &'static str,
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Procedure '{callee}' called in a parallel call of '{implementation}' has type parameters")]
    TypeParametersOnParallelCall {
        implementation: String,
        callee: String,
    },
    #[error("Implementation '{0}' has no blocks")]
    MissingEntry(String),
    #[error("Block '{block}' of '{implementation}' jumps to unknown block '{target}'")]
    DanglingTarget {
        implementation: String,
        block: String,
        target: String,
    },
    #[error("Block label '{label}' of '{implementation}' is reserved for instrumentation")]
    ReservedLabel {
        implementation: String,
        label: String,
    },
    #[error("Refinement block '{label}' spliced into '{implementation}' clashes with another block label")]
    RefinementBlockLabelClash {
        implementation: String,
        label: String,
    },
    #[error("Control flow of '{0}' is irreducible")]
    IrreducibleControlFlow(String),
    #[error("Yielding procedure '{procedure}' disappears at layer {upper_layer} but is instrumented at layer {layer}")]
    ClassificationMismatch {
        procedure: String,
        upper_layer: Layer,
        layer: Layer,
    },
}
