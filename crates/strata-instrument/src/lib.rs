#![doc = include_str!("../README.md")]

//! Strata layer instrumentation.
//!
//! This crate compiles the concurrent-correctness obligations of one layer
//! into sequential form: noninterference checkers for the predicates assumed
//! at yields, refinement checks of atomic actions, parallel-call aggregators,
//! pending-async checkers, and the dispatcher tying the checkers together.

pub mod checker;
pub mod civl;
pub mod error;
pub mod linear;
pub mod noninterference;
pub mod options;
pub mod preflight;
pub mod refinement;
pub mod snapshot;
pub mod summary;
pub mod yielding;

pub use civl::{
    AtomicAction, BlockRef, CivlTypeInfo, DuplicateMap, ImplOrigin, Layer, LayerRange, MoverType,
    YieldInvariant, YieldingLoop, YieldingProc, YieldingProcKind,
};
pub use error::InstrumentationError;
pub use linear::{LinearDomain, LinearTypeInfo, PermissionSite};
pub use options::InstrumentationOptions;
pub use summary::LayerSummary;
pub use yielding::{transform_layer, LayerOutput, RefinementBlocks};
