use serde::Serialize;

use crate::civl::Layer;

/// What instrumenting one layer produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LayerSummary {
    pub layer: Layer,
    /// Implementations whose control flow was desugared.
    pub transformed_implementations: Vec<String>,
    /// Mover implementations at their disappearing layer; these only
    /// received disjointness assumptions.
    pub skipped_implementations: Vec<String>,
    pub noninterference_checkers: Vec<String>,
    pub aggregators: Vec<String>,
    pub pending_async_checkers: Vec<String>,
    pub dispatcher: String,
}
