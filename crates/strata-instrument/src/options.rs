use serde::{Deserialize, Serialize};

/// Switches read once when a layer is instrumented.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentationOptions {
    /// Assume noninterference instead of checking it: no checker
    /// procedures are generated and yields call into an empty dispatcher.
    pub trust_noninterference: bool,
}

impl InstrumentationOptions {
    pub fn trusted() -> Self {
        Self {
            trust_noninterference: true,
        }
    }
}
