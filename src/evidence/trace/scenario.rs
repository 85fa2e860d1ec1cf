use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Longest trace window a session may run for.
pub const MAX_TRACE_WINDOW: Duration = Duration::from_secs(30);

/// Window of the [`TraceScenario::DynamicLoading`] scenario.
pub const DYNAMIC_LOADING_WINDOW: Duration = Duration::from_secs(2);

/// What a trace session observes and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceScenario {
    /// Whatever the workload does on its own during the configured window.
    Runtime,
    /// Library lookups provoked by rebuilding the linker cache inside the target.
    DynamicLoading,
}

impl TraceScenario {
    /// Length of the trace window given the configured runtime window.
    pub fn window(&self, configured: Duration) -> Duration {
        match self {
            TraceScenario::Runtime => configured.min(MAX_TRACE_WINDOW),
            TraceScenario::DynamicLoading => DYNAMIC_LOADING_WINDOW,
        }
    }

    /// Command executed inside the target while the tracer is attached.
    ///
    /// Triggers mutate the target and therefore run exclusively.
    pub fn trigger(&self) -> Option<&'static str> {
        match self {
            TraceScenario::Runtime => None,
            TraceScenario::DynamicLoading => Some("ldconfig"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TraceScenario::Runtime => "runtime",
            TraceScenario::DynamicLoading => "dynamic_loading",
        }
    }
}

impl fmt::Display for TraceScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
