//! Runtime configuration.

use serde::Deserialize;

/// Default bound on frames cascading from one external trigger.
pub const DEFAULT_MAX_FRAMES: usize = 100_000;

/// Tunables for the per-thread runtime.
///
/// Install with [`Runtime::configure`](crate::reactive::Runtime::configure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How many frames a single write, batch or constructor may cascade
    /// through before propagation is aborted with `Error::Runaway`.
    pub max_frames: usize,
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Replace the frame bound.
    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
        }
    }
}
