//! Per-session tunables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Numeric parameters governing one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a single blocking instruction read may take, in
    /// microseconds. A timed-out read is retried until the idle timeout is
    /// reached, so this bounds shutdown latency rather than peer patience.
    #[serde(default = "default_instruction_timeout_us")]
    pub instruction_timeout_us: u64,

    /// How long a peer may go without completing any instruction before it
    /// is aborted with a client-timeout status, in microseconds.
    #[serde(default = "default_idle_timeout_us")]
    pub idle_timeout_us: u64,

    /// Upper bound on clipboard payloads, in bytes.
    #[serde(default = "default_clipboard_cap")]
    pub clipboard_cap: usize,
}

fn default_instruction_timeout_us() -> u64 {
    5_000_000
}

fn default_idle_timeout_us() -> u64 {
    15_000_000
}

fn default_clipboard_cap() -> usize {
    262_144
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            instruction_timeout_us: default_instruction_timeout_us(),
            idle_timeout_us: default_idle_timeout_us(),
            clipboard_cap: default_clipboard_cap(),
        }
    }
}

impl SessionConfig {
    /// The per-read timeout as a [`Duration`].
    #[must_use]
    pub fn instruction_timeout(&self) -> Duration {
        Duration::from_micros(self.instruction_timeout_us)
    }

    /// The idle abort threshold as a [`Duration`].
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_micros(self.idle_timeout_us)
    }
}
