//! Engine configuration.

/// Configuration for [`crate::MemoryEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of consecutive idle scheduler turns after which a native
    /// transaction commits by itself. Values below 1 are treated as 1.
    pub idle_turns: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { idle_turns: 1 }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the idle turn budget.
    #[must_use]
    pub const fn idle_turns(mut self, turns: u32) -> Self {
        self.idle_turns = turns;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_commits_after_one_idle_turn() {
        assert_eq!(EngineConfig::default().idle_turns, 1);
        assert_eq!(EngineConfig::new().idle_turns(4).idle_turns, 4);
    }
}
