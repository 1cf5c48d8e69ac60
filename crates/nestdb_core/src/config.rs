//! Coordinator configuration.

/// Configuration for a [`crate::Database`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether native transactions are kept alive while nested work or
    /// detached continuations are outstanding.
    pub keep_alive: bool,

    /// Maximum number of co-reentrant levels sharing one native transaction.
    pub max_nesting_depth: usize,

    /// Whether an unobserved failure (a dropped failed request or a failed
    /// detached continuation) aborts the owning transaction.
    pub abort_on_unhandled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keep_alive: true,
            max_nesting_depth: 32,
            abort_on_unhandled: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the keep-alive guard runs.
    #[must_use]
    pub const fn keep_alive(mut self, value: bool) -> Self {
        self.keep_alive = value;
        self
    }

    /// Sets the maximum co-reentrant nesting depth.
    #[must_use]
    pub const fn max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    /// Sets whether unobserved failures abort the owning transaction.
    #[must_use]
    pub const fn abort_on_unhandled(mut self, value: bool) -> Self {
        self.abort_on_unhandled = value;
        self
    }
}
