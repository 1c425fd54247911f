//! Configuration for the document loader.

/// Configuration for the document loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Scheduling rounds a batch leader yields before taking its snapshot.
    ///
    /// Lookups issued by sibling futures or tasks during these rounds join
    /// the same batch. With `0` every leader snapshots immediately, which
    /// mostly defeats coalescing.
    pub coalesce_yields: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self { coalesce_yields: 1 }
    }
}

impl LoaderConfig {
    /// Creates a new configuration with the specified number of yields.
    pub fn with_coalesce_yields(mut self, coalesce_yields: usize) -> Self {
        self.coalesce_yields = coalesce_yields;
        self
    }
}
