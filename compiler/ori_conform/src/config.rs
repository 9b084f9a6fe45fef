/// Tuning knobs for conformance resolution.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct ConformanceConfig {
    /// Upper bound on entries a single context may accumulate while
    /// expanding implied conformances. Exceeding it means protocol
    /// inheritance is circular; expansion stops with a diagnostic.
    pub implied_expansion_cap: usize,
}

impl ConformanceConfig {
    #[must_use]
    pub fn with_implied_expansion_cap(mut self, cap: usize) -> Self {
        self.implied_expansion_cap = cap;
        self
    }
}

impl Default for ConformanceConfig {
    fn default() -> Self {
        ConformanceConfig {
            implied_expansion_cap: 16384,
        }
    }
}
