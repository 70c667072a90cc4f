//! Loop configuration

/// Configuration for a virtual-time runtime.
#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// Virtual time at loop construction.
    pub start_time: f64,
    /// Minimum schedulable granularity reported to consumers. Not enforced.
    pub clock_resolution: f64,
    /// Upper bound on `run_once` calls per driver invocation.
    pub max_iterations: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            clock_resolution: 1e-9,
            max_iterations: 200_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoopConfig::default();
        assert_eq!(config.start_time, 0.0);
        assert_eq!(config.clock_resolution, 1e-9);
        assert_eq!(config.max_iterations, 200_000);
    }
}
