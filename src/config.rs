//! Engine configuration
//!
//! Debug switches are read from the process environment exactly once at
//! startup and passed explicitly into [`Tree::new`](crate::tree::Tree::new);
//! nothing in the evaluator re-parses the environment lazily.

use once_cell::sync::Lazy;

/// Configuration for the reactive evaluation core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Log every identifier resolution and expression evaluation at trace level
    pub trace_evaluation: bool,
    /// Log subscription creation/release and watch/unwatch hook invocations
    pub trace_subscriptions: bool,
    /// Maximum consecutive rule re-evaluations of one node without an
    /// intervening external change before the node is parked with a warning.
    /// Bounds oscillation from pathological cyclic rules.
    pub convergence_cap: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trace_evaluation: false,
            trace_subscriptions: false,
            convergence_cap: 64,
        }
    }
}

static PROCESS_CONFIG: Lazy<EngineConfig> = Lazy::new(EngineConfig::read_env);

impl EngineConfig {
    /// Configuration parsed from the process environment, computed once per
    /// process on first use.
    ///
    /// Recognized variables: `AXTREE_TRACE_EVAL`, `AXTREE_TRACE_SUBSCRIPTIONS`
    /// (truthy: `1`, `true`, `yes`), `AXTREE_CONVERGENCE_CAP` (integer).
    pub fn from_env() -> Self {
        PROCESS_CONFIG.clone()
    }

    fn read_env() -> Self {
        let defaults = Self::default();
        Self {
            trace_evaluation: env_flag("AXTREE_TRACE_EVAL"),
            trace_subscriptions: env_flag("AXTREE_TRACE_SUBSCRIPTIONS"),
            convergence_cap: std::env::var("AXTREE_CONVERGENCE_CAP")
                .ok()
                .and_then(|raw| raw.trim().parse().ok())
                .unwrap_or(defaults.convergence_cap),
        }
    }
}

fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(raw.trim(), "1" | "true" | "yes" | "on"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert!(!config.trace_evaluation);
        assert!(!config.trace_subscriptions);
        assert_eq!(config.convergence_cap, 64);
    }
}
