//! Engine configuration and safety clamping.

use serde::{Deserialize, Serialize};

/// Engine options applied per `configure` call.
///
/// Persists in the engine process until superseded by the next call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Search thread count.
    #[serde(default = "default_threads")]
    pub threads: u32,
    /// Hash table size in megabytes.
    #[serde(default = "default_hash_mb")]
    pub hash_mb: u32,
    /// Number of principal variations to report (MultiPV).
    #[serde(default = "default_multi_pv")]
    pub multi_pv: u32,
    /// Neural network evaluation on/off.
    #[serde(default = "default_use_nnue")]
    pub use_nnue: bool,
}

fn default_threads() -> u32 {
    2
}

fn default_hash_mb() -> u32 {
    64
}

fn default_multi_pv() -> u32 {
    3
}

fn default_use_nnue() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            hash_mb: default_hash_mb(),
            multi_pv: default_multi_pv(),
            use_nnue: default_use_nnue(),
        }
    }
}

/// Device-protection ceilings applied to a config before transmission.
///
/// These are tunable, not hard-coded: callers on constrained devices can
/// construct stricter limits than the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Maximum thread count ever transmitted.
    #[serde(default = "default_max_threads")]
    pub max_threads: u32,
    /// Maximum hash size in megabytes ever transmitted.
    #[serde(default = "default_max_hash_mb")]
    pub max_hash_mb: u32,
}

fn default_max_threads() -> u32 {
    4
}

fn default_max_hash_mb() -> u32 {
    256
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_threads: default_max_threads(),
            max_hash_mb: default_max_hash_mb(),
        }
    }
}

impl SafetyLimits {
    /// Clamp a config to these ceilings, logging when a value was reduced.
    pub fn clamp(&self, config: &EngineConfig) -> EngineConfig {
        let threads = config.threads.min(self.max_threads);
        let hash_mb = config.hash_mb.min(self.max_hash_mb);

        if threads != config.threads {
            tracing::warn!(
                requested = config.threads,
                clamped = threads,
                "thread count clamped to safety ceiling"
            );
        }
        if hash_mb != config.hash_mb {
            tracing::warn!(
                requested = config.hash_mb,
                clamped = hash_mb,
                "hash size clamped to safety ceiling"
            );
        }

        EngineConfig {
            threads,
            hash_mb,
            ..config.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_hash_is_clamped() {
        let limits = SafetyLimits::default();
        let config = EngineConfig {
            hash_mb: 999,
            ..EngineConfig::default()
        };

        let clamped = limits.clamp(&config);
        assert_eq!(clamped.hash_mb, 256);
    }

    #[test]
    fn oversized_threads_are_clamped() {
        let limits = SafetyLimits::default();
        let config = EngineConfig {
            threads: 16,
            ..EngineConfig::default()
        };

        let clamped = limits.clamp(&config);
        assert_eq!(clamped.threads, 4);
    }

    #[test]
    fn values_within_limits_pass_through() {
        let limits = SafetyLimits::default();
        let config = EngineConfig {
            threads: 2,
            hash_mb: 128,
            multi_pv: 5,
            use_nnue: false,
        };

        let clamped = limits.clamp(&config);
        assert_eq!(clamped, config);
    }

    #[test]
    fn limits_are_tunable() {
        // A stricter profile for low-memory devices
        let limits = SafetyLimits {
            max_threads: 4,
            max_hash_mb: 32,
        };
        let config = EngineConfig {
            hash_mb: 64,
            ..EngineConfig::default()
        };

        assert_eq!(limits.clamp(&config).hash_mb, 32);
    }

    #[test]
    fn config_toml_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}
