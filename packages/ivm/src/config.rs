use serde::{Deserialize, Serialize};

/// How queries with a `limit` are maintained.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LimitStrategy {
    /// Re-run the root query and diff against the cached window.
    #[default]
    Recompute,
}

impl std::str::FromStr for LimitStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "recompute" => Ok(LimitStrategy::Recompute),
            other => Err(format!("unknown limit strategy `{other}`")),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct IvmConfig {
    /// Yield to the runtime after this many processed entities (0 disables).
    pub yield_every: usize,
    /// Callers need per-entity change sets; disables the full-recompute shortcut.
    pub track_changes: bool,
    pub fast_insert_path: bool,
    pub limit_strategy: LimitStrategy,
}

impl Default for IvmConfig {
    fn default() -> Self {
        Self {
            yield_every: 100,
            track_changes: false,
            fast_insert_path: true,
            limit_strategy: LimitStrategy::Recompute,
        }
    }
}

pub fn load_config() -> IvmConfig {
    let defaults = IvmConfig::default();
    IvmConfig {
        yield_every: env_parse("IVM_YIELD_EVERY").unwrap_or(defaults.yield_every),
        track_changes: env_parse("IVM_TRACK_CHANGES").unwrap_or(defaults.track_changes),
        fast_insert_path: env_parse("IVM_FAST_INSERT_PATH").unwrap_or(defaults.fast_insert_path),
        limit_strategy: env_parse("IVM_LIMIT_STRATEGY").unwrap_or(defaults.limit_strategy),
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: IvmConfig = serde_json::from_str(r#"{ "trackChanges": true }"#).unwrap();
        assert!(config.track_changes);
        assert_eq!(config.yield_every, 100);
        assert_eq!(config.limit_strategy, LimitStrategy::Recompute);
    }

    #[test]
    fn test_load_config_reads_environment() {
        std::env::set_var("IVM_YIELD_EVERY", "7");
        std::env::set_var("IVM_FAST_INSERT_PATH", "not-a-bool");
        let config = load_config();
        std::env::remove_var("IVM_YIELD_EVERY");
        std::env::remove_var("IVM_FAST_INSERT_PATH");

        assert_eq!(config.yield_every, 7);
        assert!(config.fast_insert_path);
    }
}
