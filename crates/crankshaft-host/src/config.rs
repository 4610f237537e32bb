use std::path::{Path, PathBuf};

use crankshaft_kernel::DriverConfig;
use serde::{Deserialize, Serialize};

use crate::error::{HostError, HostResult};

pub const ENV_STATE_DIR: &str = "CRANKSHAFT_STATE_DIR";
pub const ENV_CRANK_BUDGET: &str = "CRANKSHAFT_CRANK_BUDGET";
pub const ENV_VERBOSE_BLOCKS: &str = "CRANKSHAFT_VERBOSE_BLOCKS";
pub const ENV_LOG: &str = "CRANKSHAFT_LOG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Root for the `kernel/` and `mailbox/` stores.
    pub state_dir: PathBuf,
    pub driver: DriverConfig,
    /// Log block begin/commit at info level.
    pub verbose_blocks: bool,
    /// Pending requests a port queues before callers wait.
    pub port_queue_capacity: usize,
    /// Fallback `tracing` filter directive when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("state"),
            driver: DriverConfig::default(),
            verbose_blocks: false,
            port_queue_capacity: 64,
            log_filter: "info".into(),
        }
    }
}

impl HostConfig {
    /// Defaults overridden by `CRANKSHAFT_*` environment variables.
    pub fn from_env() -> HostResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`HostConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> HostResult<Self> {
        let mut config = Self::default();
        if let Some(dir) = lookup(ENV_STATE_DIR) {
            config.state_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(ENV_CRANK_BUDGET) {
            config.driver.crank_budget = raw.trim().parse().map_err(|err| {
                HostError::Config(format!("{ENV_CRANK_BUDGET}={raw:?}: {err}"))
            })?;
        }
        if let Some(raw) = lookup(ENV_VERBOSE_BLOCKS) {
            config.verbose_blocks = parse_flag(&raw).ok_or_else(|| {
                HostError::Config(format!("{ENV_VERBOSE_BLOCKS}={raw:?} is not a flag"))
            })?;
        }
        if let Some(filter) = lookup(ENV_LOG) {
            config.log_filter = filter;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> HostResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|err| HostError::Config(format!("reading {}: {err}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|err| HostError::Config(format!("parsing {}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> HostResult<()> {
        self.driver
            .validate()
            .map_err(|err| HostError::Config(err.to_string()))?;
        if self.port_queue_capacity == 0 {
            return Err(HostError::Config(
                "port_queue_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn kernel_store_dir(&self) -> PathBuf {
        self.state_dir.join("kernel")
    }

    pub fn mailbox_store_dir(&self) -> PathBuf {
        self.state_dir.join("mailbox")
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn env_overrides_defaults() {
        let config = HostConfig::from_lookup(lookup(&[
            (ENV_STATE_DIR, "/var/lib/bridge"),
            (ENV_CRANK_BUDGET, "3"),
            (ENV_VERBOSE_BLOCKS, "true"),
            (ENV_LOG, "crankshaft_host=debug"),
        ]))
        .unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/bridge"));
        assert_eq!(config.driver.crank_budget, 3);
        assert!(config.verbose_blocks);
        assert_eq!(config.log_filter, "crankshaft_host=debug");
        assert_eq!(config.kernel_store_dir(), PathBuf::from("/var/lib/bridge/kernel"));
    }

    #[test]
    fn empty_env_is_default() {
        assert_eq!(
            HostConfig::from_lookup(|_| None).unwrap(),
            HostConfig::default()
        );
    }

    #[test]
    fn bad_values_are_config_errors() {
        for vars in [
            [(ENV_CRANK_BUDGET, "lots")],
            [(ENV_CRANK_BUDGET, "0")],
            [(ENV_VERBOSE_BLOCKS, "maybe")],
        ] {
            let err = HostConfig::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, HostError::Config(_)), "{err}");
        }
    }

    #[test]
    fn json_file_with_partial_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.json");
        std::fs::write(
            &path,
            r#"{"state_dir": "/tmp/x", "driver": {"crank_budget": 7}, "verbose_blocks": true}"#,
        )
        .unwrap();
        let config = HostConfig::from_json_file(&path).unwrap();
        assert_eq!(config.driver.crank_budget, 7);
        assert_eq!(config.port_queue_capacity, 64);
        assert!(config.verbose_blocks);

        assert!(matches!(
            HostConfig::from_json_file(dir.path().join("missing.json")),
            Err(HostError::Config(_))
        ));
    }
}
