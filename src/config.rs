use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub ai: AiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Maximum rows fetched from the source per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// Seconds after which a stale claim may be taken over by another runner.
    #[serde(default = "default_claim_timeout_secs")]
    pub claim_timeout_secs: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            claim_timeout_secs: default_claim_timeout_secs(),
        }
    }
}

fn default_batch_size() -> i64 {
    500
}
fn default_claim_timeout_secs() -> i64 {
    900
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    /// Keyset page size when collecting pending items.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,
    /// Maximum pending items submitted to the model per invocation.
    #[serde(default = "default_max_items")]
    pub max_items: i64,
    /// HTTP timeout for provider calls.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_items: default_max_items(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_chunk_size() -> i64 {
    10
}
fn default_max_items() -> i64 {
    20
}
fn default_timeout_secs() -> u64 {
    120
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.sync.batch_size < 1 {
        anyhow::bail!("sync.batch_size must be >= 1");
    }
    if config.sync.claim_timeout_secs < 1 {
        anyhow::bail!("sync.claim_timeout_secs must be >= 1");
    }
    if config.ai.chunk_size < 1 {
        anyhow::bail!("ai.chunk_size must be >= 1");
    }
    if config.ai.max_items < 1 {
        anyhow::bail!("ai.max_items must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let cfg: Config = toml::from_str("[db]\npath = \"data/proofsync.sqlite\"\n").unwrap();
        assert_eq!(cfg.sync.batch_size, 500);
        assert_eq!(cfg.ai.chunk_size, 10);
        assert_eq!(cfg.ai.max_items, 20);
    }

    #[test]
    fn rejects_zero_batch_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proofsync.toml");
        std::fs::write(&path, "[db]\npath = \"x.sqlite\"\n[sync]\nbatch_size = 0\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
