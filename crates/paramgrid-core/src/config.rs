//! paramgrid.toml control-plane configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_STORE_PATH: &str = "/var/lib/paramgrid/state.redb";
const DEFAULT_DISSEMINATION_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HISTORY_MAX_ENTRIES: usize = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    pub store: Option<StoreConfig>,
    pub placement: Option<PlacementConfig>,
    pub history: Option<HistoryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Skip nodes that already have this version placed in the namespace.
    pub skip_already_placed: Option<bool>,
    /// Per-node dissemination timeout, e.g. "10s" or "500ms".
    pub dissemination_timeout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub max_entries: Option<usize>,
}

impl ControlPlaneConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: ControlPlaneConfig = toml::from_str(content)?;
        if let Some(raw) = config
            .placement
            .as_ref()
            .and_then(|p| p.dissemination_timeout.as_deref())
        {
            parse_duration(raw)
                .ok_or_else(|| anyhow::anyhow!("invalid dissemination_timeout: {raw}"))?;
        }
        if config.history.as_ref().and_then(|h| h.max_entries) == Some(0) {
            anyhow::bail!("history.max_entries must be at least 1");
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn store_path(&self) -> PathBuf {
        self.store
            .as_ref()
            .and_then(|s| s.path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH))
    }

    pub fn skip_already_placed(&self) -> bool {
        self.placement
            .as_ref()
            .and_then(|p| p.skip_already_placed)
            .unwrap_or(false)
    }

    pub fn dissemination_timeout(&self) -> Duration {
        self.placement
            .as_ref()
            .and_then(|p| p.dissemination_timeout.as_deref())
            .and_then(parse_duration)
            .unwrap_or(DEFAULT_DISSEMINATION_TIMEOUT)
    }

    pub fn history_max_entries(&self) -> usize {
        self.history
            .as_ref()
            .and_then(|h| h.max_entries)
            .unwrap_or(DEFAULT_HISTORY_MAX_ENTRIES)
    }
}

/// Parse `"500ms"`, `"5s"`, `"2m"` or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
