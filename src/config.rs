use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MnemaConfig {
    pub storage: StorageConfig,
    pub decay: DecayConfig,
    pub lifecycle: LifecycleConfig,
    pub review: ReviewConfig,
    pub cluster: ClusterConfig,
    pub ltm: LtmConfig,
    pub search: SearchConfig,
    pub maintenance: MaintenanceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding memories.jsonl, relations.jsonl, and the lock file.
    pub storage_root: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DecayConfig {
    /// One of "exponential", "power_law", "two_component".
    pub decay_model: String,
    pub half_life_days: f64,
    /// Power-law shape.
    pub alpha: f64,
    pub tc_lambda_fast: f64,
    pub tc_lambda_slow: f64,
    pub tc_weight_fast: f64,
    /// Use-count exponent.
    pub beta: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LifecycleConfig {
    pub forget_threshold: f64,
    pub promote_threshold: f64,
    pub promote_use_count: u32,
    pub promote_time_window_days: f64,
    pub pinned_strength_floor: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReviewConfig {
    /// Jaccard similarity below which a touch counts as cross-domain.
    pub cross_domain_threshold: f64,
    pub touch_boost: f64,
    pub cross_domain_boost: f64,
    /// Fraction of search slots reserved for review candidates.
    pub blend_ratio: f64,
    pub danger_zone_low: f64,
    pub danger_zone_high: f64,
    /// Seconds since last touch under which review priority is zeroed.
    pub recency_suppression_secs: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClusterConfig {
    pub link_threshold: f64,
    pub max_cluster_size: usize,
    /// One of "similarity", "tag_overlap", "temporal", "hybrid".
    pub strategy: String,
    /// Window for the temporal strategy, in seconds.
    pub temporal_window_secs: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LtmConfig {
    /// Markdown vault root. Empty string disables the LTM side.
    pub vault_path: String,
    /// Index file path; empty means `<storage_root>/ltm_index.jsonl`.
    pub index_path: String,
    /// Subdirectory of the vault receiving promoted notes.
    pub promotion_subdir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub stm_weight: f64,
    pub ltm_weight: f64,
    pub default_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub compaction_tombstone_ratio: f64,
    /// File-size blowup factor over active payload that also triggers compaction.
    pub compaction_size_factor: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for MnemaConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            decay: DecayConfig::default(),
            lifecycle: LifecycleConfig::default(),
            review: ReviewConfig::default(),
            cluster: ClusterConfig::default(),
            ltm: LtmConfig::default(),
            search: SearchConfig::default(),
            maintenance: MaintenanceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let storage_root = default_mnema_dir()
            .join("store")
            .to_string_lossy()
            .into_owned();
        Self { storage_root }
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            decay_model: "power_law".into(),
            half_life_days: 3.0,
            alpha: 1.1,
            tc_lambda_fast: 1.603e-5,
            tc_lambda_slow: 1.147e-6,
            tc_weight_fast: 0.7,
            beta: 0.6,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            forget_threshold: 0.05,
            promote_threshold: 0.65,
            promote_use_count: 5,
            promote_time_window_days: 14.0,
            pinned_strength_floor: 1.8,
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            cross_domain_threshold: 0.3,
            touch_boost: 0.1,
            cross_domain_boost: 0.15,
            blend_ratio: 0.3,
            danger_zone_low: 0.15,
            danger_zone_high: 0.35,
            recency_suppression_secs: 3600,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            link_threshold: 0.83,
            max_cluster_size: 12,
            strategy: "hybrid".into(),
            temporal_window_secs: 86_400,
        }
    }
}

impl Default for LtmConfig {
    fn default() -> Self {
        Self {
            vault_path: String::new(),
            index_path: String::new(),
            promotion_subdir: "stm-promoted".into(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            stm_weight: 1.0,
            ltm_weight: 0.8,
            default_limit: 10,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 3600,
            compaction_tombstone_ratio: 0.3,
            compaction_size_factor: 10.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

/// Returns `~/.mnema/`
pub fn default_mnema_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".mnema")
}

/// Returns the default config file path: `~/.mnema/config.toml`
pub fn default_config_path() -> PathBuf {
    default_mnema_dir().join("config.toml")
}

impl MnemaConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MnemaConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (MNEMA_STORE, MNEMA_VAULT,
    /// MNEMA_DECAY_MODEL, MNEMA_HALF_LIFE_DAYS, MNEMA_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MNEMA_STORE") {
            self.storage.storage_root = val;
        }
        if let Ok(val) = std::env::var("MNEMA_VAULT") {
            self.ltm.vault_path = val;
        }
        if let Ok(val) = std::env::var("MNEMA_DECAY_MODEL") {
            self.decay.decay_model = val;
        }
        if let Ok(val) = std::env::var("MNEMA_HALF_LIFE_DAYS") {
            if let Ok(days) = val.parse() {
                self.decay.half_life_days = days;
            }
        }
        if let Ok(val) = std::env::var("MNEMA_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Resolve the storage root, expanding `~` if needed.
    pub fn resolved_storage_root(&self) -> PathBuf {
        expand_tilde(&self.storage.storage_root)
    }

    /// Resolve the vault path, if configured.
    pub fn resolved_vault_path(&self) -> Option<PathBuf> {
        if self.ltm.vault_path.is_empty() {
            None
        } else {
            Some(expand_tilde(&self.ltm.vault_path))
        }
    }

    /// Resolve the LTM index file path, defaulting next to the JSONL store.
    pub fn resolved_ltm_index_path(&self) -> PathBuf {
        if self.ltm.index_path.is_empty() {
            self.resolved_storage_root().join("ltm_index.jsonl")
        } else {
            expand_tilde(&self.ltm.index_path)
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
