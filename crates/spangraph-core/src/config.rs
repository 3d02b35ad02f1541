//! Engine configuration loaded from `spangraph.toml`

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name, looked up in the repository root.
pub const CONFIG_FILE: &str = "spangraph.toml";

/// Well-known extractor ids, in descending precision.
pub const SCIP_EXTRACTOR: &str = "scip";
pub const LSP_EXTRACTOR: &str = "lsp";
pub const HEURISTIC_EXTRACTOR: &str = "heuristic";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub builder: BuilderConfig,
    pub sidecar: SidecarConfig,
    pub lsp: LspConfig,
    pub traversal: TraversalConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    pub extractors: Vec<String>,
    pub timeout_ms: u64,
    pub max_edges_per_extractor: usize,
    pub confidence_threshold: f32,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            extractors: vec![
                SCIP_EXTRACTOR.to_string(),
                LSP_EXTRACTOR.to_string(),
                HEURISTIC_EXTRACTOR.to_string(),
            ],
            timeout_ms: 5_000,
            max_edges_per_extractor: 1_000,
            confidence_threshold: 0.5,
        }
    }
}

impl BuilderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// External indexer invoked as `<binary> index --project-root <dir> --output - [--files ...]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    pub binary: PathBuf,
    pub extra_args: Vec<String>,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("scip-index"),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LspConfig {
    /// Server binary; `None` leaves the LSP extractor unsupported.
    pub command: Option<String>,
    pub args: Vec<String>,
    pub request_timeout_ms: u64,
}

impl Default for LspConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            request_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    pub max_depth: usize,
    pub token_budget: usize,
    pub performance_threshold_ms: u64,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            token_budget: 4_000,
            performance_threshold_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub max_age_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            max_age_secs: 300,
            cleanup_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(GraphError::InvalidConfig("cache.max_entries must be > 0".into()));
        }
        if self.max_age_secs == 0 {
            return Err(GraphError::InvalidConfig("cache.max_age_secs must be > 0".into()));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(GraphError::InvalidConfig(
                "cache.cleanup_interval_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Parse a TOML document. Missing tables and keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| GraphError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `spangraph.toml` from `root` if present, otherwise defaults.
    pub fn discover(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        let b = &self.builder;
        if !(0.0..=1.0).contains(&b.confidence_threshold) {
            return Err(GraphError::InvalidConfig(format!(
                "builder.confidence_threshold must be within [0, 1], got {}",
                b.confidence_threshold
            )));
        }
        if b.timeout_ms == 0 {
            return Err(GraphError::InvalidConfig("builder.timeout_ms must be > 0".into()));
        }
        if b.max_edges_per_extractor == 0 {
            return Err(GraphError::InvalidConfig(
                "builder.max_edges_per_extractor must be > 0".into(),
            ));
        }
        if self.lsp.request_timeout_ms == 0 {
            return Err(GraphError::InvalidConfig("lsp.request_timeout_ms must be > 0".into()));
        }
        self.cache.validate()
    }
}
