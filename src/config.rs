//! Engine settings.
//!
//! All fields are optional in the TOML source and fall back to the same
//! defaults the `Default` impl uses. Settings are read at resolution time,
//! so a runtime swap via [`crate::PermissionEngine::set_config`] takes
//! effect on the next cache fill.

use anyhow::Context as _;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Toggles and mappings consumed during resolution.
#[derive(Debug, Clone, Deserialize)]
pub struct SettingsConfig {
    /// Interpret `r=`-prefixed server/world values as regular expressions.
    #[serde(default = "default_true")]
    pub applying_regex: bool,

    /// Expand shorthand (`{a,b}` / `(a|b)`) permissions in exports.
    #[serde(default = "default_true")]
    pub applying_shorthand: bool,

    /// Expand `*` wildcard permissions in downstream calculators.
    #[serde(default = "default_true")]
    pub applying_wildcards: bool,

    /// Use the Sponge-style wildcard form in downstream calculators.
    #[serde(default)]
    pub applying_sponge_wildcards: bool,

    /// Fallback weight per group (lowercased name), used when a group
    /// declares no `weight.<n>` node.
    #[serde(default)]
    pub group_weights: HashMap<String, i64>,

    /// Idle period after which keyed inheritance cache entries may be
    /// evicted. Advisory: results are always recomputable.
    #[serde(default = "default_cache_idle_expiry_secs")]
    pub cache_idle_expiry_secs: u64,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            applying_regex: default_true(),
            applying_shorthand: default_true(),
            applying_wildcards: default_true(),
            applying_sponge_wildcards: false,
            group_weights: HashMap::new(),
            cache_idle_expiry_secs: default_cache_idle_expiry_secs(),
        }
    }
}

impl SettingsConfig {
    /// Parse settings from a TOML string.
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        let mut config: Self = toml::from_str(source).context("failed to parse settings")?;
        config.normalize();
        Ok(config)
    }

    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&source)
    }

    /// Fallback weight for a group, by case-insensitive name.
    pub fn group_weight(&self, name: &str) -> Option<i64> {
        self.group_weights.get(&name.to_lowercase()).copied()
    }

    pub fn cache_idle_expiry(&self) -> Duration {
        Duration::from_secs(self.cache_idle_expiry_secs)
    }

    /// Emit warnings for inconsistent knob combinations.
    pub fn warn_inconsistent(&self) {
        if self.applying_sponge_wildcards && !self.applying_wildcards {
            tracing::warn!(
                "applying_sponge_wildcards is enabled but applying_wildcards is off; \
                 the sponge variant will have no effect"
            );
        }
    }

    fn normalize(&mut self) {
        // Group weight keys match against lowercased holder names
        self.group_weights = self
            .group_weights
            .drain()
            .map(|(name, weight)| (name.to_lowercase(), weight))
            .collect();
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_idle_expiry_secs() -> u64 {
    600
}
