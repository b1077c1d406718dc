use crate::core::rates::RatePair;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExchangeRateProviderConfig {
    pub base_url: String,
}

impl Default for ExchangeRateProviderConfig {
    fn default() -> Self {
        ExchangeRateProviderConfig {
            base_url: "https://api.exchangerate-api.com".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub exchange_rate: ExchangeRateProviderConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RefreshConfig {
    /// Hours between scheduled refreshes; also the age at which cached rates are stale.
    pub interval_hours: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        RefreshConfig { interval_hours: 24 }
    }
}

/// A century; longer intervals overflow timer deadlines.
const MAX_INTERVAL_HOURS: u64 = 100 * 365 * 24;

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        let hours = self.interval_hours.clamp(1, MAX_INTERVAL_HOURS);
        Duration::from_secs(hours.saturating_mul(60 * 60))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnnotateConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_fee_keywords")]
    pub fee_keywords: Vec<String>,
    /// Rates used when nothing has been fetched yet.
    #[serde(default)]
    pub fallback_rates: Option<RatePair>,
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_fee_keywords() -> Vec<String> {
    ["shipping", "warehouse", "handling"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for AnnotateConfig {
    fn default() -> Self {
        AnnotateConfig {
            debounce_ms: default_debounce_ms(),
            fee_keywords: default_fee_keywords(),
            fallback_rates: None,
        }
    }
}

impl AnnotateConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub annotate: AnnotateConfig,
    pub data_path: Option<String>,
}

impl AppConfig {
    /// Loads the default config file, or the built-in defaults when there is none.
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!(
                "No config at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io.github", "yen-to-freedom", "yen-to-freedom")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("io.github", "yen-to-freedom", "yen-to-freedom")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        // An empty document deserializes to unit, not to a map
        if config_str.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rates::Currency;

    #[test]
    fn test_config_deserialization() {
        let yaml_str = r#"
providers:
  exchange_rate:
    base_url: "http://example.com/rates"
refresh:
  interval_hours: 12
annotate:
  debounce_ms: 250
  fee_keywords: ["shipping"]
  fallback_rates:
    USD: 0.0067
    EUR: 0.0062
data_path: "/tmp/yen"
"#;

        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        assert_eq!(
            config.providers.exchange_rate.base_url,
            "http://example.com/rates"
        );
        assert_eq!(config.refresh.interval(), Duration::from_secs(12 * 3600));
        assert_eq!(config.annotate.debounce(), Duration::from_millis(250));
        assert_eq!(config.annotate.fee_keywords, vec!["shipping".to_string()]);
        let fallback = config.annotate.fallback_rates.unwrap();
        assert_eq!(fallback.get(Currency::USD), 0.0067);
        assert_eq!(config.data_path.as_deref(), Some("/tmp/yen"));
    }

    #[test]
    fn test_config_defaults_for_missing_sections() {
        let config: AppConfig = serde_yaml::from_str("data_path: null").unwrap();
        assert_eq!(
            config.providers.exchange_rate.base_url,
            "https://api.exchangerate-api.com"
        );
        assert_eq!(config.refresh.interval_hours, 24);
        assert_eq!(config.annotate.debounce_ms, 100);
        assert_eq!(
            config.annotate.fee_keywords,
            vec!["shipping", "warehouse", "handling"]
        );
        assert!(config.annotate.fallback_rates.is_none());
    }

    #[test]
    fn test_invalid_fallback_rates_are_rejected() {
        let yaml_str = r#"
annotate:
  fallback_rates:
    USD: 0
    EUR: 0.0062
"#;
        assert!(serde_yaml::from_str::<AppConfig>(yaml_str).is_err());
    }

    #[test]
    fn test_load_empty_file_gives_defaults() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.refresh.interval_hours, 24);
    }

    #[test]
    fn test_interval_is_clamped() {
        let zero = RefreshConfig { interval_hours: 0 };
        assert_eq!(zero.interval(), Duration::from_secs(3600));

        let huge = RefreshConfig {
            interval_hours: u64::MAX,
        };
        assert_eq!(
            huge.interval(),
            Duration::from_secs(MAX_INTERVAL_HOURS * 3600)
        );
        assert!(chrono::Duration::from_std(huge.interval()).is_ok());
        assert!(tokio::time::Instant::now().checked_add(huge.interval()).is_some());
    }
}
