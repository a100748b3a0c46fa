// ⚙️ Engine Configuration - TOML tunables + logging setup
// Every section defaults to the built-in constants; an empty file is valid

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing_subscriber::{fmt, EnvFilter};

use crate::attributes::AttributeSettings;
use crate::error::EngineError;
use crate::opportunity::OpportunitySettings;
use crate::pipeline::PipelineSettings;
use crate::reconciliation::ReconciliationSettings;
use crate::snapshot::PriceSource;
use crate::validation::ValidationSettings;

// ============================================================================
// LOGGING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,

    /// "pretty" or "json"
    pub format: String,
}

impl LoggingConfig {
    /// Install the global subscriber. RUST_LOG wins over `level`.
    ///
    /// Only the binary calls this; the library never installs a subscriber.
    pub fn init(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format.as_str() {
            "json" => {
                fmt().json().with_env_filter(filter).init();
            }
            _ => {
                fmt().with_env_filter(filter).init();
            }
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub logging: LoggingConfig,
    pub pipeline: PipelineSettings,
    pub validation: ValidationSettings,
    pub reconciliation: ReconciliationSettings,
    pub opportunity: OpportunitySettings,
    pub attributes: AttributeSettings,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the engine's output meaningless
    pub fn validate(&self) -> Result<(), EngineError> {
        for source in PriceSource::ALL {
            let bounds = self.validation.bounds.get(source);
            if !(bounds.min > 0.0 && bounds.min < bounds.max) {
                return Err(EngineError::Config(format!(
                    "bounds for {} must satisfy 0 < min < max (min {}, max {})",
                    source, bounds.min, bounds.max
                )));
            }
        }

        let reconciliation = &self.reconciliation;
        for (name, priority) in [
            ("graded_priority", &reconciliation.graded_priority),
            ("raw_priority", &reconciliation.raw_priority),
        ] {
            for entry in priority {
                if !(entry.weight > 0.0 && entry.weight <= 1.0) {
                    return Err(EngineError::Config(format!(
                        "{} weight for {} must be in (0, 1], got {}",
                        name, entry.source, entry.weight
                    )));
                }
            }
        }

        if reconciliation.max_confidence > 100 || reconciliation.fallback_confidence > 100 {
            return Err(EngineError::Config("confidence values must not exceed 100".to_string()));
        }
        for source in PriceSource::ALL {
            if reconciliation.base_confidence.get(source) > 100 {
                return Err(EngineError::Config(format!(
                    "base confidence for {} must not exceed 100",
                    source
                )));
            }
        }

        let opportunity = &self.opportunity;
        for (name, bands) in [
            ("default_bands", &opportunity.default_bands),
            ("graded_high_value_bands", &opportunity.graded_high_value_bands),
            ("vintage_bands", &opportunity.vintage_bands),
        ] {
            if !bands.is_ascending() {
                return Err(EngineError::Config(format!("{} must be strictly ascending", name)));
            }
        }

        for (company, tiers) in &self.attributes.premium_tables {
            if tiers.iter().any(|t| t.multiplier < 1.0) {
                return Err(EngineError::Config(format!(
                    "premium multipliers for {} must be at least 1.0",
                    company
                )));
            }
        }

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::MatchMode;
    use crate::reconciliation::PremiumPolicy;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let toml = r#"
            [logging]
            format = "json"

            [pipeline]
            batch_limit = 250
            workers = 2
            match_mode = "exact"

            [validation.bounds.tcgplayer]
            min = 1.0
            max = 50000.0

            [reconciliation]
            premium_policy = "raw_proxy_only"
            fallback_confidence = 35
        "#;

        let config = EngineConfig::from_toml(toml).unwrap();

        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.pipeline.batch_limit, Some(250));
        assert_eq!(config.pipeline.match_mode, MatchMode::Exact);
        assert_eq!(config.validation.bounds.tcgplayer.min, 1.0);
        assert_eq!(config.validation.bounds.ebay_sold.min, 1.0);
        assert_eq!(config.reconciliation.premium_policy, PremiumPolicy::RawProxyOnly);
        assert_eq!(config.reconciliation.fallback_confidence, 35);
        assert_eq!(config.reconciliation.max_confidence, 99);
    }

    #[test]
    fn test_priority_lists_from_toml() {
        let toml = r#"
            [reconciliation]
            raw_priority = [
                { source = "cardmarket", weight = 1.0 },
                { source = "tcgplayer", weight = 0.9 },
            ]
        "#;

        let config = EngineConfig::from_toml(toml).unwrap();
        assert_eq!(config.reconciliation.raw_priority.len(), 2);
        assert_eq!(config.reconciliation.raw_priority[0].source, PriceSource::Cardmarket);
    }

    #[test]
    fn test_rejects_floor_above_ceiling() {
        let toml = r#"
            [validation.bounds.ebay_sold]
            min = 500.0
            max = 100.0
        "#;

        let err = EngineConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("ebay_sold"));
    }

    #[test]
    fn test_rejects_bad_weight_and_bands() {
        let mut config = EngineConfig::default();
        config.reconciliation.graded_priority[1].weight = 1.5;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.opportunity.vintage_bands.good_deal = 2.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.reconciliation.max_confidence = 120;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[opportunity]\nmateriality_threshold = 250.0").unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.opportunity.materiality_threshold, 250.0);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(EngineConfig::load(Path::new("/nonexistent/card-valuation.toml")).is_err());
    }
}
