//! Engine configuration: tuning parameters and market levels.
//!
//! Read once at engine construction and immutable for the run. Loadable
//! from TOML with per-field defaults.

use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Tuning parameters and market state for one engine run.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Date the run values the world at (synthesizer horizon start).
    pub valuation_date: NaiveDate,

    /// Cap on subsets examined per leaf before the search degrades to
    /// pairs-only.
    #[serde(default = "default_subset_cap")]
    pub subset_cap: u32,

    /// Deepest tree level allowed to re-run allocation when absorbing
    /// residuals. The root (level 0) is always unconstrained.
    #[serde(default = "default_depth_cap")]
    pub depth_cap: u32,

    /// Annual inflation, in percent (for the no-COLA annuity synthesizer).
    #[serde(default)]
    pub inflation_pct: f64,

    /// S&P 500 level at its known high.
    #[serde(default)]
    pub sp_high: Option<f64>,

    /// S&P 500 level at the last close.
    #[serde(default)]
    pub sp_close: Option<f64>,

    /// S&P 500 level today.
    #[serde(default)]
    pub sp_today: Option<f64>,
}

fn default_subset_cap() -> u32 {
    4096
}

fn default_depth_cap() -> u32 {
    2
}

impl EngineConfig {
    /// Configuration with defaults for everything but the valuation date.
    pub fn new(valuation_date: NaiveDate) -> Self {
        Self {
            valuation_date,
            subset_cap: default_subset_cap(),
            depth_cap: default_depth_cap(),
            inflation_pct: 0.0,
            sp_high: None,
            sp_close: None,
            sp_today: None,
        }
    }

    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: EngineConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML string (useful for testing).
    pub fn from_toml(toml: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate config invariants.
    pub(crate) fn validate(&self) -> Result<()> {
        for (name, level) in [
            ("sp_high", self.sp_high),
            ("sp_close", self.sp_close),
            ("sp_today", self.sp_today),
        ] {
            if let Some(v) = level {
                if !v.is_finite() || v < 0.0 {
                    return Err(Error::Config(format!("{name} must be >= 0, got {v}")));
                }
            }
        }
        if !self.inflation_pct.is_finite() || self.inflation_pct <= -100.0 {
            return Err(Error::Config(format!(
                "inflation_pct must be > -100, got {}",
                self.inflation_pct
            )));
        }
        Ok(())
    }

    /// True if the close-vs-today equity adjustment is active.
    pub fn close_adjust_active(&self) -> bool {
        self.sp_today.is_some() && self.sp_close.is_some()
    }

    /// True if the hyperbolic high-vs-today adjustment can run (the
    /// portfolio must additionally declare an increase-at-zero).
    pub fn high_adjust_possible(&self) -> bool {
        self.sp_today.is_some() && self.sp_high.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_toml() -> &'static str {
        r#"
valuation_date = "2024-07-01"
subset_cap = 2048
depth_cap = 3
inflation_pct = 2.5
sp_high = 5600.0
sp_close = 5450.0
sp_today = 5500.0
"#
    }

    #[test]
    fn parse_example_config() {
        let config = EngineConfig::from_toml(example_toml()).unwrap();
        assert_eq!(
            config.valuation_date,
            NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()
        );
        assert_eq!(config.subset_cap, 2048);
        assert_eq!(config.depth_cap, 3);
        assert_eq!(config.inflation_pct, 2.5);
        assert_eq!(config.sp_high, Some(5600.0));
        assert!(config.close_adjust_active());
        assert!(config.high_adjust_possible());
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let config = EngineConfig::from_toml("valuation_date = \"2024-01-15\"").unwrap();
        assert_eq!(config.subset_cap, 4096);
        assert_eq!(config.depth_cap, 2);
        assert_eq!(config.inflation_pct, 0.0);
        assert!(config.sp_high.is_none());
        assert!(!config.close_adjust_active());
        assert!(!config.high_adjust_possible());
    }

    #[test]
    fn validate_catches_negative_sp() {
        let toml = "valuation_date = \"2024-01-15\"\nsp_today = -1.0";
        assert!(EngineConfig::from_toml(toml).is_err());
    }

    #[test]
    fn validate_catches_bad_inflation() {
        let toml = "valuation_date = \"2024-01-15\"\ninflation_pct = -150.0";
        assert!(EngineConfig::from_toml(toml).is_err());
    }

    #[test]
    fn close_without_high_still_adjusts() {
        let toml = "valuation_date = \"2024-01-15\"\nsp_close = 5000.0\nsp_today = 5100.0";
        let config = EngineConfig::from_toml(toml).unwrap();
        assert!(config.close_adjust_active());
        assert!(!config.high_adjust_possible());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, example_toml()).unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.subset_cap, 2048);
    }

    #[test]
    fn load_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        assert!(matches!(
            EngineConfig::load(&path),
            Err(Error::ConfigRead { .. })
        ));
    }
}
