//! Pipeline configuration.
//!
//! Resolved once at startup and handed to each component by value.
//! Nothing reads the environment after `SmrConfig` is built.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ── Integrity ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    /// Quarantine every upload linked to a live cemetery record.
    pub quarantine_on_flag: bool,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            quarantine_on_flag: true,
        }
    }
}

// ── Heat spike detection ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Spike declared when spike / baseline >= this multiplier.
    pub spike_threshold: Decimal,
    /// Baseline window: [upload - baseline_start_days, upload - baseline_end_days].
    pub baseline_start_days: i64,
    pub baseline_end_days: i64,
    /// Spike window: [upload, upload + spike_window_days].
    pub spike_window_days: i64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            spike_threshold: Decimal::new(200, 2),
            baseline_start_days: 15,
            baseline_end_days: 8,
            spike_window_days: 7,
        }
    }
}

// ── Attribution windows ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    pub window_days: i64,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self { window_days: 90 }
    }
}

// ── Geofence ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeofenceConfig {
    /// Percentage of the bounty share added on a postal-code match.
    pub bonus_pct: Decimal,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            bonus_pct: Decimal::new(200, 2),
        }
    }
}

// ── Settlement ──────────────────────────────────────────────────────

pub const DEFAULT_PROVIDER_ACCOUNT: &str = "provider-default";
pub const DEFAULT_OPERATING_ACCOUNT: &str = "operations";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub bounties_enabled: bool,
    /// Used when no active preferred provider contract exists.
    pub default_provider_account_id: String,
    pub operating_account_id: String,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            bounties_enabled: true,
            default_provider_account_id: DEFAULT_PROVIDER_ACCOUNT.into(),
            operating_account_id: DEFAULT_OPERATING_ACCOUNT.into(),
        }
    }
}

// ── Top level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SmrConfig {
    pub integrity: IntegrityConfig,
    pub detection: DetectionConfig,
    pub attribution: AttributionConfig,
    pub geofence: GeofenceConfig,
    pub settlement: SettlementConfig,
}

impl SmrConfig {
    /// Load from a JSON file. Missing sections and keys take defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: SmrConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with `SMR_*` environment overrides applied.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Layer `SMR_*` environment variables over this config.
    pub fn with_env_overrides(mut self) -> anyhow::Result<Self> {
        if let Some(v) = env_value::<Decimal>("SMR_SPIKE_THRESHOLD")? {
            self.detection.spike_threshold = v;
        }
        if let Some(v) = env_value::<i64>("SMR_WINDOW_DAYS")? {
            self.attribution.window_days = v;
        }
        if let Some(v) = env_value::<Decimal>("SMR_GEOFENCE_BONUS_PCT")? {
            self.geofence.bonus_pct = v;
        }
        if let Some(v) = env_flag("SMR_BOUNTIES_ENABLED")? {
            self.settlement.bounties_enabled = v;
        }
        if let Some(v) = env_value::<String>("SMR_DEFAULT_PROVIDER_ACCOUNT")? {
            self.settlement.default_provider_account_id = v;
        }
        if let Some(v) = env_value::<String>("SMR_OPERATING_ACCOUNT")? {
            self.settlement.operating_account_id = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let d = &self.detection;
        if d.spike_threshold <= Decimal::ZERO {
            anyhow::bail!("spike_threshold must be positive (got {})", d.spike_threshold);
        }
        if d.baseline_end_days < 1 || d.baseline_start_days < d.baseline_end_days {
            anyhow::bail!(
                "baseline window must satisfy start >= end >= 1 (got {}..{})",
                d.baseline_start_days,
                d.baseline_end_days
            );
        }
        if d.spike_window_days < 0 {
            anyhow::bail!("spike_window_days must not be negative");
        }
        if self.attribution.window_days < 1 {
            anyhow::bail!("window_days must be at least 1 (got {})", self.attribution.window_days);
        }
        if self.geofence.bonus_pct < Decimal::ZERO {
            anyhow::bail!("geofence bonus_pct must not be negative");
        }
        if self.settlement.default_provider_account_id.trim().is_empty()
            || self.settlement.operating_account_id.trim().is_empty()
        {
            anyhow::bail!("settlement account ids must not be empty");
        }
        Ok(())
    }

    /// Config with hardcoded defaults for use in tests.
    /// Never consults the environment.
    pub fn default_test() -> Self {
        Self {
            settlement: SettlementConfig {
                default_provider_account_id: "provider-fallback".into(),
                operating_account_id: "ngn-operations".into(),
                ..SettlementConfig::default()
            },
            ..Self::default()
        }
    }
}

fn env_value<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {name}={raw}: {e}")),
        Err(_) => Ok(None),
    }
}

fn env_flag(name: &str) -> anyhow::Result<Option<bool>> {
    match env_value::<String>(name)? {
        None => Ok(None),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => anyhow::bail!("Invalid {name}={raw}: expected a boolean"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SmrConfig::default();
        config.validate().unwrap();
        assert_eq!(config.detection.spike_threshold, Decimal::new(2, 0));
        assert_eq!(config.attribution.window_days, 90);
        assert!(config.integrity.quarantine_on_flag);
        SmrConfig::default_test().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: SmrConfig = serde_json::from_str(
            r#"{"attribution": {"window_days": 30}, "geofence": {"bonus_pct": "3.5"}}"#,
        )
        .unwrap();
        assert_eq!(config.attribution.window_days, 30);
        assert_eq!(config.geofence.bonus_pct, Decimal::new(35, 1));
        assert_eq!(config.detection.baseline_start_days, 15);
        assert_eq!(config.settlement.operating_account_id, DEFAULT_OPERATING_ACCOUNT);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = SmrConfig::default();
        config.detection.spike_threshold = Decimal::ZERO;
        assert!(config.validate().is_err());

        let mut config = SmrConfig::default();
        config.attribution.window_days = 0;
        assert!(config.validate().is_err());

        let mut config = SmrConfig::default();
        config.detection.baseline_end_days = 20;
        assert!(config.validate().is_err(), "baseline window must not invert");

        let mut config = SmrConfig::default();
        config.settlement.operating_account_id = " ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(SmrConfig::load("/nonexistent/smr-config.json").is_err());
    }
}
