use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::classify::{ThresholdError, Thresholds};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Thresholds(#[from] ThresholdError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusteringConfig {
    pub clusters: usize,
    pub random_state: u64,
    pub n_init: usize,
    pub min_samples: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            clusters: 3,
            random_state: 42,
            n_init: 10,
            min_samples: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoincConfig {
    pub code: String,
    pub display: String,
    pub system: String,
    pub unit_system: String,
}

impl Default for LoincConfig {
    fn default() -> Self {
        Self {
            code: "87705-0".to_string(),
            display: "Sedentary activity 24 hour".to_string(),
            system: "http://loinc.org".to_string(),
            unit_system: "http://unitsofmeasure.org".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsConfig {
    pub thresholds: Thresholds,
    pub clustering: ClusteringConfig,
    pub samples_per_minute: u32,
    pub loinc: LoincConfig,
    pub server_address: String,
    pub sse_heartbeat: Duration,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            clustering: ClusteringConfig::default(),
            samples_per_minute: 600,
            loinc: LoincConfig::default(),
            server_address: "0.0.0.0:8000".to_string(),
            sse_heartbeat: Duration::from_secs(5),
        }
    }
}

impl AnalyticsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup, falling back to
    /// defaults for absent keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AnalyticsConfig::default();

        let fidget = parse_or(&lookup, "THRESH_FIDGET", defaults.thresholds.fidget)?;
        let active = parse_or(&lookup, "THRESH_ACTIVE", defaults.thresholds.active)?;
        let thresholds = Thresholds::new(fidget, active)?;

        let clustering = ClusteringConfig {
            clusters: parse_or(&lookup, "ML_KMEANS_CLUSTERS", defaults.clustering.clusters)?,
            random_state: parse_or(
                &lookup,
                "ML_KMEANS_RANDOM_STATE",
                defaults.clustering.random_state,
            )?,
            n_init: parse_or(&lookup, "ML_KMEANS_N_INIT", defaults.clustering.n_init)?,
            min_samples: parse_or(
                &lookup,
                "ML_MIN_SAMPLES_FOR_CLUSTERING",
                defaults.clustering.min_samples,
            )?,
        };
        if clustering.n_init == 0 {
            return Err(invalid("ML_KMEANS_N_INIT", "0", "must be at least 1"));
        }

        let samples_per_minute: u32 =
            parse_or(&lookup, "ML_SAMPLES_PER_MINUTE", defaults.samples_per_minute)?;
        if samples_per_minute == 0 {
            return Err(invalid("ML_SAMPLES_PER_MINUTE", "0", "must be positive"));
        }

        let loinc = LoincConfig {
            code: lookup("LOINC_CODE").unwrap_or(defaults.loinc.code),
            display: lookup("LOINC_DISPLAY").unwrap_or(defaults.loinc.display),
            system: lookup("LOINC_SYSTEM").unwrap_or(defaults.loinc.system),
            unit_system: lookup("FHIR_SYSTEM").unwrap_or(defaults.loinc.unit_system),
        };

        let heartbeat_secs: u64 = parse_or(&lookup, "SSE_HEARTBEAT_SECONDS", 5)?;
        if heartbeat_secs == 0 {
            return Err(invalid("SSE_HEARTBEAT_SECONDS", "0", "must be positive"));
        }

        Ok(Self {
            thresholds,
            clustering,
            samples_per_minute,
            loinc,
            server_address: lookup("SERVER_ADDRESS").unwrap_or(defaults.server_address),
            sse_heartbeat: Duration::from_secs(heartbeat_secs),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|err| invalid(key, &raw, &err.to_string())),
        None => Ok(default),
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AnalyticsConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AnalyticsConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, AnalyticsConfig::default());
        assert_eq!(config.thresholds.fidget, 0.020);
        assert_eq!(config.clustering.min_samples, 100);
        assert_eq!(config.loinc.code, "87705-0");
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("THRESH_FIDGET", "0.015"),
            ("THRESH_ACTIVE", " 0.05 "),
            ("ML_KMEANS_CLUSTERS", "4"),
            ("ML_SAMPLES_PER_MINUTE", "60"),
            ("LOINC_DISPLAY", "Custom"),
            ("SSE_HEARTBEAT_SECONDS", "2"),
        ])
        .unwrap();
        assert_eq!(config.thresholds, Thresholds::new(0.015, 0.05).unwrap());
        assert_eq!(config.clustering.clusters, 4);
        assert_eq!(config.samples_per_minute, 60);
        assert_eq!(config.loinc.display, "Custom");
        assert_eq!(config.sse_heartbeat, Duration::from_secs(2));
    }

    #[test]
    fn malformed_values_are_reported_by_key() {
        let err = config_from(&[("ML_KMEANS_N_INIT", "ten")]).unwrap_err();
        assert!(err.to_string().contains("ML_KMEANS_N_INIT"));

        let err = config_from(&[("ML_SAMPLES_PER_MINUTE", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "ML_SAMPLES_PER_MINUTE", .. }));
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let err = config_from(&[("THRESH_FIDGET", "0.05"), ("THRESH_ACTIVE", "0.02")]).unwrap_err();
        assert!(matches!(err, ConfigError::Thresholds(ThresholdError::Unordered { .. })));
    }
}
