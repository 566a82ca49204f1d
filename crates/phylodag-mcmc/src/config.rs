//! Chain configuration.
//!
//! Every field has a default, so a configuration file only needs to name
//! what it changes.

use serde::{Deserialize, Serialize};

use crate::error::McmcError;
use crate::schedule::ScheduleKind;

/// Settings for a single chain or a tempered ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Generations to run after construction.
    #[serde(default = "default_generations")]
    pub generations: u64,
    /// Leading generations during which moves are tuned and no samples are
    /// recorded.
    #[serde(default = "default_burnin")]
    pub burnin: u64,
    /// Generations between tuning steps during burn-in.
    #[serde(default = "default_tune_interval")]
    pub tune_interval: u64,
    /// Record one sample every `thinning` generations after burn-in.
    #[serde(default = "default_thinning")]
    pub thinning: u64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Generations between full re-evaluations of the graph. Zero disables
    /// resynchronisation.
    #[serde(default = "default_resync_interval")]
    pub resync_interval: u64,
    #[serde(default)]
    pub schedule: ScheduleKind,
    /// One heat per chain. The first chain must be the cold one (heat 1).
    #[serde(default = "default_heats")]
    pub heats: Vec<f64>,
    /// Generations between swap attempts of a tempered ensemble.
    #[serde(default = "default_swap_interval")]
    pub swap_interval: u64,
}

fn default_generations() -> u64 {
    10_000
}

fn default_burnin() -> u64 {
    1_000
}

fn default_tune_interval() -> u64 {
    100
}

fn default_thinning() -> u64 {
    10
}

fn default_seed() -> u64 {
    42
}

fn default_resync_interval() -> u64 {
    1_000
}

fn default_heats() -> Vec<f64> {
    vec![1.0]
}

fn default_swap_interval() -> u64 {
    100
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            generations: default_generations(),
            burnin: default_burnin(),
            tune_interval: default_tune_interval(),
            thinning: default_thinning(),
            seed: default_seed(),
            resync_interval: default_resync_interval(),
            schedule: ScheduleKind::default(),
            heats: default_heats(),
            swap_interval: default_swap_interval(),
        }
    }
}

impl ChainConfig {
    /// Parses a JSON configuration; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, McmcError> {
        let config: ChainConfig = serde_json::from_str(text)
            .map_err(|e| McmcError::config(format!("malformed chain configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings no chain can run with.
    pub fn validate(&self) -> Result<(), McmcError> {
        if self.thinning == 0 {
            return Err(McmcError::config("thinning must be at least 1"));
        }
        if self.tune_interval == 0 {
            return Err(McmcError::config("tune_interval must be at least 1"));
        }
        if self.swap_interval == 0 {
            return Err(McmcError::config("swap_interval must be at least 1"));
        }
        if self.heats.is_empty() {
            return Err(McmcError::config("at least one heat is required"));
        }
        if let Some(bad) = self.heats.iter().find(|&&h| !(h > 0.0 && h <= 1.0)) {
            return Err(McmcError::config(format!("heat {} is outside (0, 1]", bad)));
        }
        if self.heats[0] != 1.0 {
            return Err(McmcError::config(format!(
                "the first heat must be 1 (the cold chain), got {}",
                self.heats[0]
            )));
        }
        Ok(())
    }

    /// Number of chains this configuration describes.
    pub fn num_chains(&self) -> usize {
        self.heats.len()
    }

    /// Evenly spaced heats `1 / (1 + delta * i)` for `chains` chains.
    pub fn incremental_heats(chains: usize, delta: f64) -> Vec<f64> {
        (0..chains).map(|i| 1.0 / (1.0 + delta * i as f64)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_is_default() {
        assert_eq!(ChainConfig::from_json("{}").unwrap(), ChainConfig::default());
    }

    #[test]
    fn partial_json_overrides_fields() {
        let config =
            ChainConfig::from_json(r#"{"generations": 500, "schedule": "sequential"}"#).unwrap();
        assert_eq!(config.generations, 500);
        assert_eq!(config.schedule, ScheduleKind::Sequential);
        assert_eq!(config.burnin, default_burnin());
    }

    #[test]
    fn validation_rejects_nonsense() {
        let bad = [
            r#"{"thinning": 0}"#,
            r#"{"heats": []}"#,
            r#"{"heats": [1.0, 1.5]}"#,
            r#"{"heats": [0.5, 1.0]}"#,
            r#"{"swap_interval": 0}"#,
        ];
        for text in bad {
            assert!(
                matches!(ChainConfig::from_json(text), Err(McmcError::InvalidConfig { .. })),
                "accepted {}",
                text
            );
        }
        assert!(ChainConfig::from_json("not json").is_err());
    }

    #[test]
    fn incremental_heats_start_cold() {
        let heats = ChainConfig::incremental_heats(3, 0.5);
        assert_eq!(heats, vec![1.0, 1.0 / 1.5, 0.5]);
    }
}
