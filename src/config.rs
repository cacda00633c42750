use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::models::Tunable;

/// Settings loaded from the optional `--config` TOML file. Every field has a
/// default so a partial file only overrides what it names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub dashboard: DashboardSettings,
    pub training: TrainingSettings,
}

impl ForecastConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: ForecastConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeSource {
    /// Min and max of the feature across the loaded dataset.
    Observed,
    /// The widget bounds below.
    Bounds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    pub trend_weeks: usize,
    pub sweep_resolution: usize,
    pub sweep_range: RangeSource,
    pub bounds: WidgetBounds,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            trend_weeks: 20,
            sweep_resolution: 100,
            sweep_range: RangeSource::Observed,
            bounds: WidgetBounds::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Allowed what-if values per tunable input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetBounds {
    pub temperature: Bounds,
    pub fuel_price: Bounds,
    pub cpi: Bounds,
    pub unemployment: Bounds,
}

impl WidgetBounds {
    pub fn get(&self, feature: Tunable) -> Bounds {
        match feature {
            Tunable::Temperature => self.temperature,
            Tunable::FuelPrice => self.fuel_price,
            Tunable::Cpi => self.cpi,
            Tunable::Unemployment => self.unemployment,
        }
    }
}

impl Default for WidgetBounds {
    fn default() -> Self {
        Self {
            temperature: Bounds::new(20.0, 120.0),
            fuel_price: Bounds::new(2.0, 5.0),
            cpi: Bounds::new(200.0, 300.0),
            unemployment: Bounds::new(3.0, 15.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// Trailing weeks per store kept out of fitting and used for metrics.
    pub holdout_weeks: usize,
    pub bagging: BaggingParams,
    pub gradient_boosting: BoostingParams,
    pub stochastic_boosting: BoostingParams,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            holdout_weeks: 8,
            bagging: BaggingParams::default(),
            gradient_boosting: BoostingParams {
                n_estimators: 200,
                learning_rate: 0.1,
                subsample: 1.0,
                tree: TreeParams {
                    max_depth: 4,
                    min_samples_split: 4,
                    min_samples_leaf: 2,
                },
                seed: 7,
            },
            stochastic_boosting: BoostingParams {
                n_estimators: 400,
                learning_rate: 0.05,
                subsample: 0.8,
                tree: TreeParams {
                    max_depth: 3,
                    min_samples_split: 8,
                    min_samples_leaf: 4,
                },
                seed: 11,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 10,
            min_samples_split: 4,
            min_samples_leaf: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaggingParams {
    pub n_trees: usize,
    pub tree: TreeParams,
    pub seed: u64,
}

impl Default for BaggingParams {
    fn default() -> Self {
        Self {
            n_trees: 50,
            tree: TreeParams::default(),
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    /// Fraction of rows drawn without replacement for each stage.
    pub subsample: f64,
    pub tree: TreeParams,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            subsample: 1.0,
            tree: TreeParams {
                max_depth: 3,
                ..TreeParams::default()
            },
            seed: 7,
        }
    }
}
