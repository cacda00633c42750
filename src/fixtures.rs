//! Shared test data and stub ensemble members.

use chrono::{Duration, NaiveDate};

use crate::data::SalesDataset;
use crate::ensemble::{ModelError, Regressor};
use crate::features::FeatureVector;
use crate::models::WeeklyRecord;

pub fn date(value: &str) -> NaiveDate {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
}

/// Store-week at the reference operating point: 70°F, $3.00 fuel, CPI 210,
/// 8% unemployment, no holiday.
pub fn record(store_id: u32, day: &str, sales: Option<f64>) -> WeeklyRecord {
    WeeklyRecord {
        store_id,
        date: date(day),
        holiday_flag: false,
        temperature: 70.0,
        fuel_price: 3.0,
        cpi: 210.0,
        unemployment: 8.0,
        sales,
    }
}

/// `weeks` consecutive weeks per store starting 2011-01-07 with inputs that
/// drift week over week so every tunable has a non-trivial observed range.
pub fn history(stores: &[u32], weeks: usize) -> SalesDataset {
    let start = date("2011-01-07");
    let mut records = Vec::new();
    for &store_id in stores {
        for week in 0..weeks {
            let w = week as f64;
            records.push(WeeklyRecord {
                store_id,
                date: start + Duration::weeks(week as i64),
                holiday_flag: week % 13 == 0,
                temperature: 40.0 + (w * 3.0) % 50.0,
                fuel_price: 2.8 + w * 0.02,
                cpi: 205.0 + w * 0.5,
                unemployment: 9.0 - w * 0.05,
                sales: Some(1_000_000.0 + store_id as f64 * 10_000.0 + w * 1_000.0),
            });
        }
    }
    SalesDataset::from_records(records).unwrap()
}

pub struct Constant {
    name: String,
    value: f64,
}

impl Constant {
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
        }
    }
}

impl Regressor for Constant {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, _features: &FeatureVector) -> Result<f64, ModelError> {
        Ok(self.value)
    }
}

/// Responds to every feature so sweeps produce distinct values.
pub struct Linear {
    name: String,
    intercept: f64,
    weights: [f64; crate::features::FEATURE_COUNT],
}

impl Linear {
    pub fn new(name: &str, intercept: f64, weights: [f64; crate::features::FEATURE_COUNT]) -> Self {
        Self {
            name: name.to_string(),
            intercept,
            weights,
        }
    }
}

impl Regressor for Linear {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        Ok(self.intercept
            + features
                .as_slice()
                .iter()
                .zip(self.weights.iter())
                .map(|(x, w)| x * w)
                .sum::<f64>())
    }
}

pub struct Failing {
    name: String,
}

impl Failing {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Regressor for Failing {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, _features: &FeatureVector) -> Result<f64, ModelError> {
        Err(ModelError::Prediction {
            model: self.name.clone(),
            reason: "injected fault".to_string(),
        })
    }
}
