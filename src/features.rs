use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::WidgetBounds;
use crate::models::{Tunable, WeeklyRecord, WhatIf};

/// Temperature (°F) at which the quadratic term peaks.
pub const TEMPERATURE_OPTIMUM: f64 = 70.0;

pub const FEATURE_COUNT: usize = 6;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "store",
    "holiday",
    "temperature_quadratic",
    "fuel_price",
    "cpi",
    "unemployment",
];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} is missing or not a finite number")]
    NonFinite { field: &'static str },
    #[error("{field} = {value} is outside the allowed range {min}..={max}")]
    OutOfBounds {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("store {0} has no records in the dataset")]
    UnknownStore(u32),
    #[error("store {store_id} has no records on or before {date}")]
    NoBaseRecord { store_id: u32, date: NaiveDate },
    #[error("store {store_id} has more than one record for {date}")]
    DuplicateWeek { store_id: u32, date: NaiveDate },
    #[error("row {row}: {reason}")]
    MalformedRow { row: usize, reason: String },
    #[error("no weeks with recorded sales to train on")]
    NoTrainingData,
    #[error("sweep resolution must be at least 2, got {0}")]
    SweepResolution(usize),
}

/// Model input derived from a [`WeeklyRecord`]. Layout follows
/// [`FEATURE_NAMES`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn new(values: [f64; FEATURE_COUNT]) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn get(&self, index: usize) -> f64 {
        self.0[index]
    }
}

/// Peaks at [`TEMPERATURE_OPTIMUM`] and falls off symmetrically on both sides.
pub fn temperature_term(temperature: f64) -> f64 {
    -(temperature - TEMPERATURE_OPTIMUM).powi(2)
}

pub fn transform(record: &WeeklyRecord) -> Result<FeatureVector, ValidationError> {
    let temperature = finite("temperature", record.temperature)?;
    let fuel_price = finite("fuel_price", record.fuel_price)?;
    let cpi = finite("cpi", record.cpi)?;
    let unemployment = finite("unemployment", record.unemployment)?;

    Ok(FeatureVector::new([
        f64::from(record.store_id),
        if record.holiday_flag { 1.0 } else { 0.0 },
        temperature_term(temperature),
        fuel_price,
        cpi,
        unemployment,
    ]))
}

/// Returns a copy of `record` with every present override applied.
pub fn apply_what_if(record: &WeeklyRecord, what_if: &WhatIf) -> WeeklyRecord {
    let mut adjusted = record.clone();
    if let Some(holiday) = what_if.holiday_flag {
        adjusted.holiday_flag = holiday;
    }
    for feature in Tunable::ALL {
        if let Some(value) = what_if.get(feature) {
            feature.set(&mut adjusted, value);
        }
    }
    adjusted
}

pub fn check_bounds(what_if: &WhatIf, bounds: &WidgetBounds) -> Result<(), ValidationError> {
    for feature in Tunable::ALL {
        let Some(value) = what_if.get(feature) else {
            continue;
        };
        let field = field_name(feature);
        finite(field, value)?;

        let allowed = bounds.get(feature);
        if !allowed.contains(value) {
            return Err(ValidationError::OutOfBounds {
                field,
                value,
                min: allowed.min,
                max: allowed.max,
            });
        }
    }
    Ok(())
}

pub fn field_name(feature: Tunable) -> &'static str {
    match feature {
        Tunable::Temperature => "temperature",
        Tunable::FuelPrice => "fuel_price",
        Tunable::Cpi => "cpi",
        Tunable::Unemployment => "unemployment",
    }
}

fn finite(field: &'static str, value: f64) -> Result<f64, ValidationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ValidationError::NonFinite { field })
    }
}
