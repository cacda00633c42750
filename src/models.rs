use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RangeSource;
use crate::features::FeatureVector;

/// One store-week from the source dataset. `sales` is absent for weeks that
/// have not happened yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyRecord {
    pub store_id: u32,
    pub date: NaiveDate,
    pub holiday_flag: bool,
    pub temperature: f64,
    pub fuel_price: f64,
    pub cpi: f64,
    pub unemployment: f64,
    pub sales: Option<f64>,
}

/// User overrides layered on top of a base record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WhatIf {
    pub holiday_flag: Option<bool>,
    pub temperature: Option<f64>,
    pub fuel_price: Option<f64>,
    pub cpi: Option<f64>,
    pub unemployment: Option<f64>,
}

impl WhatIf {
    pub fn get(&self, feature: Tunable) -> Option<f64> {
        match feature {
            Tunable::Temperature => self.temperature,
            Tunable::FuelPrice => self.fuel_price,
            Tunable::Cpi => self.cpi,
            Tunable::Unemployment => self.unemployment,
        }
    }
}

/// The four inputs a user can sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Tunable {
    Temperature,
    FuelPrice,
    Cpi,
    Unemployment,
}

impl Tunable {
    pub const ALL: [Tunable; 4] = [
        Tunable::Temperature,
        Tunable::FuelPrice,
        Tunable::Cpi,
        Tunable::Unemployment,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Tunable::Temperature => "Temperature (°F)",
            Tunable::FuelPrice => "Fuel Price ($/gal)",
            Tunable::Cpi => "CPI",
            Tunable::Unemployment => "Unemployment Rate (%)",
        }
    }

    pub fn value(&self, record: &WeeklyRecord) -> f64 {
        match self {
            Tunable::Temperature => record.temperature,
            Tunable::FuelPrice => record.fuel_price,
            Tunable::Cpi => record.cpi,
            Tunable::Unemployment => record.unemployment,
        }
    }

    pub fn set(&self, record: &mut WeeklyRecord, value: f64) {
        match self {
            Tunable::Temperature => record.temperature = value,
            Tunable::FuelPrice => record.fuel_price = value,
            Tunable::Cpi => record.cpi = value,
            Tunable::Unemployment => record.unemployment = value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberPrediction {
    pub model: String,
    pub value: f64,
}

/// An ensemble estimate together with the inputs that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub value: f64,
    pub inputs: WeeklyRecord,
    pub features: FeatureVector,
    pub members: Vec<MemberPrediction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Kpis {
    pub predicted_sales: f64,
    pub average_sales: Option<f64>,
    pub delta_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub actual_sales: f64,
    pub predicted_sales: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendOverlay {
    pub points: Vec<TrendPoint>,
    /// The current what-if prediction, drawn as a flat reference line.
    pub reference: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CurvePoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SensitivityCurve {
    pub feature: Tunable,
    pub range_source: RangeSource,
    pub points: Vec<CurvePoint>,
    pub operating_point: CurvePoint,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub render_id: Uuid,
    pub store_id: u32,
    pub date: NaiveDate,
    /// Date of the record the what-if overrides were applied to.
    pub base_date: NaiveDate,
    pub prediction: Prediction,
    pub kpis: Kpis,
    pub trend: TrendOverlay,
    pub sensitivity: Vec<SensitivityCurve>,
}
