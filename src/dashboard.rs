use chrono::NaiveDate;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Bounds, DashboardSettings, RangeSource};
use crate::data::SalesDataset;
use crate::ensemble::{self, Ensemble, ModelError};
use crate::features::{self, ValidationError};
use crate::models::{
    CurvePoint, Dashboard, Kpis, Prediction, SensitivityCurve, TrendOverlay, TrendPoint, Tunable,
    WeeklyRecord, WhatIf,
};

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Widget values for one interaction.
#[derive(Debug, Clone)]
pub struct Selection {
    pub store_id: u32,
    pub date: NaiveDate,
    pub what_if: WhatIf,
}

/// Recomputes every panel from the current selection. Holds only borrowed,
/// read-only state loaded at startup.
pub struct Controller<'a> {
    dataset: &'a SalesDataset,
    ensemble: &'a Ensemble,
    settings: &'a DashboardSettings,
}

impl<'a> Controller<'a> {
    pub fn new(
        dataset: &'a SalesDataset,
        ensemble: &'a Ensemble,
        settings: &'a DashboardSettings,
    ) -> Self {
        Self {
            dataset,
            ensemble,
            settings,
        }
    }

    /// Base record for the selection with the what-if overrides applied.
    pub fn resolve(&self, selection: &Selection) -> Result<WeeklyRecord, DashboardError> {
        features::check_bounds(&selection.what_if, &self.settings.bounds)?;
        let base = self.dataset.base_record(selection.store_id, selection.date)?;
        let mut record = features::apply_what_if(base, &selection.what_if);
        record.date = selection.date;
        if base.date != selection.date {
            record.sales = None;
        }

        for feature in Tunable::ALL {
            self.warn_if_extrapolating(feature, feature.value(&record));
        }
        Ok(record)
    }

    pub fn predict_record(&self, record: &WeeklyRecord) -> Result<Prediction, DashboardError> {
        let features = features::transform(record)?;
        let members = self.ensemble.predict_members(&features)?;
        let value = ensemble::average(&members);
        Ok(Prediction {
            value,
            inputs: record.clone(),
            features,
            members,
        })
    }

    pub fn predict(&self, selection: &Selection) -> Result<Prediction, DashboardError> {
        let record = self.resolve(selection)?;
        self.predict_record(&record)
    }

    pub fn kpis(&self, store_id: u32, prediction: &Prediction) -> Kpis {
        let average_sales = self.dataset.average_sales(store_id);
        let delta_percent = average_sales
            .filter(|average| *average != 0.0)
            .map(|average| (prediction.value - average) / average * 100.0);
        Kpis {
            predicted_sales: prediction.value,
            average_sales,
            delta_percent,
        }
    }

    /// Actual sales for the trailing weeks next to what the ensemble predicts
    /// from each week's own record.
    pub fn trend(&self, selection: &Selection, reference: f64) -> Result<TrendOverlay, DashboardError> {
        let recent = self
            .dataset
            .recent_sales(selection.store_id, selection.date, self.settings.trend_weeks);

        let mut points = Vec::with_capacity(recent.len());
        for record in recent {
            let Some(actual_sales) = record.sales else {
                continue;
            };
            let features = features::transform(record)?;
            points.push(TrendPoint {
                date: record.date,
                actual_sales,
                predicted_sales: self.ensemble.predict(&features)?,
            });
        }

        Ok(TrendOverlay { points, reference })
    }

    /// Sweeps one input across its range with everything else held at
    /// `record`. Points outside the training data are reported, not refused.
    pub fn sensitivity(
        &self,
        record: &WeeklyRecord,
        feature: Tunable,
    ) -> Result<SensitivityCurve, DashboardError> {
        let resolution = self.settings.sweep_resolution;
        if resolution < 2 {
            return Err(ValidationError::SweepResolution(resolution).into());
        }

        let range = self.sweep_range(feature);
        let mut swept = record.clone();
        let mut points = Vec::with_capacity(resolution);
        for x in linspace(range, resolution) {
            feature.set(&mut swept, x);
            let features = features::transform(&swept)?;
            points.push(CurvePoint {
                x,
                y: self.ensemble.predict(&features)?,
            });
        }

        let current = features::transform(record)?;
        let operating_point = CurvePoint {
            x: feature.value(record),
            y: self.ensemble.predict(&current)?,
        };
        debug!(?feature, min = range.min, max = range.max, resolution, "sensitivity swept");

        Ok(SensitivityCurve {
            feature,
            range_source: self.settings.sweep_range,
            points,
            operating_point,
        })
    }

    pub fn render(&self, selection: &Selection) -> Result<Dashboard, DashboardError> {
        let render_id = Uuid::new_v4();
        let record = self.resolve(selection)?;
        let base_date = self
            .dataset
            .base_record(selection.store_id, selection.date)?
            .date;
        let prediction = self.predict_record(&record)?;
        let kpis = self.kpis(selection.store_id, &prediction);
        let trend = self.trend(selection, prediction.value)?;
        let sensitivity = Tunable::ALL
            .iter()
            .map(|&feature| self.sensitivity(&record, feature))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            %render_id,
            store_id = selection.store_id,
            date = %selection.date,
            prediction = prediction.value,
            "dashboard rendered"
        );

        Ok(Dashboard {
            render_id,
            store_id: selection.store_id,
            date: selection.date,
            base_date,
            prediction,
            kpis,
            trend,
            sensitivity,
        })
    }

    fn sweep_range(&self, feature: Tunable) -> Bounds {
        match self.settings.sweep_range {
            RangeSource::Bounds => self.settings.bounds.get(feature),
            RangeSource::Observed => self
                .dataset
                .observed_range(feature)
                .map(|(min, max)| Bounds::new(min, max))
                .unwrap_or_else(|| self.settings.bounds.get(feature)),
        }
    }

    fn warn_if_extrapolating(&self, feature: Tunable, value: f64) {
        if let Some((min, max)) = self.dataset.observed_range(feature) {
            if value < min || value > max {
                warn!(
                    ?feature,
                    value,
                    min,
                    max,
                    "input lies outside the observed training range"
                );
            }
        }
    }
}

/// `count` evenly spaced values from `range.min` to `range.max` inclusive.
fn linspace(range: Bounds, count: usize) -> Vec<f64> {
    let step = (range.max - range.min) / (count - 1) as f64;
    (0..count)
        .map(|i| {
            if i == count - 1 {
                range.max
            } else {
                range.min + step * i as f64
            }
        })
        .collect()
}
