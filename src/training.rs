//! Offline fitting of the three ensemble members.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{BaggingParams, BoostingParams, TrainingSettings};
use crate::data::SalesDataset;
use crate::ensemble::{BaggedTrees, BoostedTrees, ModelArtifact, ModelError, Regressor};
use crate::features::{self, FeatureVector, ValidationError};
use crate::models::WeeklyRecord;
use crate::tree::RegressionTree;

pub const BAGGED_TREES: &str = "bagged_trees";
pub const GRADIENT_BOOSTING: &str = "gradient_boosting";
pub const STOCHASTIC_BOOSTING: &str = "stochastic_boosting";

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Feature vectors paired with observed weekly sales.
#[derive(Debug, Clone, Default)]
pub struct TrainingSet {
    pub features: Vec<FeatureVector>,
    pub targets: Vec<f64>,
}

impl TrainingSet {
    /// Weeks without recorded sales are skipped.
    pub fn from_records<'a, I>(records: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = &'a WeeklyRecord>,
    {
        let mut set = Self::default();
        for record in records {
            let Some(sales) = record.sales else {
                continue;
            };
            set.features.push(features::transform(record)?);
            set.targets.push(sales);
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegressionMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
}

impl RegressionMetrics {
    pub fn compute(actual: &[f64], predicted: &[f64]) -> Option<Self> {
        let n = actual.len();
        if n == 0 || n != predicted.len() {
            return None;
        }

        let mse = actual
            .iter()
            .zip(predicted)
            .map(|(a, p)| (a - p).powi(2))
            .sum::<f64>()
            / n as f64;
        let mae = actual
            .iter()
            .zip(predicted)
            .map(|(a, p)| (a - p).abs())
            .sum::<f64>()
            / n as f64;
        let mean = actual.iter().sum::<f64>() / n as f64;
        let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
        let r2 = if ss_tot > 0.0 {
            1.0 - mse * n as f64 / ss_tot
        } else {
            0.0
        };

        Some(Self {
            rmse: mse.sqrt(),
            mae,
            r2,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HoldoutScore {
    pub model: String,
    pub metrics: RegressionMetrics,
}

pub struct TrainingOutcome {
    pub artifacts: Vec<ModelArtifact>,
    pub train_rows: usize,
    pub holdout_rows: usize,
    /// One entry per member followed by the ensemble average. Empty when
    /// nothing was held out.
    pub holdout: Vec<HoldoutScore>,
}

/// Splits each store's weeks with sales into a training prefix and the last
/// `holdout_weeks` weeks.
pub fn split_holdout(
    dataset: &SalesDataset,
    holdout_weeks: usize,
) -> (Vec<&WeeklyRecord>, Vec<&WeeklyRecord>) {
    let mut train = Vec::new();
    let mut holdout = Vec::new();
    for store_id in dataset.stores() {
        let observed: Vec<&WeeklyRecord> = dataset
            .store_history(store_id)
            .iter()
            .filter(|record| record.sales.is_some())
            .collect();
        let cut = observed.len().saturating_sub(holdout_weeks);
        train.extend_from_slice(&observed[..cut]);
        holdout.extend_from_slice(&observed[cut..]);
    }
    (train, holdout)
}

pub fn fit_bagged(set: &TrainingSet, name: &str, params: &BaggingParams) -> BaggedTrees {
    let n = set.len();
    let trees = (0..params.n_trees.max(1))
        .map(|i| {
            let mut rng = ChaCha8Rng::seed_from_u64(params.seed.wrapping_add(i as u64));
            let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n.max(1))).collect();
            let tree = RegressionTree::fit(&set.features, &set.targets, &sample, &params.tree);
            debug!(model = name, tree = i, depth = tree.depth(), nodes = tree.node_count(), "bagged tree fitted");
            tree
        })
        .collect();

    BaggedTrees {
        name: name.to_string(),
        trees,
    }
}

pub fn fit_boosted(set: &TrainingSet, name: &str, params: &BoostingParams) -> BoostedTrees {
    let n = set.len();
    let base = if n == 0 {
        0.0
    } else {
        set.targets.iter().sum::<f64>() / n as f64
    };
    let mut current = vec![base; n];
    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let sample_size = ((n as f64 * params.subsample.clamp(0.0, 1.0)).round() as usize).clamp(1, n.max(1));
    let mut rows: Vec<usize> = (0..n).collect();
    let mut trees = Vec::with_capacity(params.n_estimators);

    for stage in 0..params.n_estimators {
        let residuals: Vec<f64> = set
            .targets
            .iter()
            .zip(&current)
            .map(|(target, fitted)| target - fitted)
            .collect();

        if sample_size < n {
            rows.shuffle(&mut rng);
        }
        let sample = &rows[..sample_size.min(n)];
        let tree = RegressionTree::fit(&set.features, &residuals, sample, &params.tree);

        for (fitted, features) in current.iter_mut().zip(&set.features) {
            *fitted += params.learning_rate * tree.predict(features);
        }
        trees.push(tree);

        if stage % 50 == 0 {
            debug!(model = name, stage, "boosting stage fitted");
        }
    }

    BoostedTrees {
        name: name.to_string(),
        base,
        learning_rate: params.learning_rate,
        trees,
    }
}

/// Fits every member on the training split and scores it on the holdout.
pub fn train(
    dataset: &SalesDataset,
    settings: &TrainingSettings,
) -> Result<TrainingOutcome, TrainingError> {
    let (train_records, holdout_records) = split_holdout(dataset, settings.holdout_weeks);
    let train_set = TrainingSet::from_records(train_records)?;
    let holdout_set = TrainingSet::from_records(holdout_records)?;
    if train_set.is_empty() {
        return Err(ValidationError::NoTrainingData.into());
    }
    info!(
        train_rows = train_set.len(),
        holdout_rows = holdout_set.len(),
        "fitting ensemble members"
    );

    let bagged = fit_bagged(&train_set, BAGGED_TREES, &settings.bagging);
    info!(model = BAGGED_TREES, trees = bagged.trees.len(), "member fitted");
    let gradient = fit_boosted(&train_set, GRADIENT_BOOSTING, &settings.gradient_boosting);
    info!(model = GRADIENT_BOOSTING, trees = gradient.trees.len(), "member fitted");
    let stochastic = fit_boosted(&train_set, STOCHASTIC_BOOSTING, &settings.stochastic_boosting);
    info!(model = STOCHASTIC_BOOSTING, trees = stochastic.trees.len(), "member fitted");

    let members: [&dyn Regressor; 3] = [&bagged, &gradient, &stochastic];
    let holdout = score_holdout(&holdout_set, &members)?;
    for score in &holdout {
        info!(
            model = %score.model,
            rmse = score.metrics.rmse,
            mae = score.metrics.mae,
            r2 = score.metrics.r2,
            "holdout score"
        );
    }

    Ok(TrainingOutcome {
        artifacts: vec![
            ModelArtifact::BaggedTrees(bagged),
            ModelArtifact::BoostedTrees(gradient),
            ModelArtifact::BoostedTrees(stochastic),
        ],
        train_rows: train_set.len(),
        holdout_rows: holdout_set.len(),
        holdout,
    })
}

/// Any member failure on a holdout week fails the run.
fn score_holdout(
    set: &TrainingSet,
    members: &[&dyn Regressor],
) -> Result<Vec<HoldoutScore>, ModelError> {
    if set.is_empty() {
        return Ok(Vec::new());
    }

    let mut per_member: Vec<Vec<f64>> = Vec::with_capacity(members.len());
    for member in members {
        let predictions = set
            .features
            .iter()
            .map(|features| member.predict(features))
            .collect::<Result<Vec<f64>, ModelError>>()?;
        per_member.push(predictions);
    }

    let averaged: Vec<f64> = (0..set.len())
        .map(|row| per_member.iter().map(|p| p[row]).sum::<f64>() / per_member.len() as f64)
        .collect();

    let mut scores: Vec<HoldoutScore> = members
        .iter()
        .zip(&per_member)
        .filter_map(|(member, predictions)| {
            RegressionMetrics::compute(&set.targets, predictions).map(|metrics| HoldoutScore {
                model: member.name().to_string(),
                metrics,
            })
        })
        .collect();
    if let Some(metrics) = RegressionMetrics::compute(&set.targets, &averaged) {
        scores.push(HoldoutScore {
            model: "ensemble".to_string(),
            metrics,
        });
    }
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeParams;
    use crate::fixtures;

    /// Sales peak at the temperature optimum and fall with fuel price.
    fn smooth_set() -> TrainingSet {
        let mut set = TrainingSet::default();
        for i in 0..120 {
            let temperature = 30.0 + (i % 30) as f64 * 2.5;
            let fuel_price = 2.5 + (i / 30) as f64 * 0.5;
            let features = FeatureVector::new([
                1.0,
                0.0,
                features::temperature_term(temperature),
                fuel_price,
                210.0,
                8.0,
            ]);
            set.targets.push(50_000.0 + 10.0 * features.get(2) - 4_000.0 * fuel_price);
            set.features.push(features);
        }
        set
    }

    fn mse(member: &dyn Regressor, set: &TrainingSet) -> f64 {
        set.features
            .iter()
            .zip(&set.targets)
            .map(|(f, t)| (member.predict(f).unwrap() - t).powi(2))
            .sum::<f64>()
            / set.len() as f64
    }

    fn variance(values: &[f64]) -> f64 {
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
    }

    #[test]
    fn bagging_beats_the_mean_and_is_reproducible() {
        let set = smooth_set();
        let params = BaggingParams {
            n_trees: 10,
            tree: TreeParams {
                max_depth: 6,
                ..TreeParams::default()
            },
            seed: 3,
        };

        let first = fit_bagged(&set, BAGGED_TREES, &params);
        let second = fit_bagged(&set, BAGGED_TREES, &params);
        assert_eq!(first.trees, second.trees);
        assert_eq!(first.trees.len(), 10);
        assert!(mse(&first, &set) < 0.2 * variance(&set.targets));
    }

    #[test]
    fn boosting_reduces_training_error() {
        let set = smooth_set();
        let short = BoostingParams {
            n_estimators: 1,
            ..BoostingParams::default()
        };
        let long = BoostingParams {
            n_estimators: 80,
            ..BoostingParams::default()
        };

        let weak = fit_boosted(&set, GRADIENT_BOOSTING, &short);
        let strong = fit_boosted(&set, GRADIENT_BOOSTING, &long);
        assert!((weak.base - set.targets.iter().sum::<f64>() / set.len() as f64).abs() < 1e-6);
        assert!(mse(&strong, &set) < mse(&weak, &set));
        assert!(mse(&strong, &set) < 0.1 * variance(&set.targets));
    }

    #[test]
    fn subsampled_boosting_is_seeded() {
        let set = smooth_set();
        let params = BoostingParams {
            n_estimators: 20,
            subsample: 0.5,
            seed: 99,
            ..BoostingParams::default()
        };
        let first = fit_boosted(&set, STOCHASTIC_BOOSTING, &params);
        let second = fit_boosted(&set, STOCHASTIC_BOOSTING, &params);
        assert_eq!(first.trees, second.trees);
    }

    #[test]
    fn holdout_takes_the_last_weeks_of_each_store() {
        let dataset = fixtures::history(&[1, 2], 12);
        let (train, holdout) = split_holdout(&dataset, 3);
        assert_eq!(train.len(), 18);
        assert_eq!(holdout.len(), 6);
        assert!(holdout
            .iter()
            .all(|record| record.date >= fixtures::date("2011-03-11")));
    }

    #[test]
    fn training_set_skips_unsold_weeks() {
        let records = vec![
            fixtures::record(1, "2012-01-06", Some(10.0)),
            fixtures::record(1, "2012-01-13", None),
        ];
        let set = TrainingSet::from_records(&records).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.targets, vec![10.0]);
    }

    #[test]
    fn train_produces_three_members_and_scores() {
        let dataset = fixtures::history(&[1, 2, 3], 20);
        let mut settings = TrainingSettings::default();
        settings.holdout_weeks = 4;
        settings.bagging.n_trees = 5;
        settings.gradient_boosting.n_estimators = 10;
        settings.stochastic_boosting.n_estimators = 10;

        let outcome = train(&dataset, &settings).unwrap();
        let names: Vec<&str> = outcome.artifacts.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec![BAGGED_TREES, GRADIENT_BOOSTING, STOCHASTIC_BOOSTING]);
        assert_eq!(outcome.train_rows, 48);
        assert_eq!(outcome.holdout_rows, 12);
        assert_eq!(outcome.holdout.len(), 4);
        assert_eq!(outcome.holdout[3].model, "ensemble");
        assert!(outcome.artifacts.iter().all(|a| a.validate().is_ok()));
    }

    #[test]
    fn train_refuses_a_dataset_without_sales() {
        let dataset = SalesDataset::from_records(vec![fixtures::record(1, "2012-01-06", None)]).unwrap();
        assert!(matches!(
            train(&dataset, &TrainingSettings::default()),
            Err(TrainingError::Validation(ValidationError::NoTrainingData))
        ));
    }

    #[test]
    fn holdout_scoring_fails_when_a_member_fails() {
        let set = smooth_set();
        let healthy = fixtures::Constant::new("constant", 50_000.0);
        let broken = fixtures::Failing::new("broken");
        let members: [&dyn Regressor; 2] = [&healthy, &broken];

        match score_holdout(&set, &members) {
            Err(ModelError::Prediction { model, .. }) => assert_eq!(model, "broken"),
            other => panic!("expected a member failure, got {other:?}"),
        }
    }

    #[test]
    fn holdout_scores_cover_members_and_the_average() {
        let set = smooth_set();
        let healthy = fixtures::Constant::new("constant", 50_000.0);
        let members: [&dyn Regressor; 1] = [&healthy];

        let scores = score_holdout(&set, &members).unwrap();
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0].model, "constant");
        assert_eq!(scores[1].model, "ensemble");
        assert!(score_holdout(&TrainingSet::default(), &members).unwrap().is_empty());
    }

    #[test]
    fn metrics_match_hand_computation() {
        let metrics = RegressionMetrics::compute(&[1.0, 2.0, 3.0], &[1.0, 2.0, 5.0]).unwrap();
        assert!((metrics.rmse - (4.0f64 / 3.0).sqrt()).abs() < 1e-9);
        assert!((metrics.mae - 2.0 / 3.0).abs() < 1e-9);
        assert!((metrics.r2 - (1.0 - 4.0 / 2.0)).abs() < 1e-9);
        assert!(RegressionMetrics::compute(&[], &[]).is_none());
    }
}
