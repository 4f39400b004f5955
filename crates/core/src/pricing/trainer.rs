//! Ridge regression fit of the residual model.
//!
//! Categorical inputs are one-hot encoded over the categories seen in
//! training (unknown categories contribute nothing at inference) and the
//! numeric inputs pass through unscaled. The penalty is chosen from a
//! log-spaced grid by shuffled k-fold cross-validation, then the model is
//! refit on every observation and exported as a [`LinearResidualModel`].

use std::collections::{BTreeSet, HashMap};

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info};

use crate::pricing::builder::{BuildError, HistoricalObservation, ARTIFACT_VERSION};
use crate::pricing::features::ResidualFeatures;
use crate::pricing::model::{
    LinearResidualModel, ModelInput, ModelInputKind, CATEGORICAL_INPUTS, NUMERIC_INPUTS,
};

pub const MAX_FOLDS: usize = 5;
pub const FOLD_SEED: u64 = 42;
/// Penalty used when there are too few observations to cross-validate.
pub const DEFAULT_ALPHA: f64 = 1.0;

/// `10^-3 ..= 10^3` in half-decade steps.
pub fn ridge_alphas() -> Vec<f64> {
    (0..13).map(|step| 10_f64.powf(-3.0 + 0.5 * f64::from(step))).collect()
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrainedModel {
    pub model: LinearResidualModel,
    pub alpha: f64,
    pub folds: usize,
    /// Mean held-out MAE at the chosen penalty; `None` without cross-validation.
    pub cv_mae: Option<f64>,
}

pub fn train_residual_model(
    observations: &[HistoricalObservation],
) -> Result<TrainedModel, BuildError> {
    if observations.is_empty() {
        return Err(BuildError::NoObservations);
    }

    let rows: Vec<ResidualFeatures> =
        observations.iter().map(HistoricalObservation::features).collect();
    let encoder = OneHotEncoder::fit(&rows);
    let x = encoder.encode(&rows);
    let y = Array1::from_iter(observations.iter().map(HistoricalObservation::residual));

    let folds = MAX_FOLDS.min(observations.len());
    let (alpha, cv_mae) = if folds < 2 {
        (DEFAULT_ALPHA, None)
    } else {
        let assignments = fold_assignments(observations.len(), folds);
        select_alpha(&x, &y, &assignments)
    };

    let fit = RidgeFit::solve(&x, &y, alpha).ok_or(BuildError::ModelFit { alpha })?;
    let model = encoder.export(&fit);

    info!(
        event_name = "pricing.model.trained",
        observations = observations.len(),
        columns = encoder.width(),
        alpha,
        folds,
        cv_mae = cv_mae.unwrap_or(f64::NAN),
        "residual model fitted"
    );

    Ok(TrainedModel { model, alpha, folds, cv_mae })
}

/// Lowest held-out squared error wins; ties keep the smaller penalty.
fn select_alpha(x: &Array2<f64>, y: &Array1<f64>, assignments: &[usize]) -> (f64, Option<f64>) {
    let mut best: Option<(f64, f64, f64)> = None;
    for alpha in ridge_alphas() {
        let Some((mse, mae)) = cross_validate(x, y, assignments, alpha) else {
            continue;
        };
        debug!(event_name = "pricing.model.alpha_scored", alpha, mse, mae, "ridge penalty scored");
        if best.map_or(true, |(_, best_mse, _)| mse < best_mse) {
            best = Some((alpha, mse, mae));
        }
    }

    match best {
        Some((alpha, _, mae)) => (alpha, Some(mae)),
        None => (DEFAULT_ALPHA, None),
    }
}

/// Pooled squared error and mean per-fold absolute error.
fn cross_validate(
    x: &Array2<f64>,
    y: &Array1<f64>,
    assignments: &[usize],
    alpha: f64,
) -> Option<(f64, f64)> {
    let folds = assignments.iter().max().map_or(0, |last| last + 1);
    let mut squared = 0.0;
    let mut fold_maes = Vec::with_capacity(folds);

    for fold in 0..folds {
        let (train, test): (Vec<usize>, Vec<usize>) =
            (0..assignments.len()).partition(|&row| assignments[row] != fold);
        if train.is_empty() || test.is_empty() {
            continue;
        }

        let fit = RidgeFit::solve(&x.select(Axis(0), &train), &y.select(Axis(0), &train), alpha)?;
        let predicted = fit.predict(&x.select(Axis(0), &test));
        let errors = &y.select(Axis(0), &test) - &predicted;

        squared += errors.mapv(|error| error * error).sum();
        fold_maes.push(errors.mapv(f64::abs).mean().unwrap_or(0.0));
    }

    if fold_maes.is_empty() {
        return None;
    }
    let mse = squared / assignments.len() as f64;
    let mae = fold_maes.iter().sum::<f64>() / fold_maes.len() as f64;
    Some((mse, mae))
}

/// Fold index per row: a seeded shuffle split into `folds` contiguous runs,
/// the first `rows % folds` runs one longer than the rest.
fn fold_assignments(rows: usize, folds: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..rows).collect();
    order.shuffle(&mut StdRng::seed_from_u64(FOLD_SEED));

    let base = rows / folds;
    let extra = rows % folds;
    let mut assignments = vec![0; rows];
    let mut cursor = 0;
    for fold in 0..folds {
        let size = base + usize::from(fold < extra);
        for &row in &order[cursor..cursor + size] {
            assignments[row] = fold;
        }
        cursor += size;
    }
    assignments
}

#[derive(Clone, Debug)]
struct RidgeFit {
    coefficients: Array1<f64>,
    intercept: f64,
}

impl RidgeFit {
    /// Penalized least squares on centered data, so the intercept is not
    /// shrunk.
    fn solve(x: &Array2<f64>, y: &Array1<f64>, alpha: f64) -> Option<Self> {
        let x_mean = x.mean_axis(Axis(0))?;
        let y_mean = y.mean()?;
        let centered = x - &x_mean;
        let target = y - y_mean;

        let mut gram = centered.t().dot(&centered);
        gram.diag_mut().mapv_inplace(|value| value + alpha);
        let moment = centered.t().dot(&target);

        let coefficients = cholesky_solve(gram, moment)?;
        let intercept = y_mean - x_mean.dot(&coefficients);
        Some(Self { coefficients, intercept })
    }

    fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        x.dot(&self.coefficients) + self.intercept
    }
}

/// Solve `a · w = b` for symmetric positive-definite `a`.
fn cholesky_solve(mut a: Array2<f64>, b: Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    for j in 0..n {
        let mut diagonal = a[[j, j]];
        for k in 0..j {
            diagonal -= a[[j, k]] * a[[j, k]];
        }
        if !diagonal.is_finite() || diagonal <= 0.0 {
            return None;
        }
        let diagonal = diagonal.sqrt();
        a[[j, j]] = diagonal;
        for i in (j + 1)..n {
            let mut value = a[[i, j]];
            for k in 0..j {
                value -= a[[i, k]] * a[[j, k]];
            }
            a[[i, j]] = value / diagonal;
        }
    }

    let mut w = b;
    for i in 0..n {
        let mut value = w[i];
        for k in 0..i {
            value -= a[[i, k]] * w[k];
        }
        w[i] = value / a[[i, i]];
    }
    for i in (0..n).rev() {
        let mut value = w[i];
        for k in (i + 1)..n {
            value -= a[[k, i]] * w[k];
        }
        w[i] = value / a[[i, i]];
    }
    Some(w)
}

/// Categories per categorical input, sorted, in export order.
#[derive(Clone, Debug)]
struct OneHotEncoder {
    categories: Vec<Vec<String>>,
}

impl OneHotEncoder {
    fn fit(rows: &[ResidualFeatures]) -> Self {
        let mut seen: Vec<BTreeSet<String>> = vec![BTreeSet::new(); CATEGORICAL_INPUTS.len()];
        for row in rows {
            for (slot, value) in seen.iter_mut().zip(categorical_values(row)) {
                slot.insert(value);
            }
        }
        Self { categories: seen.into_iter().map(|set| set.into_iter().collect()).collect() }
    }

    fn width(&self) -> usize {
        self.categories.iter().map(Vec::len).sum::<usize>() + NUMERIC_INPUTS.len()
    }

    fn encode(&self, rows: &[ResidualFeatures]) -> Array2<f64> {
        let mut x = Array2::zeros((rows.len(), self.width()));
        for (mut encoded, row) in x.axis_iter_mut(Axis(0)).zip(rows) {
            let mut offset = 0;
            for (categories, value) in self.categories.iter().zip(categorical_values(row)) {
                if let Ok(position) = categories.binary_search(&value) {
                    encoded[offset + position] = 1.0;
                }
                offset += categories.len();
            }
            for (index, value) in numeric_values(row).into_iter().enumerate() {
                encoded[offset + index] = value;
            }
        }
        x
    }

    fn export(&self, fit: &RidgeFit) -> LinearResidualModel {
        let mut offset = 0;
        let mut categorical = HashMap::new();
        for (name, categories) in CATEGORICAL_INPUTS.iter().zip(&self.categories) {
            let weights: HashMap<String, f64> = categories
                .iter()
                .enumerate()
                .map(|(position, category)| {
                    (category.clone(), fit.coefficients[offset + position])
                })
                .collect();
            categorical.insert(name.to_string(), weights);
            offset += categories.len();
        }

        let numeric = NUMERIC_INPUTS
            .iter()
            .enumerate()
            .map(|(index, name)| (name.to_string(), fit.coefficients[offset + index]))
            .collect();

        let inputs = CATEGORICAL_INPUTS
            .iter()
            .map(|name| ModelInput { name: name.to_string(), kind: ModelInputKind::Text })
            .chain(
                NUMERIC_INPUTS
                    .iter()
                    .map(|name| ModelInput { name: name.to_string(), kind: ModelInputKind::Float }),
            )
            .collect();

        LinearResidualModel {
            version: ARTIFACT_VERSION,
            inputs,
            outputs: vec!["variable".to_string()],
            intercept: fit.intercept,
            numeric,
            categorical,
            vector: Vec::new(),
        }
    }
}

fn categorical_values(row: &ResidualFeatures) -> [String; 5] {
    [
        row.service_type.as_str().to_string(),
        row.timeframe.as_str().to_string(),
        row.channel.as_str().to_string(),
        row.postcode_area.clone(),
        row.customer_interaction_channel.clone(),
    ]
}

fn numeric_values(row: &ResidualFeatures) -> [f64; 4] {
    [
        row.qty_sum,
        f64::from(row.line_count),
        row.customer_satisfaction,
        row.customer_total_purchases as f64,
    ]
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ndarray::{arr1, arr2};

    use super::{
        cholesky_solve, fold_assignments, ridge_alphas, train_residual_model, DEFAULT_ALPHA,
    };
    use crate::domain::quote::{Channel, ServiceType, Timeframe};
    use crate::pricing::builder::{BuildError, HistoricalObservation};
    use crate::pricing::model::{ModelHandle, ModelInputStyle};

    fn observation(
        service_type: ServiceType,
        qty_sum: f64,
        residual: f64,
    ) -> HistoricalObservation {
        HistoricalObservation {
            service_type,
            timeframe: Timeframe::Asap,
            channel: Channel::Phone,
            site_postcode: Some("M1 1AA".to_string()),
            qty_sum,
            line_count: 2.0,
            total_net: 1_000.0 + residual,
            baseline_subtotal: 1_000.0,
            customer: None,
        }
    }

    /// Residual of 20 per unit plus 100 for installs.
    fn linear_history() -> Vec<HistoricalObservation> {
        (1..=10)
            .map(|step| {
                let qty = f64::from(step);
                if step % 2 == 0 {
                    observation(ServiceType::SupplyAndInstall, qty, 20.0 * qty + 100.0)
                } else {
                    observation(ServiceType::SupplyOnly, qty, 20.0 * qty)
                }
            })
            .collect()
    }

    #[test]
    fn alpha_grid_spans_six_decades() {
        let alphas = ridge_alphas();
        assert_eq!(alphas.len(), 13);
        assert!((alphas[0] - 1e-3).abs() < 1e-12);
        assert!((alphas[6] - 1.0).abs() < 1e-12);
        assert!((alphas[12] - 1e3).abs() < 1e-9);
    }

    #[test]
    fn cholesky_solves_small_positive_definite_system() {
        let solution =
            cholesky_solve(arr2(&[[4.0, 2.0], [2.0, 3.0]]), arr1(&[2.0, 1.0])).expect("solve");
        assert!((solution[0] - 0.5).abs() < 1e-12);
        assert!(solution[1].abs() < 1e-12);

        assert!(cholesky_solve(arr2(&[[0.0]]), arr1(&[1.0])).is_none());
    }

    #[test]
    fn folds_are_balanced_and_deterministic() {
        let first = fold_assignments(10, 4);
        assert_eq!(first, fold_assignments(10, 4));

        let sizes: Vec<usize> =
            (0..4).map(|fold| first.iter().filter(|&&row| row == fold).count()).collect();
        assert_eq!(sizes, vec![3, 3, 2, 2]);
    }

    #[tokio::test]
    async fn fitted_model_recovers_a_linear_residual() {
        let history = linear_history();
        let trained = train_residual_model(&history).expect("trained");

        assert_eq!(trained.folds, 5);
        assert!(trained.alpha <= 0.01, "chose alpha {}", trained.alpha);
        assert!(trained.cv_mae.is_some_and(|mae| mae < 5.0), "cv mae {:?}", trained.cv_mae);
        assert_eq!(trained.model.inputs.len(), 9);

        let handle = ModelHandle::new(Arc::new(trained.model));
        assert_eq!(handle.style(), ModelInputStyle::NamedMultiInput);
        for observation in &history {
            let estimate = handle.estimate(&observation.features()).await.expect("estimate");
            assert!(
                (estimate - observation.residual()).abs() < 1.0,
                "expected {} got {estimate}",
                observation.residual()
            );
        }
    }

    #[tokio::test]
    async fn single_observation_fits_its_own_residual_without_cross_validation() {
        let history = vec![observation(ServiceType::SupplyOnly, 3.0, 75.0)];
        let trained = train_residual_model(&history).expect("trained");

        assert_eq!(trained.alpha, DEFAULT_ALPHA);
        assert_eq!(trained.cv_mae, None);
        assert!((trained.model.intercept - 75.0).abs() < 1e-9);

        let handle = ModelHandle::new(Arc::new(trained.model));
        let estimate = handle.estimate(&history[0].features()).await.expect("estimate");
        assert!((estimate - 75.0).abs() < 1e-3);
    }

    #[test]
    fn empty_history_is_rejected() {
        assert!(matches!(train_residual_model(&[]), Err(BuildError::NoObservations)));
    }
}
