//! Ordinary least squares with intercept.

use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};

use crate::features::{FeatureVector, FEATURE_COUNT};

/// Diagonal term that keeps the normal equations solvable when features are
/// constant or collinear.
const RIDGE: f64 = 1e-8;

type Gram = SMatrix<f64, FEATURE_COUNT, FEATURE_COUNT>;
type Column = SVector<f64, FEATURE_COUNT>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub intercept: f64,
    pub coefficients: FeatureVector,
}

impl LinearModel {
    /// Fit on centred features so the intercept is recovered from the means.
    pub fn fit(x: &[FeatureVector], y: &[f64]) -> Self {
        let n = x.len().min(y.len());
        if n == 0 {
            return Self {
                intercept: 0.0,
                coefficients: [0.0; FEATURE_COUNT],
            };
        }

        let mut x_mean = [0.0; FEATURE_COUNT];
        for row in &x[..n] {
            for (m, v) in x_mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        x_mean.iter_mut().for_each(|m| *m /= n as f64);
        let y_mean = y[..n].iter().sum::<f64>() / n as f64;

        let mut xtx = Gram::zeros();
        let mut xty = Column::zeros();
        for (row, target) in x[..n].iter().zip(&y[..n]) {
            let centred = Column::from_fn(|j, _| row[j] - x_mean[j]);
            xtx += centred * centred.transpose();
            xty += centred * (target - y_mean);
        }
        xtx += Gram::identity() * RIDGE;

        let coefficients = solve(xtx, &xty);
        let intercept = y_mean
            - coefficients
                .iter()
                .zip(&x_mean)
                .map(|(c, m)| c * m)
                .sum::<f64>();

        Self {
            intercept,
            coefficients,
        }
    }

    pub fn predict(&self, x: &FeatureVector) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(x)
                .map(|(c, v)| c * v)
                .sum::<f64>()
    }
}

/// Cholesky on the regularised Gram matrix, LU when that fails, zero
/// coefficients when both do.
fn solve(xtx: Gram, xty: &Column) -> FeatureVector {
    let solution = match xtx.cholesky() {
        Some(cholesky) => Some(cholesky.solve(xty)),
        None => xtx.lu().solve(xty),
    };
    match solution {
        Some(beta) if beta.iter().all(|c| c.is_finite()) => {
            let mut coefficients = [0.0; FEATURE_COUNT];
            coefficients.copy_from_slice(beta.as_slice());
            coefficients
        }
        _ => [0.0; FEATURE_COUNT],
    }
}
