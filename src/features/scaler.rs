use ndarray::{Array2, Axis};

use crate::error::RegimeFitError;

/// Column-wise zero-mean, unit-variance scaling (population variance).
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(data: &Array2<f64>) -> Result<Self, RegimeFitError> {
        if data.nrows() == 0 {
            return Err(RegimeFitError::TooFewObservations { needed: 1, got: 0 });
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(RegimeFitError::NonFinite);
        }

        let mut means = Vec::with_capacity(data.ncols());
        let mut scales = Vec::with_capacity(data.ncols());
        for column in data.axis_iter(Axis(1)) {
            let n = column.len() as f64;
            let mean = column.sum() / n;
            let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            if var <= f64::EPSILON * mean.abs().max(1.0) {
                return Err(RegimeFitError::Degenerate);
            }
            means.push(mean);
            scales.push(var.sqrt());
        }

        Ok(Self { means, scales })
    }

    pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>, RegimeFitError> {
        if data.ncols() != self.means.len() {
            return Err(RegimeFitError::FeatureMismatch {
                expected: self.means.len(),
                got: data.ncols(),
            });
        }
        let mut out = data.clone();
        for (j, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            column.mapv_inplace(|v| (v - self.means[j]) / self.scales[j]);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_standardizes_column() {
        let data = array![[1.0], [2.0], [3.0], [4.0]];
        let scaler = StandardScaler::fit(&data).unwrap();
        let scaled = scaler.transform(&data).unwrap();
        let mean: f64 = scaled.iter().sum::<f64>() / 4.0;
        let var: f64 = scaled.iter().map(|v| v * v).sum::<f64>() / 4.0;
        assert!(mean.abs() < 1e-12);
        assert!((var - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_column_is_degenerate() {
        let data = array![[0.2], [0.2], [0.2]];
        assert!(matches!(StandardScaler::fit(&data), Err(RegimeFitError::Degenerate)));
    }

    #[test]
    fn test_transform_checks_width() {
        let scaler = StandardScaler::fit(&array![[1.0], [2.0]]).unwrap();
        let err = scaler.transform(&array![[1.0, 2.0]]).unwrap_err();
        assert!(matches!(err, RegimeFitError::FeatureMismatch { expected: 1, got: 2 }));
    }
}
