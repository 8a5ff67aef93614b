// --- Файл: src/normalize/minmax.rs ---

//! Масштабирование min-max каждого столбца в `[0, 1]`.

use crate::error::{PrepError, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};
use tracing::warn;

/// Размах столбца меньше этого считается нулевым.
const MIN_RANGE: f32 = 1e-12;

/// Обученные минимум и максимум каждого столбца.
#[derive(Debug, Clone)]
pub struct MinMaxScaler {
    min: Array1<f32>,
    max: Array1<f32>,
    degenerate: Vec<usize>,
}

impl MinMaxScaler {
    /// Обучает минимумы и максимумы столбцов.
    ///
    /// Столбцы нулевого размаха помечаются вырожденными и делятся на 1.
    /// При `strict` возвращается ошибка `NumericDegeneracy`.
    pub fn fit(data: ArrayView2<f32>, strict: bool) -> Result<Self> {
        if data.nrows() == 0 {
            return Err(PrepError::invalid("cannot fit min-max scaling on zero rows"));
        }

        let min = data.fold_axis(Axis(0), f32::INFINITY, |acc, &x| acc.min(x));
        let max = data.fold_axis(Axis(0), f32::NEG_INFINITY, |acc, &x| acc.max(x));

        let degenerate = zero_range_columns(&min, &max);

        if let Some(&column) = degenerate.first() {
            if strict {
                return Err(PrepError::NumericDegeneracy {
                    column,
                    value: min[column],
                });
            }
            warn!(columns = ?degenerate, "zero-range columns scaled with unit denominator");
        }

        Ok(Self { min, max, degenerate })
    }

    /// Восстанавливает масштабирование из сохранённых параметров.
    pub fn from_params(min: Array1<f32>, max: Array1<f32>) -> Result<Self> {
        if min.len() != max.len() {
            return Err(PrepError::invalid(format!(
                "min has {} entries but max has {}",
                min.len(),
                max.len()
            )));
        }
        let degenerate = zero_range_columns(&min, &max);
        Ok(Self { min, max, degenerate })
    }

    pub fn min(&self) -> &Array1<f32> {
        &self.min
    }

    pub fn max(&self) -> &Array1<f32> {
        &self.max
    }

    /// Индексы столбцов нулевого размаха.
    pub fn degenerate_columns(&self) -> &[usize] {
        &self.degenerate
    }

    pub fn into_params(self) -> (Array1<f32>, Array1<f32>) {
        (self.min, self.max)
    }

    /// `(x - min) / (max - min)`.
    pub fn transform(&self, data: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_width(data.ncols())?;
        let range = self.safe_range();
        let mut out = data.to_owned();
        for mut row in out.axis_iter_mut(Axis(0)) {
            Zip::from(&mut row)
                .and(&self.min)
                .and(&range)
                .for_each(|x, &lo, &r| *x = (*x - lo) / r);
        }
        Ok(out)
    }

    /// `x * (max - min) + min`.
    pub fn inverse_transform(&self, data: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_width(data.ncols())?;
        let range = &self.max - &self.min;
        let mut out = data.to_owned();
        for mut row in out.axis_iter_mut(Axis(0)) {
            Zip::from(&mut row)
                .and(&self.min)
                .and(&range)
                .for_each(|x, &lo, &r| *x = *x * r + lo);
        }
        Ok(out)
    }

    fn safe_range(&self) -> Array1<f32> {
        Zip::from(&self.min)
            .and(&self.max)
            .map_collect(|&lo, &hi| if hi - lo < MIN_RANGE { 1.0 } else { hi - lo })
    }

    fn check_width(&self, ncols: usize) -> Result<()> {
        if ncols != self.min.len() {
            return Err(PrepError::invalid(format!(
                "matrix has {} columns but scaler was fitted on {}",
                ncols,
                self.min.len()
            )));
        }
        Ok(())
    }
}

fn zero_range_columns(min: &Array1<f32>, max: &Array1<f32>) -> Vec<usize> {
    min.iter()
        .zip(max.iter())
        .enumerate()
        .filter(|(_, (&lo, &hi))| hi - lo < MIN_RANGE)
        .map(|(j, _)| j)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, ArrayView1};

    fn within_range(column: ArrayView1<f32>, lo: f32, hi: f32, tol: f32) -> bool {
        column.iter().all(|&x| x >= lo - tol && x <= hi + tol)
    }

    #[test]
    fn test_fit_transform_bounds() {
        let data = array![[0.0_f32, 10.0], [5.0, 20.0], [10.0, 15.0]];
        let scaler = MinMaxScaler::fit(data.view(), false).unwrap();
        let scaled = scaler.transform(data.view()).unwrap();

        assert_eq!(scaler.min(), &array![0.0, 10.0]);
        assert_eq!(scaler.max(), &array![10.0, 20.0]);
        for column in scaled.axis_iter(Axis(1)) {
            assert!(within_range(column, 0.0, 1.0, 1e-6));
        }
        assert!((scaled[[1, 0]] - 0.5).abs() < 1e-6);
        assert!((scaled[[2, 1]] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_inverse() {
        let data = array![[1.5_f32, -3.0], [2.5, 4.0], [-0.5, 0.0]];
        let scaler = MinMaxScaler::fit(data.view(), false).unwrap();
        let restored = scaler
            .inverse_transform(scaler.transform(data.view()).unwrap().view())
            .unwrap();

        for (a, b) in data.iter().zip(restored.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_degenerate_column_is_finite() {
        let data = array![[3.0_f32, 1.0], [3.0, 2.0]];
        let scaler = MinMaxScaler::fit(data.view(), false).unwrap();
        let scaled = scaler.transform(data.view()).unwrap();

        assert_eq!(scaler.degenerate_columns(), &[0]);
        assert!(scaled.iter().all(|x| x.is_finite()));
        assert_eq!(scaled[[0, 0]], 0.0);

        let restored = scaler.inverse_transform(scaled.view()).unwrap();
        assert_eq!(restored[[1, 0]], 3.0);
    }

    #[test]
    fn test_strict_degeneracy() {
        let data = array![[1.0_f32, 3.0], [2.0, 3.0]];
        let err = MinMaxScaler::fit(data.view(), true).unwrap_err();
        assert!(matches!(err, PrepError::NumericDegeneracy { column: 1, .. }));
    }

    #[test]
    fn test_width_mismatch() {
        let scaler = MinMaxScaler::from_params(array![0.0, 0.0], array![1.0, 1.0]).unwrap();
        let data = Array2::<f32>::zeros((2, 3));
        assert!(scaler.transform(data.view()).is_err());
    }
}
