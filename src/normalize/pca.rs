// --- Файл: src/normalize/pca.rs ---

//! Проекция на главные компоненты.
//!
//! Ведущие оси ищутся рандомизированным поиском подпространства:
//! случайный эскиз `X·Ω` шириной `k + p`, несколько степенных итераций с
//! переортогонализацией, затем точное разложение малой матрицы
//! `B·Bᵀ`, где `B = Qᵀ·X`. Стоимость `O(n·d·(k + p))` на итерацию, так что
//! полная ковариационная матрица никогда не строится.

use crate::config::DEFAULT_SEED;
use crate::error::{PrepError, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

const MAX_SWEEPS: usize = 64;
const OFF_DIAGONAL_TOL: f64 = 1e-22;
/// Дополнительные столбцы эскиза сверх запрошенных компонент.
const OVERSAMPLES: usize = 10;
/// Столбец эскиза, потерявший почти всю норму при ортогонализации,
/// считается линейно зависимым и обнуляется.
const RANK_TOL: f64 = 1e-10;

/// Обученная линейная проекция на ведущие главные оси.
#[derive(Debug, Clone)]
pub struct Pca {
    /// `[n_components, n_features]`, строки - единичные главные оси
    components: Array2<f32>,
    /// Среднее по признакам, вычитаемое перед проекцией
    mean: Array1<f32>,
    /// Дисперсия, объяснённая каждой компонентой
    explained_variance: Array1<f32>,
}

impl Pca {
    /// Обучает `n_components` главных осей на строках `data` с генератором,
    /// засеянным значением по умолчанию.
    pub fn fit(data: ArrayView2<f32>, n_components: usize) -> Result<Self> {
        Self::fit_with_rng(data, n_components, &mut StdRng::seed_from_u64(DEFAULT_SEED))
    }

    /// Обучает `n_components` главных осей; случайный эскиз берётся из `rng`.
    pub fn fit_with_rng<R: Rng + ?Sized>(
        data: ArrayView2<f32>,
        n_components: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let (n, d) = data.dim();
        if n < 2 {
            return Err(PrepError::invalid(format!("PCA needs at least 2 rows, got {n}")));
        }
        let rank = n.min(d);
        if n_components == 0 || n_components > rank {
            return Err(PrepError::invalid(format!(
                "n_components must be in [1, {}], got {}",
                rank, n_components
            )));
        }

        let x = data.mapv(f64::from);
        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| PrepError::invalid("PCA on empty matrix"))?;
        let centered = &x - &mean;

        let width = (n_components + OVERSAMPLES).min(rank);
        // то же правило, что у рандомизированного SVD в scikit-learn
        let power_iterations = if (n_components as f64) < 0.1 * rank as f64 { 7 } else { 4 };
        debug!(rows = n, cols = d, n_components, width, power_iterations, "fitting PCA");

        let omega = Array2::from_shape_fn((d, width), |_| rng.random_range(-1.0..1.0_f64));
        let mut basis = orthonormalize(centered.dot(&omega));
        for _ in 0..power_iterations {
            let back = orthonormalize(centered.t().dot(&basis));
            basis = orthonormalize(centered.dot(&back));
        }

        // B = Qᵀ·X, собственные пары B·Bᵀ дают сингулярные пары X в подпространстве Q
        let projected = basis.t().dot(&centered);
        let (values, vectors) = symmetric_eigen(projected.dot(&projected.t()));
        let scale = (n - 1) as f64;

        let mut axes: Vec<(f64, Array1<f64>)> = values
            .into_iter()
            .zip(vectors.columns())
            .map(|(value, u)| {
                let mut axis = projected.t().dot(&u);
                let norm = axis.dot(&axis).sqrt();
                if norm > f64::EPSILON {
                    axis /= norm;
                } else {
                    axis.fill(0.0);
                }
                (value / scale, axis)
            })
            .collect();

        axes.sort_by(|a, b| b.0.total_cmp(&a.0));
        axes.truncate(n_components);

        let mut components = Array2::<f32>::zeros((n_components, d));
        let mut explained_variance = Array1::<f32>::zeros(n_components);
        for (i, (value, mut axis)) in axes.into_iter().enumerate() {
            flip_sign(&mut axis);
            components.row_mut(i).assign(&axis.mapv(|v| v as f32));
            explained_variance[i] = value.max(0.0) as f32;
        }

        Ok(Self {
            components,
            mean: mean.mapv(|v| v as f32),
            explained_variance,
        })
    }

    /// Восстанавливает проекцию по сохранённым параметрам.
    pub fn from_params(components: Array2<f32>, mean: Array1<f32>) -> Result<Self> {
        if components.ncols() != mean.len() {
            return Err(PrepError::invalid(format!(
                "components have {} columns but mean offset has {} entries",
                components.ncols(),
                mean.len()
            )));
        }
        let explained_variance = Array1::zeros(components.nrows());
        Ok(Self {
            components,
            mean,
            explained_variance,
        })
    }

    pub fn components(&self) -> &Array2<f32> {
        &self.components
    }

    pub fn mean(&self) -> &Array1<f32> {
        &self.mean
    }

    /// Собственные значения обученных осей; нули, если проекция
    /// восстановлена из параметров.
    pub fn explained_variance(&self) -> &Array1<f32> {
        &self.explained_variance
    }

    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }

    pub fn into_params(self) -> (Array2<f32>, Array1<f32>) {
        (self.components, self.mean)
    }

    /// `(x - mean) · componentsᵀ`.
    pub fn transform(&self, data: ArrayView2<f32>) -> Result<Array2<f32>> {
        if data.ncols() != self.mean.len() {
            return Err(PrepError::invalid(format!(
                "matrix has {} columns but PCA was fitted on {}",
                data.ncols(),
                self.mean.len()
            )));
        }
        let centered = &data - &self.mean;
        Ok(centered.dot(&self.components.t()))
    }

    /// `x · components + mean`. Приближённо: дисперсия вне сохранённых осей
    /// теряется.
    pub fn inverse_transform(&self, data: ArrayView2<f32>) -> Result<Array2<f32>> {
        if data.ncols() != self.n_components() {
            return Err(PrepError::invalid(format!(
                "matrix has {} columns but PCA has {} components",
                data.ncols(),
                self.n_components()
            )));
        }
        Ok(data.dot(&self.components) + &self.mean)
    }
}

/// Делает положительной наибольшую по модулю нагрузку оси.
fn flip_sign(axis: &mut Array1<f64>) {
    let pivot = axis
        .iter()
        .copied()
        .fold(0.0_f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
    if pivot < 0.0 {
        axis.mapv_inplace(|v| -v);
    }
}

/// Ортонормирует столбцы модифицированным Грамом-Шмидтом с повторным
/// проходом. Зависимые столбцы становятся нулевыми.
fn orthonormalize(mut basis: Array2<f64>) -> Array2<f64> {
    for j in 0..basis.ncols() {
        let before = basis.column(j).dot(&basis.column(j)).sqrt();
        for _ in 0..2 {
            for i in 0..j {
                let prev = basis.column(i).to_owned();
                let proj = prev.dot(&basis.column(j));
                basis.column_mut(j).scaled_add(-proj, &prev);
            }
        }
        let norm = basis.column(j).dot(&basis.column(j)).sqrt();
        let mut column = basis.column_mut(j);
        if norm > RANK_TOL * before && norm > 0.0 {
            column /= norm;
        } else {
            column.fill(0.0);
        }
    }
    basis
}

/// Собственное разложение малой симметричной матрицы вращениями Якоби.
///
/// Возвращает собственные значения и матрицу, столбцы которой -
/// соответствующие единичные собственные векторы, без упорядочивания.
pub(crate) fn symmetric_eigen(mut a: Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    let n = a.nrows();
    let mut v = Array2::<f64>::eye(n);
    let total: f64 = a.iter().map(|x| x * x).sum();

    for _ in 0..MAX_SWEEPS {
        let mut off = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off += a[[p, q]] * a[[p, q]];
            }
        }
        if off <= OFF_DIAGONAL_TOL * total.max(f64::MIN_POSITIVE) {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq == 0.0 {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    let values = (0..n).map(|i| a[[i, i]]).collect();
    (values, v)
}
