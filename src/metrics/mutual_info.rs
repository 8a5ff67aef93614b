// --- Файл: src/metrics/mutual_info.rs ---

//! Взаимная информация двух матриц активаций с общими строками.
//!
//! Доступны две оценки:
//! - **Distance**: совместная гистограмма попарных евклидовых расстояний `x`
//!   и `y`, по умолчанию `floor(sqrt(n / 5))` равных корзин на ось.
//! - **Cluster**: k-means для каждой матрицы и взаимная информация
//!   двух векторов меток.
//!
//! Результат в натах.

use super::clustering::{squared_distance, KMeans};
use crate::error::{PrepError, Result};
use ndarray::{Array2, ArrayView2, Axis};
use rand::Rng;
use tracing::debug;

/// Какую матрицу кластеризует второй прогон k-means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClusterAssignment {
    /// `x` и `y` кластеризуются независимо.
    #[default]
    Corrected,
    /// `x` кластеризуется дважды с разными seed, `y` не используется.
    /// Воспроизводит старые расчёты.
    LegacySelfReferential,
}

/// Выбор оценки для [`activation_mutual_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiMethod {
    /// `bins: None` означает `max(1, floor(sqrt(n / 5)))`.
    Distance { bins: Option<usize> },
    Cluster { k: usize, assignment: ClusterAssignment },
}

impl Default for MiMethod {
    fn default() -> Self {
        MiMethod::Distance { bins: None }
    }
}

/// Оценивает взаимную информацию `x` и `y`.
///
/// Обе матрицы должны иметь одинаковое число строк `n >= 2`.
/// Кластерный метод берёт инициализацию k-means из `rng`.
pub fn activation_mutual_info<R: Rng + ?Sized>(
    x: ArrayView2<f32>,
    y: ArrayView2<f32>,
    method: MiMethod,
    rng: &mut R,
) -> Result<f64> {
    let n = x.nrows();
    if y.nrows() != n {
        return Err(PrepError::invalid(format!(
            "row count mismatch: x has {}, y has {}",
            n,
            y.nrows()
        )));
    }
    if n < 2 {
        return Err(PrepError::invalid(format!(
            "mutual information needs at least 2 rows, got {n}"
        )));
    }

    let mi = match method {
        MiMethod::Distance { bins } => {
            let bins = bins.unwrap_or_else(|| default_bins(n));
            if bins == 0 {
                return Err(PrepError::invalid("histogram bins must be positive"));
            }
            distance_mutual_info(x, y, bins)
        }
        MiMethod::Cluster { k, assignment } => {
            if k == 0 || k > n {
                return Err(PrepError::invalid(format!(
                    "cluster count must be in [1, {n}], got {k}"
                )));
            }
            let kmeans = KMeans::new(k);
            let labels_x = kmeans.fit(x, rng)?.labels;
            let second = match assignment {
                ClusterAssignment::Corrected => y.view(),
                ClusterAssignment::LegacySelfReferential => x.view(),
            };
            let labels_y = kmeans.fit(second, rng)?.labels;
            mutual_info_labels(&labels_x, &labels_y)
        }
    };
    debug!(?method, n, mi, "activation mutual information");
    Ok(mi)
}

/// Число корзин гистограммы по умолчанию для `n` строк.
pub fn default_bins(n: usize) -> usize {
    ((n as f64 / 5.0).sqrt().floor() as usize).max(1)
}

fn distance_mutual_info(x: ArrayView2<f32>, y: ArrayView2<f32>, bins: usize) -> f64 {
    let n = x.nrows();
    // последний диагональный элемент отбрасывается в обеих развёртках
    let keep = n * n - 1;
    let mut dx = pairwise_distances(x);
    let mut dy = pairwise_distances(y);
    dx.truncate(keep);
    dy.truncate(keep);

    let joint = histogram2d(&dx, &dy, bins);
    mutual_info_from_contingency(&joint)
}

/// Полная матрица евклидовых расстояний `n * n`, развёрнутая по строкам.
pub fn pairwise_distances(data: ArrayView2<f32>) -> Vec<f64> {
    let n = data.nrows();
    let mut out = vec![0.0_f64; n * n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = squared_distance(data.row(i), data.row(j)).sqrt();
            out[i * n + j] = d;
            out[j * n + i] = d;
        }
    }
    out
}

/// Совместная гистограмма с равными корзинами по диапазону каждой оси.
///
/// Последняя корзина замкнута справа. Постоянная ось расширяется на
/// половину единицы в обе стороны.
pub fn histogram2d(a: &[f64], b: &[f64], bins: usize) -> Array2<f64> {
    let mut counts = Array2::<f64>::zeros((bins, bins));
    let (a_lo, a_hi) = axis_range(a);
    let (b_lo, b_hi) = axis_range(b);
    for (&u, &v) in a.iter().zip(b.iter()) {
        let i = bin_index(u, a_lo, a_hi, bins);
        let j = bin_index(v, b_lo, b_hi, bins);
        counts[[i, j]] += 1.0;
    }
    counts
}

fn axis_range(values: &[f64]) -> (f64, f64) {
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || !hi.is_finite() {
        return (-0.5, 0.5);
    }
    if lo == hi {
        (lo - 0.5, hi + 0.5)
    } else {
        (lo, hi)
    }
}

fn bin_index(value: f64, lo: f64, hi: f64, bins: usize) -> usize {
    let pos = ((value - lo) / (hi - lo) * bins as f64).floor();
    (pos.max(0.0) as usize).min(bins - 1)
}

/// Взаимная информация по таблице сопряжённости.
pub fn mutual_info_from_contingency(table: &Array2<f64>) -> f64 {
    let total: f64 = table.sum();
    if total <= 0.0 {
        return 0.0;
    }
    let rows = table.sum_axis(Axis(1));
    let cols = table.sum_axis(Axis(0));

    let mut mi = 0.0;
    for ((i, j), &count) in table.indexed_iter() {
        if count > 0.0 {
            let p = count / total;
            mi += p * (count * total / (rows[i] * cols[j])).ln();
        }
    }
    // для независимых таблиц округление даёт малое отрицательное число
    mi.max(0.0)
}

/// Взаимная информация двух векторов меток одной длины.
pub fn mutual_info_labels(a: &[usize], b: &[usize]) -> f64 {
    let rows = a.iter().copied().max().map_or(0, |m| m + 1);
    let cols = b.iter().copied().max().map_or(0, |m| m + 1);
    let mut table = Array2::<f64>::zeros((rows, cols));
    for (&i, &j) in a.iter().zip(b.iter()) {
        table[[i, j]] += 1.0;
    }
    mutual_info_from_contingency(&table)
}
