// --- Файл: src/metrics/clustering.rs ---

//! Кластеризация по центроидам и бинаризация активаций для
//! информационных метрик.

use crate::error::{PrepError, Result};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use std::collections::BTreeMap;
use tracing::info;

/// K-means Ллойда с инициализацией k-means++.
#[derive(Debug, Clone)]
pub struct KMeans {
    k: usize,
    max_iter: usize,
    n_init: usize,
}

/// Результат прогона k-means.
#[derive(Debug, Clone)]
pub struct KMeansFit {
    /// `[k, d]`
    pub centroids: Array2<f32>,
    /// Индекс кластера для каждой строки
    pub labels: Vec<usize>,
    /// Сумма квадратов расстояний до назначенного центроида
    pub inertia: f64,
}

impl KMeans {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iter: 300,
            n_init: 10,
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter.max(1);
        self
    }

    /// Число перезапусков; остаётся прогон с наименьшей инерцией.
    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init.max(1);
        self
    }

    pub fn fit<R: Rng + ?Sized>(&self, data: ArrayView2<f32>, rng: &mut R) -> Result<KMeansFit> {
        let n = data.nrows();
        if self.k == 0 || self.k > n {
            return Err(PrepError::invalid(format!(
                "k must be in [1, {}], got {}",
                n, self.k
            )));
        }

        let mut best: Option<KMeansFit> = None;
        for _ in 0..self.n_init {
            let fit = self.run_once(data, rng);
            if best.as_ref().map_or(true, |b| fit.inertia < b.inertia) {
                best = Some(fit);
            }
        }
        best.ok_or_else(|| PrepError::invalid("k-means ran zero initializations"))
    }

    fn run_once<R: Rng + ?Sized>(&self, data: ArrayView2<f32>, rng: &mut R) -> KMeansFit {
        let n = data.nrows();
        let mut centroids = seed_plus_plus(data, self.k, rng);
        let mut labels = vec![usize::MAX; n];
        let mut distances = vec![0.0_f64; n];

        for _ in 0..self.max_iter {
            let mut changed = false;
            for (i, row) in data.axis_iter(Axis(0)).enumerate() {
                let (label, dist) = nearest(row, centroids.view());
                if labels[i] != label {
                    labels[i] = label;
                    changed = true;
                }
                distances[i] = dist;
            }
            if !changed {
                break;
            }

            let mut sums = Array2::<f64>::zeros((self.k, data.ncols()));
            let mut counts = vec![0usize; self.k];
            for (row, &label) in data.axis_iter(Axis(0)).zip(labels.iter()) {
                let mut sum = sums.row_mut(label);
                sum.zip_mut_with(&row, |s, &x| *s += f64::from(x));
                counts[label] += 1;
            }
            for c in 0..self.k {
                if counts[c] == 0 {
                    // пустой кластер переносится в самую далёкую точку
                    let far = argmax(&distances);
                    centroids.row_mut(c).assign(&data.row(far));
                    distances[far] = 0.0;
                } else {
                    let mean = sums.row(c).mapv(|s| (s / counts[c] as f64) as f32);
                    centroids.row_mut(c).assign(&mean);
                }
            }
        }

        let inertia = data
            .axis_iter(Axis(0))
            .zip(labels.iter())
            .map(|(row, &label)| squared_distance(row, centroids.row(label)))
            .sum();
        KMeansFit {
            centroids,
            labels,
            inertia,
        }
    }
}

/// Инициализация k-means++: каждый новый центроид выбирается с
/// вероятностью, пропорциональной квадрату расстояния до ближайшего.
fn seed_plus_plus<R: Rng + ?Sized>(data: ArrayView2<f32>, k: usize, rng: &mut R) -> Array2<f32> {
    let n = data.nrows();
    let mut centroids = Array2::<f32>::zeros((k, data.ncols()));
    let first = rng.random_range(0..n);
    centroids.row_mut(0).assign(&data.row(first));

    let mut closest: Vec<f64> = data
        .axis_iter(Axis(0))
        .map(|row| squared_distance(row, centroids.row(0)))
        .collect();

    for c in 1..k {
        let total: f64 = closest.iter().sum();
        let pick = if total > 0.0 {
            let mut target = rng.random::<f64>() * total;
            let mut chosen = n - 1;
            for (i, &d) in closest.iter().enumerate() {
                if target < d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        } else {
            rng.random_range(0..n)
        };
        centroids.row_mut(c).assign(&data.row(pick));
        for (i, row) in data.axis_iter(Axis(0)).enumerate() {
            let d = squared_distance(row, centroids.row(c));
            if d < closest[i] {
                closest[i] = d;
            }
        }
    }
    centroids
}

fn nearest(row: ArrayView1<f32>, centroids: ArrayView2<f32>) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (c, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
        let d = squared_distance(row, centroid);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

pub(crate) fn squared_distance(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = f64::from(x) - f64::from(y);
            d * d
        })
        .sum()
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

/// Метки кластеров, полученные из пороговых активаций.
#[derive(Debug, Clone)]
pub struct Binarized {
    /// Номер кластера для строки; `-1` - слишком редкий код
    pub labels: Vec<i64>,
    /// Число различных бинарных кодов
    pub num_codes: usize,
    /// Строки, исключённые из-за редких кодов
    pub excluded: usize,
}

/// Группирует строки по бинарному коду активаций `acts > thresh`.
///
/// Коды упорядочены лексикографически. Первый код получает номер 0 и
/// никогда не исключается, остальные получают положительный номер, если
/// покрывают не меньше `bin_min` строк. `bin_min` из `(0, 1)` трактуется
/// как доля строк.
pub fn binarize(acts: ArrayView2<f32>, thresh: f32, bin_min: f32) -> Binarized {
    let n = acts.nrows();
    let min_count = if bin_min > 0.0 && bin_min < 1.0 {
        bin_min * n as f32
    } else {
        bin_min.max(0.0)
    };

    let mut codes: BTreeMap<Vec<bool>, Vec<usize>> = BTreeMap::new();
    for (i, row) in acts.axis_iter(Axis(0)).enumerate() {
        let code: Vec<bool> = row.iter().map(|&a| a > thresh).collect();
        codes.entry(code).or_default().push(i);
    }

    let num_codes = codes.len();
    let mut labels = vec![0_i64; n];
    let mut excluded = 0;
    if num_codes > 1 {
        for (id, rows) in codes.values().enumerate().skip(1) {
            let label = if (rows.len() as f32) < min_count {
                excluded += rows.len();
                -1
            } else {
                id as i64
            };
            for &r in rows {
                labels[r] = label;
            }
        }
        info!(num_codes, excluded, "binarized activation clusters");
    }

    Binarized {
        labels,
        num_codes,
        excluded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn blobs() -> Array2<f32> {
        let mut data = Array2::<f32>::zeros((30, 2));
        for i in 0..30 {
            let center = (i / 10) as f32 * 10.0;
            let jitter = (i % 10) as f32 * 0.05;
            data[[i, 0]] = center + jitter;
            data[[i, 1]] = -center + jitter;
        }
        data
    }

    #[test]
    fn test_kmeans_separates_blobs() {
        let data = blobs();
        let fit = KMeans::new(3).fit(data.view(), &mut StdRng::seed_from_u64(42)).unwrap();

        for blob in 0..3 {
            let first = fit.labels[blob * 10];
            assert!(fit.labels[blob * 10..blob * 10 + 10].iter().all(|&l| l == first));
        }
        assert_ne!(fit.labels[0], fit.labels[10]);
        assert_ne!(fit.labels[10], fit.labels[20]);
        // оптимум: 3 облака по 2 * 0.0025 * sum((k - 4.5)^2) = 0.4125
        assert!((fit.inertia - 1.2375).abs() < 1e-3, "inertia {}", fit.inertia);
    }

    #[test]
    fn test_kmeans_rejects_bad_k() {
        let data = blobs();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(KMeans::new(0).fit(data.view(), &mut rng).is_err());
        assert!(KMeans::new(31).fit(data.view(), &mut rng).is_err());
    }

    #[test]
    fn test_kmeans_with_duplicate_points() {
        let data = Array2::<f32>::ones((5, 3));
        let fit = KMeans::new(2)
            .with_n_init(2)
            .fit(data.view(), &mut StdRng::seed_from_u64(5))
            .unwrap();
        assert_eq!(fit.labels.len(), 5);
        assert_eq!(fit.inertia, 0.0);
    }

    #[test]
    fn test_binarize_codes() {
        let acts = array![
            [0.9_f32, 0.1],
            [0.8, 0.2],
            [0.1, 0.9],
            [0.2, 0.7],
            [0.9, 0.9],
            [0.0, 0.0]
        ];
        let result = binarize(acts.view(), 0.5, 2.0);

        assert_eq!(result.num_codes, 4);
        // коды по порядку: [f,f] -> 0, [f,t] -> 1, [t,f] -> 2, [t,t] редкий
        assert_eq!(result.labels, vec![2, 2, 1, 1, -1, 0]);
        assert_eq!(result.excluded, 1);
    }

    #[test]
    fn test_binarize_single_code() {
        let acts = Array2::<f32>::zeros((4, 3));
        let result = binarize(acts.view(), 0.5, 0.01);
        assert_eq!(result.num_codes, 1);
        assert!(result.labels.iter().all(|&l| l == 0));
    }
}
