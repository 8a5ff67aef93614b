// --- Файл: src/normalize/transforms.rs ---

//! Преобразования без состояния и по столбцам, применяемые до
//! масштабирования или проекции.

use crate::error::{PrepError, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};

/// Кофактор сжатия arcsinh для счётных измерений.
pub const ASINH_COFACTOR: f32 = 5.0;

/// Преобразование матрицы клетки x признаки.
pub trait Transform {
    /// Применяет преобразование и возвращает новую матрицу.
    fn apply(&self, data: ArrayView2<f32>) -> Array2<f32>;

    /// Применяет преобразование на месте.
    fn apply_inplace(&self, data: &mut Array2<f32>) {
        *data = self.apply(data.view());
    }
}

/// Стабилизирующее дисперсию сжатие: `asinh(x / cofactor)`.
///
/// Обращается аналитически через [`ArcsinhCompress::invert`].
#[derive(Debug, Clone, Copy)]
pub struct ArcsinhCompress {
    cofactor: f32,
}

impl ArcsinhCompress {
    pub fn new() -> Self {
        Self {
            cofactor: ASINH_COFACTOR,
        }
    }

    /// Возвращает исходные единицы: `cofactor * sinh(x)`.
    pub fn invert(&self, data: ArrayView2<f32>) -> Array2<f32> {
        let c = self.cofactor;
        data.mapv(|x| c * x.sinh())
    }
}

impl Default for ArcsinhCompress {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for ArcsinhCompress {
    fn apply(&self, data: ArrayView2<f32>) -> Array2<f32> {
        let c = self.cofactor;
        data.mapv(|x| (x / c).asinh())
    }

    fn apply_inplace(&self, data: &mut Array2<f32>) {
        let c = self.cofactor;
        data.mapv_inplace(|x| (x / c).asinh());
    }
}

/// Обрезка каждого столбца до `[минимум столбца, перцентиль столбца]`.
///
/// С потерями: значения выше верхней границы не восстанавливаются.
#[derive(Debug, Clone)]
pub struct ColumnClip {
    lower: Array1<f32>,
    upper: Array1<f32>,
}

impl ColumnClip {
    /// Вычисляет границы обрезки каждого столбца.
    ///
    /// `percentile` лежит в `[0, 100]`, между порядковыми статистиками
    /// используется линейная интерполяция.
    pub fn fit(data: ArrayView2<f32>, percentile: f32) -> Result<Self> {
        if !(0.0..=100.0).contains(&percentile) {
            return Err(PrepError::invalid(format!(
                "clip percentile must be in [0, 100], got {percentile}"
            )));
        }
        if data.nrows() == 0 {
            return Err(PrepError::invalid("cannot fit clipping bounds on zero rows"));
        }

        let mut lower = Array1::zeros(data.ncols());
        let mut upper = Array1::zeros(data.ncols());
        for (j, column) in data.axis_iter(Axis(1)).enumerate() {
            let mut sorted = column.to_vec();
            sorted.sort_by(f32::total_cmp);
            lower[j] = sorted[0];
            upper[j] = percentile_of_sorted(&sorted, percentile);
        }

        Ok(Self { lower, upper })
    }

    pub fn lower(&self) -> &Array1<f32> {
        &self.lower
    }

    pub fn upper(&self) -> &Array1<f32> {
        &self.upper
    }
}

impl Transform for ColumnClip {
    fn apply(&self, data: ArrayView2<f32>) -> Array2<f32> {
        let mut out = data.to_owned();
        self.apply_inplace(&mut out);
        out
    }

    fn apply_inplace(&self, data: &mut Array2<f32>) {
        for mut row in data.axis_iter_mut(Axis(0)) {
            Zip::from(&mut row)
                .and(&self.lower)
                .and(&self.upper)
                .for_each(|x, &lo, &hi| *x = x.clamp(lo, hi));
        }
    }
}

/// Перцентиль упорядоченного среза с линейной интерполяцией.
pub(crate) fn percentile_of_sorted(sorted: &[f32], percentile: f32) -> f32 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = f64::from(percentile) / 100.0 * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    let a = f64::from(sorted[lo]);
    let b = f64::from(sorted[hi]);
    (a + (b - a) * frac) as f32
}
