// --- Файл: src/data/split.rs ---

//! Разбиение матрицы клетки × признаки на обучающую и тестовую части.

use super::dataset::RawSplit;
use super::sampler::{permutation, permute_rows};
use crate::error::{PrepError, Result};
use ndarray::{s, Array1, Array2};
use rand::Rng;

/// Делит строки на обучающую и тестовую выборки после случайной
/// перестановки.
///
/// Обучающая часть получает `floor(train_ratio * n)` строк, считая в `f64`.
/// Метки, если они есть, переставляются тем же порядком, что и данные.
pub fn train_test_split<R: Rng + ?Sized>(
    data: Array2<f32>,
    labels: Option<Array1<i64>>,
    train_ratio: f64,
    rng: &mut R,
) -> Result<RawSplit> {
    let n = data.nrows();
    if !(train_ratio > 0.0 && train_ratio <= 1.0) {
        return Err(PrepError::invalid(format!(
            "train ratio must be in (0, 1], got {train_ratio}"
        )));
    }
    if let Some(labels) = &labels {
        if labels.len() != n {
            return Err(PrepError::invalid(format!(
                "{} labels for {} rows",
                labels.len(),
                n
            )));
        }
    }
    let train_size = (n as f64 * train_ratio).floor() as usize;
    if train_size == 0 {
        return Err(PrepError::invalid(format!(
            "train ratio {train_ratio} leaves no training rows out of {n}"
        )));
    }

    let order = permutation(n, rng);
    let (data, labels) = permute_rows(&data, labels.as_ref(), &order);

    let train = data.slice(s![..train_size, ..]).to_owned();
    let test = data.slice(s![train_size.., ..]).to_owned();
    let labels = labels.map(|l| {
        (
            l.slice(s![..train_size]).to_owned(),
            l.slice(s![train_size..]).to_owned(),
        )
    });

    Ok(RawSplit {
        train,
        test,
        labels,
        column_names: None,
        markers: None,
    })
}
