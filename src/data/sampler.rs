// --- Файл: src/data/sampler.rs ---

//! Учёт эпох и батчей для сэмплера мини-батчей.
//!
//! [`SamplerState::step`] - чистая функция счётчиков, числа обучающих строк
//! и размера батча. Она возвращает новое состояние и [`BatchPlan`] с
//! выбранными строками, так что датасет собирает батч до того, как что-либо
//! зафиксировать.

use crate::error::{PrepError, Result};
use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::Rng;

/// Счётчики автомата сэмплера. Начальное состояние - все нули.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SamplerState {
    /// Позиция следующей непрочитанной строки, в `[0, num_samples)`
    pub index_in_epoch: usize,
    /// Число завершённых проходов по обучающим строкам
    pub epochs_trained: usize,
    /// Батчи, выданные с последнего перехода эпохи
    pub batch_number: usize,
}

/// Строки одного батча.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPlan {
    /// Строки `[start, end)` текущего порядка.
    Contiguous { start: usize, end: usize },
    /// Строки `[tail_start, num_samples)` текущего порядка, затем
    /// строки `[0, head_len)` порядка следующей эпохи.
    Wrap { tail_start: usize, head_len: usize },
}

impl BatchPlan {
    pub fn wraps(&self) -> bool {
        matches!(self, BatchPlan::Wrap { .. })
    }
}

impl SamplerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Сдвигает счётчики на один батч из `batch_size` строк.
    ///
    /// Батч, который ровно доходит до конца эпохи, закрывает её (с пустой
    /// головой), поэтому `index_in_epoch` остаётся в `[0, num_samples)`.
    /// Следствие: `batch_number` сбрасывается в 1 уже на батче, закрывающем
    /// эпоху. При `num_samples = 12` и `batch_size = 4` номера идут
    /// 1, 2, 1, 2, 3, 1, ... а не 1, 2, 3, 1, 2, 3.
    ///
    /// Ошибка `InvalidArgument`, если не `0 < batch_size <= num_samples`.
    pub fn step(self, num_samples: usize, batch_size: usize) -> Result<(SamplerState, BatchPlan)> {
        if batch_size == 0 || batch_size > num_samples {
            return Err(PrepError::invalid(format!(
                "batch size must be in [1, {num_samples}], got {batch_size}"
            )));
        }

        let start = self.index_in_epoch;
        if start + batch_size < num_samples {
            let next = SamplerState {
                index_in_epoch: start + batch_size,
                epochs_trained: self.epochs_trained,
                batch_number: self.batch_number + 1,
            };
            return Ok((next, BatchPlan::Contiguous { start, end: start + batch_size }));
        }

        let remaining = batch_size - (num_samples - start);
        let next = SamplerState {
            index_in_epoch: remaining,
            epochs_trained: self.epochs_trained + 1,
            // сброс при переходе, затем учёт этого батча
            batch_number: 1,
        };
        Ok((
            next,
            BatchPlan::Wrap {
                tail_start: start,
                head_len: remaining,
            },
        ))
    }
}

/// Равномерная случайная перестановка `0..n`.
pub fn permutation<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    indices
}

/// Переставляет строки `data` и `labels` одной общей перестановкой.
pub fn permute_rows(
    data: &Array2<f32>,
    labels: Option<&Array1<i64>>,
    order: &[usize],
) -> (Array2<f32>, Option<Array1<i64>>) {
    let data = data.select(Axis(0), order);
    let labels = labels.map(|l| l.select(Axis(0), order));
    (data, labels)
}
