// --- Файл: src/data/dataset.rs ---

//! Датасет в памяти и его сэмплер мини-батчей.

use super::sampler::{permutation, permute_rows, BatchPlan, SamplerState};
use crate::config::PrepConfig;
use crate::error::{PrepError, Result};
use crate::normalize::{NormalizationParams, NormalizationPipeline};
use crate::serialization::archive;
use ndarray::{concatenate, s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use std::path::Path;
use tracing::{debug, info};

/// Обучающая и тестовая матрицы от слоя загрузки.
#[derive(Debug, Clone, Default)]
pub struct RawSplit {
    /// Обучающие строки `[n_train, d]`
    pub train: Array2<f32>,
    /// Отложенные строки `[n_test, d]`
    pub test: Array2<f32>,
    /// `(train_labels, test_labels)`, выровнены по строкам матриц
    pub labels: Option<(Array1<i64>, Array1<i64>)>,
    pub column_names: Option<Vec<String>>,
    pub markers: Option<Vec<String>>,
}

impl RawSplit {
    pub fn new(train: Array2<f32>, test: Array2<f32>) -> Self {
        Self {
            train,
            test,
            ..Self::default()
        }
    }

    pub fn with_labels(mut self, train_labels: Array1<i64>, test_labels: Array1<i64>) -> Self {
        self.labels = Some((train_labels, test_labels));
        self
    }

    pub fn with_column_names(mut self, names: Vec<String>) -> Self {
        self.column_names = Some(names);
        self
    }

    pub fn with_markers(mut self, markers: Vec<String>) -> Self {
        self.markers = Some(markers);
        self
    }
}

/// Один мини-батч. Всегда ровно запрошенное число строк.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub data: Array2<f32>,
    pub labels: Option<Array1<i64>>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }

    /// Разделяет на `(data, labels)`, если у батча есть метки.
    pub fn into_labeled(self) -> Option<(Array2<f32>, Array1<i64>)> {
        let labels = self.labels?;
        Some((self.data, labels))
    }
}

/// Нормализованные матрицы, метки, происхождение и состояние сэмплера.
///
/// [`Dataset::next_batch`] проходит каждую обучающую строку ровно один раз
/// за эпоху. Батч, пересекающий границу эпохи, дополняется началом порядка
/// следующей эпохи.
#[derive(Debug, Clone)]
pub struct Dataset {
    train: Array2<f32>,
    test: Array2<f32>,
    train_labels: Option<Array1<i64>>,
    test_labels: Option<Array1<i64>>,
    column_names: Option<Vec<String>>,
    markers: Option<Vec<String>>,
    params: NormalizationParams,
    shuffle: bool,
    state: SamplerState,
}

impl Dataset {
    /// Строит датасет из уже нормализованных матриц.
    ///
    /// При `shuffle` обучающие строки переставляются один раз до первого
    /// батча.
    pub fn from_split<R: Rng + ?Sized>(
        split: RawSplit,
        params: NormalizationParams,
        shuffle: bool,
        rng: &mut R,
    ) -> Result<Self> {
        let RawSplit {
            train,
            test,
            labels,
            column_names,
            markers,
        } = split;

        if train.nrows() == 0 {
            return Err(PrepError::invalid("training matrix has no rows"));
        }
        if test.nrows() > 0 && train.ncols() != test.ncols() {
            return Err(PrepError::invalid(format!(
                "train has {} columns but test has {}",
                train.ncols(),
                test.ncols()
            )));
        }
        if let Some(dim) = params.output_dim() {
            if dim != train.ncols() {
                return Err(PrepError::invalid(format!(
                    "normalization produces {} columns but train has {}",
                    dim,
                    train.ncols()
                )));
            }
        }
        if let Some((train_labels, test_labels)) = &labels {
            if train_labels.len() != train.nrows() || test_labels.len() != test.nrows() {
                return Err(PrepError::invalid(format!(
                    "labels ({}, {}) do not match rows ({}, {})",
                    train_labels.len(),
                    test_labels.len(),
                    train.nrows(),
                    test.nrows()
                )));
            }
        }
        if let Some(names) = &column_names {
            let expected = params.input_dim().unwrap_or(train.ncols());
            if names.len() != expected {
                return Err(PrepError::invalid(format!(
                    "{} column names for {} columns",
                    names.len(),
                    expected
                )));
            }
        }

        let (train_labels, test_labels) = match labels {
            Some((train_labels, test_labels)) => (Some(train_labels), Some(test_labels)),
            None => (None, None),
        };

        let mut dataset = Self {
            train,
            test,
            train_labels,
            test_labels,
            column_names,
            markers,
            params,
            shuffle,
            state: SamplerState::new(),
        };
        if shuffle {
            dataset.shuffle_now(rng);
        }
        Ok(dataset)
    }

    /// Применяет к сырым матрицам выбранное семейство нормализации,
    /// обученное на train ∪ test, и строит датасет.
    pub fn from_raw<R: Rng + ?Sized>(split: RawSplit, config: &PrepConfig, rng: &mut R) -> Result<Self> {
        let pipeline = NormalizationPipeline::from_config(config);
        let fitted = pipeline.fit(split.train.view(), split.test.view())?;
        info!(
            family = ?config.family,
            kind = fitted.params.kind(),
            train_rows = fitted.train.nrows(),
            test_rows = fitted.test.nrows(),
            "normalized dataset"
        );
        let split = RawSplit {
            train: fitted.train,
            test: fitted.test,
            ..split
        };
        Self::from_split(split, fitted.params, config.shuffle, rng)
    }

    /// Нормализует сырые матрицы и сразу сохраняет результат в `path`.
    ///
    /// Архив содержит нормализованные данные и параметры, поэтому
    /// [`Dataset::load`] восстанавливает их без повторного обучения.
    pub fn prepare<P: AsRef<Path>, R: Rng + ?Sized>(
        split: RawSplit,
        config: &PrepConfig,
        path: P,
        rng: &mut R,
    ) -> Result<Self> {
        let dataset = Self::from_raw(split, config, rng)?;
        dataset.save(path)?;
        Ok(dataset)
    }

    /// Число обучающих строк.
    pub fn num_samples(&self) -> usize {
        self.train.nrows()
    }

    /// Обучающие и тестовые строки вместе.
    pub fn len(&self) -> usize {
        self.train.nrows() + self.test.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_features(&self) -> usize {
        self.train.ncols()
    }

    pub fn train(&self) -> ArrayView2<'_, f32> {
        self.train.view()
    }

    pub fn test(&self) -> ArrayView2<'_, f32> {
        self.test.view()
    }

    pub fn is_labeled(&self) -> bool {
        self.train_labels.is_some()
    }

    pub fn train_labels(&self) -> Option<ArrayView1<'_, i64>> {
        self.train_labels.as_ref().map(|l| l.view())
    }

    pub fn test_labels(&self) -> Option<ArrayView1<'_, i64>> {
        self.test_labels.as_ref().map(|l| l.view())
    }

    pub fn column_names(&self) -> Option<&[String]> {
        self.column_names.as_deref()
    }

    pub fn markers(&self) -> Option<&[String]> {
        self.markers.as_deref()
    }

    pub fn params(&self) -> &NormalizationParams {
        &self.params
    }

    pub fn shuffle_enabled(&self) -> bool {
        self.shuffle
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    pub fn index_in_epoch(&self) -> usize {
        self.state.index_in_epoch
    }

    pub fn epochs_trained(&self) -> usize {
        self.state.epochs_trained
    }

    pub fn batch_number(&self) -> usize {
        self.state.batch_number
    }

    /// Перезаписывает счётчик эпох, например при продолжении обучения.
    pub fn set_epochs_trained(&mut self, epochs: usize) {
        self.state.epochs_trained = epochs;
    }

    /// Переставляет обучающие строки и метки одной новой перестановкой.
    pub fn shuffle_now<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let order = permutation(self.num_samples(), rng);
        let (train, labels) = permute_rows(&self.train, self.train_labels.as_ref(), &order);
        self.train = train;
        self.train_labels = labels;
    }

    /// Возвращает следующие `batch_size` обучающих строк.
    ///
    /// Батч и перемешивание новой эпохи вычисляются до изменения датасета,
    /// поэтому неудачный вызов не меняет состояние сэмплера.
    pub fn next_batch<R: Rng + ?Sized>(&mut self, batch_size: usize, rng: &mut R) -> Result<Batch> {
        let (next_state, plan) = self.state.step(self.num_samples(), batch_size)?;

        match plan {
            BatchPlan::Contiguous { start, end } => {
                let data = self.train.slice(s![start..end, ..]).to_owned();
                let labels = self
                    .train_labels
                    .as_ref()
                    .map(|l| l.slice(s![start..end]).to_owned());
                self.state = next_state;
                debug!(
                    batch = self.state.batch_number,
                    index = self.state.index_in_epoch,
                    "batch"
                );
                Ok(Batch { data, labels })
            }
            BatchPlan::Wrap { tail_start, head_len } => {
                let reshuffled = if self.shuffle {
                    let order = permutation(self.num_samples(), rng);
                    Some(permute_rows(&self.train, self.train_labels.as_ref(), &order))
                } else {
                    None
                };
                let (next_train, next_labels) = match &reshuffled {
                    Some((train, labels)) => (train, labels.as_ref()),
                    None => (&self.train, self.train_labels.as_ref()),
                };

                let data = concatenate(
                    Axis(0),
                    &[
                        self.train.slice(s![tail_start.., ..]),
                        next_train.slice(s![..head_len, ..]),
                    ],
                )?;
                let labels = match (&self.train_labels, next_labels) {
                    (Some(current), Some(next)) => Some(concatenate(
                        Axis(0),
                        &[current.slice(s![tail_start..]), next.slice(s![..head_len])],
                    )?),
                    _ => None,
                };

                if let Some((train, train_labels)) = reshuffled {
                    self.train = train;
                    self.train_labels = train_labels;
                }
                self.state = next_state;
                debug!(
                    epochs = self.state.epochs_trained,
                    index = self.state.index_in_epoch,
                    "epoch wrap"
                );
                Ok(Batch { data, labels })
            }
        }
    }

    /// Как [`Dataset::next_batch`], но возвращает `(data, labels)`.
    ///
    /// На датасете без меток ошибка `InvalidArgument`, сэмплер не сдвигается.
    pub fn next_labeled_batch<R: Rng + ?Sized>(
        &mut self,
        batch_size: usize,
        rng: &mut R,
    ) -> Result<(Array2<f32>, Array1<i64>)> {
        if !self.is_labeled() {
            return Err(PrepError::invalid("labels requested from an unlabeled dataset"));
        }
        self.next_batch(batch_size, rng)?
            .into_labeled()
            .ok_or_else(|| PrepError::invalid("labels requested from an unlabeled dataset"))
    }

    /// Возвращает нормализованные строки в исходное пространство.
    pub fn inverse_transform(&self, data: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.params.inverse_transform(data)
    }

    /// Записывает датасет в сжатый архив.
    ///
    /// Архив пишется рядом с `path` и переименовывается после завершения.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        archive::save_dataset(path, self)
    }

    /// Читает датасет, записанный [`Dataset::save`].
    ///
    /// Данные и параметры нормализации восстанавливаются как есть. Счётчики
    /// сэмплера начинаются с нуля, при `shuffle` строки переставляются
    /// один раз.
    pub fn load<P: AsRef<Path>, R: Rng + ?Sized>(path: P, shuffle: bool, rng: &mut R) -> Result<Self> {
        let (split, params) = archive::load_split(path)?;
        Self::from_split(split, params, shuffle, rng).map_err(|e| match e {
            PrepError::InvalidArgument(msg) => PrepError::MalformedArchive(msg),
            other => other,
        })
    }
}
