// --- Файл: src/config.rs ---

//! Настройки подготовки: семейство нормализации, разбиение и
//! перемешивание.

use crate::error::Result;
use crate::normalize::DatasetFamily;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Seed для разбиения и перемешивания по умолчанию.
pub const DEFAULT_SEED: u64 = 42;
/// Размерность PCA для многомерных семейств.
pub const DEFAULT_PCA_DIMS: usize = 15;
/// Верхний перцентиль обрезки перед PCA.
pub const DEFAULT_CLIP_PERCENTILE: f32 = 99.5;

/// Конфигурация конвейера подготовки.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepConfig {
    /// Семейство нормализации
    pub family: DatasetFamily,
    /// Доля строк в обучающей выборке
    pub train_ratio: f64,
    /// Seed генераторов разбиения и перемешивания
    pub seed: u64,
    /// Целевая размерность PCA
    pub pca_dims: usize,
    /// Верхний перцентиль обрезки, в [0, 100]
    pub clip_percentile: f32,
    /// Дополнительно min-max для проекции PCA
    pub pca_minmax: bool,
    /// Перемешивать строки при создании и на каждой новой эпохе
    pub shuffle: bool,
    /// Ошибка на столбцах нулевого размаха вместо единичного знаменателя
    pub strict_degeneracy: bool,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            family: DatasetFamily::Raw,
            train_ratio: 0.9,
            seed: DEFAULT_SEED,
            pca_dims: DEFAULT_PCA_DIMS,
            clip_percentile: DEFAULT_CLIP_PERCENTILE,
            pca_minmax: false,
            shuffle: true,
            strict_degeneracy: false,
        }
    }
}

impl PrepConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_family(mut self, family: DatasetFamily) -> Self {
        self.family = family;
        self
    }

    pub fn with_train_ratio(mut self, ratio: f64) -> Self {
        self.train_ratio = ratio;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_pca_dims(mut self, dims: usize) -> Self {
        self.pca_dims = dims;
        self
    }

    pub fn with_clip_percentile(mut self, percentile: f32) -> Self {
        self.clip_percentile = percentile;
        self
    }

    pub fn with_pca_minmax(mut self, enabled: bool) -> Self {
        self.pca_minmax = enabled;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_strict_degeneracy(mut self, strict: bool) -> Self {
        self.strict_degeneracy = strict;
        self
    }

    /// Читает конфигурацию из JSON. Отсутствующие поля берутся по умолчанию.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Записывает конфигурацию в форматированный JSON.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = PrepConfig::new()
            .with_family(DatasetFamily::Cytof)
            .with_seed(7)
            .with_shuffle(false);

        assert_eq!(config.family, DatasetFamily::Cytof);
        assert_eq!(config.seed, 7);
        assert!(!config.shuffle);
        assert_eq!(config.pca_dims, DEFAULT_PCA_DIMS);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PrepConfig =
            serde_json::from_str(r#"{ "family": "rna_seq", "pca_dims": 4 }"#).unwrap();

        assert_eq!(config.family, DatasetFamily::RnaSeq);
        assert_eq!(config.pca_dims, 4);
        assert_eq!(config.seed, DEFAULT_SEED);
        assert!((config.train_ratio - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_json_file_round_trip() {
        let path = std::env::temp_dir().join(format!("cytoprep_config_{}.json", std::process::id()));
        let config = PrepConfig::new().with_pca_minmax(true).with_clip_percentile(99.0);

        config.to_json_file(&path).expect("Failed to write config");
        let loaded = PrepConfig::from_json_file(&path).expect("Failed to read config");
        assert_eq!(loaded, config);

        std::fs::remove_file(path).ok();
    }
}
