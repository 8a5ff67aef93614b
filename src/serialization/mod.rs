// --- Файл: src/serialization/mod.rs ---

//! Модуль сохранения и загрузки наборов данных.
//!
//! Архив - это zip-файл с единственной записью `dataset.safetensors`:
//! матрицы, метки и параметры нормализации хранятся как тензоры,
//! флаг разметки, имена колонок и маркеры - в метаданных заголовка.
//!
//! # Примеры
//!
//! ```rust,ignore
//! use cytoprep::serialization::{save_dataset, load_split};
//!
//! save_dataset("flu.zip", &dataset)?;
//! let (split, params) = load_split("flu.zip")?;
//! ```

pub mod archive;

pub use archive::{array_info, decode_split, encode_dataset, load_split, save_dataset};
