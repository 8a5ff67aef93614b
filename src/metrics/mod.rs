// --- Файл: src/metrics/mod.rs ---

//! Модуль информационных метрик для активаций.
//!
//! - **Взаимная информация**: гистограммная оценка по попарным расстояниям
//!   или по меткам k-means
//! - **Кластеризация**: k-means++ и бинаризация активаций
//!
//! # Пример использования
//!
//! ```rust,ignore
//! use cytoprep::metrics::{activation_mutual_info, MiMethod};
//!
//! let mi = activation_mutual_info(x.view(), y.view(), MiMethod::default(), &mut rng)?;
//! println!("MI: {:.4} nats", mi);
//! ```

pub mod clustering;
pub mod mutual_info;

pub use clustering::{binarize, Binarized, KMeans, KMeansFit};
pub use mutual_info::{
    activation_mutual_info, default_bins, histogram2d, mutual_info_from_contingency,
    mutual_info_labels, pairwise_distances, ClusterAssignment, MiMethod,
};
