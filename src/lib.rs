//! # cytoprep: single-cell dataset preparation in Rust
//!
//! **cytoprep** turns raw cells-by-features matrices (mass cytometry or
//! RNA-seq) into normalized train/test splits, serves them as shuffled
//! minibatches, persists them as compressed archives and offers
//! mutual-information diagnostics over activation matrices.
//!
//! ## Usage Example
//!
//! ```no_run
//! use cytoprep::data::{train_test_split, Dataset};
//! use cytoprep::normalize::DatasetFamily;
//! use cytoprep::PrepConfig;
//! use ndarray::Array2;
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! # fn main() -> cytoprep::Result<()> {
//! let config = PrepConfig::default().with_family(DatasetFamily::Cytof);
//! let mut rng = StdRng::seed_from_u64(config.seed);
//!
//! // 1. Split the raw matrix
//! let raw = Array2::<f32>::ones((100, 8));
//! let split = train_test_split(raw, None, config.train_ratio, &mut rng)?;
//!
//! // 2. Normalize and build the dataset
//! let mut dataset = Dataset::from_raw(split, &config, &mut rng)?;
//!
//! // 3. Draw batches and persist
//! let batch = dataset.next_batch(16, &mut rng)?;
//! assert_eq!(batch.len(), 16);
//! dataset.save("cytof.zip")?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod normalize;
pub mod serialization;

pub use config::PrepConfig;
pub use data::{Batch, Dataset, RawSplit};
pub use error::{PrepError, Result};
pub use normalize::{DatasetFamily, NormalizationParams};
