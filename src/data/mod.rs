// --- Файл: src/data/mod.rs ---

//! # Data Module
//!
//! Holds the normalized train/test matrices and the minibatch sampler that
//! walks over them.
//!
//! ## Key Components
//!
//! - [`Dataset`]: normalized splits, labels, metadata and sampler counters
//! - [`SamplerState`]: pure epoch/batch state machine
//! - [`train_test_split`]: seeded row split of a raw matrix
//!
//! ## Example
//!
//! ```ignore
//! use cytoprep::data::{train_test_split, Dataset};
//! use cytoprep::PrepConfig;
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let config = PrepConfig::default();
//! let mut rng = StdRng::seed_from_u64(config.seed);
//! let split = train_test_split(matrix, None, config.train_ratio, &mut rng)?;
//! let mut dataset = Dataset::from_raw(split, &config, &mut rng)?;
//!
//! let batch = dataset.next_batch(128, &mut rng)?;
//! ```

pub mod dataset;
pub mod sampler;
pub mod split;

pub use dataset::{Batch, Dataset, RawSplit};
pub use sampler::{BatchPlan, SamplerState};
pub use split::train_test_split;
