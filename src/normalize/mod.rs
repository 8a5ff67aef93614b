// --- Файл: src/normalize/mod.rs ---

//! # Normalization Module
//!
//! Family-specific pipelines mapping raw measurement matrices to a bounded
//! representation, together with the parameters needed to map back.
//!
//! ## Families
//!
//! - [`DatasetFamily::Cytof`]: `asinh(x / 5)` compression followed by
//!   per-column min-max scaling. Invertible to the compressed scale, and to
//!   raw units through [`ArcsinhCompress::invert`].
//! - [`DatasetFamily::RnaSeq`]: per-column clipping at the 99.5th
//!   percentile followed by a 15-dimensional PCA projection. The clipping is
//!   lossy and the projection only approximately invertible.
//! - [`DatasetFamily::Raw`]: data passed through unchanged.
//!
//! Parameters are fitted once on the union of train and test rows and then
//! frozen in [`NormalizationParams`].

pub mod minmax;
pub mod pca;
pub mod transforms;

pub use minmax::MinMaxScaler;
pub use pca::Pca;
pub use transforms::{ArcsinhCompress, ColumnClip, Transform};

use crate::config::PrepConfig;
use crate::error::{PrepError, Result};
use ndarray::{concatenate, s, Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Which normalization branch a dataset goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DatasetFamily {
    /// Bounded-count measurements (mass cytometry)
    Cytof,
    /// Continuous high-dimensional measurements (single-cell RNA-seq)
    RnaSeq,
    /// No normalization
    #[default]
    Raw,
}

impl DatasetFamily {
    /// Maps a known dataset name to its family. Unknown names are `Raw`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "flu" | "zika" | "emt_cytof" => DatasetFamily::Cytof,
            "emt_rnaseq" | "mouse" => DatasetFamily::RnaSeq,
            _ => DatasetFamily::Raw,
        }
    }
}

/// Frozen normalization parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NormalizationParams {
    #[default]
    None,
    MinMax {
        min: Array1<f32>,
        max: Array1<f32>,
    },
    Pca {
        /// `[pca_dims, d_original]`
        components: Array2<f32>,
        mean_offset: Array1<f32>,
        /// Optional min-max scaling of the projection
        min: Option<Array1<f32>>,
        max: Option<Array1<f32>>,
    },
}

impl NormalizationParams {
    pub fn kind(&self) -> &'static str {
        match self {
            NormalizationParams::None => "none",
            NormalizationParams::MinMax { .. } => "minmax",
            NormalizationParams::Pca { .. } => "pca",
        }
    }

    /// Width of the matrices these parameters accept in `transform`.
    pub fn input_dim(&self) -> Option<usize> {
        match self {
            NormalizationParams::None => None,
            NormalizationParams::MinMax { min, .. } => Some(min.len()),
            NormalizationParams::Pca { mean_offset, .. } => Some(mean_offset.len()),
        }
    }

    /// Width of the matrices these parameters produce.
    pub fn output_dim(&self) -> Option<usize> {
        match self {
            NormalizationParams::None => None,
            NormalizationParams::MinMax { min, .. } => Some(min.len()),
            NormalizationParams::Pca { components, .. } => Some(components.nrows()),
        }
    }

    /// Applies frozen parameters to new raw rows.
    ///
    /// For `MinMax` this includes the arcsinh compression. For `Pca` the
    /// input is expected to be already clipped, since clipping bounds are
    /// not retained.
    pub fn transform(&self, data: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_finite(data)?;
        match self {
            NormalizationParams::None => Ok(data.to_owned()),
            NormalizationParams::MinMax { min, max } => {
                let scaler = MinMaxScaler::from_params(min.clone(), max.clone())?;
                let compressed = ArcsinhCompress::new().apply(data);
                scaler.transform(compressed.view())
            }
            NormalizationParams::Pca {
                components,
                mean_offset,
                min,
                max,
            } => {
                let pca = Pca::from_params(components.clone(), mean_offset.clone())?;
                let projected = pca.transform(data)?;
                match (min, max) {
                    (Some(min), Some(max)) => {
                        MinMaxScaler::from_params(min.clone(), max.clone())?
                            .transform(projected.view())
                    }
                    _ => Ok(projected),
                }
            }
        }
    }

    /// Maps normalized rows back.
    ///
    /// `MinMax` returns the compressed (post-asinh) scale; `Pca` returns an
    /// approximation in the clipped input space.
    pub fn inverse_transform(&self, data: ArrayView2<f32>) -> Result<Array2<f32>> {
        match self {
            NormalizationParams::None => Ok(data.to_owned()),
            NormalizationParams::MinMax { min, max } => {
                MinMaxScaler::from_params(min.clone(), max.clone())?.inverse_transform(data)
            }
            NormalizationParams::Pca {
                components,
                mean_offset,
                min,
                max,
            } => {
                let unscaled = match (min, max) {
                    (Some(min), Some(max)) => {
                        MinMaxScaler::from_params(min.clone(), max.clone())?
                            .inverse_transform(data)?
                    }
                    _ => data.to_owned(),
                };
                Pca::from_params(components.clone(), mean_offset.clone())?
                    .inverse_transform(unscaled.view())
            }
        }
    }
}

/// Output of a pipeline fit: both splits transformed plus frozen parameters.
#[derive(Debug, Clone)]
pub struct FittedSplit {
    pub train: Array2<f32>,
    pub test: Array2<f32>,
    pub params: NormalizationParams,
}

/// Fits the normalization of one family over train ∪ test.
#[derive(Debug, Clone)]
pub struct NormalizationPipeline {
    family: DatasetFamily,
    pca_dims: usize,
    clip_percentile: f32,
    pca_minmax: bool,
    strict_degeneracy: bool,
    seed: u64,
}

impl NormalizationPipeline {
    pub fn new(family: DatasetFamily) -> Self {
        Self::from_config(&PrepConfig::default().with_family(family))
    }

    pub fn from_config(config: &PrepConfig) -> Self {
        Self {
            family: config.family,
            pca_dims: config.pca_dims,
            clip_percentile: config.clip_percentile,
            pca_minmax: config.pca_minmax,
            strict_degeneracy: config.strict_degeneracy,
            seed: config.seed,
        }
    }

    pub fn family(&self) -> DatasetFamily {
        self.family
    }

    /// Fits on the concatenation of both splits and transforms each.
    pub fn fit(&self, train: ArrayView2<f32>, test: ArrayView2<f32>) -> Result<FittedSplit> {
        if train.ncols() != test.ncols() {
            return Err(PrepError::invalid(format!(
                "train has {} columns but test has {}",
                train.ncols(),
                test.ncols()
            )));
        }
        check_finite(train)?;
        check_finite(test)?;

        let n_train = train.nrows();
        match self.family {
            DatasetFamily::Raw => Ok(FittedSplit {
                train: train.to_owned(),
                test: test.to_owned(),
                params: NormalizationParams::None,
            }),
            DatasetFamily::Cytof => {
                let compress = ArcsinhCompress::new();
                let train = compress.apply(train);
                let test = compress.apply(test);

                let all = concatenate(Axis(0), &[train.view(), test.view()])?;
                let scaler = MinMaxScaler::fit(all.view(), self.strict_degeneracy)?;
                let train = scaler.transform(train.view())?;
                let test = scaler.transform(test.view())?;
                info!(
                    rows = all.nrows(),
                    cols = all.ncols(),
                    "fitted arcsinh + min-max normalization"
                );

                let (min, max) = scaler.into_params();
                Ok(FittedSplit {
                    train,
                    test,
                    params: NormalizationParams::MinMax { min, max },
                })
            }
            DatasetFamily::RnaSeq => {
                let mut all = concatenate(Axis(0), &[train.view(), test.view()])?;
                let clip = ColumnClip::fit(all.view(), self.clip_percentile)?;
                clip.apply_inplace(&mut all);

                info!(shape = ?all.dim(), dims = self.pca_dims, "fitting PCA");
                let mut rng = StdRng::seed_from_u64(self.seed);
                let pca = Pca::fit_with_rng(all.view(), self.pca_dims, &mut rng)?;
                let mut projected = pca.transform(all.view())?;
                info!("done fitting PCA");

                let (min, max) = if self.pca_minmax {
                    let scaler = MinMaxScaler::fit(projected.view(), self.strict_degeneracy)?;
                    projected = scaler.transform(projected.view())?;
                    let (min, max) = scaler.into_params();
                    (Some(min), Some(max))
                } else {
                    (None, None)
                };

                let train = projected.slice(s![..n_train, ..]).to_owned();
                let test = projected.slice(s![n_train.., ..]).to_owned();
                let (components, mean_offset) = pca.into_params();
                Ok(FittedSplit {
                    train,
                    test,
                    params: NormalizationParams::Pca {
                        components,
                        mean_offset,
                        min,
                        max,
                    },
                })
            }
        }
    }
}

fn check_finite(data: ArrayView2<f32>) -> Result<()> {
    if let Some(pos) = data.iter().position(|x| !x.is_finite()) {
        let ncols = data.ncols().max(1);
        return Err(PrepError::invalid(format!(
            "non-finite value at row {}, column {}",
            pos / ncols,
            pos % ncols
        )));
    }
    Ok(())
}
