// --- Файл: src/serialization/archive.rs ---

//! Архив датасета: одна сжатая deflate запись zip с буфером SafeTensors.
//!
//! Именованные массивы:
//! - `_data`, `_test_data`: обучающая и тестовая матрицы (F32)
//! - `_labels`, `_test_labels`: векторы меток (I64), если есть метки
//! - `_min`, `_max`: параметры min-max (F32)
//! - `_components`, `_mean_offset`: параметры PCA (F32)
//!
//! Заголовок метаданных SafeTensors содержит `_labeled` и списки строк
//! `_colnames` и `_markers` в JSON.

use crate::data::{Dataset, RawSplit};
use crate::error::{PrepError, Result};
use crate::normalize::NormalizationParams;
use ndarray::{Array1, Array2, ArrayD, Ix1, Ix2};
use safetensors::tensor::{Dtype, SafeTensors, TensorView};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Имя записи zip с тензорами.
pub const ENTRY_NAME: &str = "dataset.safetensors";
/// Метка формата в заголовке метаданных.
pub const FORMAT_VERSION: &str = "cytoprep-1";

const KEY_DATA: &str = "_data";
const KEY_TEST_DATA: &str = "_test_data";
const KEY_LABELS: &str = "_labels";
const KEY_TEST_LABELS: &str = "_test_labels";
const KEY_MIN: &str = "_min";
const KEY_MAX: &str = "_max";
const KEY_COMPONENTS: &str = "_components";
const KEY_MEAN_OFFSET: &str = "_mean_offset";
const META_LABELED: &str = "_labeled";
const META_COLNAMES: &str = "_colnames";
const META_MARKERS: &str = "_markers";
const META_FORMAT: &str = "_format";

/// Байты массива в little-endian, живут, пока на них ссылаются представления.
struct Encoded {
    name: &'static str,
    dtype: Dtype,
    shape: Vec<usize>,
    bytes: Vec<u8>,
}

impl Encoded {
    fn f32<D: ndarray::Dimension>(name: &'static str, arr: &ndarray::Array<f32, D>) -> Self {
        Self {
            name,
            dtype: Dtype::F32,
            shape: arr.shape().to_vec(),
            bytes: arr.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }

    fn i64(name: &'static str, arr: &Array1<i64>) -> Self {
        Self {
            name,
            dtype: Dtype::I64,
            shape: arr.shape().to_vec(),
            bytes: arr.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }
}

/// Сериализует датасет в байты SafeTensors (без сжатия).
pub fn encode_dataset(dataset: &Dataset) -> Result<Vec<u8>> {
    let mut arrays = vec![
        Encoded::f32(KEY_DATA, &dataset.train().to_owned()),
        Encoded::f32(KEY_TEST_DATA, &dataset.test().to_owned()),
    ];
    if let (Some(train_labels), Some(test_labels)) = (dataset.train_labels(), dataset.test_labels()) {
        arrays.push(Encoded::i64(KEY_LABELS, &train_labels.to_owned()));
        arrays.push(Encoded::i64(KEY_TEST_LABELS, &test_labels.to_owned()));
    }
    match dataset.params() {
        NormalizationParams::None => {}
        NormalizationParams::MinMax { min, max } => {
            arrays.push(Encoded::f32(KEY_MIN, min));
            arrays.push(Encoded::f32(KEY_MAX, max));
        }
        NormalizationParams::Pca {
            components,
            mean_offset,
            min,
            max,
        } => {
            arrays.push(Encoded::f32(KEY_COMPONENTS, components));
            arrays.push(Encoded::f32(KEY_MEAN_OFFSET, mean_offset));
            if let (Some(min), Some(max)) = (min, max) {
                arrays.push(Encoded::f32(KEY_MIN, min));
                arrays.push(Encoded::f32(KEY_MAX, max));
            }
        }
    }

    let mut metadata = HashMap::new();
    metadata.insert(META_FORMAT.to_string(), FORMAT_VERSION.to_string());
    metadata.insert(META_LABELED.to_string(), dataset.is_labeled().to_string());
    if let Some(names) = dataset.column_names() {
        metadata.insert(META_COLNAMES.to_string(), serde_json::to_string(names)?);
    }
    if let Some(markers) = dataset.markers() {
        metadata.insert(META_MARKERS.to_string(), serde_json::to_string(markers)?);
    }

    let mut views: Vec<(&str, TensorView<'_>)> = Vec::with_capacity(arrays.len());
    for array in &arrays {
        views.push((
            array.name,
            TensorView::new(array.dtype, array.shape.clone(), &array.bytes)?,
        ));
    }

    Ok(safetensors::serialize(views, &Some(metadata))?)
}

/// Разбирает байты SafeTensors, записанные [`encode_dataset`].
pub fn decode_split(buffer: &[u8]) -> Result<(RawSplit, NormalizationParams)> {
    let (_, header) = SafeTensors::read_metadata(buffer)?;
    let metadata = header.metadata().clone().unwrap_or_default();
    let tensors = SafeTensors::deserialize(buffer)?;

    let train = read_matrix(&tensors, KEY_DATA)?
        .ok_or_else(|| PrepError::malformed(format!("missing `{KEY_DATA}`")))?;
    let test = read_matrix(&tensors, KEY_TEST_DATA)?
        .unwrap_or_else(|| Array2::zeros((0, train.ncols())));

    let labeled = match metadata.get(META_LABELED).map(String::as_str) {
        Some("true") => true,
        Some("false") => false,
        Some(other) => {
            return Err(PrepError::malformed(format!("`{META_LABELED}` is `{other}`")));
        }
        None => return Err(PrepError::malformed(format!("missing `{META_LABELED}`"))),
    };

    let train_labels = read_labels(&tensors, KEY_LABELS)?;
    let test_labels = read_labels(&tensors, KEY_TEST_LABELS)?;
    let labels = match (labeled, train_labels, test_labels) {
        (true, Some(train_labels), Some(test_labels)) => {
            if train_labels.len() != train.nrows() {
                return Err(PrepError::malformed(format!(
                    "`{KEY_LABELS}` has {} entries for {} rows",
                    train_labels.len(),
                    train.nrows()
                )));
            }
            if test_labels.len() != test.nrows() {
                return Err(PrepError::malformed(format!(
                    "`{KEY_TEST_LABELS}` has {} entries for {} rows",
                    test_labels.len(),
                    test.nrows()
                )));
            }
            Some((train_labels, test_labels))
        }
        (true, _, _) => {
            return Err(PrepError::malformed(format!(
                "labeled archive without `{KEY_LABELS}` and `{KEY_TEST_LABELS}`"
            )));
        }
        (false, None, None) => None,
        (false, _, _) => {
            return Err(PrepError::malformed("unlabeled archive carries label arrays"));
        }
    };

    let params = read_params(&tensors)?;
    let column_names = read_strings(&metadata, META_COLNAMES)?;
    let markers = read_strings(&metadata, META_MARKERS)?;

    let split = RawSplit {
        train,
        test,
        labels,
        column_names,
        markers,
    };
    Ok((split, params))
}

/// Записывает `dataset` в `path`.
///
/// Архив сначала пишется в `<path>.tmp` и переименовывается при успехе.
pub fn save_dataset<P: AsRef<Path>>(path: P, dataset: &Dataset) -> Result<()> {
    let path = path.as_ref();
    let bytes = encode_dataset(dataset)?;
    let tmp = temp_path(path);

    let written = write_zip(&tmp, &bytes);
    if let Err(e) = written {
        fs::remove_file(&tmp).ok();
        return Err(e);
    }
    fs::rename(&tmp, path)?;

    info!(path = %path.display(), bytes = bytes.len(), "saved dataset archive");
    Ok(())
}

/// Читает матрицы, метки и параметры из `path`.
pub fn load_split<P: AsRef<Path>>(path: P) -> Result<(RawSplit, NormalizationParams)> {
    let path = path.as_ref();
    let buffer = read_entry(path)?;
    let (split, params) = decode_split(&buffer)?;
    info!(
        path = %path.display(),
        train_rows = split.train.nrows(),
        test_rows = split.test.nrows(),
        kind = params.kind(),
        "loaded dataset archive"
    );
    Ok((split, params))
}

/// Имена, формы и типы массивов в `path`.
pub fn array_info<P: AsRef<Path>>(path: P) -> Result<Vec<(String, Vec<usize>, String)>> {
    let buffer = read_entry(path.as_ref())?;
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut info: Vec<_> = tensors
        .tensors()
        .into_iter()
        .map(|(name, view)| (name, view.shape().to_vec(), format!("{:?}", view.dtype())))
        .collect();
    info.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(info)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_zip(path: &Path, bytes: &[u8]) -> Result<()> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(bytes.len() as u64 > u64::from(u32::MAX));
    zip.start_file(ENTRY_NAME, options)?;
    zip.write_all(bytes)?;
    zip.finish()?;
    Ok(())
}

fn read_entry(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut zip = ZipArchive::new(file)?;
    let mut entry = match zip.by_name(ENTRY_NAME) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(PrepError::malformed(format!("no `{ENTRY_NAME}` entry")));
        }
        Err(e) => return Err(e.into()),
    };
    // размер из заголовка zip не используется для выделения памяти
    let mut buffer = Vec::new();
    entry.read_to_end(&mut buffer)?;
    Ok(buffer)
}

fn read_f32(tensors: &SafeTensors<'_>, name: &str) -> Result<Option<ArrayD<f32>>> {
    let view = match tensors.tensor(name) {
        Ok(view) => view,
        Err(_) => return Ok(None),
    };
    if view.dtype() != Dtype::F32 {
        return Err(PrepError::malformed(format!(
            "`{name}` has dtype {:?}, expected F32",
            view.dtype()
        )));
    }
    let values: Vec<f32> = view
        .data()
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let arr = ArrayD::from_shape_vec(ndarray::IxDyn(view.shape()), values)
        .map_err(|e| PrepError::malformed(format!("`{name}`: {e}")))?;
    Ok(Some(arr))
}

fn read_matrix(tensors: &SafeTensors<'_>, name: &str) -> Result<Option<Array2<f32>>> {
    read_f32(tensors, name)?
        .map(|arr| {
            arr.into_dimensionality::<Ix2>()
                .map_err(|_| PrepError::malformed(format!("`{name}` is not a matrix")))
        })
        .transpose()
}

fn read_vector(tensors: &SafeTensors<'_>, name: &str) -> Result<Option<Array1<f32>>> {
    read_f32(tensors, name)?
        .map(|arr| {
            arr.into_dimensionality::<Ix1>()
                .map_err(|_| PrepError::malformed(format!("`{name}` is not a vector")))
        })
        .transpose()
}

fn read_labels(tensors: &SafeTensors<'_>, name: &str) -> Result<Option<Array1<i64>>> {
    let view = match tensors.tensor(name) {
        Ok(view) => view,
        Err(_) => return Ok(None),
    };
    if view.dtype() != Dtype::I64 || view.shape().len() != 1 {
        return Err(PrepError::malformed(format!(
            "`{name}` must be a 1-D I64 array, found {:?} {:?}",
            view.dtype(),
            view.shape()
        )));
    }
    let values: Vec<i64> = view
        .data()
        .chunks_exact(8)
        .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect();
    Ok(Some(Array1::from(values)))
}

fn read_params(tensors: &SafeTensors<'_>) -> Result<NormalizationParams> {
    let min = read_vector(tensors, KEY_MIN)?;
    let max = read_vector(tensors, KEY_MAX)?;
    let components = read_matrix(tensors, KEY_COMPONENTS)?;
    let mean_offset = read_vector(tensors, KEY_MEAN_OFFSET)?;

    if min.is_some() != max.is_some() {
        return Err(PrepError::malformed(format!(
            "`{KEY_MIN}` and `{KEY_MAX}` must be stored together"
        )));
    }

    match (components, mean_offset) {
        (Some(components), Some(mean_offset)) => Ok(NormalizationParams::Pca {
            components,
            mean_offset,
            min,
            max,
        }),
        (None, None) => match (min, max) {
            (Some(min), Some(max)) => Ok(NormalizationParams::MinMax { min, max }),
            _ => Ok(NormalizationParams::None),
        },
        _ => Err(PrepError::malformed(format!(
            "`{KEY_COMPONENTS}` and `{KEY_MEAN_OFFSET}` must be stored together"
        ))),
    }
}

fn read_strings(metadata: &HashMap<String, String>, key: &str) -> Result<Option<Vec<String>>> {
    metadata
        .get(key)
        .map(|text| {
            serde_json::from_str(text)
                .map_err(|e| PrepError::malformed(format!("`{key}` is not a string list: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn labeled_dataset() -> Dataset {
        let split = RawSplit::new(
            array![[0.1_f32, 0.2], [0.3, 0.4], [0.5, 0.6]],
            array![[0.7_f32, 0.8]],
        )
        .with_labels(array![1, 2, 3], array![4])
        .with_column_names(vec!["CD4".into(), "CD8".into()])
        .with_markers(vec!["CD8".into()]);
        let params = NormalizationParams::MinMax {
            min: array![0.0, 1.0],
            max: array![2.0, 3.0],
        };
        Dataset::from_split(split, params, false, &mut StdRng::seed_from_u64(0)).unwrap()
    }

    #[test]
    fn test_encode_decode() {
        let dataset = labeled_dataset();
        let bytes = encode_dataset(&dataset).unwrap();
        let (split, params) = decode_split(&bytes).unwrap();

        assert_eq!(split.train, dataset.train());
        assert_eq!(split.test, dataset.test());
        let (train_labels, test_labels) = split.labels.unwrap();
        assert_eq!(train_labels, array![1, 2, 3]);
        assert_eq!(test_labels, array![4]);
        assert_eq!(split.column_names.unwrap(), vec!["CD4", "CD8"]);
        assert_eq!(split.markers.unwrap(), vec!["CD8"]);
        assert_eq!(&params, dataset.params());
    }

    #[test]
    fn test_missing_data_is_malformed() {
        let labels = array![1.0_f32, 2.0];
        let bytes: Vec<u8> = labels.iter().flat_map(|x| x.to_le_bytes()).collect();
        let view = TensorView::new(Dtype::F32, vec![2], &bytes).unwrap();
        let mut metadata = HashMap::new();
        metadata.insert(META_LABELED.to_string(), "false".to_string());
        let buffer = safetensors::serialize(vec![("_other", view)], &Some(metadata)).unwrap();

        let err = decode_split(&buffer).unwrap_err();
        assert!(matches!(err, PrepError::MalformedArchive(_)));
    }

    #[test]
    fn test_labeled_without_labels_is_malformed() {
        let data = array![[1.0_f32, 2.0]];
        let bytes: Vec<u8> = data.iter().flat_map(|x| x.to_le_bytes()).collect();
        let view = TensorView::new(Dtype::F32, vec![1, 2], &bytes).unwrap();
        let mut metadata = HashMap::new();
        metadata.insert(META_LABELED.to_string(), "true".to_string());
        let buffer = safetensors::serialize(vec![(KEY_DATA, view)], &Some(metadata)).unwrap();

        let err = decode_split(&buffer).unwrap_err();
        assert!(matches!(err, PrepError::MalformedArchive(_)));
    }

    #[test]
    fn test_label_count_mismatch_is_malformed() {
        let data = array![[1.0_f32, 2.0], [3.0, 4.0]];
        let data_bytes: Vec<u8> = data.iter().flat_map(|x| x.to_le_bytes()).collect();
        let labels_bytes: Vec<u8> = [7_i64].iter().flat_map(|x| x.to_le_bytes()).collect();
        let test_labels_bytes: Vec<u8> = Vec::new();
        let mut metadata = HashMap::new();
        metadata.insert(META_LABELED.to_string(), "true".to_string());
        let buffer = safetensors::serialize(
            vec![
                (KEY_DATA, TensorView::new(Dtype::F32, vec![2, 2], &data_bytes).unwrap()),
                (KEY_LABELS, TensorView::new(Dtype::I64, vec![1], &labels_bytes).unwrap()),
                (
                    KEY_TEST_LABELS,
                    TensorView::new(Dtype::I64, vec![0], &test_labels_bytes).unwrap(),
                ),
            ],
            &Some(metadata),
        )
        .unwrap();

        let err = decode_split(&buffer).unwrap_err();
        assert!(matches!(err, PrepError::MalformedArchive(_)));
    }

    #[test]
    fn test_save_load_file() {
        let dataset = labeled_dataset();
        let path = std::env::temp_dir().join(format!("cytoprep_archive_{}.zip", std::process::id()));

        save_dataset(&path, &dataset).expect("Failed to save");
        assert!(!temp_path(&path).exists());

        let names: Vec<String> = array_info(&path)
            .expect("Failed to list")
            .into_iter()
            .map(|(name, _, _)| name)
            .collect();
        assert!(names.contains(&"_data".to_string()));
        assert!(names.contains(&"_min".to_string()));

        let loaded = Dataset::load(&path, false, &mut StdRng::seed_from_u64(0)).expect("Failed to load");
        assert_eq!(loaded.train(), dataset.train());
        assert_eq!(loaded.params(), dataset.params());
        assert!(loaded.is_labeled());

        fs::remove_file(path).ok();
    }

    #[test]
    fn test_inflated_size_header_is_not_trusted() {
        let dataset = labeled_dataset();
        let bytes = encode_dataset(&dataset).unwrap();
        let path = std::env::temp_dir().join(format!("cytoprep_size_{}.zip", std::process::id()));
        save_dataset(&path, &dataset).expect("Failed to save");

        // поле uncompressed size в центральном каталоге: сигнатура 0x02014b50, смещение 24
        let mut raw = fs::read(&path).expect("Failed to read");
        let header = raw
            .windows(4)
            .rposition(|w| w == [0x50, 0x4b, 0x01, 0x02])
            .expect("Failed to find central directory");
        raw[header + 24..header + 28].copy_from_slice(&0x7fff_fff0_u32.to_le_bytes());
        fs::write(&path, &raw).expect("Failed to write");

        // ошибка допустима, неверные данные нет
        if let Ok(buffer) = read_entry(&path) {
            assert_eq!(buffer, bytes);
        }

        fs::remove_file(path).ok();
    }
}
