//! End-to-end checks: normalization, persistence and information
//! diagnostics over synthetic cytometry and RNA-seq matrices.

use cytoprep::data::train_test_split;
use cytoprep::metrics::{activation_mutual_info, MiMethod};
use cytoprep::normalize::{ArcsinhCompress, ColumnClip, Transform};
use cytoprep::{Dataset, DatasetFamily, NormalizationParams, PrepConfig, PrepError, RawSplit};
use ndarray::{concatenate, Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::PathBuf;

fn temp_archive(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("cytoprep_{}_{}.zip", name, std::process::id()))
}

fn counts(rows: usize, cols: usize, seed: u64) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((rows, cols), |_| rng.random_range(0.0..1000.0_f32))
}

fn max_abs_diff(a: &Array2<f32>, b: &Array2<f32>) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}

#[test]
fn archive_round_trip() {
    let path = temp_archive("round_trip");
    let config = PrepConfig::default().with_family(DatasetFamily::Cytof);
    let mut rng = StdRng::seed_from_u64(config.seed);

    let raw = counts(40, 4, 11);
    let labels = Array1::from_iter((0..40).map(|i| i % 3));
    let split = train_test_split(raw, Some(labels), config.train_ratio, &mut rng)
        .unwrap()
        .with_column_names(vec!["CD3".into(), "CD4".into(), "CD8".into(), "CD19".into()])
        .with_markers(vec!["CD4".into(), "CD8".into()]);
    let mut dataset = Dataset::from_raw(split, &config, &mut rng).unwrap();
    dataset.next_batch(7, &mut rng).unwrap();

    dataset.save(&path).expect("Failed to save dataset");
    let loaded = Dataset::load(&path, false, &mut rng).expect("Failed to load dataset");

    assert_eq!(loaded.train(), dataset.train());
    assert_eq!(loaded.test(), dataset.test());
    assert_eq!(loaded.train_labels(), dataset.train_labels());
    assert_eq!(loaded.test_labels(), dataset.test_labels());
    assert_eq!(loaded.params(), dataset.params());
    assert_eq!(loaded.column_names(), dataset.column_names());
    assert_eq!(loaded.markers(), dataset.markers());
    assert_eq!(loaded.index_in_epoch(), 0);
    assert_eq!(loaded.epochs_trained(), 0);

    fs::remove_file(&path).ok();
}

#[test]
fn prepare_persists_without_refitting() {
    let path = temp_archive("prepare");
    let config = PrepConfig::default()
        .with_family(DatasetFamily::RnaSeq)
        .with_pca_dims(4)
        .with_shuffle(false);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let labels = Array1::from_iter((0..50).map(|i| i % 2));
    let split = train_test_split(counts(50, 12, 61), Some(labels), config.train_ratio, &mut rng)
        .unwrap();

    let prepared = Dataset::prepare(split, &config, &path, &mut rng).expect("Failed to prepare");
    let loaded = Dataset::load(&path, false, &mut rng).expect("Failed to load dataset");

    assert_eq!(prepared.num_samples(), 45);
    assert_eq!(loaded.num_features(), 4);
    assert_eq!(loaded.params(), prepared.params());
    assert_eq!(loaded.train(), prepared.train());
    assert_eq!(loaded.test(), prepared.test());
    assert_eq!(loaded.train_labels(), prepared.train_labels());
    assert_eq!(
        loaded.inverse_transform(loaded.train()).unwrap(),
        prepared.inverse_transform(prepared.train()).unwrap()
    );

    fs::remove_file(&path).ok();
}

#[test]
fn unlabeled_archive_round_trip() {
    let path = temp_archive("unlabeled");
    let mut rng = StdRng::seed_from_u64(5);
    let split = RawSplit::new(counts(8, 3, 1), counts(2, 3, 2));
    let dataset = Dataset::from_raw(split, &PrepConfig::default(), &mut rng).unwrap();

    dataset.save(&path).unwrap();
    let mut loaded = Dataset::load(&path, true, &mut rng).unwrap();

    assert!(!loaded.is_labeled());
    assert_eq!(loaded.params(), &NormalizationParams::None);
    assert!(matches!(
        loaded.next_labeled_batch(2, &mut rng),
        Err(PrepError::InvalidArgument(_))
    ));

    fs::remove_file(&path).ok();
}

#[test]
fn truncated_archive_is_malformed() {
    let path = temp_archive("truncated");
    fs::write(&path, b"PK\x03\x04 not really a zip").unwrap();
    let mut rng = StdRng::seed_from_u64(0);
    assert!(Dataset::load(&path, false, &mut rng).is_err());
    fs::remove_file(&path).ok();
}

#[test]
fn minmax_inverse_recovers_compressed_values() {
    let config = PrepConfig::default()
        .with_family(DatasetFamily::Cytof)
        .with_shuffle(false);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let raw_train = counts(30, 5, 21);
    let raw_test = counts(6, 5, 22);
    let split = RawSplit::new(raw_train.clone(), raw_test);
    let dataset = Dataset::from_raw(split, &config, &mut rng).unwrap();

    assert!(dataset.train().iter().all(|&v| (0.0..=1.0).contains(&v)));

    let restored = dataset.inverse_transform(dataset.train()).unwrap();
    let expected = ArcsinhCompress::new().apply(raw_train.view());
    assert!(max_abs_diff(&restored, &expected) < 1e-5);
}

#[test]
fn pca_reconstruction_is_approximate() {
    let raw_train = counts(80, 30, 31);
    let raw_test = counts(20, 30, 32);
    let mut rng = StdRng::seed_from_u64(42);

    let reduced = PrepConfig::default()
        .with_family(DatasetFamily::RnaSeq)
        .with_pca_dims(5)
        .with_clip_percentile(100.0)
        .with_shuffle(false);
    let dataset = Dataset::from_raw(
        RawSplit::new(raw_train.clone(), raw_test.clone()),
        &reduced,
        &mut rng,
    )
    .unwrap();
    assert_eq!(dataset.num_features(), 5);
    let restored = dataset.inverse_transform(dataset.train()).unwrap();
    assert_eq!(restored.dim(), raw_train.dim());
    let lossy = max_abs_diff(&restored, &raw_train);
    assert!(lossy > 0.0 && lossy.is_finite());

    let full = reduced.clone().with_pca_dims(30);
    let dataset = Dataset::from_raw(RawSplit::new(raw_train.clone(), raw_test), &full, &mut rng)
        .unwrap();
    let restored = dataset.inverse_transform(dataset.train()).unwrap();
    assert!(max_abs_diff(&restored, &raw_train) < 1e-1);
    assert!(max_abs_diff(&restored, &raw_train) < lossy);
}

#[test]
fn clipping_bounds_reconstruction() {
    let mut raw_train = counts(60, 8, 41);
    raw_train[[0, 0]] = 1.0e6;
    let mut rng = StdRng::seed_from_u64(42);
    let config = PrepConfig::default()
        .with_family(DatasetFamily::RnaSeq)
        .with_pca_dims(8)
        .with_clip_percentile(90.0)
        .with_shuffle(false);

    let split = RawSplit::new(raw_train, counts(10, 8, 42));
    let dataset = Dataset::from_raw(split, &config, &mut rng).unwrap();
    let restored = dataset.inverse_transform(dataset.train()).unwrap();
    // the outlier is clipped away and cannot come back
    assert!(restored[[0, 0]] < 1.0e5);
}

#[test]
fn reconstruction_targets_clipped_input() {
    let mut raw_train = counts(60, 8, 71);
    raw_train[[0, 0]] = 1.0e4;
    let raw_test = counts(10, 8, 72);
    let mut rng = StdRng::seed_from_u64(42);
    let config = PrepConfig::default()
        .with_family(DatasetFamily::RnaSeq)
        .with_pca_dims(4)
        .with_shuffle(false);

    let all = concatenate(Axis(0), &[raw_train.view(), raw_test.view()]).unwrap();
    let clip = ColumnClip::fit(all.view(), config.clip_percentile).unwrap();
    let clipped = clip.apply(raw_train.view());
    assert!(clipped[[0, 0]] < raw_train[[0, 0]]);

    let split = RawSplit::new(raw_train.clone(), raw_test.clone());
    let dataset = Dataset::from_raw(split, &config, &mut rng).unwrap();
    let restored = dataset.inverse_transform(dataset.train()).unwrap();
    let to_clipped = max_abs_diff(&restored, &clipped);
    let to_raw = max_abs_diff(&restored, &raw_train);
    assert!(to_clipped.is_finite() && to_clipped > 0.0);
    assert!(to_clipped < to_raw, "clipped {to_clipped} vs raw {to_raw}");

    let full = config.with_pca_dims(8);
    let dataset = Dataset::from_raw(RawSplit::new(raw_train, raw_test), &full, &mut rng).unwrap();
    let restored = dataset.inverse_transform(dataset.train()).unwrap();
    assert!(max_abs_diff(&restored, &clipped) < 1.0);
}

#[test]
fn self_information_exceeds_noise() {
    let config = PrepConfig::default().with_family(DatasetFamily::Cytof);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let split = RawSplit::new(counts(80, 4, 51), counts(10, 4, 52));
    let dataset = Dataset::from_raw(split, &config, &mut rng).unwrap();

    let x = dataset.train().to_owned();
    let noise = Array2::from_shape_fn(x.dim(), |_| rng.random::<f32>());

    let own = activation_mutual_info(x.view(), x.view(), MiMethod::default(), &mut rng).unwrap();
    let other = activation_mutual_info(x.view(), noise.view(), MiMethod::default(), &mut rng).unwrap();
    assert!(own > other, "self {own} vs noise {other}");
}
