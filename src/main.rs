// --- Файл: src/main.rs ---
//! Командная строка для просмотра архивов, прогона сэмплера и
//! диагностики взаимной информации.

use clap::{Parser, Subcommand};
use cytoprep::metrics::{activation_mutual_info, ClusterAssignment, MiMethod};
use cytoprep::serialization::array_info;
use cytoprep::{Dataset, PrepConfig};
use ndarray::s;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Аргументы командной строки
#[derive(Parser, Debug)]
#[command(author, version, about = "cytoprep: single-cell dataset preparation", long_about = None)]
struct Args {
    /// JSON-файл с настройками `PrepConfig`
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Показать содержимое архива
    Inspect { archive: PathBuf },
    /// Прогнать сэмплер мини-батчей
    Sample {
        archive: PathBuf,
        #[arg(long)]
        batch_size: usize,
        #[arg(long, default_value_t = 1)]
        batches: usize,
        /// Перекрывает seed из конфигурации
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        no_shuffle: bool,
    },
    /// Взаимная информация обучающей матрицы и её обратного преобразования
    Mi {
        archive: PathBuf,
        /// Число кластеров; без него используется оценка по расстояниям
        #[arg(long)]
        k: Option<usize>,
        #[arg(long)]
        bins: Option<usize>,
        /// Кластеризовать `x` дважды, как в старых расчётах
        #[arg(long)]
        legacy: bool,
        /// Ограничение числа строк (попарные расстояния квадратичны)
        #[arg(long, default_value_t = 1000)]
        max_rows: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => PrepConfig::from_json_file(path)?,
        None => PrepConfig::default(),
    };
    debug!(?config, "configuration");

    match args.command {
        Command::Inspect { archive } => inspect(&archive, &config),
        Command::Sample {
            archive,
            batch_size,
            batches,
            seed,
            no_shuffle,
        } => sample(&archive, &config, batch_size, batches, seed, no_shuffle),
        Command::Mi {
            archive,
            k,
            bins,
            legacy,
            max_rows,
        } => mutual_info(&archive, &config, k, bins, legacy, max_rows),
    }
}

fn inspect(archive: &Path, config: &PrepConfig) -> Result<(), Box<dyn std::error::Error>> {
    for (name, shape, dtype) in array_info(archive)? {
        println!("{:<14} {:<6} {:?}", name, dtype, shape);
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let dataset = Dataset::load(archive, false, &mut rng)?;
    info!(
        train = dataset.num_samples(),
        test = dataset.test().nrows(),
        features = dataset.num_features(),
        labeled = dataset.is_labeled(),
        normalization = dataset.params().kind(),
        "archive loaded"
    );
    if let Some(names) = dataset.column_names() {
        println!("columns: {}", names.join(", "));
    }
    if let Some(markers) = dataset.markers() {
        println!("markers: {}", markers.join(", "));
    }
    Ok(())
}

fn sample(
    archive: &Path,
    config: &PrepConfig,
    batch_size: usize,
    batches: usize,
    seed: Option<u64>,
    no_shuffle: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(seed.unwrap_or(config.seed));
    let mut dataset = Dataset::load(archive, config.shuffle && !no_shuffle, &mut rng)?;

    let start_time = Instant::now();
    for _ in 0..batches {
        let batch = dataset.next_batch(batch_size, &mut rng)?;
        debug!(
            rows = batch.len(),
            index_in_epoch = dataset.index_in_epoch(),
            epochs_trained = dataset.epochs_trained(),
            batch_number = dataset.batch_number(),
            "batch"
        );
    }
    info!(
        batches,
        epochs_trained = dataset.epochs_trained(),
        index_in_epoch = dataset.index_in_epoch(),
        batch_number = dataset.batch_number(),
        elapsed = ?start_time.elapsed(),
        "sampling finished"
    );
    Ok(())
}

fn mutual_info(
    archive: &Path,
    config: &PrepConfig,
    k: Option<usize>,
    bins: Option<usize>,
    legacy: bool,
    max_rows: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let dataset = Dataset::load(archive, false, &mut rng)?;

    let rows = dataset.num_samples().min(max_rows);
    let x = dataset.train().slice(s![..rows, ..]).to_owned();
    let y = dataset.inverse_transform(x.view())?;

    let method = match k {
        Some(k) => MiMethod::Cluster {
            k,
            assignment: if legacy {
                ClusterAssignment::LegacySelfReferential
            } else {
                ClusterAssignment::Corrected
            },
        },
        None => MiMethod::Distance { bins },
    };
    let mi = activation_mutual_info(x.view(), y.view(), method, &mut rng)?;
    println!("mutual information ({rows} rows): {mi:.6} nats");
    Ok(())
}
