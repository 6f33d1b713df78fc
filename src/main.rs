use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use featurebank::db::models::DatasetKind;
use featurebank::db::{FeatureDatabase, StoreLayout};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "featurebank", version, about = "Chunked audio feature dataset store")]
struct Cli {
    /// Path to the feature store
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show store layout, example count and folders
    Info,

    /// Print one row of a dataset as JSON
    Row {
        /// Dataset name (spectrum, peak_heights, label, fileName, folder, ...)
        table: String,

        /// Row index (folder number for `folder`)
        index: usize,
    },

    /// Shuffle examples in place, keeping every dataset aligned
    Shuffle {
        /// Rows per shuffled chunk (defaults to the store chunk size)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Number of passes over the store (defaults to config shuffle_passes)
        #[arg(long)]
        passes: Option<usize>,

        /// Seed for a reproducible shuffle
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = featurebank::config::AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = config.resolve_db_path(cli.db_path);
    log::info!("Using feature store at {}", db_path.display());

    let layout = StoreLayout::new(config.chunk_size, config.features.band_count())
        .context("Invalid store layout")?;
    let mut db = FeatureDatabase::open_existing(&db_path, layout)
        .with_context(|| format!("Failed to open feature store {}", db_path.display()))?;

    match cli.command {
        Commands::Info => {
            let layout = db.layout();
            println!("Store:      {}", db_path.display());
            println!("Chunk size: {}", layout.chunk_size);
            println!("Bands:      {}", layout.band_count);
            println!("Examples:   {}", db.example_count());
            println!();
            println!("{:<16} {:>6} {:>6} {:>10}", "Dataset", "Type", "Width", "Rows");
            for spec in layout.specs() {
                let rows = db.dataset_extent(spec.name).context("Query failed")?;
                println!(
                    "{:<16} {:>6} {:>6} {:>10}",
                    spec.name,
                    spec.kind.as_str(),
                    spec.width,
                    rows
                );
            }
            if !db.folders().is_empty() {
                println!();
                println!("Folders:");
                for (i, folder) in db.folders().iter().enumerate() {
                    println!("  {i:>4}  {folder}");
                }
            }
        }

        Commands::Row { table, index } => {
            let (kind, _) = db.table_kind(&table)?;
            let value = match kind {
                DatasetKind::Double => serde_json::to_value(db.read_double_row(&table, index)?)?,
                DatasetKind::Int => serde_json::to_value(db.read_int_row(&table, index)?)?,
                DatasetKind::Text => serde_json::to_value(db.read_string_row(&table, index)?)?,
            };
            println!("{}", serde_json::to_string(&value)?);
        }

        Commands::Shuffle {
            chunk_size,
            passes,
            seed,
        } => {
            let chunk_size = chunk_size.unwrap_or(db.layout().chunk_size);
            let passes = passes.unwrap_or(config.shuffle_passes);
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };

            let pb = ProgressBar::new(1000);
            pb.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{bar:40.cyan/blue}] {percent}% ({eta} remaining)",
                )
                .context("Invalid progress template")?
                .progress_chars("=>-"),
            );

            let mut report = |fraction: f64| pb.set_position((fraction * 1000.0).round() as u64);
            db.shuffle(chunk_size, passes, &mut rng, Some(&mut report as &mut dyn FnMut(f64)))
                .context("Shuffle failed")?;
            pb.finish_and_clear();

            println!(
                "Shuffled {} examples ({} passes, chunk size {})",
                db.example_count(),
                passes,
                chunk_size
            );
        }
    }

    Ok(())
}
