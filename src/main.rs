use std::{path::PathBuf, process};

use clap::{Parser, Subcommand};
use log::{LevelFilter, debug};

use counterfeit_detector::{
    DetectorConfig, Inspector, Trainer,
    dataset::prepare_dataset,
    error::{ArtifactKind, DetectorError, Result},
    extractor::PatchProjectionEncoder,
};

#[derive(Parser)]
#[command(name = "counterfeit-detector")]
#[command(about = "One-class counterfeit packaging detection", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, env = "COUNTERFEIT_DETECTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Encoder name, resolved inside the weights directory
    #[arg(long, global = true)]
    model_name: Option<String>,

    /// Directory holding encoder weights
    #[arg(long, global = true)]
    weights_dir: Option<PathBuf>,

    /// Boundary model file
    #[arg(long, global = true)]
    boundary: Option<PathBuf>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Flatten a tree of product photos into one training directory
    Prepare {
        #[arg(long)]
        source: PathBuf,

        #[arg(long, default_value = "training_data/real")]
        dest: PathBuf,
    },

    /// Write a seeded patch-projection encoder to the weights directory
    InitEncoder {
        #[arg(long, default_value = "768")]
        dim: usize,

        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Fit the boundary on a directory of genuine images
    Train {
        #[arg(long, default_value = "training_data/real")]
        data: PathBuf,

        /// Tolerated fraction of training images outside the boundary
        #[arg(long)]
        contamination: Option<f64>,

        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Classify packaging photos; several photos are scored as one package
    Detect {
        #[arg(long = "image", required = true)]
        images: Vec<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        if let Some(hint) = hint(&e) {
            eprintln!("Hint: {}", hint);
        }
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => DetectorConfig::from_file(path)?,
        None => DetectorConfig::default(),
    };
    if let Some(name) = cli.model_name {
        config = config.with_model_name(name);
    }
    if let Some(dir) = cli.weights_dir {
        config = config.with_weights_dir(dir);
    }
    if let Some(path) = cli.boundary {
        config = config.with_boundary_path(path);
    }
    debug!("Effective configuration: {:?}", config);

    match cli.command {
        Commands::Prepare { source, dest } => {
            let report = prepare_dataset(&source, &dest)?;
            println!(
                "Copied {} image(s) into '{}' ({} renamed to avoid collisions)",
                report.copied,
                report.destination.display(),
                report.renamed
            );
        }
        Commands::InitEncoder { dim, seed } => {
            if dim == 0 {
                return Err(DetectorError::InvalidParameter("--dim must be at least 1".into()));
            }
            let path = config.weights_dir.join(format!("{}.json", config.model_name));
            PatchProjectionEncoder::seeded(config.model_name.as_str(), dim, seed).save(&path)?;
            println!("Wrote {}-dimensional encoder to '{}'", dim, path.display());
        }
        Commands::Train {
            data,
            contamination,
            batch_size,
        } => {
            if let Some(nu) = contamination {
                config.fit.contamination = nu;
            }
            if let Some(size) = batch_size {
                config = config.with_batch_size(size);
            }

            let report = Trainer::new(config).run(&data)?;
            if cli.json {
                println!("{}", report.to_json()?);
            } else {
                println!("{}", report);
            }
        }
        Commands::Detect { images } => {
            let inspector = Inspector::load(&config)?;
            if let [image] = images.as_slice() {
                let report = inspector.inspect(image)?;
                if cli.json {
                    println!("{}", report.to_json()?);
                } else {
                    println!("{}", report);
                }
            } else {
                let report = inspector.inspect_many(&images)?;
                if cli.json {
                    println!("{}", report.to_json()?);
                } else {
                    println!("{}", report);
                }
            }
        }
    }

    Ok(())
}

fn hint(error: &DetectorError) -> Option<&'static str> {
    match error {
        DetectorError::ArtifactNotFound {
            kind: ArtifactKind::BoundaryModel,
            ..
        } => Some("run `counterfeit-detector train` first to fit a boundary model"),
        DetectorError::ArtifactNotFound {
            kind: ArtifactKind::EncoderWeights,
            ..
        } => Some("run `counterfeit-detector init-encoder` or place an exported encoder in the weights directory"),
        DetectorError::EmptyDataset(_) => {
            Some("add genuine packaging photos (jpg, png, webp) to the training directory")
        }
        DetectorError::InputNotFound(_) => Some("check the path and try again"),
        _ => None,
    }
}
