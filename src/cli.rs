//! Command-line interface for the classification pipeline
//!
//! Two subcommands: `classify` runs the pipeline on one stored image and
//! prints the prediction as JSON; `gen-weights` materializes a randomly
//! initialized weights file so the pipeline can run authoritatively in
//! local and demo environments.

use crate::{ModelWeights, Pipeline, PipelineConfig, ReportRecord};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "mammoscan",
    version,
    about = "Mammogram risk classification pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify a stored mammogram image and print the prediction as JSON
    Classify {
        /// Path of the image to classify
        image: PathBuf,

        /// Report identifier, used to name the heatmap file
        #[arg(long, default_value_t = 0)]
        report_id: u64,

        /// Trained weights file (defaults to MAMMOSCAN_MODEL_PATH)
        #[arg(long)]
        model: Option<PathBuf>,

        /// Heatmap output directory (defaults to MAMMOSCAN_HEATMAP_DIR)
        #[arg(long)]
        heatmap_dir: Option<PathBuf>,

        /// Skip heatmap generation
        #[arg(long)]
        no_heatmap: bool,
    },
    /// Write a randomly initialized weights file for local testing
    GenWeights {
        /// Output path of the weights file
        output: PathBuf,

        /// Seed for reproducible initialization
        #[arg(long)]
        seed: Option<u64>,
    },
}

/// CLI entry point
///
/// # Errors
///
/// Returns any pipeline or filesystem error; exit status is non-zero.
pub fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Classify {
            image,
            report_id,
            model,
            heatmap_dir,
            no_heatmap,
        } => {
            let mut config = PipelineConfig::from_env();
            if let Some(model) = model {
                config.model_path = Some(model);
            }
            if let Some(dir) = heatmap_dir {
                config.heatmap_dir = dir;
            }
            if no_heatmap {
                config.generate_heatmaps = false;
            }

            let pipeline = Pipeline::new(config)?;
            if !pipeline.classifier().is_authoritative() {
                eprintln!("warning: no trained weights available; results are not meaningful");
            }

            let result = pipeline.process_report(&ReportRecord::new(report_id, image))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        },
        Command::GenWeights { output, seed } => {
            let weights = match seed {
                Some(seed) => ModelWeights::seeded(seed),
                None => ModelWeights::random(&mut rand::thread_rng()),
            };

            if let Some(parent) = output.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
            }
            weights.save(&output)?;
            println!(
                "wrote {} parameters to {}",
                weights.parameter_count(),
                output.display()
            );
        },
    }

    Ok(())
}
