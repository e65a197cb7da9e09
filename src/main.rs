use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};

use czi_sampling::{config::SamplingConfig, pipeline};

/// Downsample a time series of CZI volumes into calibrated TIFF variants.
#[derive(Debug, Parser)]
#[command(
    name = "czi-sampling",
    version,
    after_help = "Example: czi-sampling dir_with_czi_files dir_for_tiffs"
)]
struct Cli {
    /// Directory with CZI files
    input_dir: PathBuf,

    /// Directory for saving downsampled images
    output_dir: PathBuf,
}

fn main() -> Result<()> {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("creating output directory {:?}", cli.output_dir))?;

    let written = pipeline::run_czi(&cli.input_dir, &cli.output_dir, &SamplingConfig::default())
        .with_context(|| format!("sampling volumes from {:?}", cli.input_dir))?;

    log::info!("All done! {} files in {:?}", written.len(), cli.output_dir);
    Ok(())
}
