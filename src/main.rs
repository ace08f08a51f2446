mod aggregate;
mod config;
mod extract;
mod model;
mod pipeline;
mod quality;
mod store;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::{error, info};

use crate::config::PipelineConfig;
use crate::pipeline::RunOptions;

#[derive(Debug, Parser)]
#[command(name = "healthcare-etl")]
#[command(about = "Clean the daily healthcare extract, compute diagnosis aggregates and store them")]
struct Args {
    /// Pipeline configuration holding the input directory, date cursor and store.
    #[arg(long, short, default_value = "config.toml")]
    config: PathBuf,

    /// Raw rows to show in the log before saving.
    #[arg(long, default_value_t = 5)]
    preview_rows: usize,

    /// Keep only the N most common diseases.
    #[arg(long)]
    top: Option<usize>,

    /// Leave the date cursor where it is after a successful run.
    #[arg(long, default_value_t = false)]
    no_advance: bool,
}

fn run(args: &Args) -> anyhow::Result<()> {
    let mut config = PipelineConfig::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    info!("Processing extract for {}", config.date_filepath.file_date);

    let mut store = store::open_store(&config.store).context("opening document store")?;
    let options = RunOptions {
        preview_rows: args.preview_rows,
        top: args.top,
    };
    let summary = pipeline::run(&config, store.as_mut(), &options)
        .with_context(|| format!("processing {}", config.daily_extract_path().display()))?;
    info!("Run complete:\n{}", summary.to_table());

    if !args.no_advance {
        config
            .advance_and_save(&args.config)
            .context("saving the next processing date")?;
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("An error occurred: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
