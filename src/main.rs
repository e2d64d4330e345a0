use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use rayon::prelude::*;
use std::path::Path;

use raster_overviews::checksum::checksum;
use raster_overviews::cli::Args;
use raster_overviews::config::OverviewConfig;
use raster_overviews::{build, container, OverviewError, ResampleMethod, Result};

fn process(path: &Path, args: &Args, method: ResampleMethod, config: &OverviewConfig) -> Result<()> {
    let mut dataset = container::open(path, args.access_mode())?;

    if args.clear {
        dataset.clear_overviews()?;
        dataset.flush()?;
        info!("{}: overviews cleared", path.display());
        return Ok(());
    }

    let report = build(&mut dataset, method, &args.levels, config)?;
    dataset.flush()?;

    info!(
        "{}: {} levels rebuilt ({:?})",
        path.display(),
        report.levels.len(),
        report.storage
    );
    for band in 1..=dataset.raster_count() {
        for level in dataset.overview_set(band)?.levels() {
            info!(
                "{}: band {} factor {} {}x{} checksum {}",
                path.display(),
                band,
                level.factor,
                level.band.x_size(),
                level.band.y_size(),
                checksum(&level.band)?
            );
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    info!("=== Raster Overview Builder ===");

    if let Some(n_threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build_global()
            .expect("Failed to build thread pool");
        info!("Using {} threads", n_threads);
    } else {
        info!("Using all available threads");
    }

    let method: ResampleMethod = args.resampling.parse()?;
    let config = args.overview_config()?;
    info!("Resampling {} with factors {:?}", method, args.levels);

    let failed: usize = args
        .inputs
        .par_iter()
        .map(|path| match process(path, &args, method, &config) {
            Ok(()) => 0,
            Err(e) => {
                warn!("{}: {}", path.display(), e);
                1
            }
        })
        .sum();

    if failed > 0 {
        return Err(OverviewError::IoFailure(format!(
            "{} of {} datasets failed",
            failed,
            args.inputs.len()
        )));
    }

    info!("=== Done! ===");
    Ok(())
}
