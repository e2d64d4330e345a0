use crate::config::{OverviewConfig, SidecarKind};
use crate::dataset::AccessMode;
use crate::error::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "build-overviews")]
#[command(about = "Build or refresh reduced-resolution overviews of raster datasets")]
#[command(version)]
pub struct Args {
    /// Dataset documents to process
    #[arg(value_name = "FILE", required = true)]
    pub inputs: Vec<PathBuf>,

    /// Resampling method (NEAREST, AVERAGE, GAUSS, MODE, AVERAGE_BIT2GRAYSCALE)
    #[arg(short, long, value_name = "METHOD", default_value = "NEAREST")]
    pub resampling: String,

    /// Decimation factors, e.g. 2,4,8
    #[arg(short, long, value_name = "FACTORS", value_delimiter = ',', default_values_t = [2, 4, 8, 16])]
    pub levels: Vec<u32>,

    /// Store new overviews in a .ovr sidecar
    #[arg(long)]
    pub external: bool,

    /// Store new overviews in a .aux sidecar (same as USE_RRD=YES)
    #[arg(long)]
    pub rrd: bool,

    /// Overview compression (overrides COMPRESS_OVERVIEW)
    #[arg(long, value_name = "TYPE")]
    pub compress: Option<String>,

    /// Overview photometric interpretation (overrides PHOTOMETRIC_OVERVIEW)
    #[arg(long, value_name = "TYPE")]
    pub photometric: Option<String>,

    /// Overview interleaving (overrides INTERLEAVE_OVERVIEW)
    #[arg(long, value_name = "TYPE")]
    pub interleave: Option<String>,

    /// Open datasets read-only; overviews go to a sidecar
    #[arg(long)]
    pub read_only: bool,

    /// Remove existing overviews instead of building
    #[arg(long)]
    pub clear: bool,

    /// Number of threads (default: all available)
    #[arg(short, long, value_name = "N")]
    pub threads: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn access_mode(&self) -> AccessMode {
        if self.read_only {
            AccessMode::ReadOnly
        } else {
            AccessMode::Update
        }
    }

    /// Environment options, overridden by command-line flags.
    pub fn overview_config(&self) -> Result<OverviewConfig> {
        self.apply_flags(OverviewConfig::from_env()?)
    }

    fn apply_flags(&self, mut config: OverviewConfig) -> Result<OverviewConfig> {
        let given = |flag: &Option<String>| flag.clone().filter(|v| !v.trim().is_empty());
        if let Some(v) = given(&self.compress) {
            config.compression = v.parse()?;
        }
        if let Some(v) = given(&self.photometric) {
            config.photometric = Some(v.parse()?);
        }
        if let Some(v) = given(&self.interleave) {
            config.interleave = v.parse()?;
        }

        if self.rrd {
            config.force_external = true;
            config.sidecar_kind = SidecarKind::Rrd;
        } else if self.external {
            config.force_external = true;
        }
        Ok(config)
    }
}
