//! File container for datasets: a JSON document holding the base bands and
//! internal overviews, plus an optional sidecar holding external overviews.

use crate::band::{MetadataDomains, RasterBand, IMAGE_STRUCTURE};
use crate::config::SidecarKind;
use crate::dataset::{AccessMode, ContainerProfile, Dataset, OverviewLevel};
use crate::datatype::DataType;
use crate::error::{OverviewError, Result};
use crate::palette::ColorTable;
use crate::planner::Storage;
use log::{debug, info, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const FORMAT: &str = "raster-overviews";
const VERSION: u32 = 1;

/// Default tile edge when `TILED=YES` without explicit block sizes.
pub const DEFAULT_TILE_SIZE: usize = 256;

#[derive(Debug, Serialize, Deserialize)]
struct BlockRecord {
    index: usize,
    /// Full block, row-major, as `f64` bit patterns.
    samples: Vec<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BandRecord {
    width: usize,
    height: usize,
    data_type: DataType,
    block_size: (usize, usize),
    nodata: Option<u64>,
    color_table: Option<ColorTable>,
    metadata: MetadataDomains,
    description: String,
    blocks: Vec<BlockRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LevelRecord {
    factor: u32,
    bands: Vec<BandRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    format: String,
    version: u32,
    profile: ContainerProfile,
    nodata_values: Option<Vec<u64>>,
    metadata: BTreeMap<String, String>,
    bands: Vec<BandRecord>,
    overviews: Vec<LevelRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    format: String,
    version: u32,
    overviews: Vec<LevelRecord>,
}

impl BandRecord {
    fn capture(band: &RasterBand) -> Self {
        Self {
            width: band.x_size(),
            height: band.y_size(),
            data_type: band.data_type(),
            block_size: band.block_size(),
            nodata: band.no_data_value().map(f64::to_bits),
            color_table: band.color_table().cloned(),
            metadata: band.metadata_domains().clone(),
            description: band.description().to_string(),
            blocks: band
                .allocated_blocks()
                .map(|(index, block)| BlockRecord {
                    index,
                    samples: block.iter().map(|v| v.to_bits()).collect(),
                })
                .collect(),
        }
    }

    fn restore(self) -> Result<RasterBand> {
        let mut band = RasterBand::new(self.width, self.height, self.data_type, self.block_size);
        band.set_no_data_value(self.nodata.map(f64::from_bits));
        band.set_color_table(self.color_table);
        band.set_description(&self.description);
        for (domain, items) in self.metadata {
            band.set_metadata(&domain, items);
        }

        let (bw, bh) = band.block_size();
        for block in self.blocks {
            let samples = block.samples.into_iter().map(f64::from_bits).collect();
            band.restore_block(block.index, Array2::from_shape_vec((bh, bw), samples)?)?;
        }
        Ok(band)
    }
}

fn capture_levels(dataset: &Dataset, storage: Storage) -> Vec<LevelRecord> {
    let factors = dataset.overview_factors();
    factors
        .iter()
        .enumerate()
        .filter(|(idx, _)| {
            dataset
                .overviews
                .first()
                .is_some_and(|set| set.levels()[*idx].storage == storage)
        })
        .map(|(idx, &factor)| LevelRecord {
            factor,
            bands: dataset
                .overviews
                .iter()
                .map(|set| BandRecord::capture(&set.levels()[idx].band))
                .collect(),
        })
        .collect()
}

fn restore_levels(dataset: &mut Dataset, levels: Vec<LevelRecord>, storage: Storage) -> Result<()> {
    for level in levels {
        if level.bands.len() != dataset.overviews.len() {
            return Err(OverviewError::IoFailure(format!(
                "overview {} has {} bands, dataset has {}",
                level.factor,
                level.bands.len(),
                dataset.overviews.len()
            )));
        }
        for (record, set) in level.bands.into_iter().zip(dataset.overviews.iter_mut()) {
            set.insert(OverviewLevel {
                factor: level.factor,
                storage,
                band: record.restore()?,
            });
        }
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

/// Parsed `KEY=VALUE` creation options.
#[derive(Debug, Clone, PartialEq)]
pub struct CreationOptions {
    pub block_x_size: Option<usize>,
    pub block_y_size: Option<usize>,
    pub tiled: bool,
    pub nbits: Option<u32>,
    pub profile: ContainerProfile,
}

impl Default for CreationOptions {
    fn default() -> Self {
        Self {
            block_x_size: None,
            block_y_size: None,
            tiled: false,
            nbits: None,
            profile: ContainerProfile::tiff(),
        }
    }
}

fn parse_positive(key: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(OverviewError::InvalidOption(format!(
            "{} must be a positive integer, got '{}'",
            key, value
        ))),
    }
}

impl CreationOptions {
    pub fn parse<S: AsRef<str>>(options: &[S]) -> Result<Self> {
        let mut parsed = CreationOptions::default();
        let mut profile = "TIFF".to_string();
        let mut scale = 2u32;

        for option in options {
            let option = option.as_ref();
            let Some((key, value)) = option.split_once('=') else {
                return Err(OverviewError::InvalidOption(format!(
                    "creation option '{}' is not KEY=VALUE",
                    option
                )));
            };
            match key.trim().to_ascii_uppercase().as_str() {
                "BLOCKXSIZE" => parsed.block_x_size = Some(parse_positive(key, value)?),
                "BLOCKYSIZE" => parsed.block_y_size = Some(parse_positive(key, value)?),
                "TILED" => {
                    parsed.tiled = matches!(value.trim().to_ascii_uppercase().as_str(), "YES" | "TRUE" | "ON" | "1")
                }
                "NBITS" => parsed.nbits = Some(parse_positive(key, value)? as u32),
                "PROFILE" => profile = value.trim().to_ascii_uppercase(),
                "SCALE" => scale = parse_positive(key, value)? as u32,
                other => warn!("Ignoring unknown creation option {}", other),
            }
        }

        parsed.profile = match profile.as_str() {
            "TIFF" => ContainerProfile::tiff(),
            "MRF" => {
                if scale < 2 {
                    return Err(OverviewError::InvalidOption(format!(
                        "SCALE must be at least 2, got {}",
                        scale
                    )));
                }
                ContainerProfile::mrf(scale)
            }
            "FIXED" => ContainerProfile::fixed(),
            other => {
                return Err(OverviewError::InvalidOption(format!(
                    "unknown container profile '{}'",
                    other
                )))
            }
        };
        Ok(parsed)
    }

    /// Block size for a raster of `width` columns and `height` rows.
    pub fn block_size(&self, width: usize, height: usize) -> (usize, usize) {
        if self.tiled || self.block_x_size.is_some() {
            (
                self.block_x_size.unwrap_or(DEFAULT_TILE_SIZE),
                self.block_y_size.unwrap_or(DEFAULT_TILE_SIZE),
            )
        } else {
            (width.max(1), self.block_y_size.unwrap_or(1).min(height.max(1)))
        }
    }
}

/// Create a new container and return it opened for update.
pub fn create<S: AsRef<str>>(
    path: impl AsRef<Path>,
    width: usize,
    height: usize,
    band_count: usize,
    data_type: DataType,
    options: &[S],
) -> Result<Dataset> {
    let path = path.as_ref();
    info!("Creating dataset: {}", path.display());

    if width == 0 || height == 0 || band_count == 0 {
        return Err(OverviewError::InvalidOption(format!(
            "cannot create {}x{} dataset with {} bands",
            width, height, band_count
        )));
    }
    let options = CreationOptions::parse(options)?;
    if let Some(nbits) = options.nbits {
        if !data_type.is_integer() || nbits > data_type.size_bits() {
            return Err(OverviewError::InvalidOption(format!(
                "NBITS={} is not valid for {}",
                nbits, data_type
            )));
        }
    }

    let block_size = options.block_size(width, height);
    debug!("Block size {}x{}, profile {:?}", block_size.0, block_size.1, options.profile);

    let bands = (0..band_count)
        .map(|_| {
            let mut band = RasterBand::new(width, height, data_type, block_size);
            if let Some(nbits) = options.nbits {
                band.set_metadata_item("NBITS", &nbits.to_string(), IMAGE_STRUCTURE);
            }
            band
        })
        .collect();

    let mut dataset = Dataset::from_bands(bands, options.profile);
    dataset.path = Some(path.to_path_buf());
    dataset.flush()?;
    Ok(dataset)
}

/// Open an existing container, picking up a sidecar if one exists.
pub fn open(path: impl AsRef<Path>, mode: AccessMode) -> Result<Dataset> {
    let path = path.as_ref();
    info!("Opening dataset: {}", path.display());

    let open_failure = |reason: String| OverviewError::OpenFailure {
        path: path.display().to_string(),
        reason,
    };

    let file = File::open(path).map_err(|e| open_failure(e.to_string()))?;
    let document: Document =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| open_failure(e.to_string()))?;
    if document.format != FORMAT || document.version > VERSION {
        return Err(open_failure(format!(
            "unsupported document {} v{}",
            document.format, document.version
        )));
    }

    let bands = document
        .bands
        .into_iter()
        .map(BandRecord::restore)
        .collect::<Result<Vec<_>>>()?;
    if bands.is_empty() {
        return Err(open_failure("document has no bands".to_string()));
    }

    let mut dataset = Dataset::from_bands(bands, document.profile);
    dataset.path = Some(path.to_path_buf());
    dataset.mode = mode;
    dataset.metadata = document.metadata;
    dataset.nodata_values = document
        .nodata_values
        .map(|values| values.into_iter().map(f64::from_bits).collect());
    restore_levels(&mut dataset, document.overviews, Storage::Internal)?;

    for kind in [SidecarKind::Ovr, SidecarKind::Rrd] {
        let sidecar_path = kind.path_for(path);
        if !sidecar_path.exists() {
            continue;
        }
        debug!("Loading external overviews from {}", sidecar_path.display());
        let reader = BufReader::new(File::open(&sidecar_path)?);
        let sidecar: Sidecar = serde_json::from_reader(reader)?;
        if sidecar.format != FORMAT {
            warn!("Ignoring foreign sidecar {}", sidecar_path.display());
            continue;
        }
        restore_levels(&mut dataset, sidecar.overviews, Storage::External)?;
        dataset.sidecar_kind = kind;
        break;
    }

    debug!(
        "Opened {}x{} x {} bands, overviews {:?}",
        dataset.raster_size().0,
        dataset.raster_size().1,
        dataset.raster_count(),
        dataset.overview_factors()
    );
    Ok(dataset)
}

/// Remove a container and any sidecar next to it.
pub fn delete(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    fs::remove_file(path)?;
    for kind in [SidecarKind::Ovr, SidecarKind::Rrd] {
        let sidecar = kind.path_for(path);
        if sidecar.exists() {
            fs::remove_file(&sidecar)?;
        }
    }
    info!("Deleted dataset: {}", path.display());
    Ok(())
}

impl Dataset {
    /// Persist the dataset: the main document when opened for update, and
    /// the sidecar whenever external overviews exist.
    pub fn flush(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            debug!("In-memory dataset, nothing to flush");
            return Ok(());
        };

        if self.is_writable() {
            let document = Document {
                format: FORMAT.to_string(),
                version: VERSION,
                profile: self.profile,
                nodata_values: self
                    .nodata_values
                    .as_ref()
                    .map(|values| values.iter().map(|v| v.to_bits()).collect()),
                metadata: self.metadata.clone(),
                bands: self.bands.iter().map(BandRecord::capture).collect(),
                overviews: capture_levels(self, Storage::Internal),
            };
            write_json(&path, &document)?;
            debug!("Wrote {}", path.display());
        }

        let sidecar_path = self.sidecar_kind.path_for(&path);
        let external = capture_levels(self, Storage::External);
        if external.is_empty() {
            if sidecar_path.exists() {
                fs::remove_file(&sidecar_path)?;
                debug!("Removed {}", sidecar_path.display());
            }
        } else {
            let sidecar = Sidecar {
                format: FORMAT.to_string(),
                version: VERSION,
                overviews: external,
            };
            write_json(&sidecar_path, &sidecar)?;
            debug!("Wrote {}", sidecar_path.display());
        }
        Ok(())
    }
}
