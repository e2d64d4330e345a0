//! Bridge to GDAL-readable rasters: import a file into a [`Dataset`] and
//! export overview levels as GeoTIFF.

use crate::band::{RasterBand, IMAGE_STRUCTURE};
use crate::dataset::{ContainerProfile, Dataset};
use crate::datatype::{DataType, Sample};
use crate::error::{OverviewError, Result};
use crate::mask::parse_nodata_values;
use crate::palette::{ColorEntry, ColorTable};
use gdal::cpl::CslStringList;
use gdal::raster::{Buffer, GdalDataType, GdalType};
use gdal::{DriverManager, Metadata};
use log::{debug, info, warn};
use ndarray::Array2;
use std::path::Path;

fn map_data_type(band_type: GdalDataType) -> Result<DataType> {
    match band_type {
        GdalDataType::UInt8 => Ok(DataType::Byte),
        GdalDataType::UInt16 => Ok(DataType::UInt16),
        GdalDataType::Int16 => Ok(DataType::Int16),
        GdalDataType::UInt32 => Ok(DataType::UInt32),
        GdalDataType::Int32 => Ok(DataType::Int32),
        GdalDataType::Float32 => Ok(DataType::Float32),
        GdalDataType::Float64 => Ok(DataType::Float64),
        other => Err(OverviewError::UnsupportedCombination(format!(
            "GDAL band type {:?} has no counterpart",
            other
        ))),
    }
}

fn import_band(source: &gdal::raster::RasterBand) -> Result<RasterBand> {
    let width = source.x_size() as usize;
    let height = source.y_size() as usize;
    let block_size = source.block_size();
    let data_type = map_data_type(source.band_type())?;

    let mut band = RasterBand::new(width, height, data_type, (block_size.0 as usize, block_size.1 as usize));
    band.set_no_data_value(source.no_data_value());
    band.set_description(&source.description()?);
    if let Some(nbits) = source.metadata_item("NBITS", IMAGE_STRUCTURE) {
        band.set_metadata_item("NBITS", &nbits, IMAGE_STRUCTURE);
    }

    if let Some(table) = source.color_table() {
        let entries = (0..table.entry_count())
            .map(|i| {
                table
                    .entry_as_rgb(i)
                    .map(|e| ColorEntry::rgba(e.r, e.g, e.b, e.a))
                    .unwrap_or(ColorEntry::TRANSPARENT)
            })
            .collect();
        band.set_color_table(Some(ColorTable::new(entries)));
    }

    let buffer = source.read_as::<f64>((0, 0), (width, height), (width, height), None)?;
    let data_vec: Vec<f64> = buffer.into_iter().collect();
    let data = Array2::from_shape_vec((height, width), data_vec)?;
    band.write_window(0, 0, data.view())?;

    Ok(band)
}

/// Read a GDAL-readable raster into an in-memory dataset.
pub fn import(path: impl AsRef<Path>) -> Result<Dataset> {
    let path = path.as_ref();
    info!("Importing raster through GDAL: {}", path.display());
    let source = gdal::Dataset::open(path).map_err(|e| OverviewError::OpenFailure {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut bands = Vec::new();
    for index in 1..=source.raster_count() as usize {
        let band = source.rasterband(index)?;
        bands.push(import_band(&band)?);
        debug!("Imported band {}", index);
    }
    if bands.is_empty() {
        return Err(OverviewError::OpenFailure {
            path: path.display().to_string(),
            reason: "raster has no bands".to_string(),
        });
    }

    let band_count = bands.len();
    let mut dataset = Dataset::from_bands(bands, ContainerProfile::tiff());
    if let Some(item) = source.metadata_item("NODATA_VALUES", "") {
        match parse_nodata_values(&item) {
            Some(values) if values.len() == band_count => dataset.set_nodata_values(Some(values))?,
            _ => warn!("Ignoring NODATA_VALUES '{}' for {} bands", item, band_count),
        }
    }

    Ok(dataset)
}

fn write_typed<T: Sample + GdalType + Copy>(band: &RasterBand, path: &Path, options: &[String]) -> Result<()> {
    let (width, height) = band.size();
    let driver = DriverManager::get_driver_by_name("GTiff")?;

    let mut gdal_options = CslStringList::new();
    for opt in options {
        gdal_options.add_string(opt)?;
    }
    let mut output = driver.create_with_band_type_with_options::<T, _>(path, width, height, 1, &gdal_options)?;
    let mut out_band = output.rasterband(1)?;

    let data = band.read_as::<T>(0, 0, width, height)?;
    let mut buffer = Buffer::new((width, height), data.iter().copied().collect::<Vec<T>>());
    out_band.write((0, 0), (width, height), &mut buffer)?;
    out_band.set_no_data_value(band.no_data_value())?;
    if let Some(method) = band.metadata_item(crate::band::RESAMPLING_KEY, "") {
        out_band.set_metadata_item(crate::band::RESAMPLING_KEY, method, "")?;
    }
    Ok(())
}

/// Write overview `level` (0-based) of 1-based `band` to a GeoTIFF.
pub fn export_level(
    dataset: &Dataset,
    band: usize,
    level: usize,
    path: impl AsRef<Path>,
    options: &[String],
) -> Result<()> {
    let path = path.as_ref();
    let source = dataset.overview(band, level)?;
    info!(
        "Exporting band {} level {} ({}x{}) to {}",
        band,
        level,
        source.x_size(),
        source.y_size(),
        path.display()
    );

    match source.data_type() {
        DataType::Byte => write_typed::<u8>(source, path, options),
        DataType::UInt16 => write_typed::<u16>(source, path, options),
        DataType::Int16 => write_typed::<i16>(source, path, options),
        DataType::UInt32 => write_typed::<u32>(source, path, options),
        DataType::Int32 => write_typed::<i32>(source, path, options),
        DataType::Float32 => write_typed::<f32>(source, path, options),
        DataType::Float64 => write_typed::<f64>(source, path, options),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverviewConfig;

    #[test]
    fn test_import_build_export() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.tif");

        {
            let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
            let created = driver
                .create_with_band_type::<u8, _>(&input, 20, 20, 1)
                .unwrap();
            let mut band = created.rasterband(1).unwrap();
            let mut buffer = Buffer::new((20, 20), vec![1u8; 400]);
            band.write((0, 0), (20, 20), &mut buffer).unwrap();
        }

        let mut dataset = import(&input).unwrap();
        assert_eq!(dataset.raster_size(), (20, 20));
        assert_eq!(dataset.build_overviews("AVERAGE", &[2], &OverviewConfig::default()), 0);

        assert!(dataset.nodata_values().is_none());

        let output = dir.path().join("level0.tif");
        export_level(&dataset, 1, 0, &output, &[]).unwrap();
        let reopened = gdal::Dataset::open(&output).unwrap();
        assert_eq!(reopened.raster_size(), (10, 10));
    }

    #[test]
    fn test_import_reads_nodata_values() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("rgb.tif");

        {
            let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
            let mut created = driver
                .create_with_band_type::<u8, _>(&input, 4, 4, 3)
                .unwrap();
            created.set_metadata_item("NODATA_VALUES", "0 0 255", "").unwrap();
        }

        let dataset = import(&input).unwrap();
        assert_eq!(dataset.nodata_values(), Some(&[0.0, 0.0, 255.0][..]));
    }
}
