use crate::band::RasterBand;
use crate::config::SidecarKind;
use crate::datatype::DataType;
use crate::error::{OverviewError, Result};
use crate::mask::MaskPolicy;
use crate::planner::{ExistingLevel, LevelChain, Storage};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    Update,
}

/// Capabilities of the container holding a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerProfile {
    /// Overviews can be embedded in the container itself.
    pub in_place_growth: bool,
    pub chain: LevelChain,
}

impl ContainerProfile {
    /// Tiled-TIFF-like: internal overviews, exactly the requested factors.
    pub fn tiff() -> Self {
        Self {
            in_place_growth: true,
            chain: LevelChain::Explicit,
        }
    }

    /// MRF-like: powers of `scale` down to a level that fits one block.
    pub fn mrf(scale: u32) -> Self {
        Self {
            in_place_growth: true,
            chain: LevelChain::Geometric {
                scale,
                until_single_block: true,
            },
        }
    }

    /// A container that cannot grow; overviews always go to a sidecar.
    pub fn fixed() -> Self {
        Self {
            in_place_growth: false,
            chain: LevelChain::Explicit,
        }
    }
}

impl Default for ContainerProfile {
    fn default() -> Self {
        Self::tiff()
    }
}

/// One downsampled copy of a band.
#[derive(Debug, Clone, PartialEq)]
pub struct OverviewLevel {
    pub factor: u32,
    pub storage: Storage,
    pub band: RasterBand,
}

/// Overview levels of one band, sorted by increasing factor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverviewSet {
    levels: Vec<OverviewLevel>,
}

impl OverviewSet {
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn levels(&self) -> &[OverviewLevel] {
        &self.levels
    }

    pub(crate) fn levels_mut(&mut self) -> &mut [OverviewLevel] {
        &mut self.levels
    }

    pub fn position(&self, factor: u32) -> Option<usize> {
        self.levels.iter().position(|l| l.factor == factor)
    }

    /// Insert keeping factors sorted; returns the level's position.
    pub(crate) fn insert(&mut self, level: OverviewLevel) -> usize {
        let pos = self.levels.partition_point(|l| l.factor < level.factor);
        self.levels.insert(pos, level);
        pos
    }

    pub(crate) fn clear(&mut self) {
        self.levels.clear();
    }
}

/// Bands sharing one extent and block geometry, plus their overviews.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub(crate) path: Option<PathBuf>,
    pub(crate) mode: AccessMode,
    pub(crate) profile: ContainerProfile,
    pub(crate) bands: Vec<RasterBand>,
    pub(crate) overviews: Vec<OverviewSet>,
    pub(crate) nodata_values: Option<Vec<f64>>,
    pub(crate) metadata: BTreeMap<String, String>,
    pub(crate) sidecar_kind: SidecarKind,
}

impl Dataset {
    /// In-memory dataset, writable, not bound to any file.
    pub fn new(
        width: usize,
        height: usize,
        band_count: usize,
        data_type: DataType,
        block_size: (usize, usize),
    ) -> Self {
        let bands = (0..band_count)
            .map(|_| RasterBand::new(width, height, data_type, block_size))
            .collect();
        Self::from_bands(bands, ContainerProfile::default())
    }

    pub fn from_bands(bands: Vec<RasterBand>, profile: ContainerProfile) -> Self {
        let overviews = vec![OverviewSet::default(); bands.len()];
        Self {
            path: None,
            mode: AccessMode::Update,
            profile,
            bands,
            overviews,
            nodata_values: None,
            metadata: BTreeMap::new(),
            sidecar_kind: SidecarKind::default(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn access_mode(&self) -> AccessMode {
        self.mode
    }

    pub fn is_writable(&self) -> bool {
        self.mode == AccessMode::Update
    }

    pub fn profile(&self) -> ContainerProfile {
        self.profile
    }

    pub fn set_profile(&mut self, profile: ContainerProfile) {
        self.profile = profile;
    }

    pub fn raster_size(&self) -> (usize, usize) {
        self.bands.first().map(RasterBand::size).unwrap_or((0, 0))
    }

    pub fn raster_count(&self) -> usize {
        self.bands.len()
    }

    pub fn bands(&self) -> &[RasterBand] {
        &self.bands
    }

    /// 1-based band access.
    pub fn rasterband(&self, index: usize) -> Result<&RasterBand> {
        index
            .checked_sub(1)
            .and_then(|i| self.bands.get(i))
            .ok_or(OverviewError::InvalidBand(index))
    }

    pub fn rasterband_mut(&mut self, index: usize) -> Result<&mut RasterBand> {
        index
            .checked_sub(1)
            .and_then(|i| self.bands.get_mut(i))
            .ok_or(OverviewError::InvalidBand(index))
    }

    pub fn overview_set(&self, band: usize) -> Result<&OverviewSet> {
        band.checked_sub(1)
            .and_then(|i| self.overviews.get(i))
            .ok_or(OverviewError::InvalidBand(band))
    }

    pub fn overview_count(&self, band: usize) -> Result<usize> {
        Ok(self.overview_set(band)?.len())
    }

    /// Overview `index` (0-based, finest first) of 1-based `band`.
    pub fn overview(&self, band: usize, index: usize) -> Result<&RasterBand> {
        self.overview_level(band, index).map(|level| &level.band)
    }

    pub fn overview_level(&self, band: usize, index: usize) -> Result<&OverviewLevel> {
        let set = self.overview_set(band)?;
        set.levels().get(index).ok_or_else(|| {
            OverviewError::InvalidOption(format!(
                "band {} has {} overviews, asked for #{}",
                band,
                set.len(),
                index
            ))
        })
    }

    pub fn overview_factors(&self) -> Vec<u32> {
        self.overviews
            .first()
            .map(|set| set.levels().iter().map(|l| l.factor).collect())
            .unwrap_or_default()
    }

    pub(crate) fn existing_levels(&self) -> Vec<ExistingLevel> {
        self.overviews
            .first()
            .map(|set| {
                set.levels()
                    .iter()
                    .map(|l| ExistingLevel {
                        factor: l.factor,
                        width: l.band.x_size(),
                        height: l.band.y_size(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Storage used by the overviews already present, if any.
    pub fn overview_storage(&self) -> Option<Storage> {
        self.overviews
            .first()
            .and_then(|set| set.levels().first())
            .map(|level| level.storage)
    }

    pub fn has_external_overviews(&self) -> bool {
        self.overview_storage() == Some(Storage::External)
    }

    pub fn sidecar_kind(&self) -> SidecarKind {
        self.sidecar_kind
    }

    /// Dataset-wide per-band nodata list (`NODATA_VALUES`).
    pub fn nodata_values(&self) -> Option<&[f64]> {
        self.nodata_values.as_deref()
    }

    pub fn set_nodata_values(&mut self, values: Option<Vec<f64>>) -> Result<()> {
        if let Some(v) = &values {
            if v.len() != self.bands.len() {
                return Err(OverviewError::InvalidOption(format!(
                    "NODATA_VALUES has {} entries for {} bands",
                    v.len(),
                    self.bands.len()
                )));
            }
        }
        self.nodata_values = values;
        Ok(())
    }

    pub fn mask_policy(&self) -> MaskPolicy {
        match &self.nodata_values {
            Some(values) => MaskPolicy::AllBands(values.clone()),
            None => MaskPolicy::PerBand,
        }
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn set_metadata_item(&mut self, key: &str, value: &str) {
        self.metadata.insert(key.to_string(), value.to_string());
    }

    /// Drop every overview level of every band.
    ///
    /// Internal overviews live in the main document, so a read-only dataset
    /// can only drop external ones.
    pub fn clear_overviews(&mut self) -> Result<()> {
        if !self.is_writable() && self.overview_storage() == Some(Storage::Internal) {
            return Err(OverviewError::IoFailure(
                "internal overviews of a read-only dataset cannot be cleared".to_string(),
            ));
        }
        info!("Clearing {} overview levels", self.overview_factors().len());
        for set in &mut self.overviews {
            set.clear();
        }
        Ok(())
    }
}
