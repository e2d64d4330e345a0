//! Overview build: validate, plan, allocate levels, then resample them from
//! finest to coarsest.

use crate::band::{RasterBand, IMAGE_STRUCTURE, RESAMPLING_KEY};
use crate::blocks::SourceWindow;
use crate::config::OverviewConfig;
use crate::dataset::{Dataset, OverviewLevel};
use crate::datatype::DataType;
use crate::error::{OverviewError, Result};
use crate::mask::MaskPolicy;
use crate::planner::{self, LevelAction, PlannedLevel, Storage, StoragePolicy};
use crate::resample::{ResampleMethod, Resampler};
use log::{debug, info, warn};
use ndarray::Array2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Planned,
    Allocating,
    /// Resampling the level with this factor.
    Resampling(u32),
    Done,
}

/// Outcome of a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub method: ResampleMethod,
    pub storage: Storage,
    pub levels: Vec<PlannedLevel>,
    pub blocks_written: usize,
}

struct StateTracker {
    state: BuildState,
}

impl StateTracker {
    fn advance(&mut self, next: BuildState) {
        debug!("Build state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// Reject method/band combinations no kernel supports.
fn check_method(method: ResampleMethod, bands: &[RasterBand]) -> Result<()> {
    for (idx, band) in bands.iter().enumerate() {
        if method == ResampleMethod::AverageBit2Grayscale {
            if !band.is_bilevel() {
                return Err(OverviewError::UnsupportedCombination(format!(
                    "{} requires a 1-bit Byte band, band {} is {} with NBITS={:?}",
                    method,
                    idx + 1,
                    band.data_type(),
                    band.nbits()
                )));
            }
            if band.color_table().is_some() {
                return Err(OverviewError::UnsupportedCombination(format!(
                    "{} cannot be applied to color-indexed band {}",
                    method,
                    idx + 1
                )));
            }
        }

        if method.is_aggregating() && band.color_table().is_some() && !band.data_type().is_integer() {
            return Err(OverviewError::UnsupportedCombination(format!(
                "color-indexed band {} has floating datatype {}",
                idx + 1,
                band.data_type()
            )));
        }
    }
    Ok(())
}

/// Block size of a new level: the base tile size, or full-width strips.
fn level_block_size(base: &RasterBand, width: usize, height: usize) -> (usize, usize) {
    let (bw, bh) = base.block_size();
    if bw >= base.x_size() && base.block_grid().num_blocks_x == 1 && bh < base.y_size() {
        (width, bh.min(height))
    } else {
        (bw, bh)
    }
}

/// Metadata recorded on a level: resampling name and layout options.
fn stamp_level(band: &mut RasterBand, method: ResampleMethod, config: &OverviewConfig) {
    let mut structure = band.metadata(IMAGE_STRUCTURE).cloned().unwrap_or_default();
    structure.extend(config.image_structure());
    if method == ResampleMethod::AverageBit2Grayscale {
        structure.remove("NBITS");
    }
    band.set_metadata(IMAGE_STRUCTURE, structure);
    band.set_metadata_item(RESAMPLING_KEY, method.as_str(), "");
}

fn allocate(
    dataset: &mut Dataset,
    levels: &[PlannedLevel],
    storage: Storage,
    method: ResampleMethod,
    config: &OverviewConfig,
) -> Result<()> {
    for level in levels {
        for (base, set) in dataset.bands.iter().zip(dataset.overviews.iter_mut()) {
            match level.action {
                LevelAction::Create => {
                    let block = level_block_size(base, level.width, level.height);
                    let mut band = base.derive(level.width, level.height, block);
                    stamp_level(&mut band, method, config);
                    set.insert(OverviewLevel {
                        factor: level.factor,
                        storage,
                        band,
                    });
                }
                LevelAction::Refresh => {
                    let pos = set.position(level.factor).ok_or_else(|| {
                        OverviewError::IoFailure(format!(
                            "overview with factor {} missing from a band",
                            level.factor
                        ))
                    })?;
                    stamp_level(&mut set.levels_mut()[pos].band, method, config);
                }
            }
        }
        debug!(
            "Allocated level {} ({}x{}, {:?})",
            level.factor, level.width, level.height, level.action
        );
    }
    Ok(())
}

/// Resample the level at `pos` of every band from the next finer level.
fn resample_level(
    dataset: &mut Dataset,
    pos: usize,
    method: ResampleMethod,
    policy: &MaskPolicy,
    gauss_max_radius: usize,
) -> Result<usize> {
    let bands = &dataset.bands;
    let mut sources: Vec<&RasterBand> = Vec::with_capacity(bands.len());
    let mut targets: Vec<&mut RasterBand> = Vec::with_capacity(bands.len());

    for (base, set) in bands.iter().zip(dataset.overviews.iter_mut()) {
        let (finer, rest) = set.levels_mut().split_at_mut(pos);
        let finer: &[OverviewLevel] = finer;
        let (target, _) = rest.split_first_mut().ok_or_else(|| {
            OverviewError::Resampling(format!("no overview at position {}", pos))
        })?;
        sources.push(finer.last().map_or(base, |level| &level.band));
        targets.push(&mut target.band);
    }

    let source_nodata: Vec<Option<f64>> = sources.iter().map(|s| s.no_data_value()).collect();
    let resamplers: Vec<Resampler<'_>> = sources
        .iter()
        .enumerate()
        .map(|(idx, source)| {
            Resampler::new(
                method,
                source.size(),
                targets[idx].size(),
                source.color_table(),
                policy.nodata_for_band(idx, source.no_data_value()),
                gauss_max_radius,
            )
            .expand_bits(source.is_bilevel())
        })
        .collect();

    let Some(first) = resamplers.first() else {
        return Ok(0);
    };
    let (rx, ry) = first.radius();
    let grid = *targets[0].block_grid();
    let mut written = 0;

    for (_, dst) in grid.iter() {
        let src = SourceWindow::for_block(first.x_map(), first.y_map(), &dst, rx.max(ry));
        let windows = sources
            .iter()
            .map(|s| s.read_window(src.x_min, src.y_min, src.width(), src.height()))
            .collect::<Result<Vec<Array2<f64>>>>()?;

        let masks = if method.is_aggregating() {
            policy.evaluate(&windows, &source_nodata)
        } else {
            vec![None; windows.len()]
        };

        for (idx, target) in targets.iter_mut().enumerate() {
            let out = resamplers[idx].resample_block(
                windows[idx].view(),
                masks[idx].as_ref().map(|m| m.view()),
                (src.x_min, src.y_min),
                &dst,
            )?;
            target.write_block(dst.block_x, dst.block_y, out.view())?;
            written += 1;
        }
    }

    Ok(written)
}

/// Build (or refresh) overviews of every band of `dataset`.
pub fn build(
    dataset: &mut Dataset,
    method: ResampleMethod,
    factors: &[u32],
    config: &OverviewConfig,
) -> Result<BuildReport> {
    let Some(base) = dataset.bands.first() else {
        return Err(OverviewError::InvalidOption(
            "dataset has no bands".to_string(),
        ));
    };
    let base_size = base.size();
    let base_block = base.block_size();

    let band_types: Vec<DataType> = dataset.bands.iter().map(RasterBand::data_type).collect();
    let has_palette = dataset.bands.iter().any(|b| b.color_table().is_some());
    config.validate(&band_types, has_palette)?;
    check_method(method, &dataset.bands)?;

    let existing_storage = dataset.overview_storage();
    let plan = planner::plan(
        &dataset.existing_levels(),
        factors,
        base_size,
        base_block,
        dataset.profile.chain,
        &StoragePolicy {
            force_external: config.force_external,
            writable: dataset.is_writable(),
            in_place_growth: dataset.profile.in_place_growth,
            existing: existing_storage,
        },
    )?;
    let mut tracker = StateTracker {
        state: BuildState::Planned,
    };

    if plan.levels.is_empty() {
        warn!("No overview levels requested");
        tracker.advance(BuildState::Done);
        return Ok(BuildReport {
            method,
            storage: plan.storage,
            levels: Vec::new(),
            blocks_written: 0,
        });
    }
    if plan.storage == Storage::Internal && !dataset.is_writable() {
        return Err(OverviewError::IoFailure(
            "internal overviews of a read-only dataset cannot be rebuilt".to_string(),
        ));
    }

    info!(
        "Building {} overviews {:?} ({:?}) for {}x{} x {} bands",
        method,
        plan.factors(),
        plan.storage,
        base_size.0,
        base_size.1,
        dataset.bands.len()
    );

    tracker.advance(BuildState::Allocating);
    if existing_storage.is_none() && plan.storage == Storage::External {
        dataset.sidecar_kind = config.sidecar_kind;
    }
    allocate(dataset, &plan.levels, plan.storage, method, config)?;

    let policy = dataset.mask_policy();
    let mut blocks_written = 0;
    for level in &plan.levels {
        tracker.advance(BuildState::Resampling(level.factor));
        let pos = dataset
            .overviews
            .first()
            .and_then(|set| set.position(level.factor))
            .ok_or_else(|| {
                OverviewError::Resampling(format!("level {} was not allocated", level.factor))
            })?;
        let written = resample_level(dataset, pos, method, &policy, config.gauss_max_radius)?;
        debug!(
            "Level {} ({}x{}): {} blocks written",
            level.factor, level.width, level.height, written
        );
        blocks_written += written;
    }

    tracker.advance(BuildState::Done);
    Ok(BuildReport {
        method,
        storage: plan.storage,
        levels: plan.levels,
        blocks_written,
    })
}

impl Dataset {
    /// Build overviews and report a status: 0 on success, otherwise the
    /// error's [`OverviewError::status_code`].
    pub fn build_overviews(&mut self, method: &str, factors: &[u32], config: &OverviewConfig) -> i32 {
        let result = method
            .parse::<ResampleMethod>()
            .and_then(|method| build(self, method, factors, config));
        match result {
            Ok(report) => {
                info!(
                    "Built {} levels ({} blocks)",
                    report.levels.len(),
                    report.blocks_written
                );
                0
            }
            Err(e) => {
                warn!("Overview build failed: {}", e);
                e.status_code()
            }
        }
    }
}
