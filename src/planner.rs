use crate::error::{OverviewError, Result};
use log::debug;
use serde::{Deserialize, Serialize};

/// How a container lays out the chain of overview factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelChain {
    /// Exactly the requested factors.
    Explicit,
    /// Powers of `scale` (`2` is the dyadic chain), with every intermediate
    /// power materialised. With `until_single_block` the chain keeps going
    /// until a level fits in one block.
    Geometric { scale: u32, until_single_block: bool },
}

/// Where overview pixels live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Storage {
    /// Embedded in the dataset's own container.
    Internal,
    /// In a sidecar next to the container.
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelAction {
    Create,
    /// An existing level with this factor is recomputed in place.
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistingLevel {
    pub factor: u32,
    pub width: usize,
    pub height: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedLevel {
    pub factor: u32,
    pub width: usize,
    pub height: usize,
    pub action: LevelAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverviewPlan {
    pub levels: Vec<PlannedLevel>,
    pub storage: Storage,
}

impl OverviewPlan {
    pub fn factors(&self) -> Vec<u32> {
        self.levels.iter().map(|l| l.factor).collect()
    }
}

/// Inputs of the internal-vs-external decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoragePolicy {
    pub force_external: bool,
    pub writable: bool,
    pub in_place_growth: bool,
    /// Storage of overviews already present, which a rebuild keeps.
    pub existing: Option<Storage>,
}

impl StoragePolicy {
    pub fn decide(&self) -> Storage {
        if let Some(storage) = self.existing {
            return storage;
        }
        if self.force_external {
            Storage::External
        } else if self.in_place_growth && self.writable {
            Storage::Internal
        } else {
            Storage::External
        }
    }
}

pub fn level_size(base: (usize, usize), factor: u32) -> (usize, usize) {
    let f = factor as usize;
    (base.0.div_ceil(f), base.1.div_ceil(f))
}

fn is_power_of(value: u32, scale: u32) -> bool {
    let mut p = scale as u64;
    while p < value as u64 {
        p *= scale as u64;
    }
    p == value as u64
}

/// Expand requested factors along a geometric chain.
///
/// The chain ratio is the container's `scale`, unless the finest factor
/// already present (or, without overviews, the smallest one requested) is
/// not a power of it; that factor then becomes the ratio.
fn expand_chain(
    factors: Vec<u32>,
    existing: &[ExistingLevel],
    chain: LevelChain,
    base: (usize, usize),
    block: (usize, usize),
) -> Result<Vec<u32>> {
    let LevelChain::Geometric {
        scale: profile_scale,
        until_single_block,
    } = chain
    else {
        return Ok(factors);
    };
    let Some(&max) = factors.last() else {
        return Ok(factors);
    };
    if profile_scale <= 1 {
        return Err(OverviewError::InvalidFactor(format!(
            "level chain scale {} must be greater than 1",
            profile_scale
        )));
    }
    let anchor = existing.iter().map(|l| l.factor).filter(|&f| f > 1).min().unwrap_or(factors[0]);
    let scale = if is_power_of(anchor, profile_scale) {
        profile_scale
    } else {
        anchor
    };

    if let Some(&bad) = factors.iter().find(|&&f| !is_power_of(f, scale)) {
        return Err(OverviewError::InvalidFactor(format!(
            "factor {} is not a power of {} required by the level chain",
            bad, scale
        )));
    }

    let fits = |(w, h): (usize, usize)| (w <= block.0 && h <= block.1) || (w <= 1 && h <= 1);
    let mut chain_factors = Vec::new();
    let mut previous_fits = fits(base);
    let mut factor = scale as u64;
    while factor <= u32::MAX as u64 {
        let wanted = factor <= max as u64;
        if !wanted && !(until_single_block && !previous_fits) {
            break;
        }
        chain_factors.push(factor as u32);
        previous_fits = fits(level_size(base, factor as u32));
        factor *= scale as u64;
    }
    Ok(chain_factors)
}

/// Plan the levels a build produces.
pub fn plan(
    existing: &[ExistingLevel],
    requested: &[u32],
    base: (usize, usize),
    block: (usize, usize),
    chain: LevelChain,
    storage: &StoragePolicy,
) -> Result<OverviewPlan> {
    if base.0 == 0 || base.1 == 0 {
        return Err(OverviewError::InvalidFactor(format!(
            "base raster {}x{} has no pixels to decimate",
            base.0, base.1
        )));
    }
    if let Some(&bad) = requested.iter().find(|&&f| f <= 1) {
        return Err(OverviewError::InvalidFactor(format!(
            "factor {} must be greater than 1",
            bad
        )));
    }

    let mut factors = requested.to_vec();
    factors.sort_unstable();
    factors.dedup();
    let factors = expand_chain(factors, existing, chain, base, block)?;

    let levels = factors
        .into_iter()
        .map(|factor| match existing.iter().find(|l| l.factor == factor) {
            Some(level) => PlannedLevel {
                factor,
                width: level.width,
                height: level.height,
                action: LevelAction::Refresh,
            },
            None => {
                let (width, height) = level_size(base, factor);
                PlannedLevel {
                    factor,
                    width,
                    height,
                    action: LevelAction::Create,
                }
            }
        })
        .collect::<Vec<_>>();

    let storage = storage.decide();
    debug!(
        "Planned {} levels {:?} ({:?})",
        levels.len(),
        levels.iter().map(|l| l.factor).collect::<Vec<_>>(),
        storage
    );

    Ok(OverviewPlan { levels, storage })
}

#[cfg(test)]
mod tests {
    use super::*;

    const WRITABLE_TIFF: StoragePolicy = StoragePolicy {
        force_external: false,
        writable: true,
        in_place_growth: true,
        existing: None,
    };

    #[test]
    fn test_explicit_sorted_and_deduplicated() {
        let plan = plan(&[], &[4, 2, 4], (20, 20), (256, 256), LevelChain::Explicit, &WRITABLE_TIFF).unwrap();
        assert_eq!(plan.factors(), vec![2, 4]);
        assert_eq!((plan.levels[0].width, plan.levels[0].height), (10, 10));
        assert_eq!((plan.levels[1].width, plan.levels[1].height), (5, 5));
        assert_eq!(plan.storage, Storage::Internal);
    }

    #[test]
    fn test_ceiling_dimensions() {
        assert_eq!(level_size((21, 7), 2), (11, 4));
        assert_eq!(level_size((20, 20), 3), (7, 7));
        assert_eq!(level_size((3, 3), 8), (1, 1));
    }

    #[test]
    fn test_invalid_factors() {
        for bad in [[0u32], [1u32]] {
            assert!(matches!(
                plan(&[], &bad, (20, 20), (8, 8), LevelChain::Explicit, &WRITABLE_TIFF),
                Err(OverviewError::InvalidFactor(_))
            ));
        }
        assert!(plan(&[], &[2], (0, 20), (8, 8), LevelChain::Explicit, &WRITABLE_TIFF).is_err());
    }

    const DYADIC: LevelChain = LevelChain::Geometric {
        scale: 2,
        until_single_block: false,
    };

    #[test]
    fn test_dyadic_inserts_intermediate() {
        let plan = plan(&[], &[4], (20, 20), (256, 256), DYADIC, &WRITABLE_TIFF).unwrap();
        assert_eq!(plan.factors(), vec![2, 4]);
        assert_eq!((plan.levels[0].width, plan.levels[0].height), (10, 10));

        let plan = super::plan(&[], &[2, 16], (64, 64), (256, 256), DYADIC, &WRITABLE_TIFF).unwrap();
        assert_eq!(plan.factors(), vec![2, 4, 8, 16]);
    }

    #[test]
    fn test_geometric_rejects_non_power() {
        assert!(matches!(
            plan(&[], &[2, 6], (64, 64), (8, 8), DYADIC, &WRITABLE_TIFF),
            Err(OverviewError::InvalidFactor(_))
        ));
        assert!(matches!(
            plan(&[], &[3, 6], (64, 64), (8, 8), DYADIC, &WRITABLE_TIFF),
            Err(OverviewError::InvalidFactor(_))
        ));
        let by_three = LevelChain::Geometric {
            scale: 3,
            until_single_block: false,
        };
        let plan = plan(&[], &[9], (81, 81), (8, 8), by_three, &WRITABLE_TIFF).unwrap();
        assert_eq!(plan.factors(), vec![3, 9]);
    }

    #[test]
    fn test_geometric_ratio_from_smallest_factor() {
        let mrf = LevelChain::Geometric {
            scale: 2,
            until_single_block: true,
        };
        // 20x20 in 10x10 blocks: 7x7 already fits one block.
        let plan = plan(&[], &[3], (20, 20), (10, 10), mrf, &WRITABLE_TIFF).unwrap();
        assert_eq!(plan.factors(), vec![3]);
        assert_eq!((plan.levels[0].width, plan.levels[0].height), (7, 7));

        let plan = super::plan(&[], &[9], (81, 81), (256, 256), DYADIC, &WRITABLE_TIFF).unwrap();
        assert_eq!(plan.factors(), vec![9]);

        // Existing levels on a ratio-3 chain keep that ratio.
        let existing = [ExistingLevel {
            factor: 3,
            width: 27,
            height: 27,
        }];
        let plan = super::plan(&existing, &[9], (81, 81), (256, 256), DYADIC, &WRITABLE_TIFF).unwrap();
        assert_eq!(plan.factors(), vec![3, 9]);
        assert_eq!(plan.levels[0].action, LevelAction::Refresh);
    }

    #[test]
    fn test_geometric_until_single_block() {
        let chain = LevelChain::Geometric {
            scale: 2,
            until_single_block: true,
        };
        // 20x20 in 5x5 blocks: 10x10 still spans blocks, 5x5 fits one.
        let plan = plan(&[], &[2], (20, 20), (5, 5), chain, &WRITABLE_TIFF).unwrap();
        assert_eq!(plan.factors(), vec![2, 4]);

        let plan = super::plan(&[], &[2], (20, 20), (10, 10), chain, &WRITABLE_TIFF).unwrap();
        assert_eq!(plan.factors(), vec![2]);
    }

    #[test]
    fn test_existing_levels_are_refreshed_not_resized() {
        let existing = [ExistingLevel {
            factor: 2,
            width: 50,
            height: 50,
        }];
        let plan = plan(&existing, &[2, 4], (100, 100), (256, 256), LevelChain::Explicit, &WRITABLE_TIFF).unwrap();
        assert_eq!(plan.levels[0].action, LevelAction::Refresh);
        assert_eq!((plan.levels[0].width, plan.levels[0].height), (50, 50));
        assert_eq!(plan.levels[1].action, LevelAction::Create);
        assert_eq!((plan.levels[1].width, plan.levels[1].height), (25, 25));
    }

    #[test]
    fn test_storage_decision() {
        let read_only = StoragePolicy {
            writable: false,
            ..WRITABLE_TIFF
        };
        assert_eq!(read_only.decide(), Storage::External);

        let forced = StoragePolicy {
            force_external: true,
            ..WRITABLE_TIFF
        };
        assert_eq!(forced.decide(), Storage::External);

        let no_growth = StoragePolicy {
            in_place_growth: false,
            ..WRITABLE_TIFF
        };
        assert_eq!(no_growth.decide(), Storage::External);

        let keeps_existing = StoragePolicy {
            force_external: true,
            existing: Some(Storage::Internal),
            ..WRITABLE_TIFF
        };
        assert_eq!(keeps_existing.decide(), Storage::Internal);
        assert_eq!(WRITABLE_TIFF.decide(), Storage::Internal);
    }
}
