use crate::datatype::DataType;
use crate::error::{OverviewError, Result};
use crate::resample::DEFAULT_GAUSS_MAX_RADIUS;
use log::debug;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Deflate,
    Lzw,
    Packbits,
    Jpeg,
    Lerc,
    Zstd,
}

impl Compression {
    pub fn as_str(self) -> &'static str {
        match self {
            Compression::None => "NONE",
            Compression::Deflate => "DEFLATE",
            Compression::Lzw => "LZW",
            Compression::Packbits => "PACKBITS",
            Compression::Jpeg => "JPEG",
            Compression::Lerc => "LERC",
            Compression::Zstd => "ZSTD",
        }
    }
}

impl FromStr for Compression {
    type Err = OverviewError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "NONE" => Ok(Compression::None),
            "DEFLATE" => Ok(Compression::Deflate),
            "LZW" => Ok(Compression::Lzw),
            "PACKBITS" => Ok(Compression::Packbits),
            "JPEG" => Ok(Compression::Jpeg),
            "LERC" => Ok(Compression::Lerc),
            "ZSTD" => Ok(Compression::Zstd),
            other => Err(OverviewError::InvalidOption(format!(
                "invalid compression type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Photometric {
    MinIsBlack,
    Rgb,
    YCbCr,
    Palette,
}

impl Photometric {
    pub fn as_str(self) -> &'static str {
        match self {
            Photometric::MinIsBlack => "MINISBLACK",
            Photometric::Rgb => "RGB",
            Photometric::YCbCr => "YCBCR",
            Photometric::Palette => "PALETTE",
        }
    }
}

impl FromStr for Photometric {
    type Err = OverviewError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MINISBLACK" => Ok(Photometric::MinIsBlack),
            "RGB" => Ok(Photometric::Rgb),
            "YCBCR" => Ok(Photometric::YCbCr),
            "PALETTE" => Ok(Photometric::Palette),
            other => Err(OverviewError::InvalidOption(format!(
                "invalid photometric interpretation: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interleave {
    #[default]
    Pixel,
    Band,
}

impl Interleave {
    pub fn as_str(self) -> &'static str {
        match self {
            Interleave::Pixel => "PIXEL",
            Interleave::Band => "BAND",
        }
    }
}

impl FromStr for Interleave {
    type Err = OverviewError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PIXEL" => Ok(Interleave::Pixel),
            "BAND" => Ok(Interleave::Band),
            other => Err(OverviewError::InvalidOption(format!(
                "invalid interleave: {}",
                other
            ))),
        }
    }
}

/// Naming of the external overview sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SidecarKind {
    /// `<path>.ovr`
    #[default]
    Ovr,
    /// `<path without extension>.aux`
    Rrd,
}

impl SidecarKind {
    pub fn path_for(self, dataset_path: &Path) -> PathBuf {
        match self {
            SidecarKind::Ovr => {
                let mut name = dataset_path.as_os_str().to_owned();
                name.push(".ovr");
                PathBuf::from(name)
            }
            SidecarKind::Rrd => dataset_path.with_extension("aux"),
        }
    }
}

/// Options of one overview build, passed explicitly instead of read from
/// process-wide state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverviewConfig {
    pub compression: Compression,
    pub photometric: Option<Photometric>,
    pub interleave: Interleave,
    pub force_external: bool,
    pub sidecar_kind: SidecarKind,
    pub gauss_max_radius: usize,
}

impl Default for OverviewConfig {
    fn default() -> Self {
        Self {
            compression: Compression::None,
            photometric: None,
            interleave: Interleave::Pixel,
            force_external: false,
            sidecar_kind: SidecarKind::Ovr,
            gauss_max_radius: DEFAULT_GAUSS_MAX_RADIUS,
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_uppercase().as_str(),
        "YES" | "ON" | "TRUE" | "1"
    )
}

impl OverviewConfig {
    /// Build a configuration from `KEY=VALUE` style lookups.
    ///
    /// Recognised keys: `COMPRESS_OVERVIEW`, `PHOTOMETRIC_OVERVIEW`,
    /// `INTERLEAVE_OVERVIEW`, `USE_RRD`. Empty values mean "unset".
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = OverviewConfig::default();

        if let Some(v) = get("COMPRESS_OVERVIEW") {
            config.compression = v.parse()?;
        }
        if let Some(v) = get("PHOTOMETRIC_OVERVIEW") {
            config.photometric = Some(v.parse()?);
        }
        if let Some(v) = get("INTERLEAVE_OVERVIEW") {
            config.interleave = v.parse()?;
        }
        if get("USE_RRD").is_some_and(|v| is_truthy(&v)) {
            config.force_external = true;
            config.sidecar_kind = SidecarKind::Rrd;
        }

        debug!("Overview config: {:?}", config);
        Ok(config)
    }

    /// Read the configuration from environment variables, once.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reject options no codec could honor for these bands.
    pub fn validate(&self, band_types: &[DataType], has_palette: bool) -> Result<()> {
        if self.compression == Compression::Jpeg {
            if let Some(dt) = band_types.iter().find(|&&dt| dt != DataType::Byte) {
                return Err(OverviewError::UnsupportedCombination(format!(
                    "JPEG overviews require Byte bands, found {}",
                    dt
                )));
            }
            if has_palette {
                return Err(OverviewError::UnsupportedCombination(
                    "JPEG overviews cannot store color-indexed bands".to_string(),
                ));
            }
        }

        if self.photometric == Some(Photometric::YCbCr) {
            if self.compression != Compression::Jpeg {
                return Err(OverviewError::UnsupportedCombination(
                    "YCBCR photometric requires JPEG compression".to_string(),
                ));
            }
            if band_types.len() != 3 || self.interleave != Interleave::Pixel {
                return Err(OverviewError::UnsupportedCombination(format!(
                    "YCBCR photometric requires 3 pixel-interleaved bands, found {} ({})",
                    band_types.len(),
                    self.interleave.as_str()
                )));
            }
        }

        if self.photometric == Some(Photometric::Palette) && !has_palette {
            return Err(OverviewError::UnsupportedCombination(
                "PALETTE photometric requires a color table".to_string(),
            ));
        }

        Ok(())
    }

    /// `IMAGE_STRUCTURE` items recorded on every generated level.
    pub fn image_structure(&self) -> BTreeMap<String, String> {
        let mut items = BTreeMap::new();
        items.insert("COMPRESSION".to_string(), self.compression.as_str().to_string());
        items.insert("INTERLEAVE".to_string(), self.interleave.as_str().to_string());
        if let Some(photometric) = self.photometric {
            items.insert("PHOTOMETRIC".to_string(), photometric.as_str().to_string());
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_compression_valid() {
        assert_eq!("DEFLATE".parse::<Compression>().unwrap(), Compression::Deflate);
        assert_eq!("jpeg".parse::<Compression>().unwrap(), Compression::Jpeg);
        assert_eq!("".parse::<Compression>().unwrap(), Compression::None);
    }

    #[test]
    fn test_compression_invalid() {
        assert!("INVALID".parse::<Compression>().is_err());
        assert!("webp2".parse::<Compression>().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let config = OverviewConfig::from_lookup(lookup(&[
            ("COMPRESS_OVERVIEW", "JPEG"),
            ("PHOTOMETRIC_OVERVIEW", "YCBCR"),
            ("INTERLEAVE_OVERVIEW", "PIXEL"),
        ]))
        .unwrap();
        assert_eq!(config.compression, Compression::Jpeg);
        assert_eq!(config.photometric, Some(Photometric::YCbCr));
        assert!(!config.force_external);
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = OverviewConfig::from_lookup(lookup(&[("COMPRESS_OVERVIEW", ""), ("USE_RRD", "NO")])).unwrap();
        assert_eq!(config, OverviewConfig::default());
    }

    #[test]
    fn test_use_rrd_forces_aux_sidecar() {
        let config = OverviewConfig::from_lookup(lookup(&[("USE_RRD", "YES")])).unwrap();
        assert!(config.force_external);
        assert_eq!(
            config.sidecar_kind.path_for(Path::new("tmp/ovr6.rdc")),
            PathBuf::from("tmp/ovr6.aux")
        );
        assert_eq!(
            SidecarKind::Ovr.path_for(Path::new("tmp/ovr6.rdc")),
            PathBuf::from("tmp/ovr6.rdc.ovr")
        );
    }

    #[test]
    fn test_validate_jpeg_ycbcr() {
        let config = OverviewConfig {
            compression: Compression::Jpeg,
            photometric: Some(Photometric::YCbCr),
            ..OverviewConfig::default()
        };
        let rgb = [DataType::Byte; 3];
        assert!(config.validate(&rgb, false).is_ok());
        assert!(config.validate(&[DataType::Byte], false).is_err());
        assert!(config.validate(&[DataType::UInt16; 3], false).is_err());

        let band_interleaved = OverviewConfig {
            interleave: Interleave::Band,
            ..config.clone()
        };
        assert!(band_interleaved.validate(&rgb, false).is_err());

        let no_jpeg = OverviewConfig {
            compression: Compression::Deflate,
            ..config
        };
        assert!(matches!(
            no_jpeg.validate(&rgb, false),
            Err(OverviewError::UnsupportedCombination(_))
        ));
    }

    #[test]
    fn test_image_structure_items() {
        let items = OverviewConfig::default().image_structure();
        assert_eq!(items.get("COMPRESSION").map(String::as_str), Some("NONE"));
        assert_eq!(items.get("INTERLEAVE").map(String::as_str), Some("PIXEL"));
        assert!(!items.contains_key("PHOTOMETRIC"));
    }
}
