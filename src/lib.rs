// Library exports for testing and reuse

pub mod band;
pub mod blocks;
pub mod build;
pub mod checksum;
pub mod cli;
pub mod config;
pub mod container;
pub mod dataset;
pub mod datatype;
pub mod error;
#[cfg(feature = "gdal")]
pub mod gdal_io;
pub mod mask;
pub mod palette;
pub mod planner;
pub mod resample;

// Re-export commonly used types
pub use band::RasterBand;
pub use build::{build, BuildReport};
pub use config::OverviewConfig;
pub use dataset::{AccessMode, ContainerProfile, Dataset};
pub use datatype::DataType;
pub use error::{OverviewError, Result};
pub use resample::ResampleMethod;
