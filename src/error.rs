use thiserror::Error;

#[derive(Error, Debug)]
pub enum OverviewError {
    #[error("Failed to open dataset {path}: {reason}")]
    OpenFailure { path: String, reason: String },

    #[error("Invalid overview factor: {0}")]
    InvalidFactor(String),

    #[error("Unsupported combination: {0}")]
    UnsupportedCombination(String),

    #[error("Resampling failed: {0}")]
    Resampling(String),

    #[error("Block I/O failure: {0}")]
    IoFailure(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Band {0} does not exist")]
    InvalidBand(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Container document error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl OverviewError {
    /// Nonzero status reported by [`crate::Dataset::build_overviews`].
    pub fn status_code(&self) -> i32 {
        match self {
            OverviewError::OpenFailure { .. } => 1,
            OverviewError::InvalidFactor(_) => 2,
            OverviewError::UnsupportedCombination(_) => 3,
            OverviewError::Resampling(_) => 4,
            OverviewError::IoFailure(_) | OverviewError::Io(_) => 5,
            OverviewError::InvalidOption(_) | OverviewError::InvalidBand(_) => 6,
            OverviewError::Json(_) | OverviewError::Shape(_) => 7,
            #[cfg(feature = "gdal")]
            OverviewError::Gdal(_) => 8,
        }
    }
}

pub type Result<T> = std::result::Result<T, OverviewError>;
