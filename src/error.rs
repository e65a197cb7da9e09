//! Error types for the sampling pipeline

use std::path::PathBuf;

use thiserror::Error;

use crate::enums::VariantName;

#[derive(Debug, Error)]
pub enum SamplingError {
    #[error("File name {0:?} does not embed a timepoint index (expected ...pt<digits>.<ext>)")]
    FilenameFormat(PathBuf),

    #[error("Volume has {actual} dimensions, expected {expected}")]
    Shape { actual: usize, expected: usize },

    #[error("No source files with extension .{extension} found in {dir:?}")]
    EmptyInput { dir: PathBuf, extension: String },

    #[error("Metadata is missing or malformed at {0}")]
    MetadataFormat(String),

    #[error("Timepoint index {0} occurs more than once")]
    DuplicateTimepoint(u64),

    #[error("Inconsistent volume dimensions: expected {expected:?}, found {found:?} in {path:?}")]
    InconsistentDimensions {
        path: PathBuf,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Inconsistent pixel type: expected {expected}, found {found} in {path:?}")]
    InconsistentPixelType {
        path: PathBuf,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Axis {axis} is out of range for an array with {ndim} dimensions")]
    AxisOutOfRange { axis: usize, ndim: usize },

    #[error("Index {index} is out of range for axis {axis} of length {len}")]
    IndexOutOfRange { axis: usize, index: usize, len: usize },

    #[error("Pixel data of shape {0:?} is not contiguous in memory")]
    NonContiguous(Vec<usize>),

    #[error("Resolution {0} cannot be stored as a TIFF rational")]
    Resolution(f64),

    #[error("Cannot stack volumes: {0}")]
    Stacking(#[from] ndarray::ShapeError),

    #[error("Variant {variant} derives from {depends_on}, which is not computed before it")]
    VariantOrder {
        variant: VariantName,
        depends_on: VariantName,
    },

    #[error("Unsupported CZI content: {0}")]
    UnsupportedCzi(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("Invalid file name pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("XML error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("Worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Specialized Result type for sampling operations
pub type Result<T> = std::result::Result<T, SamplingError>;
