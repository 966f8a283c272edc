use std::path::PathBuf;

use sphcrop_core::types::{AnnotationRecordError, Layer, Size2};
use sphcrop_geometry::GeometryError;
use sphcrop_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CropError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("source directory does not exist: {0}")]
    SourceDirMissing(PathBuf),
    /// An annotation file or source frame is absent. Fatal for the buckets
    /// that need it; the rest of the run continues.
    #[error("missing input: {0}")]
    MissingInput(PathBuf),
    #[error("record for {source_path} has y={y} but sits in the tilt {tilt} bucket")]
    DataConsistency {
        tilt: u32,
        y: i64,
        source_path: String,
    },
    #[error("tilt {tilt} record for {source_path}: {source}")]
    Record {
        tilt: u32,
        source_path: String,
        source: AnnotationRecordError,
    },
    #[error("layer {layer} tilt {tilt} crop at ({x}, {y}) is {got}, expected {expected}")]
    ShapeMismatch {
        layer: Layer,
        tilt: u32,
        x: i64,
        y: i64,
        expected: Size2,
        got: Size2,
    },
    #[error("tilt {tilt} rows cannot be stacked: {reason}")]
    InconsistentShard { tilt: u32, reason: String },
    #[error("geometry: {0}")]
    Geometry(#[from] GeometryError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

impl CropError {
    /// Absent inputs fail only the buckets that need them; everything else aborts the run.
    pub fn is_missing_input(&self) -> bool {
        matches!(self, CropError::MissingInput(_))
    }

    /// Lifts the two "input not there" store errors into [`CropError::MissingInput`].
    pub fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::MissingAnnotation(path) | StoreError::MissingFrame { path, .. } => {
                CropError::MissingInput(path)
            }
            other => CropError::Store(other),
        }
    }
}
