#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod crop;
pub mod table;

use std::path::PathBuf;

use sphcrop_core::types::{Layer, Size2};
use thiserror::Error;

pub use crop::{crop_image, subsample};
pub use table::GeometryTable;

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("read geometry table {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("geometry table is not utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("geometry header must be schema_version=<n>")]
    MissingSchemaVersion,
    #[error("unsupported geometry schema_version {0}")]
    UnsupportedSchemaVersion(u32),
    #[error("geometry line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("geometry table is for sphereH={have_sphere_h} ks={have_ks}, asked for sphereH={sphere_h} ks={ks}")]
    TableMismatch {
        have_sphere_h: u32,
        have_ks: u32,
        sphere_h: u32,
        ks: u32,
    },
    #[error("no crop geometry for layer {layer} tilt {tilt}")]
    NoCrop { layer: Layer, tilt: u32 },
}

/// Crop window cut from the source frame and the size it must have after striding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropGeometry {
    pub crop_in: Size2,
    pub crop_out: Size2,
}

/// Receptive-field math consumed by the crop stage.
pub trait Geometry {
    /// Integer downsampling applied to every crop of `layer`; 1 means none.
    fn stride(&self, layer: Layer, sphere_h: u32, ks: u32) -> Result<usize, GeometryError>;

    fn crop_geometry(
        &self,
        layer: Layer,
        tilt: u32,
        sphere_h: u32,
    ) -> Result<CropGeometry, GeometryError>;
}
