#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod annotations;
pub mod frames;
pub mod fs;
pub mod shard;

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use sphcrop_core::annotation::AnnotationParseError;
use sphcrop_core::types::{BucketKey, FrameId, Layer, Network};
use thiserror::Error;

pub use fs::{bucket_state, try_claim_bucket, BucketLock, BucketState, Claim, LockRelease};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("annotation file does not exist: {0}")]
    MissingAnnotation(PathBuf),
    #[error("source frame {frame_id} does not exist: {path}")]
    MissingFrame { frame_id: FrameId, path: PathBuf },
    #[error("parse annotation file {path}: {source}")]
    AnnotationParse {
        path: PathBuf,
        source: AnnotationParseError,
    },
    #[error("decode frame {path}: {source}")]
    FrameDecode {
        path: PathBuf,
        source: ndarray_npy::ReadNpyError,
    },
    #[error("write shard {path}: {source}")]
    ShardEncode {
        path: PathBuf,
        source: ndarray_npy::WriteNpzError,
    },
    #[error("read shard {path}: {source}")]
    ShardDecode {
        path: PathBuf,
        source: ndarray_npy::ReadNpzError,
    },
    #[error("shard columns are inconsistent: {0}")]
    ShardColumns(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Paths of the three artifacts that make up one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketPaths {
    pub annotation: PathBuf,
    pub shard: PathBuf,
    pub lock: PathBuf,
}

/// Directory conventions under the data root.
///
/// ```text
/// SourceSphereH{H}Ks{ks}/{network}{bottom}/{frame_id}.npy
/// TargetSphereH{H}Ks{ks}/{network}{layer}/tilt{ttt}.{split}.tsv        annotations
/// TargetSphereH{H}Ks{ks}/{network}{layer}/tilt{ttt}.{split}.npz        finished shard
/// TargetSphereH{H}Ks{ks}/{network}{layer}/tilt{ttt}.{split}.npz.lock   claim marker
/// Geometry/SphereH{H}Ks{ks}.tsv
/// ```
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_dir(&self, sphere_h: u32, ks: u32, network: Network, layer: Layer) -> PathBuf {
        self.root
            .join(format!("SourceSphereH{sphere_h}Ks{ks}"))
            .join(format!("{network}{}", layer.bottom()))
    }

    pub fn target_dir(&self, sphere_h: u32, ks: u32, network: Network, layer: Layer) -> PathBuf {
        self.root
            .join(format!("TargetSphereH{sphere_h}Ks{ks}"))
            .join(format!("{network}{layer}"))
    }

    pub fn bucket(&self, key: &BucketKey) -> BucketPaths {
        let dir = self.target_dir(key.sphere_h, key.ks, key.network, key.layer);
        let stem = key.stem();
        BucketPaths {
            annotation: dir.join(format!("{stem}.tsv")),
            shard: dir.join(format!("{stem}.npz")),
            lock: dir.join(format!("{stem}.npz.lock")),
        }
    }

    pub fn geometry_path(&self, sphere_h: u32, ks: u32) -> PathBuf {
        self.root
            .join("Geometry")
            .join(format!("SphereH{sphere_h}Ks{ks}.tsv"))
    }

    pub fn default_log_dir(&self) -> PathBuf {
        self.root.join("Log").join("crop_srcs")
    }
}

/// One log file per `(sphereH, network, layer, process)`.
pub fn process_log_path(
    log_dir: &Path,
    sphere_h: u32,
    network: Network,
    layer: Layer,
    process: u32,
) -> PathBuf {
    log_dir
        .join(format!("SphereH{sphere_h}"))
        .join(format!("{network}{layer}"))
        .join(format!("process{process:02}.log"))
}

pub(crate) fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .min(u64::MAX as u128) as u64
}
