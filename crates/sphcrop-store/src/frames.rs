use std::path::{Path, PathBuf};

use ndarray::Array3;
use sphcrop_core::types::FrameId;

use crate::StoreError;

/// Source of full panoramic frames, addressed by frame id.
pub trait FrameSource {
    fn load(&self, frame_id: &FrameId) -> Result<Array3<f32>, StoreError>;
}

/// Frames stored as one `{frame_id}.npy` per frame, `(H, W, C)`.
///
/// `f32` is read as is; `u8` frames are widened to `f32`.
#[derive(Debug, Clone)]
pub struct NpyFrameStore {
    dir: PathBuf,
}

impl NpyFrameStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frame_path(&self, frame_id: &FrameId) -> PathBuf {
        self.dir.join(format!("{}.npy", frame_id.0))
    }
}

impl FrameSource for NpyFrameStore {
    fn load(&self, frame_id: &FrameId) -> Result<Array3<f32>, StoreError> {
        let path = self.frame_path(frame_id);
        if !path.is_file() {
            return Err(StoreError::MissingFrame {
                frame_id: frame_id.clone(),
                path,
            });
        }

        match ndarray_npy::read_npy::<_, Array3<f32>>(&path) {
            Ok(frame) => Ok(frame),
            Err(first) => match ndarray_npy::read_npy::<_, Array3<u8>>(&path) {
                Ok(frame) => Ok(frame.mapv(f32::from)),
                Err(_) => Err(StoreError::FrameDecode {
                    path,
                    source: first,
                }),
            },
        }
    }
}
