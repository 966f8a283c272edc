use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Array3, Array4, ArrayView3, Axis};
use sphcrop_core::types::{FrameId, Size2};
use sphcrop_store::shard::ShardColumns;

use crate::error::CropError;

/// One crop request after reorganization.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSample {
    pub source_path: String,
    pub x: i64,
    pub y: i64,
    pub label: Vec<f32>,
}

/// `frame_id -> tilt -> samples`, so every frame is read once for all of its tilts.
///
/// Sample order within a `(frame, tilt)` list follows the annotation file.
#[derive(Debug, Default)]
pub struct FrameIndex {
    frames: BTreeMap<FrameId, BTreeMap<u32, Vec<TargetSample>>>,
    total: usize,
}

impl FrameIndex {
    pub fn insert(&mut self, frame_id: FrameId, tilt: u32, sample: TargetSample) {
        self.frames
            .entry(frame_id)
            .or_default()
            .entry(tilt)
            .or_default()
            .push(sample);
        self.total += 1;
    }

    pub fn frames(&self) -> impl Iterator<Item = (&FrameId, &BTreeMap<u32, Vec<TargetSample>>)> {
        self.frames.iter()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn total_samples(&self) -> usize {
        self.total
    }

    pub fn samples(&self, frame_id: &FrameId, tilt: u32) -> &[TargetSample] {
        self.frames
            .get(frame_id)
            .and_then(|tilts| tilts.get(&tilt))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Per-tilt column accumulator. Every push appends to all five columns, so
/// they always have the same number of rows.
#[derive(Debug, Clone)]
pub struct ShardBuffer {
    tilt: u32,
    crop_out: Size2,
    x: Vec<i64>,
    y: Vec<i64>,
    label: Vec<Vec<f32>>,
    path: Vec<String>,
    image: Vec<Array3<f32>>,
}

impl ShardBuffer {
    pub fn new(tilt: u32, crop_out: Size2) -> Self {
        Self {
            tilt,
            crop_out,
            x: Vec::new(),
            y: Vec::new(),
            label: Vec::new(),
            path: Vec::new(),
            image: Vec::new(),
        }
    }

    pub fn tilt(&self) -> u32 {
        self.tilt
    }

    /// Appends one row and returns the new row count.
    pub fn push(&mut self, sample: &TargetSample, image: Array3<f32>) -> usize {
        self.x.push(sample.x);
        self.y.push(sample.y);
        self.label.push(sample.label.clone());
        self.path.push(sample.source_path.clone());
        self.image.push(image);
        self.x.len()
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Row counts of `x, y, target, path, srcs`.
    pub fn column_lens(&self) -> [usize; 5] {
        [
            self.x.len(),
            self.y.len(),
            self.label.len(),
            self.path.len(),
            self.image.len(),
        ]
    }

    /// Stacks the rows into the shard's array columns.
    pub fn into_columns(self) -> Result<ShardColumns, CropError> {
        let tilt = self.tilt;
        let n = self.len();
        let inconsistent = |reason: String| CropError::InconsistentShard { tilt, reason };

        let width = self.label.first().map_or(0, Vec::len);
        if let Some(bad) = self.label.iter().find(|l| l.len() != width) {
            return Err(inconsistent(format!(
                "label widths differ ({} vs {width})",
                bad.len()
            )));
        }
        let flat: Vec<f32> = self.label.into_iter().flatten().collect();
        let target = Array2::from_shape_vec((n, width), flat)
            .map_err(|e| inconsistent(format!("target: {e}")))?;

        let srcs = if self.image.is_empty() {
            Array4::zeros((0, self.crop_out.h, self.crop_out.w, 0))
        } else {
            let views: Vec<ArrayView3<'_, f32>> = self.image.iter().map(|a| a.view()).collect();
            ndarray::stack(Axis(0), &views).map_err(|e| inconsistent(format!("srcs: {e}")))?
        };

        Ok(ShardColumns {
            path: self.path,
            x: Array1::from(self.x),
            y: Array1::from(self.y),
            target,
            srcs,
        })
    }
}
