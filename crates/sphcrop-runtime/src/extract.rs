use std::collections::BTreeMap;

use ndarray::{Array3, ArrayView3};
use sphcrop_core::types::{Layer, Size2};
use sphcrop_geometry::{crop_image, subsample, CropGeometry, GeometryError};
use sphcrop_store::frames::FrameSource;
use tracing::{error, info};

use crate::error::CropError;
use crate::metrics::RuntimeMetrics;
use crate::types::{FrameIndex, ShardBuffer, TargetSample};

const PROGRESS_EVERY: usize = 1000;

/// Per-run crop parameters: the layer, its stride, and the resolved geometry
/// of every claimed tilt.
#[derive(Debug, Clone)]
pub struct CropPlan {
    pub layer: Layer,
    pub stride: usize,
    pub geometries: BTreeMap<u32, CropGeometry>,
}

impl CropPlan {
    /// The same plan restricted to `tilts`; tilts it does not know are left out.
    pub fn for_tilts<'a>(&self, tilts: impl IntoIterator<Item = &'a u32>) -> CropPlan {
        let geometries = tilts
            .into_iter()
            .filter_map(|t| self.geometries.get(t).map(|g| (*t, *g)))
            .collect();
        CropPlan {
            layer: self.layer,
            stride: self.stride,
            geometries,
        }
    }

    fn geometry(&self, tilt: u32) -> Result<CropGeometry, CropError> {
        self.geometries.get(&tilt).copied().ok_or_else(|| {
            CropError::Geometry(GeometryError::NoCrop {
                layer: self.layer,
                tilt,
            })
        })
    }
}

#[derive(Debug, Default)]
pub struct ExtractOutcome {
    /// One buffer per claimed tilt that did not fail, including empty ones.
    pub buffers: BTreeMap<u32, ShardBuffer>,
    /// Tilts that lost a source frame; their buffers are dropped.
    pub failed: BTreeMap<u32, CropError>,
}

/// Cuts one sample out of its frame and checks the result against the
/// expected output size.
pub fn extract_crop(
    frame: ArrayView3<'_, f32>,
    layer: Layer,
    tilt: u32,
    sample: &TargetSample,
    geometry: CropGeometry,
    stride: usize,
) -> Result<Array3<f32>, CropError> {
    let crop = subsample(
        crop_image(frame, sample.x, sample.y, geometry.crop_in),
        stride,
    );
    let (h, w, _) = crop.dim();
    if w != geometry.crop_out.w || h != geometry.crop_out.h {
        return Err(CropError::ShapeMismatch {
            layer,
            tilt,
            x: sample.x,
            y: sample.y,
            expected: geometry.crop_out,
            got: Size2 { w, h },
        });
    }
    Ok(crop)
}

/// Loads every frame of `index` once and fills the per-tilt buffers.
///
/// A frame that cannot be found fails the tilts that reference it and the
/// walk moves on. Shape mismatches and decode errors abort.
pub fn extract_all(
    index: &FrameIndex,
    frames: &dyn FrameSource,
    plan: &CropPlan,
    metrics: &RuntimeMetrics,
) -> Result<ExtractOutcome, CropError> {
    let mut outcome = ExtractOutcome::default();
    for (&tilt, geometry) in &plan.geometries {
        outcome
            .buffers
            .insert(tilt, ShardBuffer::new(tilt, geometry.crop_out));
    }

    for (frame_id, tilts) in index.frames() {
        if tilts.keys().all(|t| outcome.failed.contains_key(t)) {
            continue;
        }

        let loaded = {
            let _timer = metrics.frame_load.start();
            frames.load(frame_id)
        };
        let frame = match loaded.map_err(CropError::from_store) {
            Ok(frame) => frame,
            Err(CropError::MissingInput(path)) => {
                error!(
                    target: "sphcrop",
                    event = "frame_missing",
                    frame_id = %frame_id,
                    path = %path.display(),
                    tilts = ?tilts.keys().collect::<Vec<_>>(),
                    "source frame missing; failing its tilts"
                );
                for &tilt in tilts.keys() {
                    outcome.buffers.remove(&tilt);
                    outcome
                        .failed
                        .entry(tilt)
                        .or_insert_with(|| CropError::MissingInput(path.clone()));
                }
                continue;
            }
            Err(err) => return Err(err),
        };
        metrics.frames_loaded.inc();

        for (&tilt, samples) in tilts {
            let Some(buffer) = outcome.buffers.get_mut(&tilt) else {
                continue;
            };
            let geometry = plan.geometry(tilt)?;
            for sample in samples {
                let crop = extract_crop(
                    frame.view(),
                    plan.layer,
                    tilt,
                    sample,
                    geometry,
                    plan.stride,
                )?;
                let rows = buffer.push(sample, crop);
                metrics.samples_cropped.inc();
                if rows % PROGRESS_EVERY == 0 {
                    info!(
                        target: "sphcrop",
                        event = "crop_progress",
                        tilt,
                        rows,
                        "tilt {tilt}: {rows} samples"
                    );
                }
            }
        }
    }
    Ok(outcome)
}
