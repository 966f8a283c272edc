use std::collections::BTreeMap;

use sphcrop_core::types::AnnotationRecord;
use tracing::info;

use crate::error::CropError;
use crate::types::{FrameIndex, TargetSample};

/// Regroups per-tilt annotation lists by source frame.
///
/// Every record must sit in the bucket of its own row: `record.y == tilt`.
pub fn build_frame_index(
    buckets: &BTreeMap<u32, Vec<AnnotationRecord>>,
) -> Result<FrameIndex, CropError> {
    let mut index = FrameIndex::default();
    for (&tilt, records) in buckets {
        for record in records {
            if record.y != i64::from(tilt) {
                return Err(CropError::DataConsistency {
                    tilt,
                    y: record.y,
                    source_path: record.source_path.clone(),
                });
            }
            let frame_id = record.frame_id().map_err(|source| CropError::Record {
                tilt,
                source_path: record.source_path.clone(),
                source,
            })?;
            index.insert(
                frame_id,
                tilt,
                TargetSample {
                    source_path: record.source_path.clone(),
                    x: record.x,
                    y: record.y,
                    label: record.label.clone(),
                },
            );
        }
    }
    info!(
        target: "sphcrop",
        event = "frame_index_built",
        frames = index.frame_count(),
        samples = index.total_samples(),
        "Total {} samples",
        index.total_samples()
    );
    Ok(index)
}
