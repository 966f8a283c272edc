use std::collections::BTreeMap;

use sphcrop_store::shard::write_shard;
use sphcrop_store::{BucketLock, LockRelease};
use tracing::{debug, error, info, warn};

use crate::error::CropError;
use crate::extract::ExtractOutcome;
use crate::metrics::RuntimeMetrics;
use crate::partition::ClaimedBucket;
use crate::pipeline::FailedBucket;

#[derive(Debug, Default)]
pub struct WriteOutcome {
    pub written: Vec<u32>,
    /// Tilts whose shard appeared while this process was cropping.
    pub skipped_completed: Vec<u32>,
    pub failed: Vec<FailedBucket>,
}

/// Removes a lock marker. Never fails the run: a leftover marker next to a
/// finished shard is ignored by every later claim.
pub fn release_lock(tilt: u32, lock: BucketLock) {
    let path = lock.path().to_path_buf();
    match lock.release() {
        LockRelease::Removed => {
            debug!(
                target: "sphcrop",
                event = "lock_released",
                tilt,
                lock = %path.display(),
                "lock removed"
            );
        }
        LockRelease::AlreadyGone => {}
        LockRelease::Failed(err) => {
            warn!(
                target: "sphcrop",
                event = "lock_release_failed",
                tilt,
                lock = %path.display(),
                error = %err,
                "could not remove lock"
            );
        }
    }
}

/// Writes one shard per claimed tilt and releases its lock.
///
/// Tilts that failed during extraction are not written; their locks are
/// released so a rerun can pick them up.
pub fn write_shards(
    claimed: BTreeMap<u32, ClaimedBucket>,
    mut extracted: ExtractOutcome,
    metrics: &RuntimeMetrics,
) -> Result<WriteOutcome, CropError> {
    let mut outcome = WriteOutcome::default();
    for (tilt, bucket) in claimed {
        if let Some(err) = extracted.failed.remove(&tilt) {
            error!(
                target: "sphcrop",
                event = "bucket_failed",
                tilt,
                error = %err,
                "bucket not written"
            );
            metrics.buckets_failed.inc();
            release_lock(tilt, bucket.lock);
            outcome.failed.push(FailedBucket { tilt, error: err });
            continue;
        }

        if bucket.paths.shard.is_file() {
            info!(
                target: "sphcrop",
                event = "bucket_skipped",
                tilt,
                reason = "completed",
                shard = %bucket.paths.shard.display(),
                "shard appeared during the run"
            );
            metrics.buckets_skipped_completed.inc();
            release_lock(tilt, bucket.lock);
            outcome.skipped_completed.push(tilt);
            continue;
        }

        let buffer = extracted
            .buffers
            .remove(&tilt)
            .ok_or_else(|| CropError::InconsistentShard {
                tilt,
                reason: "no rows were collected for a claimed tilt".to_string(),
            })?;
        let cols = buffer.into_columns()?;
        {
            let _timer = metrics.shard_write.start();
            write_shard(&bucket.paths.shard, &cols)?;
        }
        metrics.shards_written.inc();
        info!(
            target: "sphcrop",
            event = "shard_written",
            tilt,
            rows = cols.rows(),
            shard = %bucket.paths.shard.display(),
            "wrote shard"
        );
        release_lock(tilt, bucket.lock);
        outcome.written.push(tilt);
    }
    Ok(outcome)
}
