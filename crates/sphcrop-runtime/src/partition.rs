use std::collections::BTreeMap;

use sphcrop_core::types::{BucketKey, Layer, Network, Split};
use sphcrop_store::{
    bucket_state, try_claim_bucket, BucketLock, BucketPaths, BucketState, Claim, DataLayout,
};
use tracing::info;

use crate::error::CropError;
use crate::metrics::RuntimeMetrics;

/// Tilts owned by `process` under modulo striping: `process, process + n, ...` below `sphere_h`.
pub fn tilts_for_process(
    process: u32,
    n_process: u32,
    sphere_h: u32,
) -> Result<Vec<u32>, CropError> {
    if n_process == 0 {
        return Err(CropError::Config("n_process must be > 0".to_string()));
    }
    if process >= n_process {
        return Err(CropError::Config(format!(
            "process {process} is outside [0, {n_process})"
        )));
    }
    Ok((process..sphere_h).step_by(n_process as usize).collect())
}

/// A bucket this process created the lock for.
#[derive(Debug)]
pub struct ClaimedBucket {
    pub key: BucketKey,
    pub paths: BucketPaths,
    pub lock: BucketLock,
}

#[derive(Debug, Default)]
pub struct WorkSet {
    pub claimed: BTreeMap<u32, ClaimedBucket>,
    pub skipped_completed: Vec<u32>,
    pub skipped_locked: Vec<u32>,
}

/// Everything that selects one layer's bucket directory.
#[derive(Debug, Clone, Copy)]
pub struct BucketScope {
    pub sphere_h: u32,
    pub ks: u32,
    pub network: Network,
    pub layer: Layer,
    pub split: Split,
}

impl BucketScope {
    pub fn key(&self, tilt: u32) -> BucketKey {
        BucketKey {
            sphere_h: self.sphere_h,
            ks: self.ks,
            network: self.network,
            layer: self.layer,
            tilt,
            split: self.split,
        }
    }
}

/// Walks this process's tilts, skipping finished and locked buckets and
/// locking the rest.
pub fn claim_work(
    layout: &DataLayout,
    scope: BucketScope,
    process: u32,
    n_process: u32,
    metrics: &RuntimeMetrics,
) -> Result<WorkSet, CropError> {
    let mut work = WorkSet::default();
    for tilt in tilts_for_process(process, n_process, scope.sphere_h)? {
        let key = scope.key(tilt);
        let paths = layout.bucket(&key);
        match try_claim_bucket(&paths)? {
            Claim::Completed => {
                info!(
                    target: "sphcrop",
                    event = "bucket_skipped",
                    tilt,
                    reason = "completed",
                    shard = %paths.shard.display(),
                    "shard exists"
                );
                metrics.buckets_skipped_completed.inc();
                work.skipped_completed.push(tilt);
            }
            Claim::Locked => {
                info!(
                    target: "sphcrop",
                    event = "bucket_skipped",
                    tilt,
                    reason = "locked",
                    lock = %paths.lock.display(),
                    "bucket is being generated by another process"
                );
                metrics.buckets_skipped_locked.inc();
                work.skipped_locked.push(tilt);
            }
            Claim::Claimed(lock) => {
                info!(
                    target: "sphcrop",
                    event = "bucket_claimed",
                    tilt,
                    lock = %lock.path().display(),
                    "claimed bucket"
                );
                metrics.buckets_claimed.inc();
                work.claimed.insert(tilt, ClaimedBucket { key, paths, lock });
            }
        }
    }
    Ok(work)
}

/// Observed state of every tilt in `[0, sphere_h)`. Read-only.
pub fn survey_buckets(layout: &DataLayout, scope: BucketScope) -> Vec<(u32, BucketState)> {
    (0..scope.sphere_h)
        .map(|tilt| (tilt, bucket_state(&layout.bucket(&scope.key(tilt)))))
        .collect()
}
