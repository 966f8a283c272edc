use std::path::{Path, PathBuf};

use crate::{BucketPaths, StoreError};

/// Bucket life cycle as observed through its artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketState {
    /// Neither shard nor lock exists.
    Pending,
    /// A worker claimed the bucket and has not finished (or crashed).
    Locked,
    /// The shard exists; any leftover lock is ignored.
    Completed,
}

impl BucketState {
    pub fn as_str(self) -> &'static str {
        match self {
            BucketState::Pending => "pending",
            BucketState::Locked => "locked",
            BucketState::Completed => "completed",
        }
    }
}

pub fn bucket_state(paths: &BucketPaths) -> BucketState {
    if paths.shard.is_file() {
        BucketState::Completed
    } else if paths.lock.is_file() {
        BucketState::Locked
    } else {
        BucketState::Pending
    }
}

/// Proof that this process created the bucket's lock marker.
///
/// Dropping it does NOT remove the marker: a worker that dies mid-bucket must
/// leave the lock behind, and recovery is a manual `rm`.
#[derive(Debug)]
#[must_use = "a claimed bucket must be processed or released"]
pub struct BucketLock {
    path: PathBuf,
}

#[derive(Debug)]
pub enum Claim {
    Claimed(BucketLock),
    Completed,
    Locked,
}

#[derive(Debug)]
pub enum LockRelease {
    Removed,
    AlreadyGone,
    Failed(std::io::Error),
}

impl BucketLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the marker. Failures are reported, never raised: the marker is
    /// advisory and the finished shard alone decides completion.
    pub fn release(self) -> LockRelease {
        match std::fs::remove_file(&self.path) {
            Ok(()) => LockRelease::Removed,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => LockRelease::AlreadyGone,
            Err(err) => LockRelease::Failed(err),
        }
    }
}

/// Claims a bucket by creating its zero-byte lock marker.
///
/// This is a plain check-then-create, not `create_new`: two workers racing on
/// the same bucket may both claim it. Workers with a consistent `n_process`
/// never share a bucket, so the race only matters for overlapping reruns.
pub fn try_claim_bucket(paths: &BucketPaths) -> Result<Claim, StoreError> {
    match bucket_state(paths) {
        BucketState::Completed => return Ok(Claim::Completed),
        BucketState::Locked => return Ok(Claim::Locked),
        BucketState::Pending => {}
    }

    if let Some(parent) = paths.lock.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::File::create(&paths.lock)?;
    Ok(Claim::Claimed(BucketLock {
        path: paths.lock.clone(),
    }))
}
