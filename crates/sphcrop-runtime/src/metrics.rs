use sphcrop_observe::metrics::{Counter, Timing};

#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    pub buckets_claimed: Counter,
    pub buckets_skipped_completed: Counter,
    pub buckets_skipped_locked: Counter,
    pub buckets_failed: Counter,
    pub frames_loaded: Counter,
    pub samples_cropped: Counter,
    pub shards_written: Counter,
    pub frame_load: Timing,
    pub shard_write: Timing,
}
