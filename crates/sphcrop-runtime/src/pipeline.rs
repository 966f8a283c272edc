use std::collections::BTreeMap;
use std::path::PathBuf;

use sphcrop_core::types::{AnnotationRecord, Layer, Network, Split};
use sphcrop_geometry::Geometry;
use sphcrop_store::annotations::load_annotations;
use sphcrop_store::frames::{FrameSource, NpyFrameStore};
use sphcrop_store::DataLayout;
use tracing::{error, info};

use crate::error::CropError;
use crate::extract::{extract_all, CropPlan};
use crate::metrics::RuntimeMetrics;
use crate::partition::{claim_work, tilts_for_process, BucketScope, ClaimedBucket};
use crate::reorganize::build_frame_index;
use crate::writer::{release_lock, write_shards};

/// One worker's slice of a `(network, layer, sphereH, ks)` job.
#[derive(Debug, Clone)]
pub struct CropConfig {
    pub layout: DataLayout,
    pub network: Network,
    pub layer: Layer,
    pub sphere_h: u32,
    pub ks: u32,
    pub process: u32,
    pub n_process: u32,
}

impl CropConfig {
    pub fn validate(&self) -> Result<(), CropError> {
        if self.n_process == 0 {
            return Err(CropError::Config("n_process must be > 0".to_string()));
        }
        if self.process >= self.n_process {
            return Err(CropError::Config(format!(
                "process {} is outside [0, {})",
                self.process, self.n_process
            )));
        }
        if self.sphere_h == 0 || self.ks == 0 {
            return Err(CropError::Config(
                "sphereH and ks must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn source_dir(&self) -> PathBuf {
        self.layout
            .source_dir(self.sphere_h, self.ks, self.network, self.layer)
    }

    pub fn scope(&self, split: Split) -> BucketScope {
        BucketScope {
            sphere_h: self.sphere_h,
            ks: self.ks,
            network: self.network,
            layer: self.layer,
            split,
        }
    }
}

/// A claimed bucket that produced no shard.
#[derive(Debug)]
pub struct FailedBucket {
    pub tilt: u32,
    pub error: CropError,
}

/// What one split did to each of this process's tilts.
#[derive(Debug)]
pub struct SplitReport {
    pub split: Split,
    pub claimed: Vec<u32>,
    pub written: Vec<u32>,
    pub skipped_completed: Vec<u32>,
    pub skipped_locked: Vec<u32>,
    pub failed: Vec<FailedBucket>,
}

impl SplitReport {
    fn empty(split: Split) -> Self {
        Self {
            split,
            claimed: Vec::new(),
            written: Vec::new(),
            skipped_completed: Vec::new(),
            skipped_locked: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct CropPipeline {
    cfg: CropConfig,
    plan: CropPlan,
    frames: Box<dyn FrameSource>,
    metrics: RuntimeMetrics,
}

impl CropPipeline {
    /// Reads frames from the layer's source directory, which must exist.
    pub fn open(cfg: CropConfig, geometry: Box<dyn Geometry>) -> Result<Self, CropError> {
        let source_dir = cfg.source_dir();
        if !source_dir.is_dir() {
            return Err(CropError::SourceDirMissing(source_dir));
        }
        let frames = Box::new(NpyFrameStore::new(source_dir));
        Self::with_frames(cfg, geometry, frames)
    }

    /// Resolves stride and crop geometry for every tilt this process owns, so a
    /// wrong or incomplete geometry table fails before any bucket is locked.
    pub fn with_frames(
        cfg: CropConfig,
        geometry: Box<dyn Geometry>,
        frames: Box<dyn FrameSource>,
    ) -> Result<Self, CropError> {
        cfg.validate()?;
        let plan = crop_plan(&cfg, geometry.as_ref())?;
        Ok(Self {
            cfg,
            plan,
            frames,
            metrics: RuntimeMetrics::default(),
        })
    }

    pub fn config(&self) -> &CropConfig {
        &self.cfg
    }

    pub fn metrics(&self) -> &RuntimeMetrics {
        &self.metrics
    }

    /// Line announcing that this process is done with `split`.
    pub fn finish_message(&self, split: Split) -> String {
        format!(
            "Process {}/{} ({split}) finish.",
            self.cfg.process, self.cfg.n_process
        )
    }

    /// Runs every split in [`Split::RUN_ORDER`]. Stops at the first fatal error.
    pub fn run_all(&self) -> Result<Vec<SplitReport>, CropError> {
        Split::RUN_ORDER
            .iter()
            .map(|&split| self.run_split(split))
            .collect()
    }

    /// Claim, load, reorganize, crop and write this process's buckets of `split`.
    ///
    /// Buckets with a missing input end up in [`SplitReport::failed`] with their
    /// lock removed. Any other error aborts and leaves the remaining locks behind.
    pub fn run_split(&self, split: Split) -> Result<SplitReport, CropError> {
        let cfg = &self.cfg;
        info!(
            target: "sphcrop",
            event = "split_start",
            network = %cfg.network,
            layer = %cfg.layer,
            sphere_h = cfg.sphere_h,
            ks = cfg.ks,
            process = cfg.process,
            n_process = cfg.n_process,
            split = %split,
            "start"
        );

        let work = claim_work(
            &cfg.layout,
            cfg.scope(split),
            cfg.process,
            cfg.n_process,
            &self.metrics,
        )?;
        let mut report = SplitReport::empty(split);
        report.claimed = work.claimed.keys().copied().collect();
        report.skipped_completed = work.skipped_completed;
        report.skipped_locked = work.skipped_locked;

        if work.claimed.is_empty() {
            info!(
                target: "sphcrop",
                event = "split_no_work",
                split = %split,
                "no bucket left for this process"
            );
        } else {
            let (claimed, annotations) = self.load_claimed(work.claimed, &mut report)?;
            let index = build_frame_index(&annotations)?;
            let plan = self.plan.for_tilts(claimed.keys());
            let extracted = extract_all(&index, self.frames.as_ref(), &plan, &self.metrics)?;
            let written = write_shards(claimed, extracted, &self.metrics)?;
            report.written = written.written;
            report.skipped_completed.extend(written.skipped_completed);
            report.failed.extend(written.failed);
        }

        info!(
            target: "sphcrop",
            event = "split_finish",
            split = %split,
            claimed = report.claimed.len(),
            written = report.written.len(),
            skipped_completed = report.skipped_completed.len(),
            skipped_locked = report.skipped_locked.len(),
            failed = report.failed.len(),
            frames_loaded = self.metrics.frames_loaded.get(),
            frame_load_avg_ms = self.metrics.frame_load.mean().as_millis() as u64,
            "{}",
            self.finish_message(split)
        );
        Ok(report)
    }

    /// Loads the annotation file of every claimed bucket. Buckets whose file is
    /// absent are unlocked, reported as failed and dropped from the work set.
    fn load_claimed(
        &self,
        claimed: BTreeMap<u32, ClaimedBucket>,
        report: &mut SplitReport,
    ) -> Result<
        (
            BTreeMap<u32, ClaimedBucket>,
            BTreeMap<u32, Vec<AnnotationRecord>>,
        ),
        CropError,
    > {
        let mut kept = BTreeMap::new();
        let mut annotations = BTreeMap::new();
        for (tilt, bucket) in claimed {
            match load_annotations(&bucket.paths.annotation).map_err(CropError::from_store) {
                Ok(records) => {
                    annotations.insert(tilt, records);
                    kept.insert(tilt, bucket);
                }
                Err(err) if err.is_missing_input() => {
                    error!(
                        target: "sphcrop",
                        event = "annotation_missing",
                        tilt,
                        path = %bucket.paths.annotation.display(),
                        "annotation file missing; bucket not processed"
                    );
                    self.metrics.buckets_failed.inc();
                    release_lock(tilt, bucket.lock);
                    report.failed.push(FailedBucket { tilt, error: err });
                }
                Err(err) => return Err(err),
            }
        }
        Ok((kept, annotations))
    }
}

/// Stride once, crop geometry for each of this process's tilts.
fn crop_plan(cfg: &CropConfig, geometry: &dyn Geometry) -> Result<CropPlan, CropError> {
    let stride = geometry.stride(cfg.layer, cfg.sphere_h, cfg.ks)?;
    let mut geometries = BTreeMap::new();
    for tilt in tilts_for_process(cfg.process, cfg.n_process, cfg.sphere_h)? {
        geometries.insert(tilt, geometry.crop_geometry(cfg.layer, tilt, cfg.sphere_h)?);
    }
    Ok(CropPlan {
        layer: cfg.layer,
        stride,
        geometries,
    })
}
