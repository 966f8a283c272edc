use std::path::{Path, PathBuf};

use anyhow::Result;
use ndarray::{s, Array3};

use sphcrop_core::annotation::encode_annotation_tsv;
use sphcrop_core::types::{AnnotationRecord, BucketKey, Layer, Network, Size2, Split};
use sphcrop_geometry::{crop_image, subsample, CropGeometry, GeometryError, GeometryTable};
use sphcrop_runtime::{CropConfig, CropError, CropPipeline};
use sphcrop_store::shard::read_shard;
use sphcrop_store::{BucketPaths, DataLayout};

const SPHERE_H: u32 = 4;
const KS: u32 = 8;
const LAYER: Layer = Layer::Conv1_2;
const NETWORK: Network = Network::Vgg16;

fn temp_root(test_name: &str) -> Result<PathBuf> {
    let ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_millis();
    let mut root = std::env::temp_dir();
    root.push(format!(
        "sphcrop-runtime-{test_name}-{}-{ms}",
        std::process::id()
    ));
    std::fs::create_dir_all(&root)?;
    Ok(root)
}

fn frame(seed: f32) -> Array3<f32> {
    Array3::from_shape_fn((8, 16, 3), |(y, x, c)| {
        seed * 10_000.0 + (y * 100 + x * 10 + c) as f32
    })
}

fn record(frame: &str, x: i64, y: i64) -> AnnotationRecord {
    AnnotationRecord {
        source_path: format!("/videos/clip/{frame}.jpg"),
        x,
        y,
        label: vec![x as f32, y as f32],
    }
}

/// Stride-2 layer: every tilt crops a 4x4 window down to 2x2.
fn geometry() -> GeometryTable {
    let crop = CropGeometry {
        crop_in: Size2 { w: 4, h: 4 },
        crop_out: Size2 { w: 2, h: 2 },
    };
    (0..SPHERE_H).fold(
        GeometryTable::new(SPHERE_H, KS).with_stride(LAYER, 2),
        |table, tilt| table.with_crop(LAYER, tilt, crop),
    )
}

struct Fixture {
    layout: DataLayout,
}

impl Fixture {
    fn new(test_name: &str) -> Result<Self> {
        let layout = DataLayout::new(temp_root(test_name)?);
        let source_dir = layout.source_dir(SPHERE_H, KS, NETWORK, LAYER);
        std::fs::create_dir_all(&source_dir)?;
        ndarray_npy::write_npy(source_dir.join("A.npy"), &frame(1.0))?;
        ndarray_npy::write_npy(source_dir.join("B.npy"), &frame(2.0))?;
        Ok(Self { layout })
    }

    fn paths(&self, tilt: u32, split: Split) -> BucketPaths {
        self.layout.bucket(&BucketKey {
            sphere_h: SPHERE_H,
            ks: KS,
            network: NETWORK,
            layer: LAYER,
            tilt,
            split,
        })
    }

    fn annotate(&self, tilt: u32, split: Split, records: &[AnnotationRecord]) -> Result<()> {
        let path = self.paths(tilt, split).annotation;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, encode_annotation_tsv(records))?;
        Ok(())
    }

    /// Tilt 0 carries a duplicate, tilt 2 has no samples.
    fn annotate_all(&self, split: Split) -> Result<()> {
        self.annotate(
            0,
            split,
            &[record("A", 1, 0), record("B", 3, 0), record("A", 1, 0)],
        )?;
        self.annotate(1, split, &[record("A", 5, 1)])?;
        self.annotate(2, split, &[])?;
        self.annotate(3, split, &[record("B", 15, 3), record("A", 0, 3)])?;
        Ok(())
    }

    fn pipeline(&self, process: u32, n_process: u32) -> Result<CropPipeline> {
        let cfg = CropConfig {
            layout: self.layout.clone(),
            network: NETWORK,
            layer: LAYER,
            sphere_h: SPHERE_H,
            ks: KS,
            process,
            n_process,
        };
        Ok(CropPipeline::open(cfg, Box::new(geometry()))?)
    }
}

fn shard_file(path: &Path) -> Result<Vec<u8>> {
    Ok(std::fs::read(path)?)
}

#[test]
fn every_tilt_gets_a_complete_shard() -> Result<()> {
    let fx = Fixture::new("end-to-end")?;
    fx.annotate_all(Split::Test)?;

    let report = fx.pipeline(0, 1)?.run_split(Split::Test)?;
    assert_eq!(report.claimed, vec![0, 1, 2, 3]);
    assert_eq!(report.written, vec![0, 1, 2, 3]);
    assert!(report.is_success());

    for tilt in 0..SPHERE_H {
        let paths = fx.paths(tilt, Split::Test);
        assert!(paths.shard.is_file(), "tilt {tilt} shard missing");
        assert!(!paths.lock.exists(), "tilt {tilt} lock left behind");
    }

    let tilt0 = read_shard(&fx.paths(0, Split::Test).shard)?;
    assert_eq!(tilt0.rows(), 3, "duplicates are kept");
    assert_eq!(tilt0.srcs.dim(), (3, 2, 2, 3));
    assert_eq!(tilt0.target.dim(), (3, 2));
    assert!(tilt0.y.iter().all(|y| *y == 0));

    // A is loaded before B, so A's two rows come first
    assert_eq!(tilt0.x.to_vec(), vec![1, 1, 3]);
    assert_eq!(
        tilt0.path,
        vec![
            "/videos/clip/A.jpg".to_string(),
            "/videos/clip/A.jpg".to_string(),
            "/videos/clip/B.jpg".to_string(),
        ]
    );

    let a = frame(1.0);
    let expected = subsample(crop_image(a.view(), 1, 0, Size2 { w: 4, h: 4 }), 2);
    assert_eq!(tilt0.srcs.slice(s![0, .., .., ..]), expected);
    // row 0 of the crop sits above the frame, column 0 wraps to x=15
    assert!(expected.slice(s![0, .., ..]).iter().all(|v| *v == 0.0));
    assert_eq!(expected[[1, 0, 2]], a[[0, 15, 2]]);

    let empty = read_shard(&fx.paths(2, Split::Test).shard)?;
    assert_eq!(empty.rows(), 0);
    assert_eq!(empty.srcs.dim(), (0, 2, 2, 0));
    Ok(())
}

#[test]
fn frames_are_loaded_once_per_run() -> Result<()> {
    let fx = Fixture::new("frame-dedup")?;
    fx.annotate_all(Split::Test)?;

    let pipeline = fx.pipeline(0, 1)?;
    pipeline.run_split(Split::Test)?;
    assert_eq!(pipeline.metrics().frames_loaded.get(), 2);
    assert_eq!(pipeline.metrics().samples_cropped.get(), 6);
    assert_eq!(pipeline.metrics().shards_written.get(), 4);
    Ok(())
}

#[test]
fn rerun_after_completion_is_a_noop() -> Result<()> {
    let fx = Fixture::new("idempotent")?;
    fx.annotate_all(Split::Test)?;

    fx.pipeline(0, 1)?.run_split(Split::Test)?;
    let before = shard_file(&fx.paths(0, Split::Test).shard)?;

    let report = fx.pipeline(0, 1)?.run_split(Split::Test)?;
    assert!(report.claimed.is_empty());
    assert!(report.written.is_empty());
    assert_eq!(report.skipped_completed, vec![0, 1, 2, 3]);
    assert_eq!(shard_file(&fx.paths(0, Split::Test).shard)?, before);
    for tilt in 0..SPHERE_H {
        assert!(!fx.paths(tilt, Split::Test).lock.exists());
    }
    Ok(())
}

#[test]
fn stale_lock_blocks_until_removed() -> Result<()> {
    let fx = Fixture::new("stale-lock")?;
    fx.annotate_all(Split::Test)?;

    // a crashed worker left this behind
    let stale = fx.paths(1, Split::Test);
    std::fs::write(&stale.lock, b"")?;

    let report = fx.pipeline(0, 1)?.run_split(Split::Test)?;
    assert_eq!(report.skipped_locked, vec![1]);
    assert_eq!(report.written, vec![0, 2, 3]);
    assert!(!stale.shard.exists());
    assert!(stale.lock.exists());

    std::fs::remove_file(&stale.lock)?;
    let report = fx.pipeline(0, 1)?.run_split(Split::Test)?;
    assert_eq!(report.claimed, vec![1]);
    assert_eq!(report.written, vec![1]);
    assert_eq!(report.skipped_completed, vec![0, 2, 3]);
    assert_eq!(read_shard(&stale.shard)?.rows(), 1);
    Ok(())
}

#[test]
fn missing_annotation_fails_only_its_bucket() -> Result<()> {
    let fx = Fixture::new("missing-annotation")?;
    fx.annotate(0, Split::Test, &[record("A", 1, 0)])?;
    fx.annotate(1, Split::Test, &[record("B", 2, 1)])?;
    fx.annotate(3, Split::Test, &[])?;

    let report = fx.pipeline(0, 1)?.run_split(Split::Test)?;
    assert_eq!(report.written, vec![0, 1, 3]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].tilt, 2);
    assert!(matches!(report.failed[0].error, CropError::MissingInput(_)));
    assert!(!report.is_success());

    let missing = fx.paths(2, Split::Test);
    assert!(!missing.shard.exists());
    assert!(!missing.lock.exists(), "failed bucket must be claimable again");
    Ok(())
}

#[test]
fn missing_frame_fails_the_tilts_that_reference_it() -> Result<()> {
    let fx = Fixture::new("missing-frame")?;
    fx.annotate(0, Split::Test, &[record("A", 1, 0)])?;
    fx.annotate(1, Split::Test, &[record("A", 1, 1), record("Gone", 1, 1)])?;
    fx.annotate(2, Split::Test, &[record("B", 1, 2)])?;
    fx.annotate(3, Split::Test, &[])?;

    let report = fx.pipeline(0, 1)?.run_split(Split::Test)?;
    assert_eq!(report.written, vec![0, 2, 3]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].tilt, 1);
    let broken = fx.paths(1, Split::Test);
    assert!(!broken.shard.exists());
    assert!(!broken.lock.exists());
    Ok(())
}

#[test]
fn record_in_the_wrong_bucket_aborts_the_run() -> Result<()> {
    let fx = Fixture::new("consistency")?;
    fx.annotate_all(Split::Test)?;
    fx.annotate(2, Split::Test, &[record("A", 1, 3)])?;

    match fx.pipeline(0, 1)?.run_split(Split::Test) {
        Err(CropError::DataConsistency { tilt, y, .. }) => assert_eq!((tilt, y), (2, 3)),
        other => panic!("expected DataConsistency, got {other:?}"),
    }
    // nothing was written and the claimed buckets stay locked
    for tilt in 0..SPHERE_H {
        let paths = fx.paths(tilt, Split::Test);
        assert!(!paths.shard.exists());
        assert!(paths.lock.exists());
    }
    Ok(())
}

#[test]
fn workers_split_tilts_without_overlap() -> Result<()> {
    let fx = Fixture::new("two-workers")?;
    fx.annotate_all(Split::Train)?;

    let first = fx.pipeline(0, 2)?.run_split(Split::Train)?;
    let second = fx.pipeline(1, 2)?.run_split(Split::Train)?;
    assert_eq!(first.written, vec![0, 2]);
    assert_eq!(second.written, vec![1, 3]);

    let rows: usize = (0..SPHERE_H)
        .map(|tilt| read_shard(&fx.paths(tilt, Split::Train).shard).map(|s| s.rows()))
        .sum::<Result<usize, _>>()?;
    assert_eq!(rows, 6);
    Ok(())
}

#[test]
fn run_all_does_test_then_train() -> Result<()> {
    let fx = Fixture::new("both-splits")?;
    fx.annotate_all(Split::Test)?;
    fx.annotate_all(Split::Train)?;

    let reports = fx.pipeline(0, 1)?.run_all()?;
    let splits: Vec<Split> = reports.iter().map(|r| r.split).collect();
    assert_eq!(splits, vec![Split::Test, Split::Train]);
    assert!(reports.iter().all(|r| r.written.len() == 4));
    Ok(())
}

#[test]
fn missing_source_dir_is_fatal_before_claiming() -> Result<()> {
    let root = temp_root("no-source")?;
    let cfg = CropConfig {
        layout: DataLayout::new(&root),
        network: NETWORK,
        layer: LAYER,
        sphere_h: SPHERE_H,
        ks: KS,
        process: 0,
        n_process: 1,
    };
    assert!(matches!(
        CropPipeline::open(cfg, Box::new(geometry())),
        Err(CropError::SourceDirMissing(_))
    ));
    assert!(!root.join("TargetSphereH4Ks8").exists());
    Ok(())
}

#[test]
fn geometry_for_another_configuration_fails_before_locking() -> Result<()> {
    let fx = Fixture::new("geometry-mismatch")?;
    fx.annotate_all(Split::Test)?;

    let cfg = CropConfig {
        layout: fx.layout.clone(),
        network: NETWORK,
        layer: LAYER,
        sphere_h: SPHERE_H,
        ks: KS,
        process: 0,
        n_process: 1,
    };
    match CropPipeline::open(cfg, Box::new(GeometryTable::new(320, 640))) {
        Err(CropError::Geometry(GeometryError::TableMismatch {
            have_sphere_h,
            sphere_h,
            ..
        })) => assert_eq!((have_sphere_h, sphere_h), (320, SPHERE_H)),
        Err(other) => panic!("expected TableMismatch, got {other:?}"),
        Ok(_) => panic!("expected TableMismatch"),
    }
    for tilt in 0..SPHERE_H {
        assert!(!fx.paths(tilt, Split::Test).lock.exists(), "tilt {tilt} was locked");
    }
    Ok(())
}
