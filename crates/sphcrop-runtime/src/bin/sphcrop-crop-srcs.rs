#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use sphcrop_core::types::{Layer, Network, Split};
use sphcrop_geometry::GeometryTable;
use sphcrop_observe::logging::init_tracing_with_log_file;
use sphcrop_runtime::{CropConfig, CropPipeline};
use sphcrop_store::{process_log_path, DataLayout};

/// Crops per-tilt source patches for one worker of a `(network, layer)` job.
#[derive(Debug, Parser)]
#[command(name = "sphcrop-crop-srcs")]
struct Args {
    /// Target layer, e.g. `1_2` or `conv3_3`.
    layer: Layer,

    /// This worker's index in `[0, n_process)`.
    process: u32,

    #[arg(long, env = "SPHCROP_NETWORK", default_value = "faster-rcnn")]
    network: Network,

    #[arg(long = "sphereH", env = "SPHCROP_SPHERE_H", default_value_t = 320)]
    sphere_h: u32,

    #[arg(long, env = "SPHCROP_KS", default_value_t = 640)]
    ks: u32,

    #[arg(long = "n_process", env = "SPHCROP_N_PROCESS", default_value_t = 16)]
    n_process: u32,

    #[arg(long, env = "SPHCROP_DATA_ROOT")]
    data_root: PathBuf,

    /// Defaults to `<data-root>/Geometry/SphereH{H}Ks{ks}.tsv`.
    #[arg(long, env = "SPHCROP_GEOMETRY")]
    geometry: Option<PathBuf>,

    /// Defaults to `<data-root>/Log/crop_srcs`.
    #[arg(long, env = "SPHCROP_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let layout = DataLayout::new(&args.data_root);

    let log_dir = args
        .log_dir
        .clone()
        .unwrap_or_else(|| layout.default_log_dir());
    let log_path = process_log_path(
        &log_dir,
        args.sphere_h,
        args.network,
        args.layer,
        args.process,
    );
    init_tracing_with_log_file(&log_path)
        .with_context(|| format!("open log file {}", log_path.display()))?;

    let geometry_path = args
        .geometry
        .clone()
        .unwrap_or_else(|| layout.geometry_path(args.sphere_h, args.ks));
    let geometry = GeometryTable::load(&geometry_path)?;

    let cfg = CropConfig {
        layout,
        network: args.network,
        layer: args.layer,
        sphere_h: args.sphere_h,
        ks: args.ks,
        process: args.process,
        n_process: args.n_process,
    };
    let pipeline = CropPipeline::open(cfg, Box::new(geometry))?;

    let mut failed = Vec::new();
    for split in Split::RUN_ORDER {
        let report = pipeline.run_split(split)?;
        println!("{}", pipeline.finish_message(split));
        failed.extend(
            report
                .failed
                .iter()
                .map(|f| format!("{}:tilt{:03}: {}", report.split, f.tilt, f.error)),
        );
    }

    if !failed.is_empty() {
        anyhow::bail!(
            "{} bucket(s) failed and were left pending:\n  {}",
            failed.len(),
            failed.join("\n  ")
        );
    }
    Ok(())
}
