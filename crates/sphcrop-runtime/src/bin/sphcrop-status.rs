#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use sphcrop_core::types::{Layer, Network, Split};
use sphcrop_runtime::partition::{survey_buckets, BucketScope};
use sphcrop_store::{BucketState, DataLayout};

/// Prints the state of every tilt bucket of one `(network, layer, split)`.
///
/// Read-only. `locked` buckets with no live worker are stale locks left by a
/// crashed run; delete the `.npz.lock` file to make them pending again.
#[derive(Debug, Parser)]
#[command(name = "sphcrop-status")]
struct Args {
    layer: Layer,

    #[arg(long, env = "SPHCROP_NETWORK", default_value = "faster-rcnn")]
    network: Network,

    #[arg(long = "sphereH", env = "SPHCROP_SPHERE_H", default_value_t = 320)]
    sphere_h: u32,

    #[arg(long, env = "SPHCROP_KS", default_value_t = 640)]
    ks: u32,

    /// Omit to report both splits.
    #[arg(long)]
    split: Option<Split>,

    #[arg(long, env = "SPHCROP_DATA_ROOT")]
    data_root: PathBuf,

    /// Only print buckets in this state.
    #[arg(long)]
    only: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let layout = DataLayout::new(&args.data_root);
    let splits = match args.split {
        Some(split) => vec![split],
        None => Split::RUN_ORDER.to_vec(),
    };

    for split in splits {
        let scope = BucketScope {
            sphere_h: args.sphere_h,
            ks: args.ks,
            network: args.network,
            layer: args.layer,
            split,
        };
        let states = survey_buckets(&layout, scope);

        let mut pending = 0usize;
        let mut locked = 0usize;
        let mut completed = 0usize;
        for (tilt, state) in &states {
            match state {
                BucketState::Pending => pending += 1,
                BucketState::Locked => locked += 1,
                BucketState::Completed => completed += 1,
            }
            let shown = args
                .only
                .as_deref()
                .map_or(true, |only| only == state.as_str());
            if shown {
                println!("{split}\ttilt{tilt:03}\t{}", state.as_str());
            }
        }
        println!(
            "{split}\ttotal={}\tcompleted={completed}\tlocked={locked}\tpending={pending}",
            states.len()
        );
    }
    Ok(())
}
