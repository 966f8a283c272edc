#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod error;
pub mod extract;
pub mod metrics;
pub mod partition;
pub mod pipeline;
pub mod reorganize;
pub mod types;
pub mod writer;

pub use error::CropError;
pub use pipeline::{CropConfig, CropPipeline, FailedBucket, SplitReport};
