use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseNameError {
    #[error("unknown layer {0:?} (expected one of 1_1..5_3)")]
    Layer(String),
    #[error("unknown network {0:?} (expected: vgg16|faster-rcnn)")]
    Network(String),
    #[error("unknown split {0:?} (expected: test|train)")]
    Split(String),
}

/// Backbone whose activations the targets were computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Vgg16,
    FasterRcnn,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Vgg16 => "vgg16",
            Network::FasterRcnn => "faster-rcnn",
        }
    }
}

impl FromStr for Network {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vgg16" => Ok(Network::Vgg16),
            "faster-rcnn" | "faster_rcnn" | "fasterrcnn" => Ok(Network::FasterRcnn),
            _ => Err(ParseNameError::Network(s.to_string())),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dataset partition. A worker invocation runs `Test` first, then `Train`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Split {
    Test,
    Train,
}

impl Split {
    pub const RUN_ORDER: [Split; 2] = [Split::Test, Split::Train];

    pub fn as_str(self) -> &'static str {
        match self {
            Split::Test => "test",
            Split::Train => "train",
        }
    }
}

impl FromStr for Split {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(Split::Test),
            "train" => Ok(Split::Train),
            _ => Err(ParseNameError::Split(s.to_string())),
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convolution layers of the VGG16 stack that have their own target buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Layer {
    Conv1_1,
    Conv1_2,
    Conv2_1,
    Conv2_2,
    Conv3_1,
    Conv3_2,
    Conv3_3,
    Conv4_1,
    Conv4_2,
    Conv4_3,
    Conv5_1,
    Conv5_2,
    Conv5_3,
}

impl Layer {
    pub const ALL: [Layer; 13] = [
        Layer::Conv1_1,
        Layer::Conv1_2,
        Layer::Conv2_1,
        Layer::Conv2_2,
        Layer::Conv3_1,
        Layer::Conv3_2,
        Layer::Conv3_3,
        Layer::Conv4_1,
        Layer::Conv4_2,
        Layer::Conv4_3,
        Layer::Conv5_1,
        Layer::Conv5_2,
        Layer::Conv5_3,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Conv1_1 => "1_1",
            Layer::Conv1_2 => "1_2",
            Layer::Conv2_1 => "2_1",
            Layer::Conv2_2 => "2_2",
            Layer::Conv3_1 => "3_1",
            Layer::Conv3_2 => "3_2",
            Layer::Conv3_3 => "3_3",
            Layer::Conv4_1 => "4_1",
            Layer::Conv4_2 => "4_2",
            Layer::Conv4_3 => "4_3",
            Layer::Conv5_1 => "5_1",
            Layer::Conv5_2 => "5_2",
            Layer::Conv5_3 => "5_3",
        }
    }

    /// Depth tag of the activations this layer's crops are cut from: the layer
    /// directly below it, or the raw pixels for the first layer.
    pub fn bottom(self) -> &'static str {
        let idx = Layer::ALL.iter().position(|l| *l == self).unwrap_or(0);
        match idx.checked_sub(1) {
            Some(prev) => Layer::ALL[prev].as_str(),
            None => "pixel",
        }
    }
}

impl FromStr for Layer {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let t = t.strip_prefix("conv").unwrap_or(t);
        Layer::ALL
            .iter()
            .copied()
            .find(|l| l.as_str() == t)
            .ok_or_else(|| ParseNameError::Layer(s.to_string()))
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one output shard: all crops of one tilt row for one layer and split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub sphere_h: u32,
    pub ks: u32,
    pub network: Network,
    pub layer: Layer,
    pub tilt: u32,
    pub split: Split,
}

impl BucketKey {
    /// File stem shared by the annotation, shard and lock artifacts, e.g. `tilt010.train`.
    pub fn stem(&self) -> String {
        format!("tilt{:03}.{}", self.tilt, self.split)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(pub String);

impl FrameId {
    /// Frames are addressed by the file stem of the image they were rendered from.
    pub fn from_source_path(path: &str) -> Option<Self> {
        let stem = Path::new(path.trim()).file_stem()?.to_str()?;
        if stem.is_empty() {
            return None;
        }
        Some(FrameId(stem.to_string()))
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One crop request: a frame, an anchor `(x, y)` and the target activation there.
///
/// `y` is the tilt row the record was generated for and must equal the bucket's tilt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub source_path: String,
    pub x: i64,
    pub y: i64,
    pub label: Vec<f32>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnnotationRecordError {
    #[error("source_path must be non-empty")]
    EmptySourcePath,
    #[error("source_path must not contain tabs/newlines")]
    SourcePathControlChars,
    #[error("source_path has no usable file stem for a frame id")]
    NoFrameId,
    #[error("label must have at least one value")]
    EmptyLabel,
}

impl AnnotationRecord {
    pub fn validate(&self) -> Result<(), AnnotationRecordError> {
        if self.source_path.trim().is_empty() {
            return Err(AnnotationRecordError::EmptySourcePath);
        }
        if self.source_path.contains('\t') || self.source_path.contains('\n') {
            return Err(AnnotationRecordError::SourcePathControlChars);
        }
        if FrameId::from_source_path(&self.source_path).is_none() {
            return Err(AnnotationRecordError::NoFrameId);
        }
        if self.label.is_empty() {
            return Err(AnnotationRecordError::EmptyLabel);
        }
        Ok(())
    }

    pub fn frame_id(&self) -> Result<FrameId, AnnotationRecordError> {
        FrameId::from_source_path(&self.source_path).ok_or(AnnotationRecordError::NoFrameId)
    }
}

/// Crop expected width/height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size2 {
    pub w: usize,
    pub h: usize,
}

impl fmt::Display for Size2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.w, self.h)
    }
}
