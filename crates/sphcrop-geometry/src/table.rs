use std::collections::BTreeMap;
use std::path::Path;

use sphcrop_core::types::{Layer, Size2};

use crate::{CropGeometry, Geometry, GeometryError};

pub const GEOMETRY_SCHEMA_VERSION: u32 = 1;

/// Stride and crop tables for one `(sphereH, ks)` configuration.
///
/// File format (TSV, blank lines and `#` comments ignored):
///
/// ```text
/// schema_version=1
/// sphere_h    320
/// ks          640
/// stride      <layer> <n>
/// crop        <layer> <tilt> <in_w> <in_h> <out_w> <out_h>
/// ```
///
/// A layer without a `stride` row has stride 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryTable {
    sphere_h: u32,
    ks: u32,
    strides: BTreeMap<Layer, usize>,
    crops: BTreeMap<(Layer, u32), CropGeometry>,
}

impl GeometryTable {
    pub fn new(sphere_h: u32, ks: u32) -> Self {
        Self {
            sphere_h,
            ks,
            strides: BTreeMap::new(),
            crops: BTreeMap::new(),
        }
    }

    pub fn with_stride(mut self, layer: Layer, stride: usize) -> Self {
        self.strides.insert(layer, stride);
        self
    }

    pub fn with_crop(mut self, layer: Layer, tilt: u32, geometry: CropGeometry) -> Self {
        self.crops.insert((layer, tilt), geometry);
        self
    }

    pub fn sphere_h(&self) -> u32 {
        self.sphere_h
    }

    pub fn ks(&self) -> u32 {
        self.ks
    }

    pub fn load(path: &Path) -> Result<Self, GeometryError> {
        let bytes = std::fs::read(path).map_err(|source| GeometryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        parse_geometry_tsv(&bytes)
    }

    fn check_config(&self, sphere_h: u32, ks: Option<u32>) -> Result<(), GeometryError> {
        let ks_ok = ks.map_or(true, |ks| ks == self.ks);
        if sphere_h != self.sphere_h || !ks_ok {
            return Err(GeometryError::TableMismatch {
                have_sphere_h: self.sphere_h,
                have_ks: self.ks,
                sphere_h,
                ks: ks.unwrap_or(self.ks),
            });
        }
        Ok(())
    }
}

impl Geometry for GeometryTable {
    fn stride(&self, layer: Layer, sphere_h: u32, ks: u32) -> Result<usize, GeometryError> {
        self.check_config(sphere_h, Some(ks))?;
        Ok(self.strides.get(&layer).copied().unwrap_or(1))
    }

    fn crop_geometry(
        &self,
        layer: Layer,
        tilt: u32,
        sphere_h: u32,
    ) -> Result<CropGeometry, GeometryError> {
        self.check_config(sphere_h, None)?;
        self.crops
            .get(&(layer, tilt))
            .copied()
            .ok_or(GeometryError::NoCrop { layer, tilt })
    }
}

fn parse_err(line: usize, reason: impl Into<String>) -> GeometryError {
    GeometryError::Parse {
        line,
        reason: reason.into(),
    }
}

fn field<T: std::str::FromStr>(
    cols: &[&str],
    idx: usize,
    name: &str,
    line: usize,
) -> Result<T, GeometryError> {
    cols.get(idx)
        .and_then(|v| v.trim().parse::<T>().ok())
        .ok_or_else(|| parse_err(line, format!("bad {name}")))
}

fn positive(v: usize, name: &str, line: usize) -> Result<usize, GeometryError> {
    if v == 0 {
        return Err(parse_err(line, format!("{name} must be > 0")));
    }
    Ok(v)
}

pub fn parse_geometry_tsv(bytes: &[u8]) -> Result<GeometryTable, GeometryError> {
    let s = std::str::from_utf8(bytes)?;
    let mut lines = s.lines().enumerate();
    let (_, first) = lines
        .by_ref()
        .find(|(_, l)| !l.trim().is_empty())
        .ok_or(GeometryError::MissingSchemaVersion)?;
    let Some((k, v)) = first.split_once('=') else {
        return Err(GeometryError::MissingSchemaVersion);
    };
    if k.trim() != "schema_version" {
        return Err(GeometryError::MissingSchemaVersion);
    }
    let schema_version: u32 = v
        .trim()
        .parse()
        .map_err(|_| GeometryError::MissingSchemaVersion)?;
    if schema_version != GEOMETRY_SCHEMA_VERSION {
        return Err(GeometryError::UnsupportedSchemaVersion(schema_version));
    }

    let mut sphere_h: Option<u32> = None;
    let mut ks: Option<u32> = None;
    let mut strides = BTreeMap::new();
    let mut crops = BTreeMap::new();

    for (idx, raw) in lines {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let cols: Vec<&str> = line.split('\t').map(str::trim).collect();
        match cols[0] {
            "sphere_h" => sphere_h = Some(field(&cols, 1, "sphere_h", line_no)?),
            "ks" => ks = Some(field(&cols, 1, "ks", line_no)?),
            "stride" => {
                if cols.len() != 3 {
                    return Err(parse_err(line_no, "expected stride<TAB>layer<TAB>n"));
                }
                let layer: Layer = cols[1]
                    .parse()
                    .map_err(|e| parse_err(line_no, format!("{e}")))?;
                let stride = positive(field(&cols, 2, "stride", line_no)?, "stride", line_no)?;
                if strides.insert(layer, stride).is_some() {
                    return Err(parse_err(
                        line_no,
                        format!("duplicate stride for layer {layer}"),
                    ));
                }
            }
            "crop" => {
                if cols.len() != 7 {
                    return Err(parse_err(
                        line_no,
                        "expected crop<TAB>layer<TAB>tilt<TAB>in_w<TAB>in_h<TAB>out_w<TAB>out_h",
                    ));
                }
                let layer: Layer = cols[1]
                    .parse()
                    .map_err(|e| parse_err(line_no, format!("{e}")))?;
                let tilt: u32 = field(&cols, 2, "tilt", line_no)?;
                let geometry = CropGeometry {
                    crop_in: Size2 {
                        w: positive(field(&cols, 3, "in_w", line_no)?, "in_w", line_no)?,
                        h: positive(field(&cols, 4, "in_h", line_no)?, "in_h", line_no)?,
                    },
                    crop_out: Size2 {
                        w: positive(field(&cols, 5, "out_w", line_no)?, "out_w", line_no)?,
                        h: positive(field(&cols, 6, "out_h", line_no)?, "out_h", line_no)?,
                    },
                };
                if crops.insert((layer, tilt), geometry).is_some() {
                    return Err(parse_err(
                        line_no,
                        format!("duplicate crop for layer {layer} tilt {tilt}"),
                    ));
                }
            }
            other => return Err(parse_err(line_no, format!("unknown row kind {other:?}"))),
        }
    }

    let sphere_h = sphere_h.ok_or_else(|| parse_err(0, "missing sphere_h row"))?;
    let ks = ks.ok_or_else(|| parse_err(0, "missing ks row"))?;
    if let Some(((layer, tilt), _)) = crops.iter().find(|((_, tilt), _)| *tilt >= sphere_h) {
        return Err(parse_err(
            0,
            format!("crop row for layer {layer} tilt {tilt} is outside [0, {sphere_h})"),
        ));
    }

    Ok(GeometryTable {
        sphere_h,
        ks,
        strides,
        crops,
    })
}
