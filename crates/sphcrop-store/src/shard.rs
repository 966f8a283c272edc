use std::fs::File;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Array4, Axis};
use ndarray_npy::{NpzReader, NpzWriter};

use crate::StoreError;

/// Column-oriented content of one finished shard.
///
/// `path` is stored as a NUL-padded `u8[N, P]` matrix since `.npy` has no
/// portable variable-length string type.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardColumns {
    pub path: Vec<String>,
    pub x: Array1<i64>,
    pub y: Array1<i64>,
    pub target: Array2<f32>,
    pub srcs: Array4<f32>,
}

impl ShardColumns {
    pub fn rows(&self) -> usize {
        self.x.len()
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        let n = self.rows();
        let lens = [
            ("path", self.path.len()),
            ("y", self.y.len()),
            ("target", self.target.len_of(Axis(0))),
            ("srcs", self.srcs.len_of(Axis(0))),
        ];
        for (name, len) in lens {
            if len != n {
                return Err(StoreError::ShardColumns(format!(
                    "column {name} has {len} rows, x has {n}"
                )));
            }
        }
        if let Some(p) = self.path.iter().find(|p| p.contains('\0')) {
            return Err(StoreError::ShardColumns(format!(
                "path {p:?} contains NUL"
            )));
        }
        Ok(())
    }
}

fn encode_paths(paths: &[String]) -> Result<Array2<u8>, StoreError> {
    let width = paths.iter().map(|p| p.len()).max().unwrap_or(0);
    let mut bytes = vec![0u8; paths.len() * width];
    for (row, p) in paths.iter().enumerate() {
        let start = row * width;
        bytes[start..start + p.len()].copy_from_slice(p.as_bytes());
    }
    Array2::from_shape_vec((paths.len(), width), bytes)
        .map_err(|e| StoreError::ShardColumns(format!("path matrix: {e}")))
}

fn decode_paths(matrix: &Array2<u8>) -> Result<Vec<String>, StoreError> {
    matrix
        .outer_iter()
        .map(|row| {
            let bytes: Vec<u8> = row.iter().copied().take_while(|b| *b != 0).collect();
            String::from_utf8(bytes)
                .map_err(|e| StoreError::ShardColumns(format!("path is not utf-8: {e}")))
        })
        .collect()
}

fn temp_sibling(path: &Path) -> Result<PathBuf, StoreError> {
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad filename"))?;
    let mut tmp = path.to_path_buf();
    tmp.set_file_name(format!(
        "{file_name}.tmp.{}.{}",
        std::process::id(),
        crate::unix_time_ms()
    ));
    Ok(tmp)
}

/// Writes `cols` as a deflate-compressed `.npz` with members
/// `path.npy`, `x.npy`, `y.npy`, `target.npy`, `srcs.npy`.
///
/// The archive is built next to `path` and renamed into place, so the final
/// path either holds a complete shard or does not exist.
pub fn write_shard(path: &Path, cols: &ShardColumns) -> Result<(), StoreError> {
    cols.validate()?;
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path must have parent")
    })?;
    std::fs::create_dir_all(parent)?;

    let tmp = temp_sibling(path)?;
    let result = write_npz(&tmp, cols)
        .and_then(|()| std::fs::rename(&tmp, path).map_err(StoreError::from));
    if result.is_err() {
        if let Err(err) = std::fs::remove_file(&tmp) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    target: "sphcrop",
                    event = "shard_tmp_cleanup_failed",
                    tmp = %tmp.display(),
                    error = %err,
                    "could not remove partial shard"
                );
            }
        }
    }
    result
}

fn write_npz(tmp: &Path, cols: &ShardColumns) -> Result<(), StoreError> {
    let encode_err = |source| StoreError::ShardEncode {
        path: tmp.to_path_buf(),
        source,
    };

    let paths = encode_paths(&cols.path)?;
    let file = File::create(tmp)?;
    let mut npz = NpzWriter::new_compressed(file);
    npz.add_array("path.npy", &paths).map_err(encode_err)?;
    npz.add_array("x.npy", &cols.x).map_err(encode_err)?;
    npz.add_array("y.npy", &cols.y).map_err(encode_err)?;
    npz.add_array("target.npy", &cols.target).map_err(encode_err)?;
    npz.add_array("srcs.npy", &cols.srcs).map_err(encode_err)?;
    let file = npz.finish().map_err(encode_err)?;
    file.sync_all()?;
    Ok(())
}

pub fn read_shard(path: &Path) -> Result<ShardColumns, StoreError> {
    let decode_err = |source| StoreError::ShardDecode {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path)?;
    let mut npz = NpzReader::new(file).map_err(decode_err)?;
    let paths: Array2<u8> = npz.by_name("path.npy").map_err(decode_err)?;
    let x: Array1<i64> = npz.by_name("x.npy").map_err(decode_err)?;
    let y: Array1<i64> = npz.by_name("y.npy").map_err(decode_err)?;
    let target: Array2<f32> = npz.by_name("target.npy").map_err(decode_err)?;
    let srcs: Array4<f32> = npz.by_name("srcs.npy").map_err(decode_err)?;

    let cols = ShardColumns {
        path: decode_paths(&paths)?,
        x,
        y,
        target,
        srcs,
    };
    cols.validate()?;
    Ok(cols)
}
