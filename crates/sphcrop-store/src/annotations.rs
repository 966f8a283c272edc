use std::path::Path;

use sphcrop_core::annotation::parse_annotation_tsv;
use sphcrop_core::types::AnnotationRecord;

use crate::StoreError;

/// Reads one bucket's annotation file.
///
/// An absent file is [`StoreError::MissingAnnotation`]: the upstream target
/// stage has not produced this bucket yet.
pub fn load_annotations(path: &Path) -> Result<Vec<AnnotationRecord>, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::MissingAnnotation(path.to_path_buf()));
        }
        Err(err) => return Err(StoreError::Io(err)),
    };
    parse_annotation_tsv(&bytes).map_err(|source| StoreError::AnnotationParse {
        path: path.to_path_buf(),
        source,
    })
}
