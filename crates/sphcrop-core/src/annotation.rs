use thiserror::Error;

use crate::types::{AnnotationRecord, AnnotationRecordError};

pub const ANNOTATION_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum AnnotationParseError {
    #[error("annotation file is not utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("empty annotation file")]
    Empty,
    #[error("annotation header must be schema_version=<n>")]
    MissingSchemaVersion,
    #[error("unsupported annotation schema_version {0}")]
    UnsupportedSchemaVersion(u32),
    #[error("line {line}: {reason}")]
    Line { line: usize, reason: String },
    #[error("line {line}: {source}")]
    Invalid {
        line: usize,
        source: AnnotationRecordError,
    },
}

fn line_err(line: usize, reason: impl Into<String>) -> AnnotationParseError {
    AnnotationParseError::Line {
        line,
        reason: reason.into(),
    }
}

/// Parses one bucket's annotation file.
///
/// Format:
///   schema_version=1
///   source_path<TAB>x<TAB>y<TAB>label_0,label_1,...
///
/// Blank lines and `#` comments are skipped. Record order is preserved and
/// duplicate rows are kept: they are separate training samples.
pub fn parse_annotation_tsv(bytes: &[u8]) -> Result<Vec<AnnotationRecord>, AnnotationParseError> {
    let s = std::str::from_utf8(bytes)?;
    let mut lines = s.lines().enumerate();

    let (_, first) = lines
        .by_ref()
        .find(|(_, l)| !l.trim().is_empty())
        .ok_or(AnnotationParseError::Empty)?;
    let Some((k, v)) = first.split_once('=') else {
        return Err(AnnotationParseError::MissingSchemaVersion);
    };
    if k.trim() != "schema_version" {
        return Err(AnnotationParseError::MissingSchemaVersion);
    }
    let schema_version: u32 = v
        .trim()
        .parse()
        .map_err(|_| AnnotationParseError::MissingSchemaVersion)?;
    if schema_version != ANNOTATION_SCHEMA_VERSION {
        return Err(AnnotationParseError::UnsupportedSchemaVersion(
            schema_version,
        ));
    }

    let mut records = Vec::new();
    for (idx, raw) in lines {
        let line_no = idx + 1;
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() != 4 {
            return Err(line_err(
                line_no,
                format!(
                    "expected 4 columns (source_path<TAB>x<TAB>y<TAB>label), got {}",
                    cols.len()
                ),
            ));
        }

        let x: i64 = cols[1]
            .trim()
            .parse()
            .map_err(|_| line_err(line_no, "bad x"))?;
        let y: i64 = cols[2]
            .trim()
            .parse()
            .map_err(|_| line_err(line_no, "bad y"))?;
        let label = parse_label(cols[3]).map_err(|reason| line_err(line_no, reason))?;

        let record = AnnotationRecord {
            source_path: cols[0].trim().to_string(),
            x,
            y,
            label,
        };
        record
            .validate()
            .map_err(|source| AnnotationParseError::Invalid {
                line: line_no,
                source,
            })?;
        records.push(record);
    }
    Ok(records)
}

fn parse_label(field: &str) -> Result<Vec<f32>, String> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(Vec::new());
    }
    field
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f32>()
                .map_err(|_| format!("bad label value {:?}", v.trim()))
        })
        .collect()
}

/// Inverse of [`parse_annotation_tsv`]; used by upstream tooling and fixtures.
pub fn encode_annotation_tsv(records: &[AnnotationRecord]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.len() * 48);
    out.extend_from_slice(format!("schema_version={ANNOTATION_SCHEMA_VERSION}\n").as_bytes());
    for r in records {
        out.extend_from_slice(r.source_path.as_bytes());
        out.push(b'\t');
        out.extend_from_slice(r.x.to_string().as_bytes());
        out.push(b'\t');
        out.extend_from_slice(r.y.to_string().as_bytes());
        out.push(b'\t');
        let label: Vec<String> = r.label.iter().map(|v| v.to_string()).collect();
        out.extend_from_slice(label.join(",").as_bytes());
        out.push(b'\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_records_in_file_order_and_keeps_duplicates() -> anyhow::Result<()> {
        let text = "schema_version=1\n\
# frame A, tilt 10\n\
/data/A.jpg\t0\t10\t1\n\
/data/A.jpg\t5\t10\t2\n\
\n\
/data/A.jpg\t0\t10\t1\n";
        let records = parse_annotation_tsv(text.as_bytes())?;
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], records[2]);
        assert_eq!(records[1].x, 5);
        assert_eq!(records[1].label, vec![2.0]);
        Ok(())
    }

    #[test]
    fn multi_value_labels_parse() -> anyhow::Result<()> {
        let text = "schema_version=1\n/v/0001.jpg\t3\t7\t0.5, -1.25,3\n";
        let records = parse_annotation_tsv(text.as_bytes())?;
        assert_eq!(records[0].label, vec![0.5, -1.25, 3.0]);
        Ok(())
    }

    #[test]
    fn header_is_required() {
        let err = parse_annotation_tsv(b"/v/a.jpg\t0\t0\t1\n").unwrap_err();
        assert!(matches!(err, AnnotationParseError::MissingSchemaVersion));

        let err = parse_annotation_tsv(b"schema_version=7\n").unwrap_err();
        assert!(matches!(
            err,
            AnnotationParseError::UnsupportedSchemaVersion(7)
        ));

        let err = parse_annotation_tsv(b"  \n").unwrap_err();
        assert!(matches!(err, AnnotationParseError::Empty));
    }

    #[test]
    fn malformed_rows_report_line_numbers() {
        let err = parse_annotation_tsv(b"schema_version=1\n/v/a.jpg\t0\tnope\t1\n").unwrap_err();
        match err {
            AnnotationParseError::Line { line, reason } => {
                assert_eq!(line, 2);
                assert_eq!(reason, "bad y");
            }
            other => panic!("expected Line error, got {other:?}"),
        }

        let err = parse_annotation_tsv(b"schema_version=1\n/v/a.jpg\t0\t1\t\n").unwrap_err();
        match err {
            AnnotationParseError::Invalid { line, source } => {
                assert_eq!(line, 2);
                assert_eq!(source, AnnotationRecordError::EmptyLabel);
            }
            other => panic!("expected Invalid error, got {other:?}"),
        }
    }

    #[test]
    fn encoded_file_parses_back() -> anyhow::Result<()> {
        let records = vec![
            AnnotationRecord {
                source_path: "/v/0001.jpg".to_string(),
                x: 12,
                y: 4,
                label: vec![0.25, 1.0],
            },
            AnnotationRecord {
                source_path: "/v/0002.jpg".to_string(),
                x: 0,
                y: 4,
                label: vec![-3.5, 0.0],
            },
        ];
        let bytes = encode_annotation_tsv(&records);
        assert_eq!(parse_annotation_tsv(&bytes)?, records);
        Ok(())
    }
}
