//! On-disk formats: CSV datasets, `.npy` tensors, content hashes.
//!
//! All writers go through [`netsentry_core::atomic_write`], so an artifact path
//! either holds the complete file or nothing.

use crate::data::dataset::{Dataset, Scalar};
use crate::error::MlError;
use ndarray::Array2;
use netsentry_core::atomic_write;
use sha2::{Digest, Sha256};
use std::path::Path;

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// Read a CSV file with a header row. Empty fields are missing values.
pub fn read_csv(path: &Path) -> Result<Dataset, MlError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| MlError::dataset(format!("Failed to open {}: {e}", path.display())))?;
    let columns: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut dataset = Dataset::empty(columns)?;
    for record in reader.records() {
        let record = record?;
        dataset.push_row(record.iter().map(Scalar::parse).collect())?;
    }
    Ok(dataset)
}

/// Serialize a dataset to CSV bytes, header first.
pub fn csv_bytes(dataset: &Dataset) -> Result<Vec<u8>, MlError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(dataset.columns())?;
    for row in dataset.rows() {
        writer.write_record(row.iter().map(|cell| cell.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| MlError::dataset(format!("Failed to flush CSV buffer: {e}")))
}

/// Write a dataset to `path` atomically. Missing cells become empty fields.
pub fn write_csv(path: &Path, dataset: &Dataset) -> Result<(), MlError> {
    let bytes = csv_bytes(dataset)?;
    atomic_write(path, &bytes).map_err(|e| MlError::persistence(path, e))
}

/// Stack `test` under `train`, optionally tagging each row with a `source`
/// column (`train` / `test`). Column sets must match; `test` is reordered to
/// the train column order.
pub fn combine_datasets(
    train: &Dataset,
    test: &Dataset,
    source_column: Option<&str>,
) -> Result<Dataset, MlError> {
    let test = test
        .reorder_columns(train.columns())
        .map_err(|e| MlError::schema_mismatch("combined dataset", e.to_string()))?;

    let mut columns = train.columns().to_vec();
    if let Some(name) = source_column {
        columns.push(name.to_string());
    }
    let mut combined = Dataset::empty(columns)?;
    for (tag, part) in [("train", train), ("test", &test)] {
        for row in part.rows() {
            let mut row = row.clone();
            if source_column.is_some() {
                row.push(Scalar::Text(tag.to_string()));
            }
            combined.push_row(row)?;
        }
    }
    Ok(combined)
}

// ---------------------------------------------------------------------------
// NPY
// ---------------------------------------------------------------------------

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Encode a 2-D `f64` array as NPY v1.0 (`<f8`, C order).
pub fn npy_bytes(array: &Array2<f64>) -> Vec<u8> {
    let (rows, cols) = array.dim();
    let mut header =
        format!("{{'descr': '<f8', 'fortran_order': False, 'shape': ({rows}, {cols}), }}");
    // magic(6) + version(2) + header length(2) + header, padded to 64 bytes
    let unpadded = NPY_MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut out = Vec::with_capacity(unpadded + padding + rows * cols * 8);
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for value in array.iter() {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Write a tensor to `path` atomically in NPY format.
pub fn write_npy(path: &Path, array: &Array2<f64>) -> Result<(), MlError> {
    atomic_write(path, &npy_bytes(array)).map_err(|e| MlError::persistence(path, e))
}

/// Decode a 2-D little-endian `f64` C-order NPY file (format v1 or v2).
pub fn parse_npy(bytes: &[u8]) -> Result<Array2<f64>, MlError> {
    let bad = |msg: &str| MlError::dataset(format!("Invalid NPY data: {msg}"));
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err(bad("missing magic string"));
    }
    let (header_len, header_start) = match bytes[6] {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 if bytes.len() >= 12 => (
            u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
            12,
        ),
        v => return Err(bad(&format!("unsupported version {v}"))),
    };
    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .and_then(|h| std::str::from_utf8(h).ok())
        .ok_or_else(|| bad("truncated header"))?;

    if !header.contains("'descr': '<f8'") {
        return Err(bad("only '<f8' arrays are supported"));
    }
    if !header.contains("'fortran_order': False") {
        return Err(bad("only C-order arrays are supported"));
    }
    let shape_start = header
        .find("'shape': (")
        .map(|i| i + "'shape': (".len())
        .ok_or_else(|| bad("missing shape"))?;
    let shape_end = header[shape_start..]
        .find(')')
        .map(|i| shape_start + i)
        .ok_or_else(|| bad("unterminated shape"))?;
    let dims = header[shape_start..shape_end]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|_| bad("non-integer shape")))
        .collect::<Result<Vec<_>, _>>()?;
    let &[rows, cols] = dims.as_slice() else {
        return Err(bad("only 2-D arrays are supported"));
    };

    let payload = &bytes[data_start..];
    if payload.len() != rows * cols * 8 {
        return Err(bad("payload size does not match shape"));
    }
    let values = payload
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            f64::from_le_bytes(buf)
        })
        .collect();
    Array2::from_shape_vec((rows, cols), values).map_err(|e| bad(&e.to_string()))
}

pub fn read_npy(path: &Path) -> Result<Array2<f64>, MlError> {
    let bytes = std::fs::read(path)?;
    parse_npy(&bytes)
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Hex-encoded SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> Result<String, MlError> {
    let content = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(format!("{:x}", hasher.finalize()))
}
