//! Binary snapshot format for the vector store.
//!
//! # Storage Format
//!
//! A simple binary layout optimized for sequential access:
//! - Header (16 bytes): magic, version, dimension, vector count
//! - Entries: u16 id length, UTF-8 record id, contiguous f32 values in
//!   little-endian order
//!
//! Snapshots are written whole from a pre-serialized buffer and read back
//! through a memory map, so loading does not copy the file through an
//! intermediate allocation per vector read.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use memmap2::{Mmap, MmapOptions};
use thiserror::Error;

use crate::record::RecordId;
use crate::vector::types::{VectorDimension, VectorError};

/// Current snapshot format version.
const SNAPSHOT_VERSION: u32 = 1;

/// Size of the snapshot header in bytes.
const HEADER_SIZE: usize = 16;

/// Magic bytes identifying vector snapshot files.
const MAGIC_BYTES: &[u8; 4] = b"AVEC";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

/// Errors specific to snapshot encoding and decoding.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid snapshot format: {0}")]
    InvalidFormat(String),

    #[error("Invalid snapshot version: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),
}

/// Writes the full vector set to a snapshot file.
///
/// The entire snapshot is serialized into a buffer first and written with a
/// single filesystem call, so callers can drop any in-memory locks before
/// invoking this.
pub fn write_snapshot(
    path: &Path,
    dimension: VectorDimension,
    entries: &[(RecordId, Vec<f32>)],
) -> Result<(), SnapshotError> {
    let dim = dimension.get();
    let mut buffer = Vec::with_capacity(HEADER_SIZE + entries.len() * (2 + 16 + dim * BYTES_PER_F32));

    buffer.extend_from_slice(MAGIC_BYTES);
    buffer.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    buffer.extend_from_slice(&(dim as u32).to_le_bytes());
    buffer.extend_from_slice(&(entries.len() as u32).to_le_bytes());

    for (id, vector) in entries {
        dimension.validate_vector(vector)?;

        let id_bytes = id.as_str().as_bytes();
        if id_bytes.len() > u16::MAX as usize {
            return Err(SnapshotError::InvalidFormat(format!(
                "Record id too long for snapshot: {} bytes",
                id_bytes.len()
            )));
        }
        buffer.extend_from_slice(&(id_bytes.len() as u16).to_le_bytes());
        buffer.extend_from_slice(id_bytes);
        for value in vector {
            buffer.extend_from_slice(&value.to_le_bytes());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(&buffer)?;
    file.flush()?;
    Ok(())
}

/// Reads a snapshot file back into `(dimension, entries)`.
///
/// Callers decide how to treat failures; the vector store maps any error
/// here to "empty store" per its load contract.
pub fn read_snapshot(path: &Path) -> Result<(VectorDimension, Vec<(RecordId, Vec<f32>)>), SnapshotError> {
    let file = File::open(path)?;
    let mmap = unsafe { MmapOptions::new().map(&file)? };

    let (dimension, count) = read_header(&mmap)?;
    let dim = dimension.get();

    let mut entries = Vec::with_capacity(count);
    let mut offset = HEADER_SIZE;

    for _ in 0..count {
        if offset + 2 > mmap.len() {
            return Err(SnapshotError::InvalidFormat(
                "Truncated entry header".to_string(),
            ));
        }
        let id_len = u16::from_le_bytes([mmap[offset], mmap[offset + 1]]) as usize;
        offset += 2;

        let vector_bytes = dim * BYTES_PER_F32;
        if offset + id_len + vector_bytes > mmap.len() {
            return Err(SnapshotError::InvalidFormat("Truncated entry".to_string()));
        }

        let id_str = std::str::from_utf8(&mmap[offset..offset + id_len])
            .map_err(|_| SnapshotError::InvalidFormat("Record id is not valid UTF-8".to_string()))?;
        let id = RecordId::new(id_str);
        offset += id_len;

        let mut vector = Vec::with_capacity(dim);
        for i in 0..dim {
            let base = offset + i * BYTES_PER_F32;
            vector.push(f32::from_le_bytes([
                mmap[base],
                mmap[base + 1],
                mmap[base + 2],
                mmap[base + 3],
            ]));
        }
        offset += vector_bytes;

        entries.push((id, vector));
    }

    Ok((dimension, entries))
}

fn read_header(mmap: &Mmap) -> Result<(VectorDimension, usize), SnapshotError> {
    if mmap.len() < HEADER_SIZE {
        return Err(SnapshotError::InvalidFormat(
            "File too small to contain header".to_string(),
        ));
    }

    if &mmap[0..4] != MAGIC_BYTES {
        return Err(SnapshotError::InvalidFormat("Invalid magic bytes".to_string()));
    }

    let version = u32::from_le_bytes([mmap[4], mmap[5], mmap[6], mmap[7]]);
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotError::VersionMismatch {
            expected: SNAPSHOT_VERSION,
            actual: version,
        });
    }

    let dim_value = u32::from_le_bytes([mmap[8], mmap[9], mmap[10], mmap[11]]);
    let dimension = VectorDimension::new(dim_value as usize)?;
    let count = u32::from_le_bytes([mmap[12], mmap[13], mmap[14], mmap[15]]) as usize;

    Ok((dimension, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vectors.avec");
        let dimension = VectorDimension::new(4).unwrap();

        let entries = vec![
            (RecordId::from("exp_1"), vec![1.0, 2.0, 3.0, 4.0]),
            (RecordId::from("exp_2"), vec![-0.5, 0.25, 0.0, 1.5]),
        ];

        write_snapshot(&path, dimension, &entries).unwrap();

        let (loaded_dim, loaded) = read_snapshot(&path).unwrap();
        assert_eq!(loaded_dim, dimension);
        assert_eq!(loaded, entries);
    }

    #[test]
    fn test_empty_snapshot_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vectors.avec");
        let dimension = VectorDimension::new(3).unwrap();

        write_snapshot(&path, dimension, &[]).unwrap();

        let (_, loaded) = read_snapshot(&path).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_missing_file_errors() {
        let temp_dir = TempDir::new().unwrap();
        let result = read_snapshot(&temp_dir.path().join("absent.avec"));
        assert!(matches!(result, Err(SnapshotError::Io(_))));
    }

    #[test]
    fn test_corrupt_file_errors() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("corrupt.avec");
        std::fs::write(&path, b"not a snapshot at all").unwrap();

        let result = read_snapshot(&path);
        assert!(matches!(result, Err(SnapshotError::InvalidFormat(_))));
    }

    #[test]
    fn test_dimension_validated_on_write() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vectors.avec");
        let dimension = VectorDimension::new(4).unwrap();

        let entries = vec![(RecordId::from("exp_1"), vec![1.0, 2.0])];
        assert!(write_snapshot(&path, dimension, &entries).is_err());
    }
}
