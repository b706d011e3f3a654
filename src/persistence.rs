//! Snapshot persistence using bincode serialization.
//!
//! An index is serialized to a single file: `[bincode payload][magic "VIX1"]
//! [u32 CRC32 BE]`. Writes go to a temp file first and are atomically
//! renamed into place so a crash never leaves a half-written snapshot at the
//! target path. Loads verify the checksum, decode, and re-check every
//! internal invariant before handing the state back.

use crate::distance::DistanceKind;
use crate::error::{IndexError, Result};
use crate::index::IndexData;
use std::fs;
use std::path::Path;

/// Magic bytes preceding the CRC32 footer.
const SNAPSHOT_CRC_MAGIC: &[u8; 4] = b"VIX1";

/// Length of the `[magic][CRC32]` footer.
const FOOTER_LEN: usize = 8;

/// Serialize the index state to `path` with an atomic write.
pub(crate) fn save(data: &IndexData, path: &Path) -> Result<()> {
    let bytes = bincode::serialize(data)
        .map_err(|e| IndexError::Corrupt(format!("serialization failed: {e}")))?;
    let crc = crc32fast::hash(&bytes);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut output = Vec::with_capacity(bytes.len() + FOOTER_LEN);
    output.extend_from_slice(&bytes);
    output.extend_from_slice(SNAPSHOT_CRC_MAGIC);
    output.extend_from_slice(&crc.to_be_bytes());

    // Atomic write: temp file in the same directory, then rename
    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, &output)?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    tracing::info!(
        path = %path.display(),
        bytes = bytes.len(),
        points = data.graph.element_count(),
        crc = format_args!("{crc:#010x}"),
        "saved index snapshot"
    );
    Ok(())
}

/// Read, checksum-verify, decode, and validate a snapshot.
///
/// The caller states the dimension and distance kind it expects; a snapshot
/// built for anything else is rejected rather than reinterpreted.
pub(crate) fn load(
    path: &Path,
    expected_dimension: usize,
    expected_kind: DistanceKind,
) -> Result<IndexData> {
    let raw = fs::read(path)?;

    if raw.len() < FOOTER_LEN || &raw[raw.len() - FOOTER_LEN..raw.len() - 4] != SNAPSHOT_CRC_MAGIC {
        return Err(IndexError::Corrupt(format!(
            "missing snapshot footer in {}",
            path.display()
        )));
    }

    let payload = &raw[..raw.len() - FOOTER_LEN];
    let stored_crc = u32::from_be_bytes([
        raw[raw.len() - 4],
        raw[raw.len() - 3],
        raw[raw.len() - 2],
        raw[raw.len() - 1],
    ]);
    let computed_crc = crc32fast::hash(payload);
    if computed_crc != stored_crc {
        return Err(IndexError::Corrupt(format!(
            "CRC32 mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"
        )));
    }
    tracing::debug!(crc = format_args!("{stored_crc:#010x}"), "snapshot CRC32 verified");

    let data: IndexData = bincode::deserialize(payload)
        .map_err(|e| IndexError::Corrupt(format!("undecodable payload: {e}")))?;

    data.validate().map_err(IndexError::Corrupt)?;

    if data.graph.dimension() != expected_dimension {
        return Err(IndexError::DimensionMismatch {
            expected: expected_dimension,
            found: data.graph.dimension(),
        });
    }
    let found_kind = data.graph.config.distance_kind;
    if found_kind != expected_kind {
        return Err(IndexError::MetricMismatch {
            expected: expected_kind,
            found: found_kind,
        });
    }

    tracing::info!(
        path = %path.display(),
        points = data.graph.element_count(),
        deleted = data.graph.deleted_count(),
        "loaded index snapshot"
    );
    Ok(data)
}

/// Sibling temp path for the atomic write.
fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
