//! Compact, deduplicated per-voxel label multisets.
//!
//! A down-sampled voxel carries a weighted distribution of the original labels
//! that averaged into it. Each distribution is an entry list of
//! `(label id, count)` pairs, serialized into a shared byte buffer; voxels with
//! byte-identical multisets share one buffer offset. Deduplication is part of
//! the contract, not an optimization: it bounds memory for large blocks that
//! are mostly background.

use crate::label;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[cfg(test)]
mod tests;

/// Serialized size of one entry: u64 id followed by u32 count, little endian.
const ENTRY_BYTES: usize = 12;
/// Entry count prefix of a serialized list.
const LIST_HEADER_BYTES: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelEntry {
    pub id: u64,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultisetError {
    Empty,
    ZeroCount { id: u64 },
    TruncatedList { offset: usize, available: usize },
    OffsetOutOfRange { offset: usize, storage_len: usize },
    VoxelOutOfRange { index: usize, num_voxels: usize },
}

impl fmt::Display for MultisetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "label multiset must contain at least one entry"),
            Self::ZeroCount { id } => {
                write!(f, "label multiset entry for id {id} has count 0")
            }
            Self::TruncatedList { offset, available } => write!(
                f,
                "serialized entry list at offset {offset} truncated ({available} bytes available)"
            ),
            Self::OffsetOutOfRange {
                offset,
                storage_len,
            } => write!(
                f,
                "list offset {offset} out of range for storage length {storage_len}"
            ),
            Self::VoxelOutOfRange { index, num_voxels } => write!(
                f,
                "voxel index {index} out of range for block with {num_voxels} voxels"
            ),
        }
    }
}

impl std::error::Error for MultisetError {}

/// An ordered set of entries keyed by label id, with strictly positive counts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMultiset {
    entries: Vec<LabelEntry>,
}

impl LabelMultiset {
    /// A multiset holding a single label with count 1.
    pub fn singleton(id: u64) -> Self {
        Self {
            entries: vec![LabelEntry { id, count: 1 }],
        }
    }

    /// Build from entries; counts for duplicate ids are summed.
    pub fn from_entries(entries: impl IntoIterator<Item = LabelEntry>) -> Result<Self, MultisetError> {
        let mut merged = Vec::<LabelEntry>::new();
        for entry in entries {
            if entry.count == 0 {
                return Err(MultisetError::ZeroCount { id: entry.id });
            }
            match merged.binary_search_by_key(&entry.id, |e| e.id) {
                Ok(pos) => merged[pos].count = merged[pos].count.saturating_add(entry.count),
                Err(pos) => merged.insert(pos, entry),
            }
        }
        if merged.is_empty() {
            return Err(MultisetError::Empty);
        }
        Ok(Self { entries: merged })
    }

    pub fn entries(&self) -> &[LabelEntry] {
        &self.entries
    }

    pub fn count_of(&self, id: u64) -> u32 {
        match self.entries.binary_search_by_key(&id, |e| e.id) {
            Ok(pos) => self.entries[pos].count,
            Err(_) => 0,
        }
    }

    pub fn total_count(&self) -> u64 {
        self.entries.iter().map(|e| u64::from(e.count)).sum()
    }

    /// The entry with the maximal count; ties resolve to the smallest id.
    ///
    /// Entries are kept sorted by id, so a strict-greater scan lands on the
    /// smallest id among equal counts.
    pub fn most_significant_id(&self) -> u64 {
        let mut best = self.entries[0];
        for entry in &self.entries[1..] {
            if entry.count > best.count {
                best = *entry;
            }
        }
        best.id
    }

    /// Serialized byte size: count prefix plus fixed-width entries.
    pub fn serialized_len(&self) -> usize {
        LIST_HEADER_BYTES + self.entries.len() * ENTRY_BYTES
    }

    /// Append the serialized entry list. Layout per entry is id before count,
    /// both little endian; this order is an on-disk contract for any cache.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            out.extend_from_slice(&entry.id.to_le_bytes());
            out.extend_from_slice(&entry.count.to_le_bytes());
        }
    }

    /// Decode an entry list starting at `offset` within `storage`.
    pub fn decode_at(storage: &[u8], offset: usize) -> Result<Self, MultisetError> {
        if offset + LIST_HEADER_BYTES > storage.len() {
            return Err(MultisetError::OffsetOutOfRange {
                offset,
                storage_len: storage.len(),
            });
        }
        let header = &storage[offset..offset + LIST_HEADER_BYTES];
        let num_entries = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let body_start = offset + LIST_HEADER_BYTES;
        let body_len = num_entries * ENTRY_BYTES;
        if body_start + body_len > storage.len() {
            return Err(MultisetError::TruncatedList {
                offset,
                available: storage.len() - body_start,
            });
        }
        let mut entries = Vec::with_capacity(num_entries);
        for chunk in storage[body_start..body_start + body_len].chunks_exact(ENTRY_BYTES) {
            let id = u64::from_le_bytes([
                chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
            ]);
            let count = u32::from_le_bytes([chunk[8], chunk[9], chunk[10], chunk[11]]);
            if count == 0 {
                return Err(MultisetError::ZeroCount { id });
            }
            entries.push(LabelEntry { id, count });
        }
        if entries.is_empty() {
            return Err(MultisetError::Empty);
        }
        Ok(Self { entries })
    }
}

/// A block of voxels encoded as one offset per voxel into a shared,
/// deduplicated list-storage buffer.
///
/// Built once per loaded block; immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedBlock {
    dims: [usize; 3],
    offsets: Vec<u32>,
    list_data: Vec<u8>,
}

impl EncodedBlock {
    /// Encode a raw label array into the deduplicated block representation.
    ///
    /// Every voxel becomes the single-entry multiset `{id: raw[i], count: 1}`;
    /// identical ids share one serialized list. `None`, or a slice shorter
    /// than the block, stands for a failed read and degrades to an all-zero
    /// array of the expected length rather than aborting.
    pub fn decode_block(raw: Option<&[u64]>, dims: [usize; 3]) -> Self {
        let num_voxels = dims[0] * dims[1] * dims[2];
        let data: &[u64] = match raw {
            Some(data) if data.len() >= num_voxels => &data[..num_voxels],
            Some(data) => {
                log::warn!(
                    "raw label array has {} of {} expected elements, substituting zeros",
                    data.len(),
                    num_voxels
                );
                &[]
            }
            None => {
                log::warn!("raw label array unavailable, substituting zeros for {num_voxels} voxels");
                &[]
            }
        };

        let mut offsets = vec![0u32; num_voxels];
        let mut list_data = Vec::<u8>::new();
        let mut id_offset_map = HashMap::<u64, u32>::new();
        for i in 0..num_voxels {
            let id = data.get(i).copied().unwrap_or(0);
            let offset = match id_offset_map.get(&id) {
                Some(&offset) => offset,
                None => {
                    let offset = list_data.len() as u32;
                    LabelMultiset::singleton(id).encode_into(&mut list_data);
                    id_offset_map.insert(id, offset);
                    offset
                }
            };
            offsets[i] = offset;
        }

        Self {
            dims,
            offsets,
            list_data,
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn num_voxels(&self) -> usize {
        self.offsets.len()
    }

    /// Number of distinct serialized entry lists in the shared buffer.
    pub fn distinct_list_count(&self) -> usize {
        let mut seen: Vec<u32> = self.offsets.clone();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }

    /// Total size of the shared list-storage buffer in bytes.
    pub fn storage_len(&self) -> usize {
        self.list_data.len()
    }

    /// The multiset stored at a linear voxel index.
    pub fn multiset_at(&self, index: usize) -> Result<LabelMultiset, MultisetError> {
        let offset = self
            .offsets
            .get(index)
            .copied()
            .ok_or(MultisetError::VoxelOutOfRange {
                index,
                num_voxels: self.offsets.len(),
            })?;
        LabelMultiset::decode_at(&self.list_data, offset as usize)
    }

    /// Representative label for a voxel: the most significant id of its
    /// multiset, or INVALID for an unreadable voxel.
    pub fn display_id_at(&self, index: usize) -> u64 {
        match self.multiset_at(index) {
            Ok(multiset) => multiset.most_significant_id(),
            Err(error) => {
                log::error!("cannot decode multiset at voxel {index}: {error}");
                label::INVALID
            }
        }
    }
}

/// Identifies one fixed-size block within the multi-resolution volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockKey {
    pub timepoint: u32,
    pub level: u32,
    pub offset: [i64; 3],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockLoadError {
    Unavailable { reason: String },
}

impl fmt::Display for BlockLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { reason } => write!(f, "block unavailable: {reason}"),
        }
    }
}

impl std::error::Error for BlockLoadError {}

/// Storage collaborator supplying raw per-voxel label arrays.
pub trait BlockLoader {
    fn load_block(&self, key: &BlockKey, dims: [usize; 3]) -> Result<Vec<u64>, BlockLoadError>;
}

/// Load a raw block and encode it, degrading to all-zero data when the loader
/// fails or under-delivers. Callers must not assume the read succeeded.
pub fn decode_loaded_block(
    loader: &dyn BlockLoader,
    key: &BlockKey,
    dims: [usize; 3],
) -> EncodedBlock {
    match loader.load_block(key, dims) {
        Ok(data) => EncodedBlock::decode_block(Some(&data), dims),
        Err(error) => {
            log::warn!(
                "loading block at offset {:?} (t={}, level={}) failed: {error}",
                key.offset,
                key.timepoint,
                key.level
            );
            EncodedBlock::decode_block(None, dims)
        }
    }
}
