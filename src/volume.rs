//! Backing volumes and the capability seam shared by the fill logic.
//!
//! The flood fill is written once against [`LabelVolume`]: resolve a voxel to
//! a comparable identity, and write a committed label back. Two backings
//! implement it — a scalar label array, and an immutable multiset-encoded
//! block with a paint overlay for committed edits.

use crate::label;
use crate::multiset::EncodedBlock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeError {
    InvalidDims { dims: [i64; 3] },
    DataLengthMismatch { expected: usize, actual: usize },
}

impl fmt::Display for VolumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDims { dims } => {
                write!(f, "volume dimensions must be positive, got {dims:?}")
            }
            Self::DataLengthMismatch { expected, actual } => write!(
                f,
                "label data length mismatch: expected {expected}, got {actual}"
            ),
        }
    }
}

impl std::error::Error for VolumeError {}

/// Linear raster index for an in-bounds position.
#[inline]
pub(crate) fn linear_index(dims: [i64; 3], pos: [i64; 3]) -> usize {
    (pos[0] + dims[0] * (pos[1] + dims[1] * pos[2])) as usize
}

fn in_bounds(dims: [i64; 3], pos: [i64; 3]) -> bool {
    (0..3).all(|axis| pos[axis] >= 0 && pos[axis] < dims[axis])
}

/// A label-valued volume the fill engine can read and a canvas can commit to.
///
/// Reads outside the bounds yield [`label::OUTSIDE`], which never compares
/// equal to a regular seed. The volume is never mutated in place during a
/// fill; writes happen only through canvas commit.
pub trait LabelVolume: Send + Sync {
    fn dims(&self) -> [i64; 3];

    /// Comparable identity of the voxel at `pos`, OUTSIDE when out of bounds.
    fn label_at(&self, pos: [i64; 3]) -> u64;

    /// Write a committed label. Out-of-bounds writes are a no-op.
    fn apply_label(&self, pos: [i64; 3], value: u64);

    fn contains(&self, pos: [i64; 3]) -> bool {
        in_bounds(self.dims(), pos)
    }
}

/// Dense scalar-typed backing: one `u64` label per voxel.
pub struct ScalarVolume {
    dims: [i64; 3],
    data: RwLock<Vec<u64>>,
}

impl ScalarVolume {
    pub fn new(dims: [i64; 3], fill: u64) -> Result<Self, VolumeError> {
        let num_voxels = checked_num_voxels(dims)?;
        Ok(Self {
            dims,
            data: RwLock::new(vec![fill; num_voxels]),
        })
    }

    pub fn from_data(dims: [i64; 3], data: Vec<u64>) -> Result<Self, VolumeError> {
        let num_voxels = checked_num_voxels(dims)?;
        if data.len() != num_voxels {
            return Err(VolumeError::DataLengthMismatch {
                expected: num_voxels,
                actual: data.len(),
            });
        }
        Ok(Self {
            dims,
            data: RwLock::new(data),
        })
    }

    /// Copy of the raw label data, in raster order.
    pub fn snapshot(&self) -> Vec<u64> {
        self.data.read().expect("volume data lock poisoned").clone()
    }
}

impl LabelVolume for ScalarVolume {
    fn dims(&self) -> [i64; 3] {
        self.dims
    }

    fn label_at(&self, pos: [i64; 3]) -> u64 {
        if !in_bounds(self.dims, pos) {
            return label::OUTSIDE;
        }
        let data = self.data.read().expect("volume data lock poisoned");
        data[linear_index(self.dims, pos)]
    }

    fn apply_label(&self, pos: [i64; 3], value: u64) {
        if !in_bounds(self.dims, pos) {
            return;
        }
        let mut data = self.data.write().expect("volume data lock poisoned");
        let index = linear_index(self.dims, pos);
        data[index] = value;
    }
}

/// Multiset-typed backing: an immutable encoded block plus a paint overlay
/// holding committed edits. The overlay shadows the block on reads, so the
/// encoded data is never rewritten.
pub struct MultisetVolume {
    dims: [i64; 3],
    block: EncodedBlock,
    paint: RwLock<HashMap<usize, u64>>,
}

impl MultisetVolume {
    pub fn new(block: EncodedBlock) -> Self {
        let [x, y, z] = block.dims();
        Self {
            dims: [x as i64, y as i64, z as i64],
            block,
            paint: RwLock::new(HashMap::new()),
        }
    }

    pub fn block(&self) -> &EncodedBlock {
        &self.block
    }

    /// The committed paint label at `pos`, if any edit shadows the block.
    pub fn painted_label_at(&self, pos: [i64; 3]) -> Option<u64> {
        if !in_bounds(self.dims, pos) {
            return None;
        }
        let paint = self.paint.read().expect("volume paint lock poisoned");
        paint.get(&linear_index(self.dims, pos)).copied()
    }
}

impl LabelVolume for MultisetVolume {
    fn dims(&self) -> [i64; 3] {
        self.dims
    }

    fn label_at(&self, pos: [i64; 3]) -> u64 {
        if !in_bounds(self.dims, pos) {
            return label::OUTSIDE;
        }
        let index = linear_index(self.dims, pos);
        let paint = self.paint.read().expect("volume paint lock poisoned");
        match paint.get(&index) {
            Some(&painted) => painted,
            None => self.block.display_id_at(index),
        }
    }

    fn apply_label(&self, pos: [i64; 3], value: u64) {
        if !in_bounds(self.dims, pos) {
            return;
        }
        let index = linear_index(self.dims, pos);
        let mut paint = self.paint.write().expect("volume paint lock poisoned");
        paint.insert(index, value);
    }
}

fn checked_num_voxels(dims: [i64; 3]) -> Result<usize, VolumeError> {
    if dims.iter().any(|&d| d <= 0) {
        return Err(VolumeError::InvalidDims { dims });
    }
    dims[0]
        .checked_mul(dims[1])
        .and_then(|v| v.checked_mul(dims[2]))
        .and_then(|v| usize::try_from(v).ok())
        .ok_or(VolumeError::InvalidDims { dims })
}

/// A shared volume handle carrying the per-volume paint lock.
///
/// The lock enforces the single-writer contract: exactly one canvas may be
/// active against a volume, acquired with a non-blocking try-acquire that
/// fails fast instead of queuing.
pub struct VolumeHandle<V: LabelVolume> {
    volume: Arc<V>,
    paint_lock: Arc<AtomicBool>,
}

impl<V: LabelVolume> Clone for VolumeHandle<V> {
    fn clone(&self) -> Self {
        Self {
            volume: self.volume.clone(),
            paint_lock: self.paint_lock.clone(),
        }
    }
}

impl<V: LabelVolume> VolumeHandle<V> {
    pub fn new(volume: V) -> Self {
        Self::from_arc(Arc::new(volume))
    }

    pub fn from_arc(volume: Arc<V>) -> Self {
        Self {
            volume,
            paint_lock: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn volume(&self) -> &Arc<V> {
        &self.volume
    }

    pub(crate) fn try_acquire_paint_lock(&self) -> bool {
        self.paint_lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub(crate) fn release_paint_lock(&self) {
        self.paint_lock.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_volume_reads_outside_as_sentinel() {
        let volume = ScalarVolume::new([2, 2, 1], 5).expect("volume must build");
        assert_eq!(volume.label_at([0, 0, 0]), 5);
        assert_eq!(volume.label_at([-1, 0, 0]), label::OUTSIDE);
        assert_eq!(volume.label_at([0, 2, 0]), label::OUTSIDE);
    }

    #[test]
    fn scalar_volume_rejects_bad_data_length() {
        let error = ScalarVolume::from_data([2, 2, 1], vec![0; 3])
            .err()
            .expect("short data must be rejected");
        assert_eq!(
            error,
            VolumeError::DataLengthMismatch {
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn out_of_bounds_write_is_a_no_op() {
        let volume = ScalarVolume::new([2, 2, 1], 0).expect("volume must build");
        volume.apply_label([5, 0, 0], 9);
        assert!(volume.snapshot().iter().all(|&v| v == 0));
    }

    #[test]
    fn multiset_volume_paint_shadows_block() {
        let block = EncodedBlock::decode_block(Some(&[1, 1, 2, 2]), [4, 1, 1]);
        let volume = MultisetVolume::new(block);
        assert_eq!(volume.label_at([0, 0, 0]), 1);
        volume.apply_label([0, 0, 0], 9);
        assert_eq!(volume.label_at([0, 0, 0]), 9);
        assert_eq!(volume.painted_label_at([0, 0, 0]), Some(9));
        assert_eq!(volume.label_at([1, 0, 0]), 1);
    }

    #[test]
    fn paint_lock_is_exclusive_and_releasable() {
        let handle = VolumeHandle::new(ScalarVolume::new([1, 1, 1], 0).expect("volume must build"));
        assert!(handle.try_acquire_paint_lock());
        assert!(!handle.try_acquire_paint_lock());
        handle.release_paint_lock();
        assert!(handle.try_acquire_paint_lock());
    }
}
