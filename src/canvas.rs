//! Masked scratch canvas staging an in-progress edit.
//!
//! A canvas is acquired against a backing volume, collects speculative writes
//! in a sparse scratch mask while tracking the bounding interval actually
//! touched, and resolves exactly once: commit the masked voxels into the
//! backing, or discard them. The per-volume paint lock guarantees a single
//! active canvas per volume.

use crate::volume::{LabelVolume, VolumeHandle};
use std::collections::HashMap;
use std::fmt;

/// Scratch-mask value marking a voxel as part of the staged region.
pub const FILL_MARKER: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanvasError {
    /// Another canvas is already active on the target volume.
    MaskInUse,
    /// Commit, discard or write on a canvas that is no longer active. A
    /// second terminal transition signals a reuse bug and fails loudly; a
    /// silent no-op could double-apply a fill.
    NotActive {
        operation: &'static str,
        state: &'static str,
    },
}

impl fmt::Display for CanvasError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaskInUse => write!(f, "a canvas is already active on this volume"),
            Self::NotActive { operation, state } => {
                write!(f, "cannot {operation} a {state} canvas")
            }
        }
    }
}

impl std::error::Error for CanvasError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CanvasState {
    Active,
    Committed,
    Discarded,
}

impl CanvasState {
    fn name(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::Discarded => "discarded",
        }
    }
}

/// Axis-aligned bounding interval of the voxels actually touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessInterval {
    pub min: [i64; 3],
    pub max: [i64; 3],
}

impl AccessInterval {
    fn at(pos: [i64; 3]) -> Self {
        Self { min: pos, max: pos }
    }

    fn expand(&mut self, pos: [i64; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(pos[axis]);
            self.max[axis] = self.max[axis].max(pos[axis]);
        }
    }

    pub fn contains(&self, pos: [i64; 3]) -> bool {
        (0..3).all(|axis| pos[axis] >= self.min[axis] && pos[axis] <= self.max[axis])
    }

    pub fn num_voxels(&self) -> u64 {
        (0..3)
            .map(|axis| (self.max[axis] - self.min[axis] + 1) as u64)
            .product()
    }
}

pub struct MaskedCanvas<V: LabelVolume> {
    handle: VolumeHandle<V>,
    fill_value: u64,
    mask: HashMap<[i64; 3], u64>,
    region: Option<AccessInterval>,
    state: CanvasState,
}

impl<V: LabelVolume> MaskedCanvas<V> {
    /// Acquire the volume's paint lock and start an active canvas.
    ///
    /// Fails fast with [`CanvasError::MaskInUse`] while another canvas is
    /// active on the same volume; contending edits are rejected, not queued.
    pub fn acquire(handle: &VolumeHandle<V>, fill_value: u64) -> Result<Self, CanvasError> {
        if !handle.try_acquire_paint_lock() {
            return Err(CanvasError::MaskInUse);
        }
        Ok(Self {
            handle: handle.clone(),
            fill_value,
            mask: HashMap::new(),
            region: None,
            state: CanvasState::Active,
        })
    }

    pub fn fill_value(&self) -> u64 {
        self.fill_value
    }

    /// The bounding interval grown so far, if any voxel was marked.
    pub fn region(&self) -> Option<AccessInterval> {
        self.region
    }

    pub fn is_marked(&self, pos: [i64; 3]) -> bool {
        self.mask.contains_key(&pos)
    }

    pub fn mask_value(&self, pos: [i64; 3]) -> Option<u64> {
        self.mask.get(&pos).copied()
    }

    /// Stage the fill marker at `pos`. Out-of-bounds positions are a no-op;
    /// in-bounds writes grow the accessed interval.
    pub fn mark(&mut self, pos: [i64; 3]) -> Result<(), CanvasError> {
        self.ensure_active("write to")?;
        if !self.handle.volume().contains(pos) {
            return Ok(());
        }
        match &mut self.region {
            Some(region) => region.expand(pos),
            None => self.region = Some(AccessInterval::at(pos)),
        }
        self.mask.insert(pos, FILL_MARKER);
        Ok(())
    }

    /// Commit masked voxels that still pass the foreground predicate.
    ///
    /// Only cells within the accessed interval whose scratch value satisfies
    /// `is_foreground` at commit time are written; the re-check is the only
    /// reconciliation against state that changed mid-fill. Returns the
    /// committed interval.
    pub fn commit_with(
        &mut self,
        is_foreground: impl Fn(u64) -> bool,
    ) -> Result<Option<AccessInterval>, CanvasError> {
        self.ensure_active("commit")?;
        let region = self.region;
        if let Some(region) = &region {
            log::debug!(
                "applying mask for interval {:?}..{:?} with fill value {}",
                region.min,
                region.max,
                self.fill_value
            );
            let volume = self.handle.volume();
            for (pos, value) in &self.mask {
                if region.contains(*pos) && is_foreground(*value) {
                    volume.apply_label(*pos, self.fill_value);
                }
            }
        }
        self.finish(CanvasState::Committed);
        Ok(region)
    }

    /// Commit with the standard fill-marker-equality predicate.
    pub fn commit(&mut self) -> Result<Option<AccessInterval>, CanvasError> {
        self.commit_with(|value| value == FILL_MARKER)
    }

    /// Throw the scratch mask away without touching the backing volume.
    pub fn discard(&mut self) -> Result<(), CanvasError> {
        self.ensure_active("discard")?;
        self.finish(CanvasState::Discarded);
        Ok(())
    }

    fn ensure_active(&self, operation: &'static str) -> Result<(), CanvasError> {
        match self.state {
            CanvasState::Active => Ok(()),
            other => Err(CanvasError::NotActive {
                operation,
                state: other.name(),
            }),
        }
    }

    fn finish(&mut self, terminal: CanvasState) {
        self.mask = HashMap::new();
        self.state = terminal;
        self.handle.release_paint_lock();
    }
}

impl<V: LabelVolume> Drop for MaskedCanvas<V> {
    fn drop(&mut self) {
        // A canvas dropped while active (e.g. a panicking fill task) must not
        // leave the volume locked. The staged edits are lost, never applied.
        if self.state == CanvasState::Active {
            log::warn!("canvas dropped while active; discarding scratch mask");
            self.finish(CanvasState::Discarded);
        }
    }
}
