//! Interactive editing primitives for large, label-valued volumetric images.
//!
//! A segmentation volume is too large to hold densely in memory, and its
//! down-sampled levels carry a *multiset* of original labels per coarse voxel.
//! This crate provides the pieces needed to paint fill operations over such a
//! volume without corrupting it:
//!
//! - [`multiset`] — a compact, deduplicated encoding for per-voxel label
//!   multisets, built block by block from raw label arrays.
//! - [`assignment`] — the fragment-to-segment table that groups fine-grained
//!   fragment ids into the segments an operator actually works with.
//! - [`canvas`] — a masked scratch canvas that stages speculative edits over
//!   an immutable backing volume, with transactional commit/discard and
//!   exactly one writer per volume at a time.
//! - [`fill`] — a cancellable, assignment-aware flood fill that grows a
//!   6-connected region on a background task while a watcher task drives
//!   repaints and resolves the canvas.

pub mod assignment;
pub mod canvas;
pub mod commit;
pub mod fill;
pub mod label;
pub mod multiset;
pub mod volume;

pub use assignment::{
    AssignmentPersister, FragmentSegmentAssignment, PersistenceError, TransientPersister,
};
pub use canvas::{AccessInterval, CanvasError, MaskedCanvas, FILL_MARKER};
pub use commit::{commit_changes, CanvasPersister, Commitable};
pub use fill::{FillError, FillHandle, FillOutcome, FloodFill};
pub use multiset::{
    decode_loaded_block, BlockKey, BlockLoadError, BlockLoader, EncodedBlock, LabelEntry,
    LabelMultiset, MultisetError,
};
pub use volume::{LabelVolume, MultisetVolume, ScalarVolume, VolumeError, VolumeHandle};
