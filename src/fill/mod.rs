//! Concurrent, cancellable flood fill.
//!
//! `fill_at` validates the seed, acquires a canvas and launches two
//! background tasks: the fill task grows a 6-connected region into the
//! scratch mask, and a watcher task polls its liveness, signalling repaints
//! while it runs and resolving the canvas (commit or discard) when it ends.
//! The call returns as soon as the tasks are launched; the returned
//! [`FillHandle`] carries the cancellation hook and the eventual outcome.

use crate::assignment::FragmentSegmentAssignment;
use crate::canvas::{AccessInterval, CanvasError, MaskedCanvas};
use crate::label;
use crate::volume::{LabelVolume, VolumeHandle};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;


/// Interval between watcher liveness polls and repaint signals.
pub const WATCHER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Voxels expanded between cancellation-flag observations.
const CANCEL_CHECK_BATCH: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillError {
    /// The seed resolves to a non-regular id; no canvas was acquired and no
    /// task was started.
    InvalidSeed { label: u64, seed: [i64; 3] },
    /// The fill value itself is a reserved sentinel.
    InvalidFillValue { label: u64 },
    /// Another fill is active on the target volume; the new fill is rejected,
    /// not queued.
    ConcurrentEditConflict,
}

impl fmt::Display for FillError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSeed { label, seed } => {
                write!(f, "cannot fill at irregular label {label} (seed {seed:?})")
            }
            Self::InvalidFillValue { label } => {
                write!(f, "cannot fill with irregular label {label}")
            }
            Self::ConcurrentEditConflict => {
                write!(f, "another fill is already active on this volume")
            }
        }
    }
}

impl std::error::Error for FillError {}

/// How a launched fill ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillOutcome {
    /// The mask was committed into the backing volume, restricted to the
    /// accessed interval (`None` when the fill never marked a voxel).
    Committed { region: Option<AccessInterval> },
    /// Cancellation was observed; the canvas was discarded and the backing
    /// volume left untouched.
    Cancelled,
    /// The fill task failed; treated as cancellation-equivalent, the canvas
    /// was discarded.
    Failed,
}

/// Handle to a running fill: the painted label, an interrupt hook, and the
/// outcome once the watcher resolves.
pub struct FillHandle {
    fill_value: u64,
    cancel: Arc<AtomicBool>,
    watcher: thread::JoinHandle<FillOutcome>,
}

impl FillHandle {
    pub fn fill_value(&self) -> u64 {
        self.fill_value
    }

    /// Request cooperative cancellation. The fill task stops expanding within
    /// one batch; already-written mask cells are rolled back by discarding
    /// the whole canvas, not per voxel.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.watcher.is_finished()
    }

    /// Wait for the watcher to resolve the canvas and return the outcome.
    pub fn join(self) -> FillOutcome {
        match self.watcher.join() {
            Ok(outcome) => outcome,
            Err(_) => {
                log::error!("fill watcher task panicked");
                FillOutcome::Failed
            }
        }
    }
}

/// Flood-fill entry point bound to a repaint collaborator.
///
/// The repaint signal is a zero-argument, fire-and-forget notification; the
/// engine makes no assumption about when or whether the listener redraws.
pub struct FloodFill {
    request_repaint: Arc<dyn Fn() + Send + Sync>,
}

impl FloodFill {
    pub fn new(request_repaint: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            request_repaint: Arc::new(request_repaint),
        }
    }

    /// Start a fill at `seed` with `fill_value` over the volume behind
    /// `handle`, resolving voxel identity through `assignment` when supplied.
    ///
    /// Validation happens synchronously before any task starts: an irregular
    /// seed or fill value, or a conflicting active fill, is rejected with no
    /// side effects. On success the fill and watcher tasks are running and
    /// the call returns immediately.
    pub fn fill_at<V: LabelVolume + 'static>(
        &self,
        handle: &VolumeHandle<V>,
        seed: [i64; 3],
        fill_value: u64,
        assignment: Option<Arc<FragmentSegmentAssignment>>,
    ) -> Result<FillHandle, FillError> {
        if !label::is_regular(fill_value) {
            log::info!("received irregular fill label {fill_value}, will not fill");
            return Err(FillError::InvalidFillValue { label: fill_value });
        }

        let raw_seed_label = handle.volume().label_at(seed);
        let seed_label = match &assignment {
            Some(assignment) => assignment.get_segment(raw_seed_label),
            None => raw_seed_label,
        };
        if !label::is_regular(seed_label) {
            log::info!("trying to fill at irregular label {seed_label} ({seed:?}), will not fill");
            return Err(FillError::InvalidSeed {
                label: seed_label,
                seed,
            });
        }

        let canvas = MaskedCanvas::acquire(handle, fill_value).map_err(|error| {
            log::info!("cannot start fill: {error}");
            FillError::ConcurrentEditConflict
        })?;

        log::debug!("filling with label {fill_value} at {seed:?} (seed segment {seed_label})");

        let cancel = Arc::new(AtomicBool::new(false));
        let (canvas_tx, canvas_rx) = mpsc::channel::<(MaskedCanvas<V>, Option<CanvasError>)>();

        let fill_task = {
            let volume = handle.volume().clone();
            let cancel = cancel.clone();
            thread::spawn(move || {
                let mut canvas = canvas;
                let error =
                    expand_region(&*volume, &mut canvas, seed, seed_label, assignment, &cancel)
                        .err();
                if error.is_some() {
                    log::error!("fill task failed while writing the scratch mask");
                }
                // Hand the canvas to the watcher; the channel is the
                // happens-before edge for all mask writes.
                let _ = canvas_tx.send((canvas, error));
            })
        };

        let watcher = {
            let cancel = cancel.clone();
            let request_repaint = self.request_repaint.clone();
            thread::spawn(move || {
                while !fill_task.is_finished() {
                    thread::sleep(WATCHER_POLL_INTERVAL);
                    if fill_task.is_finished() {
                        break;
                    }
                    log::trace!("fill in progress, requesting repaint");
                    (*request_repaint)();
                }
                let _ = fill_task.join();

                let outcome = match canvas_rx.try_recv() {
                    Ok((mut canvas, None)) => {
                        if cancel.load(Ordering::Relaxed) {
                            discard_quietly(&mut canvas);
                            FillOutcome::Cancelled
                        } else {
                            match canvas.commit() {
                                Ok(region) => FillOutcome::Committed { region },
                                Err(error) => {
                                    log::error!("committing fill canvas failed: {error}");
                                    FillOutcome::Failed
                                }
                            }
                        }
                    }
                    Ok((mut canvas, Some(_))) => {
                        discard_quietly(&mut canvas);
                        FillOutcome::Failed
                    }
                    // The fill task panicked before handing the canvas over;
                    // its Drop already discarded the mask and released the
                    // paint lock.
                    Err(_) => {
                        log::error!("fill task ended without handing over its canvas");
                        FillOutcome::Failed
                    }
                };

                (*request_repaint)();
                outcome
            })
        };

        Ok(FillHandle {
            fill_value,
            cancel,
            watcher,
        })
    }
}

/// Grow the 6-connected region from `seed` into the canvas mask.
///
/// A candidate neighbor is accepted when it is in bounds, not yet marked, and
/// its assignment-resolved identity equals the seed's. The cancellation flag
/// is observed between voxel-batch expansions; on cancellation the region is
/// simply left partial for the watcher to discard.
fn expand_region<V: LabelVolume>(
    volume: &V,
    canvas: &mut MaskedCanvas<V>,
    seed: [i64; 3],
    seed_label: u64,
    assignment: Option<Arc<FragmentSegmentAssignment>>,
    cancel: &AtomicBool,
) -> Result<(), CanvasError> {
    let resolve = |raw: u64| match &assignment {
        Some(assignment) => assignment.get_segment(raw),
        None => raw,
    };

    let mut queue = VecDeque::new();
    canvas.mark(seed)?;
    queue.push_back(seed);

    let mut since_cancel_check = 0usize;
    while let Some(pos) = queue.pop_front() {
        since_cancel_check += 1;
        if since_cancel_check >= CANCEL_CHECK_BATCH {
            since_cancel_check = 0;
            if cancel.load(Ordering::Relaxed) {
                log::debug!("fill has been interrupted at {pos:?}");
                return Ok(());
            }
        }

        for neighbor in face_neighbors(pos) {
            if canvas.is_marked(neighbor) || !volume.contains(neighbor) {
                continue;
            }
            if resolve(volume.label_at(neighbor)) == seed_label {
                canvas.mark(neighbor)?;
                queue.push_back(neighbor);
            }
        }
    }
    log::debug!("fill expansion completed");
    Ok(())
}

/// One-radius diamond neighborhood: the six face-adjacent voxels.
fn face_neighbors(pos: [i64; 3]) -> [[i64; 3]; 6] {
    let [x, y, z] = pos;
    [
        [x - 1, y, z],
        [x + 1, y, z],
        [x, y - 1, z],
        [x, y + 1, z],
        [x, y, z - 1],
        [x, y, z + 1],
    ]
}

fn discard_quietly<V: LabelVolume>(canvas: &mut MaskedCanvas<V>) {
    if let Err(error) = canvas.discard() {
        log::error!("discarding fill canvas failed: {error}");
    }
}
