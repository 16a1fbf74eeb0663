//! Commit orchestration for durable state.
//!
//! An editing session accumulates two kinds of commitable state: the painted
//! canvas and the fragment-segment assignment table. `commit_changes` persists
//! a selection of them through their external durability hooks, skipping
//! targets the current state does not offer and propagating the first
//! persistence failure.

use crate::assignment::{FragmentSegmentAssignment, PersistenceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commitable {
    Canvas,
    FragmentSegmentAssignments,
}

impl Commitable {
    pub fn all() -> [Commitable; 2] {
        [Self::Canvas, Self::FragmentSegmentAssignments]
    }
}

/// Durability hook for committed canvas data, implemented by the external
/// persistence collaborator.
pub trait CanvasPersister {
    fn persist_canvas(&self) -> Result<(), PersistenceError>;
}

/// Persist the selected commitables.
///
/// A selected target whose collaborator is absent is skipped with a debug
/// log, mirroring a session without painting or without assignments. Failures
/// are returned to the caller, never swallowed.
pub fn commit_changes(
    selection: &[Commitable],
    canvas: Option<&dyn CanvasPersister>,
    assignment: Option<&FragmentSegmentAssignment>,
) -> Result<(), PersistenceError> {
    for commitable in selection {
        match commitable {
            Commitable::Canvas => match canvas {
                Some(canvas) => {
                    log::debug!("persisting canvas");
                    canvas.persist_canvas()?;
                }
                None => log::debug!("no canvas to commit"),
            },
            Commitable::FragmentSegmentAssignments => match assignment {
                Some(assignment) => {
                    log::debug!("persisting fragment-segment assignment");
                    assignment.persist()?;
                }
                None => log::debug!("no assignment to commit"),
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCanvasPersister {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CanvasPersister for CountingCanvasPersister {
        fn persist_canvas(&self) -> Result<(), PersistenceError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                Err(PersistenceError::Backend {
                    reason: "disk full".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn absent_collaborators_are_skipped() {
        assert_eq!(commit_changes(&Commitable::all(), None, None), Ok(()));
    }

    #[test]
    fn selection_controls_what_is_persisted() {
        let canvas = CountingCanvasPersister {
            calls: AtomicUsize::new(0),
            fail: false,
        };
        let assignment = FragmentSegmentAssignment::local_only();

        // Canvas-only selection never touches the (unpersistable) assignment.
        assert_eq!(
            commit_changes(&[Commitable::Canvas], Some(&canvas), Some(&assignment)),
            Ok(())
        );
        assert_eq!(canvas.calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn persistence_failures_propagate() {
        let canvas = CountingCanvasPersister {
            calls: AtomicUsize::new(0),
            fail: true,
        };
        let error = commit_changes(&[Commitable::Canvas], Some(&canvas), None)
            .err()
            .expect("backend failure must surface");
        assert_eq!(
            error,
            PersistenceError::Backend {
                reason: "disk full".to_string()
            }
        );

        let assignment = FragmentSegmentAssignment::local_only();
        let error = commit_changes(
            &[Commitable::FragmentSegmentAssignments],
            None,
            Some(&assignment),
        )
        .err()
        .expect("transient assignment must fail to persist");
        assert_eq!(error, PersistenceError::Unsupported);
    }
}
