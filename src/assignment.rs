//! Fragment-to-segment assignment.
//!
//! Fine-grained fragment ids group into the coarser segments an operator sees.
//! The mapping is a total function: a fragment with no explicit merge maps to
//! itself. Reads are concurrent-safe; mutation happens only through the
//! explicit merge/detach operations here.

use crate::label;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// The assignment has no durable backend configured.
    Unsupported,
    /// The external store rejected or failed the write.
    Backend { reason: String },
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => write!(f, "assignment has no persistable backend"),
            Self::Backend { reason } => write!(f, "persisting assignment failed: {reason}"),
        }
    }
}

impl std::error::Error for PersistenceError {}

/// Durable-storage collaborator for the assignment table.
///
/// Failures must be surfaced to the operator, never swallowed: silent loss of
/// assignment state corrupts future sessions.
pub trait AssignmentPersister: Send + Sync {
    fn persist(&self, mapping: &HashMap<u64, u64>) -> Result<(), PersistenceError>;
}

/// Local-only configuration: every persist attempt fails explicitly.
pub struct TransientPersister;

impl AssignmentPersister for TransientPersister {
    fn persist(&self, _mapping: &HashMap<u64, u64>) -> Result<(), PersistenceError> {
        Err(PersistenceError::Unsupported)
    }
}

pub struct FragmentSegmentAssignment {
    mapping: RwLock<HashMap<u64, u64>>,
    persister: Box<dyn AssignmentPersister>,
}

impl FragmentSegmentAssignment {
    pub fn new(persister: Box<dyn AssignmentPersister>) -> Self {
        Self {
            mapping: RwLock::new(HashMap::new()),
            persister,
        }
    }

    /// An assignment without durable storage; `persist()` always errors.
    pub fn local_only() -> Self {
        Self::new(Box::new(TransientPersister))
    }

    pub fn with_mapping(
        persister: Box<dyn AssignmentPersister>,
        mapping: HashMap<u64, u64>,
    ) -> Self {
        Self {
            mapping: RwLock::new(mapping),
            persister,
        }
    }

    /// The segment a fragment belongs to. Never fails: an unmapped fragment
    /// (including any sentinel) is its own segment.
    pub fn get_segment(&self, fragment: u64) -> u64 {
        let mapping = self.mapping.read().expect("assignment lock poisoned");
        mapping.get(&fragment).copied().unwrap_or(fragment)
    }

    /// Assign `fragment` to `segment`, overwriting any prior mapping.
    /// Non-regular ids are refused.
    pub fn merge(&self, fragment: u64, segment: u64) {
        if !label::is_regular(fragment) || !label::is_regular(segment) {
            log::warn!("refusing to merge irregular ids: fragment={fragment} segment={segment}");
            return;
        }
        let mut mapping = self.mapping.write().expect("assignment lock poisoned");
        if fragment == segment {
            // Self-mapping is the implicit default; keep the table minimal.
            mapping.remove(&fragment);
        } else {
            mapping.insert(fragment, segment);
        }
    }

    /// Remove the explicit mapping for `fragment`, restoring self-mapping.
    pub fn detach(&self, fragment: u64) {
        if !label::is_regular(fragment) {
            log::warn!("refusing to detach irregular id {fragment}");
            return;
        }
        let mut mapping = self.mapping.write().expect("assignment lock poisoned");
        mapping.remove(&fragment);
    }

    /// Inverse lookup, derived on demand: all fragments mapping to `segment`,
    /// including `segment` itself when it is not merged elsewhere.
    pub fn fragments_of(&self, segment: u64) -> BTreeSet<u64> {
        let mapping = self.mapping.read().expect("assignment lock poisoned");
        let mut fragments: BTreeSet<u64> = mapping
            .iter()
            .filter(|(_, &s)| s == segment)
            .map(|(&f, _)| f)
            .collect();
        if mapping.get(&segment).copied().unwrap_or(segment) == segment {
            fragments.insert(segment);
        }
        fragments
    }

    /// Copy of the explicit mapping table.
    pub fn snapshot(&self) -> HashMap<u64, u64> {
        self.mapping.read().expect("assignment lock poisoned").clone()
    }

    /// Flush the table to durable storage. Until this succeeds, in-memory
    /// state is the source of truth.
    pub fn persist(&self) -> Result<(), PersistenceError> {
        let snapshot = self.snapshot();
        self.persister.persist(&snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label;
    use std::sync::Mutex;

    #[test]
    fn unmapped_fragment_is_its_own_segment() {
        let assignment = FragmentSegmentAssignment::local_only();
        assert_eq!(assignment.get_segment(42), 42);
        assert_eq!(assignment.get_segment(0), 0);
    }

    #[test]
    fn merge_then_detach_round_trip() {
        let assignment = FragmentSegmentAssignment::local_only();
        assignment.merge(7, 100);
        assert_eq!(assignment.get_segment(7), 100);
        assignment.detach(7);
        assert_eq!(assignment.get_segment(7), 7);
    }

    #[test]
    fn merge_overwrites_prior_mapping() {
        let assignment = FragmentSegmentAssignment::local_only();
        assignment.merge(7, 100);
        assignment.merge(7, 200);
        assert_eq!(assignment.get_segment(7), 200);
    }

    #[test]
    fn self_merge_clears_explicit_mapping() {
        let assignment = FragmentSegmentAssignment::local_only();
        assignment.merge(7, 100);
        assignment.merge(7, 7);
        assert_eq!(assignment.get_segment(7), 7);
        assert!(assignment.snapshot().is_empty());
    }

    #[test]
    fn irregular_ids_are_refused() {
        let assignment = FragmentSegmentAssignment::local_only();
        assignment.merge(label::TRANSPARENT, 5);
        assignment.merge(5, label::OUTSIDE);
        assert!(assignment.snapshot().is_empty());
        assert_eq!(assignment.get_segment(label::TRANSPARENT), label::TRANSPARENT);
    }

    #[test]
    fn fragments_of_derives_inverse() {
        let assignment = FragmentSegmentAssignment::local_only();
        assignment.merge(1, 10);
        assignment.merge(2, 10);
        assignment.merge(10, 99);

        let fragments = assignment.fragments_of(10);
        assert_eq!(fragments.into_iter().collect::<Vec<_>>(), vec![1, 2]);

        let fragments = assignment.fragments_of(99);
        assert_eq!(fragments.into_iter().collect::<Vec<_>>(), vec![10, 99]);
    }

    #[test]
    fn local_only_persist_surfaces_error() {
        let assignment = FragmentSegmentAssignment::local_only();
        assert_eq!(assignment.persist(), Err(PersistenceError::Unsupported));
    }

    struct RecordingPersister {
        stored: std::sync::Arc<Mutex<Option<HashMap<u64, u64>>>>,
    }

    impl AssignmentPersister for RecordingPersister {
        fn persist(&self, mapping: &HashMap<u64, u64>) -> Result<(), PersistenceError> {
            *self.stored.lock().expect("test lock poisoned") = Some(mapping.clone());
            Ok(())
        }
    }

    #[test]
    fn persist_hands_snapshot_to_backend() {
        let stored = std::sync::Arc::new(Mutex::new(None));
        let assignment = FragmentSegmentAssignment::new(Box::new(RecordingPersister {
            stored: stored.clone(),
        }));
        assignment.merge(3, 30);
        assert_eq!(assignment.persist(), Ok(()));

        let written = stored.lock().expect("test lock poisoned").clone();
        assert_eq!(written, Some(HashMap::from([(3, 30)])));
    }
}
