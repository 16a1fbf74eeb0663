use super::*;
use crate::label;

#[derive(Clone, Copy)]
struct TestRng {
    state: u64,
}

impl TestRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.state >> 32) as u32
    }
}

#[test]
fn from_entries_merges_duplicate_ids() {
    let multiset = LabelMultiset::from_entries([
        LabelEntry { id: 5, count: 2 },
        LabelEntry { id: 3, count: 1 },
        LabelEntry { id: 5, count: 4 },
    ])
    .expect("multiset must build");
    assert_eq!(multiset.count_of(5), 6);
    assert_eq!(multiset.count_of(3), 1);
    assert_eq!(multiset.total_count(), 7);
    // Entries stay sorted by id.
    let ids: Vec<u64> = multiset.entries().iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![3, 5]);
}

#[test]
fn empty_and_zero_count_multisets_are_rejected() {
    assert_eq!(
        LabelMultiset::from_entries(std::iter::empty()),
        Err(MultisetError::Empty)
    );
    assert_eq!(
        LabelMultiset::from_entries([LabelEntry { id: 4, count: 0 }]),
        Err(MultisetError::ZeroCount { id: 4 })
    );
}

#[test]
fn most_significant_id_breaks_ties_toward_smaller_id() {
    // Both insertion orders must give the same deterministic answer.
    let forward = LabelMultiset::from_entries([
        LabelEntry { id: 5, count: 3 },
        LabelEntry { id: 7, count: 3 },
    ])
    .expect("multiset must build");
    let reverse = LabelMultiset::from_entries([
        LabelEntry { id: 7, count: 3 },
        LabelEntry { id: 5, count: 3 },
    ])
    .expect("multiset must build");
    assert_eq!(forward.most_significant_id(), 5);
    assert_eq!(reverse.most_significant_id(), 5);
}

#[test]
fn most_significant_id_prefers_larger_count() {
    let multiset = LabelMultiset::from_entries([
        LabelEntry { id: 2, count: 1 },
        LabelEntry { id: 9, count: 4 },
    ])
    .expect("multiset must build");
    assert_eq!(multiset.most_significant_id(), 9);
}

#[test]
fn entry_layout_is_id_before_count_little_endian() {
    let multiset = LabelMultiset::singleton(0x0102030405060708);
    let mut bytes = Vec::new();
    multiset.encode_into(&mut bytes);
    assert_eq!(bytes.len(), multiset.serialized_len());
    // Entry count prefix.
    assert_eq!(&bytes[0..4], &1u32.to_le_bytes());
    // Id first, little endian.
    assert_eq!(&bytes[4..12], &0x0102030405060708u64.to_le_bytes());
    // Count second.
    assert_eq!(&bytes[12..16], &1u32.to_le_bytes());
}

#[test]
fn decode_at_rejects_truncated_storage() {
    let multiset = LabelMultiset::from_entries([
        LabelEntry { id: 1, count: 2 },
        LabelEntry { id: 2, count: 3 },
    ])
    .expect("multiset must build");
    let mut bytes = Vec::new();
    multiset.encode_into(&mut bytes);

    let decoded = LabelMultiset::decode_at(&bytes, 0).expect("decode must succeed");
    assert_eq!(decoded, multiset);

    bytes.truncate(bytes.len() - 1);
    assert!(matches!(
        LabelMultiset::decode_at(&bytes, 0),
        Err(MultisetError::TruncatedList { .. })
    ));
    assert!(matches!(
        LabelMultiset::decode_at(&bytes, bytes.len() + 4),
        Err(MultisetError::OffsetOutOfRange { .. })
    ));
}

#[test]
fn decode_block_round_trips_per_voxel_labels() {
    let raw = vec![3, 3, 8, 0, 8, 3];
    let block = EncodedBlock::decode_block(Some(&raw), [3, 2, 1]);
    assert_eq!(block.num_voxels(), 6);
    for (i, &id) in raw.iter().enumerate() {
        let multiset = block.multiset_at(i).expect("voxel must decode");
        assert_eq!(multiset.entries(), &[LabelEntry { id, count: 1 }]);
        assert_eq!(block.display_id_at(i), id);
    }
}

#[test]
fn deduplication_stores_each_distinct_list_once() {
    // Many voxels, few distinct labels: storage depends only on the labels.
    let mut rng = TestRng::new(7);
    let distinct = [0u64, 11, 42];
    let raw: Vec<u64> = (0..4096)
        .map(|_| distinct[(rng.next_u32() % 3) as usize])
        .collect();
    let block = EncodedBlock::decode_block(Some(&raw), [16, 16, 16]);

    assert_eq!(block.distinct_list_count(), distinct.len());
    let singleton_len = LabelMultiset::singleton(0).serialized_len();
    assert_eq!(block.storage_len(), distinct.len() * singleton_len);

    let small = EncodedBlock::decode_block(Some(&[0, 11, 42]), [3, 1, 1]);
    assert_eq!(small.storage_len(), block.storage_len());
}

#[test]
fn degraded_mode_substitutes_zeros() {
    let missing = EncodedBlock::decode_block(None, [2, 2, 1]);
    assert_eq!(missing.num_voxels(), 4);
    for i in 0..4 {
        assert_eq!(missing.display_id_at(i), 0);
    }
    assert_eq!(missing.distinct_list_count(), 1);

    // A short read degrades the same way rather than aborting.
    let short = EncodedBlock::decode_block(Some(&[5, 5]), [2, 2, 1]);
    for i in 0..4 {
        assert_eq!(short.display_id_at(i), 0);
    }
}

#[test]
fn display_id_never_returns_a_regular_id_for_broken_data() {
    let block = EncodedBlock::decode_block(Some(&[1]), [1, 1, 1]);
    // Out-of-range voxel indices surface as INVALID.
    assert_eq!(block.display_id_at(9), label::INVALID);
    assert!(!label::is_regular(block.display_id_at(9)));
}

struct FixedLoader {
    result: Result<Vec<u64>, BlockLoadError>,
}

impl BlockLoader for FixedLoader {
    fn load_block(&self, _key: &BlockKey, _dims: [usize; 3]) -> Result<Vec<u64>, BlockLoadError> {
        self.result.clone()
    }
}

#[test]
fn loader_failures_degrade_to_zero_blocks() {
    let key = BlockKey {
        timepoint: 0,
        level: 2,
        offset: [64, 0, 128],
    };
    let failing = FixedLoader {
        result: Err(BlockLoadError::Unavailable {
            reason: "dataset missing".to_string(),
        }),
    };
    let block = decode_loaded_block(&failing, &key, [2, 1, 1]);
    assert_eq!(block.display_id_at(0), 0);
    assert_eq!(block.display_id_at(1), 0);

    let working = FixedLoader {
        result: Ok(vec![6, 7]),
    };
    let block = decode_loaded_block(&working, &key, [2, 1, 1]);
    assert_eq!(block.display_id_at(0), 6);
    assert_eq!(block.display_id_at(1), 7);
}
