use lnstore_core::{Value, Walk};
use lnstore_storage::{unflatten, AddInput, GetOptions, MemoryStore, PagedStore, Query, Record};
use lnstore_test_utils::{assertions, fixtures, generators, CountingStore};
use proptest::prelude::*;
use std::collections::BTreeMap;

type Paged = PagedStore<CountingStore<MemoryStore>>;

fn records(dataset: &BTreeMap<Walk, Value>) -> Vec<Record> {
    dataset
        .iter()
        .map(|(walk, value)| Record::new(walk.clone(), value.clone()))
        .collect()
}

/// Store in one of four cache states over the same data.
fn loaded(dataset: &BTreeMap<Walk, Value>, state: &str, depth: usize) -> Paged {
    let p = fixtures::memory_paged("equiv", depth);
    p.add_multi(AddInput::Matrix(records(dataset))).unwrap();
    match state {
        "cold" => p.flush_cache().unwrap(),
        "warm" => {}
        "hot" => {
            p.get_walk(&[], &GetOptions::default()).unwrap();
        }
        "partial" => {
            p.flush_cache().unwrap();
            if let Some(walk) = dataset.keys().next() {
                p.get_walk(&walk[..1], &GetOptions::default()).unwrap();
                p.get_leaf(dataset.keys().last().unwrap_or(walk)).unwrap();
            }
        }
        other => panic!("unknown cache state {}", other),
    }
    p.store().reset();
    p
}

#[test]
fn trie_and_matrix_batches_end_in_same_state() {
    let by_trie = fixtures::memory_paged("by_trie", 3);
    let by_matrix = fixtures::memory_paged("by_trie", 3);
    let data = fixtures::nineteen_leaves();

    assert_eq!(by_trie.add_multi(AddInput::Trie(data.clone())).unwrap(), 19);
    assert_eq!(
        by_matrix
            .add_multi(AddInput::Matrix(fixtures::matrix_of(&data)))
            .unwrap(),
        19
    );
    assertions::assert_same_rows(
        by_trie.store().inner(),
        by_matrix.store().inner(),
        by_trie.descriptor(),
    );
    assert_eq!(by_trie.cache_stats().unwrap(), by_matrix.cache_stats().unwrap());
}

#[test]
fn hot_reads_skip_the_store() {
    let data = fixtures::matrix_of(&fixtures::eleven_leaves());
    let dataset: BTreeMap<Walk, Value> = data
        .into_iter()
        .map(|r| (r.keys, r.value.unwrap_or_default()))
        .collect();
    let query = Query::Matrix(vec![vec![1.into()], vec![2.into(), "outro".into()]]);

    let cold = loaded(&dataset, "cold", 3);
    cold.get_multi(query.clone(), &GetOptions::default()).unwrap();
    assert_eq!(cold.store().selects(), 2);

    let warm = loaded(&dataset, "warm", 3);
    warm.get_multi(query.clone(), &GetOptions::default()).unwrap();
    assert_eq!(warm.store().selects(), 2);
    warm.store().reset();
    warm.get_multi(query.clone(), &GetOptions::default()).unwrap();
    assert_eq!(warm.store().selects(), 0);

    let hot = loaded(&dataset, "hot", 3);
    hot.get_multi(query, &GetOptions::default()).unwrap();
    assert_eq!(hot.store().selects(), 0);
    let stats = hot.cache_stats().unwrap();
    assert_eq!(stats.complete_branches, 1);
    assert!(stats.hits >= 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Nested and flat forms of one dataset leave identical store and cache
    /// state.
    #[test]
    fn prop_trie_matrix_equivalence(
        dataset in generators::arb_dataset(&fixtures::descriptor("t", 4), 24)
    ) {
        let rows = records(&dataset);
        let trie = unflatten(&rows).unwrap();

        let by_trie = fixtures::memory_paged("prop_equiv", 4);
        let by_matrix = fixtures::memory_paged("prop_equiv", 4);
        let n = dataset.len() as u64;
        prop_assert_eq!(by_trie.add_multi(AddInput::Trie(trie)).unwrap(), n);
        prop_assert_eq!(by_matrix.add_multi(AddInput::Matrix(rows.clone())).unwrap(), n);

        let left = by_trie.store().dump(by_trie.descriptor()).unwrap();
        let right = by_matrix.store().dump(by_matrix.descriptor()).unwrap();
        prop_assert_eq!(&left, &rows);
        prop_assert_eq!(left, right);
        prop_assert_eq!(by_trie.cache_stats().unwrap(), by_matrix.cache_stats().unwrap());
    }

    /// The cache state before a read never changes what the read returns.
    #[test]
    fn prop_cold_warm_hot_equivalence(
        dataset in generators::arb_dataset(&fixtures::descriptor("t", 3), 16),
        walks in generators::arb_request_walks(&fixtures::descriptor("t", 3)),
        matrix in any::<bool>(),
    ) {
        let opts = if matrix { GetOptions::matrix() } else { GetOptions::default() };
        let query = Query::Matrix(walks);

        let results: Vec<_> = ["cold", "warm", "hot", "partial"]
            .iter()
            .map(|state| {
                let p = loaded(&dataset, state, 3);
                let first = p.get_multi(query.clone(), &opts).unwrap();
                let second = p.get_multi(query.clone(), &opts).unwrap();
                (first, second)
            })
            .collect();

        for (first, second) in &results {
            prop_assert_eq!(first, second);
            prop_assert_eq!(first, &results[0].0);
        }
    }

    /// Trie requests with existence checks read the same in every cache
    /// state.
    #[test]
    fn prop_trie_requests_cold_warm_hot(
        dataset in generators::arb_dataset(&fixtures::descriptor("t", 3), 16),
        request in generators::arb_request(&fixtures::descriptor("t", 3)),
        mode in 0u8..3,
    ) {
        let opts = match mode {
            0 => GetOptions::default(),
            1 => GetOptions::matrix(),
            _ => GetOptions::named(),
        };
        let query = Query::Trie(request);

        let results: Vec<_> = ["cold", "warm", "hot", "partial"]
            .iter()
            .map(|state| {
                let p = loaded(&dataset, state, 3);
                let first = p.get_multi(query.clone(), &opts).unwrap();
                let second = p.get_multi(query.clone(), &opts).unwrap();
                (first, second)
            })
            .collect();

        for (first, second) in &results {
            prop_assert_eq!(first, second);
            prop_assert_eq!(first, &results[0].0);
        }
    }

    /// Drops leave the cache and the store agreeing on what exists.
    #[test]
    fn prop_drop_keeps_cache_consistent(
        dataset in generators::arb_dataset(&fixtures::descriptor("t", 3), 16),
        walks in generators::arb_request_walks(&fixtures::descriptor("t", 3)),
    ) {
        let p = loaded(&dataset, "hot", 3);
        for walk in &walks {
            p.drop_walk(walk).unwrap();
        }
        let hot = p.get_walk(&[], &GetOptions::matrix()).unwrap();
        p.flush_cache().unwrap();
        let cold = p.get_walk(&[], &GetOptions::matrix()).unwrap();
        prop_assert_eq!(hot, cold);
    }
}
