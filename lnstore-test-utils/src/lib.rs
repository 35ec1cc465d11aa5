//! lnstore Test Utilities
//!
//! Shared test infrastructure for the lnstore workspace:
//! - An instrumented store wrapper that counts round-trips
//! - Proptest generators for keys, values and datasets
//! - Fixtures for the standard multi-level scenarios
//! - Custom assertions for lnstore-specific errors and state

pub use lnstore_core::{
    format_walk, walk, Key, KeyType, LevelDescriptor, LnError, LnResult, StoreError,
    StructureDescriptor, ValidationError, Value, ValueDescriptor, Walk,
};
pub use lnstore_storage::{
    flatten, AddInput, Columns, Filter, FlattenMode, GetOptions, MemoryStore, Mutation,
    MutationSummary, PagedStore, Query, Record, Request, Store, Trie,
};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};

// ============================================================================
// COUNTING STORE
// ============================================================================

/// Store wrapper counting select and apply round-trips.
#[derive(Debug, Default)]
pub struct CountingStore<S> {
    inner: S,
    selects: AtomicU64,
    applies: AtomicU64,
}

impl<S: Store> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            selects: AtomicU64::new(0),
            applies: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn selects(&self) -> u64 {
        self.selects.load(Ordering::SeqCst)
    }

    pub fn applies(&self) -> u64 {
        self.applies.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.selects.store(0, Ordering::SeqCst);
        self.applies.store(0, Ordering::SeqCst);
    }

    /// Every row, in walk order, straight from the wrapped store.
    pub fn dump(&self, desc: &StructureDescriptor) -> LnResult<Vec<Record>> {
        self.inner.select_rows(desc, &Filter::All, Columns::All)
    }
}

impl<S: Store> Store for CountingStore<S> {
    fn install(&self, desc: &StructureDescriptor) -> LnResult<()> {
        self.inner.install(desc)
    }

    fn uninstall(&self, desc: &StructureDescriptor) -> LnResult<()> {
        self.inner.uninstall(desc)
    }

    fn truncate(&self, desc: &StructureDescriptor) -> LnResult<u64> {
        self.inner.truncate(desc)
    }

    fn select_rows(
        &self,
        desc: &StructureDescriptor,
        filter: &Filter,
        columns: Columns,
    ) -> LnResult<Vec<Record>> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        self.inner.select_rows(desc, filter, columns)
    }

    fn apply(
        &self,
        desc: &StructureDescriptor,
        mutations: &[Mutation],
    ) -> LnResult<MutationSummary> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        self.inner.apply(desc, mutations)
    }
}

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a test-writer fmt subscriber honouring `RUST_LOG`. Idempotent.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for lnstore types.

    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    /// Key of the given type from a small domain, so generated walks share
    /// prefixes often.
    pub fn arb_key(key_type: KeyType) -> BoxedStrategy<Key> {
        match key_type {
            KeyType::Int => (0i64..4).prop_map(Key::Int).boxed(),
            KeyType::Str => prop::sample::select(vec!["a", "b", "c", "shared"])
                .prop_map(Key::from)
                .boxed(),
        }
    }

    /// Leaf payload, falsy values included.
    pub fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            (-3i64..100).prop_map(Value::from),
            "[a-z]{0,8}".prop_map(Value::from),
            prop::collection::vec((0i64..10).prop_map(Value::from), 0..3).prop_map(Value::Array),
        ]
    }

    /// Full walk typed after `desc`.
    pub fn arb_walk(desc: &StructureDescriptor) -> BoxedStrategy<Walk> {
        let parts: Vec<BoxedStrategy<Key>> = desc
            .levels()
            .iter()
            .map(|level| arb_key(level.key_type))
            .collect();
        parts.boxed()
    }

    /// A valid dataset: distinct full walks with values.
    pub fn arb_dataset(
        desc: &StructureDescriptor,
        max_leaves: usize,
    ) -> impl Strategy<Value = BTreeMap<Walk, Value>> {
        prop::collection::btree_map(arb_walk(desc), arb_value(), 1..=max_leaves)
    }

    /// Partial walks (1..=N keys) typed after `desc`, for matrix requests.
    pub fn arb_request_walks(desc: &StructureDescriptor) -> impl Strategy<Value = Vec<Walk>> {
        let depth = desc.depth();
        let walk = (arb_walk(desc), 1..=depth).prop_map(|(mut w, len)| {
            w.truncate(len);
            w
        });
        prop::collection::vec(walk, 1..4)
    }

    /// Trie request mixing whole-subtree ends with existence checks.
    /// Existence checks only land above leaf depth.
    pub fn arb_request(desc: &StructureDescriptor) -> impl Strategy<Value = Request> {
        let depth = desc.depth();
        let end = (arb_walk(desc), 1..=depth, any::<bool>()).prop_map(move |(mut w, len, exists)| {
            w.truncate(len);
            (w, exists && len < depth)
        });
        prop::collection::vec(end, 1..5).prop_map(|ends| {
            let mut request = Request::keys();
            for (walk, exists) in &ends {
                let end = if *exists { Request::keys() } else { Request::All };
                graft(&mut request, walk, end);
            }
            request
        })
    }

    fn graft(request: &mut Request, walk: &[Key], end: Request) {
        let Request::Keys(children) = request else {
            return;
        };
        let Some((first, rest)) = walk.split_first() else {
            return;
        };
        if rest.is_empty() {
            if end == Request::All {
                children.insert(first.clone(), end);
            } else {
                children.entry(first.clone()).or_insert(end);
            }
        } else {
            let child = children.entry(first.clone()).or_insert_with(Request::keys);
            graft(child, rest, end);
        }
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built descriptors, datasets and stores.

    use super::*;
    use serde_json::json;

    /// Descriptor with `depth` levels (1..=5), drawn from the bottom of
    /// `region(str) / tenant(int) / doc(int) / section(str) / line(int)`.
    pub fn descriptor(table: &str, depth: usize) -> StructureDescriptor {
        let all = [
            LevelDescriptor::str("region"),
            LevelDescriptor::int("tenant"),
            LevelDescriptor::int("doc"),
            LevelDescriptor::str("section"),
            LevelDescriptor::int("line"),
        ];
        let levels = all[all.len() - depth.clamp(1, all.len())..].to_vec();
        StructureDescriptor::new(table, levels, ValueDescriptor::default())
            .expect("fixture descriptor is valid")
    }

    /// Installed paged store on a counting in-memory store.
    pub fn memory_paged(table: &str, depth: usize) -> PagedStore<CountingStore<MemoryStore>> {
        let store = Arc::new(CountingStore::new(MemoryStore::new()));
        let paged = PagedStore::new(store, descriptor(table, depth));
        paged.install().expect("memory install cannot fail");
        paged.store().reset();
        paged
    }

    fn lines(values: Vec<Value>) -> Trie {
        values
            .into_iter()
            .enumerate()
            .fold(Trie::branch(), |t, (i, v)| t.with(i as i64 + 1, Trie::Value(v)))
    }

    /// 11 leaves under 2 docs (`doc / section / line`).
    pub fn eleven_leaves() -> Trie {
        Trie::branch()
            .with(
                1,
                Trie::branch()
                    .with(
                        "intro",
                        lines(vec![json!("Hello"), json!(null), json!(false)]),
                    )
                    .with(
                        "body",
                        lines(vec![json!(0), json!("text"), json!({"k": [1, 2]}), json!([])]),
                    ),
            )
            .with(
                2,
                Trie::branch()
                    .with("intro", lines(vec![json!("Bye"), json!(true)]))
                    .with("outro", lines(vec![json!(3.5), json!("")])),
            )
    }

    /// 19 leaves under 3 docs; 14 of them sit under section `"shared"`.
    pub fn nineteen_leaves() -> Trie {
        let shared = |n: usize| lines((0..n).map(|i| json!(format!("s{}", i))).collect());
        let other = |n: usize| lines((0..n).map(|i| json!(i)).collect());
        Trie::branch()
            .with(1, Trie::branch().with("shared", shared(5)).with("other", other(2)))
            .with(2, Trie::branch().with("shared", shared(6)).with("misc", other(1)))
            .with(3, Trie::branch().with("shared", shared(3)).with("misc", other(2)))
    }

    /// Matrix form of a dataset trie.
    pub fn matrix_of(trie: &Trie) -> Vec<Record> {
        flatten(trie, FlattenMode::Data)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for lnstore-specific errors and state.

    use super::*;

    #[track_caller]
    pub fn assert_duplicate_key<T: std::fmt::Debug>(result: &LnResult<T>) {
        match result {
            Err(LnError::Validation(ValidationError::DuplicateKey { .. })) => {}
            other => panic!("Expected DuplicateKey, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_malformed_trie<T: std::fmt::Debug>(result: &LnResult<T>) {
        match result {
            Err(LnError::Validation(ValidationError::MalformedTrie { .. })) => {}
            other => panic!("Expected MalformedTrie, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_type_mismatch<T: std::fmt::Debug>(result: &LnResult<T>) {
        match result {
            Err(LnError::Validation(ValidationError::TypeMismatch { .. })) => {}
            other => panic!("Expected TypeMismatch, got: {:?}", other),
        }
    }

    /// Assert two stores hold the same rows for `desc`.
    #[track_caller]
    pub fn assert_same_rows<A: Store, B: Store>(a: &A, b: &B, desc: &StructureDescriptor) {
        let left = a
            .select_rows(desc, &Filter::All, Columns::All)
            .expect("select left");
        let right = b
            .select_rows(desc, &Filter::All, Columns::All)
            .expect("select right");
        assert_eq!(left, right, "Stores diverge for table {}", desc.table());
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_descriptor_depths() {
        for depth in 1..=5 {
            assert_eq!(fixtures::descriptor("t", depth).depth(), depth);
        }
        assert_eq!(fixtures::descriptor("t", 3).columns(), vec!["doc", "section", "line"]);
    }

    #[test]
    fn test_dataset_fixtures() {
        assert_eq!(fixtures::eleven_leaves().leaf_count(), 11);
        let nineteen = fixtures::nineteen_leaves();
        assert_eq!(nineteen.leaf_count(), 19);
        let shared = fixtures::matrix_of(&nineteen)
            .into_iter()
            .filter(|r| r.keys[1] == Key::from("shared"))
            .count();
        assert_eq!(shared, 14);
    }

    #[test]
    fn test_counting_store_counts() {
        let paged = fixtures::memory_paged("counting", 3);
        paged.add_leaf(walk![1, "a", 1], 1).unwrap();
        assert_eq!(paged.store().applies(), 1);
        assert_eq!(paged.store().selects(), 1);
        paged.store().reset();
        assert_eq!(paged.store().selects(), 0);
    }

    #[test]
    fn test_assertions() {
        let dup: LnResult<()> = Err(ValidationError::DuplicateKey {
            walk: "1/2".to_string(),
        }
        .into());
        assertions::assert_duplicate_key(&dup);
        let malformed: LnResult<()> = Err(LnError::malformed(1, "1", "bad"));
        assertions::assert_malformed_trie(&malformed);
    }

    proptest! {
        #[test]
        fn prop_generated_walks_validate(
            walk in generators::arb_walk(&fixtures::descriptor("t", 4))
        ) {
            let desc = fixtures::descriptor("t", 4);
            prop_assert_eq!(walk.len(), 4);
            prop_assert!(desc.validate_walk(&walk).is_ok());
        }
    }
}
