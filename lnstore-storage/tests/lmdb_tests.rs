use lnstore_core::{walk, Key, StoreConfig, Value};
use lnstore_storage::{
    AddInput, GetOptions, LmdbStore, MemoryStore, Output, PagedStore, Query, Trie,
};
use lnstore_test_utils::{assertions, fixtures, init_tracing, CountingStore};
use std::sync::Arc;
use tempfile::TempDir;

fn config_for(dir: &TempDir) -> StoreConfig {
    let source = format!(
        r#"
        table = "documents"

        [[levels]]
        name = "doc"
        key_type = "int"
        flags = ["unsigned"]

        [[levels]]
        name = "section"
        key_type = "str"
        storage = "VARCHAR(32)"
        pattern = "^[a-z]+$"

        [[levels]]
        name = "line"
        key_type = "int"

        [lmdb]
        path = "{}"
        map_size_mb = 16
        "#,
        dir.path().join("env").display()
    );
    StoreConfig::from_toml_str(&source).unwrap()
}

fn open(config: &StoreConfig) -> PagedStore<CountingStore<LmdbStore>> {
    let lmdb = LmdbStore::from_config(config.lmdb.as_ref().unwrap()).unwrap();
    PagedStore::from_config(Arc::new(CountingStore::new(lmdb)), config).unwrap()
}

#[test]
fn lmdb_eleven_leaf_scenario_survives_reopen() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir);
    let data = fixtures::eleven_leaves();

    let cold = {
        let p = open(&config);
        p.install().unwrap();
        assert_eq!(p.add_multi(AddInput::Trie(data.clone())).unwrap(), 11);
        p.flush_cache().unwrap();
        let fetched = p
            .get_multi(Query::Matrix(vec![walk![1], walk![2]]), &GetOptions::default())
            .unwrap();
        assert!(fetched.all_found);
        assert_eq!(fetched.data, Output::Trie(data.clone()));
        fetched
    };

    let p = open(&config);
    let reopened = p
        .get_multi(Query::Matrix(vec![walk![1], walk![2]]), &GetOptions::default())
        .unwrap();
    assert_eq!(reopened, cold);
    assertions::assert_duplicate_key(&p.add_leaf(walk![2, "outro", 1], 0));
}

#[test]
fn lmdb_drop_global_and_replace() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir);
    let p = open(&config);
    p.install().unwrap();
    p.add_multi(AddInput::Trie(fixtures::nineteen_leaves())).unwrap();

    assert_eq!(p.drop_global(2, &[Key::from("shared")]).unwrap(), 14);
    let rows = p.store().dump(p.descriptor()).unwrap();
    assert_eq!(rows.len(), 5);

    let body = Trie::branch()
        .with(1, Trie::value("replaced"));
    assert_eq!(p.replace_at(walk![3, "misc"], body).unwrap(), 1);
    p.flush_cache().unwrap();
    assert_eq!(
        p.get_leaf(&walk![3, "misc", 1]).unwrap(),
        Some(Value::from("replaced"))
    );
    assert_eq!(p.get_leaf(&walk![3, "misc", 2]).unwrap(), None);
    assert_eq!(p.store().dump(p.descriptor()).unwrap().len(), 4);
}

#[test]
fn lmdb_and_memory_agree() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir);
    let on_disk = open(&config);
    on_disk.install().unwrap();
    let in_memory = PagedStore::from_config(Arc::new(MemoryStore::new()), &config).unwrap();
    in_memory.install().unwrap();

    let data = fixtures::nineteen_leaves();
    assert_eq!(on_disk.add_multi(AddInput::Trie(data.clone())).unwrap(), 19);
    assert_eq!(in_memory.add_multi(AddInput::Trie(data)).unwrap(), 19);
    on_disk.drop_walk(&walk![2]).unwrap();
    in_memory.drop_walk(&walk![2]).unwrap();
    assertions::assert_same_rows(
        on_disk.store().inner(),
        in_memory.store().as_ref(),
        on_disk.descriptor(),
    );
}

#[test]
fn config_controls_key_validation() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir);
    let p = PagedStore::from_config(Arc::new(MemoryStore::new()), &config).unwrap();
    p.install().unwrap();

    // Unsigned doc level, lowercase-only sections.
    assert!(p.add_leaf(walk![-1, "intro", 1], 1).is_err());
    assert!(p.add_leaf(walk![1, "Intro", 1], 1).is_err());
    assert!(p.add_leaf(walk![1, "intro", 1], 1).is_ok());

    let mut relaxed = config.clone();
    relaxed.validate = false;
    let loose = PagedStore::from_config(Arc::new(MemoryStore::new()), &relaxed).unwrap();
    loose.install().unwrap();
    assert!(loose.add_leaf(walk![1, "Intro", 1], 1).is_ok());
}

#[test]
fn uninstalled_store_reports_not_installed() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir);
    let p = open(&config);
    let err = p.add_leaf(walk![1, "a", 1], 1).unwrap_err();
    assert!(matches!(
        err,
        lnstore_core::LnError::Store(lnstore_core::StoreError::NotInstalled { .. })
    ));
    p.install().unwrap();
    p.add_leaf(walk![1, "a", 1], 1).unwrap();
    p.uninstall().unwrap();
    assert!(p.get_leaf(&walk![1, "a", 1]).is_err());
}
