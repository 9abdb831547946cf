mod helpers;

use helpers::{memory, test_store};
use mnema::error::Error;
use mnema::memory::types::Relation;
use mnema::store::MemoryFilter;
use tempfile::tempdir;

#[test]
fn write_then_read_field_for_field() {
    let dir = tempdir().unwrap();
    let store = test_store(dir.path());

    let mut m = memory("m-1", "I prefer TypeScript", 1_736_275_200);
    m.tags = vec!["preferences".into(), "typescript".into()];
    m.entities = vec!["TypeScript".into()];
    m.source = Some("conversation".into());
    m.strength = 1.2;
    store.put_memory(m.clone()).unwrap();

    let loaded = store.get_memory("m-1").unwrap();
    assert_eq!(loaded.content, m.content);
    assert_eq!(loaded.tags, m.tags);
    assert_eq!(loaded.entities, m.entities);
    assert_eq!(loaded.source, m.source);
    assert_eq!(loaded.created_at, m.created_at);
    assert_eq!(loaded.last_used, m.last_used);
    assert_eq!(loaded.use_count, m.use_count);
    assert_eq!(loaded.strength, m.strength);
}

#[test]
fn unknown_fields_survive_persistence_and_compaction() {
    let dir = tempdir().unwrap();
    {
        let store = test_store(dir.path());
        let mut m = memory("m-1", "forward compatible", 100);
        m.extra
            .insert("future_field".into(), serde_json::json!({"nested": [1, 2]}));
        store.put_memory(m).unwrap();
        store.compact().unwrap();
    }

    let store = test_store(dir.path());
    let loaded = store.get_memory("m-1").unwrap();
    assert_eq!(loaded.extra["future_field"], serde_json::json!({"nested": [1, 2]}));
}

#[test]
fn supersession_last_line_wins_across_reload() {
    let dir = tempdir().unwrap();
    {
        let store = test_store(dir.path());
        store.put_memory(memory("m-1", "first", 100)).unwrap();
        let mut updated = memory("m-1", "second", 100);
        updated.use_count = 5;
        store.put_memory(updated).unwrap();
    }

    let store = test_store(dir.path());
    let loaded = store.get_memory("m-1").unwrap();
    assert_eq!(loaded.content, "second");
    assert_eq!(loaded.use_count, 5);
    assert_eq!(store.count_memories(None), 1);
}

#[test]
fn tombstone_then_get_is_not_found() {
    let dir = tempdir().unwrap();
    let store = test_store(dir.path());

    store.put_memory(memory("m-x", "doomed", 100)).unwrap();
    store.put_memory(memory("m-x", "still doomed", 150)).unwrap();
    store.delete_memory("m-x", 200).unwrap();

    assert!(matches!(store.get_memory("m-x"), Err(Error::NotFound(_))));

    // A put after the tombstone resurrects the id (latest line wins).
    store.put_memory(memory("m-x", "reborn", 300)).unwrap();
    assert_eq!(store.get_memory("m-x").unwrap().content, "reborn");
}

#[test]
fn compact_preserves_records_and_relations() {
    let dir = tempdir().unwrap();
    let store = test_store(dir.path());

    store.put_memory(memory("m-a", "alpha", 100)).unwrap();
    store.put_memory(memory("m-b", "beta", 100)).unwrap();
    store
        .put_relation(Relation::new("m-a", "m-b", "supports", 120))
        .unwrap();
    store.put_memory(memory("m-c", "temp", 100)).unwrap();
    store.delete_memory("m-c", 130).unwrap();

    store.compact().unwrap();

    assert_eq!(store.count_memories(None), 2);
    assert_eq!(store.all_relations().len(), 1);
    assert!(store.get_memory("m-c").is_err());

    // Same state again after reopening the compacted files.
    drop(store);
    let store = test_store(dir.path());
    assert_eq!(store.count_memories(None), 2);
    assert_eq!(store.all_relations().len(), 1);
    let stats = store.stats(0.3, 10.0);
    assert_eq!(stats.tombstone_lines, 0);
}

#[test]
fn tag_filters_any_and_all() {
    let dir = tempdir().unwrap();
    let store = test_store(dir.path());

    let mut a = memory("m-a", "a", 100);
    a.tags = vec!["rust".into(), "db".into()];
    let mut b = memory("m-b", "b", 100);
    b.tags = vec!["rust".into()];
    let mut c = memory("m-c", "c", 100);
    c.tags = vec!["python".into()];
    for m in [a, b, c] {
        store.put_memory(m).unwrap();
    }

    let any = store.list_memories(&MemoryFilter {
        tags_any: vec!["rust".into(), "python".into()],
        ..Default::default()
    });
    assert_eq!(any.len(), 3);

    let all = store.list_memories(&MemoryFilter {
        tags_all: vec!["rust".into(), "db".into()],
        ..Default::default()
    });
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, "m-a");
}

#[test]
fn cascade_delete_keeps_relation_invariant() {
    let dir = tempdir().unwrap();
    let store = test_store(dir.path());

    store.put_memory(memory("m-a", "a", 100)).unwrap();
    store.put_memory(memory("m-b", "b", 100)).unwrap();
    store.put_memory(memory("m-c", "c", 100)).unwrap();
    store
        .put_relation(Relation::new("m-a", "m-b", "related", 110))
        .unwrap();
    store
        .put_relation(Relation::new("m-b", "m-c", "related", 110))
        .unwrap();

    store.delete_memory("m-b", 200).unwrap();

    // Both relations touched m-b; both are gone, across a reload too.
    assert!(store.all_relations().is_empty());
    drop(store);
    let store = test_store(dir.path());
    assert!(store.all_relations().is_empty());
}
