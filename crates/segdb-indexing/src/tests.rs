use regex::Regex;
use segdb_value::{
    IndexKind,
    RecId,
    Scalar,
};

use crate::{
    cursor::Cursor,
    index_key::IndexKeyBytes,
    kv_index::KvIndex,
    store::IndexStore,
    trie_index::TrieIndexBuilder,
};

fn rid(n: u64) -> RecId {
    RecId::new(n)
}

fn build_trie(kind: IndexKind, rows: &[(Vec<Scalar>, RecId)]) -> IndexStore {
    let mut builder = TrieIndexBuilder::new(kind);
    for (values, id) in rows {
        builder.push(IndexKeyBytes::prefix_bytes(values).0, *id);
    }
    IndexStore::Trie(builder.build().expect("build trie"))
}

/// Scenario B: a duplicable index over repeated key values iterates every
/// recId under a shared key, in (key, recId) order.
#[test]
fn duplicate_keys_iterate_every_rec_id() {
    let rows = vec![
        (vec![Scalar::String("a".into())], rid(1)),
        (vec![Scalar::String("a".into())], rid(2)),
        (vec![Scalar::String("b".into())], rid(3)),
    ];
    let store = build_trie(IndexKind::Duplicable, &rows);

    let mut out = Vec::new();
    store
        .search_exact(&IndexKeyBytes::prefix_bytes(&[Scalar::String("a".into())]).0, &mut out)
        .unwrap();
    out.sort();
    assert_eq!(out, vec![rid(1), rid(2)]);

    let forward = store.iter_forward();
    assert_eq!(forward.len(), 3);
    assert_eq!(forward[0].1, rid(1));
    assert_eq!(forward[1].1, rid(2));
    assert_eq!(forward[2].1, rid(3));
}

#[test]
fn unique_index_rejects_duplicate_key_at_build_time() {
    let rows = vec![
        (vec![Scalar::String("a".into())], rid(1)),
        (vec![Scalar::String("a".into())], rid(2)),
    ];
    let mut builder = TrieIndexBuilder::new(IndexKind::Unique);
    for (values, id) in &rows {
        builder.push(IndexKeyBytes::prefix_bytes(values).0, *id);
    }
    assert!(builder.build().is_err());
}

/// Scenario F: regex scan over a trie index matches against the decoded
/// first column and returns every recId under a matching key.
#[test]
fn regex_scan_matches_decoded_string_column() {
    let rows = vec![
        (vec![Scalar::String("alice".into())], rid(1)),
        (vec![Scalar::String("albert".into())], rid(2)),
        (vec![Scalar::String("bob".into())], rid(3)),
    ];
    let store = build_trie(IndexKind::Unique, &rows);
    let pattern = Regex::new("^al").unwrap();
    let matched = store.match_regex(&pattern, 1 << 20).unwrap().expect("within budget");
    let mut ids: Vec<_> = matched.into_iter().collect();
    ids.sort();
    assert_eq!(ids, vec![rid(1), rid(2)]);
}

#[test]
fn regex_scan_returns_none_when_budget_exceeded() {
    let rows = vec![(vec![Scalar::String("alice".into())], rid(1))];
    let store = build_trie(IndexKind::Unique, &rows);
    let pattern = Regex::new("^al").unwrap();
    let matched = store.match_regex(&pattern, 0).unwrap();
    assert!(matched.is_none());
}

#[test]
fn kv_index_enforces_unique_without_mutating_on_conflict() {
    let kv = KvIndex::new(IndexKind::Unique);
    assert!(kv.insert(b"k", rid(1)).unwrap());
    assert!(!kv.insert(b"k", rid(2)).unwrap());
    let mut out = Vec::new();
    kv.search_exact(b"k", &mut out).unwrap();
    assert_eq!(out, vec![rid(1)]);
}

#[test]
fn kv_index_round_trips_through_save_load() {
    let kv = KvIndex::new(IndexKind::Duplicable);
    kv.insert(b"a", rid(1)).unwrap();
    kv.insert(b"a", rid(2)).unwrap();
    kv.insert(b"b", rid(3)).unwrap();

    let mut buf = Vec::new();
    kv.save(&mut buf).unwrap();
    let loaded = KvIndex::load(&buf[..]).unwrap();

    let mut out = Vec::new();
    loaded.search_exact(b"a", &mut out).unwrap();
    out.sort();
    assert_eq!(out, vec![rid(1), rid(2)]);
    assert_eq!(loaded.kind(), IndexKind::Duplicable);
}

#[test]
fn cursor_seek_lower_bound_distinguishes_exact_and_next() {
    let entries = vec![
        (b"b".to_vec(), rid(1)),
        (b"d".to_vec(), rid(2)),
    ];
    let mut cursor = Cursor::new(entries);

    assert_eq!(cursor.seek_lower_bound(b"b"), 0);
    assert_eq!(cursor.current().unwrap().1, rid(1));

    assert_eq!(cursor.seek_lower_bound(b"c"), 1);
    assert_eq!(cursor.current().unwrap().1, rid(2));

    assert_eq!(cursor.seek_lower_bound(b"e"), -1);
    assert!(cursor.current().is_none());
}

#[test]
fn cursor_increment_and_decrement_stay_in_bounds() {
    let entries = vec![
        (b"a".to_vec(), rid(1)),
        (b"b".to_vec(), rid(2)),
        (b"c".to_vec(), rid(3)),
    ];
    let mut cursor = Cursor::new(entries);
    cursor.seek_lower_bound(b"a");
    assert!(cursor.increment());
    assert_eq!(cursor.current().unwrap().1, rid(2));
    assert!(cursor.increment());
    assert_eq!(cursor.current().unwrap().1, rid(3));
    assert!(!cursor.increment());
    assert!(cursor.current().is_none());
}

#[test]
fn cursor_seek_max_prefix_finds_longest_match() {
    let entries = vec![
        (b"ab".to_vec(), rid(1)),
        (b"abc".to_vec(), rid(2)),
    ];
    let mut cursor = Cursor::new(entries);
    assert_eq!(cursor.seek_max_prefix(b"abcd"), 0);
    assert_eq!(cursor.current().unwrap().1, rid(2));
}
