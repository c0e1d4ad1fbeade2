//! Cursor codec integration tests.
//!
//! Freeze/thaw across every variant family, nested compositions,
//! account-tag enforcement, and the dateline text form.

use std::sync::Arc;

use quiver::cursor;
use quiver::error::Advance;
use quiver::iter::{
    AndIterator, BoxedIter, Budget, Direction, FixedIterator, IdIterator, IndexIterator,
    IndexSource, OrIterator, VipIterator,
};
use quiver::store::{HashKind, Linkage, MemStore, PrimitiveData, PrimitiveStore};
use quiver::{Datatype, Dateline, GraphError, Id, Store};

fn drain(it: &mut dyn IdIterator) -> Vec<u64> {
    let mut budget = Budget::unlimited();
    let mut out = Vec::new();
    while let Advance::Id(id) = it.next_id(&mut budget).expect("next") {
        out.push(id.raw());
    }
    out
}

fn advance(it: &mut dyn IdIterator, n: usize) -> Vec<u64> {
    let mut budget = Budget::unlimited();
    let mut out = Vec::new();
    for _ in 0..n {
        match it.next_id(&mut budget).expect("next") {
            Advance::Id(id) => out.push(id.raw()),
            Advance::End => break,
            Advance::Suspend => {}
        }
    }
    out
}

fn seeded() -> Store {
    let store = MemStore::new();
    for value in ["ant", "bee ant", "cow", "bee"] {
        store
            .primitive_alloc(PrimitiveData {
                value: Some(value.into()),
                datatype: Datatype::String,
                live: true,
                ..PrimitiveData::default()
            })
            .expect("alloc");
    }
    Arc::new(store)
}

#[test]
fn test_word_iterator_round_trip() {
    let store = seeded();
    let mut it = IndexIterator::new(
        &store,
        IndexSource::Word("ant".into()),
        Id::ZERO,
        Id::NONE,
        Direction::Forward,
    );
    assert_eq!(advance(&mut it, 1), vec![0]);
    let frozen = cursor::freeze(&it).expect("freeze");
    let mut thawed = cursor::thaw(&frozen, &store).expect("thaw");
    assert_eq!(drain(thawed.as_mut()), vec![1]);
}

#[test]
fn test_hash_iterator_round_trip() {
    let store = seeded();
    let key = b"bee".to_vec();
    let mut it = IndexIterator::new(
        &store,
        IndexSource::Hash(HashKind::Value, key),
        Id::ZERO,
        Id::NONE,
        Direction::Forward,
    );
    let all = drain(&mut it);
    assert_eq!(all, vec![3]);
    it.reset();
    let frozen = cursor::freeze(&it).expect("freeze");
    let mut thawed = cursor::thaw(&frozen, &store).expect("thaw");
    assert_eq!(drain(thawed.as_mut()), all);
}

#[test]
fn test_vip_round_trip() {
    let store = MemStore::new();
    let target = store.guid_alloc(None).expect("guid");
    store
        .primitive_alloc(PrimitiveData {
            guid: Some(target),
            live: true,
            ..PrimitiveData::default()
        })
        .expect("alloc");
    for _ in 0..3 {
        let mut linkages = [None; 4];
        linkages[Linkage::Scope.index()] = Some(target);
        store
            .primitive_alloc(PrimitiveData {
                linkages,
                live: true,
                ..PrimitiveData::default()
            })
            .expect("alloc");
    }
    let store: Store = Arc::new(store);

    let mut it = VipIterator::new(
        &store,
        Linkage::Scope,
        target,
        None,
        Id::ZERO,
        Id::NONE,
        Direction::Forward,
    );
    assert_eq!(advance(&mut it, 2), vec![1, 2]);
    let frozen = cursor::freeze(&it).expect("freeze");
    let mut thawed = cursor::thaw(&frozen, &store).expect("thaw");
    assert_eq!(drain(thawed.as_mut()), vec![3]);
}

#[test]
fn test_and_of_or_round_trip() {
    let store: Store = Arc::new(MemStore::new());
    let fixed = |raw: &[u64]| -> BoxedIter {
        Box::new(FixedIterator::new(
            raw.iter().map(|r| Id::new(*r)).collect(),
            Direction::Forward,
        ))
    };
    // and(or(a, b), c); the inner union may collapse to a fixed set.
    let inner = OrIterator::create_commit(
        vec![fixed(&[1, 5, 9]), fixed(&[2, 5, 10])],
        Direction::Forward,
        Id::ZERO,
        Id::NONE,
        None,
    )
    .expect("or");
    let mut it = AndIterator::create_commit(
        vec![inner, fixed(&[2, 5, 9, 10, 11])],
        Direction::Forward,
        Id::ZERO,
        Id::NONE,
    )
    .expect("and");

    assert_eq!(advance(it.as_mut(), 2), vec![2, 5]);
    let frozen = cursor::freeze(it.as_ref()).expect("freeze");
    let mut thawed = cursor::thaw(&frozen, &store).expect("thaw");
    assert_eq!(drain(thawed.as_mut()), vec![9, 10]);
}

#[test]
fn test_cursor_slices_are_three() {
    let it = FixedIterator::new(vec![Id::new(3)], Direction::Forward);
    let frozen = cursor::freeze(&it).expect("freeze");
    let (body, _tag) = frozen.rsplit_once('@').expect("tag");
    // set/position/state in fixed order.
    assert_eq!(body.matches('/').count(), 2);
    assert!(body.starts_with("fixed:"));
}

#[test]
fn test_tampered_cursor_rejected() {
    let store: Store = Arc::new(MemStore::new());
    let it = FixedIterator::new(vec![Id::new(3), Id::new(9)], Direction::Forward);
    let frozen = cursor::freeze(&it).expect("freeze");
    // Flip a set byte; the account tag no longer matches.
    let tampered = frozen.replacen('3', "4", 1);
    assert!(matches!(
        cursor::thaw(&tampered, &store),
        Err(GraphError::BadCursor(_))
    ));
}

#[test]
fn test_garbage_cursor_is_lexical_or_bad() {
    let store: Store = Arc::new(MemStore::new());
    for garbage in ["", "@", "zzz@00000000", "fixed:f[0-1]:1:0/0:*/@zz"] {
        let err = cursor::thaw(garbage, &store).expect_err("must fail");
        assert!(matches!(
            err,
            GraphError::BadCursor(_) | GraphError::Lexical { .. }
        ));
    }
}

#[test]
fn test_dateline_wire_format() {
    // "<count>:<dbid>.<serial>[,…]" with dbids strictly ascending.
    let mut d = Dateline::new();
    d.insert(0x1, 0x10);
    d.insert(0xa, 0xff);
    assert_eq!(d.to_string(), "2:1.10,a.ff");
    let parsed = Dateline::parse("2:1.10,a.ff").expect("parse");
    assert_eq!(parsed, d);
    assert!(Dateline::parse("2:a.ff,1.10").is_err());
}

#[test]
fn test_dateline_covers_is_monotone_under_merge() {
    let mut server = Dateline::new();
    server.insert(1, 5);
    let mut client = Dateline::new();
    client.insert(1, 9);
    assert!(!server.covers(&client));
    server.merge(&client);
    assert!(server.covers(&client));
}
