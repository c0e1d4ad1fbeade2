//! End-to-end scenarios: literal inputs, literal outputs.
//!
//! Covers:
//! - Datetime range iteration with cursor resume
//! - OR of singletons, forward and backward
//! - AND with a VIP fan-in
//! - Write-then-read
//! - Commit rollback on injected failure
//! - Ticket ordering and reissue

use std::sync::Arc;
use std::time::{Duration, Instant};

use quiver::cmp::comparator;
use quiver::constraint::{Constraint, GuidFilter, LinkRel};
use quiver::cursor;
use quiver::error::Advance;
use quiver::iter::{
    AllIterator, AndIterator, BinIterator, BoxedIter, Budget, Direction, FixedIterator,
    IdIterator, OrIterator, VipIterator,
};
use quiver::read::{ReadEngine, Value};
use quiver::store::{Linkage, MemStore, PrimitiveData, PrimitiveStore};
use quiver::ticket::{TicketKind, TicketPrinter};
use quiver::write::WriteEngine;
use quiver::{Datatype, GraphError, Id, Store};

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(10)
}

fn drain(it: &mut dyn IdIterator) -> Vec<u64> {
    let mut budget = Budget::unlimited();
    let mut out = Vec::new();
    while let Advance::Id(id) = it.next_id(&mut budget).expect("next") {
        out.push(id.raw());
    }
    out
}

fn value_store(values: &[&str]) -> Store {
    let store = MemStore::new();
    for v in values {
        store
            .primitive_alloc(PrimitiveData {
                value: Some((*v).to_string()),
                datatype: Datatype::Timestamp,
                live: true,
                ..PrimitiveData::default()
            })
            .expect("alloc");
    }
    Arc::new(store)
}

fn values_of(store: &Store, ids: &[u64]) -> Vec<String> {
    ids.iter()
        .map(|id| {
            store
                .primitive_read(Id::new(*id))
                .expect("read")
                .value
                .clone()
                .unwrap_or_default()
        })
        .collect()
}

/// S1: datetime range ["2000", "2003"), forward, over bins 1999–2004.
#[test]
fn s1_datetime_range_iteration() {
    let store = value_store(&["1999", "2000", "2001", "2002", "2003", "2004"]);
    let cmp = comparator("datetime").expect("datetime");
    let mut it = BinIterator::new(
        &store,
        cmp,
        Some("2000"),
        Some("2003"),
        Id::ZERO,
        Id::NONE,
        Direction::Forward,
    )
    .expect("bin iterator");

    // Pull two values: 2000, 2001.
    let mut budget = Budget::unlimited();
    let mut produced = Vec::new();
    for _ in 0..2 {
        match it.next_id(&mut budget).expect("next") {
            Advance::Id(id) => produced.push(id.raw()),
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(values_of(&store, &produced), vec!["2000", "2001"]);

    // A resumed cursor after 2001 yields 2002 next, then ends.
    let frozen = cursor::freeze(&it).expect("freeze");
    let mut resumed = cursor::thaw(&frozen, &store).expect("thaw");
    let tail = drain(resumed.as_mut());
    assert_eq!(values_of(&store, &tail), vec!["2002"]);

    // The full walk produces exactly 2000, 2001, 2002.
    it.reset();
    let full = drain(&mut it);
    assert_eq!(values_of(&store, &full), vec!["2000", "2001", "2002"]);
}

/// S2: or(fixed{7}, fixed{3}): forward 3,7,end; backward 7,3,end.
#[test]
fn s2_or_of_singletons() {
    let forward = |raw: u64| -> BoxedIter {
        Box::new(FixedIterator::new(vec![Id::new(raw)], Direction::Forward))
    };
    let mut it = OrIterator::create_commit(
        vec![forward(7), forward(3)],
        Direction::Forward,
        Id::ZERO,
        Id::NONE,
        None,
    )
    .expect("or");
    assert_eq!(drain(it.as_mut()), vec![3, 7]);

    let backward = |raw: u64| -> BoxedIter {
        Box::new(FixedIterator::new(vec![Id::new(raw)], Direction::Backward))
    };
    let mut it = OrIterator::create_commit(
        vec![backward(7), backward(3)],
        Direction::Backward,
        Id::ZERO,
        Id::NONE,
        None,
    )
    .expect("or");
    assert_eq!(drain(it.as_mut()), vec![7, 3]);
}

/// S3: AND(VIP(right = P), all) is exactly the fan-in of P.right.
#[test]
fn s3_and_with_vip() {
    let store = MemStore::new();
    let p_guid = store.guid_alloc(None).expect("guid");
    store
        .primitive_alloc(PrimitiveData {
            guid: Some(p_guid),
            live: true,
            ..PrimitiveData::default()
        })
        .expect("alloc");
    // Three links point right at P, one does not.
    for points_at_p in [true, true, false, true] {
        let mut linkages = [None; 4];
        if points_at_p {
            linkages[Linkage::Right.index()] = Some(p_guid);
        }
        store
            .primitive_alloc(PrimitiveData {
                linkages,
                live: true,
                ..PrimitiveData::default()
            })
            .expect("alloc");
    }
    let store: Store = Arc::new(store);

    let vip: BoxedIter = Box::new(VipIterator::new(
        &store,
        Linkage::Right,
        p_guid,
        None,
        Id::ZERO,
        Id::NONE,
        Direction::Forward,
    ));
    let all: BoxedIter = Box::new(AllIterator::new(
        &store,
        Id::ZERO,
        Id::NONE,
        Direction::Forward,
    ));
    let mut it = AndIterator::create_commit(
        vec![vip, all],
        Direction::Forward,
        Id::ZERO,
        Id::NONE,
    )
    .expect("and");
    assert_eq!(drain(it.as_mut()), vec![1, 2, 4]);

    // Everything produced has right == P.guid.
    for id in [1u64, 2, 4] {
        let p = store.primitive_read(Id::new(id)).expect("read");
        assert_eq!(p.linkage(Linkage::Right), Some(p_guid));
    }
}

/// S4: write N(name="a", value="1") with result=(guid); reading the
/// same shape returns the new guid.
#[test]
fn s4_write_then_read() {
    let store: Store = Arc::new(MemStore::new());
    let tickets = TicketPrinter::new();
    let writes = WriteEngine::new(store.clone(), tickets.clone());
    let reads = ReadEngine::new(store.clone(), tickets);

    let mut con = Constraint::name_value("a", "1");
    con.result = Some(quiver::constraint::ResultPattern {
        per_id: Some(quiver::constraint::Pattern::Guid),
        per_set: None,
    });
    let written = writes.execute(con).expect("write");
    let g1 = match written {
        Value::Guid(g) => g,
        other => panic!("expected a guid atom, got {other:?}"),
    };

    let outcome = reads
        .execute(Constraint::name_value("a", "1"), deadline())
        .expect("read");
    assert!(outcome.ok);
    assert_eq!(outcome.count, 1);
    let row = &outcome.rows[0];
    let guids: Vec<_> = row
        .as_list()
        .expect("row list")
        .iter()
        .filter_map(Value::as_guid)
        .collect();
    assert_eq!(guids, vec![g1]);
}

/// S5: a failure while committing a 3-node tree rolls back to the
/// pre-write horizon.
#[test]
fn s5_rollback_restores_horizon() {
    let mem = Arc::new(MemStore::new());
    let store: Store = mem.clone();
    let tickets = TicketPrinter::new();
    let writes = WriteEngine::new(store.clone(), tickets.clone());
    let reads = ReadEngine::new(store.clone(), tickets);

    // Pre-existing data to not disturb.
    writes
        .execute(Constraint::name_value("keep", "me"))
        .expect("seed write");
    let horizon = store.primitive_n();

    let mut tree = Constraint::name_value("root", "r");
    for (n, v) in [("left", "l"), ("right", "r")] {
        let mut child = Constraint::name_value(n, v);
        child.link = Some(LinkRel::My(Linkage::Left));
        tree.children.push(child);
    }
    mem.fail_after_allocs(2);
    assert!(writes.execute(tree).is_err());

    assert_eq!(store.primitive_n(), horizon);
    let outcome = reads
        .execute(Constraint::name_value("keep", "me"), deadline())
        .expect("read");
    assert_eq!(outcome.count, 1);
    let gone = reads
        .execute(Constraint::name_value("root", "r"), deadline())
        .expect("read");
    assert_eq!(gone.count, 0);
}

/// S6: shared s1, exclusive x1, shared s2 run strictly in that order;
/// reissuing s1 as exclusive re-queues it at the back.
#[test]
fn s6_ticket_ordering() {
    let printer = TicketPrinter::new();
    let s1 = printer.get_shared(None);
    let x1 = printer.get_exclusive(None);
    let s2 = printer.get_shared(None);

    assert!(printer.is_running(s1));
    assert!(!printer.is_running(x1));
    assert!(!printer.is_running(s2));

    printer.delete(s1);
    assert!(printer.is_running(x1));
    assert!(!printer.is_running(s2));

    printer.delete(x1);
    assert!(printer.is_running(s2));
    printer.delete(s2);

    // Reissue bumps the number and moves behind later arrivals.
    let s1 = printer.get_shared(None);
    let x1 = printer.get_exclusive(None);
    let s1 = printer.reissue(s1, TicketKind::Exclusive);
    assert!(s1.number() > x1.number());
    assert!(printer.is_running(x1));
    assert!(!printer.is_running(s1));
}

/// Writes targeting a stale generation are rejected OUTDATED.
#[test]
fn write_to_stale_generation_is_outdated() {
    let store: Store = Arc::new(MemStore::new());
    let tickets = TicketPrinter::new();
    let writes = WriteEngine::new(store.clone(), tickets);

    let v1 = match writes
        .execute(Constraint::name_value("doc", "v1"))
        .expect("write")
    {
        Value::List(items) => items[0].as_guid().expect("guid"),
        other => panic!("unexpected {other:?}"),
    };

    // Version it once.
    let mut update = Constraint::name_value("doc", "v2");
    update.guid = GuidFilter::only(v1);
    writes.execute(update.clone()).expect("version write");

    // The same target is now stale.
    let err = writes.execute(update).expect_err("stale target");
    assert!(matches!(err, GraphError::Outdated(_)));
}
