//! VIP ("value in position") iterator.
//!
//! Streams the fan-in of one linkage to one endpoint guid (all
//! primitives whose `left`, say, points at a given node), optionally
//! pre-intersected with a typeguid. This is the dominant access path
//! for subconstraint evaluation: `my`-linked children become
//! `AND(vip, restricted-stored-iterator)`.

use crate::error::{Advance, GraphResult, Membership, Progress};
use crate::ident::{Guid, Id};
use crate::store::{Linkage, PrimitiveStore, Store};

use super::{
    Budget, Direction, FixedIterator, FreezeFlags, IdIterator, IterKind, PrimitiveSummary,
    RangeEstimate, Restriction, Statistics, COST_INDEX,
};

/// Fan-in iterator; see the module docs.
#[derive(Debug)]
pub struct VipIterator {
    store: Store,
    linkage: Linkage,
    endpoint: Guid,
    typeguid: Option<Guid>,
    low: Id,
    high: Id,
    inner: FixedIterator,
}

impl VipIterator {
    pub fn new(
        store: &Store,
        linkage: Linkage,
        endpoint: Guid,
        typeguid: Option<Guid>,
        low: Id,
        high: Id,
        dir: Direction,
    ) -> VipIterator {
        let high = high.min(Id::new(store.primitive_n()));
        let ids = store.vip_candidates(linkage, &endpoint, typeguid.as_ref(), low, high);
        let mut summary = PrimitiveSummary::default().with(linkage, endpoint);
        if let Some(tg) = typeguid {
            summary = summary.with(Linkage::Typeguid, tg);
        }
        VipIterator {
            store: store.clone(),
            linkage,
            endpoint,
            typeguid,
            low,
            high,
            inner: FixedIterator::new(ids, dir)
                .with_store(store.clone())
                .with_summary(summary),
        }
    }

    pub fn linkage(&self) -> Linkage {
        self.linkage
    }

    pub fn endpoint(&self) -> Guid {
        self.endpoint
    }

    pub(crate) fn set_offset(&mut self, offset: usize, last: Option<Id>) {
        self.inner.set_offset(offset, last);
    }
}

impl IdIterator for VipIterator {
    fn kind(&self) -> IterKind {
        IterKind::Vip
    }

    fn direction(&self) -> Direction {
        self.inner.direction()
    }

    fn sorted(&self) -> bool {
        true
    }

    fn id_range(&self) -> (Id, Id) {
        (self.low, self.high)
    }

    fn statistics(&mut self, budget: &mut Budget) -> GraphResult<Progress> {
        if !budget.charge(COST_INDEX) {
            return Ok(Progress::Suspend);
        }
        Ok(Progress::Done)
    }

    fn stats(&self) -> Option<Statistics> {
        let inner = self.inner.stats()?;
        Some(Statistics {
            check_cost: inner.check_cost + COST_INDEX,
            ..inner
        })
    }

    fn next_id(&mut self, budget: &mut Budget) -> GraphResult<Advance> {
        self.inner.next_id(budget)
    }

    fn find(&mut self, target: Id, budget: &mut Budget) -> GraphResult<Advance> {
        self.inner.find(target, budget)
    }

    fn check(&mut self, id: Id, budget: &mut Budget) -> GraphResult<Membership> {
        self.inner.check(id, budget)
    }

    fn clone_iter(&self) -> Box<dyn IdIterator> {
        Box::new(VipIterator::new(
            &self.store,
            self.linkage,
            self.endpoint,
            self.typeguid,
            self.low,
            self.high,
            self.inner.direction(),
        ))
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn freeze(&self, flags: FreezeFlags, out: &mut String) -> GraphResult<()> {
        let mut slices = Vec::new();
        if flags.set {
            let mut head = format!(
                "vip:{}[{}-{}]:{}:{}",
                self.inner.direction().token(),
                self.low,
                self.high,
                self.linkage.name(),
                self.endpoint
            );
            if let Some(tg) = self.typeguid {
                head.push(':');
                head.push_str(&tg.to_string());
            }
            slices.push(head);
        }
        if flags.position {
            let mut pos = String::new();
            self.inner.freeze(
                FreezeFlags {
                    set: false,
                    position: true,
                    state: false,
                },
                &mut pos,
            )?;
            slices.push(pos);
        }
        if flags.state {
            slices.push(String::new());
        }
        out.push_str(&slices.join("/"));
        Ok(())
    }

    fn primitive_summary(&self) -> Option<PrimitiveSummary> {
        self.inner.primitive_summary()
    }

    fn beyond(&self, id: Id) -> GraphResult<bool> {
        self.inner.beyond(id)
    }

    fn range_estimate(&self) -> RangeEstimate {
        self.inner.range_estimate()
    }

    fn restrict(&self, psum: &PrimitiveSummary) -> GraphResult<Restriction> {
        // A VIP already pins its linkage; merging an incompatible pin
        // yields the empty stream.
        let own = self
            .primitive_summary()
            .unwrap_or_default();
        match own.merge(psum) {
            None => Ok(Restriction::No),
            Some(merged) if merged == own => Ok(Restriction::Already),
            Some(merged) => {
                let typeguid = merged.get(Linkage::Typeguid);
                if self.linkage != Linkage::Typeguid
                    && merged.get(self.linkage) == Some(self.endpoint)
                    && typeguid != self.typeguid
                {
                    return Ok(Restriction::New(Box::new(VipIterator::new(
                        &self.store,
                        self.linkage,
                        self.endpoint,
                        typeguid,
                        self.low,
                        self.high,
                        self.inner.direction(),
                    ))));
                }
                self.inner.restrict(psum)
            }
        }
    }

    fn last_id(&self) -> Option<Id> {
        self.inner.last_id()
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemStore, PrimitiveData, PrimitiveStore};
    use std::sync::Arc;

    fn link_store() -> (Store, Guid, Guid) {
        let store = MemStore::new();
        let target = store.guid_alloc(None).unwrap();
        store
            .primitive_alloc(PrimitiveData {
                guid: Some(target),
                live: true,
                ..PrimitiveData::default()
            })
            .unwrap();
        let tg = store.guid_alloc(None).unwrap();
        store
            .primitive_alloc(PrimitiveData {
                guid: Some(tg),
                live: true,
                ..PrimitiveData::default()
            })
            .unwrap();
        for with_type in [true, false, true] {
            let mut linkages = [None; 4];
            linkages[Linkage::Right.index()] = Some(target);
            if with_type {
                linkages[Linkage::Typeguid.index()] = Some(tg);
            }
            store
                .primitive_alloc(PrimitiveData {
                    linkages,
                    live: true,
                    ..PrimitiveData::default()
                })
                .unwrap();
        }
        (Arc::new(store) as Store, target, tg)
    }

    fn drain(it: &mut dyn IdIterator) -> Vec<u64> {
        let mut budget = Budget::unlimited();
        let mut out = Vec::new();
        while let Advance::Id(id) = it.next_id(&mut budget).unwrap() {
            out.push(id.raw());
        }
        out
    }

    #[test]
    fn test_fan_in() {
        let (store, target, _) = link_store();
        let mut it = VipIterator::new(
            &store,
            Linkage::Right,
            target,
            None,
            Id::ZERO,
            Id::NONE,
            Direction::Forward,
        );
        assert_eq!(drain(&mut it), vec![2, 3, 4]);
    }

    #[test]
    fn test_typed_fan_in() {
        let (store, target, tg) = link_store();
        let mut it = VipIterator::new(
            &store,
            Linkage::Right,
            target,
            Some(tg),
            Id::ZERO,
            Id::NONE,
            Direction::Forward,
        );
        assert_eq!(drain(&mut it), vec![2, 4]);
    }

    #[test]
    fn test_summary_and_restrict() {
        let (store, target, tg) = link_store();
        let it = VipIterator::new(
            &store,
            Linkage::Right,
            target,
            None,
            Id::ZERO,
            Id::NONE,
            Direction::Forward,
        );
        let summary = it.primitive_summary().unwrap();
        assert_eq!(summary.get(Linkage::Right), Some(target));

        // Restricting by the typeguid tightens the fan-in.
        let psum = PrimitiveSummary::default().with(Linkage::Typeguid, tg);
        match it.restrict(&psum).unwrap() {
            Restriction::New(mut tightened) => {
                let mut budget = Budget::unlimited();
                let mut out = Vec::new();
                while let Advance::Id(id) = tightened.next_id(&mut budget).unwrap() {
                    out.push(id.raw());
                }
                assert_eq!(out, vec![2, 4]);
            }
            _ => panic!("expected a tightened iterator"),
        }

        // Conflicting pin on the same linkage is provably empty.
        let other = store.guid_alloc(None).unwrap();
        let conflict = PrimitiveSummary::default().with(Linkage::Right, other);
        assert!(matches!(it.restrict(&conflict).unwrap(), Restriction::No));
    }
}
