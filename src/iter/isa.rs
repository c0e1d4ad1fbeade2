//! ISA iterator: endpoint projection.
//!
//! Given a stream of link primitives, produce the primitive each link
//! points at through a chosen linkage: "the types of everything in
//! this set", "the left endpoints of these edges". The projection is
//! not id-ordered (link order and endpoint order are unrelated) and
//! may hit one endpoint many times, so produced ids are deduplicated.

use std::collections::HashSet;

use crate::error::{Advance, GraphResult, Membership, Progress};
use crate::ident::Id;
use crate::store::{Linkage, PrimitiveStore, Store};

use super::{
    BoxedIter, Budget, Direction, FreezeFlags, IdIterator, IterKind, RangeEstimate, Statistics,
    COST_INDEX, COST_PRIMITIVE,
};

/// Endpoint projection of a link stream; see the module docs.
#[derive(Debug)]
pub struct IsaIterator {
    store: Store,
    linkage: Linkage,
    sub: BoxedIter,
    low: Id,
    high: Id,
    seen: HashSet<Id>,
    last: Option<Id>,
    stats: Option<Statistics>,
}

impl IsaIterator {
    pub fn new(store: &Store, linkage: Linkage, sub: BoxedIter, low: Id, high: Id) -> IsaIterator {
        let high = high.min(Id::new(store.primitive_n()));
        IsaIterator {
            store: store.clone(),
            linkage,
            sub,
            low,
            high,
            seen: HashSet::new(),
            last: None,
            stats: None,
        }
    }

    pub(crate) fn restore_seen(&mut self, seen: impl IntoIterator<Item = Id>) {
        self.seen = seen.into_iter().collect();
    }

    pub(crate) fn sub(&self) -> &dyn IdIterator {
        self.sub.as_ref()
    }

    pub(crate) fn sub_mut(&mut self) -> &mut BoxedIter {
        &mut self.sub
    }

    pub(crate) fn set_last(&mut self, last: Option<Id>) {
        self.last = last;
    }
}

impl IdIterator for IsaIterator {
    fn kind(&self) -> IterKind {
        IterKind::Isa
    }

    fn direction(&self) -> Direction {
        self.sub.direction()
    }

    fn sorted(&self) -> bool {
        false
    }

    fn id_range(&self) -> (Id, Id) {
        (self.low, self.high)
    }

    fn statistics(&mut self, budget: &mut Budget) -> GraphResult<Progress> {
        match self.sub.statistics(budget)? {
            Progress::Suspend => Ok(Progress::Suspend),
            Progress::Done => {
                let sub = self.sub.stats().unwrap_or(Statistics {
                    check_cost: COST_INDEX,
                    next_cost: COST_INDEX,
                    find_cost: COST_INDEX,
                    n: 0,
                    sorted: false,
                });
                self.stats = Some(Statistics {
                    check_cost: COST_INDEX + sub.check_cost,
                    next_cost: sub.next_cost + COST_PRIMITIVE,
                    find_cost: u64::MAX / 2,
                    n: sub.n,
                    sorted: false,
                });
                Ok(Progress::Done)
            }
        }
    }

    fn stats(&self) -> Option<Statistics> {
        self.stats
    }

    fn next_id(&mut self, budget: &mut Budget) -> GraphResult<Advance> {
        loop {
            let link = match self.sub.next_id(budget)? {
                Advance::Id(id) => id,
                other => return Ok(other),
            };
            if !budget.charge(COST_PRIMITIVE) {
                // The link is lost to this call but the seen set makes
                // the retry converge: the sub-iterator does not rewind.
                return Ok(Advance::Suspend);
            }
            let p = self.store.primitive_read(link)?;
            let Some(endpoint) = p.linkage(self.linkage) else {
                continue;
            };
            let Some(id) = self.store.id_from_guid(&endpoint) else {
                continue;
            };
            if id < self.low || id >= self.high {
                continue;
            }
            if !self.seen.insert(id) {
                continue;
            }
            self.last = Some(id);
            return Ok(Advance::Id(id));
        }
    }

    fn find(&mut self, _target: Id, _budget: &mut Budget) -> GraphResult<Advance> {
        Err(crate::error::GraphError::Internal(
            "find on an unsorted isa iterator".into(),
        ))
    }

    fn check(&mut self, id: Id, budget: &mut Budget) -> GraphResult<Membership> {
        if !budget.charge(COST_INDEX) {
            return Ok(Membership::Suspend);
        }
        if id < self.low || id >= self.high {
            return Ok(Membership::No);
        }
        let guid = self.store.guid_from_id(id)?;
        // Links pointing at this candidate through our linkage; the
        // candidate is a member iff our sub-stream owns any of them.
        let links = self
            .store
            .vip_candidates(self.linkage, &guid, None, Id::ZERO, Id::NONE);
        let mut probe = self.sub.clone_iter();
        for link in links {
            match probe.check(link, budget)? {
                Membership::Yes => return Ok(Membership::Yes),
                Membership::No => {}
                Membership::Suspend => return Ok(Membership::Suspend),
            }
        }
        Ok(Membership::No)
    }

    fn clone_iter(&self) -> Box<dyn IdIterator> {
        Box::new(IsaIterator {
            store: self.store.clone(),
            linkage: self.linkage,
            sub: self.sub.clone_iter(),
            low: self.low,
            high: self.high,
            seen: HashSet::new(),
            last: None,
            stats: self.stats,
        })
    }

    fn reset(&mut self) {
        self.sub.reset();
        self.seen.clear();
        self.last = None;
    }

    fn freeze(&self, flags: FreezeFlags, out: &mut String) -> GraphResult<()> {
        let mut slices = Vec::new();
        if flags.set {
            let mut sub = String::new();
            self.sub.freeze(FreezeFlags::SET, &mut sub)?;
            slices.push(format!(
                "isa:{}[{}-{}]:{}:({sub})",
                self.direction().token(),
                self.low,
                self.high,
                self.linkage.name()
            ));
        }
        if flags.position {
            let mut sub = String::new();
            self.sub.freeze(
                FreezeFlags {
                    set: false,
                    position: true,
                    state: false,
                },
                &mut sub,
            )?;
            slices.push(format!(
                "{}:({sub})",
                self.last.map_or_else(|| "*".to_string(), |id| id.to_string())
            ));
        }
        if flags.state {
            let mut seen: Vec<Id> = self.seen.iter().copied().collect();
            seen.sort_unstable();
            let seen: Vec<String> = seen.iter().map(ToString::to_string).collect();
            let mut sub = String::new();
            self.sub.freeze(
                FreezeFlags {
                    set: false,
                    position: false,
                    state: true,
                },
                &mut sub,
            )?;
            slices.push(format!("{}:({sub})", seen.join(",")));
        }
        out.push_str(&slices.join("/"));
        Ok(())
    }

    fn beyond(&self, _id: Id) -> GraphResult<bool> {
        Ok(false)
    }

    fn range_estimate(&self) -> RangeEstimate {
        let sub = self.sub.range_estimate();
        RangeEstimate {
            low: self.low,
            high: self.high,
            n_exact: None,
            n_max: sub.n_max,
        }
    }

    fn last_id(&self) -> Option<Id> {
        self.last
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
