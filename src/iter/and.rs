//! AND iterator: intersection of id streams.
//!
//! Two algorithms, chosen after child statistics:
//!
//! - **Producer/checker.** The child with the cheapest full scan
//!   becomes the producer; every candidate it yields is checked
//!   against the remaining children in ascending check-cost order,
//!   short-circuiting on the first miss.
//! - **Parallel merge.** When every child is sorted, children are kept
//!   head-aligned: the smallest head advances via `find(max_head)`
//!   until all heads agree, which is an intersection member.
//!
//! Call-state survives suspension: a half-checked candidate or a
//! half-aligned head set resumes where it stopped.

use crate::error::{Advance, GraphError, GraphResult, Membership, Progress};
use crate::ident::Id;

use super::{
    BoxedIter, Budget, Direction, FreezeFlags, IdIterator, IterKind, NullIterator,
    PrimitiveSummary, RangeEstimate, Restriction, Statistics,
};

/// Continuation of an in-flight `next` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AndState {
    /// Statistics not yet complete; `child` is the next to run.
    Stats { child: usize },
    /// Need a fresh candidate from the producer.
    Produce,
    /// Candidate in hand, checking contenders from `idx` on.
    Checking { candidate: Id, idx: usize },
    /// Parallel merge: aligning heads.
    Align,
    Exhausted,
}

/// Intersection; see the module docs.
#[derive(Debug)]
pub struct AndIterator {
    children: Vec<BoxedIter>,
    dir: Direction,
    low: Id,
    high: Id,
    producer: usize,
    /// Child indexes except the producer, ascending check cost.
    check_order: Vec<usize>,
    /// All children sorted: parallel merge available.
    merge: bool,
    /// Pending head per child (merge mode).
    heads: Vec<Option<Id>>,
    state: AndState,
    stats: Option<Statistics>,
    last: Option<Id>,
}

impl AndIterator {
    /// Construction-time rewrites: a null child collapses the whole
    /// intersection, a single child passes through.
    pub fn create_commit(
        children: Vec<BoxedIter>,
        dir: Direction,
        low: Id,
        high: Id,
    ) -> GraphResult<BoxedIter> {
        if children.is_empty() {
            return Err(GraphError::Internal(
                "intersection of zero iterators".into(),
            ));
        }
        if children.iter().any(|c| c.kind() == IterKind::Null) {
            return Ok(Box::new(NullIterator::new(dir)));
        }
        let mut children = children;
        if children.len() == 1 {
            return Ok(children.remove(0));
        }
        Ok(Box::new(AndIterator::from_parts(children, dir, low, high)))
    }

    pub(crate) fn from_parts(
        children: Vec<BoxedIter>,
        dir: Direction,
        low: Id,
        high: Id,
    ) -> AndIterator {
        let n = children.len();
        AndIterator {
            children,
            dir,
            low,
            high,
            producer: 0,
            check_order: (1..n).collect(),
            merge: false,
            heads: vec![None; n],
            state: AndState::Stats { child: 0 },
            stats: None,
            last: None,
        }
    }

    pub fn children(&self) -> &[BoxedIter] {
        &self.children
    }

    pub(crate) fn children_mut(&mut self) -> &mut [BoxedIter] {
        &mut self.children
    }

    pub(crate) fn set_last(&mut self, last: Option<Id>) {
        self.last = last;
    }

    /// Finish statistics: pick the producer, order the checkers,
    /// decide on the merge algorithm, derive combined stats.
    fn plan(&mut self) {
        let child_stats: Vec<Statistics> = self
            .children
            .iter()
            .map(|c| {
                c.stats().unwrap_or(Statistics {
                    check_cost: u64::MAX / 4,
                    next_cost: u64::MAX / 4,
                    find_cost: u64::MAX / 4,
                    n: u64::MAX / 4,
                    sorted: false,
                })
            })
            .collect();

        self.producer = (0..self.children.len())
            .min_by_key(|i| (child_stats[*i].scan_cost(), child_stats[*i].n))
            .unwrap_or(0);

        self.check_order = (0..self.children.len())
            .filter(|i| *i != self.producer)
            .collect();
        self.check_order
            .sort_by_key(|i| child_stats[*i].check_cost);

        self.merge = self.children.iter().all(|c| c.sorted());

        let n = child_stats.iter().map(|s| s.n).min().unwrap_or(0);
        let next_cost = child_stats[self.producer].next_cost
            + self
                .check_order
                .iter()
                .map(|i| child_stats[*i].check_cost)
                .sum::<u64>();
        // Sum of check costs, each successive term halved: later
        // checks only run on the estimated success prefix.
        let mut check_cost = 0u64;
        let mut weight = 1u64;
        for s in &child_stats {
            check_cost += s.check_cost / weight.max(1);
            weight *= 2;
        }
        let find_cost = child_stats
            .iter()
            .map(|s| s.find_cost)
            .max()
            .unwrap_or(u64::MAX / 4);
        self.stats = Some(Statistics {
            check_cost,
            next_cost,
            find_cost,
            n,
            sorted: self.merge,
        });

        self.state = if self.merge {
            AndState::Align
        } else {
            AndState::Produce
        };
    }

    /// Producer/checker stepping.
    fn produce_next(&mut self, budget: &mut Budget) -> GraphResult<Advance> {
        loop {
            match self.state {
                AndState::Produce => {
                    let candidate = match self.children[self.producer].next_id(budget)? {
                        Advance::Id(id) => id,
                        Advance::End => {
                            self.state = AndState::Exhausted;
                            return Ok(Advance::End);
                        }
                        Advance::Suspend => return Ok(Advance::Suspend),
                    };
                    self.state = AndState::Checking { candidate, idx: 0 };
                }
                AndState::Checking { candidate, idx } => {
                    if idx >= self.check_order.len() {
                        self.state = AndState::Produce;
                        self.last = Some(candidate);
                        return Ok(Advance::Id(candidate));
                    }
                    let child = self.check_order[idx];
                    match self.children[child].check(candidate, budget)? {
                        Membership::Yes => {
                            self.state = AndState::Checking {
                                candidate,
                                idx: idx + 1,
                            };
                        }
                        Membership::No => {
                            self.state = AndState::Produce;
                        }
                        Membership::Suspend => return Ok(Advance::Suspend),
                    }
                }
                AndState::Exhausted => return Ok(Advance::End),
                _ => {
                    return Err(GraphError::Internal(
                        "and iterator in merge state on producer path".into(),
                    ))
                }
            }
        }
    }

    /// Parallel-merge stepping: fill missing heads, then advance every
    /// lagging head via `find` until all heads agree.
    fn merge_next(&mut self, budget: &mut Budget) -> GraphResult<Advance> {
        loop {
            // Fill.
            for i in 0..self.children.len() {
                if self.heads[i].is_none() {
                    match self.children[i].next_id(budget)? {
                        Advance::Id(id) => self.heads[i] = Some(id),
                        Advance::End => {
                            self.state = AndState::Exhausted;
                            return Ok(Advance::End);
                        }
                        Advance::Suspend => return Ok(Advance::Suspend),
                    }
                }
            }
            // Target: the latest head in our direction.
            let mut target = self.heads[0].unwrap_or(Id::NONE);
            for head in self.heads.iter().flatten() {
                if !self.dir.at_or_after(target, *head) {
                    target = *head;
                }
            }
            // Align.
            let mut aligned = true;
            for i in 0..self.children.len() {
                let head = self.heads[i].unwrap_or(target);
                if head == target {
                    continue;
                }
                aligned = false;
                match self.children[i].find(target, budget)? {
                    Advance::Id(id) => self.heads[i] = Some(id),
                    Advance::End => {
                        self.state = AndState::Exhausted;
                        return Ok(Advance::End);
                    }
                    Advance::Suspend => return Ok(Advance::Suspend),
                }
            }
            if aligned {
                for head in &mut self.heads {
                    *head = None;
                }
                self.last = Some(target);
                return Ok(Advance::Id(target));
            }
        }
    }

    fn ensure_planned(&mut self, budget: &mut Budget) -> GraphResult<Progress> {
        if matches!(self.state, AndState::Stats { .. }) {
            return self.statistics(budget);
        }
        Ok(Progress::Done)
    }
}

impl IdIterator for AndIterator {
    fn kind(&self) -> IterKind {
        IterKind::And
    }

    fn direction(&self) -> Direction {
        self.dir
    }

    fn sorted(&self) -> bool {
        self.merge
    }

    fn id_range(&self) -> (Id, Id) {
        (self.low, self.high)
    }

    fn statistics(&mut self, budget: &mut Budget) -> GraphResult<Progress> {
        let AndState::Stats { child } = self.state else {
            return Ok(Progress::Done);
        };
        for i in child..self.children.len() {
            match self.children[i].statistics(budget)? {
                Progress::Done => {
                    self.state = AndState::Stats { child: i + 1 };
                }
                Progress::Suspend => {
                    self.state = AndState::Stats { child: i };
                    return Ok(Progress::Suspend);
                }
            }
        }
        self.plan();
        Ok(Progress::Done)
    }

    fn stats(&self) -> Option<Statistics> {
        self.stats
    }

    fn next_id(&mut self, budget: &mut Budget) -> GraphResult<Advance> {
        if self.ensure_planned(budget)? == Progress::Suspend {
            return Ok(Advance::Suspend);
        }
        if self.merge {
            self.merge_next(budget)
        } else {
            self.produce_next(budget)
        }
    }

    fn find(&mut self, target: Id, budget: &mut Budget) -> GraphResult<Advance> {
        if self.ensure_planned(budget)? == Progress::Suspend {
            return Ok(Advance::Suspend);
        }
        if !self.merge {
            return Err(GraphError::Internal(
                "find on an unsorted intersection".into(),
            ));
        }
        // Reposition every child at-or-after the target, then let the
        // alignment loop finish the job.
        for i in 0..self.children.len() {
            match self.children[i].find(target, budget)? {
                Advance::Id(id) => self.heads[i] = Some(id),
                Advance::End => {
                    self.state = AndState::Exhausted;
                    return Ok(Advance::End);
                }
                Advance::Suspend => {
                    self.heads[i] = None;
                    return Ok(Advance::Suspend);
                }
            }
        }
        self.state = AndState::Align;
        self.merge_next(budget)
    }

    fn check(&mut self, id: Id, budget: &mut Budget) -> GraphResult<Membership> {
        if self.ensure_planned(budget)? == Progress::Suspend {
            return Ok(Membership::Suspend);
        }
        let mut order = self.check_order.clone();
        order.insert(0, self.producer);
        for i in order {
            match self.children[i].check(id, budget)? {
                Membership::Yes => {}
                Membership::No => return Ok(Membership::No),
                Membership::Suspend => return Ok(Membership::Suspend),
            }
        }
        Ok(Membership::Yes)
    }

    fn clone_iter(&self) -> Box<dyn IdIterator> {
        let children: Vec<BoxedIter> = self.children.iter().map(|c| c.clone_iter()).collect();
        let mut clone = AndIterator::from_parts(children, self.dir, self.low, self.high);
        if self.stats.is_some() {
            clone.producer = self.producer;
            clone.check_order = self.check_order.clone();
            clone.merge = self.merge;
            clone.stats = self.stats;
            clone.state = if self.merge {
                AndState::Align
            } else {
                AndState::Produce
            };
        }
        Box::new(clone)
    }

    fn reset(&mut self) {
        for child in &mut self.children {
            child.reset();
        }
        for head in &mut self.heads {
            *head = None;
        }
        self.last = None;
        self.state = if self.stats.is_some() {
            if self.merge {
                AndState::Align
            } else {
                AndState::Produce
            }
        } else {
            AndState::Stats { child: 0 }
        };
    }

    fn freeze(&self, flags: FreezeFlags, out: &mut String) -> GraphResult<()> {
        let mut slices = Vec::new();
        if flags.set {
            let mut s = format!(
                "and:{}[{}-{}]:{}:",
                self.dir.token(),
                self.low,
                self.high,
                self.children.len()
            );
            for child in &self.children {
                let mut sub = String::new();
                child.freeze(FreezeFlags::SET, &mut sub)?;
                s.push('(');
                s.push_str(&sub);
                s.push(')');
            }
            slices.push(s);
        }
        if flags.position {
            let mut s = format!(
                "{}:{}:",
                self.producer,
                self.last.map_or_else(|| "*".to_string(), |id| id.to_string())
            );
            for child in &self.children {
                let mut sub = String::new();
                child.freeze(
                    FreezeFlags {
                        set: false,
                        position: true,
                        state: false,
                    },
                    &mut sub,
                )?;
                s.push('(');
                s.push_str(&sub);
                s.push(')');
            }
            slices.push(s);
        }
        if flags.state {
            let mut s = match self.stats {
                Some(st) => format!(
                    "s:{},{},{},{},{}:",
                    st.check_cost,
                    st.next_cost,
                    st.find_cost,
                    st.n,
                    u8::from(st.sorted)
                ),
                None => ":".to_string(),
            };
            for child in &self.children {
                let mut sub = String::new();
                child.freeze(
                    FreezeFlags {
                        set: false,
                        position: false,
                        state: true,
                    },
                    &mut sub,
                )?;
                s.push('(');
                s.push_str(&sub);
                s.push(')');
            }
            slices.push(s);
        }
        out.push_str(&slices.join("/"));
        Ok(())
    }

    fn primitive_summary(&self) -> Option<PrimitiveSummary> {
        let mut merged = PrimitiveSummary::default();
        for child in &self.children {
            if let Some(s) = child.primitive_summary() {
                merged = merged.merge(&s)?;
            }
        }
        if merged.is_empty() {
            None
        } else {
            Some(merged)
        }
    }

    fn beyond(&self, id: Id) -> GraphResult<bool> {
        Ok(super::beyond_by_id(self.dir, self.last, id))
    }

    fn range_estimate(&self) -> RangeEstimate {
        let mut low = Id::ZERO;
        let mut high = Id::NONE;
        let mut n_max = u64::MAX;
        for child in &self.children {
            let r = child.range_estimate();
            low = low.max(r.low);
            high = high.min(r.high);
            n_max = n_max.min(r.n_max);
        }
        RangeEstimate {
            low,
            high,
            n_exact: None,
            n_max,
        }
    }

    fn restrict(&self, psum: &PrimitiveSummary) -> GraphResult<Restriction> {
        let mut changed = false;
        let mut children: Vec<BoxedIter> = Vec::with_capacity(self.children.len());
        for child in &self.children {
            match child.restrict(psum)? {
                Restriction::Already => children.push(child.clone_iter()),
                Restriction::No => return Ok(Restriction::No),
                Restriction::New(it) => {
                    changed = true;
                    children.push(it);
                }
            }
        }
        if !changed {
            return Ok(Restriction::Already);
        }
        Ok(Restriction::New(Box::new(AndIterator::from_parts(
            children, self.dir, self.low, self.high,
        ))))
    }

    fn last_id(&self) -> Option<Id> {
        self.last
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::{AllIterator, FixedIterator};

    fn ids(raw: &[u64]) -> Vec<Id> {
        raw.iter().map(|r| Id::new(*r)).collect()
    }

    fn fixed(raw: &[u64], dir: Direction) -> BoxedIter {
        Box::new(FixedIterator::new(ids(raw), dir))
    }

    fn drain(it: &mut dyn IdIterator) -> Vec<u64> {
        let mut budget = Budget::unlimited();
        let mut out = Vec::new();
        loop {
            match it.next_id(&mut budget).unwrap() {
                Advance::Id(id) => out.push(id.raw()),
                Advance::End => return out,
                Advance::Suspend => panic!("unlimited budget suspended"),
            }
        }
    }

    #[test]
    fn test_intersection_merge_mode() {
        let a = fixed(&[1, 3, 5, 7, 9], Direction::Forward);
        let b = fixed(&[3, 4, 5, 9, 11], Direction::Forward);
        let mut it = AndIterator::from_parts(
            vec![a, b],
            Direction::Forward,
            Id::ZERO,
            Id::NONE,
        );
        assert_eq!(drain(&mut it), vec![3, 5, 9]);
        assert!(it.sorted());
    }

    #[test]
    fn test_intersection_backward() {
        let a = fixed(&[1, 3, 5, 9], Direction::Backward);
        let b = fixed(&[3, 5, 11], Direction::Backward);
        let mut it = AndIterator::from_parts(
            vec![a, b],
            Direction::Backward,
            Id::ZERO,
            Id::NONE,
        );
        assert_eq!(drain(&mut it), vec![5, 3]);
    }

    #[test]
    fn test_three_way() {
        let a = fixed(&[1, 2, 3, 4, 5, 6], Direction::Forward);
        let b = fixed(&[2, 4, 6, 8], Direction::Forward);
        let c = fixed(&[4, 5, 6, 7], Direction::Forward);
        let mut it = AndIterator::from_parts(
            vec![a, b, c],
            Direction::Forward,
            Id::ZERO,
            Id::NONE,
        );
        assert_eq!(drain(&mut it), vec![4, 6]);
    }

    #[test]
    fn test_null_child_collapses() {
        let a = fixed(&[1, 2], Direction::Forward);
        let b: BoxedIter = Box::new(crate::iter::NullIterator::new(Direction::Forward));
        let mut it =
            AndIterator::create_commit(vec![a, b], Direction::Forward, Id::ZERO, Id::NONE)
                .unwrap();
        assert_eq!(it.kind(), IterKind::Null);
        assert_eq!(drain(it.as_mut()), Vec::<u64>::new());
    }

    #[test]
    fn test_single_child_passthrough() {
        let a = fixed(&[1, 2], Direction::Forward);
        let it = AndIterator::create_commit(vec![a], Direction::Forward, Id::ZERO, Id::NONE)
            .unwrap();
        assert_eq!(it.kind(), IterKind::Fixed);
    }

    #[test]
    fn test_check() {
        let a = fixed(&[1, 3, 5], Direction::Forward);
        let b = fixed(&[3, 5, 7], Direction::Forward);
        let mut it = AndIterator::from_parts(
            vec![a, b],
            Direction::Forward,
            Id::ZERO,
            Id::NONE,
        );
        let mut budget = Budget::unlimited();
        assert_eq!(it.check(Id::new(3), &mut budget).unwrap(), Membership::Yes);
        assert_eq!(it.check(Id::new(1), &mut budget).unwrap(), Membership::No);
    }

    #[test]
    fn test_find() {
        let a = fixed(&[1, 3, 5, 9], Direction::Forward);
        let b = fixed(&[3, 5, 9], Direction::Forward);
        let mut it = AndIterator::from_parts(
            vec![a, b],
            Direction::Forward,
            Id::ZERO,
            Id::NONE,
        );
        let mut budget = Budget::unlimited();
        assert_eq!(
            it.find(Id::new(4), &mut budget).unwrap(),
            Advance::Id(Id::new(5))
        );
        assert_eq!(it.next_id(&mut budget).unwrap(), Advance::Id(Id::new(9)));
    }

    #[test]
    fn test_producer_mode_with_unsorted_all() {
        // An unsorted child forces the producer/checker path.
        #[derive(Debug)]
        struct Unsorted(FixedIterator);
        impl IdIterator for Unsorted {
            fn kind(&self) -> IterKind {
                self.0.kind()
            }
            fn direction(&self) -> Direction {
                self.0.direction()
            }
            fn sorted(&self) -> bool {
                false
            }
            fn id_range(&self) -> (Id, Id) {
                self.0.id_range()
            }
            fn statistics(&mut self, b: &mut Budget) -> GraphResult<Progress> {
                self.0.statistics(b)
            }
            fn stats(&self) -> Option<Statistics> {
                self.0.stats().map(|s| Statistics { sorted: false, ..s })
            }
            fn next_id(&mut self, b: &mut Budget) -> GraphResult<Advance> {
                self.0.next_id(b)
            }
            fn find(&mut self, t: Id, b: &mut Budget) -> GraphResult<Advance> {
                self.0.find(t, b)
            }
            fn check(&mut self, id: Id, b: &mut Budget) -> GraphResult<Membership> {
                self.0.check(id, b)
            }
            fn clone_iter(&self) -> BoxedIter {
                Box::new(Unsorted(FixedIterator::new(
                    self.0.ids().to_vec(),
                    self.0.direction(),
                )))
            }
            fn reset(&mut self) {
                self.0.reset();
            }
            fn freeze(&self, f: FreezeFlags, out: &mut String) -> GraphResult<()> {
                self.0.freeze(f, out)
            }
            fn beyond(&self, id: Id) -> GraphResult<bool> {
                self.0.beyond(id)
            }
            fn range_estimate(&self) -> RangeEstimate {
                self.0.range_estimate()
            }
            fn last_id(&self) -> Option<Id> {
                self.0.last_id()
            }
            fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
                self
            }
        }

        let a: BoxedIter = Box::new(Unsorted(FixedIterator::new(
            ids(&[1, 3, 5, 7]),
            Direction::Forward,
        )));
        let b = fixed(&[3, 7, 9], Direction::Forward);
        let mut it = AndIterator::from_parts(
            vec![a, b],
            Direction::Forward,
            Id::ZERO,
            Id::NONE,
        );
        assert_eq!(drain(&mut it), vec![3, 7]);
        assert!(!it.sorted());
    }

    #[test]
    fn test_suspend_resume_with_tiny_budgets() {
        let a = fixed(&[1, 2, 3, 4, 5, 6, 7, 8], Direction::Forward);
        let b = fixed(&[2, 4, 6, 8], Direction::Forward);
        let c: BoxedIter = Box::new(AllIterator::from_bounds(
            Id::ZERO,
            Id::new(100),
            Direction::Forward,
        ));
        let mut it = AndIterator::from_parts(
            vec![a, b, c],
            Direction::Forward,
            Id::ZERO,
            Id::NONE,
        );
        let mut out = Vec::new();
        let mut slices = 0;
        loop {
            // Each slice must cover the most expensive single step (a
            // log-cost find) or the iterator can never progress.
            let mut budget = Budget::new(8);
            match it.next_id(&mut budget).unwrap() {
                Advance::Id(id) => out.push(id.raw()),
                Advance::End => break,
                Advance::Suspend => {}
            }
            slices += 1;
            assert!(slices < 1_000, "no forward progress");
        }
        assert_eq!(out, vec![2, 4, 6, 8]);
    }
}
