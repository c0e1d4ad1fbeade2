//! # Read Engine
//!
//! Evaluates one constraint tree against the store and produces result
//! values. Each constraint node is driven by a **Read-Set context**
//! ([`ReadSet`]), a stack context walking the node's iterator through
//! a linear pipeline:
//!
//! ```text
//! statistics -> are-we-done? -> next -> one-push -> one-deliver
//!                   ^                                    |
//!                   `------------------------------------'
//! ```
//!
//! `next` pulls a candidate, consults the negative memo, loads the
//! primitive and runs the intrinsic predicates; `one-push` spawns a
//! [`ReadOne`](one::ReadOne) to validate subconstraints; `one-deliver`
//! accepts the instance into the page (or hands it to the sort
//! window), bumps the count, and stores a resumption cursor at exactly
//! `start + pagesize`.
//!
//! A **fast count** shortcut answers count-only constraints straight
//! from iterator statistics when nothing but a single index approach
//! is in play (a VIP rides free: it is an exact index image).

pub mod badcache;
pub mod build;
pub mod deferred;
pub mod one;
pub mod sort;
pub mod value;

pub use value::{Deferred, Value};

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use crate::cmp::{comparator, Comparator};
use crate::constraint::{matching, Constraint, Pattern, TriState};
use crate::cursor;
use crate::error::{Advance, GraphError, GraphResult, Progress};
use crate::ident::{Guid, Id};
use crate::iter::{BoxedIter, Budget, Direction, IdIterator, COST_PRIMITIVE};
use crate::stack::{CancelFlag, Control, Stack, StackContext};
use crate::store::{Linkage, Primitive, PrimitiveStore, Store};
use crate::ticket::TicketPrinter;

use badcache::BadCache;
use sort::{PreFilter, SortAtom, SortContext};

/// What one read-set produces.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome {
    /// Count range satisfied.
    pub ok: bool,
    /// Total accepted matches (window overflow included).
    pub count: u64,
    /// Per-match result rows inside the page window.
    pub rows: Vec<Value>,
    /// The per-set frame, if the constraint declared one.
    pub per_set: Option<Value>,
    /// Resumption cursor, when one was stored.
    pub cursor: Option<String>,
}

/// Engine configuration shared by all reads on a session.
#[derive(Debug, Clone)]
pub struct ReadConfig {
    /// Budget per run slice.
    pub slice_budget: i64,
    /// Expected rejections sizing the bad cache.
    pub bad_cache_capacity: usize,
}

impl Default for ReadConfig {
    fn default() -> Self {
        ReadConfig {
            slice_budget: 100_000,
            bad_cache_capacity: 4096,
        }
    }
}

/// Pipeline states of a read-set context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Statistics,
    DoneCheck,
    Next,
    OnePush,
    OneWait,
    Finish,
    Complete,
}

/// Outcome a Read-One hands back for a single candidate.
pub(crate) struct OneOutcome {
    pub ok: bool,
    pub row: Value,
}

/// The read-set context; see the module docs.
pub struct ReadSet {
    store: Store,
    cmp: Arc<dyn Comparator>,
    con: Arc<Constraint>,
    it: BoxedIter,
    parent: Option<(Id, Guid)>,
    phase: Phase,
    /// Only verify the count range; build no rows.
    verify: bool,
    plan_stored: u32,
    plan_vips: u32,
    from_cursor: bool,
    cur: Option<(Id, Arc<Primitive>)>,
    count: u64,
    rows: Vec<Value>,
    sort: Option<SortContext>,
    pending_sort_key: Option<Vec<SortAtom>>,
    bad: BadCache,
    /// Filled per-set sample slots, in sample-mark order.
    sample_slots: Vec<Option<Value>>,
    cursor_out: Option<String>,
    /// Mailbox a pushed Read-One delivers into.
    child_slot: Rc<RefCell<Option<OneOutcome>>>,
    /// Mailbox this context delivers into.
    outcome_slot: Rc<RefCell<Option<ReadOutcome>>>,
    /// Suspended image of the iterator position (set by `suspend`).
    parked: Option<String>,
}

impl ReadSet {
    pub(crate) fn build(
        store: &Store,
        con: Arc<Constraint>,
        parent: Option<(Id, Guid)>,
        verify: bool,
        config: &ReadConfig,
        outcome_slot: Rc<RefCell<Option<ReadOutcome>>>,
    ) -> GraphResult<ReadSet> {
        let cmp = comparator(&con.comparator)?;
        let plan = match parent {
            None => build::root_iterator(&con, store, &cmp, Direction::Forward)?,
            Some((pid, pguid)) => build::Plan {
                it: build::subcon_iterator(&con, pid, pguid, store, &cmp, Direction::Forward)?,
                stored_approaches: 2,
                vip_approaches: 0,
                from_cursor: con.cursor.is_some(),
            },
        };
        let sample_count = con
            .result_pattern()
            .per_set
            .as_ref()
            .map_or(0, count_samples);
        Ok(ReadSet {
            store: store.clone(),
            cmp,
            con,
            it: plan.it,
            parent,
            phase: Phase::Statistics,
            verify,
            plan_stored: plan.stored_approaches,
            plan_vips: plan.vip_approaches,
            from_cursor: plan.from_cursor,
            cur: None,
            count: 0,
            rows: Vec::new(),
            sort: None,
            pending_sort_key: None,
            bad: BadCache::new(config.bad_cache_capacity),
            sample_slots: vec![None; sample_count],
            cursor_out: None,
            child_slot: Rc::new(RefCell::new(None)),
            outcome_slot,
            parked: None,
        })
    }

    /// Re-arm a completed verify-mode context for full evaluation;
    /// used by deferred-value resumption.
    pub(crate) fn prepare_resume(&mut self) {
        self.verify = false;
        self.it.reset();
        self.cur = None;
        self.count = 0;
        self.rows.clear();
        self.cursor_out = None;
        self.phase = Phase::Statistics;
    }

    pub(crate) fn outcome_slot(&self) -> Rc<RefCell<Option<ReadOutcome>>> {
        self.outcome_slot.clone()
    }

    fn wants_cursor(&self) -> bool {
        self.con.resumable
            || self
                .con
                .result_pattern()
                .per_set
                .as_ref()
                .is_some_and(Pattern::mentions_cursor)
    }

    fn counting_needed(&self) -> bool {
        self.con.count.max.is_some()
            || self
                .con
                .result_pattern()
                .per_set
                .as_ref()
                .is_some_and(mentions_count)
    }

    fn sampling_needed(&self) -> bool {
        self.sample_slots.iter().any(Option::is_none) && !self.sample_slots.is_empty()
    }

    /// The fast-count gate; see the module docs.
    fn fast_count_allowed(&self) -> bool {
        let c = &self.con;
        // Subconstraint scans answer for one parent and never count
        // whole index images.
        if self.parent.is_some() {
            return false;
        }
        if !c.children.is_empty()
            || c.newest.is_some()
            || c.oldest.is_some()
            || c.live != TriState::DontCare
            || c.archival != TriState::DontCare
            || c.valuetype.is_some()
            || self.from_cursor
            || !c.guid.is_unconstrained()
            || !c.name.is_empty()
            || !c.value.is_empty()
            || !c.or.is_empty()
            || c.sort.is_some()
        {
            return false;
        }
        if !self.verify && self.con.result_pattern().per_id.is_some() {
            return false;
        }
        // A VIP is an exact index image, so the first one is free.
        let discounted = self.plan_stored + self.plan_vips - self.plan_vips.min(1);
        if discounted > 1 {
            return false;
        }
        self.it.range_estimate().n_exact.is_some()
    }

    fn run_step(&mut self, budget: &mut Budget) -> GraphResult<Control> {
        match self.phase {
            Phase::Statistics => {
                match self.it.statistics(budget)? {
                    Progress::Suspend => return Ok(Control::Yield),
                    Progress::Done => {}
                }
                if self.fast_count_allowed() {
                    if let Some(n) = self.it.range_estimate().n_exact {
                        self.count = n;
                        self.phase = Phase::Finish;
                        return Ok(Control::Continue);
                    }
                }
                self.init_sort();
                self.phase = Phase::DoneCheck;
                Ok(Control::Continue)
            }
            Phase::DoneCheck => {
                if self.are_we_done() {
                    self.phase = Phase::Finish;
                } else {
                    self.phase = Phase::Next;
                }
                Ok(Control::Continue)
            }
            Phase::Next => self.step_next(budget),
            Phase::OnePush => self.step_one_push(),
            Phase::OneWait => self.step_one_wait(),
            Phase::Finish => {
                self.finish()?;
                self.phase = Phase::Complete;
                Ok(Control::Pop)
            }
            Phase::Complete => Ok(Control::Pop),
        }
    }

    fn init_sort(&mut self) {
        let Some(spec) = &self.con.sort else {
            return;
        };
        if self.con.page.size == 0 || spec.keys.is_empty() {
            return;
        }
        // An iterator already ordered by the first key's comparator
        // satisfies the sort by construction.
        let natural = spec.keys[0].ascending
            && matches!(spec.keys[0].pattern, Pattern::Value)
            && self.it.ordering() == Some(self.cmp.name());
        if natural {
            return;
        }
        let window = (self.con.page.start + self.con.page.size) as usize;
        self.sort = Some(SortContext::new(
            spec.keys.clone(),
            self.cmp.clone(),
            window,
        ));
    }

    /// Termination conditions, in the order the engine applies them.
    fn are_we_done(&self) -> bool {
        let c = &self.con;
        if let Some(max) = c.count.max {
            if self.count > max {
                return true;
            }
        }
        if self.verify && self.count >= c.count.min && c.count.max.is_none() {
            return true;
        }
        if self.sort.is_some() {
            // A sort window needs the full stream unless the iterator
            // order already proved itself; only the count cap above
            // ends it early.
            return false;
        }
        let want = c.page.start + c.page.size + u64::from(self.wants_cursor());
        if self.count >= want && !self.sampling_needed() && !self.counting_needed() {
            return true;
        }
        if !self.verify
            && c.result_pattern().per_id.is_none()
            && !self.sampling_needed()
            && !self.counting_needed()
            && self.count >= c.count.min
        {
            return true;
        }
        false
    }

    fn step_next(&mut self, budget: &mut Budget) -> GraphResult<Control> {
        let id = match self.it.next_id(budget)? {
            Advance::Suspend => return Ok(Control::Yield),
            Advance::End => {
                self.phase = Phase::Finish;
                return Ok(Control::Continue);
            }
            Advance::Id(id) => id,
        };
        if self.bad.maybe_rejected(id) {
            return Ok(Control::Continue);
        }
        // The candidate is already pulled; finish judging it even if
        // this charge tips the budget; the next step will yield.
        budget.charge(COST_PRIMITIVE);
        let p = self.store.primitive_read(id)?;
        if !matching::intrinsics_match(&self.con, &p, self.cmp.as_ref(), &self.store)? {
            self.bad.insert(id);
            self.phase = Phase::DoneCheck;
            return Ok(Control::Continue);
        }
        let or_alive = matching::or_branches_match(&self.con, &p, self.cmp.as_ref(), &self.store)?;
        if or_alive.iter().any(|alive| !alive) {
            self.bad.insert(id);
            self.phase = Phase::DoneCheck;
            return Ok(Control::Continue);
        }
        if let Some(sort) = &mut self.sort {
            let key = sort.key_of(&p)?;
            if sort.accept_prefilter(&key) == PreFilter::Outside {
                sort.count_outside();
                self.count += 1;
                self.phase = Phase::DoneCheck;
                return Ok(Control::Continue);
            }
            self.pending_sort_key = Some(key);
        }
        self.cur = Some((id, p));
        self.phase = Phase::OnePush;
        Ok(Control::Continue)
    }

    fn step_one_push(&mut self) -> GraphResult<Control> {
        let Some((id, p)) = self.cur.clone() else {
            return Err(GraphError::Internal("one-push without a candidate".into()));
        };
        if self.con.children.is_empty() {
            // No subconstraints: deliver inline.
            let row = if self.verify {
                Value::Null
            } else {
                self.instantiate_row(&p, &[])?
            };
            return self.one_deliver(true, row);
        }
        self.child_slot.replace(None);
        let one = one::ReadOne::new(
            self.store.clone(),
            self.con.clone(),
            (id, p.guid),
            p,
            self.verify,
            self.child_slot.clone(),
        );
        self.phase = Phase::OneWait;
        Ok(Control::Push(Box::new(one)))
    }

    fn step_one_wait(&mut self) -> GraphResult<Control> {
        let Some(outcome) = self.child_slot.borrow_mut().take() else {
            return Err(GraphError::Internal(
                "read-one completed without delivering".into(),
            ));
        };
        if !outcome.ok {
            if let Some((id, _)) = self.cur.take() {
                self.bad.insert(id);
            }
            self.pending_sort_key = None;
            self.phase = Phase::DoneCheck;
            return Ok(Control::Continue);
        }
        self.one_deliver(true, outcome.row)
    }

    /// Accept one instance: samples, page/sort placement, count,
    /// cursor storage at exactly `start + pagesize`.
    fn one_deliver(&mut self, _ok: bool, row: Value) -> GraphResult<Control> {
        let (_, p) = self
            .cur
            .take()
            .ok_or_else(|| GraphError::Internal("deliver without a candidate".into()))?;
        self.fill_samples(&p, &row)?;

        if let Some(sort) = &mut self.sort {
            let key = self
                .pending_sort_key
                .take()
                .ok_or_else(|| GraphError::Internal("sorted deliver without a key".into()))?;
            sort.accept(key, row);
            self.count += 1;
        } else {
            if !self.verify
                && self.count >= self.con.page.start
                && (self.rows.len() as u64) < self.con.page.size
            {
                self.rows.push(row);
            }
            self.count += 1;
            if self.count == self.con.page.start + self.con.page.size && self.wants_cursor() {
                self.cursor_out = Some(cursor::freeze(self.it.as_ref())?);
            }
        }
        self.phase = Phase::DoneCheck;
        Ok(Control::Continue)
    }

    fn fill_samples(&mut self, p: &Primitive, row: &Value) -> GraphResult<()> {
        if self.sample_slots.is_empty() {
            return Ok(());
        }
        let Some(per_set) = self.con.result_pattern().per_set else {
            return Ok(());
        };
        let mut marks = Vec::new();
        collect_samples(&per_set, &mut marks);
        for (i, inner) in marks.iter().enumerate() {
            if self.sample_slots[i].is_none() {
                let v = instantiate(
                    inner,
                    p,
                    row.as_list().unwrap_or(&[]),
                    self.count,
                    None,
                )?;
                if !matches!(v, Value::Null) {
                    self.sample_slots[i] = Some(v);
                }
            }
        }
        Ok(())
    }

    fn instantiate_row(&self, p: &Primitive, contents: &[Value]) -> GraphResult<Value> {
        match self.con.result_pattern().per_id {
            Some(pattern) => instantiate(&pattern, p, contents, self.count, None),
            None => Ok(Value::Null),
        }
    }

    /// Compose the outcome: sorted window or plain page, per-set
    /// frame, deferred-sample evaluation.
    fn finish(&mut self) -> GraphResult<()> {
        if let Some(sort) = self.sort.take() {
            self.count = sort.total();
            self.rows = sort.finish(self.con.page.start as usize);
        }
        // Every deferred sample is evaluated in place before the set
        // frame is composed, so the sampler knows whether a slot is
        // still unspecified.
        for slot in &mut self.sample_slots {
            if let Some(v) = slot {
                if v.has_deferred() {
                    *slot = Some(deferred::evaluate_value(v.clone())?);
                }
            }
        }
        let ok = self.count >= self.con.count.min
            && self.con.count.max.is_none_or(|max| self.count <= max);
        let per_set = match self.con.result_pattern().per_set {
            Some(pattern) => Some(self.instantiate_per_set(&pattern)?),
            None => None,
        };
        let outcome = ReadOutcome {
            ok,
            count: self.count,
            rows: std::mem::take(&mut self.rows),
            per_set,
            cursor: self.cursor_out.clone(),
        };
        self.outcome_slot.replace(Some(outcome));
        Ok(())
    }

    fn instantiate_per_set(&self, pattern: &Pattern) -> GraphResult<Value> {
        let mut next_sample = 0usize;
        self.per_set_value(pattern, &mut next_sample)
    }

    fn per_set_value(&self, pattern: &Pattern, next_sample: &mut usize) -> GraphResult<Value> {
        Ok(match pattern {
            Pattern::Count => Value::Int(self.count as i64),
            Pattern::Cursor => self
                .cursor_out
                .clone()
                .map_or(Value::Null, Value::Str),
            Pattern::Sample(_) => {
                let i = *next_sample;
                *next_sample += 1;
                self.sample_slots
                    .get(i)
                    .cloned()
                    .flatten()
                    .unwrap_or(Value::Null)
            }
            Pattern::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.per_set_value(item, next_sample)?);
                }
                Value::List(out)
            }
            Pattern::Literal(s) => Value::Str(s.clone()),
            Pattern::None => Value::Null,
            other => {
                return Err(GraphError::Semantics(format!(
                    "pattern {other:?} is per-match, not per-set"
                )))
            }
        })
    }
}

/// Count sample marks under a per-set pattern.
fn count_samples(pattern: &Pattern) -> usize {
    let mut marks = Vec::new();
    collect_samples(pattern, &mut marks);
    marks.len()
}

fn collect_samples(pattern: &Pattern, out: &mut Vec<Pattern>) {
    match pattern {
        Pattern::Sample(inner) => out.push((**inner).clone()),
        Pattern::List(items) => {
            for item in items {
                collect_samples(item, out);
            }
        }
        _ => {}
    }
}

fn mentions_count(pattern: &Pattern) -> bool {
    match pattern {
        Pattern::Count => true,
        Pattern::List(items) => items.iter().any(mentions_count),
        Pattern::Sample(inner) => mentions_count(inner),
        _ => false,
    }
}

/// Instantiate a per-match pattern against a primitive.
pub(crate) fn instantiate(
    pattern: &Pattern,
    p: &Primitive,
    contents: &[Value],
    count: u64,
    cursor: Option<&str>,
) -> GraphResult<Value> {
    Ok(match pattern {
        Pattern::None => Value::Null,
        Pattern::Guid => Value::Guid(p.guid),
        Pattern::Name => p.name.clone().map_or(Value::Null, Value::Str),
        Pattern::Value => p.value.clone().map_or(Value::Null, Value::Str),
        Pattern::Datatype => Value::Datatype(p.datatype),
        Pattern::Left => linkage_value(p, Linkage::Left),
        Pattern::Right => linkage_value(p, Linkage::Right),
        Pattern::Typeguid => linkage_value(p, Linkage::Typeguid),
        Pattern::Scope => linkage_value(p, Linkage::Scope),
        Pattern::Timestamp => Value::Timestamp(p.timestamp),
        Pattern::Live => Value::Bool(p.live),
        Pattern::Archival => Value::Bool(p.archival),
        Pattern::Count => Value::Int(count as i64),
        Pattern::Cursor => cursor.map_or(Value::Null, |c| Value::Str(c.to_string())),
        Pattern::Contents => Value::List(contents.to_vec()),
        Pattern::Literal(s) => Value::Str(s.clone()),
        Pattern::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(instantiate(item, p, contents, count, cursor)?);
            }
            Value::List(out)
        }
        Pattern::Sample(inner) => instantiate(inner, p, contents, count, cursor)?,
    })
}

fn linkage_value(p: &Primitive, which: Linkage) -> Value {
    p.linkage(which).map_or(Value::Null, Value::Guid)
}

/// Stack-context shim over a shared read-set.
pub(crate) struct RscContext {
    pub rsc: Rc<RefCell<ReadSet>>,
}

impl StackContext for RscContext {
    fn name(&self) -> &'static str {
        "read-set"
    }

    fn run(&mut self, budget: &mut Budget) -> GraphResult<Control> {
        self.rsc.borrow_mut().run_step(budget)
    }

    fn suspend(&mut self) -> GraphResult<()> {
        let mut rsc = self.rsc.borrow_mut();
        let frozen = cursor::freeze(rsc.it.as_ref())?;
        rsc.parked = Some(frozen);
        Ok(())
    }

    fn unsuspend(&mut self) -> GraphResult<()> {
        self.rsc.borrow_mut().parked = None;
        Ok(())
    }
}

/// The engine: builds the root context, drives the stack, applies the
/// timeout policy.
pub struct ReadEngine {
    store: Store,
    tickets: TicketPrinter,
    config: ReadConfig,
}

impl ReadEngine {
    pub fn new(store: Store, tickets: TicketPrinter) -> ReadEngine {
        ReadEngine {
            store,
            tickets,
            config: ReadConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ReadConfig) -> ReadEngine {
        self.config = config;
        self
    }

    /// Evaluate `con` to completion or deadline.
    ///
    /// A deadline hit on a `resumable` constraint returns the partial
    /// page with a cursor; otherwise it is a `TooHard` error.
    pub fn execute(&self, mut con: Constraint, deadline: Instant) -> GraphResult<ReadOutcome> {
        con.normalize();
        let resumable = con.resumable;
        let ticket = self.tickets.get_shared(None);
        let result = self.execute_inner(con, deadline, resumable);
        self.tickets.delete(ticket);
        result
    }

    fn execute_inner(
        &self,
        con: Constraint,
        deadline: Instant,
        resumable: bool,
    ) -> GraphResult<ReadOutcome> {
        let slot: Rc<RefCell<Option<ReadOutcome>>> = Rc::new(RefCell::new(None));
        let rsc = ReadSet::build(
            &self.store,
            con.into_shared(),
            None,
            false,
            &self.config,
            slot.clone(),
        )?;
        let rsc = Rc::new(RefCell::new(rsc));
        let cancel = CancelFlag::new();
        let mut stack = Stack::new(cancel, self.config.slice_budget);
        stack.push(Box::new(RscContext { rsc: rsc.clone() }));

        loop {
            match stack.run_until_deadline(deadline)? {
                Progress::Done => break,
                Progress::Suspend => {
                    if Instant::now() >= deadline {
                        if resumable {
                            // Soft timeout: freeze and hand back the
                            // partial page.
                            let mut parked = rsc.borrow_mut();
                            let frozen = cursor::freeze(parked.it.as_ref())?;
                            let outcome = ReadOutcome {
                                ok: true,
                                count: parked.count,
                                rows: std::mem::take(&mut parked.rows),
                                per_set: None,
                                cursor: Some(frozen),
                            };
                            return Ok(outcome);
                        }
                        return Err(GraphError::TooHard);
                    }
                }
            }
        }
        let outcome = slot.borrow_mut().take().ok_or_else(|| {
            GraphError::Internal("read completed without an outcome".into())
        })?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{CountRange, ResultPattern, StringCons};
    use crate::store::{MemStore, PrimitiveData};
    use std::time::Duration;

    fn seeded(values: &[(&str, &str)]) -> Store {
        let store = MemStore::new();
        for (name, value) in values {
            store
                .primitive_alloc(PrimitiveData {
                    name: Some((*name).to_string()),
                    value: Some((*value).to_string()),
                    datatype: crate::ident::Datatype::String,
                    live: true,
                    ..PrimitiveData::default()
                })
                .expect("alloc");
        }
        Arc::new(store)
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    #[test]
    fn test_simple_scan_counts_matches() {
        let store = seeded(&[("k", "1"), ("k", "2"), ("other", "1")]);
        let engine = ReadEngine::new(store, TicketPrinter::new());
        let mut con = Constraint::new();
        con.name = vec![StringCons::eq("k")];
        let outcome = engine.execute(con, far_deadline()).expect("read");
        assert!(outcome.ok);
        assert_eq!(outcome.count, 2);
    }

    #[test]
    fn test_verify_mode_stops_at_min() {
        let store = seeded(&[("k", "1"), ("k", "1"), ("k", "1")]);
        let slot: Rc<RefCell<Option<ReadOutcome>>> = Rc::new(RefCell::new(None));
        let mut con = Constraint::new();
        con.name = vec![StringCons::eq("k")];
        con.count = CountRange { min: 1, max: None };
        let rsc = ReadSet::build(
            &store,
            con.into_shared(),
            None,
            true,
            &ReadConfig::default(),
            slot.clone(),
        )
        .expect("build");
        let rsc = Rc::new(RefCell::new(rsc));
        let mut stack = Stack::new(CancelFlag::new(), 100_000);
        stack.push(Box::new(RscContext { rsc }));
        while stack
            .run_until_deadline(far_deadline())
            .expect("run")
            == Progress::Suspend
        {}
        let outcome = slot.borrow_mut().take().expect("outcome");
        assert!(outcome.ok);
        // Stopped as soon as the minimum was met.
        assert_eq!(outcome.count, 1);
        assert!(outcome.rows.is_empty());
    }

    #[test]
    fn test_fast_count_skips_scan() {
        let store = seeded(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let slot: Rc<RefCell<Option<ReadOutcome>>> = Rc::new(RefCell::new(None));
        // Count-only constraint over the bare universe: no predicates,
        // per-set count only.
        let mut con = Constraint::new();
        con.live = crate::constraint::TriState::DontCare;
        con.archival = crate::constraint::TriState::DontCare;
        con.count = CountRange::optional();
        con.result = Some(ResultPattern {
            per_id: None,
            per_set: Some(Pattern::Count),
        });
        let rsc = ReadSet::build(
            &store,
            con.into_shared(),
            None,
            false,
            &ReadConfig::default(),
            slot.clone(),
        )
        .expect("build");
        let rsc = Rc::new(RefCell::new(rsc));
        let mut stack = Stack::new(CancelFlag::new(), 100_000);
        stack.push(Box::new(RscContext { rsc }));
        while stack
            .run_until_deadline(far_deadline())
            .expect("run")
            == Progress::Suspend
        {}
        let outcome = slot.borrow_mut().take().expect("outcome");
        assert_eq!(outcome.count, 3);
        assert_eq!(outcome.per_set, Some(Value::Int(3)));
    }

    #[test]
    fn test_deferred_resume_materialises() {
        let store = seeded(&[("k", "1"), ("k", "2")]);
        let slot: Rc<RefCell<Option<ReadOutcome>>> = Rc::new(RefCell::new(None));
        let mut con = Constraint::new();
        con.name = vec![StringCons::eq("k")];
        con.result = Some(ResultPattern {
            per_id: Some(Pattern::Value),
            per_set: None,
        });
        // Run once in verify mode: existence only, no rows.
        let rsc = ReadSet::build(
            &store,
            con.into_shared(),
            None,
            true,
            &ReadConfig::default(),
            slot.clone(),
        )
        .expect("build");
        let rsc = Rc::new(RefCell::new(rsc));
        let mut stack = Stack::new(CancelFlag::new(), 100_000);
        stack.push(Box::new(RscContext { rsc: rsc.clone() }));
        while stack
            .run_until_deadline(far_deadline())
            .expect("run")
            == Progress::Suspend
        {}
        let verified = slot.borrow_mut().take().expect("outcome");
        assert!(verified.ok);
        assert!(verified.rows.is_empty());

        // The parked context stands behind a deferred value; resuming
        // it materialises the full rows.
        let lazy = Deferred { rsc, index: 0 };
        let value = deferred::resume(&lazy).expect("resume");
        assert_eq!(
            value,
            Value::List(vec![Value::Str("1".into()), Value::Str("2".into())])
        );
    }

    #[test]
    fn test_instantiate_patterns() {
        let store = seeded(&[("n", "v")]);
        let p = store.primitive_read(Id::new(0)).expect("read");
        let value = instantiate(
            &Pattern::List(vec![
                Pattern::Name,
                Pattern::Value,
                Pattern::Datatype,
                Pattern::Live,
                Pattern::Literal("x".into()),
            ]),
            &p,
            &[],
            0,
            None,
        )
        .expect("instantiate");
        assert_eq!(
            value,
            Value::List(vec![
                Value::Str("n".into()),
                Value::Str("v".into()),
                Value::Datatype(crate::ident::Datatype::String),
                Value::Bool(true),
                Value::Str("x".into()),
            ])
        );
    }
}
