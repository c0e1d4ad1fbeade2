//! String-index and hash-index iterators.
//!
//! These wrap the store's candidate lists (word, prefix, value-hash,
//! key-hash) behind the common capability surface. The set slice of
//! their frozen form records the *query* (the word, the prefix, the
//! hashed bytes), not the materialised ids, so a thawed cursor
//! re-reads the index and stays correct across store growth within the
//! id range it was confined to.

use crate::cursor::scan::escape_token;
use crate::error::{Advance, GraphResult, Membership, Progress};
use crate::ident::Id;
use crate::store::{HashKind, PrimitiveStore, Store};

use super::{
    Budget, Direction, FixedIterator, FreezeFlags, IdIterator, IterKind, RangeEstimate,
    Statistics, COST_HASH, COST_INDEX,
};

/// Which index a stream was drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSource {
    Word(String),
    Prefix(String),
    Hash(HashKind, Vec<u8>),
}

impl IndexSource {
    fn kind(&self) -> IterKind {
        match self {
            IndexSource::Word(_) => IterKind::Word,
            IndexSource::Prefix(_) => IterKind::Prefix,
            IndexSource::Hash(..) => IterKind::Hash,
        }
    }

    fn probe_cost(&self) -> u64 {
        match self {
            IndexSource::Hash(..) => COST_HASH,
            _ => COST_INDEX,
        }
    }

    fn candidates(&self, store: &Store, low: Id, high: Id) -> Vec<Id> {
        match self {
            IndexSource::Word(w) => store.word_candidates(w, low, high),
            IndexSource::Prefix(p) => store.prefix_candidates(p, low, high),
            IndexSource::Hash(kind, bytes) => store.hash_candidates(*kind, bytes, low, high),
        }
    }
}

/// Iterator over one index posting list.
#[derive(Debug)]
pub struct IndexIterator {
    source: IndexSource,
    low: Id,
    high: Id,
    inner: FixedIterator,
}

impl IndexIterator {
    pub fn new(store: &Store, source: IndexSource, low: Id, high: Id, dir: Direction) -> IndexIterator {
        let high = high.min(Id::new(store.primitive_n()));
        let ids = source.candidates(store, low, high);
        IndexIterator {
            source,
            low,
            high,
            inner: FixedIterator::new(ids, dir).with_store(store.clone()),
        }
    }

    pub fn source(&self) -> &IndexSource {
        &self.source
    }

    pub(crate) fn set_offset(&mut self, offset: usize, last: Option<Id>) {
        self.inner.set_offset(offset, last);
    }
}

impl IdIterator for IndexIterator {
    fn kind(&self) -> IterKind {
        self.source.kind()
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
        if !budget.charge(self.source.probe_cost()) {
            return Ok(Progress::Suspend);
        }
        Ok(Progress::Done)
    }

    fn stats(&self) -> Option<Statistics> {
        let inner = self.inner.stats()?;
        Some(Statistics {
            check_cost: inner.check_cost + self.source.probe_cost(),
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
        Box::new(IndexIterator {
            source: self.source.clone(),
            low: self.low,
            high: self.high,
            inner: FixedIterator::new(self.inner.ids().to_vec(), self.inner.direction()),
        })
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn freeze(&self, flags: FreezeFlags, out: &mut String) -> GraphResult<()> {
        let mut slices = Vec::new();
        if flags.set {
            let head = match &self.source {
                IndexSource::Word(w) => format!("word:{}", escape_token(w)),
                IndexSource::Prefix(p) => format!("prefix:{}", escape_token(p)),
                IndexSource::Hash(kind, bytes) => {
                    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
                    format!("hash:{}:{hex}", kind.token())
                }
            };
            slices.push(format!(
                "{head}:{}[{}-{}]",
                self.inner.direction().token(),
                self.low,
                self.high
            ));
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

    fn beyond(&self, id: Id) -> GraphResult<bool> {
        self.inner.beyond(id)
    }

    fn range_estimate(&self) -> RangeEstimate {
        self.inner.range_estimate()
    }

    fn last_id(&self) -> Option<Id> {
        self.inner.last_id()
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
