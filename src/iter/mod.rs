//! # Iterator Algebra
//!
//! Composable lazy streams of primitive ids. Every variant, from a
//! materialised [`FixedIterator`] to an [`AndIterator`] over a dozen
//! children, speaks the same capability surface: budgeted `next` /
//! `find` / `check`, incremental `statistics`, freeze/thaw through the
//! cursor codec, cloning with shared originals, and cross-iterator
//! `restrict` via primitive summaries.
//!
//! ## Budget discipline
//!
//! All costs are in one integer currency roughly proportional to I/O.
//! An operation that runs out of budget returns its `Suspend` variant
//! *without* logically advancing; internal progress (partially filled
//! heads, half-finished statistics) is kept so the retried call does
//! not repeat work. The caller owns the loop: top up the budget, call
//! again.
//!
//! ## Variants
//!
//! | kind | stream |
//! |------|--------|
//! | `null` | empty |
//! | `all` | the id universe `[low, high)` |
//! | `fixed` | a small materialised, sorted id set |
//! | `word`, `prefix` | string-index candidates |
//! | `hash` | value/key hash-index candidates |
//! | `vip` | linkage fan-in to one endpoint, optionally typed |
//! | `and` | intersection (producer/checker or parallel merge) |
//! | `or` | union (sorted heads chain or sequential round-robin) |
//! | `isa` | endpoint projection of a link stream |
//! | `bin` | comparator-ordered walk over the string-bin space |

pub mod and;
pub mod bin;
pub mod fixed;
pub mod index;
pub mod isa;
pub mod or;
pub mod vip;

pub use and::AndIterator;
pub use bin::BinIterator;
pub use fixed::{AllIterator, FixedIterator, NullIterator};
pub use index::{IndexIterator, IndexSource};
pub use isa::IsaIterator;
pub use or::OrIterator;
pub use vip::VipIterator;

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use crate::error::{Advance, GraphResult, Membership, Progress};
use crate::ident::{Guid, Id};
use crate::store::{Linkage, Primitive};

/// Cost of a plain function call / array step.
pub const COST_CALL: u64 = 1;
/// Cost of a hash-index probe.
pub const COST_HASH: u64 = 12;
/// Cost of an index page step.
pub const COST_INDEX: u64 = 6;
/// Cost of materialising a primitive.
pub const COST_PRIMITIVE: u64 = 24;

/// Ceiling under which an OR is collapsed into a fixed set at
/// construction time.
pub const SMALL_SET_BUDGET: u64 = 256;

/// Signed budget counter. See the module docs for the discipline.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    remaining: i64,
}

impl Budget {
    pub fn new(amount: i64) -> Budget {
        Budget { remaining: amount }
    }

    /// An effectively infinite budget for construction-time rewrites
    /// and tests.
    pub fn unlimited() -> Budget {
        Budget {
            remaining: i64::MAX / 2,
        }
    }

    /// Subtract `cost`; report whether there is still budget left.
    /// The cost is consumed either way, which is what guarantees the
    /// outer loop terminates.
    pub fn charge(&mut self, cost: u64) -> bool {
        self.remaining -= cost as i64;
        self.remaining >= 0
    }

    pub fn exhausted(&self) -> bool {
        self.remaining < 0
    }

    pub fn remaining(&self) -> i64 {
        self.remaining
    }
}

/// Direction of iteration over the id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn token(self) -> char {
        match self {
            Direction::Forward => 'f',
            Direction::Backward => 'b',
        }
    }

    pub fn from_token(c: char) -> Option<Direction> {
        match c {
            'f' => Some(Direction::Forward),
            'b' => Some(Direction::Backward),
            _ => None,
        }
    }

    /// `a` is at-or-after `b` in this direction.
    pub fn at_or_after(self, a: Id, b: Id) -> bool {
        match self {
            Direction::Forward => a >= b,
            Direction::Backward => a <= b,
        }
    }

    /// The "winning" (first to deliver) id of a pair in this direction.
    pub fn first_of(self, a: Id, b: Id) -> Id {
        match self {
            Direction::Forward => a.min(b),
            Direction::Backward => a.max(b),
        }
    }
}

impl From<Direction> for crate::cmp::WalkDirection {
    fn from(d: Direction) -> Self {
        match d {
            Direction::Forward => crate::cmp::WalkDirection::Forward,
            Direction::Backward => crate::cmp::WalkDirection::Backward,
        }
    }
}

/// Variant tag; the leading token of every frozen set slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterKind {
    Null,
    All,
    Fixed,
    Word,
    Prefix,
    Hash,
    Vip,
    And,
    Or,
    Isa,
    Bin,
}

impl IterKind {
    pub fn token(self) -> &'static str {
        match self {
            IterKind::Null => "null",
            IterKind::All => "all",
            IterKind::Fixed => "fixed",
            IterKind::Word => "word",
            IterKind::Prefix => "prefix",
            IterKind::Hash => "hash",
            IterKind::Vip => "vip",
            IterKind::And => "and",
            IterKind::Or => "or",
            IterKind::Isa => "isa",
            IterKind::Bin => "bin",
        }
    }
}

impl fmt::Display for IterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Which slices of an iterator to freeze.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreezeFlags {
    pub set: bool,
    pub position: bool,
    pub state: bool,
}

impl FreezeFlags {
    pub const ALL: FreezeFlags = FreezeFlags {
        set: true,
        position: true,
        state: true,
    };

    pub const SET: FreezeFlags = FreezeFlags {
        set: true,
        position: false,
        state: false,
    };
}

/// Cost statistics of an iterator, in budget units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    pub check_cost: u64,
    pub next_cost: u64,
    pub find_cost: u64,
    /// Estimated stream size.
    pub n: u64,
    pub sorted: bool,
}

impl Statistics {
    /// Full production cost: walking the whole stream.
    pub fn scan_cost(&self) -> u64 {
        self.n.saturating_mul(self.next_cost.max(1))
    }
}

/// A fixed linkage/type profile every produced primitive satisfies.
///
/// Used by `restrict`: an iterator that can prove "everything I return
/// has `right = G`" lets an AND partner specialise itself to that
/// fan-in instead of checking each candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrimitiveSummary {
    /// Fixed guids in `Linkage::ALL` order.
    pub linkages: [Option<Guid>; 4],
}

impl PrimitiveSummary {
    pub fn with(mut self, which: Linkage, guid: Guid) -> PrimitiveSummary {
        self.linkages[which.index()] = Some(guid);
        self
    }

    pub fn get(&self, which: Linkage) -> Option<Guid> {
        self.linkages[which.index()]
    }

    pub fn is_empty(&self) -> bool {
        self.linkages.iter().all(Option::is_none)
    }

    pub fn matches(&self, p: &Primitive) -> bool {
        Linkage::ALL
            .into_iter()
            .all(|l| self.get(l).is_none_or(|g| p.linkage(l) == Some(g)))
    }

    /// Combine two summaries; `None` when they pin the same linkage to
    /// different guids (the intersection would be empty; the caller
    /// handles that as a null stream).
    pub fn merge(&self, other: &PrimitiveSummary) -> Option<PrimitiveSummary> {
        let mut out = PrimitiveSummary::default();
        for l in Linkage::ALL {
            out.linkages[l.index()] = match (self.get(l), other.get(l)) {
                (Some(a), Some(b)) if a != b => return None,
                (a, b) => a.or(b),
            };
        }
        Some(out)
    }
}

/// Conservative bounds on an iterator's stream.
#[derive(Debug, Clone, Copy)]
pub struct RangeEstimate {
    pub low: Id,
    pub high: Id,
    pub n_exact: Option<u64>,
    pub n_max: u64,
}

/// Outcome of `restrict`.
pub enum Restriction {
    /// The iterator already satisfies the summary.
    Already,
    /// The restricted stream is provably empty.
    No,
    /// A new, restricted iterator.
    New(Box<dyn IdIterator>),
}

/// Outcome of `refresh` against a shared original.
pub enum Refresh {
    /// The original is unchanged.
    Already,
    /// The original evolved; here is a replacement positioned like the
    /// stale instance.
    Replaced(Box<dyn IdIterator>),
}

/// Shared "original" an instance was cloned from. During commit an
/// original may be substituted by an equivalent iterator; instances
/// detect this through the generation counter and re-clone.
#[derive(Debug)]
pub struct OriginalCell {
    pub generation: u64,
    /// Frozen set slice of the current equivalent.
    pub frozen_set: String,
}

/// Handle tying instances to their original. Originals outlive
/// instances by construction: every instance holds a strong reference.
pub type OriginalHandle = Arc<RwLock<OriginalCell>>;

/// Create an original cell for a stored iterator.
pub fn new_original(frozen_set: String) -> OriginalHandle {
    Arc::new(RwLock::new(OriginalCell {
        generation: 0,
        frozen_set,
    }))
}

/// Substitute an original with an equivalent; bumps the generation so
/// instances re-clone on their next `refresh`.
pub fn substitute_original(handle: &OriginalHandle, frozen_set: String) {
    let mut cell = handle.write();
    cell.generation += 1;
    cell.frozen_set = frozen_set;
}

/// The capability surface every iterator variant implements.
///
/// The set is closed (see [`IterKind`]); the trait exists for dispatch,
/// not extension.
pub trait IdIterator: Send + std::fmt::Debug {
    fn kind(&self) -> IterKind;

    fn direction(&self) -> Direction;

    /// True when `next` produces ids monotonically in `direction`.
    fn sorted(&self) -> bool;

    /// Value-ordering hint: the comparator whose order `next` follows,
    /// for iterators ordered by value rather than id.
    fn ordering(&self) -> Option<&str> {
        None
    }

    /// Id range `[low, high)` this iterator confines itself to.
    fn id_range(&self) -> (Id, Id);

    /// Compute or refine statistics. May suspend.
    fn statistics(&mut self, budget: &mut Budget) -> GraphResult<Progress>;

    /// Statistics, if `statistics` has completed.
    fn stats(&self) -> Option<Statistics>;

    /// Next id in natural order.
    fn next_id(&mut self, budget: &mut Budget) -> GraphResult<Advance>;

    /// Sorted iterators only: position at the first id at-or-after
    /// `target` in the iterator's direction and produce it. The
    /// produced id may exceed the target.
    fn find(&mut self, target: Id, budget: &mut Budget) -> GraphResult<Advance>;

    /// Membership test.
    fn check(&mut self, id: Id, budget: &mut Budget) -> GraphResult<Membership>;

    /// Independent position and call-state; shared original.
    fn clone_iter(&self) -> Box<dyn IdIterator>;

    /// Rewind to the start.
    fn reset(&mut self);

    /// Append the requested slices to `out`. Composite iterators
    /// interleave child freezes recursively.
    fn freeze(&self, flags: FreezeFlags, out: &mut String) -> GraphResult<()>;

    /// Fixed linkage/type profile of everything this iterator returns.
    fn primitive_summary(&self) -> Option<PrimitiveSummary> {
        None
    }

    /// Ordered iterators: has the stream moved past `id`'s position?
    fn beyond(&self, id: Id) -> GraphResult<bool>;

    fn range_estimate(&self) -> RangeEstimate;

    /// Produce an iterator restricted to primitives satisfying `psum`.
    fn restrict(&self, psum: &PrimitiveSummary) -> GraphResult<Restriction> {
        let _ = psum;
        Ok(Restriction::Already)
    }

    /// The original this instance was cloned from, if any.
    fn original(&self) -> Option<OriginalHandle> {
        None
    }

    /// True when the shared original has been substituted since this
    /// instance was created; `refresh_pointer` re-clones.
    fn original_stale(&self) -> bool {
        false
    }

    /// Last id produced, if any. Drives `beyond` and re-positioning
    /// after a refresh.
    fn last_id(&self) -> Option<Id>;

    /// Downcast hook for the cursor codec's position replay. Every
    /// variant returns `self`.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// Boxed iterator alias used throughout the engine.
pub type BoxedIter = Box<dyn IdIterator>;

/// `beyond` helper shared by the id-ordered variants.
pub(crate) fn beyond_by_id(dir: Direction, last: Option<Id>, id: Id) -> bool {
    match last {
        None => false,
        Some(last) => match dir {
            Direction::Forward => last > id,
            Direction::Backward => last < id,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_charge() {
        let mut b = Budget::new(3);
        assert!(b.charge(2));
        assert!(!b.exhausted());
        assert!(!b.charge(2));
        assert!(b.exhausted());
        // Cost is consumed even on the failing charge.
        assert_eq!(b.remaining(), -1);
    }

    #[test]
    fn test_direction_helpers() {
        let f = Direction::Forward;
        let b = Direction::Backward;
        assert!(f.at_or_after(Id::new(5), Id::new(5)));
        assert!(f.at_or_after(Id::new(6), Id::new(5)));
        assert!(b.at_or_after(Id::new(4), Id::new(5)));
        assert_eq!(f.first_of(Id::new(3), Id::new(7)), Id::new(3));
        assert_eq!(b.first_of(Id::new(3), Id::new(7)), Id::new(7));
    }

    #[test]
    fn test_summary_merge() {
        let g1 = Guid::from_parts(1, 1, 1).unwrap();
        let g2 = Guid::from_parts(1, 2, 2).unwrap();
        let a = PrimitiveSummary::default().with(Linkage::Right, g1);
        let b = PrimitiveSummary::default().with(Linkage::Typeguid, g2);
        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.get(Linkage::Right), Some(g1));
        assert_eq!(merged.get(Linkage::Typeguid), Some(g2));

        let conflicting = PrimitiveSummary::default().with(Linkage::Right, g2);
        assert!(a.merge(&conflicting).is_none());
    }

    #[test]
    fn test_original_substitution_bumps_generation() {
        let handle = new_original("fixed:f[*-*]:1:2a".into());
        assert_eq!(handle.read().generation, 0);
        substitute_original(&handle, "null:".into());
        assert_eq!(handle.read().generation, 1);
        assert_eq!(handle.read().frozen_set, "null:");
    }

    #[test]
    fn test_beyond_by_id() {
        assert!(!beyond_by_id(Direction::Forward, None, Id::new(5)));
        assert!(beyond_by_id(
            Direction::Forward,
            Some(Id::new(9)),
            Id::new(5)
        ));
        assert!(beyond_by_id(
            Direction::Backward,
            Some(Id::new(2)),
            Id::new(5)
        ));
    }
}
