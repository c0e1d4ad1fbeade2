//! # Primitive Store
//!
//! The store holds immutable primitives, the node-or-edge records of
//! the graph, and the indexes the iterator algebra draws candidate id
//! streams from. The on-disk tile layer is a separate concern; the
//! engine is written against the [`PrimitiveStore`] trait and ships
//! with [`MemStore`], an in-memory implementation that maintains the
//! full index surface (value/key hash, word/prefix, linkage fan-in,
//! ordered string bins) and the checkpoint/rollback contract.
//!
//! ## Index surface
//!
//! ```text
//! PrimitiveStore
//!   |-- primitives by id            (primitive_read, primitive_n)
//!   |-- guid <-> id, generations    (id_from_guid, newest_generation)
//!   |-- hash indexes                (value_hash_candidates: value, key)
//!   |-- word / prefix index         (word_candidates, prefix_candidates)
//!   |-- linkage fan-in              (vip_candidates)
//!   `-- ordered string bins         (bin_lookup, bin_start, bin_candidates)
//! ```
//!
//! Candidate lists are always ascending by id and clamped to the
//! caller's `[low, high)` id range, so iterator wrappers never re-sort.

pub mod memory;

pub use memory::MemStore;

use std::fmt;
use std::sync::Arc;

use crate::error::GraphResult;
use crate::ident::{Datatype, Guid, Id};

/// The four linkage slots of a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Linkage {
    Typeguid,
    Left,
    Right,
    Scope,
}

impl Linkage {
    /// All linkages, in freeze order.
    pub const ALL: [Linkage; 4] = [
        Linkage::Typeguid,
        Linkage::Left,
        Linkage::Right,
        Linkage::Scope,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Linkage::Typeguid => "typeguid",
            Linkage::Left => "left",
            Linkage::Right => "right",
            Linkage::Scope => "scope",
        }
    }

    pub fn parse(s: &str) -> Option<Linkage> {
        match s {
            "typeguid" => Some(Linkage::Typeguid),
            "left" => Some(Linkage::Left),
            "right" => Some(Linkage::Right),
            "scope" => Some(Linkage::Scope),
            _ => None,
        }
    }

    /// Index into per-linkage arrays; matches the order of `ALL`.
    pub fn index(self) -> usize {
        match self {
            Linkage::Typeguid => 0,
            Linkage::Left => 1,
            Linkage::Right => 2,
            Linkage::Scope => 3,
        }
    }
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An immutable record of the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Primitive {
    pub id: Id,
    pub guid: Guid,
    /// Linkage guids in `Linkage::ALL` order; `None` where absent.
    pub linkages: [Option<Guid>; 4],
    pub name: Option<String>,
    pub value: Option<String>,
    pub datatype: Datatype,
    pub timestamp: u64,
    pub live: bool,
    pub archival: bool,
}

impl Primitive {
    pub fn linkage(&self, which: Linkage) -> Option<Guid> {
        self.linkages[which.index()]
    }

    pub fn has_linkage(&self, which: Linkage) -> bool {
        self.linkages[which.index()].is_some()
    }

    /// Bytes of name + value, the quantity the size ceiling applies to.
    pub fn payload_size(&self) -> usize {
        self.name.as_deref().map_or(0, str::len) + self.value.as_deref().map_or(0, str::len)
    }
}

/// What a writer hands to `primitive_alloc`. The store assigns the id.
#[derive(Debug, Clone, Default)]
pub struct PrimitiveData {
    pub guid: Option<Guid>,
    pub linkages: [Option<Guid>; 4],
    pub name: Option<String>,
    pub value: Option<String>,
    pub datatype: Datatype,
    pub timestamp: u64,
    pub live: bool,
    pub archival: bool,
}

/// Which hash index to consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    /// Hash of the (case-folded) value string.
    Value,
    /// Hash of the (name, case-folded value) pair; used by key matching.
    Key,
}

impl HashKind {
    pub fn token(self) -> &'static str {
        match self {
            HashKind::Value => "v",
            HashKind::Key => "k",
        }
    }

    pub fn parse(s: &str) -> Option<HashKind> {
        match s {
            "v" => Some(HashKind::Value),
            "k" => Some(HashKind::Key),
            _ => None,
        }
    }
}

/// Store contract consumed by the engine. See the module docs for the
/// candidate-list conventions.
pub trait PrimitiveStore: Send + Sync + std::fmt::Debug {
    // ---- reads ----

    fn primitive_read(&self, id: Id) -> GraphResult<Arc<Primitive>>;

    /// Number of primitives; also the next id to be allocated and the
    /// rollback horizon unit.
    fn primitive_n(&self) -> u64;

    fn id_from_guid(&self, guid: &Guid) -> Option<Id>;

    fn guid_from_id(&self, id: Id) -> GraphResult<Guid>;

    /// Newest generation of `guid`'s lineage, if the lineage exists.
    fn newest_generation(&self, guid: &Guid) -> Option<Guid>;

    // ---- indexes ----

    fn hash_candidates(&self, kind: HashKind, bytes: &[u8], low: Id, high: Id) -> Vec<Id>;

    fn word_candidates(&self, word: &str, low: Id, high: Id) -> Vec<Id>;

    fn prefix_candidates(&self, prefix: &str, low: Id, high: Id) -> Vec<Id>;

    /// Fan-in of `linkage` pointing at `endpoint`, optionally restricted
    /// to primitives whose typeguid is `typeguid`.
    fn vip_candidates(
        &self,
        linkage: Linkage,
        endpoint: &Guid,
        typeguid: Option<&Guid>,
        low: Id,
        high: Id,
    ) -> Vec<Id>;

    // ---- ordered string bins ----

    fn bin_count(&self) -> usize;

    /// Index of the bin whose range contains `s`.
    fn bin_lookup(&self, s: &str) -> usize;

    /// First string of the bin, `None` past the end.
    fn bin_start(&self, bin: usize) -> Option<String>;

    /// Last string of the bin, `None` past the end.
    fn bin_end(&self, bin: usize) -> Option<String>;

    fn bin_candidates(&self, bin: usize, low: Id, high: Id) -> Vec<Id>;

    /// Average primitives per bin; feeds range statistics.
    fn bin_density(&self) -> u64;

    // ---- write path ----

    /// Allocate a guid: a fresh lineage when `lineage` is `None`, else
    /// the next generation of the given lineage.
    fn guid_alloc(&self, lineage: Option<&Guid>) -> GraphResult<Guid>;

    fn primitive_alloc(&self, data: PrimitiveData) -> GraphResult<Id>;

    // ---- maintenance ----

    fn checkpoint_rollback(&self, horizon: u64) -> GraphResult<()>;

    fn checkpoint_write(&self, sync: bool, block: bool) -> GraphResult<()>;

    /// A checkpoint the store may coalesce or skip.
    fn checkpoint_optional(&self) -> GraphResult<()>;

    /// A checkpoint that must happen soon (post-rollback repair).
    fn checkpoint_urgent(&self) -> GraphResult<()>;

    fn transactional(&self) -> bool;
}

/// Shared store handle used by iterators and engines.
pub type Store = Arc<dyn PrimitiveStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linkage_names_round_trip() {
        for l in Linkage::ALL {
            assert_eq!(Linkage::parse(l.name()), Some(l));
        }
        assert_eq!(Linkage::parse("up"), None);
    }

    #[test]
    fn test_linkage_index_matches_all_order() {
        for (i, l) in Linkage::ALL.iter().enumerate() {
            assert_eq!(l.index(), i);
        }
    }

    #[test]
    fn test_payload_size() {
        let p = Primitive {
            id: Id::new(0),
            guid: Guid::null(),
            linkages: [None; 4],
            name: Some("ab".into()),
            value: Some("cdef".into()),
            datatype: Datatype::String,
            timestamp: 0,
            live: true,
            archival: false,
        };
        assert_eq!(p.payload_size(), 6);
    }
}
