//! In-memory reference store.
//!
//! [`MemStore`] implements the full [`PrimitiveStore`] contract against
//! plain collections: an append-only primitive vector, guid and lineage
//! maps, value/key hash indexes, a word/prefix index over name and value
//! words, per-(linkage, endpoint) fan-in lists, and the ordered string
//! bin table.
//!
//! The bin table here keeps one distinct value string per bin; a tile
//! store buckets many strings per bin, which only changes the constant
//! in the datetime comparator's statistics. Hash candidates may contain
//! collisions; the read engine re-verifies every candidate against the
//! primitive, so the index only has to be complete, not exact.
//!
//! Rollback truncates the primitive vector to the horizon and rebuilds
//! every index. Serial allocation is deliberately *not* rolled back:
//! guids are never reused, even across a failed write.

use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{GraphError, GraphResult};
use crate::ident::{Guid, Id};

use super::{HashKind, Linkage, Primitive, PrimitiveData, PrimitiveStore};

/// Default ceiling on name+value bytes of a single primitive.
pub const DEFAULT_PAYLOAD_LIMIT: usize = 1 << 20;

/// In-memory store; see the module docs.
#[derive(Debug)]
pub struct MemStore {
    inner: RwLock<Inner>,
    db: u32,
    payload_limit: usize,
    transactional: bool,
}

#[derive(Default, Debug)]
struct Inner {
    primitives: Vec<Arc<Primitive>>,
    by_guid: HashMap<Guid, Id>,
    /// (db, local) → newest guid of the lineage.
    lineages: HashMap<(u32, u64), Guid>,
    next_serial: u64,
    value_hash: HashMap<u64, Vec<Id>>,
    key_hash: HashMap<u64, Vec<Id>>,
    words: HashMap<String, Vec<Id>>,
    fan_in: HashMap<(Linkage, Guid), Vec<Id>>,
    /// Sorted distinct value strings; one bin per string.
    bins: Vec<String>,
    bin_ids: Vec<Vec<Id>>,
    checkpoints_written: u64,
    optional_checkpoints: u64,
    urgent_checkpoints: u64,
    fail_after_allocs: Option<u32>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::with_db(1)
    }

    pub fn with_db(db: u32) -> MemStore {
        MemStore {
            inner: RwLock::new(Inner {
                next_serial: 1,
                ..Inner::default()
            }),
            db,
            payload_limit: DEFAULT_PAYLOAD_LIMIT,
            transactional: false,
        }
    }

    pub fn set_payload_limit(&mut self, limit: usize) {
        self.payload_limit = limit;
    }

    pub fn set_transactional(&mut self, transactional: bool) {
        self.transactional = transactional;
    }

    /// Fault injection: the n-th subsequent `primitive_alloc` fails.
    /// Used by rollback tests.
    pub fn fail_after_allocs(&self, n: u32) {
        self.inner.write().fail_after_allocs = Some(n);
    }

    /// Number of full checkpoints written so far.
    pub fn checkpoints_written(&self) -> u64 {
        self.inner.read().checkpoints_written
    }

    /// Number of optional checkpoint requests observed.
    pub fn optional_checkpoints(&self) -> u64 {
        self.inner.read().optional_checkpoints
    }

    fn hash_bytes(bytes: &[u8]) -> u64 {
        let mut h = DefaultHasher::new();
        bytes.hash(&mut h);
        h.finish()
    }

    /// Case-folded value bytes; the default comparator and the value
    /// hash agree on this fold.
    fn value_key(value: &str) -> Vec<u8> {
        value.to_lowercase().into_bytes()
    }

    fn key_key(name: Option<&str>, value: Option<&str>) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(name.unwrap_or("").to_lowercase().as_bytes());
        out.push(0);
        out.extend_from_slice(&value.map(Self::value_key).unwrap_or_default());
        out
    }

    fn words_of(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Default for MemStore {
    fn default() -> Self {
        MemStore::new()
    }
}

impl Inner {
    fn index_primitive(&mut self, p: &Arc<Primitive>) {
        let id = p.id;
        if let Some(value) = p.value.as_deref() {
            let vh = MemStore::hash_bytes(&MemStore::value_key(value));
            self.value_hash.entry(vh).or_default().push(id);
            let bin = match self.bins.binary_search_by(|b| b.as_str().cmp(value)) {
                Ok(i) => i,
                Err(i) => {
                    self.bins.insert(i, value.to_string());
                    self.bin_ids.insert(i, Vec::new());
                    i
                }
            };
            self.bin_ids[bin].push(id);
        }
        if p.name.is_some() || p.value.is_some() {
            let kh = MemStore::hash_bytes(&MemStore::key_key(
                p.name.as_deref(),
                p.value.as_deref(),
            ));
            self.key_hash.entry(kh).or_default().push(id);
        }
        for text in [p.name.as_deref(), p.value.as_deref()].into_iter().flatten() {
            for word in MemStore::words_of(text) {
                let ids = self.words.entry(word).or_default();
                if ids.last() != Some(&id) {
                    ids.push(id);
                }
            }
        }
        for which in Linkage::ALL {
            if let Some(endpoint) = p.linkage(which) {
                self.fan_in.entry((which, endpoint)).or_default().push(id);
            }
        }
    }

    fn rebuild_indexes(&mut self) {
        self.by_guid.clear();
        self.lineages.clear();
        self.value_hash.clear();
        self.key_hash.clear();
        self.words.clear();
        self.fan_in.clear();
        self.bins.clear();
        self.bin_ids.clear();
        let primitives = self.primitives.clone();
        for p in &primitives {
            self.by_guid.insert(p.guid, p.id);
            let key = (p.guid.db(), p.guid.local());
            let newest = self.lineages.entry(key).or_insert(p.guid);
            if newest.serial() < p.guid.serial() {
                *newest = p.guid;
            }
            self.index_primitive(p);
        }
    }
}

/// Clamp an ascending id list to `[low, high)`.
fn clamp(ids: &[Id], low: Id, high: Id) -> Vec<Id> {
    ids.iter()
        .copied()
        .filter(|id| *id >= low && *id < high)
        .collect()
}

impl PrimitiveStore for MemStore {
    fn primitive_read(&self, id: Id) -> GraphResult<Arc<Primitive>> {
        let inner = self.inner.read();
        inner
            .primitives
            .get(id.raw() as usize)
            .cloned()
            .ok_or_else(|| GraphError::NotFound(format!("primitive {id}")))
    }

    fn primitive_n(&self) -> u64 {
        self.inner.read().primitives.len() as u64
    }

    fn id_from_guid(&self, guid: &Guid) -> Option<Id> {
        self.inner.read().by_guid.get(guid).copied()
    }

    fn guid_from_id(&self, id: Id) -> GraphResult<Guid> {
        self.primitive_read(id).map(|p| p.guid)
    }

    fn newest_generation(&self, guid: &Guid) -> Option<Guid> {
        self.inner
            .read()
            .lineages
            .get(&(guid.db(), guid.local()))
            .copied()
    }

    fn hash_candidates(&self, kind: HashKind, bytes: &[u8], low: Id, high: Id) -> Vec<Id> {
        let hash = MemStore::hash_bytes(bytes);
        let inner = self.inner.read();
        let table = match kind {
            HashKind::Value => &inner.value_hash,
            HashKind::Key => &inner.key_hash,
        };
        table.get(&hash).map_or_else(Vec::new, |ids| clamp(ids, low, high))
    }

    fn word_candidates(&self, word: &str, low: Id, high: Id) -> Vec<Id> {
        let inner = self.inner.read();
        inner
            .words
            .get(&word.to_lowercase())
            .map_or_else(Vec::new, |ids| clamp(ids, low, high))
    }

    fn prefix_candidates(&self, prefix: &str, low: Id, high: Id) -> Vec<Id> {
        let prefix = prefix.to_lowercase();
        let inner = self.inner.read();
        let mut out: Vec<Id> = inner
            .words
            .iter()
            .filter(|(w, _)| w.starts_with(&prefix))
            .flat_map(|(_, ids)| ids.iter().copied())
            .filter(|id| *id >= low && *id < high)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    fn vip_candidates(
        &self,
        linkage: Linkage,
        endpoint: &Guid,
        typeguid: Option<&Guid>,
        low: Id,
        high: Id,
    ) -> Vec<Id> {
        let inner = self.inner.read();
        let Some(ids) = inner.fan_in.get(&(linkage, *endpoint)) else {
            return Vec::new();
        };
        ids.iter()
            .copied()
            .filter(|id| *id >= low && *id < high)
            .filter(|id| match typeguid {
                None => true,
                Some(tg) => inner
                    .primitives
                    .get(id.raw() as usize)
                    .is_some_and(|p| p.linkage(Linkage::Typeguid) == Some(*tg)),
            })
            .collect()
    }

    fn bin_count(&self) -> usize {
        self.inner.read().bins.len()
    }

    fn bin_lookup(&self, s: &str) -> usize {
        // Lower bound: index of the first bin whose start is >= s.
        let inner = self.inner.read();
        inner.bins.partition_point(|b| b.as_str() < s)
    }

    fn bin_start(&self, bin: usize) -> Option<String> {
        self.inner.read().bins.get(bin).cloned()
    }

    fn bin_end(&self, bin: usize) -> Option<String> {
        // One string per bin in the memory store.
        self.bin_start(bin)
    }

    fn bin_candidates(&self, bin: usize, low: Id, high: Id) -> Vec<Id> {
        let inner = self.inner.read();
        inner
            .bin_ids
            .get(bin)
            .map_or_else(Vec::new, |ids| clamp(ids, low, high))
    }

    fn bin_density(&self) -> u64 {
        let inner = self.inner.read();
        if inner.bins.is_empty() {
            return 1;
        }
        let total: usize = inner.bin_ids.iter().map(Vec::len).sum();
        (total as u64 / inner.bins.len() as u64).max(1)
    }

    fn guid_alloc(&self, lineage: Option<&Guid>) -> GraphResult<Guid> {
        let mut inner = self.inner.write();
        let serial = inner.next_serial;
        inner.next_serial += 1;
        match lineage {
            None => Guid::from_parts(self.db, serial, serial),
            Some(base) => base.versioned(serial),
        }
    }

    fn primitive_alloc(&self, data: PrimitiveData) -> GraphResult<Id> {
        let mut inner = self.inner.write();

        if let Some(n) = inner.fail_after_allocs {
            if n == 0 {
                return Err(GraphError::Internal("injected allocation fault".into()));
            }
            inner.fail_after_allocs = Some(n - 1);
        }

        let size = data.name.as_deref().map_or(0, str::len)
            + data.value.as_deref().map_or(0, str::len);
        if size > self.payload_limit {
            return Err(GraphError::PrimitiveTooLarge {
                size,
                limit: self.payload_limit,
            });
        }

        let guid = match data.guid {
            Some(g) => g,
            None => {
                let serial = inner.next_serial;
                inner.next_serial += 1;
                Guid::from_parts(self.db, serial, serial)?
            }
        };
        if inner.by_guid.contains_key(&guid) {
            return Err(GraphError::Semantics(format!("guid {guid} already written")));
        }

        let id = Id::new(inner.primitives.len() as u64);
        let p = Arc::new(Primitive {
            id,
            guid,
            linkages: data.linkages,
            name: data.name,
            value: data.value,
            datatype: data.datatype,
            timestamp: data.timestamp,
            live: data.live,
            archival: data.archival,
        });

        inner.primitives.push(p.clone());
        inner.by_guid.insert(guid, id);
        let key = (guid.db(), guid.local());
        let newest = inner.lineages.entry(key).or_insert(guid);
        if newest.serial() < guid.serial() {
            *newest = guid;
        }
        inner.index_primitive(&p);
        Ok(id)
    }

    fn checkpoint_rollback(&self, horizon: u64) -> GraphResult<()> {
        let mut inner = self.inner.write();
        if horizon > inner.primitives.len() as u64 {
            return Err(GraphError::Internal(format!(
                "rollback horizon {horizon} beyond primitive_n {}",
                inner.primitives.len()
            )));
        }
        inner.primitives.truncate(horizon as usize);
        inner.rebuild_indexes();
        Ok(())
    }

    fn checkpoint_write(&self, _sync: bool, _block: bool) -> GraphResult<()> {
        self.inner.write().checkpoints_written += 1;
        Ok(())
    }

    fn checkpoint_optional(&self) -> GraphResult<()> {
        self.inner.write().optional_checkpoints += 1;
        Ok(())
    }

    fn checkpoint_urgent(&self) -> GraphResult<()> {
        self.inner.write().urgent_checkpoints += 1;
        Ok(())
    }

    fn transactional(&self) -> bool {
        self.transactional
    }
}
