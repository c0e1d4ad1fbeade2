//! Intrinsic predicate evaluation.
//!
//! "Intrinsic" predicates are the ones decidable from the candidate
//! primitive alone (guid and linkage filters, name/value string
//! predicates, value type, liveness, generation) as opposed to
//! subconstraints, which need their own scans. The read engine runs
//! these first, before spending any budget on children.

use crate::cmp::Comparator;
use crate::error::GraphResult;
use crate::store::{Linkage, Primitive, PrimitiveStore, Store};

use super::{Constraint, StringCons, StringOp};

/// Does `p` satisfy every intrinsic predicate of `c`?
///
/// Value predicates run under `cmp` (the constraint's selected
/// comparator); name predicates always use case-insensitive equality
/// semantics, matching how the name index folds.
pub fn intrinsics_match(
    c: &Constraint,
    p: &Primitive,
    cmp: &dyn Comparator,
    store: &Store,
) -> GraphResult<bool> {
    if c.unsatisfiable {
        return Ok(false);
    }
    if !c.guid.accepts(&p.guid) {
        return Ok(false);
    }
    for which in Linkage::ALL {
        let filter = c.linkage_filter(which);
        if filter.is_unconstrained() {
            continue;
        }
        match p.linkage(which) {
            Some(endpoint) => {
                if !filter.accepts(&endpoint) {
                    return Ok(false);
                }
            }
            // A constrained endpoint must exist.
            None => return Ok(false),
        }
    }
    if let Some(vt) = c.valuetype {
        if p.datatype != vt {
            return Ok(false);
        }
    }
    if !c.live.accepts(p.live) || !c.archival.accepts(p.archival) {
        return Ok(false);
    }
    if !string_predicates_match(&c.name, p.name.as_deref(), &NameCompare, store)? {
        return Ok(false);
    }
    if !string_predicates_match(&c.value, p.value.as_deref(), cmp, store)? {
        return Ok(false);
    }
    if let Some(newest) = c.newest {
        let is_newest = store.newest_generation(&p.guid) == Some(p.guid);
        if newest != is_newest {
            return Ok(false);
        }
    }
    if let Some(oldest) = c.oldest {
        let is_oldest = p.guid.serial() == p.guid.local();
        if oldest != is_oldest {
            return Ok(false);
        }
    }
    if let Some(dateline) = &c.dateline {
        // A dateline constraint selects what the client has not seen:
        // primitives newer than its recorded serial for our database.
        if let Some(seen) = dateline.get(p.guid.db()) {
            if p.guid.serial() <= seen {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Does `p` satisfy at least one alternative of every OR branch?
/// Branch liveness for a specific primitive; the read engine caches
/// the per-branch outcome in its OR map.
pub fn or_branches_match(
    c: &Constraint,
    p: &Primitive,
    cmp: &dyn Comparator,
    store: &Store,
) -> GraphResult<Vec<bool>> {
    let mut alive = Vec::with_capacity(c.or.len());
    for branch in &c.or {
        let mut any = branch.alternatives.is_empty();
        for alt in &branch.alternatives {
            if intrinsics_match(alt, p, cmp, store)? {
                any = true;
                break;
            }
        }
        alive.push(any);
    }
    Ok(alive)
}

fn string_predicates_match(
    cons: &[StringCons],
    actual: Option<&str>,
    cmp: &dyn Comparator,
    _store: &Store,
) -> GraphResult<bool> {
    for c in cons {
        if !one_predicate(c, actual, cmp)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn one_predicate(
    c: &StringCons,
    actual: Option<&str>,
    cmp: &dyn Comparator,
) -> GraphResult<bool> {
    use std::cmp::Ordering;
    Ok(match (&c.pattern, actual) {
        (None, None) => matches!(c.op, StringOp::Eq),
        (None, Some(_)) => matches!(c.op, StringOp::Ne),
        (Some(_), None) => matches!(c.op, StringOp::Ne),
        (Some(pattern), Some(actual)) => match c.op {
            StringOp::Eq => cmp.equal(actual, pattern),
            StringOp::Ne => !cmp.equal(actual, pattern),
            StringOp::Lt => cmp.sort_compare(actual, pattern) == Ordering::Less,
            StringOp::Le => cmp.sort_compare(actual, pattern) != Ordering::Greater,
            StringOp::Gt => cmp.sort_compare(actual, pattern) == Ordering::Greater,
            StringOp::Ge => cmp.sort_compare(actual, pattern) != Ordering::Less,
            StringOp::Glob => cmp.glob_match(pattern, actual)?,
            StringOp::Match => word_match(pattern, actual),
        },
    })
}

/// `match` predicate: every word of the pattern occurs as a word of
/// the text, case-folded the way the word index folds.
fn word_match(pattern: &str, text: &str) -> bool {
    let words: Vec<String> = text
        .to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    pattern
        .to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .all(|w| words.iter().any(|have| have == w))
}

/// Name comparisons are case-insensitive equality/order regardless of
/// the constraint's value comparator.
#[derive(Debug)]
struct NameCompare;

impl Comparator for NameCompare {
    fn name(&self) -> &'static str {
        "name"
    }

    fn syntax_ok(&self, _value: &str) -> bool {
        true
    }

    fn sort_compare(&self, a: &str, b: &str) -> std::cmp::Ordering {
        a.to_lowercase().cmp(&b.to_lowercase())
    }

    fn glob_match(&self, pattern: &str, value: &str) -> GraphResult<bool> {
        Ok(crate::cmp::glob(pattern, value, |a, b| {
            a.to_lowercase().eq(b.to_lowercase())
        }))
    }

    fn vrange(
        &self,
        _store: &Store,
        _low: Option<&str>,
        _high: Option<&str>,
        _dir: crate::cmp::WalkDirection,
    ) -> Option<Box<dyn crate::cmp::ValueRange>> {
        None
    }

    fn vrange_thaw(
        &self,
        _store: &Store,
        frozen: &str,
    ) -> GraphResult<Box<dyn crate::cmp::ValueRange>> {
        Err(crate::error::GraphError::BadCursor(format!(
            "name comparator has no ranges: {frozen:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmp::comparator;
    use crate::constraint::{GuidFilter, OrBranch, StringCons, TriState};
    use crate::ident::Datatype;
    use crate::store::{MemStore, PrimitiveData, PrimitiveStore};
    use std::sync::Arc;

    fn sample_store() -> (Store, Primitive) {
        let store = MemStore::new();
        let id = store
            .primitive_alloc(PrimitiveData {
                name: Some("Color".into()),
                value: Some("Dark Blue".into()),
                datatype: Datatype::String,
                live: true,
                ..PrimitiveData::default()
            })
            .unwrap();
        let store: Store = Arc::new(store);
        let p = store.primitive_read(id).unwrap().as_ref().clone();
        (store, p)
    }

    #[test]
    fn test_name_value_equality() {
        let (store, p) = sample_store();
        let cmp = comparator("default").unwrap();
        let mut c = Constraint::name_value("color", "dark blue");
        c.normalize();
        assert!(intrinsics_match(&c, &p, cmp.as_ref(), &store).unwrap());

        let mut c = Constraint::name_value("color", "light blue");
        c.normalize();
        assert!(!intrinsics_match(&c, &p, cmp.as_ref(), &store).unwrap());
    }

    #[test]
    fn test_value_range_ops() {
        let (store, p) = sample_store();
        let cmp = comparator("default").unwrap();
        let mut c = Constraint::new();
        c.value = vec![StringCons {
            op: StringOp::Ge,
            pattern: Some("dark".into()),
        }];
        assert!(intrinsics_match(&c, &p, cmp.as_ref(), &store).unwrap());

        c.value = vec![StringCons {
            op: StringOp::Lt,
            pattern: Some("dark".into()),
        }];
        assert!(!intrinsics_match(&c, &p, cmp.as_ref(), &store).unwrap());
    }

    #[test]
    fn test_glob_and_word_match() {
        let (store, p) = sample_store();
        let cmp = comparator("default").unwrap();
        let mut c = Constraint::new();
        c.value = vec![StringCons {
            op: StringOp::Glob,
            pattern: Some("dark*".into()),
        }];
        assert!(intrinsics_match(&c, &p, cmp.as_ref(), &store).unwrap());

        c.value = vec![StringCons {
            op: StringOp::Match,
            pattern: Some("blue".into()),
        }];
        assert!(intrinsics_match(&c, &p, cmp.as_ref(), &store).unwrap());

        c.value = vec![StringCons {
            op: StringOp::Match,
            pattern: Some("green".into()),
        }];
        assert!(!intrinsics_match(&c, &p, cmp.as_ref(), &store).unwrap());
    }

    #[test]
    fn test_null_value_predicate() {
        let (store, original) = sample_store();
        let cmp = comparator("default").unwrap();
        let p = Primitive {
            value: None,
            ..original
        };
        let mut c = Constraint::new();
        c.value = vec![StringCons::is_null()];
        assert!(intrinsics_match(&c, &p, cmp.as_ref(), &store).unwrap());

        c.value = vec![StringCons::eq("something")];
        assert!(!intrinsics_match(&c, &p, cmp.as_ref(), &store).unwrap());
    }

    #[test]
    fn test_live_and_type_filters() {
        let (store, p) = sample_store();
        let cmp = comparator("default").unwrap();
        let mut c = Constraint::new();
        c.live = TriState::False;
        assert!(!intrinsics_match(&c, &p, cmp.as_ref(), &store).unwrap());

        let mut c = Constraint::new();
        c.valuetype = Some(Datatype::Integer);
        assert!(!intrinsics_match(&c, &p, cmp.as_ref(), &store).unwrap());
        c.valuetype = Some(Datatype::String);
        assert!(intrinsics_match(&c, &p, cmp.as_ref(), &store).unwrap());
    }

    #[test]
    fn test_guid_filter() {
        let (store, p) = sample_store();
        let cmp = comparator("default").unwrap();
        let mut c = Constraint::new();
        c.guid = GuidFilter::only(p.guid);
        assert!(intrinsics_match(&c, &p, cmp.as_ref(), &store).unwrap());

        let other = store.guid_alloc(None).unwrap();
        c.guid = GuidFilter::only(other);
        assert!(!intrinsics_match(&c, &p, cmp.as_ref(), &store).unwrap());
    }

    #[test]
    fn test_newest_generation_filter() {
        let store = MemStore::new();
        let v1 = store.guid_alloc(None).unwrap();
        store
            .primitive_alloc(PrimitiveData {
                guid: Some(v1),
                live: true,
                ..PrimitiveData::default()
            })
            .unwrap();
        let v2 = store.guid_alloc(Some(&v1)).unwrap();
        store
            .primitive_alloc(PrimitiveData {
                guid: Some(v2),
                live: true,
                ..PrimitiveData::default()
            })
            .unwrap();
        let store: Store = Arc::new(store);
        let cmp = comparator("default").unwrap();
        let old = store.primitive_read(crate::ident::Id::new(0)).unwrap();
        let new = store.primitive_read(crate::ident::Id::new(1)).unwrap();

        let mut c = Constraint::new();
        c.newest = Some(true);
        assert!(!intrinsics_match(&c, &old, cmp.as_ref(), &store).unwrap());
        assert!(intrinsics_match(&c, &new, cmp.as_ref(), &store).unwrap());

        let mut c = Constraint::new();
        c.oldest = Some(true);
        assert!(intrinsics_match(&c, &old, cmp.as_ref(), &store).unwrap());
        assert!(!intrinsics_match(&c, &new, cmp.as_ref(), &store).unwrap());
    }

    #[test]
    fn test_or_branches() {
        let (store, p) = sample_store();
        let cmp = comparator("default").unwrap();
        let mut c = Constraint::new();
        let hit = Constraint::name_value("color", "dark blue");
        let miss = Constraint::name_value("color", "red");
        c.or.push(OrBranch {
            alternatives: vec![miss.clone(), hit],
        });
        c.or.push(OrBranch {
            alternatives: vec![miss],
        });
        let alive = or_branches_match(&c, &p, cmp.as_ref(), &store).unwrap();
        assert_eq!(alive, vec![true, false]);
    }
}
