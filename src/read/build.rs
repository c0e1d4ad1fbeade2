//! Iterator construction from constraints.
//!
//! The planner turns a constraint's indexable predicates into
//! "approaches" (index-backed iterators) and intersects them. What
//! cannot be indexed stays behind as an intrinsic predicate for the
//! scan to re-verify, so approaches only ever need to be sound
//! over-approximations.
//!
//! Subconstraint iterators follow the shape the engine leans on
//! hardest: a stored cursor clones; an `i-am` child is the parent's
//! endpoint as a one-element set; a `my` child is the linkage fan-in
//! VIP, intersected with the child's own restricted approaches.

use std::sync::Arc;

use crate::cmp::Comparator;
use crate::constraint::{Constraint, LinkRel, StringOp};
use crate::cursor;
use crate::error::{GraphError, GraphResult};
use crate::ident::{Guid, Id};
use crate::iter::{
    AllIterator, AndIterator, BinIterator, BoxedIter, Direction, FixedIterator, IdIterator,
    IndexIterator, IndexSource, IterKind, OrIterator, Restriction, VipIterator,
};
use crate::store::{HashKind, Linkage, PrimitiveStore, Store};

/// A planned iterator plus what went into it, for the fast-count rule.
pub struct Plan {
    pub it: BoxedIter,
    /// Index approaches other than VIPs.
    pub stored_approaches: u32,
    /// VIP approaches (counted at a discount by fast count).
    pub vip_approaches: u32,
    /// True when the plan came from a thawed cursor.
    pub from_cursor: bool,
}

/// Case-fold for hash keys; must agree with the store's value index.
fn value_key(value: &str) -> Vec<u8> {
    value.to_lowercase().into_bytes()
}

fn key_key(name: &str, value: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(name.to_lowercase().as_bytes());
    out.push(0);
    out.extend_from_slice(&value_key(value));
    out
}

/// Build the root iterator for one constraint.
pub fn root_iterator(
    con: &Constraint,
    store: &Store,
    cmp: &Arc<dyn Comparator>,
    dir: Direction,
) -> GraphResult<Plan> {
    let high = Id::new(store.primitive_n());
    if con.unsatisfiable {
        return Ok(Plan {
            it: Box::new(crate::iter::NullIterator::new(dir)),
            stored_approaches: 0,
            vip_approaches: 0,
            from_cursor: false,
        });
    }
    if let Some(frozen) = &con.cursor {
        let it = cursor::thaw(frozen, store)?;
        return Ok(Plan {
            it,
            stored_approaches: 2,
            vip_approaches: 0,
            from_cursor: true,
        });
    }

    let mut approaches: Vec<BoxedIter> = Vec::new();
    let mut stored = 0u32;
    let mut vips = 0u32;

    // Explicit guid sets resolve straight to ids.
    if let Some(include) = &con.guid.include {
        let ids: Vec<Id> = include
            .iter()
            .filter_map(|g| store.id_from_guid(g))
            .collect();
        approaches.push(Box::new(
            FixedIterator::new(ids, dir).with_store(store.clone()),
        ));
        stored += 1;
    }
    // Lineage (`~=`) filters stay intrinsic: enumerating every written
    // generation of a lineage needs a scan anyway, and an approach must
    // never under-approximate.

    // Linkage pins become VIP fan-ins; the typeguid pin rides along.
    let type_pin = single_include(con, Linkage::Typeguid);
    for which in [Linkage::Left, Linkage::Right, Linkage::Scope] {
        let filter = con.linkage_filter(which);
        let Some(include) = &filter.include else {
            continue;
        };
        match include.as_slice() {
            [] => {}
            [one] => {
                approaches.push(Box::new(VipIterator::new(
                    store, which, *one, type_pin, Id::ZERO, high, dir,
                )));
                vips += 1;
            }
            many => {
                let children: Vec<BoxedIter> = many
                    .iter()
                    .map(|g| {
                        Box::new(VipIterator::new(
                            store, which, *g, type_pin, Id::ZERO, high, dir,
                        )) as BoxedIter
                    })
                    .collect();
                approaches.push(OrIterator::create_commit(
                    children,
                    dir,
                    Id::ZERO,
                    high,
                    None,
                )?);
                vips += 1;
            }
        }
    }
    // A typeguid pin with no other linkage pin is its own fan-in.
    if let Some(tg) = type_pin {
        let other_pinned = [Linkage::Left, Linkage::Right, Linkage::Scope]
            .iter()
            .any(|l| con.linkage_filter(*l).include.is_some());
        if !other_pinned {
            approaches.push(Box::new(VipIterator::new(
                store,
                Linkage::Typeguid,
                tg,
                None,
                Id::ZERO,
                high,
                dir,
            )));
            vips += 1;
        }
    }

    // Value predicates.
    let name_eq = con.name.iter().find_map(|c| match (c.op, &c.pattern) {
        (StringOp::Eq, Some(p)) => Some(p.clone()),
        _ => None,
    });
    let mut value_eq = None;
    let mut low_bound: Option<&str> = None;
    let mut high_bound: Option<&str> = None;
    let mut words: Vec<String> = Vec::new();
    for c in &con.value {
        match (c.op, c.pattern.as_deref()) {
            (StringOp::Eq, Some(p)) => value_eq = Some(p.to_string()),
            (StringOp::Ge | StringOp::Gt, Some(p)) => low_bound = Some(p),
            (StringOp::Le | StringOp::Lt, Some(p)) => high_bound = Some(p),
            (StringOp::Match, Some(p)) => words.extend(word_list(p)),
            (StringOp::Glob, Some(p)) => {
                let prefix: String = p.chars().take_while(|c| *c != '*' && *c != '?').collect();
                if prefix.len() >= 2 {
                    approaches.push(Box::new(IndexIterator::new(
                        store,
                        IndexSource::Prefix(prefix),
                        Id::ZERO,
                        high,
                        dir,
                    )));
                    stored += 1;
                }
            }
            _ => {}
        }
    }
    for c in &con.name {
        if c.op == StringOp::Match {
            if let Some(p) = &c.pattern {
                words.extend(word_list(p));
            }
        }
    }

    match (name_eq, value_eq) {
        (Some(name), Some(value)) => {
            // Both pinned: the key hash covers the pair.
            approaches.push(Box::new(IndexIterator::new(
                store,
                IndexSource::Hash(HashKind::Key, key_key(&name, &value)),
                Id::ZERO,
                high,
                dir,
            )));
            stored += 1;
        }
        (name, value) => {
            if let Some(value) = value {
                approaches.push(Box::new(IndexIterator::new(
                    store,
                    IndexSource::Hash(HashKind::Value, value_key(&value)),
                    Id::ZERO,
                    high,
                    dir,
                )));
                stored += 1;
            }
            if let Some(name) = name {
                if let Some(word) = word_list(&name).into_iter().next() {
                    approaches.push(Box::new(IndexIterator::new(
                        store,
                        IndexSource::Word(word),
                        Id::ZERO,
                        high,
                        dir,
                    )));
                    stored += 1;
                }
            }
        }
    }

    if low_bound.is_some() || high_bound.is_some() {
        // A comparator without a range implementation falls back to
        // the full-scan producer with per-id predicate callbacks.
        if let Ok(bin) =
            BinIterator::new(store, cmp.clone(), low_bound, high_bound, Id::ZERO, high, dir)
        {
            approaches.push(Box::new(bin));
            stored += 1;
        }
    }

    for word in words {
        approaches.push(Box::new(IndexIterator::new(
            store,
            IndexSource::Word(word),
            Id::ZERO,
            high,
            dir,
        )));
        stored += 1;
    }

    // OR branches contribute the union of their alternatives'
    // approaches, when every alternative has one.
    for branch in &con.or {
        let mut alt_its: Vec<BoxedIter> = Vec::with_capacity(branch.alternatives.len());
        let mut all_usable = true;
        for alt in &branch.alternatives {
            let sub = root_iterator(alt, store, cmp, dir)?;
            if sub.it.kind() == IterKind::All {
                all_usable = false;
                break;
            }
            alt_its.push(sub.it);
        }
        if all_usable && !alt_its.is_empty() {
            approaches.push(OrIterator::create_commit(
                alt_its,
                dir,
                Id::ZERO,
                high,
                None,
            )?);
            stored += 1;
        }
    }

    let it = match approaches.len() {
        0 => Box::new(AllIterator::new(store, Id::ZERO, high, dir)) as BoxedIter,
        1 => approaches.pop().unwrap_or_else(|| unreachable!("len checked")),
        _ => AndIterator::create_commit(approaches, dir, Id::ZERO, high)?,
    };
    Ok(Plan {
        it,
        stored_approaches: stored,
        vip_approaches: vips,
        from_cursor: false,
    })
}

fn single_include(con: &Constraint, which: Linkage) -> Option<Guid> {
    match con.linkage_filter(which).include.as_deref() {
        Some([one]) => Some(*one),
        _ => None,
    }
}

fn word_list(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build the iterator for a subconstraint of a specific parent match.
pub fn subcon_iterator(
    child: &Constraint,
    parent_id: Id,
    parent_guid: Guid,
    store: &Store,
    cmp: &Arc<dyn Comparator>,
    dir: Direction,
) -> GraphResult<BoxedIter> {
    let high = Id::new(store.primitive_n());
    if let Some(frozen) = &child.cursor {
        return Ok(cursor::thaw(frozen, store)?);
    }
    match child.link {
        Some(LinkRel::IAm(which)) => {
            // The child *is* the parent's endpoint: a singleton set.
            let parent = store.primitive_read(parent_id)?;
            let ids: Vec<Id> = parent
                .linkage(which)
                .and_then(|g| store.id_from_guid(&g))
                .into_iter()
                .collect();
            Ok(Box::new(
                FixedIterator::new(ids, dir).with_store(store.clone()),
            ))
        }
        Some(LinkRel::My(which)) => {
            let type_pin = single_include(child, Linkage::Typeguid);
            let vip = VipIterator::new(store, which, parent_guid, type_pin, Id::ZERO, high, dir);
            let stored = root_iterator(child, store, cmp, dir)?;
            if stored.it.kind() == IterKind::All {
                return Ok(Box::new(vip));
            }
            // Ask the stored side to specialise itself to the fan-in
            // profile, then intersect.
            let psum = vip
                .primitive_summary()
                .ok_or_else(|| GraphError::Internal("vip without a summary".into()))?;
            let restricted = match stored.it.restrict(&psum)? {
                Restriction::Already => stored.it,
                Restriction::No => {
                    return Ok(Box::new(crate::iter::NullIterator::new(dir)))
                }
                Restriction::New(narrowed) => narrowed,
            };
            AndIterator::create_commit(
                vec![Box::new(vip) as BoxedIter, restricted],
                dir,
                Id::ZERO,
                high,
            )
        }
        None => Ok(root_iterator(child, store, cmp, dir)?.it),
    }
}
