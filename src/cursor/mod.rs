//! # Cursor Codec
//!
//! Freeze and thaw of iterators into a restartable text form. A cursor
//! is three `/`-separated slices in fixed order:
//!
//! ```text
//! set / position / state @ account-tag
//! ```
//!
//! where *set* describes what the iterator ranges over, *position*
//! where it stopped, and *state* its statistics and call-state. Each
//! slice can be frozen independently ([`FreezeFlags`]). Composite
//! iterators interleave their children recursively inside `(...)`
//! groups, so a whole AND-of-OR tree round-trips through one string.
//!
//! The account tag is a crc32 over the set slice. A thaw whose tag
//! does not match fails with `BADCURSOR` before any parsing of the
//! position: a cursor only ever resumes the set it was issued for.
//!
//! An OR iterator may carry a *masquerade*: a user-visible stand-in
//! emitted instead of its set slice, with the id window injected at the
//! first `::`. The true set travels in the state slice side-channel and
//! is what thaw actually reconstructs.
//!
//! Thaw builds iterators in a mode that defers the construction-time
//! rewrites (`become_small_set` and friends), so the shape a cursor
//! recorded is the shape it reconstructs. If a stored original evolved
//! between freezes, the thawed instance re-clones from the fresh
//! original via `refresh`.

pub mod scan;

use scan::Scanner;

use crate::cmp::comparator;
use crate::error::{GraphError, GraphResult, Progress};
use crate::ident::{Guid, Id};
use crate::iter::{
    bin, AllIterator, AndIterator, BinIterator, BoxedIter, Budget, Direction, FixedIterator,
    FreezeFlags, IdIterator, IndexIterator, IndexSource, IsaIterator, NullIterator, OrIterator,
    VipIterator,
};
use crate::store::{HashKind, Linkage, Store};

/// Freeze all three slices of `it` and append the account tag.
pub fn freeze(it: &dyn IdIterator) -> GraphResult<String> {
    let mut body = String::new();
    it.freeze(FreezeFlags::ALL, &mut body)?;
    let set = top_level_slices(&body).into_iter().next().unwrap_or("");
    let tag = crc32fast::hash(set.as_bytes());
    Ok(format!("{body}@{tag:08x}"))
}

/// Thaw a cursor produced by [`freeze`].
pub fn thaw(cursor: &str, store: &Store) -> GraphResult<BoxedIter> {
    let (body, tag) = cursor.rsplit_once('@').ok_or_else(|| {
        GraphError::BadCursor("missing account tag".into())
    })?;
    let slices = top_level_slices(body);
    let set = slices.first().copied().unwrap_or("");
    let expect = u32::from_str_radix(tag, 16)
        .map_err(|_| GraphError::BadCursor("malformed account tag".into()))?;
    if crc32fast::hash(set.as_bytes()) != expect {
        return Err(GraphError::BadCursor("account tag mismatch".into()));
    }
    let position = slices.get(1).copied().unwrap_or("");
    let state = slices.get(2).copied().unwrap_or("");

    let (true_set, masquerade) = resolve_masquerade(set, state)?;
    let mut it = thaw_set(true_set, store)?;
    if let Some(masq) = masquerade {
        if let Ok(or) = downcast::<OrIterator>(it.as_mut()) {
            or.set_masquerade(masq);
        }
    }
    if !position.is_empty() {
        apply_position(it.as_mut(), position, state, store)?;
    }
    Ok(it)
}

/// Freeze just the set slice (used for originals).
pub fn freeze_set(it: &dyn IdIterator) -> GraphResult<String> {
    let mut out = String::new();
    it.freeze(FreezeFlags::SET, &mut out)?;
    Ok(out)
}

/// Outcome of [`refresh_pointer`].
pub use crate::iter::Refresh;

/// Bring an instance up to date with its shared original.
///
/// `Already` when the original is unchanged. When the original was
/// substituted by an equivalent, thaw the fresh set and replay the
/// instance's position onto it: same variant replays exactly, a
/// different variant catches up by `find`ing the last delivered id
/// (equivalent sets share membership, so the find lands exactly and
/// the id is skipped as already delivered).
pub fn refresh_pointer(it: &dyn IdIterator, store: &Store) -> GraphResult<Refresh> {
    if !it.original_stale() {
        return Ok(Refresh::Already);
    }
    let handle = it
        .original()
        .ok_or_else(|| GraphError::Internal("stale instance without an original".into()))?;
    let frozen = handle.read().frozen_set.clone();
    let mut fresh = thaw_set(&frozen, store)?;
    if fresh.kind() == it.kind() {
        let mut pos = String::new();
        it.freeze(
            FreezeFlags {
                set: false,
                position: true,
                state: false,
            },
            &mut pos,
        )?;
        if !pos.is_empty() {
            apply_position(fresh.as_mut(), &pos, "", store)?;
        }
    } else if let Some(last) = it.last_id() {
        if !fresh.sorted() {
            return Err(GraphError::BadCursor(
                "cannot reposition on an unsorted substitute".into(),
            ));
        }
        let mut budget = Budget::unlimited();
        match fresh.find(last, &mut budget)? {
            crate::error::Advance::Id(id) if id == last => {}
            crate::error::Advance::End => {}
            _ => {
                return Err(GraphError::BadCursor(
                    "substituted original diverged from the instance".into(),
                ))
            }
        }
    }
    Ok(Refresh::Replaced(fresh))
}

/// Thaw just a set slice into a fresh, unpositioned iterator.
pub fn thaw_set(set: &str, store: &Store) -> GraphResult<BoxedIter> {
    let mut s = Scanner::new(set);
    let variant = s.until(&[':']);
    s.expect(':')?;
    match variant {
        "null" => Ok(Box::new(NullIterator::new(Direction::Forward))),
        "all" => {
            let dir = direction(&mut s)?;
            let (low, high) = s.id_range()?;
            Ok(Box::new(AllIterator::from_bounds(low, high, dir)))
        }
        "fixed" => {
            let dir = direction(&mut s)?;
            let (_low, _high) = s.id_range()?;
            s.expect(':')?;
            let n = s.usize()?;
            s.expect(':')?;
            let mut ids = Vec::with_capacity(n);
            for i in 0..n {
                if i > 0 {
                    s.expect(',')?;
                }
                ids.push(s.id()?);
            }
            Ok(Box::new(
                FixedIterator::new(ids, dir).with_store(store.clone()),
            ))
        }
        "word" | "prefix" => {
            let text = s.token()?;
            s.expect(':')?;
            let dir = direction(&mut s)?;
            let (low, high) = s.id_range()?;
            let source = if variant == "word" {
                IndexSource::Word(text)
            } else {
                IndexSource::Prefix(text)
            };
            Ok(Box::new(IndexIterator::new(store, source, low, high, dir)))
        }
        "hash" => {
            let kind = HashKind::parse(s.until(&[':']))
                .ok_or_else(|| GraphError::BadCursor("bad hash kind".into()))?;
            s.expect(':')?;
            let hex = s.until(&[':']);
            let bytes = decode_hex(hex)?;
            s.expect(':')?;
            let dir = direction(&mut s)?;
            let (low, high) = s.id_range()?;
            Ok(Box::new(IndexIterator::new(
                store,
                IndexSource::Hash(kind, bytes),
                low,
                high,
                dir,
            )))
        }
        "vip" => {
            let dir = direction(&mut s)?;
            let (low, high) = s.id_range()?;
            s.expect(':')?;
            let linkage = Linkage::parse(s.until(&[':']))
                .ok_or_else(|| GraphError::BadCursor("bad vip linkage".into()))?;
            s.expect(':')?;
            let endpoint = s.guid()?;
            let typeguid = if s.eat(':') { Some(s.guid()?) } else { None };
            Ok(Box::new(VipIterator::new(
                store, linkage, endpoint, typeguid, low, high, dir,
            )))
        }
        "isa" => {
            let _dir = direction(&mut s)?;
            let (low, high) = s.id_range()?;
            s.expect(':')?;
            let linkage = Linkage::parse(s.until(&[':']))
                .ok_or_else(|| GraphError::BadCursor("bad isa linkage".into()))?;
            s.expect(':')?;
            let sub = thaw_set(s.group()?, store)?;
            Ok(Box::new(IsaIterator::new(store, linkage, sub, low, high)))
        }
        "bin" => {
            let dir = direction(&mut s)?;
            let (low, high) = s.id_range()?;
            s.expect(':')?;
            let cmp_name = s.until(&[':']).to_string();
            s.expect(':')?;
            let low_value = nonempty(s.token()?);
            s.expect(':')?;
            let high_value = nonempty(s.token()?);
            let cmp = comparator(&cmp_name)?;
            Ok(Box::new(BinIterator::new(
                store,
                cmp,
                low_value.as_deref(),
                high_value.as_deref(),
                low,
                high,
                dir,
            )?))
        }
        "and" | "or" => {
            let dir = direction(&mut s)?;
            let (low, high) = s.id_range()?;
            s.expect(':')?;
            let n = s.usize()?;
            s.expect(':')?;
            let mut children = Vec::with_capacity(n);
            for _ in 0..n {
                children.push(thaw_set(s.group()?, store)?);
            }
            if variant == "and" {
                Ok(Box::new(AndIterator::from_parts(children, dir, low, high)))
            } else {
                Ok(Box::new(OrIterator::from_parts(
                    children, dir, low, high, None,
                )))
            }
        }
        other => Err(GraphError::BadCursor(format!(
            "unknown iterator variant {other:?}"
        ))),
    }
}

/// Resolve a masqueraded set slice to the true set carried in the
/// state side-channel. Returns the set to thaw plus the bare
/// masquerade string (brackets stripped) when one was in play.
fn resolve_masquerade<'a>(
    set: &'a str,
    state: &'a str,
) -> GraphResult<(&'a str, Option<String>)> {
    let variant = set.split(':').next().unwrap_or("");
    let known = matches!(
        variant,
        "null" | "all" | "fixed" | "word" | "prefix" | "hash" | "vip" | "isa" | "bin" | "and"
            | "or"
    );
    if known {
        return Ok((set, None));
    }
    let side_channel = last_top_level_group(state).ok_or_else(|| {
        GraphError::BadCursor("masqueraded cursor without a state side-channel".into())
    })?;
    Ok((side_channel, Some(strip_injected_bracket(set))))
}

/// The interior of the last depth-0 `(...)` group.
fn last_top_level_group(s: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut start = None;
    let mut result = None;
    for (i, c) in s.char_indices() {
        match c {
            '(' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if let Some(at) = start {
                        result = Some(&s[at + 1..i]);
                    }
                }
            }
            _ => {}
        }
    }
    result
}

/// Remove the `[low-high]` window freeze injected into a masquerade.
fn strip_injected_bracket(masq: &str) -> String {
    match (masq.find('['), masq.find(']')) {
        (Some(open), Some(close)) if close > open => {
            let mut out = String::with_capacity(masq.len());
            out.push_str(&masq[..open]);
            out.push_str(&masq[close + 1..]);
            out
        }
        _ => masq.to_string(),
    }
}

/// Replay a frozen position into a freshly thawed iterator.
fn apply_position(
    it: &mut dyn IdIterator,
    position: &str,
    state: &str,
    store: &Store,
) -> GraphResult<()> {
    let mut s = Scanner::new(position);
    match it.kind() {
        crate::iter::IterKind::Null => Ok(()),
        crate::iter::IterKind::All => {
            let cursor = if s.eat('*') {
                None
            } else {
                Some(s.id()?.raw())
            };
            let all = downcast::<AllIterator>(it)?;
            all.set_cursor_raw(cursor, None);
            Ok(())
        }
        crate::iter::IterKind::Fixed => {
            let offset = s.usize()?;
            s.expect(':')?;
            let last = optional_id(&mut s)?;
            downcast::<FixedIterator>(it)?.set_offset(offset, last);
            Ok(())
        }
        crate::iter::IterKind::Word | crate::iter::IterKind::Prefix
        | crate::iter::IterKind::Hash => {
            let offset = s.usize()?;
            s.expect(':')?;
            let last = optional_id(&mut s)?;
            downcast::<IndexIterator>(it)?.set_offset(offset, last);
            Ok(())
        }
        crate::iter::IterKind::Vip => {
            let offset = s.usize()?;
            s.expect(':')?;
            let last = optional_id(&mut s)?;
            downcast::<VipIterator>(it)?.set_offset(offset, last);
            Ok(())
        }
        crate::iter::IterKind::Isa => {
            let last = optional_id(&mut s)?;
            s.expect(':')?;
            let sub_pos = s.group()?;
            let isa = downcast::<IsaIterator>(it)?;
            // Seen set rides in the state slice ahead of the sub-state.
            let mut seen = Vec::new();
            let seen_part = state.split(':').next().unwrap_or("");
            if !seen_part.is_empty() {
                for tok in seen_part.split(',') {
                    seen.push(tok.parse::<Id>().map_err(|_| {
                        GraphError::BadCursor("bad isa seen id".into())
                    })?);
                }
            }
            isa.restore_seen(seen);
            isa.set_last(last);
            let sub_state = state
                .find("(")
                .and_then(|open| state.rfind(')').map(|close| &state[open + 1..close]))
                .unwrap_or("");
            apply_position(isa.sub_mut().as_mut(), sub_pos, sub_state, store)?;
            Ok(())
        }
        crate::iter::IterKind::Bin => {
            let frozen_vrange = s.group()?;
            s.expect(':')?;
            let bin = if s.eat('*') {
                None
            } else {
                Some(s.usize()?)
            };
            s.expect(':')?;
            let in_bin = s.usize()?;
            s.expect(':')?;
            let last = optional_id(&mut s)?;
            bin::replay_position(downcast::<BinIterator>(it)?, frozen_vrange, bin, in_bin, last)
        }
        crate::iter::IterKind::And => {
            let _producer = s.usize()?;
            s.expect(':')?;
            let last = optional_id(&mut s)?;
            s.expect(':')?;
            let and = downcast::<AndIterator>(it)?;
            let mut child_positions = Vec::new();
            while !s.done() {
                child_positions.push(s.group()?.to_string());
            }
            for (child, pos) in and.children_mut().iter_mut().zip(&child_positions) {
                if !pos.is_empty() {
                    apply_position(child.as_mut(), pos, "", store)?;
                }
            }
            and.set_last(last);
            Ok(())
        }
        crate::iter::IterKind::Or => {
            let _current = s.usize()?;
            s.expect(':')?;
            let last = optional_id(&mut s)?;
            let or = downcast::<OrIterator>(it)?;
            if let Some(resume) = last {
                let mut budget = Budget::unlimited();
                match or.resume_at(resume, &mut budget)? {
                    Progress::Done => {}
                    Progress::Suspend => {
                        return Err(GraphError::Internal(
                            "or resume suspended under unlimited budget".into(),
                        ))
                    }
                }
            }
            Ok(())
        }
    }
}

fn optional_id(s: &mut Scanner<'_>) -> GraphResult<Option<Id>> {
    if s.peek() == Some('*') {
        s.eat('*');
        Ok(None)
    } else {
        Ok(Some(s.id()?))
    }
}

fn direction(s: &mut Scanner<'_>) -> GraphResult<Direction> {
    let c = s.peek().ok_or_else(|| GraphError::BadCursor("missing direction".into()))?;
    let dir = Direction::from_token(c)
        .ok_or_else(|| GraphError::BadCursor(format!("bad direction {c:?}")))?;
    s.eat(c);
    Ok(dir)
}

fn nonempty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn decode_hex(hex: &str) -> GraphResult<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(GraphError::BadCursor("odd hex length".into()));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| GraphError::BadCursor("bad hex byte".into()))
        })
        .collect()
}

/// Split a frozen body into its top-level slices, ignoring `/` inside
/// groups.
fn top_level_slices(body: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => {
                out.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&body[start..]);
    out
}

/// Downcast helper for position replay. The kind tag names the
/// concrete type, so a mismatch is an internal error, not a cursor
/// error.
fn downcast<T: 'static>(it: &mut dyn IdIterator) -> GraphResult<&mut T> {
    it.as_any_mut()
        .downcast_mut::<T>()
        .ok_or_else(|| GraphError::Internal("iterator kind/type mismatch in cursor replay".into()))
}
