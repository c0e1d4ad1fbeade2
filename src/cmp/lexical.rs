//! Lexical comparators.
//!
//! `default` is the comparator a constraint gets when it names none:
//! case-insensitive, with embedded digit runs compared numerically so
//! `"x9"` sorts before `"x10"`. `octet` is plain byte order for callers
//! that store already-canonical keys.
//!
//! Both implement the vrange surface as a straight walk over the bin
//! table, since their order agrees with the bin space's byte order up
//! to case folding.

use std::cmp::Ordering;

use crate::error::{GraphError, GraphResult};
use crate::store::{PrimitiveStore, Store};

use super::{glob, Comparator, ValueRange, WalkDirection};

/// Case-insensitive, digit-run-aware lexical comparator.
#[derive(Debug)]
pub struct DefaultComparator;

/// Byte-order comparator.
#[derive(Debug)]
pub struct OctetComparator;

fn fold(c: char) -> char {
    c.to_ascii_lowercase()
}

/// Compare with numeric runs compared by magnitude, everything else
/// case-folded char order.
fn natural_compare(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();
    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ac), Some(bc)) => {
                if ac.is_ascii_digit() && bc.is_ascii_digit() {
                    let mut anum = String::new();
                    while ai.peek().is_some_and(|c| c.is_ascii_digit()) {
                        anum.push(ai.next().unwrap_or('0'));
                    }
                    let mut bnum = String::new();
                    while bi.peek().is_some_and(|c| c.is_ascii_digit()) {
                        bnum.push(bi.next().unwrap_or('0'));
                    }
                    let at = anum.trim_start_matches('0');
                    let bt = bnum.trim_start_matches('0');
                    let by_magnitude = at.len().cmp(&bt.len()).then_with(|| at.cmp(bt));
                    if by_magnitude != Ordering::Equal {
                        return by_magnitude;
                    }
                    // Same magnitude; fewer leading zeros sorts first.
                    if anum.len() != bnum.len() {
                        return anum.len().cmp(&bnum.len());
                    }
                } else {
                    let fa = fold(ac);
                    let fb = fold(bc);
                    if fa != fb {
                        return fa.cmp(&fb);
                    }
                    ai.next();
                    bi.next();
                }
            }
        }
    }
}

/// Straight bin walk between two lookup positions.
#[derive(Debug)]
struct LexicalRange {
    store: Store,
    dir: WalkDirection,
    /// Next bin to produce, `None` when exhausted.
    cursor: Option<usize>,
    low_bin: usize,
    /// Exclusive on the high side.
    high_bin: usize,
    low: Option<String>,
    high: Option<String>,
    case_fold: bool,
}

impl LexicalRange {
    fn new(
        store: &Store,
        low: Option<&str>,
        high: Option<&str>,
        dir: WalkDirection,
        case_fold: bool,
    ) -> LexicalRange {
        let low_bin = low.map_or(0, |s| store.bin_lookup(s));
        let high_bin = high.map_or_else(|| store.bin_count(), |s| store.bin_lookup(s));
        let cursor = if low_bin >= high_bin {
            None
        } else {
            Some(match dir {
                WalkDirection::Forward => low_bin,
                WalkDirection::Backward => high_bin - 1,
            })
        };
        LexicalRange {
            store: store.clone(),
            dir,
            cursor,
            low_bin,
            high_bin,
            low: low.map(str::to_string),
            high: high.map(str::to_string),
            case_fold,
        }
    }

    fn compare(&self, a: &str, b: &str) -> Ordering {
        if self.case_fold {
            natural_compare(a, b)
        } else {
            a.cmp(b)
        }
    }
}

impl ValueRange for LexicalRange {
    fn size_estimate(&self) -> u64 {
        match self.cursor {
            None => 0,
            Some(cur) => match self.dir {
                WalkDirection::Forward => (self.high_bin - cur) as u64,
                WalkDirection::Backward => (cur + 1 - self.low_bin) as u64,
            },
        }
    }

    fn next_bin(&mut self) -> Option<usize> {
        let cur = self.cursor?;
        self.cursor = match self.dir {
            WalkDirection::Forward => {
                if cur + 1 < self.high_bin {
                    Some(cur + 1)
                } else {
                    None
                }
            }
            WalkDirection::Backward => {
                if cur > self.low_bin {
                    Some(cur - 1)
                } else {
                    None
                }
            }
        };
        Some(cur)
    }

    fn seek(&mut self, value: &str) -> GraphResult<()> {
        let bin = self
            .store
            .bin_lookup(value)
            .clamp(self.low_bin, self.high_bin.saturating_sub(1).max(self.low_bin));
        self.cursor = if self.low_bin >= self.high_bin {
            None
        } else {
            Some(bin)
        };
        Ok(())
    }

    fn value_in_range(&self, value: &str) -> bool {
        if let Some(low) = self.low.as_deref() {
            if self.compare(value, low) == Ordering::Less {
                return false;
            }
        }
        if let Some(high) = self.high.as_deref() {
            if self.compare(value, high) != Ordering::Less {
                return false;
            }
        }
        true
    }

    fn freeze(&self, out: &mut String) {
        out.push_str(&format!(
            "lex:{}:{}-{}:{}",
            match self.dir {
                WalkDirection::Forward => 'f',
                WalkDirection::Backward => 'b',
            },
            self.low_bin,
            self.high_bin,
            self.cursor.map_or(-1i64, |c| c as i64),
        ));
    }
}

fn lexical_vrange(
    store: &Store,
    low: Option<&str>,
    high: Option<&str>,
    dir: WalkDirection,
    case_fold: bool,
) -> Option<Box<dyn ValueRange>> {
    Some(Box::new(LexicalRange::new(store, low, high, dir, case_fold)))
}

fn lexical_thaw(store: &Store, frozen: &str, case_fold: bool) -> GraphResult<Box<dyn ValueRange>> {
    let bad = || GraphError::BadCursor(format!("malformed lexical range {frozen:?}"));
    let rest = frozen.strip_prefix("lex:").ok_or_else(bad)?;
    let mut parts = rest.split(':');
    let dir = match parts.next().ok_or_else(bad)? {
        "f" => WalkDirection::Forward,
        "b" => WalkDirection::Backward,
        _ => return Err(bad()),
    };
    let bounds = parts.next().ok_or_else(bad)?;
    let (low_bin, high_bin) = bounds.split_once('-').ok_or_else(bad)?;
    let low_bin: usize = low_bin.parse().map_err(|_| bad())?;
    let high_bin: usize = high_bin.parse().map_err(|_| bad())?;
    let cursor: i64 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    Ok(Box::new(LexicalRange {
        store: store.clone(),
        dir,
        cursor: if cursor < 0 { None } else { Some(cursor as usize) },
        low_bin,
        high_bin,
        low: None,
        high: None,
        case_fold,
    }))
}

impl Comparator for DefaultComparator {
    fn name(&self) -> &'static str {
        "default"
    }

    fn syntax_ok(&self, _value: &str) -> bool {
        true
    }

    fn sort_compare(&self, a: &str, b: &str) -> Ordering {
        natural_compare(a, b)
    }

    fn glob_match(&self, pattern: &str, value: &str) -> GraphResult<bool> {
        Ok(glob(pattern, value, |a, b| {
            a.to_lowercase().eq(b.to_lowercase())
        }))
    }

    fn vrange(
        &self,
        store: &Store,
        low: Option<&str>,
        high: Option<&str>,
        dir: WalkDirection,
    ) -> Option<Box<dyn ValueRange>> {
        lexical_vrange(store, low, high, dir, true)
    }

    fn vrange_thaw(&self, store: &Store, frozen: &str) -> GraphResult<Box<dyn ValueRange>> {
        lexical_thaw(store, frozen, true)
    }
}

impl Comparator for OctetComparator {
    fn name(&self) -> &'static str {
        "octet"
    }

    fn syntax_ok(&self, _value: &str) -> bool {
        true
    }

    fn sort_compare(&self, a: &str, b: &str) -> Ordering {
        a.cmp(b)
    }

    fn glob_match(&self, pattern: &str, value: &str) -> GraphResult<bool> {
        Ok(glob(pattern, value, |a, b| a == b))
    }

    fn vrange(
        &self,
        store: &Store,
        low: Option<&str>,
        high: Option<&str>,
        dir: WalkDirection,
    ) -> Option<Box<dyn ValueRange>> {
        lexical_vrange(store, low, high, dir, false)
    }

    fn vrange_thaw(&self, store: &Store, frozen: &str) -> GraphResult<Box<dyn ValueRange>> {
        lexical_thaw(store, frozen, false)
    }
}
