//! Datetime comparator.
//!
//! Value strings are ISO-like dates in one of three families:
//!
//! - `"-YYYY…"`: BCE dates. Among themselves these sort in *reverse*
//!   lexical order: a greater absolute year is an earlier instant.
//! - `"YYYY…"`: CE dates, plain lexical order.
//! - `"THH…"`: bare times of day, lexical, after all dates.
//!
//! The range walk operates on the store's ordered string-bin space.
//! Six boundary bins bracketing `"-0"`, `"-9999"`, `"0"`, `"9999"`,
//! `"T00"` and `"T24"` are computed once per process and define the
//! NEG, POS and TIME regions. A cursor is `{mode, bin}`; `inc` moves
//! one bin later in time (which *decrements* the bin inside NEG),
//! crossing NEG→POS→TIME at the region edges, and `dec` is the exact
//! inverse. Internally both are linearised onto a single time-ordered
//! axis so cursor arithmetic cannot drift across the mode seams.
//!
//! Glob is not supported here; equality goes through the store's value
//! hash like any other comparator.

use std::cmp::Ordering;
use std::sync::OnceLock;

use crate::cursor::scan::{escape_token, unescape_token};
use crate::error::{GraphError, GraphResult};
use crate::store::{PrimitiveStore, Store};

use super::{Comparator, ValueRange, WalkDirection};

/// Datetime comparator; see the module docs.
#[derive(Debug)]
pub struct DatetimeComparator;

/// Which family a cursor is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Neg,
    Pos,
    Time,
}

impl Mode {
    fn token(self) -> char {
        match self {
            Mode::Neg => 'n',
            Mode::Pos => 'p',
            Mode::Time => 't',
        }
    }
}

/// The six per-process boundary bins.
#[derive(Debug, Clone, Copy)]
pub struct BinLimits {
    pub neg_min: usize,
    pub neg_max: usize,
    pub pos_min: usize,
    pub pos_max: usize,
    pub time_min: usize,
    pub time_max: usize,
}

static LIMITS: OnceLock<BinLimits> = OnceLock::new();

impl BinLimits {
    /// Compute the region boundaries from the store's bin table.
    pub fn compute(store: &Store) -> BinLimits {
        // "-0" sorts before "-9999"; the NEG region is the lexical
        // window between them (exclusive of the first bin past "-9:").
        let neg_min = store.bin_lookup("-0");
        let neg_max = store.bin_lookup("-:"); // first bin past "-9999…"
        let pos_min = store.bin_lookup("0");
        let pos_max = store.bin_lookup(":"); // first bin past "9999…"
        let time_min = store.bin_lookup("T00");
        let time_max = store.bin_lookup("T24");
        BinLimits {
            neg_min,
            neg_max,
            pos_min,
            pos_max,
            time_min,
            time_max,
        }
    }

    /// Process-global limits, computed on first use.
    pub fn global(store: &Store) -> BinLimits {
        *LIMITS.get_or_init(|| BinLimits::compute(store))
    }

    fn neg_span(&self) -> usize {
        self.neg_max.saturating_sub(self.neg_min)
    }

    fn pos_span(&self) -> usize {
        self.pos_max.saturating_sub(self.pos_min)
    }

    fn time_span(&self) -> usize {
        self.time_max.saturating_sub(self.time_min)
    }

    /// Total bins on the time axis.
    pub fn total(&self) -> usize {
        self.neg_span() + self.pos_span() + self.time_span()
    }

    /// Linear time-axis position of a `{mode, bin}` cursor.
    fn to_axis(&self, mode: Mode, bin: usize) -> usize {
        match mode {
            // NEG runs backwards: the lexically largest bin is earliest.
            Mode::Neg => self.neg_max - 1 - bin,
            Mode::Pos => self.neg_span() + (bin - self.pos_min),
            Mode::Time => self.neg_span() + self.pos_span() + (bin - self.time_min),
        }
    }

    /// Inverse of `to_axis`. A position one past the POS region maps
    /// onto the first TIME bin; the caller has already range-checked.
    fn from_axis(&self, k: usize) -> (Mode, usize) {
        if k < self.neg_span() {
            (Mode::Neg, self.neg_max - 1 - k)
        } else if k < self.neg_span() + self.pos_span() {
            (Mode::Pos, self.pos_min + (k - self.neg_span()))
        } else {
            (Mode::Time, self.time_min + (k - self.neg_span() - self.pos_span()))
        }
    }

    /// Map a value string onto the time axis (lower bound).
    fn axis_of_value(&self, store: &Store, value: &str) -> usize {
        let first = value.chars().next();
        match first {
            Some('-') => {
                let bin = store.bin_lookup(value).min(self.neg_max.saturating_sub(1));
                if bin < self.neg_min || self.neg_span() == 0 {
                    // Below the NEG window: later than every BCE date.
                    self.neg_span()
                } else {
                    self.to_axis(Mode::Neg, bin)
                }
            }
            Some(c) if c.is_ascii_digit() => {
                let bin = store.bin_lookup(value).clamp(self.pos_min, self.pos_max);
                if self.pos_span() == 0 || bin >= self.pos_max {
                    self.neg_span() + self.pos_span()
                } else {
                    self.to_axis(Mode::Pos, bin)
                }
            }
            Some('T') => {
                let bin = store.bin_lookup(value).clamp(self.time_min, self.time_max);
                if self.time_span() == 0 || bin >= self.time_max {
                    self.total()
                } else {
                    self.to_axis(Mode::Time, bin)
                }
            }
            // Empty string is the minimum endpoint; anything else
            // unparseable lands past the end and matches nothing.
            None => 0,
            Some(_) => self.total(),
        }
    }
}

/// Datetime order over value strings.
pub fn datetime_compare(a: &str, b: &str) -> Ordering {
    let a_neg = a.starts_with('-');
    let b_neg = b.starts_with('-');
    match (a_neg, b_neg) {
        // BCE among themselves: reverse lexical.
        (true, true) => cmp_fold(b, a),
        _ => cmp_fold(a, b),
    }
}

fn cmp_fold(a: &str, b: &str) -> Ordering {
    a.chars()
        .map(|c| c.to_ascii_lowercase())
        .cmp(b.chars().map(|c| c.to_ascii_lowercase()))
}

/// Bin walk over the datetime time axis.
#[derive(Debug)]
struct DatetimeRange {
    store: Store,
    limits: BinLimits,
    dir: WalkDirection,
    /// Next axis position to produce; `None` when exhausted.
    cursor: Option<usize>,
    /// Inclusive axis window.
    axis_low: usize,
    axis_high: usize,
    low_value: Option<String>,
    high_value: Option<String>,
    density: u64,
}

impl DatetimeRange {
    fn new(
        store: &Store,
        limits: BinLimits,
        low: Option<&str>,
        high: Option<&str>,
        dir: WalkDirection,
    ) -> DatetimeRange {
        let axis_low = low.map_or(0, |v| limits.axis_of_value(store, v));
        // High is exclusive in value space but its bracketing bin may
        // still hold in-range values, so the axis window includes it.
        let axis_high = high.map_or_else(
            || limits.total().saturating_sub(1),
            |v| limits.axis_of_value(store, v).min(limits.total().saturating_sub(1)),
        );
        let cursor = if limits.total() == 0 || axis_low > axis_high {
            None
        } else {
            Some(match dir {
                WalkDirection::Forward => axis_low,
                WalkDirection::Backward => axis_high,
            })
        };
        DatetimeRange {
            store: store.clone(),
            limits,
            dir,
            cursor,
            axis_low,
            axis_high,
            low_value: low.map(str::to_string),
            high_value: high.map(str::to_string),
            density: store.bin_density(),
        }
    }

    /// The 4-digit-prefix skip: a bin whose string window cannot
    /// contain a plausible date prefix is pruned without touching its
    /// primitives.
    fn bin_plausible(&self, store: &Store, mode: Mode, bin: usize) -> bool {
        let Some(first) = store.bin_start(bin) else {
            return false;
        };
        let last = store.bin_end(bin).unwrap_or_else(|| first.clone());
        let stripped_first = match mode {
            Mode::Neg => first.strip_prefix('-').unwrap_or(""),
            Mode::Time => first.strip_prefix('T').unwrap_or(""),
            Mode::Pos => first.as_str(),
        };
        let stripped_last = match mode {
            Mode::Neg => last.strip_prefix('-').unwrap_or(""),
            Mode::Time => last.strip_prefix('T').unwrap_or(""),
            Mode::Pos => last.as_str(),
        };
        // Some 4-digit prefix must sort inside [first, last].
        let first4: String = stripped_first.chars().take(4).collect();
        let last4: String = stripped_last.chars().take(4).collect();
        let digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
        digits(&first4) || digits(&last4) || (first4.as_str() <= "9999" && last4.as_str() >= "0000")
    }
}

impl ValueRange for DatetimeRange {
    fn size_estimate(&self) -> u64 {
        let bins = match self.cursor {
            None => 0,
            Some(cur) => match self.dir {
                WalkDirection::Forward => self.axis_high + 1 - cur,
                WalkDirection::Backward => cur + 1 - self.axis_low,
            },
        } as u64;
        bins * self.density
    }

    fn next_bin(&mut self) -> Option<usize> {
        loop {
            let k = self.cursor?;
            let (mode, bin) = self.limits.from_axis(k);
            self.cursor = match self.dir {
                WalkDirection::Forward => {
                    if k < self.axis_high {
                        Some(k + 1)
                    } else {
                        None
                    }
                }
                WalkDirection::Backward => {
                    if k > self.axis_low {
                        Some(k - 1)
                    } else {
                        None
                    }
                }
            };
            // The skip: bins that cannot hold a 4-digit date prefix
            // are pruned without touching their primitives.
            if self.bin_plausible(&self.store, mode, bin) {
                return Some(bin);
            }
        }
    }

    fn seek(&mut self, value: &str) -> GraphResult<()> {
        let k = self
            .limits
            .axis_of_value(&self.store, value)
            .clamp(self.axis_low, self.axis_high);
        self.cursor = Some(k);
        Ok(())
    }

    fn value_in_range(&self, value: &str) -> bool {
        if let Some(low) = self.low_value.as_deref() {
            if datetime_compare(value, low) == Ordering::Less {
                return false;
            }
        }
        if let Some(high) = self.high_value.as_deref() {
            if datetime_compare(value, high) != Ordering::Less {
                return false;
            }
        }
        true
    }

    fn freeze(&self, out: &mut String) {
        let (mode, bin) = match self.cursor {
            Some(k) => {
                let (m, b) = self.limits.from_axis(k);
                (m.token(), b as i64)
            }
            None => ('e', -1),
        };
        out.push_str(&format!(
            "dt:{}:{}{}:{}-{}:{}:{}",
            match self.dir {
                WalkDirection::Forward => 'f',
                WalkDirection::Backward => 'b',
            },
            mode,
            bin,
            self.axis_low,
            self.axis_high,
            self.low_value.as_deref().map_or_else(String::new, escape_token),
            self.high_value.as_deref().map_or_else(String::new, escape_token),
        ));
    }
}

impl Comparator for DatetimeComparator {
    fn name(&self) -> &'static str {
        "datetime"
    }

    fn syntax_ok(&self, value: &str) -> bool {
        let rest = value
            .strip_prefix('-')
            .or_else(|| value.strip_prefix('T'))
            .unwrap_or(value);
        !rest.is_empty() && rest.starts_with(|c: char| c.is_ascii_digit())
    }

    fn sort_compare(&self, a: &str, b: &str) -> Ordering {
        datetime_compare(a, b)
    }

    fn glob_match(&self, _pattern: &str, _value: &str) -> GraphResult<bool> {
        Err(GraphError::Semantics(
            "datetime comparator does not support ~=".into(),
        ))
    }

    fn vrange(
        &self,
        store: &Store,
        low: Option<&str>,
        high: Option<&str>,
        dir: WalkDirection,
    ) -> Option<Box<dyn ValueRange>> {
        let limits = BinLimits::global(store);
        Some(Box::new(DatetimeRange::new(store, limits, low, high, dir)))
    }

    fn vrange_thaw(&self, store: &Store, frozen: &str) -> GraphResult<Box<dyn ValueRange>> {
        let bad = || GraphError::BadCursor(format!("malformed datetime range {frozen:?}"));
        let rest = frozen.strip_prefix("dt:").ok_or_else(bad)?;
        let mut parts = rest.splitn(5, ':');
        let dir = match parts.next().ok_or_else(bad)? {
            "f" => WalkDirection::Forward,
            "b" => WalkDirection::Backward,
            _ => return Err(bad()),
        };
        let cursor_tok = parts.next().ok_or_else(bad)?;
        let window = parts.next().ok_or_else(bad)?;
        let low_tok = parts.next().ok_or_else(bad)?;
        let high_tok = parts.next().ok_or_else(bad)?;

        let (axis_low, axis_high) = window.split_once('-').ok_or_else(bad)?;
        let axis_low: usize = axis_low.parse().map_err(|_| bad())?;
        let axis_high: usize = axis_high.parse().map_err(|_| bad())?;

        let limits = BinLimits::global(store);
        let cursor = match cursor_tok.chars().next().ok_or_else(bad)? {
            'e' => None,
            mode_tok => {
                let bin: i64 = cursor_tok[1..].parse().map_err(|_| bad())?;
                let mode = match mode_tok {
                    'n' => Mode::Neg,
                    'p' => Mode::Pos,
                    't' => Mode::Time,
                    _ => return Err(bad()),
                };
                Some(limits.to_axis(mode, bin as usize))
            }
        };

        let low_value = if low_tok.is_empty() {
            None
        } else {
            Some(unescape_token(low_tok)?)
        };
        let high_value = if high_tok.is_empty() {
            None
        } else {
            Some(unescape_token(high_tok)?)
        };

        Ok(Box::new(DatetimeRange {
            store: store.clone(),
            limits,
            dir,
            cursor,
            axis_low,
            axis_high,
            low_value,
            high_value,
            density: store.bin_density(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::Datatype;
    use crate::store::{MemStore, PrimitiveData, PrimitiveStore};
    use std::sync::Arc;

    fn date_store(values: &[&str]) -> Store {
        let store = MemStore::new();
        for v in values {
            store
                .primitive_alloc(PrimitiveData {
                    value: Some((*v).to_string()),
                    datatype: Datatype::Timestamp,
                    live: true,
                    ..PrimitiveData::default()
                })
                .unwrap();
        }
        Arc::new(store)
    }

    #[test]
    fn test_order_bce_reversed() {
        assert_eq!(datetime_compare("-0100", "-0050"), Ordering::Less);
        assert_eq!(datetime_compare("-0050", "0050"), Ordering::Less);
        assert_eq!(datetime_compare("0050", "0100"), Ordering::Less);
        assert_eq!(datetime_compare("9999", "T00"), Ordering::Less);
        assert_eq!(datetime_compare("T00", "T12"), Ordering::Less);
    }

    #[test]
    fn test_limits_partition_regions() {
        let store = date_store(&["-0100", "-0002", "1999", "2004", "T10"]);
        let limits = BinLimits::compute(&store);
        assert_eq!(limits.neg_span(), 2);
        assert_eq!(limits.pos_span(), 2);
        assert_eq!(limits.time_span(), 1);
        assert_eq!(limits.total(), 5);
    }

    #[test]
    fn test_axis_is_time_ordered() {
        let store = date_store(&["-0100", "-0002", "1999", "2004", "T10"]);
        let limits = BinLimits::compute(&store);
        // Earliest: -0100 (largest absolute BCE year).
        let order = ["-0100", "-0002", "1999", "2004", "T10"];
        let mut last = None;
        for value in order {
            let k = limits.axis_of_value(&store, value);
            if let Some(prev) = last {
                assert!(k > prev, "{value} not after previous");
            }
            last = Some(k);
        }
        // from_axis is the inverse of to_axis over the whole axis.
        for k in 0..limits.total() {
            let (mode, bin) = limits.from_axis(k);
            assert_eq!(limits.to_axis(mode, bin), k);
        }
    }

    #[test]
    fn test_forward_walk_produces_window() {
        let store = date_store(&["1999", "2000", "2001", "2002", "2003", "2004"]);
        let limits = BinLimits::compute(&store);
        let mut range =
            DatetimeRange::new(&store, limits, Some("2000"), Some("2003"), WalkDirection::Forward);
        let mut produced = Vec::new();
        while let Some(bin) = range.next_bin() {
            if let Some(s) = store.bin_start(bin) {
                if range.value_in_range(&s) {
                    produced.push(s);
                }
            }
        }
        assert_eq!(produced, vec!["2000", "2001", "2002"]);
    }

    #[test]
    fn test_backward_walk_reverses() {
        let store = date_store(&["1999", "2000", "2001", "2002", "2003"]);
        let limits = BinLimits::compute(&store);
        let mut range =
            DatetimeRange::new(&store, limits, Some("2000"), Some("2003"), WalkDirection::Backward);
        let mut produced = Vec::new();
        while let Some(bin) = range.next_bin() {
            if let Some(s) = store.bin_start(bin) {
                if range.value_in_range(&s) {
                    produced.push(s);
                }
            }
        }
        assert_eq!(produced, vec!["2002", "2001", "2000"]);
    }

    #[test]
    fn test_walk_crosses_mode_seams() {
        let store = date_store(&["-0100", "-0002", "1999", "T10"]);
        let limits = BinLimits::compute(&store);
        let mut range = DatetimeRange::new(&store, limits, None, None, WalkDirection::Forward);
        let mut produced = Vec::new();
        while let Some(bin) = range.next_bin() {
            produced.push(store.bin_start(bin).unwrap());
        }
        assert_eq!(produced, vec!["-0100", "-0002", "1999", "T10"]);
    }

    #[test]
    fn test_skip_pruning() {
        let store = date_store(&["1999", "2000"]);
        let limits = BinLimits::compute(&store);
        let range = DatetimeRange::new(&store, limits, None, None, WalkDirection::Forward);
        let bin_1999 = store.bin_lookup("1999");
        assert!(range.bin_plausible(&store, Mode::Pos, bin_1999));
    }

    #[test]
    fn test_statistics_span() {
        let store = date_store(&["1999", "2000", "2001", "2002"]);
        let limits = BinLimits::compute(&store);
        let range =
            DatetimeRange::new(&store, limits, Some("2000"), Some("2002"), WalkDirection::Forward);
        // Bins 2000..=2002 remain; density 1 in the memory store.
        assert_eq!(range.size_estimate(), 3);
    }

    #[test]
    fn test_no_glob() {
        assert!(DatetimeComparator.glob_match("20*", "2000").is_err());
    }

    #[test]
    fn test_syntax() {
        let c = DatetimeComparator;
        assert!(c.syntax_ok("2000-01-01"));
        assert!(c.syntax_ok("-0100"));
        assert!(c.syntax_ok("T12:30"));
        assert!(!c.syntax_ok("hello"));
        assert!(!c.syntax_ok(""));
    }
}
