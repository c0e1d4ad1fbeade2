//! Datelines: read consistency tokens.
//!
//! A dateline records, for each database a reader has observed, the
//! largest serial it has seen from that database. A server can compare
//! an incoming dateline against its own state to decide whether it is
//! current enough to answer, and hand back an advanced dateline with
//! the response.
//!
//! The textual form is `"<count>:<dbid>.<serial>[,<dbid>.<serial>…]"`
//! with pairs in strictly ascending dbid order.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{GraphError, GraphResult};

/// Ordered map of database id → largest observed serial.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dateline {
    entries: BTreeMap<u32, u64>,
}

impl Dateline {
    pub fn new() -> Dateline {
        Dateline::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Record an observation, keeping the maximum serial per db.
    pub fn insert(&mut self, db: u32, serial: u64) {
        let slot = self.entries.entry(db).or_insert(serial);
        if *slot < serial {
            *slot = serial;
        }
    }

    pub fn get(&self, db: u32) -> Option<u64> {
        self.entries.get(&db).copied()
    }

    /// Iterate `(db, serial)` pairs in ascending db order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.entries.iter().map(|(db, serial)| (*db, *serial))
    }

    /// True if `self` has seen at least as much as `other` from every
    /// database `other` mentions.
    pub fn covers(&self, other: &Dateline) -> bool {
        other
            .iter()
            .all(|(db, serial)| self.get(db).is_some_and(|own| own >= serial))
    }

    /// Merge `other` into `self`, keeping maxima.
    pub fn merge(&mut self, other: &Dateline) {
        for (db, serial) in other.iter() {
            self.insert(db, serial);
        }
    }

    /// Parse the compact textual form.
    pub fn parse(s: &str) -> GraphResult<Dateline> {
        let bad = |what: &str| GraphError::Syntax(format!("malformed dateline {s:?}: {what}"));
        let (count, rest) = s
            .split_once(':')
            .ok_or_else(|| bad("missing count separator"))?;
        let count: usize = count.parse().map_err(|_| bad("bad count"))?;

        let mut dateline = Dateline::new();
        if rest.is_empty() {
            if count != 0 {
                return Err(bad("count does not match pairs"));
            }
            return Ok(dateline);
        }

        let mut last_db: Option<u32> = None;
        for pair in rest.split(',') {
            let (db, serial) = pair.split_once('.').ok_or_else(|| bad("missing dot"))?;
            let db: u32 = u32::from_str_radix(db, 16).map_err(|_| bad("bad dbid"))?;
            let serial: u64 = u64::from_str_radix(serial, 16).map_err(|_| bad("bad serial"))?;
            if last_db.is_some_and(|prev| prev >= db) {
                return Err(bad("dbids not strictly ascending"));
            }
            last_db = Some(db);
            dateline.entries.insert(db, serial);
        }
        if dateline.entries.len() != count {
            return Err(bad("count does not match pairs"));
        }
        Ok(dateline)
    }
}

impl fmt::Display for Dateline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.entries.len())?;
        for (i, (db, serial)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{db:x}.{serial:x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_maximum() {
        let mut d = Dateline::new();
        d.insert(1, 10);
        d.insert(1, 5);
        d.insert(1, 20);
        assert_eq!(d.get(1), Some(20));
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn test_text_round_trip() {
        let mut d = Dateline::new();
        d.insert(0x10, 0xff);
        d.insert(0x2, 0x7);
        let text = d.to_string();
        assert_eq!(text, "2:2.7,10.ff");
        assert_eq!(Dateline::parse(&text).unwrap(), d);
    }

    #[test]
    fn test_empty_round_trip() {
        let d = Dateline::new();
        assert_eq!(d.to_string(), "0:");
        assert_eq!(Dateline::parse("0:").unwrap(), d);
    }

    #[test]
    fn test_parse_rejects_unordered() {
        assert!(Dateline::parse("2:10.ff,2.7").is_err());
        assert!(Dateline::parse("2:2.7").is_err());
        assert!(Dateline::parse("1:2").is_err());
    }

    #[test]
    fn test_covers() {
        let mut server = Dateline::new();
        server.insert(1, 100);
        server.insert(2, 50);

        let mut client = Dateline::new();
        client.insert(1, 80);
        assert!(server.covers(&client));

        client.insert(2, 60);
        assert!(!server.covers(&client));

        client = Dateline::new();
        client.insert(3, 1);
        assert!(!server.covers(&client));
    }

    #[test]
    fn test_merge() {
        let mut a = Dateline::new();
        a.insert(1, 10);
        a.insert(2, 5);
        let mut b = Dateline::new();
        b.insert(2, 9);
        b.insert(3, 1);
        a.merge(&b);
        assert_eq!(a.get(1), Some(10));
        assert_eq!(a.get(2), Some(9));
        assert_eq!(a.get(3), Some(1));
    }
}
