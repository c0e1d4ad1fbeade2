//! Global identifiers.
//!
//! A [`Guid`] names a primitive across databases and across time. It
//! packs three fields into 128 bits:
//!
//! ```text
//! | db (32) | local (48) | serial (48) |
//! ```
//!
//! `db` identifies the originating database, `serial` is that
//! database's allocation counter (monotonic, never reused), and `local`
//! is the serial of the *first* version of the lineage. All versions of
//! a logical record therefore share `db.local` and differ only in
//! `serial`; the newest generation is the one with the largest serial.
//!
//! The readable dotted form is `db.local.serial` in lowercase hex.

use std::fmt;

use crate::error::{GraphError, GraphResult};

const LOCAL_BITS: u32 = 48;
const SERIAL_BITS: u32 = 48;
const FIELD_MASK: u64 = (1 << 48) - 1;

/// 128-bit global identifier; see the module docs for the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Guid {
    hi: u64,
    lo: u64,
}

impl Guid {
    /// The all-zero guid, used where a linkage slot is structurally
    /// present but empty.
    pub fn null() -> Guid {
        Guid { hi: 0, lo: 0 }
    }

    pub fn is_null(&self) -> bool {
        self.hi == 0 && self.lo == 0
    }

    /// Assemble a guid from its three fields. `local` and `serial` must
    /// fit in 48 bits.
    pub fn from_parts(db: u32, local: u64, serial: u64) -> GraphResult<Guid> {
        if local > FIELD_MASK || serial > FIELD_MASK {
            return Err(GraphError::Semantics(format!(
                "guid field overflow: local={local:#x} serial={serial:#x}"
            )));
        }
        Ok(Guid {
            hi: (u64::from(db) << 32) | (local >> 16),
            lo: ((local & 0xffff) << SERIAL_BITS) | serial,
        })
    }

    pub fn db(&self) -> u32 {
        (self.hi >> 32) as u32
    }

    pub fn local(&self) -> u64 {
        ((self.hi & 0xffff_ffff) << 16) | (self.lo >> SERIAL_BITS)
    }

    pub fn serial(&self) -> u64 {
        self.lo & FIELD_MASK
    }

    /// True when `self` and `other` are versions of the same logical
    /// record.
    pub fn same_lineage(&self, other: &Guid) -> bool {
        self.db() == other.db() && self.local() == other.local()
    }

    /// The guid of the next generation of this lineage, allocated at
    /// `serial`.
    pub fn versioned(&self, serial: u64) -> GraphResult<Guid> {
        Guid::from_parts(self.db(), self.local(), serial)
    }

    /// Parse the dotted hex form `db.local.serial`.
    pub fn parse(s: &str) -> GraphResult<Guid> {
        let mut parts = s.split('.');
        let bad = || GraphError::Syntax(format!("malformed guid {s:?}"));
        let db = parts.next().ok_or_else(bad)?;
        let local = parts.next().ok_or_else(bad)?;
        let serial = parts.next().ok_or_else(bad)?;
        if parts.next().is_some() {
            return Err(bad());
        }
        let db = u32::from_str_radix(db, 16).map_err(|_| bad())?;
        let local = u64::from_str_radix(local, 16).map_err(|_| bad())?;
        let serial = u64::from_str_radix(serial, 16).map_err(|_| bad())?;
        Guid::from_parts(db, local, serial)
    }

    /// Raw 128-bit value, high word first. Used by hash indexes.
    pub fn to_words(&self) -> (u64, u64) {
        (self.hi, self.lo)
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.hi.to_be_bytes());
        out[8..].copy_from_slice(&self.lo.to_be_bytes());
        out
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}.{:x}.{:x}", self.db(), self.local(), self.serial())
    }
}

impl std::str::FromStr for Guid {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Guid::parse(s)
    }
}
