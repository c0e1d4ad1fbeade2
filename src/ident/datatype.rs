//! Value datatypes.
//!
//! Every primitive value carries one of a closed set of datatypes.
//! Small integer codes 1–255 outside the named range are accepted as
//! extension datatypes so foreign writers can tag values the core does
//! not interpret.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{GraphError, GraphResult};

/// Datatype of a primitive's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datatype {
    Null,
    String,
    Integer,
    Float,
    Guid,
    Timestamp,
    Url,
    Bytestring,
    Boolean,
    /// Numbered extension type, opaque to the core.
    Extension(u8),
}

impl Datatype {
    /// Wire code. Named types use 1–9; extensions keep their own code.
    pub fn code(self) -> u8 {
        match self {
            Datatype::Null => 1,
            Datatype::String => 2,
            Datatype::Integer => 3,
            Datatype::Float => 4,
            Datatype::Guid => 5,
            Datatype::Timestamp => 6,
            Datatype::Url => 7,
            Datatype::Bytestring => 8,
            Datatype::Boolean => 9,
            Datatype::Extension(code) => code,
        }
    }

    /// Decode a wire code. Codes 1–9 map to named types, anything else
    /// in 10–255 is an extension; 0 is invalid.
    pub fn from_code(code: u8) -> GraphResult<Datatype> {
        match code {
            0 => Err(GraphError::Semantics("datatype code 0 is reserved".into())),
            1 => Ok(Datatype::Null),
            2 => Ok(Datatype::String),
            3 => Ok(Datatype::Integer),
            4 => Ok(Datatype::Float),
            5 => Ok(Datatype::Guid),
            6 => Ok(Datatype::Timestamp),
            7 => Ok(Datatype::Url),
            8 => Ok(Datatype::Bytestring),
            9 => Ok(Datatype::Boolean),
            n => Ok(Datatype::Extension(n)),
        }
    }

    /// Parse a datatype name. Decimal numbers are accepted as codes.
    pub fn parse(s: &str) -> GraphResult<Datatype> {
        match s {
            "null" => Ok(Datatype::Null),
            "string" => Ok(Datatype::String),
            "integer" => Ok(Datatype::Integer),
            "float" => Ok(Datatype::Float),
            "guid" => Ok(Datatype::Guid),
            "timestamp" => Ok(Datatype::Timestamp),
            "url" => Ok(Datatype::Url),
            "bytestring" => Ok(Datatype::Bytestring),
            "boolean" => Ok(Datatype::Boolean),
            other => {
                let code: u8 = other.parse().map_err(|_| {
                    GraphError::Semantics(format!("unknown datatype {other:?}"))
                })?;
                Datatype::from_code(code)
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Datatype::Null => "null",
            Datatype::String => "string",
            Datatype::Integer => "integer",
            Datatype::Float => "float",
            Datatype::Guid => "guid",
            Datatype::Timestamp => "timestamp",
            Datatype::Url => "url",
            Datatype::Bytestring => "bytestring",
            Datatype::Boolean => "boolean",
            Datatype::Extension(_) => "extension",
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datatype::Extension(code) => write!(f, "{code}"),
            other => f.write_str(other.name()),
        }
    }
}

impl Default for Datatype {
    fn default() -> Self {
        Datatype::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_codes_round_trip() {
        for dt in [
            Datatype::Null,
            Datatype::String,
            Datatype::Integer,
            Datatype::Float,
            Datatype::Guid,
            Datatype::Timestamp,
            Datatype::Url,
            Datatype::Bytestring,
            Datatype::Boolean,
        ] {
            assert_eq!(Datatype::from_code(dt.code()).unwrap(), dt);
            assert_eq!(Datatype::parse(dt.name()).unwrap(), dt);
        }
    }

    #[test]
    fn test_extension_codes() {
        assert_eq!(Datatype::from_code(42).unwrap(), Datatype::Extension(42));
        assert_eq!(Datatype::parse("200").unwrap(), Datatype::Extension(200));
        assert_eq!(Datatype::Extension(42).to_string(), "42");
    }

    #[test]
    fn test_invalid_codes() {
        assert!(Datatype::from_code(0).is_err());
        assert!(Datatype::parse("everything").is_err());
        assert!(Datatype::parse("300").is_err());
    }
}
