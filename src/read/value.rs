//! Result values.
//!
//! What a read returns: typed atoms, lists, and *deferred* values. A
//! positive answer whose materialisation was postponed because it was
//! expensive and the caller may never look at it. A deferred value
//! keeps its read-set context alive through a reference count; the
//! evaluator re-enters the engine on demand.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::ident::{Datatype, Guid};

use super::ReadSet;

/// A value in a result frame.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Guid(Guid),
    Timestamp(u64),
    Datatype(Datatype),
    List(Vec<Value>),
    /// Postponed sub-result; see [`Deferred`].
    Deferred(Deferred),
}

/// Reference into a parked read-set context. `index` selects which of
/// the context's pending frames this value stands for.
#[derive(Clone)]
pub struct Deferred {
    pub rsc: Rc<RefCell<ReadSet>>,
    pub index: usize,
}

impl Value {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Value::Deferred(_))
    }

    /// Deep check used by the sampler: does any deferred value hide
    /// under this one?
    pub fn has_deferred(&self) -> bool {
        match self {
            Value::Deferred(_) => true,
            Value::List(items) => items.iter().any(Value::has_deferred),
            _ => false,
        }
    }

    pub fn as_guid(&self) -> Option<Guid> {
        match self {
            Value::Guid(g) => Some(*g),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Guid(a), Value::Guid(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Datatype(a), Value::Datatype(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            // Deferred values compare by identity: same parked context,
            // same frame.
            (Value::Deferred(a), Value::Deferred(b)) => {
                Rc::ptr_eq(&a.rsc, &b.rsc) && a.index == b.index
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Guid(g) => write!(f, "{g}"),
            Value::Timestamp(t) => write!(f, "@{t}"),
            Value::Datatype(d) => write!(f, "{d}"),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Deferred(d) => write!(f, "<deferred #{}>", d.index),
        }
    }
}
