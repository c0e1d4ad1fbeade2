//! # Quiver
//!
//! A typed property-graph store with a resumable, budget-bounded
//! constraint query engine.
//!
//! ## Pipeline Architecture
//!
//! ### Read path
//! ```text
//! Constraint Tree
//!     ↓
//! [Planner]            → index approaches (hash, word, vip, bin)
//!     ↓
//! [Iterator Algebra]   → AND/OR/fixed/vip/bin id streams
//!     ↓
//! [Read-Set Pipeline]  → statistics → done? → next → one → deliver
//!     ↓                   (cooperative stack, budget-bounded)
//! [Sort / Samples / Page]
//!     ↓
//! Result Values (+ cursor when resumable)
//! ```
//!
//! ### Write path
//! ```text
//! Write Constraint Tree
//!     ↓
//! [Validity]           → single guid/name/value, endpoints resolve
//!     ↓
//! [Anchor → Key → Pointed → Unique]   (annotate phases)
//!     ↓
//! [Commit]             → horizon, parent-before-child, rollback
//!     ↓
//! Result Tree pruned to `result=…`
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use quiver::constraint::Constraint;
//! use quiver::read::ReadEngine;
//! use quiver::store::MemStore;
//! use quiver::ticket::TicketPrinter;
//! use quiver::write::WriteEngine;
//! use std::sync::Arc;
//! use std::time::{Duration, Instant};
//!
//! let store: quiver::store::Store = Arc::new(MemStore::new());
//! let tickets = TicketPrinter::new();
//!
//! // Write a primitive.
//! let writes = WriteEngine::new(store.clone(), tickets.clone());
//! writes.execute(Constraint::name_value("color", "blue")).unwrap();
//!
//! // Read it back.
//! let reads = ReadEngine::new(store.clone(), tickets);
//! let found = reads
//!     .execute(
//!         Constraint::name_value("color", "blue"),
//!         Instant::now() + Duration::from_secs(5),
//!     )
//!     .unwrap();
//! assert_eq!(found.count, 1);
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `ident` | Primitive ids, guids, datatypes, datelines |
//! | `store` | Primitive store contract + in-memory reference store |
//! | `constraint` | Constraint-tree data model and normalisation |
//! | `cmp` | Comparator plane (default, octet, datetime) |
//! | `iter` | Composable iterator algebra with cursors |
//! | `stack` | Cooperative, budget-bounded execution stack |
//! | `ticket` | Shared/exclusive scheduling gate |
//! | `cursor` | Freeze/thaw text codec for iterators |
//! | `read` | Read engine: match, sort, sample, paginate |
//! | `write` | Write engine: annotate, check, commit, rollback |
//! | `worker` | Pidfile, epitaph, restart guard |
//! | `config` | Figment-based configuration |

pub mod cmp;
pub mod config;
pub mod constraint;
pub mod cursor;
pub mod error;
pub mod ident;
pub mod iter;
pub mod read;
pub mod stack;
pub mod store;
pub mod ticket;
pub mod worker;
pub mod write;

// Re-export the types most callers touch.
pub use config::Config;
pub use constraint::Constraint;
pub use error::{Advance, GraphError, GraphResult, Membership, Progress};
pub use ident::{Datatype, Dateline, Guid, Id};
pub use iter::{Budget, Direction, IdIterator};
pub use read::{ReadEngine, ReadOutcome, Value};
pub use store::{Linkage, MemStore, Primitive, PrimitiveStore, Store};
pub use ticket::TicketPrinter;
pub use write::WriteEngine;
