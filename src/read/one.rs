//! Read-One: one-candidate subconstraint evaluation.
//!
//! Spawned by a read-set for each candidate that passed the intrinsic
//! predicates. Walks the constraint's children in order; for each,
//! builds the subconstraint iterator and pushes a child read-set under
//! the child pipeline. Once every child has decided, delivers
//! `{ok, row}` back to the parent's mailbox.
//!
//! When the parent runs in verify mode but its pattern will want the
//! child contents later, the child is verified cheaply and its frame
//! enters the row as a *deferred* value; the parked child context can
//! be resumed if anyone actually looks.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::constraint::{Constraint, Pattern};
use crate::error::{GraphError, GraphResult};
use crate::ident::{Guid, Id};
use crate::iter::Budget;
use crate::stack::{Control, StackContext};
use crate::store::{Primitive, Store};

use super::value::{Deferred, Value};
use super::{instantiate, OneOutcome, ReadConfig, ReadOutcome, ReadSet, RscContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OneState {
    NextChild,
    WaitChild,
    Deliver,
}

/// One-candidate evaluator; see the module docs.
pub(crate) struct ReadOne {
    store: Store,
    con: Arc<Constraint>,
    candidate: (Id, Guid),
    primitive: Arc<Primitive>,
    /// Parent is only verifying; children verify too and contents
    /// defer.
    parent_verify: bool,
    state: OneState,
    child_idx: usize,
    /// One collected value per child, in child order.
    collected: Vec<Value>,
    sub_slot: Rc<RefCell<Option<ReadOutcome>>>,
    /// The child read-set currently running, kept for deferral.
    running: Option<Rc<RefCell<ReadSet>>>,
    out_slot: Rc<RefCell<Option<OneOutcome>>>,
    failed: bool,
}

impl ReadOne {
    pub(crate) fn new(
        store: Store,
        con: Arc<Constraint>,
        candidate: (Id, Guid),
        primitive: Arc<Primitive>,
        parent_verify: bool,
        out_slot: Rc<RefCell<Option<OneOutcome>>>,
    ) -> ReadOne {
        ReadOne {
            store,
            con,
            candidate,
            primitive,
            parent_verify,
            state: OneState::NextChild,
            child_idx: 0,
            collected: Vec::new(),
            sub_slot: Rc::new(RefCell::new(None)),
            running: None,
            out_slot,
            failed: false,
        }
    }

    fn wants_contents(&self) -> bool {
        self.con
            .result_pattern()
            .per_id
            .as_ref()
            .is_some_and(mentions_contents)
    }

    fn step(&mut self, _budget: &mut Budget) -> GraphResult<Control> {
        match self.state {
            OneState::NextChild => {
                if self.failed || self.child_idx >= self.con.children.len() {
                    self.state = OneState::Deliver;
                    return Ok(Control::Continue);
                }
                let child = Arc::new(self.con.children[self.child_idx].clone());
                if child.unsatisfiable {
                    if child.count.min > 0 {
                        self.failed = true;
                        self.state = OneState::Deliver;
                    } else {
                        self.collected.push(Value::List(Vec::new()));
                        self.child_idx += 1;
                    }
                    return Ok(Control::Continue);
                }
                // A child whose frames nobody reads runs in verify
                // mode: existence is all the parent needs.
                let child_verify = self.parent_verify || !self.wants_contents();
                self.sub_slot.replace(None);
                let rsc = ReadSet::build(
                    &self.store,
                    child,
                    Some(self.candidate),
                    child_verify,
                    &ReadConfig::default(),
                    self.sub_slot.clone(),
                )?;
                let rsc = Rc::new(RefCell::new(rsc));
                self.running = Some(rsc.clone());
                self.state = OneState::WaitChild;
                Ok(Control::Push(Box::new(RscContext { rsc })))
            }
            OneState::WaitChild => {
                let Some(outcome) = self.sub_slot.borrow_mut().take() else {
                    return Err(GraphError::Internal(
                        "child read-set completed without delivering".into(),
                    ));
                };
                let child = &self.con.children[self.child_idx];
                if !outcome.ok && child.count.min > 0 {
                    self.failed = true;
                    self.running = None;
                    self.state = OneState::Deliver;
                    return Ok(Control::Continue);
                }
                let value = if self.parent_verify && self.wants_contents() {
                    // Positive answer exists; materialisation waits.
                    match self.running.take() {
                        Some(rsc) => Value::Deferred(Deferred {
                            rsc,
                            index: self.child_idx,
                        }),
                        None => Value::List(outcome.rows),
                    }
                } else {
                    self.running = None;
                    Value::List(outcome.rows)
                };
                self.collected.push(value);
                self.child_idx += 1;
                self.state = OneState::NextChild;
                Ok(Control::Continue)
            }
            OneState::Deliver => {
                let row = if self.failed {
                    Value::Null
                } else if self.parent_verify {
                    // Verify rows carry only what deferral needs.
                    Value::List(self.collected.clone())
                } else {
                    match self.con.result_pattern().per_id {
                        Some(pattern) => instantiate(
                            &pattern,
                            &self.primitive,
                            &self.collected,
                            0,
                            None,
                        )?,
                        None => Value::Null,
                    }
                };
                self.out_slot.replace(Some(OneOutcome {
                    ok: !self.failed,
                    row,
                }));
                Ok(Control::Pop)
            }
        }
    }
}

fn mentions_contents(pattern: &Pattern) -> bool {
    match pattern {
        Pattern::Contents => true,
        Pattern::List(items) => items.iter().any(mentions_contents),
        Pattern::Sample(inner) => mentions_contents(inner),
        _ => false,
    }
}

impl StackContext for ReadOne {
    fn name(&self) -> &'static str {
        "read-one"
    }

    fn run(&mut self, budget: &mut Budget) -> GraphResult<Control> {
        self.step(budget)
    }
}
