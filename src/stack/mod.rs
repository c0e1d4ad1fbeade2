//! # Execution Stack
//!
//! Cooperative, budget-bounded execution. Each request owns a LIFO of
//! [`StackContext`]s; [`Stack::run_until_deadline`] repeatedly runs the
//! top context until the stack empties or the wall-clock deadline
//! passes. A context's `run` returns a [`Control`] steering the stack:
//!
//! - `Continue`: state advanced, run me again;
//! - `Yield`: budget exhausted, hand the slice back to the event loop;
//! - `Push(child)`: depth-first call, run the child first;
//! - `Pop`: finished, return to my caller.
//!
//! Continuations are explicit state enums inside each context, never
//! captured closures, so the cursor codec can discriminate them.
//! Contexts register with the stack's resource ledger; abnormal
//! teardown runs `free` exactly once per context, in LIFO order.
//!
//! Cancellation is a shared flag consulted between run steps, so a
//! shutdown or hard timeout takes effect at the next budget boundary,
//! never mid-step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{GraphResult, Progress};
use crate::iter::Budget;

/// What a context's `run` wants the stack to do next.
pub enum Control {
    /// State advanced; run me again.
    Continue,
    /// Out of budget; yield the slice.
    Yield,
    /// Run this child first (depth-first call).
    Push(Box<dyn StackContext>),
    /// Finished; remove me and resume my caller.
    Pop,
}

/// A resumable unit of engine work.
pub trait StackContext {
    /// Short name for tracing.
    fn name(&self) -> &'static str;

    /// Advance by one bounded step.
    fn run(&mut self, budget: &mut Budget) -> GraphResult<Control>;

    /// Serialise volatile state before the session parks.
    fn suspend(&mut self) -> GraphResult<()> {
        Ok(())
    }

    /// Revive after `suspend`.
    fn unsuspend(&mut self) -> GraphResult<()> {
        Ok(())
    }

    /// Release resources. Called exactly once, either on pop or on
    /// request teardown.
    fn free(&mut self) {}
}

/// Shared cancellation flag; one per session.
#[derive(Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Per-request LIFO of contexts plus the free ledger.
pub struct Stack {
    contexts: Vec<Box<dyn StackContext>>,
    cancel: CancelFlag,
    /// Budget granted to each run slice.
    slice_budget: i64,
    suspended: bool,
}

impl Stack {
    pub fn new(cancel: CancelFlag, slice_budget: i64) -> Stack {
        Stack {
            contexts: Vec::new(),
            cancel,
            slice_budget,
            suspended: false,
        }
    }

    pub fn push(&mut self, context: Box<dyn StackContext>) {
        self.contexts.push(context);
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.contexts.len()
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Remove a context anywhere in the stack, running its `free`.
    pub fn remove(&mut self, index: usize) -> bool {
        if index >= self.contexts.len() {
            return false;
        }
        let mut context = self.contexts.remove(index);
        context.free();
        true
    }

    /// Run the top context until the stack is empty or the deadline
    /// arrives. `Progress::Suspend` means "more to do, call again".
    pub fn run_until_deadline(&mut self, deadline: Instant) -> GraphResult<Progress> {
        if self.suspended {
            for context in &mut self.contexts {
                context.unsuspend()?;
            }
            self.suspended = false;
        }
        // One budget per slice; a Yield hands the remainder back.
        let mut budget = Budget::new(self.slice_budget);
        loop {
            if self.contexts.is_empty() {
                return Ok(Progress::Done);
            }
            if self.cancel.is_cancelled() {
                self.teardown();
                return Ok(Progress::Done);
            }
            if Instant::now() >= deadline {
                self.park()?;
                return Ok(Progress::Suspend);
            }

            let top = self.contexts.len() - 1;
            let control = match self.contexts[top].run(&mut budget) {
                Ok(control) => control,
                Err(e) => {
                    // An erroring request tears down its whole stack;
                    // free still runs once per context.
                    tracing::debug!(context = self.contexts[top].name(), error = %e,
                        "stack context failed");
                    self.teardown();
                    return Err(e);
                }
            };
            match control {
                Control::Continue => {}
                Control::Yield => {
                    self.park()?;
                    return Ok(Progress::Suspend);
                }
                Control::Push(child) => self.contexts.push(child),
                Control::Pop => {
                    if let Some(mut done) = self.contexts.pop() {
                        done.free();
                    }
                }
            }
        }
    }

    fn park(&mut self) -> GraphResult<()> {
        for context in &mut self.contexts {
            context.suspend()?;
        }
        self.suspended = true;
        Ok(())
    }

    /// Abnormal teardown: free every remaining context, top first.
    pub fn teardown(&mut self) {
        while let Some(mut context) = self.contexts.pop() {
            context.free();
        }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.teardown();
    }
}
