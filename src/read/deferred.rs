//! Deferred-value evaluation.
//!
//! A deferred value is a positive answer whose materialisation was
//! postponed: the read-set that proved it is parked behind a reference
//! count. `resume` re-arms that context with `verify = false`,
//! re-pushes it onto a stack, and runs the pipeline to completion:
//! exactly the path an eager evaluation would have taken, just later.
//! Recursive deferral is bounded by the constraint tree depth.

use std::time::{Duration, Instant};

use crate::error::{GraphError, GraphResult, Progress};
use crate::stack::{CancelFlag, Stack};

use super::value::{Deferred, Value};
use super::{ReadConfig, RscContext};

/// Materialise one deferred value.
pub fn resume(deferred: &Deferred) -> GraphResult<Value> {
    let slot = {
        let mut rsc = deferred.rsc.borrow_mut();
        rsc.prepare_resume();
        rsc.outcome_slot()
    };
    slot.replace(None);

    let config = ReadConfig::default();
    let mut stack = Stack::new(CancelFlag::new(), config.slice_budget);
    stack.push(Box::new(RscContext {
        rsc: deferred.rsc.clone(),
    }));
    // Deferred evaluation is always small relative to its parent scan;
    // a generous fixed deadline guards against runaway recursion.
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        match stack.run_until_deadline(deadline)? {
            Progress::Done => break,
            Progress::Suspend => {
                if Instant::now() >= deadline {
                    return Err(GraphError::TooHard);
                }
            }
        }
    }
    let outcome = slot
        .borrow_mut()
        .take()
        .ok_or_else(|| GraphError::Internal("deferred resume produced no outcome".into()))?;
    Ok(Value::List(outcome.rows))
}

/// Evaluate every deferred value under `value`, in place.
pub fn evaluate_value(value: Value) -> GraphResult<Value> {
    Ok(match value {
        Value::Deferred(d) => resume(&d)?,
        Value::List(items) => Value::List(
            items
                .into_iter()
                .map(evaluate_value)
                .collect::<GraphResult<Vec<_>>>()?,
        ),
        other => other,
    })
}
