//! Lifetime of multi-step GATT operations
//!
//! A procedure that chains several requests shares one [`Operation`] between
//! the response callbacks it has in flight; every clone is one outstanding
//! reference. The final callback runs when the last clone is dropped, exactly
//! once, and only if the operation was finished or failed with no nested
//! request left unanswered. An operation whose requests were cancelled goes
//! away silently.
use super::error::{GattError, GattResult};
use crate::att::TransactionId;
use log::debug;
use std::cell::RefCell;
use std::rc::Rc;

/// Terminal result of a GATT operation.
///
/// Partial results are always delivered alongside an error.
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    pub error: Option<GattError>,
    pub value: T,
}

impl<T> Outcome<T> {
    pub fn ok(value: T) -> Self {
        Self { error: None, value }
    }

    pub fn failed(error: GattError, value: T) -> Self {
        Self {
            error: Some(error),
            value,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Convert to a `Result`, discarding partial results on error
    pub fn into_result(self) -> GattResult<T> {
        match self.error {
            None => Ok(self.value),
            Some(err) => Err(err),
        }
    }
}

/// Final callback of an operation
pub type Completion<T> = Box<dyn FnOnce(Outcome<T>)>;

struct State<T: Default> {
    value: T,
    error: Option<GattError>,
    finished: bool,
    /// Nested requests whose callbacks have not run yet
    awaiting: usize,
    group: Option<TransactionId>,
    done: Option<Completion<T>>,
}

impl<T: Default> Drop for State<T> {
    fn drop(&mut self) {
        let Some(done) = self.done.take() else {
            return;
        };
        if !self.finished || self.awaiting > 0 {
            debug!("GATT operation released before completion");
            return;
        }
        done(Outcome {
            error: self.error.take(),
            value: std::mem::take(&mut self.value),
        });
    }
}

/// Shared context of one in-flight operation
pub(crate) struct Operation<T: Default> {
    state: Rc<RefCell<State<T>>>,
}

impl<T: Default> Clone for Operation<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: Default + 'static> Operation<T> {
    pub(crate) fn new(value: T, done: impl FnOnce(Outcome<T>) + 'static) -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                value,
                error: None,
                finished: false,
                awaiting: 0,
                group: None,
                done: Some(Box::new(done)),
            })),
        }
    }
}

impl<T: Default> Operation<T> {
    /// Mark the operation complete
    pub(crate) fn finish(&self) {
        self.state.borrow_mut().finished = true;
    }

    /// Mark the operation failed; the first error wins
    pub(crate) fn fail(&self, err: GattError) {
        let mut state = self.state.borrow_mut();
        if state.error.is_none() {
            debug!("GATT operation failed: {}", err);
            state.error = Some(err);
        }
        state.finished = true;
    }

    /// Track a nested request sent alongside the main sequence.
    ///
    /// Until a matching [`Operation::release`], a finished operation is
    /// still incomplete, and it completes silently if the request's
    /// callback is dropped unanswered.
    pub(crate) fn hold(&self) {
        self.state.borrow_mut().awaiting += 1;
    }

    pub(crate) fn release(&self) {
        let mut state = self.state.borrow_mut();
        state.awaiting = state.awaiting.saturating_sub(1);
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state.borrow().finished
    }

    /// Access the accumulated value
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.state.borrow_mut().value)
    }

    /// Group id shared by every request of this operation
    pub(crate) fn group(&self) -> Option<TransactionId> {
        self.state.borrow().group
    }

    pub(crate) fn set_group(&self, group: TransactionId) {
        self.state.borrow_mut().group = Some(group);
    }

    /// Drop the final callback without invoking it.
    ///
    /// Used when the first request fails locally and the error is returned
    /// to the caller directly instead.
    pub(crate) fn disarm(&self) {
        self.state.borrow_mut().done = None;
    }

    /// Record the group of the first request, or disarm if it failed.
    pub(crate) fn started<E>(&self, first: Result<TransactionId, E>) -> GattResult<TransactionId>
    where
        GattError: From<E>,
    {
        match first {
            Ok(group) => {
                self.set_group(group);
                Ok(group)
            }
            Err(err) => {
                self.disarm();
                Err(err.into())
            }
        }
    }
}
