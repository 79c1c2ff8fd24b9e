use crate::store::StoreError;
use keel_types::ErrorOutcome;
use serde::{Deserialize, Serialize};
use anyhow::anyhow;
use std::{cell::RefCell, collections::BTreeSet, fmt};
use thiserror::Error;

/// Failure returned by a module handler.
#[derive(Debug, Error)]
pub enum CallError {
    /// Business-rule violation. Reverts the transaction unless the policy escalates it.
    #[error("rejected: {0}")]
    Rejected(ErrorOutcome),
    /// Integrity failure. Always halts the runtime.
    #[error("fatal: {0:#}")]
    Fatal(#[from] anyhow::Error),
}

impl CallError {
    pub fn rejected(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected(ErrorOutcome::new(kind, message))
    }

    pub fn outcome(&self) -> Option<&ErrorOutcome> {
        match self {
            Self::Rejected(outcome) => Some(outcome),
            Self::Fatal(_) => None,
        }
    }

    pub fn into_anyhow(self) -> anyhow::Error {
        match self {
            Self::Rejected(outcome) => anyhow::Error::new(outcome),
            Self::Fatal(error) => error,
        }
    }
}

impl From<ErrorOutcome> for CallError {
    fn from(outcome: ErrorOutcome) -> Self {
        Self::Rejected(outcome)
    }
}

impl From<StoreError> for CallError {
    fn from(error: StoreError) -> Self {
        Self::Fatal(anyhow::Error::new(error))
    }
}

/// First integrity failure seen while a call was running.
///
/// Every [Context](crate::Context) of a call, nested ones included, records into the same
/// latch. The runtime halts when the latch is set, whatever the handler returned.
#[derive(Debug, Default)]
pub(crate) struct Fault(RefCell<Option<anyhow::Error>>);

impl Fault {
    /// Keep `error` unless an earlier failure was already recorded.
    pub(crate) fn record(&self, error: impl fmt::Display) {
        let mut slot = self.0.borrow_mut();
        if slot.is_none() {
            *slot = Some(anyhow!("{error:#}"));
        }
    }

    pub(crate) fn take(&self) -> Option<anyhow::Error> {
        self.0.borrow_mut().take()
    }

    /// Fold a latched failure into the handler's result. A fatal result is kept as is
    /// since it carries the full error chain.
    pub(crate) fn settle(&self, result: Result<(), CallError>) -> Result<(), CallError> {
        match (self.take(), result) {
            (Some(_), Err(CallError::Fatal(error))) => Err(CallError::Fatal(error)),
            (Some(fault), _) => Err(CallError::Fatal(fault)),
            (None, result) => result,
        }
    }
}

/// How the runtime reacts to a [CallError].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Discard the transaction's changes and record a reverted receipt.
    Revert,
    /// Discard the transaction's changes and stop processing.
    Halt,
}

/// Classification of handler errors.
///
/// [CallError::Fatal] always halts. A [CallError::Rejected] outcome reverts, unless its
/// kind is listed in `halt_on`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ErrorPolicy {
    pub halt_on: BTreeSet<String>,
}

impl ErrorPolicy {
    pub fn halting(kinds: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            halt_on: kinds.into_iter().map(Into::into).collect(),
        }
    }

    pub fn classify(&self, error: &CallError) -> Severity {
        match error {
            CallError::Rejected(outcome) if !self.halt_on.contains(outcome.kind()) => {
                Severity::Revert
            }
            _ => Severity::Halt,
        }
    }
}
