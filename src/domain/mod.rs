//! Framework-agnostic domain types for gateway transactions.

pub mod money;
pub mod origin;
pub mod transaction;

pub use origin::{Invoice, OriginAdapter, OriginKind, OriginRef, SaleOrder};
pub use transaction::{
    CapturePolicy, FollowUp, NewTransaction, RiskLevel, Transaction, TransactionPatch,
    TransactionState, Transition, TransitionError,
};

use thiserror::Error;

/// Raised when a stored or transmitted enum label is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}
