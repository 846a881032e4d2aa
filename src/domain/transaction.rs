//! Gateway transaction entity.
//! One payment attempt against one origin document, driven through a closed
//! state machine.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::origin::OriginRef;
use super::UnknownVariant;

/// Lifecycle state of a transaction.
///
/// `Draft` only exists locally. `Pending` waits on the customer or the provider,
/// `ToCapture` is authorized and ready to collect. The last four are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Draft,
    Pending,
    ToCapture,
    Cancel,
    Failed,
    Abandoned,
    Succeeded,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Draft => "draft",
            TransactionState::Pending => "pending",
            TransactionState::ToCapture => "to_capture",
            TransactionState::Cancel => "cancel",
            TransactionState::Failed => "failed",
            TransactionState::Abandoned => "abandoned",
            TransactionState::Succeeded => "succeeded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Cancel
                | TransactionState::Failed
                | TransactionState::Abandoned
                | TransactionState::Succeeded
        )
    }

    /// Whether `self -> next` is an edge of the state machine.
    ///
    /// Same-state writes are not transitions and always return false here.
    pub fn can_transition_to(&self, next: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (*self, next),
            (Draft, Pending | ToCapture | Failed | Cancel)
                | (Pending, ToCapture | Failed | Cancel | Abandoned)
                | (ToCapture, Succeeded | Failed | Cancel)
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionState {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "draft" => Ok(TransactionState::Draft),
            "pending" => Ok(TransactionState::Pending),
            "to_capture" => Ok(TransactionState::ToCapture),
            "cancel" => Ok(TransactionState::Cancel),
            "failed" => Ok(TransactionState::Failed),
            "abandoned" => Ok(TransactionState::Abandoned),
            "succeeded" => Ok(TransactionState::Succeeded),
            other => Err(UnknownVariant::new("transaction state", other)),
        }
    }
}

/// When the authorized funds are collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePolicy {
    #[default]
    Immediate,
    OnOrderConfirm,
    OnFulfillment,
}

impl CapturePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapturePolicy::Immediate => "immediate",
            CapturePolicy::OnOrderConfirm => "on_order_confirm",
            CapturePolicy::OnFulfillment => "on_fulfillment",
        }
    }
}

impl fmt::Display for CapturePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapturePolicy {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "immediate" => Ok(CapturePolicy::Immediate),
            "on_order_confirm" => Ok(CapturePolicy::OnOrderConfirm),
            "on_fulfillment" => Ok(CapturePolicy::OnFulfillment),
            other => Err(UnknownVariant::new("capture policy", other)),
        }
    }
}

/// Provider-reported fraud risk. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Unknown,
    Normal,
    Elevated,
    Highest,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Unknown => "unknown",
            RiskLevel::Normal => "normal",
            RiskLevel::Elevated => "elevated",
            RiskLevel::Highest => "highest",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "unknown" => Ok(RiskLevel::Unknown),
            "normal" => Ok(RiskLevel::Normal),
            "elevated" => Ok(RiskLevel::Elevated),
            "highest" => Ok(RiskLevel::Highest),
            other => Err(UnknownVariant::new("risk level", other)),
        }
    }
}

/// Input for a new draft transaction.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub provider_name: String,
    pub name: String,
    pub origin: OriginRef,
    pub partner_email: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub capture_policy: CapturePolicy,
    pub redirect_cancel_url: Option<String>,
    pub redirect_success_url: Option<String>,
}

/// Domain entity representing a gateway transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub name: String,
    pub provider_name: String,
    pub external_id: Option<String>,
    pub capture_policy: CapturePolicy,
    pub origin: OriginRef,
    pub partner_email: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub state: TransactionState,
    pub risk_level: RiskLevel,
    pub redirect_url: Option<String>,
    pub redirect_cancel_url: Option<String>,
    pub redirect_success_url: Option<String>,
    pub raw_provider_data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub used_strong_authentication: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn draft(new: NewTransaction) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: new.name,
            provider_name: new.provider_name,
            external_id: None,
            capture_policy: new.capture_policy,
            origin: new.origin,
            partner_email: new.partner_email,
            amount: new.amount,
            currency: new.currency,
            state: TransactionState::Draft,
            risk_level: RiskLevel::Unknown,
            redirect_url: None,
            redirect_cancel_url: new.redirect_cancel_url,
            redirect_success_url: new.redirect_success_url,
            raw_provider_data: None,
            error: None,
            processed_at: None,
            used_strong_authentication: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a patch, enforcing the state machine.
    ///
    /// Terminal transactions only accept bookkeeping fields (raw payload and
    /// processing date). Returns the transition that happened, if any.
    pub fn apply(&mut self, patch: TransactionPatch) -> Result<Option<Transition>, TransitionError> {
        let from = self.state;
        let target = patch.state.filter(|to| *to != from);

        if let Some(to) = target {
            if !from.can_transition_to(to) {
                return Err(TransitionError { from, to });
            }
        }

        if let Some(raw) = patch.raw_provider_data {
            self.raw_provider_data = Some(raw);
        }
        if let Some(processed_at) = patch.processed_at {
            self.processed_at = Some(processed_at);
        }

        if !from.is_terminal() {
            if let Some(external_id) = patch.external_id {
                self.external_id = Some(external_id);
            }
            if let Some(amount) = patch.amount {
                self.amount = amount;
            }
            if let Some(risk_level) = patch.risk_level {
                self.risk_level = risk_level;
            }
            if let Some(url) = patch.redirect_url {
                self.redirect_url = Some(url);
            }
            if let Some(error) = patch.error {
                self.error = Some(error);
            }
            if let Some(strong) = patch.used_strong_authentication {
                self.used_strong_authentication = strong;
            }
        }

        if let Some(to) = target {
            self.state = to;
        }
        self.updated_at = Utc::now();

        Ok(target.map(|to| Transition { from, to }))
    }
}

/// Partial update produced by providers and by the service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionPatch {
    pub state: Option<TransactionState>,
    pub external_id: Option<String>,
    pub amount: Option<BigDecimal>,
    pub risk_level: Option<RiskLevel>,
    pub redirect_url: Option<String>,
    pub raw_provider_data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub used_strong_authentication: Option<bool>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl TransactionPatch {
    pub fn state(state: TransactionState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// A `failed` patch carrying the error message, stamped now.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            state: Some(TransactionState::Failed),
            error: Some(message.into()),
            processed_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw_provider_data = Some(raw);
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn processed_now(mut self) -> Self {
        self.processed_at = Some(Utc::now());
        self
    }
}

/// A state change that actually happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: TransactionState,
    pub to: TransactionState,
}

/// Work that must run, within the same operation, after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    Capture,
}

impl Transition {
    /// Reaching `to_capture` under the immediate policy triggers a capture.
    pub fn follow_up(&self, policy: CapturePolicy) -> Option<FollowUp> {
        (self.to == TransactionState::ToCapture && policy == CapturePolicy::Immediate)
            .then_some(FollowUp::Capture)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition from {from} to {to}")]
pub struct TransitionError {
    pub from: TransactionState,
    pub to: TransactionState,
}
