//! Origin documents a transaction pays for.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use super::transaction::{CapturePolicy, Transaction};
use super::UnknownVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginKind {
    SaleOrder,
    Invoice,
}

impl OriginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginKind::SaleOrder => "sale_order",
            OriginKind::Invoice => "invoice",
        }
    }
}

impl FromStr for OriginKind {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sale_order" => Ok(OriginKind::SaleOrder),
            "invoice" => Ok(OriginKind::Invoice),
            other => Err(UnknownVariant::new("origin kind", other)),
        }
    }
}

/// Polymorphic reference to exactly one origin document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OriginRef {
    pub kind: OriginKind,
    pub id: String,
}

impl OriginRef {
    pub fn new(kind: OriginKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for OriginRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.kind.as_str(), self.id)
    }
}

/// Capability every payable document type implements.
///
/// The transaction service never branches on the concrete document type.
pub trait OriginAdapter: Send + Sync {
    fn reference(&self) -> OriginRef;

    fn display_name(&self) -> String;

    /// Amount still to be collected, in the document currency.
    fn amount_due(&self) -> BigDecimal;

    fn currency(&self) -> &str;

    fn partner_email(&self) -> Option<&str>;

    fn capture_policy(&self) -> CapturePolicy {
        CapturePolicy::Immediate
    }

    /// Called once a transaction of this document has been captured.
    fn on_captured(&self, transaction: &Transaction);
}

/// Sale order: due amount is the order total minus what was already collected.
#[derive(Debug)]
pub struct SaleOrder {
    pub name: String,
    pub currency: String,
    pub partner_email: Option<String>,
    pub amount_total: BigDecimal,
    pub capture_policy: CapturePolicy,
    amount_paid: Mutex<BigDecimal>,
}

impl SaleOrder {
    pub fn new(
        name: impl Into<String>,
        amount_total: BigDecimal,
        currency: impl Into<String>,
        partner_email: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            currency: currency.into(),
            partner_email,
            amount_total,
            capture_policy: CapturePolicy::Immediate,
            amount_paid: Mutex::new(BigDecimal::from(0)),
        }
    }

    pub fn amount_paid(&self) -> BigDecimal {
        self.amount_paid
            .lock()
            .map(|paid| paid.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl OriginAdapter for SaleOrder {
    fn reference(&self) -> OriginRef {
        OriginRef::new(OriginKind::SaleOrder, self.name.clone())
    }

    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn amount_due(&self) -> BigDecimal {
        &self.amount_total - self.amount_paid()
    }

    fn currency(&self) -> &str {
        &self.currency
    }

    fn partner_email(&self) -> Option<&str> {
        self.partner_email.as_deref()
    }

    fn capture_policy(&self) -> CapturePolicy {
        self.capture_policy
    }

    fn on_captured(&self, transaction: &Transaction) {
        let mut paid = self
            .amount_paid
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *paid = &*paid + &transaction.amount;
    }
}

/// Customer invoice: due amount is the open residual.
#[derive(Debug)]
pub struct Invoice {
    pub number: String,
    pub currency: String,
    pub partner_email: Option<String>,
    residual: Mutex<BigDecimal>,
}

impl Invoice {
    pub fn new(
        number: impl Into<String>,
        residual: BigDecimal,
        currency: impl Into<String>,
        partner_email: Option<String>,
    ) -> Self {
        Self {
            number: number.into(),
            currency: currency.into(),
            partner_email,
            residual: Mutex::new(residual),
        }
    }
}

impl OriginAdapter for Invoice {
    fn reference(&self) -> OriginRef {
        OriginRef::new(OriginKind::Invoice, self.number.clone())
    }

    fn display_name(&self) -> String {
        self.number.clone()
    }

    fn amount_due(&self) -> BigDecimal {
        self.residual
            .lock()
            .map(|residual| residual.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn currency(&self) -> &str {
        &self.currency
    }

    fn partner_email(&self) -> Option<&str> {
        self.partner_email.as_deref()
    }

    fn on_captured(&self, transaction: &Transaction) {
        let mut residual = self
            .residual
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *residual = &*residual - &transaction.amount;
    }
}
