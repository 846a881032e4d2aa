//! Payment provider abstraction.
//!
//! A provider turns local transactions into calls against one external
//! payment service and maps its answers back onto [`TransactionPatch`]es.
//! Providers never persist anything and hold no state across calls.

pub mod adyen;
pub mod error;
pub mod http;
pub mod paypal;
pub mod registry;
pub mod stripe;

pub use error::{CardErrorCode, ProviderError};
pub use registry::{ProviderContext, ProviderFactory, ProviderRegistry, ProviderSettings};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{CapturePolicy, Transaction, TransactionPatch, TransactionState};
use crate::error::GatewayError;
use crate::validation::{validate_params, FieldSpec, ValidationError};

/// Caller-supplied payment details forwarded to the provider at creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentParams {
    /// Card source, encrypted card blob, or other provider payment token.
    pub payment_token: Option<String>,
    /// Where the provider sends the customer's browser back to.
    pub return_url: Option<String>,
    pub cancel_url: Option<String>,
    pub shopper_ip: Option<String>,
    pub browser_info: Option<Value>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl PaymentParams {
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }
}

/// Provider-native payload returned by a creation call.
pub type ProviderResult = Value;

/// A webhook entry point and the parameters it accepts.
#[derive(Debug, Clone, Copy)]
pub struct WebhookMethod {
    pub name: &'static str,
    pub schema: &'static [FieldSpec],
}

/// Change a webhook asks for on the transaction known by `external_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookUpdate {
    pub external_id: String,
    pub patch: TransactionPatch,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookOutcome {
    pub updates: Vec<WebhookUpdate>,
}

impl WebhookOutcome {
    pub fn single(external_id: impl Into<String>, patch: TransactionPatch) -> Self {
        Self {
            updates: vec![WebhookUpdate {
                external_id: external_id.into(),
                patch,
            }],
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    fn supported_capture_policies(&self) -> &'static [CapturePolicy] {
        &[CapturePolicy::Immediate]
    }

    fn webhook_methods(&self) -> &'static [WebhookMethod] {
        &[]
    }

    /// Opens a payment attempt for `draft`. Must not touch local state.
    async fn create_transaction(
        &self,
        draft: &Transaction,
        params: &PaymentParams,
    ) -> Result<ProviderResult, ProviderError>;

    /// Pure mapping of the creation payload onto transaction fields.
    fn parse_creation_result(
        &self,
        result: &ProviderResult,
        params: &PaymentParams,
    ) -> Result<TransactionPatch, ProviderError>;

    /// Collects the authorized funds. The patch state is `succeeded` or `failed`.
    async fn capture(&self, tx: &Transaction) -> Result<TransactionPatch, ProviderError>;

    async fn poll_state(&self, tx: &Transaction) -> Result<TransactionState, ProviderError>;

    /// Runs a webhook method on parameters already validated against its schema.
    async fn handle_webhook(
        &self,
        method: &str,
        params: Value,
    ) -> Result<WebhookOutcome, ProviderError>;

    /// Validates `raw` against the schema of `method` and runs it.
    async fn dispatch_webhook(&self, method: &str, raw: &Value) -> Result<WebhookOutcome, GatewayError> {
        let declared = self
            .webhook_methods()
            .iter()
            .find(|candidate| candidate.name == method)
            .ok_or_else(|| GatewayError::MethodNotAllowed {
                provider: self.name().to_string(),
                method: method.to_string(),
            })?;

        let params = validate_params(declared.schema, raw)?;

        self.handle_webhook(method, params)
            .await
            .map_err(|err| match err {
                ProviderError::InvalidPayload(message) => {
                    GatewayError::Validation(ValidationError::new("params", message))
                }
                ProviderError::InvalidSignature => GatewayError::Validation(
                    ValidationError::new("signature", "does not match the payload"),
                ),
                other => GatewayError::Provider(other),
            })
    }
}
