//! Adyen classic payment API with client-side encrypted cards.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, warn};

use super::http::{self, str_at};
use super::{
    CardErrorCode, PaymentParams, Provider, ProviderContext, ProviderError, ProviderResult,
    WebhookMethod, WebhookOutcome, WebhookUpdate,
};
use crate::domain::money::to_minor_units;
use crate::domain::{Transaction, TransactionPatch, TransactionState};
use crate::keychain::Credential;
use crate::validation::{FieldKind, FieldSpec};

type HmacSha256 = Hmac<Sha256>;

const WEBHOOK_METHODS: &[WebhookMethod] = &[
    WebhookMethod {
        name: "process_return",
        schema: &[
            FieldSpec::required("MD", FieldKind::String),
            FieldSpec::required("PaRes", FieldKind::String),
        ],
    },
    WebhookMethod {
        name: "process_notification",
        schema: &[
            FieldSpec::required("notificationItems", FieldKind::Array),
            FieldSpec::optional("live", FieldKind::String),
        ],
    },
];

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/115.0";
const DEFAULT_ACCEPT_HEADER: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

pub struct AdyenProvider {
    client: Client,
    api_base: String,
    username: String,
    password: String,
    merchant_account: String,
    hmac_key: Option<String>,
}

impl AdyenProvider {
    pub const NAME: &'static str = "adyen";

    pub fn new(ctx: ProviderContext, api_base: String) -> Result<Self, ProviderError> {
        let credential: &Credential = &ctx.credential;
        Ok(Self {
            client: http::client(ctx.timeout)?,
            api_base,
            username: credential.require("username")?.to_string(),
            password: credential.secret().to_string(),
            merchant_account: credential.require("merchant_account")?.to_string(),
            hmac_key: credential.data("hmac_key").map(str::to_string),
        })
    }

    async fn call(&self, endpoint: &str, body: &Value) -> Result<Value, ProviderError> {
        let response = self
            .client
            .post(http::url(&self.api_base, endpoint))
            .basic_auth(&self.username, Some(&self.password))
            .json(body)
            .send()
            .await?;
        let (status, body) = http::read_json(response).await?;

        match status {
            200..=299 => Ok(body),
            401 | 403 => Err(ProviderError::Unauthorized),
            422 => {
                let code = body
                    .get("errorCode")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Err(ProviderError::Card(CardErrorCode::from_adyen(code)))
            }
            _ => Err(ProviderError::Api {
                status,
                message: body
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            }),
        }
    }

    fn formatted_amount(tx: &Transaction) -> Result<i64, ProviderError> {
        to_minor_units(&tx.amount, &tx.currency).ok_or(ProviderError::Card(CardErrorCode::InvalidAmount))
    }

    fn verify_item(&self, item: &Value) -> Result<(), ProviderError> {
        let key = self
            .hmac_key
            .as_deref()
            .ok_or(ProviderError::MissingCredential("hmac_key"))?;
        let key = hex::decode(key).map_err(|_| ProviderError::MissingCredential("hmac_key"))?;

        let signature = item
            .pointer("/additionalData/hmacSignature")
            .and_then(Value::as_str)
            .ok_or(ProviderError::InvalidSignature)?;
        let signature = STANDARD
            .decode(signature)
            .map_err(|_| ProviderError::InvalidSignature)?;

        let mut mac =
            HmacSha256::new_from_slice(&key).map_err(|_| ProviderError::MissingCredential("hmac_key"))?;
        mac.update(signing_string(item).as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| ProviderError::InvalidSignature)
    }

    async fn process_return(&self, params: &Value) -> Result<WebhookOutcome, ProviderError> {
        let payload = json!({
            "merchantAccount": self.merchant_account,
            "md": str_at(params, "/MD")?,
            "paResponse": str_at(params, "/PaRes")?,
            "browserInfo": default_browser_info(),
        });
        let result = self.call("/authorise3d", &payload).await?;
        let psp_reference = str_at(&result, "/pspReference")?.to_string();

        let mut patch = TransactionPatch::state(map_result_code(str_at(&result, "/resultCode")?)?)
            .with_raw(result.clone())
            .processed_now();
        if patch.state == Some(TransactionState::Failed) {
            patch.error = Some(refusal_message(&result));
        }
        Ok(WebhookOutcome::single(psp_reference, patch))
    }

    fn process_notification(&self, params: &Value) -> Result<WebhookOutcome, ProviderError> {
        let items = params
            .get("notificationItems")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::InvalidPayload("notificationItems".to_string()))?;

        let mut outcome = WebhookOutcome::default();
        for wrapper in items {
            let item = wrapper.get("NotificationRequestItem").unwrap_or(wrapper);
            self.verify_item(item)?;
            if let Some(update) = notification_update(item)? {
                outcome.updates.push(update);
            }
        }
        Ok(outcome)
    }
}

fn default_browser_info() -> Value {
    json!({
        "userAgent": DEFAULT_USER_AGENT,
        "acceptHeader": DEFAULT_ACCEPT_HEADER,
    })
}

/// Canonical state of an Adyen result code or modification response.
pub fn map_result_code(code: &str) -> Result<TransactionState, ProviderError> {
    Ok(match code {
        "Authorised" => TransactionState::ToCapture,
        "RedirectShopper" => TransactionState::Pending,
        "Refused" | "Error" => TransactionState::Failed,
        "Cancelled" | "[cancel-received]" => TransactionState::Cancel,
        "[capture-received]" => TransactionState::Succeeded,
        other => {
            return Err(ProviderError::InvalidResponse(format!(
                "unknown Adyen result code '{}'",
                other
            )))
        }
    })
}

fn refusal_message(result: &Value) -> String {
    let reason = result
        .get("refusalReason")
        .and_then(Value::as_str)
        .unwrap_or_default();
    CardErrorCode::from_adyen(reason).message().to_string()
}

fn item_str<'a>(item: &'a Value, key: &str) -> &'a str {
    item.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// `pspReference:originalReference:merchantAccountCode:merchantReference:value:currency:eventCode:success`
fn signing_string(item: &Value) -> String {
    let value = item
        .pointer("/amount/value")
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default();
    [
        item_str(item, "pspReference"),
        item_str(item, "originalReference"),
        item_str(item, "merchantAccountCode"),
        item_str(item, "merchantReference"),
        value.as_str(),
        item.pointer("/amount/currency")
            .and_then(Value::as_str)
            .unwrap_or_default(),
        item_str(item, "eventCode"),
        item_str(item, "success"),
    ]
    .join(":")
}

fn notification_update(item: &Value) -> Result<Option<WebhookUpdate>, ProviderError> {
    let success = item_str(item, "success") == "true";
    let event = item_str(item, "eventCode");

    let (reference, state) = match (event, success) {
        ("AUTHORISATION", true) => ("pspReference", TransactionState::ToCapture),
        ("AUTHORISATION", false) => ("pspReference", TransactionState::Failed),
        ("CAPTURE", true) => ("originalReference", TransactionState::Succeeded),
        ("CAPTURE", false) => ("originalReference", TransactionState::Failed),
        ("CANCELLATION", true) => ("originalReference", TransactionState::Cancel),
        _ => {
            debug!(event = %event, success, "ignoring Adyen notification");
            return Ok(None);
        }
    };

    let external_id = item_str(item, reference);
    if external_id.is_empty() {
        return Err(ProviderError::InvalidPayload(format!(
            "{} notification without {}",
            event, reference
        )));
    }

    let mut patch = TransactionPatch::state(state)
        .with_raw(item.clone())
        .processed_now();
    if state == TransactionState::Failed {
        patch.error = Some(CardErrorCode::from_adyen(item_str(item, "reason")).message().to_string());
    }

    Ok(Some(WebhookUpdate {
        external_id: external_id.to_string(),
        patch,
    }))
}

#[async_trait]
impl Provider for AdyenProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn webhook_methods(&self) -> &'static [WebhookMethod] {
        WEBHOOK_METHODS
    }

    async fn create_transaction(
        &self,
        draft: &Transaction,
        params: &PaymentParams,
    ) -> Result<ProviderResult, ProviderError> {
        let card = params
            .payment_token
            .as_deref()
            .ok_or(ProviderError::Card(CardErrorCode::Missing))?;
        let id = draft.id.to_string();
        let reference = [
            draft.name.as_str(),
            draft.partner_email.as_deref().unwrap_or_default(),
            id.as_str(),
        ]
        .join("|");

        let mut request = json!({
            "merchantAccount": self.merchant_account,
            "amount": {"value": Self::formatted_amount(draft)?, "currency": draft.currency},
            "reference": reference,
            "additionalData": {"card.encrypted.json": card, "executeThreeD": "true"},
            "browserInfo": params.browser_info.clone().unwrap_or_else(default_browser_info),
        });
        if let Some(email) = &draft.partner_email {
            request["shopperEmail"] = json!(email);
        }
        if let Some(ip) = &params.shopper_ip {
            request["shopperIP"] = json!(ip);
        }

        self.call("/authorise", &request).await
    }

    fn parse_creation_result(
        &self,
        result: &ProviderResult,
        _params: &PaymentParams,
    ) -> Result<TransactionPatch, ProviderError> {
        let state = map_result_code(str_at(result, "/resultCode")?)?;
        if state == TransactionState::Failed {
            let reason = result
                .get("refusalReason")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Err(ProviderError::Card(CardErrorCode::from_adyen(reason)));
        }

        let mut patch = TransactionPatch::state(state)
            .with_external_id(str_at(result, "/pspReference")?)
            .with_raw(result.clone())
            .processed_now();
        if state == TransactionState::Pending {
            patch.redirect_url = Some(str_at(result, "/issuerUrl")?.to_string());
            patch.used_strong_authentication = Some(true);
        }
        Ok(patch)
    }

    async fn capture(&self, tx: &Transaction) -> Result<TransactionPatch, ProviderError> {
        let original = tx
            .external_id
            .as_deref()
            .filter(|reference| reference.chars().all(|c| c.is_ascii_digit()))
            .ok_or_else(|| {
                ProviderError::InvalidResponse("transaction has no Adyen psp reference".to_string())
            })?;

        let payload = json!({
            "merchantAccount": self.merchant_account,
            "originalReference": original,
            "modificationAmount": {"value": Self::formatted_amount(tx)?, "currency": tx.currency},
        });
        let result = self.call("/capture", &payload).await?;
        let state = map_result_code(str_at(&result, "/response")?)?;

        Ok(TransactionPatch::state(state)
            .with_raw(result)
            .processed_now())
    }

    async fn poll_state(&self, tx: &Transaction) -> Result<TransactionState, ProviderError> {
        warn!(transaction_id = %tx.id, "Adyen has no status query, keeping current state");
        Ok(tx.state)
    }

    async fn handle_webhook(
        &self,
        method: &str,
        params: Value,
    ) -> Result<WebhookOutcome, ProviderError> {
        match method {
            "process_return" => self.process_return(&params).await,
            "process_notification" => self.process_notification(&params),
            other => Err(ProviderError::InvalidPayload(format!(
                "unhandled method '{}'",
                other
            ))),
        }
    }
}
