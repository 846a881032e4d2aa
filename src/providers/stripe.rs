//! Stripe card payments through the sources and charges API.
//!
//! Card sources that support 3-D Secure get a `three_d_secure` source and a
//! browser redirect; everything else is charged directly. Charges are always
//! authorized first and captured by [`Provider::capture`].

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::str::FromStr;
use tracing::debug;

use super::http::{self, str_at};
use super::{
    CardErrorCode, PaymentParams, Provider, ProviderContext, ProviderError, ProviderResult,
    WebhookMethod, WebhookOutcome,
};
use crate::domain::money::{from_minor_units, to_minor_units};
use crate::domain::{RiskLevel, Transaction, TransactionPatch, TransactionState};
use crate::validation::{FieldKind, FieldSpec};

const WEBHOOK_METHODS: &[WebhookMethod] = &[WebhookMethod {
    name: "process_event",
    schema: &[
        FieldSpec::required("data.object.id", FieldKind::String),
        FieldSpec::optional("type", FieldKind::String),
        FieldSpec::optional("id", FieldKind::String),
    ],
}];

pub struct StripeProvider {
    client: Client,
    api_base: String,
    api_key: String,
}

impl StripeProvider {
    pub const NAME: &'static str = "stripe";

    pub fn new(ctx: ProviderContext, api_base: String) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http::client(ctx.timeout)?,
            api_base,
            api_key: ctx.credential.secret().to_string(),
        })
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, ProviderError> {
        let response = request.bearer_auth(&self.api_key).send().await?;
        let (status, body) = http::read_json(response).await?;

        if (200..300).contains(&status) {
            return Ok(body);
        }

        let error = body.get("error").cloned().unwrap_or(Value::Null);
        let is_card_error = status == 402
            || error.get("type").and_then(Value::as_str) == Some("card_error");

        if is_card_error {
            let code = error
                .get("code")
                .and_then(Value::as_str)
                .and_then(CardErrorCode::from_stripe)
                .unwrap_or(CardErrorCode::CardDeclined);
            return Err(ProviderError::Card(code));
        }
        if status == 401 {
            return Err(ProviderError::Unauthorized);
        }

        Err(ProviderError::Api {
            status,
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        })
    }

    async fn get(&self, path: &str) -> Result<Value, ProviderError> {
        self.send(self.client.get(http::url(&self.api_base, path)))
            .await
    }

    async fn post(&self, path: &str, form: &[(&str, String)]) -> Result<Value, ProviderError> {
        self.send(self.client.post(http::url(&self.api_base, path)).form(form))
            .await
    }

    async fn retrieve(&self, object_id: &str) -> Result<Value, ProviderError> {
        if object_id.starts_with("ch_") {
            self.get(&format!("/v1/charges/{}", object_id)).await
        } else if object_id.starts_with("src_") {
            self.get(&format!("/v1/sources/{}", object_id)).await
        } else {
            Err(ProviderError::InvalidPayload(format!(
                "unsupported Stripe object '{}'",
                object_id
            )))
        }
    }
}

fn minor_amount(tx: &Transaction) -> Result<String, ProviderError> {
    to_minor_units(&tx.amount, &tx.currency)
        .map(|minor| minor.to_string())
        .ok_or(ProviderError::Card(CardErrorCode::InvalidAmount))
}

/// Canonical state of a Stripe source or charge.
pub fn map_status(object: &Value) -> Result<TransactionState, ProviderError> {
    let status = str_at(object, "/status")?;
    let is_charge = object.get("object").and_then(Value::as_str) == Some("charge");

    Ok(match status {
        "succeeded" if is_charge => {
            if object.get("captured").and_then(Value::as_bool).unwrap_or(false) {
                TransactionState::Succeeded
            } else {
                TransactionState::ToCapture
            }
        }
        "canceled" => TransactionState::Cancel,
        "chargeable" => TransactionState::ToCapture,
        "consumed" | "succeeded" => TransactionState::Succeeded,
        "failed" => TransactionState::Failed,
        "pending" => TransactionState::Pending,
        other => {
            return Err(ProviderError::InvalidResponse(format!(
                "unknown Stripe status '{}'",
                other
            )))
        }
    })
}

fn risk_level(object: &Value) -> Option<RiskLevel> {
    object
        .pointer("/outcome/risk_level")
        .and_then(Value::as_str)
        .and_then(|level| RiskLevel::from_str(level).ok())
}

fn failure_message(object: &Value) -> Option<String> {
    object
        .get("failure_code")
        .and_then(Value::as_str)
        .map(|code| {
            CardErrorCode::from_stripe(code)
                .unwrap_or(CardErrorCode::CardDeclined)
                .message()
                .to_string()
        })
}

/// Id the transaction behind `object` is stored under.
///
/// Capturing a 3-D Secure source creates a new charge; events for that charge
/// belong to the transaction of the source.
fn tracked_id<'a>(object_id: &'a str, object: &'a Value) -> &'a str {
    let is_charge = object.get("object").and_then(Value::as_str) == Some("charge");
    let from_secure_source =
        object.pointer("/source/type").and_then(Value::as_str) == Some("three_d_secure");
    match object.pointer("/source/id").and_then(Value::as_str) {
        Some(source) if is_charge && from_secure_source => source,
        _ => object_id,
    }
}

/// Patch describing the current status of a source or charge, without its id.
fn status_patch(object: &Value) -> Result<TransactionPatch, ProviderError> {
    let state = map_status(object)?;
    let mut patch = TransactionPatch::state(state)
        .with_raw(object.clone())
        .processed_now();
    patch.risk_level = risk_level(object);
    if state == TransactionState::Failed {
        patch.error = failure_message(object);
    }
    Ok(patch)
}

#[async_trait]
impl Provider for StripeProvider {
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
        let source = params
            .payment_token
            .as_deref()
            .ok_or(ProviderError::Card(CardErrorCode::Missing))?;
        let amount = minor_amount(draft)?;
        let currency = draft.currency.to_ascii_lowercase();

        let source_data = self.get(&format!("/v1/sources/{}", source)).await?;
        let supports_3ds = source_data
            .pointer("/card/three_d_secure")
            .and_then(Value::as_str)
            .is_some_and(|support| support != "not_supported");

        if let (true, Some(return_url)) = (supports_3ds, params.return_url.as_deref()) {
            let secure = self
                .post(
                    "/v1/sources",
                    &[
                        ("type", "three_d_secure".to_string()),
                        ("amount", amount.clone()),
                        ("currency", currency.clone()),
                        ("three_d_secure[card]", source.to_string()),
                        ("redirect[return_url]", return_url.to_string()),
                    ],
                )
                .await?;

            if secure.get("status").and_then(Value::as_str) != Some("chargeable") {
                return Ok(secure);
            }
            debug!(source = %source, "3-D Secure not required, charging directly");
        }

        let description = format!(
            "{}|{}",
            draft.name,
            draft.partner_email.as_deref().unwrap_or_default()
        );
        self.post(
            "/v1/charges",
            &[
                ("amount", amount),
                ("currency", currency),
                ("source", source.to_string()),
                ("description", description),
                ("capture", "false".to_string()),
            ],
        )
        .await
    }

    fn parse_creation_result(
        &self,
        result: &ProviderResult,
        _params: &PaymentParams,
    ) -> Result<TransactionPatch, ProviderError> {
        let external_id = str_at(result, "/id")?;
        let currency = str_at(result, "/currency")?.to_ascii_uppercase();
        let minor = result
            .get("amount")
            .and_then(Value::as_i64)
            .ok_or_else(|| ProviderError::InvalidResponse("missing field /amount".to_string()))?;

        let mut patch = status_patch(result)?.with_external_id(external_id);
        patch.amount = Some(from_minor_units(minor, &currency));
        patch.redirect_url = result
            .pointer("/redirect/url")
            .and_then(Value::as_str)
            .map(str::to_string);
        patch.used_strong_authentication =
            Some(result.get("type").and_then(Value::as_str) == Some("three_d_secure"));
        Ok(patch)
    }

    async fn capture(&self, tx: &Transaction) -> Result<TransactionPatch, ProviderError> {
        let external_id = tx.external_id.as_deref().ok_or_else(|| {
            ProviderError::InvalidResponse("transaction has no Stripe reference".to_string())
        })?;

        let charge = if external_id.starts_with("src_") {
            self.post(
                "/v1/charges",
                &[
                    ("amount", minor_amount(tx)?),
                    ("currency", tx.currency.to_ascii_lowercase()),
                    ("source", external_id.to_string()),
                    ("description", tx.name.clone()),
                    ("capture", "true".to_string()),
                ],
            )
            .await?
        } else if external_id.starts_with("ch_") {
            self.post(
                &format!("/v1/charges/{}/capture", external_id),
                &[("amount", minor_amount(tx)?)],
            )
            .await?
        } else {
            return Err(ProviderError::InvalidResponse(format!(
                "cannot capture Stripe object '{}'",
                external_id
            )));
        };

        status_patch(&charge)
    }

    async fn poll_state(&self, tx: &Transaction) -> Result<TransactionState, ProviderError> {
        let external_id = tx.external_id.as_deref().ok_or_else(|| {
            ProviderError::InvalidResponse("transaction has no Stripe reference".to_string())
        })?;
        map_status(&self.retrieve(external_id).await?)
    }

    async fn handle_webhook(
        &self,
        method: &str,
        params: Value,
    ) -> Result<WebhookOutcome, ProviderError> {
        match method {
            "process_event" => {
                // The event body is not signed here; the object is re-read from the API.
                let object_id = str_at(&params, "/data/object/id")?;
                let object = self.retrieve(object_id).await?;
                let patch = status_patch(&object)?;
                Ok(WebhookOutcome::single(tracked_id(object_id, &object), patch))
            }
            other => Err(ProviderError::InvalidPayload(format!(
                "unhandled method '{}'",
                other
            ))),
        }
    }
}
