//! PayPal REST payments with buyer approval redirect.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::str::FromStr;

use super::http::{self, str_at};
use super::{
    PaymentParams, Provider, ProviderContext, ProviderError, ProviderResult, WebhookMethod,
    WebhookOutcome,
};
use crate::domain::money::format_amount;
use crate::domain::{Transaction, TransactionPatch, TransactionState};
use crate::validation::{FieldKind, FieldSpec};

const WEBHOOK_METHODS: &[WebhookMethod] = &[WebhookMethod {
    name: "process_return",
    schema: &[
        FieldSpec::required("paymentId", FieldKind::String),
        FieldSpec::optional("PayerID", FieldKind::String),
        FieldSpec::optional("token", FieldKind::String),
    ],
}];

/// PayPal accepts at most two decimals, with a period separator.
const PAYPAL_DECIMALS: u32 = 2;

pub struct PaypalProvider {
    client: Client,
    api_base: String,
    client_id: String,
    client_secret: String,
    experience_profile_id: Option<String>,
}

impl PaypalProvider {
    pub const NAME: &'static str = "paypal";

    pub fn new(ctx: ProviderContext, api_base: String) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http::client(ctx.timeout)?,
            api_base,
            client_id: ctx.credential.require("client_id")?.to_string(),
            client_secret: ctx.credential.secret().to_string(),
            experience_profile_id: ctx
                .credential
                .data("experience_profile_id")
                .map(str::to_string),
        })
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(http::url(&self.api_base, "/v1/oauth2/token"))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let (status, body) = http::read_json(response).await?;
        if status == 401 {
            return Err(ProviderError::Unauthorized);
        }
        if !(200..300).contains(&status) {
            return Err(api_error(status, &body));
        }
        Ok(str_at(&body, "/access_token")?.to_string())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, ProviderError> {
        let token = self.access_token().await?;
        let response = request.bearer_auth(token).send().await?;
        let (status, body) = http::read_json(response).await?;
        match status {
            200..=299 => Ok(body),
            401 => Err(ProviderError::Unauthorized),
            _ => Err(api_error(status, &body)),
        }
    }

    async fn find_payment(&self, payment_id: &str) -> Result<Value, ProviderError> {
        let path = format!("/v1/payments/payment/{}", payment_id);
        self.send(self.client.get(http::url(&self.api_base, &path)))
            .await
    }
}

fn api_error(status: u16, body: &Value) -> ProviderError {
    let name = body.get("name").and_then(Value::as_str).unwrap_or("ERROR");
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    ProviderError::Api {
        status,
        message: format!("{}: {}", name, message),
    }
}

fn payer_id(payment: &Value) -> Option<&str> {
    payment
        .pointer("/payer/payer_info/payer_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

/// Canonical state of a PayPal payment resource.
pub fn map_payment_state(state: &str) -> Result<TransactionState, ProviderError> {
    Ok(match state {
        "created" => TransactionState::Pending,
        "approved" => TransactionState::Succeeded,
        "failed" => TransactionState::Failed,
        "canceled" => TransactionState::Cancel,
        "expired" => TransactionState::Abandoned,
        other => {
            return Err(ProviderError::InvalidResponse(format!(
                "unknown PayPal payment state '{}'",
                other
            )))
        }
    })
}

#[async_trait]
impl Provider for PaypalProvider {
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
        let return_url = params.return_url.as_deref().ok_or_else(|| {
            ProviderError::InvalidPayload("PayPal payments need a return_url".to_string())
        })?;
        let cancel_url = draft
            .redirect_cancel_url
            .as_deref()
            .or(params.cancel_url.as_deref())
            .unwrap_or(return_url);
        let description = [
            draft.name.clone(),
            draft.partner_email.clone().unwrap_or_default(),
            draft.id.to_string(),
        ]
        .join("|");

        let mut payment = json!({
            "intent": "sale",
            "payer": {"payment_method": "paypal"},
            "redirect_urls": {"return_url": return_url, "cancel_url": cancel_url},
            "transactions": [{
                "amount": {
                    "total": format_amount(&draft.amount, PAYPAL_DECIMALS),
                    "currency": draft.currency,
                },
                "description": description,
            }],
        });
        let profile = params
            .option_str("experience_profile_id")
            .or(self.experience_profile_id.as_deref());
        if let Some(profile) = profile {
            payment["experience_profile_id"] = json!(profile);
        }

        let url = http::url(&self.api_base, "/v1/payments/payment");
        self.send(self.client.post(url).json(&payment)).await
    }

    fn parse_creation_result(
        &self,
        result: &ProviderResult,
        _params: &PaymentParams,
    ) -> Result<TransactionPatch, ProviderError> {
        let redirect = result
            .get("links")
            .and_then(Value::as_array)
            .and_then(|links| {
                links.iter().find(|link| {
                    link.get("method").and_then(Value::as_str) == Some("REDIRECT")
                })
            })
            .and_then(|link| link.get("href"))
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::InvalidResponse("no REDIRECT link".to_string()))?;
        let total = str_at(result, "/transactions/0/amount/total")?;
        let amount = BigDecimal::from_str(total)
            .map_err(|_| ProviderError::InvalidResponse(format!("bad total '{}'", total)))?;

        let mut patch = TransactionPatch::state(TransactionState::Pending)
            .with_external_id(str_at(result, "/id")?)
            .with_raw(result.clone())
            .processed_now();
        patch.amount = Some(amount);
        patch.redirect_url = Some(redirect.to_string());
        Ok(patch)
    }

    async fn capture(&self, tx: &Transaction) -> Result<TransactionPatch, ProviderError> {
        let payment_id = tx.external_id.as_deref().ok_or_else(|| {
            ProviderError::InvalidResponse("transaction has no PayPal payment id".to_string())
        })?;

        let payment = self.find_payment(payment_id).await?;
        let payer = payer_id(&payment)
            .or_else(|| tx.raw_provider_data.as_ref().and_then(payer_id))
            .ok_or_else(|| {
                ProviderError::InvalidResponse("payment has not been approved by a payer".to_string())
            })?
            .to_string();

        let path = format!("/v1/payments/payment/{}/execute", payment_id);
        let result = self
            .send(
                self.client
                    .post(http::url(&self.api_base, &path))
                    .json(&json!({"payer_id": payer})),
            )
            .await?;

        // A successful execute call can still leave the payment unapproved.
        let patch = if result.get("state").and_then(Value::as_str) == Some("approved") {
            TransactionPatch::state(TransactionState::Succeeded).processed_now()
        } else {
            TransactionPatch::failure("Wrong state in result")
        };
        Ok(patch.with_raw(result))
    }

    async fn poll_state(&self, tx: &Transaction) -> Result<TransactionState, ProviderError> {
        let payment_id = tx.external_id.as_deref().ok_or_else(|| {
            ProviderError::InvalidResponse("transaction has no PayPal payment id".to_string())
        })?;
        let payment = self.find_payment(payment_id).await?;
        map_payment_state(str_at(&payment, "/state")?)
    }

    async fn handle_webhook(
        &self,
        method: &str,
        params: Value,
    ) -> Result<WebhookOutcome, ProviderError> {
        match method {
            "process_return" => {
                let payment_id = str_at(&params, "/paymentId")?;
                let payment = self.find_payment(payment_id).await?;

                let patch = if payer_id(&payment).is_some() {
                    TransactionPatch::state(TransactionState::ToCapture)
                } else {
                    TransactionPatch::state(TransactionState::Abandoned)
                };
                Ok(WebhookOutcome::single(
                    payment_id,
                    patch.with_raw(payment).processed_now(),
                ))
            }
            other => Err(ProviderError::InvalidPayload(format!(
                "unhandled method '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CapturePolicy, NewTransaction, OriginKind, OriginRef};
    use crate::keychain::Credential;
    use mockito::{Matcher, ServerGuard};
    use std::time::Duration;

    const PAYMENT_ID: &str = "PAY-49DJDKZCIVJZVZALDEVVU334";

    fn provider(base: String) -> PaypalProvider {
        PaypalProvider::new(
            ProviderContext {
                credential: Credential::new("paypal", "client-secret").with_data("client_id", "client-id"),
                timeout: Duration::from_secs(5),
            },
            base,
        )
        .unwrap()
    }

    fn draft() -> Transaction {
        Transaction::draft(NewTransaction {
            provider_name: "paypal".to_string(),
            name: "SO002".to_string(),
            origin: OriginRef::new(OriginKind::SaleOrder, "SO002"),
            partner_email: Some("deltapc@example.com".to_string()),
            amount: BigDecimal::from_str("2947.5").unwrap(),
            currency: "USD".to_string(),
            capture_policy: CapturePolicy::Immediate,
            redirect_cancel_url: Some("https://shop.example.com/cancel".to_string()),
            redirect_success_url: Some("https://shop.example.com/thanks".to_string()),
        })
    }

    async fn token_mock(server: &mut ServerGuard) -> mockito::Mock {
        server
            .mock("POST", "/v1/oauth2/token")
            .match_body(Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()))
            .with_status(200)
            .with_body(json!({"access_token": "A21AA", "token_type": "Bearer"}).to_string())
            .create_async()
            .await
    }

    fn payment(state: &str, with_payer: bool) -> Value {
        let mut payment = json!({
            "id": PAYMENT_ID,
            "state": state,
            "transactions": [{"amount": {"total": "2947.50", "currency": "USD"}}],
            "links": [
                {"href": "https://api.sandbox.paypal.com/v1/payments/payment/PAY", "method": "GET", "rel": "self"},
                {"href": "https://www.sandbox.paypal.com/cgi-bin/webscr?token=EC-1", "method": "REDIRECT", "rel": "approval_url"},
            ],
        });
        if with_payer {
            payment["payer"] = json!({"payment_method": "paypal", "payer_info": {"payer_id": "4FRJVJRVRNBRE"}});
        }
        payment
    }

    #[tokio::test]
    async fn test_create_payment() {
        let mut server = mockito::Server::new_async().await;
        let _token = token_mock(&mut server).await;
        let create = server
            .mock("POST", "/v1/payments/payment")
            .match_header("authorization", "Bearer A21AA")
            .match_body(Matcher::PartialJson(json!({
                "intent": "sale",
                "redirect_urls": {
                    "return_url": "https://shop.example.com/return",
                    "cancel_url": "https://shop.example.com/cancel",
                },
                "transactions": [{"amount": {"total": "2947.50", "currency": "USD"}}],
            })))
            .with_status(201)
            .with_body(payment("created", false).to_string())
            .expect(1)
            .create_async()
            .await;

        let paypal = provider(server.url());
        let params = PaymentParams {
            return_url: Some("https://shop.example.com/return".to_string()),
            ..PaymentParams::default()
        };
        let tx = draft();
        let result = paypal.create_transaction(&tx, &params).await.unwrap();
        let patch = paypal.parse_creation_result(&result, &params).unwrap();

        create.assert_async().await;
        assert_eq!(patch.state, Some(TransactionState::Pending));
        assert_eq!(patch.external_id.as_deref(), Some(PAYMENT_ID));
        assert_eq!(patch.amount, Some(tx.amount.clone()));
        assert_eq!(
            patch.redirect_url.as_deref(),
            Some("https://www.sandbox.paypal.com/cgi-bin/webscr?token=EC-1")
        );
    }

    #[tokio::test]
    async fn test_return_with_payer_is_ready_to_capture() {
        let mut server = mockito::Server::new_async().await;
        let _token = token_mock(&mut server).await;
        let _find = server
            .mock("GET", format!("/v1/payments/payment/{}", PAYMENT_ID).as_str())
            .with_status(200)
            .with_body(payment("created", true).to_string())
            .create_async()
            .await;

        let outcome = provider(server.url())
            .dispatch_webhook("process_return", &json!({"paymentId": PAYMENT_ID, "PayerID": "4FRJVJRVRNBRE"}))
            .await
            .unwrap();

        assert_eq!(outcome.updates[0].external_id, PAYMENT_ID);
        assert_eq!(outcome.updates[0].patch.state, Some(TransactionState::ToCapture));
    }

    #[tokio::test]
    async fn test_return_without_payer_is_abandoned() {
        let mut server = mockito::Server::new_async().await;
        let _token = token_mock(&mut server).await;
        let _find = server
            .mock("GET", format!("/v1/payments/payment/{}", PAYMENT_ID).as_str())
            .with_status(200)
            .with_body(payment("created", false).to_string())
            .create_async()
            .await;

        let outcome = provider(server.url())
            .dispatch_webhook("process_return", &json!({"paymentId": PAYMENT_ID}))
            .await
            .unwrap();

        assert_eq!(outcome.updates[0].patch.state, Some(TransactionState::Abandoned));
    }

    #[tokio::test]
    async fn test_capture_executes_payment() {
        let mut server = mockito::Server::new_async().await;
        let _token = token_mock(&mut server).await;
        let _find = server
            .mock("GET", format!("/v1/payments/payment/{}", PAYMENT_ID).as_str())
            .with_status(200)
            .with_body(payment("created", true).to_string())
            .create_async()
            .await;
        let execute = server
            .mock("POST", format!("/v1/payments/payment/{}/execute", PAYMENT_ID).as_str())
            .match_body(Matcher::Json(json!({"payer_id": "4FRJVJRVRNBRE"})))
            .with_status(200)
            .with_body(payment("approved", true).to_string())
            .expect(1)
            .create_async()
            .await;

        let mut tx = draft();
        tx.apply(TransactionPatch::state(TransactionState::Pending).with_external_id(PAYMENT_ID))
            .unwrap();
        tx.apply(TransactionPatch::state(TransactionState::ToCapture)).unwrap();

        let patch = provider(server.url()).capture(&tx).await.unwrap();
        execute.assert_async().await;
        assert_eq!(patch.state, Some(TransactionState::Succeeded));
    }

    #[tokio::test]
    async fn test_capture_wrong_state_fails() {
        let mut server = mockito::Server::new_async().await;
        let _token = token_mock(&mut server).await;
        let _find = server
            .mock("GET", format!("/v1/payments/payment/{}", PAYMENT_ID).as_str())
            .with_status(200)
            .with_body(payment("created", true).to_string())
            .create_async()
            .await;
        let _execute = server
            .mock("POST", format!("/v1/payments/payment/{}/execute", PAYMENT_ID).as_str())
            .with_status(200)
            .with_body(payment("created", true).to_string())
            .create_async()
            .await;

        let mut tx = draft();
        tx.apply(TransactionPatch::state(TransactionState::ToCapture).with_external_id(PAYMENT_ID))
            .unwrap();

        let patch = provider(server.url()).capture(&tx).await.unwrap();
        assert_eq!(patch.state, Some(TransactionState::Failed));
        assert_eq!(patch.error.as_deref(), Some("Wrong state in result"));
    }

    #[test]
    fn test_payment_state_table() {
        assert_eq!(map_payment_state("created").unwrap(), TransactionState::Pending);
        assert_eq!(map_payment_state("expired").unwrap(), TransactionState::Abandoned);
        assert_eq!(map_payment_state("canceled").unwrap(), TransactionState::Cancel);
        assert!(map_payment_state("done").is_err());
    }
}
