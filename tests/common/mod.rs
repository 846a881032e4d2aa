#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use payment_gateway::adapters::{InMemoryOriginDirectory, InMemoryTransactionRepository};
use payment_gateway::domain::{
    Invoice, OriginAdapter, SaleOrder, Transaction, TransactionPatch, TransactionState,
};
use payment_gateway::error::GatewayError;
use payment_gateway::keychain::{Credential, StaticKeychain};
use payment_gateway::providers::{
    CardErrorCode, PaymentParams, Provider, ProviderContext, ProviderError, ProviderRegistry, ProviderResult,
    WebhookMethod, WebhookOutcome,
};
use payment_gateway::services::{JobQueue, TransactionService, WebhookJob};
use payment_gateway::validation::{FieldKind, FieldSpec};

pub const FAKE: &str = "fake";
pub const OTHER: &str = "other";

/// How the fake answers a creation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Creation {
    Authorized,
    /// Needs a redirect (3-D Secure style) before it can be captured.
    Pending,
    Declined(CardErrorCode),
    Unreachable,
    /// Reports one unit more than requested.
    WrongAmount,
}

/// Shared script and call counters behind every [`FakeProvider`] instance.
pub struct FakeScript {
    pub creation: Mutex<Creation>,
    pub capture_fails: AtomicBool,
    pub capture_delay: Mutex<Duration>,
    pub poll_answer: Mutex<TransactionState>,
    pub poll_times_out: AtomicBool,
    pub create_calls: AtomicUsize,
    pub capture_calls: AtomicUsize,
    pub poll_calls: AtomicUsize,
    pub webhook_calls: AtomicUsize,
}

impl Default for FakeScript {
    fn default() -> Self {
        Self {
            creation: Mutex::new(Creation::Authorized),
            capture_fails: AtomicBool::new(false),
            capture_delay: Mutex::new(Duration::ZERO),
            poll_answer: Mutex::new(TransactionState::Pending),
            poll_times_out: AtomicBool::new(false),
            create_calls: AtomicUsize::new(0),
            capture_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            webhook_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeScript {
    pub fn set_creation(&self, creation: Creation) {
        *self.creation.lock().unwrap() = creation;
    }

    pub fn set_poll_answer(&self, state: TransactionState) {
        *self.poll_answer.lock().unwrap() = state;
    }

    pub fn set_capture_delay(&self, delay: Duration) {
        *self.capture_delay.lock().unwrap() = delay;
    }

    pub fn captures(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }
}

const EVENT_SCHEMA: &[FieldSpec] = &[
    FieldSpec::required("id", FieldKind::String),
    FieldSpec::required("status", FieldKind::String),
];

const RETURN_SCHEMA: &[FieldSpec] = &[
    FieldSpec::required("id", FieldKind::String),
    FieldSpec::optional("status", FieldKind::String),
];

const METHODS: &[WebhookMethod] = &[
    WebhookMethod {
        name: "process_event",
        schema: EVENT_SCHEMA,
    },
    WebhookMethod {
        name: "process_return",
        schema: RETURN_SCHEMA,
    },
];

/// Scriptable in-process provider. External ids are `fake_<transaction id>`.
pub struct FakeProvider {
    name: &'static str,
    script: Arc<FakeScript>,
}

fn map_status(status: &str) -> Option<TransactionState> {
    match status {
        "authorized" => Some(TransactionState::ToCapture),
        "pending" => Some(TransactionState::Pending),
        "paid" => Some(TransactionState::Succeeded),
        "failed" => Some(TransactionState::Failed),
        "canceled" => Some(TransactionState::Cancel),
        "abandoned" => Some(TransactionState::Abandoned),
        _ => None,
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn webhook_methods(&self) -> &'static [WebhookMethod] {
        METHODS
    }

    async fn create_transaction(
        &self,
        draft: &Transaction,
        _params: &PaymentParams,
    ) -> Result<ProviderResult, ProviderError> {
        self.script.create_calls.fetch_add(1, Ordering::SeqCst);
        let creation = *self.script.creation.lock().unwrap();
        let amount = match creation {
            Creation::Declined(code) => return Err(ProviderError::Card(code)),
            Creation::Unreachable => return Err(ProviderError::Timeout),
            Creation::WrongAmount => &draft.amount + BigDecimal::from(1),
            Creation::Authorized | Creation::Pending => draft.amount.clone(),
        };
        let status = if creation == Creation::Pending {
            "pending"
        } else {
            "authorized"
        };
        Ok(json!({
            "id": format!("fake_{}", draft.id),
            "status": status,
            "amount": amount.to_string(),
        }))
    }

    fn parse_creation_result(
        &self,
        result: &ProviderResult,
        _params: &PaymentParams,
    ) -> Result<TransactionPatch, ProviderError> {
        let status = result["status"].as_str().unwrap_or_default();
        let state = map_status(status)
            .ok_or_else(|| ProviderError::InvalidResponse(format!("status {}", status)))?;
        let mut patch = TransactionPatch::state(state)
            .with_external_id(result["id"].as_str().unwrap_or_default())
            .with_raw(result.clone());
        patch.amount = result["amount"]
            .as_str()
            .and_then(|raw| BigDecimal::from_str(raw).ok());
        if state == TransactionState::Pending {
            patch.redirect_url = Some("https://acs.fake.test/3ds".to_string());
            patch.used_strong_authentication = Some(true);
        }
        Ok(patch)
    }

    async fn capture(&self, _tx: &Transaction) -> Result<TransactionPatch, ProviderError> {
        let delay = *self.script.capture_delay.lock().unwrap();
        self.script.capture_calls.fetch_add(1, Ordering::SeqCst);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.script.capture_fails.load(Ordering::SeqCst) {
            return Err(ProviderError::Card(CardErrorCode::CardDeclined));
        }
        Ok(TransactionPatch::state(TransactionState::Succeeded).processed_now())
    }

    async fn poll_state(&self, _tx: &Transaction) -> Result<TransactionState, ProviderError> {
        self.script.poll_calls.fetch_add(1, Ordering::SeqCst);
        if self.script.poll_times_out.load(Ordering::SeqCst) {
            return Err(ProviderError::Timeout);
        }
        Ok(*self.script.poll_answer.lock().unwrap())
    }

    async fn handle_webhook(
        &self,
        method: &str,
        params: Value,
    ) -> Result<WebhookOutcome, ProviderError> {
        self.script.webhook_calls.fetch_add(1, Ordering::SeqCst);
        let id = params["id"].as_str().unwrap_or_default().to_string();
        let default_status = if method == "process_return" {
            "authorized"
        } else {
            ""
        };
        let status = params["status"].as_str().unwrap_or(default_status);
        let state = map_status(status)
            .ok_or_else(|| ProviderError::InvalidPayload(format!("unknown status {}", status)))?;
        Ok(WebhookOutcome::single(
            id,
            TransactionPatch::state(state)
                .with_raw(params.clone())
                .processed_now(),
        ))
    }
}

pub struct Harness {
    pub service: Arc<TransactionService>,
    pub registry: Arc<ProviderRegistry>,
    pub repo: Arc<InMemoryTransactionRepository>,
    pub origins: Arc<InMemoryOriginDirectory>,
    pub fake: Arc<FakeScript>,
    pub other: Arc<FakeScript>,
}

fn register_fake(registry: &mut ProviderRegistry, name: &'static str, script: Arc<FakeScript>) {
    registry.register(
        name,
        Arc::new(move |_ctx: ProviderContext| -> Result<Box<dyn Provider>, GatewayError> {
            Ok(Box::new(FakeProvider {
                name,
                script: script.clone(),
            }))
        }),
    );
}

/// Service over an in-memory store with two independent fake providers.
pub fn harness() -> Harness {
    let keychain = StaticKeychain::new()
        .with(Credential::new(FAKE, "fake-secret"))
        .with(Credential::new(OTHER, "other-secret"));
    let mut registry = ProviderRegistry::new(Arc::new(keychain), Duration::from_secs(5));

    let fake = Arc::new(FakeScript::default());
    let other = Arc::new(FakeScript::default());
    register_fake(&mut registry, FAKE, fake.clone());
    register_fake(&mut registry, OTHER, other.clone());

    let registry = Arc::new(registry);
    let repo = Arc::new(InMemoryTransactionRepository::new());
    let origins = Arc::new(InMemoryOriginDirectory::new());
    let service = Arc::new(TransactionService::new(
        repo.clone(),
        registry.clone(),
        origins.clone(),
    ));

    Harness {
        service,
        registry,
        repo,
        origins,
        fake,
        other,
    }
}

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

pub fn sale_order(name: &str, total: &str) -> Arc<SaleOrder> {
    Arc::new(SaleOrder::new(
        name,
        dec(total),
        "USD",
        Some("buyer@example.com".to_string()),
    ))
}

pub fn invoice(number: &str, residual: &str) -> Arc<Invoice> {
    Arc::new(Invoice::new(number, dec(residual), "EUR", None))
}

impl Harness {
    /// Another service over the same store, as a second process would run it.
    pub fn peer_service(&self) -> TransactionService {
        TransactionService::new(
            self.repo.clone(),
            self.registry.clone(),
            self.origins.clone(),
        )
    }

    /// Registers `origin` so captures driven by webhooks can reach it.
    pub fn track(&self, origin: Arc<dyn OriginAdapter>) {
        self.origins.register(origin);
    }
}

/// Queue that only records what it was given.
#[derive(Default)]
pub struct RecordingQueue {
    pub jobs: Mutex<Vec<WebhookJob>>,
}

impl RecordingQueue {
    pub fn jobs(&self) -> Vec<WebhookJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, job: WebhookJob) -> Result<(), GatewayError> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}
