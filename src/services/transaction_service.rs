//! Orchestration of the transaction lifecycle.
//!
//! This is the only place transactions change state. Every mutation of an
//! existing record happens under the repository lock of that transaction and
//! is re-read after the lock is taken, so services in other processes sharing
//! the store never interleave with this one.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::money::round_to_currency;
use crate::domain::{
    FollowUp, NewTransaction, OriginAdapter, Transaction, TransactionPatch, TransactionState,
    Transition,
};
use crate::error::GatewayError;
use crate::ports::{OriginDirectory, TransactionRepository};
use crate::providers::{PaymentParams, Provider, ProviderError, ProviderRegistry};
use crate::validation::{validate_currency_code, validate_positive_amount};

/// Webhook method every redirect-based provider exposes for browser returns.
pub const RETURN_METHOD: &str = "process_return";

/// Caller options for [`TransactionService::generate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    #[serde(flatten)]
    pub payment: PaymentParams,
    pub redirect_cancel_url: Option<String>,
    pub redirect_success_url: Option<String>,
}

/// Result of one capture attempt.
#[derive(Debug)]
pub enum CaptureOutcome {
    Captured,
    AlreadyCaptured,
    /// The failure has been recorded on the transaction.
    Failed(GatewayError),
}

impl CaptureOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, CaptureOutcome::Captured | CaptureOutcome::AlreadyCaptured)
    }
}

pub struct TransactionService {
    repo: Arc<dyn TransactionRepository>,
    registry: Arc<ProviderRegistry>,
    origins: Arc<dyn OriginDirectory>,
}

impl TransactionService {
    pub fn new(
        repo: Arc<dyn TransactionRepository>,
        registry: Arc<ProviderRegistry>,
        origins: Arc<dyn OriginDirectory>,
    ) -> Self {
        Self {
            repo,
            registry,
            origins,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub async fn get(&self, id: Uuid) -> Result<Transaction, GatewayError> {
        Ok(self.repo.get(id).await?)
    }

    /// Creates a transaction for `origin` on the provider side.
    ///
    /// Provider failures are recorded on the (then `failed`) transaction and
    /// returned to the caller. When the provider answers `to_capture` under the
    /// immediate policy the capture runs before this returns.
    pub async fn generate(
        &self,
        provider_name: &str,
        origin: &dyn OriginAdapter,
        options: GenerateOptions,
    ) -> Result<Transaction, GatewayError> {
        let provider = self.registry.resolve(provider_name).await?;

        let policy = origin.capture_policy();
        if !provider.supported_capture_policies().contains(&policy) {
            return Err(GatewayError::Configuration(format!(
                "provider '{}' does not support capture policy '{}'",
                provider_name, policy
            )));
        }

        let currency = origin.currency().to_string();
        validate_currency_code(&currency)?;
        let amount = round_to_currency(&origin.amount_due(), &currency);
        validate_positive_amount(&amount)?;

        let draft = Transaction::draft(NewTransaction {
            provider_name: provider_name.to_string(),
            name: origin.display_name(),
            origin: origin.reference(),
            partner_email: origin.partner_email().map(str::to_string),
            amount,
            currency,
            capture_policy: policy,
            redirect_cancel_url: options.redirect_cancel_url.clone(),
            redirect_success_url: options.redirect_success_url.clone(),
        });
        let _guard = self.repo.lock(draft.id).await?;
        let mut tx = self.repo.insert(&draft).await?;
        info!(transaction_id = %tx.id, provider = %provider_name, origin = %tx.origin, amount = %tx.amount, "transaction drafted");

        let patch = match self.create_on_provider(provider.as_ref(), &tx, &options.payment).await {
            Ok(patch) => patch,
            Err(err) => {
                warn!(transaction_id = %tx.id, provider = %provider_name, error = %err, "provider creation failed");
                self.record_failure(&mut tx, &err).await?;
                return Err(GatewayError::Provider(err));
            }
        };

        let external_id = patch.external_id.clone();
        // Settled at creation: pass through to_capture so the capture bookkeeping still runs.
        if patch.state == Some(TransactionState::Succeeded) {
            tx.apply(TransactionPatch::state(TransactionState::ToCapture))?;
        }
        let transition = match tx.apply(patch) {
            Ok(transition) => transition,
            Err(err) => {
                let err = ProviderError::InvalidResponse(err.to_string());
                self.record_failure(&mut tx, &err).await?;
                return Err(GatewayError::Provider(err));
            }
        };

        if let Err(err) = self.repo.update(&tx).await {
            error!(
                transaction_id = %tx.id,
                provider = %provider_name,
                external_id = external_id.as_deref().unwrap_or("-"),
                error = %err,
                "orphaned provider transaction: created remotely but not stored"
            );
            return Err(err.into());
        }
        info!(transaction_id = %tx.id, state = %tx.state, external_id = external_id.as_deref().unwrap_or("-"), "transaction created on provider");

        if let Some(transition) = transition {
            self.run_follow_up(&mut tx, transition, provider.as_ref(), Some(origin))
                .await?;
        }
        Ok(tx)
    }

    async fn create_on_provider(
        &self,
        provider: &dyn Provider,
        tx: &Transaction,
        params: &PaymentParams,
    ) -> Result<TransactionPatch, ProviderError> {
        let result = provider.create_transaction(tx, params).await?;
        let patch = provider.parse_creation_result(&result, params)?;

        if let Some(reported) = &patch.amount {
            let reported = round_to_currency(reported, &tx.currency);
            if reported != tx.amount {
                return Err(ProviderError::InvalidResponse(format!(
                    "provider amount {} differs from amount due {}",
                    reported, tx.amount
                )));
            }
        }
        Ok(patch)
    }

    async fn record_failure(
        &self,
        tx: &mut Transaction,
        err: &ProviderError,
    ) -> Result<(), GatewayError> {
        tx.apply(TransactionPatch::failure(err.to_string()))?;
        self.repo.update(tx).await?;
        Ok(())
    }

    /// Captures `id`, recording any provider failure. Returns whether the
    /// transaction ends up `succeeded`.
    pub async fn capture(&self, id: Uuid) -> Result<bool, GatewayError> {
        let _guard = self.repo.lock(id).await?;
        let mut tx = self.repo.get(id).await?;
        Ok(self.run_capture(&mut tx, None, None).await?.succeeded())
    }

    /// Like [`capture`](Self::capture) but also returns the recorded failure.
    pub async fn capture_or_raise(&self, id: Uuid) -> Result<Transaction, GatewayError> {
        let _guard = self.repo.lock(id).await?;
        let mut tx = self.repo.get(id).await?;
        match self.run_capture(&mut tx, None, None).await? {
            CaptureOutcome::Failed(err) => Err(err),
            CaptureOutcome::Captured | CaptureOutcome::AlreadyCaptured => Ok(tx),
        }
    }

    /// Captures every `to_capture` transaction of `origin` for its current amount due.
    pub async fn capture_origin(
        &self,
        origin: &dyn OriginAdapter,
    ) -> Result<Vec<Transaction>, GatewayError> {
        let reference = origin.reference();
        let candidates = self.repo.list_by_origin(&reference).await?;
        let mut captured = Vec::new();

        for candidate in candidates
            .into_iter()
            .filter(|tx| tx.state == TransactionState::ToCapture)
        {
            let _guard = self.repo.lock(candidate.id).await?;
            let mut tx = self.repo.get(candidate.id).await?;
            if tx.state != TransactionState::ToCapture {
                continue;
            }

            let due = round_to_currency(&origin.amount_due(), &tx.currency);
            if due != tx.amount {
                warn!(
                    transaction_id = %tx.id,
                    origin = %reference,
                    authorized = %tx.amount,
                    due = %due,
                    "amount due changed since authorization, capturing amount due"
                );
                tx.apply(TransactionPatch {
                    amount: Some(due),
                    ..TransactionPatch::default()
                })?;
            }

            self.run_capture(&mut tx, None, Some(origin)).await?;
            captured.push(tx);
        }
        Ok(captured)
    }

    /// Caller must hold the lock of `tx`.
    async fn run_capture(
        &self,
        tx: &mut Transaction,
        provider: Option<&dyn Provider>,
        origin: Option<&dyn OriginAdapter>,
    ) -> Result<CaptureOutcome, GatewayError> {
        match tx.state {
            TransactionState::Succeeded => {
                debug!(transaction_id = %tx.id, "already captured");
                return Ok(CaptureOutcome::AlreadyCaptured);
            }
            TransactionState::ToCapture => {}
            other => {
                return Err(GatewayError::InvalidTransition(
                    crate::domain::TransitionError {
                        from: other,
                        to: TransactionState::Succeeded,
                    },
                ))
            }
        }

        let resolved;
        let provider = match provider {
            Some(provider) => Ok(provider),
            None => match self.registry.resolve(&tx.provider_name).await {
                Ok(boxed) => {
                    resolved = boxed;
                    Ok(resolved.as_ref())
                }
                Err(err) => Err(err),
            },
        };

        let attempt = match provider {
            Ok(provider) => provider
                .capture(tx)
                .await
                .map_err(GatewayError::Provider)
                .and_then(|patch| match patch.state {
                    Some(TransactionState::Succeeded | TransactionState::Failed) => Ok(patch),
                    other => Err(GatewayError::Provider(ProviderError::InvalidResponse(
                        format!("capture answered with state {:?}", other),
                    ))),
                }),
            Err(err) => Err(err),
        };

        let outcome = match attempt {
            Ok(patch) => {
                tx.apply(patch)?;
                if tx.state == TransactionState::Succeeded {
                    CaptureOutcome::Captured
                } else {
                    let message = tx.error.clone().unwrap_or_else(|| "capture failed".to_string());
                    CaptureOutcome::Failed(GatewayError::Provider(ProviderError::Api {
                        status: 402,
                        message,
                    }))
                }
            }
            Err(err) => {
                tx.apply(TransactionPatch::failure(err.to_string()))?;
                CaptureOutcome::Failed(err)
            }
        };

        self.repo.update(tx).await?;
        match &outcome {
            CaptureOutcome::Captured => {
                info!(transaction_id = %tx.id, amount = %tx.amount, "transaction captured");
                self.notify_captured(tx, origin);
            }
            CaptureOutcome::Failed(err) => {
                warn!(transaction_id = %tx.id, error = %err, "capture failed");
            }
            CaptureOutcome::AlreadyCaptured => {}
        }
        Ok(outcome)
    }

    fn notify_captured(&self, tx: &Transaction, origin: Option<&dyn OriginAdapter>) {
        match origin {
            Some(origin) => origin.on_captured(tx),
            None => match self.origins.lookup(&tx.origin) {
                Some(origin) => origin.on_captured(tx),
                None => warn!(transaction_id = %tx.id, origin = %tx.origin, "origin not found, capture not reported"),
            },
        }
    }

    /// Runs what a transition requires, within the current operation.
    async fn run_follow_up(
        &self,
        tx: &mut Transaction,
        transition: Transition,
        provider: &dyn Provider,
        origin: Option<&dyn OriginAdapter>,
    ) -> Result<(), GatewayError> {
        if transition.to == TransactionState::Succeeded {
            self.notify_captured(tx, origin);
        }
        match transition.follow_up(tx.capture_policy) {
            Some(FollowUp::Capture) => {
                self.run_capture(tx, Some(provider), origin).await?;
            }
            None => {}
        }
        Ok(())
    }

    /// Applies a provider-reported change. Caller must hold the lock of `tx`.
    ///
    /// Terminal transactions only take the bookkeeping part of the patch, which
    /// makes redelivered webhooks harmless.
    async fn apply_provider_update(
        &self,
        tx: &mut Transaction,
        mut patch: TransactionPatch,
        provider: &dyn Provider,
    ) -> Result<(), GatewayError> {
        if tx.state.is_terminal() {
            if let Some(state) = patch.state.take() {
                debug!(transaction_id = %tx.id, current = %tx.state, reported = %state, "ignoring update on terminal transaction");
            }
            tx.apply(patch)?;
            self.repo.update(tx).await?;
            return Ok(());
        }

        // The provider captured on its own while we still waited for authentication.
        if tx.state == TransactionState::Pending && patch.state == Some(TransactionState::Succeeded) {
            tx.apply(TransactionPatch::state(TransactionState::ToCapture))?;
        }

        let from = tx.state;
        let transition = tx.apply(patch)?;
        self.repo.update(tx).await?;
        if let Some(transition) = transition {
            info!(transaction_id = %tx.id, from = %from, to = %transition.to, "provider moved transaction");
            self.run_follow_up(tx, transition, provider, None).await?;
        }
        Ok(())
    }

    /// Polls the provider of a `pending` transaction. Other states are left alone.
    ///
    /// A poll that times out fails the transaction. Any other provider error is
    /// returned and the transaction stays `pending` for the next poll.
    pub async fn check_state(&self, id: Uuid) -> Result<Transaction, GatewayError> {
        let _guard = self.repo.lock(id).await?;
        let mut tx = self.repo.get(id).await?;
        if tx.state != TransactionState::Pending {
            debug!(transaction_id = %tx.id, state = %tx.state, "check_state skipped");
            return Ok(tx);
        }

        let provider = self.registry.resolve(&tx.provider_name).await?;
        let polled = match provider.poll_state(&tx).await {
            Ok(polled) => polled,
            Err(ProviderError::Timeout) => {
                warn!(transaction_id = %tx.id, provider = %tx.provider_name, "state poll timed out, marking failed");
                self.record_failure(&mut tx, &ProviderError::Timeout).await?;
                return Ok(tx);
            }
            Err(err) => return Err(err.into()),
        };
        if polled != tx.state {
            self.apply_provider_update(
                &mut tx,
                TransactionPatch::state(polled).processed_now(),
                provider.as_ref(),
            )
            .await?;
        }
        Ok(tx)
    }

    /// Runs `check_state` on up to `limit` pending transactions. Returns how many were checked.
    pub async fn check_pending(&self, limit: i64) -> Result<usize, GatewayError> {
        let pending = self.repo.list_pending(limit).await?;
        let count = pending.len();
        for tx in pending {
            if let Err(err) = self.check_state(tx.id).await {
                warn!(transaction_id = %tx.id, provider = %tx.provider_name, error = %err, "state check failed");
            }
        }
        Ok(count)
    }

    pub async fn cancel(&self, id: Uuid) -> Result<Transaction, GatewayError> {
        let _guard = self.repo.lock(id).await?;
        let mut tx = self.repo.get(id).await?;
        tx.apply(TransactionPatch::state(TransactionState::Cancel).processed_now())?;
        self.repo.update(&tx).await?;
        info!(transaction_id = %tx.id, "transaction cancelled");
        Ok(tx)
    }

    /// Moves a `pending` transaction to `to_capture`, capturing right away
    /// under the immediate policy. On `to_capture` it retries that capture.
    pub async fn set_back_to_capture(&self, id: Uuid) -> Result<Transaction, GatewayError> {
        let _guard = self.repo.lock(id).await?;
        let mut tx = self.repo.get(id).await?;

        if tx.state != TransactionState::ToCapture {
            tx.apply(TransactionPatch::state(TransactionState::ToCapture))?;
            self.repo.update(&tx).await?;
            info!(transaction_id = %tx.id, "transaction set back to capture");
        }

        let reached = Transition {
            from: TransactionState::Pending,
            to: TransactionState::ToCapture,
        };
        if reached.follow_up(tx.capture_policy) == Some(FollowUp::Capture) {
            self.run_capture(&mut tx, None, None).await?;
        }
        Ok(tx)
    }

    /// Validates and runs a provider webhook method, then applies every update
    /// it reports to the matching transactions.
    pub async fn process_webhook(
        &self,
        provider_name: &str,
        method_name: &str,
        params: &Value,
    ) -> Result<Vec<Transaction>, GatewayError> {
        let provider = self.registry.resolve(provider_name).await?;
        let outcome = provider.dispatch_webhook(method_name, params).await?;

        let mut touched = Vec::with_capacity(outcome.updates.len());
        for update in outcome.updates {
            let found = self
                .repo
                .find_by_external_id(provider_name, &update.external_id)
                .await?
                .ok_or_else(|| {
                    GatewayError::NotFound(format!(
                        "{} transaction {}",
                        provider_name, update.external_id
                    ))
                })?;

            let _guard = self.repo.lock(found.id).await?;
            let mut tx = self.repo.get(found.id).await?;
            self.apply_provider_update(&mut tx, update.patch, provider.as_ref())
                .await?;
            touched.push(tx);
        }

        debug!(provider = %provider_name, method = %method_name, updated = touched.len(), "webhook processed");
        Ok(touched)
    }

    /// Synchronous browser return. Runs the provider's `process_return` method
    /// and hands back the transaction it resolved.
    pub async fn process_return(
        &self,
        provider_name: &str,
        params: &Value,
    ) -> Result<Transaction, GatewayError> {
        self.process_webhook(provider_name, RETURN_METHOD, params)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                GatewayError::NotFound(format!("{} return matched no transaction", provider_name))
            })
    }
}
