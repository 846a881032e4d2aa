use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{Invoice, OriginAdapter, OriginKind, OriginRef, SaleOrder, Transaction};
use crate::error::GatewayError;
use crate::ports::OriginDirectory;
use crate::services::GenerateOptions;
use crate::validation::ValidationError;
use crate::AppState;

/// The document being paid, as the caller knows it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OriginSnapshot {
    SaleOrder {
        name: String,
        amount_total: BigDecimal,
        currency: String,
        partner_email: Option<String>,
    },
    Invoice {
        number: String,
        residual: BigDecimal,
        currency: String,
        partner_email: Option<String>,
    },
}

impl OriginSnapshot {
    fn reference(&self) -> OriginRef {
        match self {
            OriginSnapshot::SaleOrder { name, .. } => OriginRef::new(OriginKind::SaleOrder, name),
            OriginSnapshot::Invoice { number, .. } => OriginRef::new(OriginKind::Invoice, number),
        }
    }

    fn into_adapter(self) -> Arc<dyn OriginAdapter> {
        match self {
            OriginSnapshot::SaleOrder {
                name,
                amount_total,
                currency,
                partner_email,
            } => Arc::new(SaleOrder::new(name, amount_total, currency, partner_email)),
            OriginSnapshot::Invoice {
                number,
                residual,
                currency,
                partner_email,
            } => Arc::new(Invoice::new(number, residual, currency, partner_email)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// Provider name. Falls back to `payment_mode` when absent.
    pub provider: Option<String>,
    pub payment_mode: Option<String>,
    pub origin: OriginSnapshot,
    #[serde(flatten)]
    pub options: GenerateOptions,
}

/// Known documents are reused so that captures keep reducing the same amount due.
fn origin_for(state: &AppState, snapshot: OriginSnapshot) -> Arc<dyn OriginAdapter> {
    if let Some(known) = state.origins.lookup(&snapshot.reference()) {
        return known;
    }
    let origin = snapshot.into_adapter();
    state.origins.register(origin.clone());
    origin
}

pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<(StatusCode, Json<Transaction>), GatewayError> {
    let provider = match (&request.provider, &request.payment_mode) {
        (Some(provider), _) => provider.clone(),
        (None, Some(mode)) => state
            .service
            .registry()
            .provider_for_payment_mode(mode)?
            .to_string(),
        (None, None) => {
            return Err(ValidationError::new("provider", "provider or payment_mode is required").into())
        }
    };

    let origin = origin_for(&state, request.origin);
    let tx = state
        .service
        .generate(&provider, origin.as_ref(), request.options)
        .await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Transaction>, GatewayError> {
    Ok(Json(state.service.get(id).await?))
}

pub async fn capture(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Transaction>, GatewayError> {
    Ok(Json(state.service.capture_or_raise(id).await?))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Transaction>, GatewayError> {
    Ok(Json(state.service.cancel(id).await?))
}

pub async fn back_to_capture(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Transaction>, GatewayError> {
    Ok(Json(state.service.set_back_to_capture(id).await?))
}

pub async fn check_state(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Transaction>, GatewayError> {
    Ok(Json(state.service.check_state(id).await?))
}

/// Captures every authorized transaction of one document.
pub async fn capture_origin(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<Vec<Transaction>>, GatewayError> {
    let kind = OriginKind::from_str(&kind)
        .map_err(|err| ValidationError::new("kind", err.to_string()))?;
    let reference = OriginRef::new(kind, id);
    let origin = state
        .origins
        .lookup(&reference)
        .ok_or_else(|| GatewayError::NotFound(format!("origin {}", reference)))?;
    Ok(Json(state.service.capture_origin(origin.as_ref()).await?))
}
