use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::domain::{Transaction, TransactionState};
use crate::error::GatewayError;
use crate::AppState;

/// Form-encoded provider callback. Queued, acknowledged with an empty body.
pub async fn http_webhook(
    State(state): State<AppState>,
    Path((service, method)): Path<(String, String)>,
    Form(fields): Form<HashMap<String, String>>,
) -> Result<StatusCode, GatewayError> {
    state
        .dispatcher
        .accept(&service, &method, form_to_value(fields))
        .await?;
    Ok(StatusCode::OK)
}

/// JSON provider callback. Queued, acknowledged with `true`.
pub async fn json_webhook(
    State(state): State<AppState>,
    Path((service, method)): Path<(String, String)>,
    Json(params): Json<Value>,
) -> Result<Json<bool>, GatewayError> {
    state.dispatcher.accept(&service, &method, params).await?;
    Ok(Json(true))
}

/// Browser coming back from 3-D Secure or a PayPal approval page.
///
/// Resolved inline. Sends the customer on to the success or cancel URL the
/// transaction was generated with, or answers with the transaction itself.
pub async fn provider_return(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Form(fields): Form<HashMap<String, String>>,
) -> Result<Response, GatewayError> {
    let tx = state
        .dispatcher
        .process_return(&service, &form_to_value(fields))
        .await?;

    Ok(match return_target(&tx) {
        Some(url) => Redirect::to(url).into_response(),
        None => Json(tx).into_response(),
    })
}

fn return_target(tx: &Transaction) -> Option<&str> {
    match tx.state {
        TransactionState::Cancel | TransactionState::Failed | TransactionState::Abandoned => {
            tx.redirect_cancel_url.as_deref()
        }
        _ => tx.redirect_success_url.as_deref(),
    }
}

fn form_to_value(fields: HashMap<String, String>) -> Value {
    Value::Object(
        fields
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect::<Map<String, Value>>(),
    )
}
