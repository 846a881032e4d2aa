pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod keychain;
pub mod middleware;
pub mod ports;
pub mod providers;
pub mod services;
pub mod startup;
pub mod utils;
pub mod validation;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::adapters::InMemoryOriginDirectory;
use crate::middleware::{request_logger_middleware, RequestLogSettings};
use crate::services::{TransactionService, WebhookDispatcher};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TransactionService>,
    pub dispatcher: WebhookDispatcher,
    pub origins: Arc<InMemoryOriginDirectory>,
    pub request_log: RequestLogSettings,
}

pub fn create_app(state: AppState) -> Router {
    let request_log = state.request_log;
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/payment-gateway-http-webhook/:service/:method",
            post(handlers::webhook::http_webhook),
        )
        .route(
            "/payment-gateway-json-webhook/:service/:method",
            post(handlers::webhook::json_webhook),
        )
        .route(
            "/payment-gateway-return/:service",
            get(handlers::webhook::provider_return).post(handlers::webhook::provider_return),
        )
        .route("/transactions", post(handlers::transactions::generate))
        .route("/transactions/:id", get(handlers::transactions::get_transaction))
        .route("/transactions/:id/capture", post(handlers::transactions::capture))
        .route("/transactions/:id/cancel", post(handlers::transactions::cancel))
        .route(
            "/transactions/:id/back-to-capture",
            post(handlers::transactions::back_to_capture),
        )
        .route(
            "/transactions/:id/check-state",
            post(handlers::transactions::check_state),
        )
        .route(
            "/origins/:kind/:id/capture",
            post(handlers::transactions::capture_origin),
        )
        .layer(axum::middleware::from_fn_with_state(
            request_log,
            request_logger_middleware,
        ))
        .with_state(state)
}
