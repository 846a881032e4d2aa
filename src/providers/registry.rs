//! Static name → factory map of compiled-in providers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::adyen::AdyenProvider;
use super::paypal::PaypalProvider;
use super::stripe::StripeProvider;
use super::{Provider, ProviderError};
use crate::error::GatewayError;
use crate::keychain::{Credential, Keychain};

/// Everything a provider instance is built from. Lives for one operation.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub credential: Credential,
    pub timeout: Duration,
}

pub type ProviderFactory =
    Arc<dyn Fn(ProviderContext) -> Result<Box<dyn Provider>, GatewayError> + Send + Sync>;

/// Endpoints and limits shared by the built-in providers.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub stripe_api_base: String,
    pub adyen_api_base: String,
    pub paypal_api_base: String,
    pub timeout: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            stripe_api_base: "https://api.stripe.com".to_string(),
            adyen_api_base: "https://pal-test.adyen.com/pal/servlet/Payment/v30".to_string(),
            paypal_api_base: "https://api.sandbox.paypal.com".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
    payment_modes: HashMap<String, String>,
    keychain: Arc<dyn Keychain>,
    timeout: Duration,
}

impl ProviderRegistry {
    pub fn new(keychain: Arc<dyn Keychain>, timeout: Duration) -> Self {
        Self {
            factories: HashMap::new(),
            payment_modes: HashMap::new(),
            keychain,
            timeout,
        }
    }

    /// Registry holding Adyen, PayPal and Stripe. Each is also reachable
    /// through a payment mode of the same name.
    pub fn with_builtin(keychain: Arc<dyn Keychain>, settings: &ProviderSettings) -> Self {
        let mut registry = Self::new(keychain, settings.timeout);

        let base = settings.stripe_api_base.clone();
        registry.register(
            StripeProvider::NAME,
            Arc::new(move |ctx: ProviderContext| -> Result<Box<dyn Provider>, GatewayError> {
                Ok(Box::new(StripeProvider::new(ctx, base.clone())?))
            }),
        );
        let base = settings.adyen_api_base.clone();
        registry.register(
            AdyenProvider::NAME,
            Arc::new(move |ctx: ProviderContext| -> Result<Box<dyn Provider>, GatewayError> {
                Ok(Box::new(AdyenProvider::new(ctx, base.clone())?))
            }),
        );
        let base = settings.paypal_api_base.clone();
        registry.register(
            PaypalProvider::NAME,
            Arc::new(move |ctx: ProviderContext| -> Result<Box<dyn Provider>, GatewayError> {
                Ok(Box::new(PaypalProvider::new(ctx, base.clone())?))
            }),
        );

        for name in [StripeProvider::NAME, AdyenProvider::NAME, PaypalProvider::NAME] {
            registry.map_payment_mode(name, name);
        }
        registry
    }

    pub fn register(&mut self, name: &str, factory: ProviderFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn map_payment_mode(&mut self, mode: &str, provider_name: &str) {
        self.payment_modes
            .insert(mode.to_string(), provider_name.to_string());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Builds a fresh provider, fetching its credential now.
    pub async fn resolve(&self, name: &str) -> Result<Box<dyn Provider>, GatewayError> {
        let factory = self.factories.get(name).ok_or_else(|| {
            GatewayError::Configuration(format!("no provider registered under '{}'", name))
        })?;

        let credential = self.keychain.retrieve(name).await?;
        factory(ProviderContext {
            credential,
            timeout: self.timeout,
        })
        .map_err(|err| match err {
            GatewayError::Provider(ProviderError::MissingCredential(key)) => {
                GatewayError::Configuration(format!(
                    "credential of provider '{}' has no '{}'",
                    name, key
                ))
            }
            other => other,
        })
    }

    pub fn provider_for_payment_mode(&self, mode: &str) -> Result<&str, GatewayError> {
        self.payment_modes
            .get(mode)
            .map(String::as_str)
            .ok_or_else(|| {
                GatewayError::Configuration(format!("no provider handles payment mode '{}'", mode))
            })
    }

    pub async fn resolve_payment_mode(&self, mode: &str) -> Result<Box<dyn Provider>, GatewayError> {
        let name = self.provider_for_payment_mode(mode)?.to_string();
        self.resolve(&name).await
    }
}
