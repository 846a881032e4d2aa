//! Provider credential storage.
//!
//! Credentials are looked up by namespace (the provider name) on every
//! provider resolution and dropped with the provider instance.

use async_trait::async_trait;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;
use vaultrs::auth::approle;
use vaultrs::client::{Client, VaultClient, VaultClientSettingsBuilder};
use vaultrs::kv2;

use crate::providers::ProviderError;

#[derive(Debug, Error)]
pub enum KeychainError {
    #[error("no credential stored for namespace '{0}'")]
    Missing(String),

    #[error("credential for namespace '{namespace}' is malformed: {reason}")]
    Malformed { namespace: String, reason: String },

    #[error("keychain backend error: {0}")]
    Backend(String),
}

/// Secret bundle of one provider account.
#[derive(Clone)]
pub struct Credential {
    namespace: String,
    secret: String,
    data: HashMap<String, String>,
}

impl Credential {
    pub fn new(namespace: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            secret: secret.into(),
            data: HashMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn data(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &'static str) -> Result<&str, ProviderError> {
        self.data(key)
            .filter(|value| !value.is_empty())
            .ok_or(ProviderError::MissingCredential(key))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("namespace", &self.namespace)
            .field("secret", &"****")
            .field("data_keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
pub trait Keychain: Send + Sync {
    async fn retrieve(&self, namespace: &str) -> Result<Credential, KeychainError>;
}

/// Reads `GATEWAY_<NAMESPACE>_SECRET` and the optional JSON object
/// `GATEWAY_<NAMESPACE>_DATA`.
#[derive(Debug, Default, Clone)]
pub struct EnvKeychain;

impl EnvKeychain {
    fn prefix(namespace: &str) -> String {
        format!("GATEWAY_{}", namespace.to_ascii_uppercase().replace(['-', '.'], "_"))
    }
}

#[async_trait]
impl Keychain for EnvKeychain {
    async fn retrieve(&self, namespace: &str) -> Result<Credential, KeychainError> {
        let prefix = Self::prefix(namespace);
        let secret = env::var(format!("{}_SECRET", prefix))
            .map_err(|_| KeychainError::Missing(namespace.to_string()))?;

        let mut credential = Credential::new(namespace, secret);
        if let Ok(raw) = env::var(format!("{}_DATA", prefix)) {
            let data: HashMap<String, String> =
                serde_json::from_str(&raw).map_err(|e| KeychainError::Malformed {
                    namespace: namespace.to_string(),
                    reason: e.to_string(),
                })?;
            credential.data = data;
        }

        Ok(credential)
    }
}

/// Fixed in-memory credentials.
#[derive(Debug, Default, Clone)]
pub struct StaticKeychain {
    credentials: HashMap<String, Credential>,
}

impl StaticKeychain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, credential: Credential) -> Self {
        self.credentials
            .insert(credential.namespace().to_string(), credential);
        self
    }
}

#[async_trait]
impl Keychain for StaticKeychain {
    async fn retrieve(&self, namespace: &str) -> Result<Credential, KeychainError> {
        self.credentials
            .get(namespace)
            .cloned()
            .ok_or_else(|| KeychainError::Missing(namespace.to_string()))
    }
}

/// HashiCorp Vault KV v2 store, authenticated with AppRole.
///
/// A namespace maps to `<kv_mount>/payment/<namespace>`; key `secret` is the
/// main secret, every other key lands in the credential data.
pub struct VaultKeychain {
    client: VaultClient,
    kv_mount: String,
}

impl VaultKeychain {
    pub async fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;

        let vault_addr =
            env::var("VAULT_ADDR").unwrap_or_else(|_| "http://127.0.0.1:8200".to_string());
        let role_id = env::var("VAULT_ROLE_ID").context("VAULT_ROLE_ID is required")?;
        let secret_id = env::var("VAULT_SECRET_ID").context("VAULT_SECRET_ID is required")?;
        let auth_mount = env::var("VAULT_AUTH_MOUNT").unwrap_or_else(|_| "approle".to_string());
        let kv_mount = env::var("VAULT_KV_MOUNT").unwrap_or_else(|_| "secret".to_string());

        let mut client = VaultClient::new(
            VaultClientSettingsBuilder::default()
                .address(&vault_addr)
                .build()
                .context("failed to build Vault client settings")?,
        )
        .context("failed to create Vault client")?;

        let auth = approle::login(&client, &auth_mount, &role_id, &secret_id)
            .await
            .context("failed to authenticate to Vault with AppRole")?;
        client.set_token(&auth.client_token);

        Ok(Self { client, kv_mount })
    }
}

#[async_trait]
impl Keychain for VaultKeychain {
    async fn retrieve(&self, namespace: &str) -> Result<Credential, KeychainError> {
        let path = format!("payment/{}", namespace);
        let mut values: HashMap<String, String> = kv2::read(&self.client, &self.kv_mount, &path)
            .await
            .map_err(|e| match e {
                vaultrs::error::ClientError::APIError { code: 404, .. } => {
                    KeychainError::Missing(namespace.to_string())
                }
                other => KeychainError::Backend(other.to_string()),
            })?;

        let secret = values
            .remove("secret")
            .ok_or_else(|| KeychainError::Malformed {
                namespace: namespace.to_string(),
                reason: "key 'secret' not found".to_string(),
            })?;

        let mut credential = Credential::new(namespace, secret);
        credential.data = values;
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_keychain() {
        let keychain =
            StaticKeychain::new().with(Credential::new("stripe", "sk_test_1").with_data("k", "v"));

        let credential = keychain.retrieve("stripe").await.unwrap();
        assert_eq!(credential.secret(), "sk_test_1");
        assert_eq!(credential.data("k"), Some("v"));
        assert!(matches!(
            keychain.retrieve("adyen").await,
            Err(KeychainError::Missing(_))
        ));
    }

    #[tokio::test]
    async fn test_env_keychain_reads_secret_and_data() {
        env::set_var("GATEWAY_KEYCHAIN_TEST_SECRET", "s3cr3t");
        env::set_var("GATEWAY_KEYCHAIN_TEST_DATA", r#"{"client_id": "abc"}"#);

        let credential = EnvKeychain.retrieve("keychain-test").await.unwrap();
        assert_eq!(credential.secret(), "s3cr3t");
        assert_eq!(credential.require("client_id").unwrap(), "abc");
        assert!(matches!(
            credential.require("merchant_account"),
            Err(ProviderError::MissingCredential("merchant_account"))
        ));

        env::remove_var("GATEWAY_KEYCHAIN_TEST_SECRET");
        env::remove_var("GATEWAY_KEYCHAIN_TEST_DATA");
    }

    #[test]
    fn test_debug_masks_secret() {
        let credential = Credential::new("paypal", "very-secret");
        assert!(!format!("{:?}", credential).contains("very-secret"));
    }
}
