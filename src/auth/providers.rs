//! Trusted OAuth providers
//!
//! The allow-list is a closed enum. Issuers and key endpoints come from
//! this module and from operator configuration only, never from requests.

use jsonwebtoken::Algorithm;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Supported identity providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Microsoft,
    Apple,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Google, Provider::Microsoft, Provider::Apple];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Microsoft => "microsoft",
            Provider::Apple => "apple",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown provider name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Provider::Google),
            "microsoft" => Ok(Provider::Microsoft),
            "apple" => Ok(Provider::Apple),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// How a provider's `email_verified` claim is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailVerification {
    /// Claim must be present and true
    Required,
    /// Reject only when the claim is present and false
    IfAsserted,
}

/// Static provider configuration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: Provider,
    /// Every issuer string a valid token may carry
    pub issuers: Vec<String>,
    pub jwks_uri: String,
    pub userinfo_endpoint: Option<String>,
    pub email_verification: EmailVerification,
    pub algorithms: Vec<Algorithm>,
    /// Expected `aud`; the provider is disabled without one
    pub client_id: Option<String>,
}

const MICROSOFT_CONSUMER_TENANT: &str = "9188040d-6c67-4c5b-b112-36a304b66dad";

fn microsoft_issuer(tenant: &str) -> String {
    format!("https://login.microsoftonline.com/{}/v2.0", tenant)
}

impl ProviderConfig {
    /// Built-in configuration for a provider
    pub fn builtin(provider: Provider) -> Self {
        match provider {
            Provider::Google => ProviderConfig {
                provider,
                issuers: vec![
                    "https://accounts.google.com".to_string(),
                    "accounts.google.com".to_string(),
                ],
                jwks_uri: "https://www.googleapis.com/oauth2/v3/certs".to_string(),
                userinfo_endpoint: Some(
                    "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
                ),
                email_verification: EmailVerification::Required,
                algorithms: vec![Algorithm::RS256],
                client_id: None,
            },
            Provider::Microsoft => ProviderConfig {
                provider,
                issuers: vec![
                    microsoft_issuer("common"),
                    microsoft_issuer(MICROSOFT_CONSUMER_TENANT),
                ],
                jwks_uri: "https://login.microsoftonline.com/common/discovery/v2.0/keys"
                    .to_string(),
                userinfo_endpoint: Some("https://graph.microsoft.com/v1.0/me".to_string()),
                email_verification: EmailVerification::Required,
                algorithms: vec![Algorithm::RS256],
                client_id: None,
            },
            Provider::Apple => ProviderConfig {
                provider,
                issuers: vec!["https://appleid.apple.com".to_string()],
                jwks_uri: "https://appleid.apple.com/auth/keys".to_string(),
                userinfo_endpoint: None,
                email_verification: EmailVerification::IfAsserted,
                algorithms: vec![Algorithm::RS256],
                client_id: None,
            },
        }
    }

    pub fn accepts_issuer(&self, issuer: &str) -> bool {
        self.issuers.iter().any(|i| i == issuer)
    }
}

/// Operator-supplied provider settings
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub google_client_id: Option<String>,
    pub microsoft_client_id: Option<String>,
    pub apple_client_id: Option<String>,
    /// Additional Azure AD tenants whose issuer is accepted for Microsoft
    pub microsoft_tenant_ids: Vec<String>,
}

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Name is not on the allow-list
    Unknown(String),
    /// On the allow-list but no client id configured
    Disabled(Provider),
}

/// Lookup of trusted provider configurations, immutable after startup
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    configs: HashMap<Provider, ProviderConfig>,
}

impl ProviderRegistry {
    pub fn new(settings: ProviderSettings) -> Self {
        let mut configs = HashMap::new();

        for provider in Provider::ALL {
            let mut config = ProviderConfig::builtin(provider);
            config.client_id = match provider {
                Provider::Google => settings.google_client_id.clone(),
                Provider::Microsoft => settings.microsoft_client_id.clone(),
                Provider::Apple => settings.apple_client_id.clone(),
            };
            if provider == Provider::Microsoft {
                for tenant in &settings.microsoft_tenant_ids {
                    let issuer = microsoft_issuer(tenant);
                    if !config.accepts_issuer(&issuer) {
                        config.issuers.push(issuer);
                    }
                }
            }
            configs.insert(provider, config);
        }

        Self { configs }
    }

    /// Resolve a provider name supplied by a caller
    pub fn get(&self, name: &str) -> Result<&ProviderConfig, RegistryError> {
        let provider =
            Provider::from_str(name).map_err(|e| RegistryError::Unknown(e.0))?;
        self.config(provider)
    }

    pub fn config(&self, provider: Provider) -> Result<&ProviderConfig, RegistryError> {
        match self.configs.get(&provider) {
            Some(config) if config.client_id.is_some() => Ok(config),
            _ => Err(RegistryError::Disabled(provider)),
        }
    }

    /// Providers with a configured client id
    pub fn enabled(&self) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.config(*p).is_ok())
            .collect()
    }
}
