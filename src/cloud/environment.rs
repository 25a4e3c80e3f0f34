//! Cloud Environments
//!
//! Maps logical service names to an endpoint and a token audience.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Service used when a URL matches no configured endpoint
pub const RESOURCE_MANAGER: &str = "resourceManager";

/// Endpoint and token audience of one cloud service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfiguration {
    pub endpoint: String,
    pub audience: String,
}

impl ServiceConfiguration {
    pub fn new(endpoint: &str, audience: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            audience: audience.to_string(),
        }
    }

    /// Endpoint without scheme or trailing slash, used for suffix matching
    pub fn host_suffix(&self) -> &str {
        let endpoint = self
            .endpoint
            .strip_prefix("https://")
            .or_else(|| self.endpoint.strip_prefix("http://"))
            .unwrap_or(&self.endpoint);
        endpoint.trim_end_matches('/')
    }

    /// OAuth scope for this service's audience
    pub fn scope(&self) -> String {
        format!("{}/.default", self.audience)
    }
}

/// Service name to endpoint/audience table for one cloud
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudConfiguration {
    pub services: BTreeMap<String, ServiceConfiguration>,
}

impl CloudConfiguration {
    /// Azure public cloud
    pub fn public() -> Self {
        Self::default()
            .with_service(
                RESOURCE_MANAGER,
                ServiceConfiguration::new(
                    "https://management.azure.com",
                    "https://management.core.windows.net/",
                ),
            )
            .with_service(
                "keyVault",
                ServiceConfiguration::new("https://vault.azure.net", "https://vault.azure.net"),
            )
            .with_service(
                "appConfiguration",
                ServiceConfiguration::new("https://azconfig.io", "https://azconfig.io"),
            )
    }

    /// Azure US Government cloud
    pub fn us_government() -> Self {
        Self::default()
            .with_service(
                RESOURCE_MANAGER,
                ServiceConfiguration::new(
                    "https://management.usgovcloudapi.net",
                    "https://management.core.usgovcloudapi.net",
                ),
            )
            .with_service(
                "keyVault",
                ServiceConfiguration::new(
                    "https://vault.usgovcloudapi.net",
                    "https://vault.usgovcloudapi.net",
                ),
            )
    }

    /// Azure China cloud
    pub fn china() -> Self {
        Self::default()
            .with_service(
                RESOURCE_MANAGER,
                ServiceConfiguration::new(
                    "https://management.chinacloudapi.cn",
                    "https://management.core.chinacloudapi.cn",
                ),
            )
            .with_service(
                "keyVault",
                ServiceConfiguration::new(
                    "https://vault.azure.cn",
                    "https://vault.azure.cn",
                ),
            )
    }

    /// Look up a preset by name (`public`, `usgovernment`, `china`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "public" | "azurecloud" => Some(Self::public()),
            "usgovernment" | "azureusgovernment" => Some(Self::us_government()),
            "china" | "azurechinacloud" => Some(Self::china()),
            _ => None,
        }
    }

    /// Add or replace a service
    pub fn with_service(mut self, name: &str, service: ServiceConfiguration) -> Self {
        self.services.insert(name.to_string(), service);
        self
    }

    pub fn service(&self, name: &str) -> Option<&ServiceConfiguration> {
        self.services.get(name)
    }

    /// Service name whose endpoint is a suffix of `authority` (`host[:port]`).
    ///
    /// The longest matching suffix wins; no match means [`RESOURCE_MANAGER`].
    pub fn resolve_service(&self, authority: &str) -> &str {
        self.services
            .iter()
            .filter(|(_, service)| {
                let suffix = service.host_suffix();
                !suffix.is_empty() && authority.ends_with(suffix)
            })
            .max_by_key(|(_, service)| service.host_suffix().len())
            .map(|(name, _)| name.as_str())
            .unwrap_or(RESOURCE_MANAGER)
    }
}
