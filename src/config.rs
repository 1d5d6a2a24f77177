//! Configuration types for the Birst administration client.

use crate::error::{BirstError, Result};
use crate::tls::{SecurityProtocols, TlsProtocol};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Birst settings for the current tenant and user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BirstConfig {
    /// Base URI of the Birst deployment, e.g. `https://app.birst.com/`
    pub base_address: Option<Url>,

    /// Space ID for the current tenant
    pub space_id: Option<String>,

    /// Group new users are added to within the space (optional)
    pub group_in_space: Option<String>,

    /// SSO password for the current tenant
    pub sso_password: Option<String>,

    /// Email address of the account used to call the web service
    pub email: String,

    /// Birst password of that account
    pub user_password: String,

    /// Base email address for created users
    pub base_email_address: String,

    /// Client behaviour
    pub settings: ClientSettings,
}

impl Default for BirstConfig {
    fn default() -> Self {
        Self {
            base_address: None,
            space_id: None,
            group_in_space: None,
            sso_password: None,
            email: String::new(),
            user_password: String::new(),
            base_email_address: String::new(),
            settings: ClientSettings::default(),
        }
    }
}

impl BirstConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| BirstError::Config(format!("Invalid configuration: {e}")))
    }

    /// Fails unless base address, space ID and SSO password are all set.
    ///
    /// Nothing calls this implicitly; bootstrap code must invoke it before
    /// building services from the configuration.
    pub fn ensure_configured(&self) -> Result<()> {
        if self.base_address.is_none()
            || is_blank(self.space_id.as_deref())
            || is_blank(self.sso_password.as_deref())
        {
            return Err(BirstError::not_configured());
        }
        Ok(())
    }

    /// The group to add new users to, if one is configured.
    pub fn group(&self) -> Option<&str> {
        self.group_in_space
            .as_deref()
            .filter(|group| !group.trim().is_empty())
    }
}

/// Client behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Seconds between job completion checks
    pub polling_interval_secs: u64,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Baseline allowed TLS versions, widened per call to include TLS 1.2
    pub security_protocols: Vec<TlsProtocol>,

    /// User-Agent sent with every request
    pub user_agent: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            polling_interval_secs: 10,
            request_timeout_secs: 100,
            security_protocols: vec![TlsProtocol::Tls1_0, TlsProtocol::Tls1_1],
            user_agent: concat!("birst-admin/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientSettings {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn baseline_protocols(&self) -> SecurityProtocols {
        self.security_protocols.iter().copied().collect()
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}
