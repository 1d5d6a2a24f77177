//! The Birst command web service RPC surface.
//!
//! [`RemoteServiceClient`] is a one-to-one mapping of the service operations;
//! [`SoapServiceClient`] implements it over HTTP.

use crate::config::BirstConfig;
use crate::error::{BirstError, Result};
use crate::soap::{
    parse_soap_response, CloudConnection, FileNode, SoapRequest, SoapResponse, SoapValue,
    StatusResult,
};
use crate::tls::{ProtocolSettings, SecurityProtocolContext, SecurityProtocols};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Relative path of the command web service under the base address.
pub const COMMAND_SERVICE_PATH: &str = "CommandWebservice.asmx";

/// Operations exposed by the Birst command web service.
#[async_trait]
pub trait RemoteServiceClient: Send + Sync {
    /// Raw `Login` call.
    async fn login(&self, username: &str, password: &str) -> Result<String>;

    /// `Login`, returning `None` when the service rejects the credentials.
    async fn get_login_token(&self, username: &str, password: &str) -> Result<Option<String>>;

    async fn get_directory_contents(&self, token: &str, space_id: &str, dir: &str) -> Result<FileNode>;

    async fn create_user(&self, token: &str, username: &str, additional_parameters: &str) -> Result<()>;

    async fn add_user_to_space(&self, token: &str, username: &str, space_id: &str, has_admin: bool) -> Result<()>;

    async fn add_user_to_group_in_space(
        &self,
        token: &str,
        username: &str,
        group_name: &str,
        space_id: &str,
    ) -> Result<()>;

    async fn add_product_to_user(&self, token: &str, username: &str, product_id: i64) -> Result<()>;

    async fn set_user_password(&self, token: &str, username: &str, password: &str) -> Result<()>;

    /// Starts staging the given connections; returns a job token.
    async fn extract_cloud_connector_data(
        &self,
        token: &str,
        space_id: &str,
        connections: &[CloudConnection],
    ) -> Result<String>;

    /// Starts processing the given groups; returns a job token.
    async fn publish_data(&self, token: &str, space_id: &str, processing_groups: &[String]) -> Result<String>;

    async fn is_job_complete(&self, token: &str, job_token: &str) -> Result<bool>;

    async fn get_job_status(&self, token: &str, job_token: &str) -> Result<StatusResult>;

    async fn list_groups_in_space(&self, token: &str, space_id: &str) -> Result<Vec<String>>;
}

/// SOAP-over-HTTP implementation of [`RemoteServiceClient`].
///
/// The endpoint is resolved on first use, so a client can be built before
/// the tenant is configured. Every call runs inside a
/// [`SecurityProtocolContext`] and uses an HTTP client built for the
/// protocol set that context installs.
pub struct SoapServiceClient {
    base_address: Option<Url>,
    endpoint: OnceLock<Url>,
    protocols: ProtocolSettings,
    timeout: Duration,
    user_agent: String,
    clients: Mutex<HashMap<SecurityProtocols, Client>>,
}

impl SoapServiceClient {
    pub fn new(config: &BirstConfig) -> Self {
        Self {
            base_address: config.base_address.clone(),
            endpoint: OnceLock::new(),
            protocols: ProtocolSettings::new(config.settings.baseline_protocols()),
            timeout: config.settings.request_timeout(),
            user_agent: config.settings.user_agent.clone(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Share a protocol holder with other transports of the same service.
    pub fn with_protocol_settings(mut self, protocols: ProtocolSettings) -> Self {
        self.protocols = protocols;
        self
    }

    pub fn protocol_settings(&self) -> &ProtocolSettings {
        &self.protocols
    }

    /// Protocol sets that HTTP clients have been built for.
    pub fn negotiated_protocols(&self) -> Vec<SecurityProtocols> {
        let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.keys().copied().collect()
    }

    fn endpoint(&self) -> Result<&Url> {
        if let Some(url) = self.endpoint.get() {
            return Ok(url);
        }
        let base = self.base_address.as_ref().ok_or_else(BirstError::not_configured)?;
        let url = base
            .join(COMMAND_SERVICE_PATH)
            .map_err(|e| BirstError::Config(format!("Invalid Birst base address: {e}")))?;
        Ok(self.endpoint.get_or_init(|| url))
    }

    fn client_for(&self, protocols: SecurityProtocols) -> Result<Client> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&protocols) {
            return Ok(client.clone());
        }

        let client = build_http_client(protocols, self.timeout, &self.user_agent, true)?;
        clients.insert(protocols, client.clone());
        Ok(client)
    }

    async fn call(&self, request: SoapRequest) -> Result<SoapResponse> {
        let endpoint = self.endpoint()?.clone();
        let context = SecurityProtocolContext::enter(&self.protocols);
        let client = self.client_for(context.protocols())?;

        debug!(
            operation = request.operation(),
            endpoint = %endpoint,
            "Calling Birst web service"
        );

        let response = client
            .post(endpoint)
            .header(CONTENT_TYPE, HeaderValue::from_static("text/xml; charset=utf-8"))
            .header("SOAPAction", request.soap_action())
            .body(request.to_envelope())
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        drop(context);

        // Faults arrive with HTTP 500, so the envelope is decoded first.
        match parse_soap_response(&body) {
            Ok(parsed) => Ok(parsed),
            Err(BirstError::Xml(_)) if !status.is_success() => Err(BirstError::Xml(format!(
                "{} failed with HTTP {status}",
                request.operation()
            ))),
            Err(e) => Err(e),
        }
    }
}

/// Build an HTTP client restricted to the given TLS versions.
pub(crate) fn build_http_client(
    protocols: SecurityProtocols,
    timeout: Duration,
    user_agent: &str,
    cookie_store: bool,
) -> Result<Client> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .cookie_store(cookie_store);

    if let Some(min) = protocols.min_version() {
        builder = builder.min_tls_version(min);
    }
    if let Some(max) = protocols.max_version() {
        builder = builder.max_tls_version(max);
    }

    builder
        .build()
        .map_err(|e| BirstError::Config(format!("Failed to build HTTP client: {e}")))
}

#[async_trait]
impl RemoteServiceClient for SoapServiceClient {
    async fn login(&self, username: &str, password: &str) -> Result<String> {
        let request = SoapRequest::new("Login")
            .param("username", username)
            .param("password", password);
        Ok(self.call(request).await?.text("Login"))
    }

    async fn get_login_token(&self, username: &str, password: &str) -> Result<Option<String>> {
        match self.login(username, password).await {
            Ok(token) => Ok(Some(token)),
            Err(BirstError::Fault(fault)) if fault.is_login_failure() => {
                warn!(reason = %fault.message, "Birst rejected the login");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_directory_contents(&self, token: &str, space_id: &str, dir: &str) -> Result<FileNode> {
        let request = SoapRequest::new("getDirectoryContents")
            .param("token", token)
            .param("spaceID", space_id)
            .param("dir", dir);
        self.call(request).await?.file_node("getDirectoryContents")
    }

    async fn create_user(&self, token: &str, username: &str, additional_parameters: &str) -> Result<()> {
        let request = SoapRequest::new("addUser")
            .param("token", token)
            .param("userName", username)
            .param("additionalParams", additional_parameters);
        self.call(request).await.map(|_| ())
    }

    async fn add_user_to_space(&self, token: &str, username: &str, space_id: &str, has_admin: bool) -> Result<()> {
        let request = SoapRequest::new("addUserToSpace")
            .param("token", token)
            .param("userName", username)
            .param("spaceID", space_id)
            .param("hasAdmin", has_admin);
        self.call(request).await.map(|_| ())
    }

    async fn add_user_to_group_in_space(
        &self,
        token: &str,
        username: &str,
        group_name: &str,
        space_id: &str,
    ) -> Result<()> {
        let request = SoapRequest::new("addUserToGroupInSpace")
            .param("token", token)
            .param("userName", username)
            .param("groupName", group_name)
            .param("spaceID", space_id);
        self.call(request).await.map(|_| ())
    }

    async fn add_product_to_user(&self, token: &str, username: &str, product_id: i64) -> Result<()> {
        let request = SoapRequest::new("addProductToUser")
            .param("token", token)
            .param("userName", username)
            .param("productID", product_id);
        self.call(request).await.map(|_| ())
    }

    async fn set_user_password(&self, token: &str, username: &str, password: &str) -> Result<()> {
        let request = SoapRequest::new("setUserPassword")
            .param("token", token)
            .param("userName", username)
            .param("password", password);
        self.call(request).await.map(|_| ())
    }

    async fn extract_cloud_connector_data(
        &self,
        token: &str,
        space_id: &str,
        connections: &[CloudConnection],
    ) -> Result<String> {
        let request = SoapRequest::new("extractCloudConnectorData")
            .param("token", token)
            .param("spaceID", space_id)
            .param("connections", SoapValue::Connections(connections.to_vec()));
        Ok(self.call(request).await?.text("extractCloudConnectorData"))
    }

    async fn publish_data(&self, token: &str, space_id: &str, processing_groups: &[String]) -> Result<String> {
        // The date sets the processing date; Birst expects the current UTC time.
        let request = SoapRequest::new("publishData")
            .param("token", token)
            .param("spaceID", space_id)
            .param("subgroups", SoapValue::Strings(processing_groups.to_vec()))
            .param("date", Utc::now());
        Ok(self.call(request).await?.text("publishData"))
    }

    async fn is_job_complete(&self, token: &str, job_token: &str) -> Result<bool> {
        let request = SoapRequest::new("isJobComplete")
            .param("token", token)
            .param("jobToken", job_token);
        self.call(request).await?.boolean("isJobComplete")
    }

    async fn get_job_status(&self, token: &str, job_token: &str) -> Result<StatusResult> {
        let request = SoapRequest::new("getJobStatus")
            .param("token", token)
            .param("jobToken", job_token);
        self.call(request).await?.status("getJobStatus")
    }

    async fn list_groups_in_space(&self, token: &str, space_id: &str) -> Result<Vec<String>> {
        let request = SoapRequest::new("listGroupsInSpace")
            .param("token", token)
            .param("spaceID", space_id);
        Ok(self.call(request).await?.strings("listGroupsInSpace"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::TlsProtocol;

    #[test]
    fn test_endpoint_requires_base_address() {
        let client = SoapServiceClient::new(&BirstConfig::default());
        assert!(matches!(client.endpoint(), Err(BirstError::Config(_))));
    }

    #[test]
    fn test_endpoint_is_relative_to_base_address() {
        let config = BirstConfig {
            base_address: Some(Url::parse("https://app2102.bws.birst.com/").unwrap()),
            ..Default::default()
        };
        let client = SoapServiceClient::new(&config);
        assert_eq!(
            client.endpoint().unwrap().as_str(),
            "https://app2102.bws.birst.com/CommandWebservice.asmx"
        );
    }

    #[test]
    fn test_shares_protocol_settings() {
        let shared = ProtocolSettings::new(TlsProtocol::Tls1_1.into());
        let client = SoapServiceClient::new(&BirstConfig::default()).with_protocol_settings(shared.clone());

        let _context = SecurityProtocolContext::enter(&shared);
        assert!(client.protocol_settings().get().contains(TlsProtocol::Tls1_2));
    }

    #[test]
    fn test_http_clients_cached_per_protocol_set() {
        let client = SoapServiceClient::new(&BirstConfig::default());
        let protocols = client.protocol_settings().get() | TlsProtocol::Tls1_2;
        client.client_for(protocols).unwrap();
        client.client_for(protocols).unwrap();
        assert_eq!(client.clients.lock().unwrap().len(), 1);
    }
}
