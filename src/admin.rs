//! High-level Birst administration operations.
//!
//! Every operation authenticates against the web service on its own; no
//! session token is kept between calls.

use crate::config::BirstConfig;
use crate::error::{BirstError, Result};
use crate::remote::{build_http_client, RemoteServiceClient, SoapServiceClient};
use crate::soap::{CloudConnection, FileNode, StatusResult};
use crate::tls::{ProtocolSettings, SecurityProtocolContext};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// ID of the Birst web service product granted to created users.
pub const BIRST_SERVICE_PRODUCT_ID: i64 = 11;

/// Relative path of the SSO token generator under the base address.
pub const TOKEN_GENERATOR_PATH: &str = "tokengenerator.aspx";

const AUTHENTICATION_FAILED: &str = "Can't authenticate to Birst. Either the current user doesn't have a Birst account configured or there is no access to the Birst web service.";

/// Operations against the Birst administration API.
#[async_trait]
pub trait AdminService: Send + Sync {
    /// Create a user, give it admin access to the configured space, add it to
    /// the configured group (if any) and grant the web service product.
    ///
    /// The steps are not transactional: if a later step fails, the user and
    /// any access already granted remain on the service.
    async fn create_user(&self, login: &str, password: &str) -> Result<()>;

    async fn set_user_password(&self, login: &str, password: &str) -> Result<()>;

    /// Start staging the given connections. Returns a job token to poll.
    async fn extract_cloud_connector_data(&self, space_id: &str, connections: &[CloudConnection]) -> Result<String>;

    /// Start processing the given processing groups. Returns a job token to poll.
    async fn publish_data(&self, space_id: &str, processing_groups: &[String]) -> Result<String>;

    async fn is_job_complete(&self, job_token: &str) -> Result<bool>;

    /// Status of a job. A SOAP fault from the status call is reported as a
    /// `Failed` status carrying the fault message.
    async fn get_job_status(&self, job_token: &str) -> Result<StatusResult>;

    async fn list_groups_in_space(&self, space_id: &str) -> Result<Vec<String>>;

    async fn get_directory_contents(&self, space_id: &str, dir: &str) -> Result<FileNode>;

    /// SSO token for the configured space, SSO password and user email.
    async fn get_sso_token(&self) -> Result<Option<String>>;

    /// SSO token for explicit credentials. `Ok(None)` when the token
    /// generator answers with a non-success status.
    async fn get_sso_token_for(
        &self,
        space_id: Option<&str>,
        sso_password: Option<&str>,
        username: Option<&str>,
    ) -> Result<Option<String>>;
}

/// Shared handle to an admin service.
pub type SharedAdminService = Arc<dyn AdminService>;

/// [`AdminService`] backed by a [`RemoteServiceClient`].
pub struct BirstAdminService {
    config: Arc<BirstConfig>,
    remote: Arc<dyn RemoteServiceClient>,
    protocols: ProtocolSettings,
}

impl BirstAdminService {
    pub fn new(config: Arc<BirstConfig>, remote: Arc<dyn RemoteServiceClient>) -> Self {
        let protocols = ProtocolSettings::new(config.settings.baseline_protocols());
        Self::with_protocol_settings(config, remote, protocols)
    }

    /// Build a service whose SSO requests use `protocols`, normally the
    /// settings also held by `remote`.
    pub fn with_protocol_settings(
        config: Arc<BirstConfig>,
        remote: Arc<dyn RemoteServiceClient>,
        protocols: ProtocolSettings,
    ) -> Self {
        Self {
            config,
            remote,
            protocols,
        }
    }

    /// Build a service talking SOAP to the configured base address. The SOAP
    /// client and the SSO request share one [`ProtocolSettings`].
    pub fn from_config(config: BirstConfig) -> Self {
        let protocols = ProtocolSettings::new(config.settings.baseline_protocols());
        let remote = SoapServiceClient::new(&config).with_protocol_settings(protocols.clone());
        Self::with_protocol_settings(Arc::new(config), Arc::new(remote), protocols)
    }

    pub fn config(&self) -> &BirstConfig {
        &self.config
    }

    pub fn protocol_settings(&self) -> &ProtocolSettings {
        &self.protocols
    }

    async fn login(&self) -> Result<String> {
        let token = self
            .remote
            .get_login_token(&self.config.email, &self.config.user_password)
            .await?;

        match token {
            Some(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(BirstError::Authentication(AUTHENTICATION_FAILED.to_string())),
        }
    }

    fn space_id(&self) -> Result<&str> {
        self.config
            .space_id
            .as_deref()
            .ok_or_else(BirstError::not_configured)
    }
}

#[async_trait]
impl AdminService for BirstAdminService {
    async fn create_user(&self, login: &str, password: &str) -> Result<()> {
        let token = self.login().await?;
        let space_id = self.space_id()?;

        self.remote
            .create_user(&token, login, &format!("password={password}"))
            .await?;

        // Admin access is required to enumerate dashboards.
        self.remote.add_user_to_space(&token, login, space_id, true).await?;

        if let Some(group) = self.config.group() {
            self.remote
                .add_user_to_group_in_space(&token, login, group, space_id)
                .await?;
        }

        self.remote
            .add_product_to_user(&token, login, BIRST_SERVICE_PRODUCT_ID)
            .await?;

        info!(user = %login, space_id = %space_id, "Created Birst user");
        Ok(())
    }

    async fn set_user_password(&self, login: &str, password: &str) -> Result<()> {
        let token = self.login().await?;
        self.remote.set_user_password(&token, login, password).await
    }

    async fn extract_cloud_connector_data(&self, space_id: &str, connections: &[CloudConnection]) -> Result<String> {
        let token = self.login().await?;
        self.remote
            .extract_cloud_connector_data(&token, space_id, connections)
            .await
    }

    async fn publish_data(&self, space_id: &str, processing_groups: &[String]) -> Result<String> {
        let token = self.login().await?;
        self.remote.publish_data(&token, space_id, processing_groups).await
    }

    async fn is_job_complete(&self, job_token: &str) -> Result<bool> {
        let token = self.login().await?;
        self.remote.is_job_complete(&token, job_token).await
    }

    async fn get_job_status(&self, job_token: &str) -> Result<StatusResult> {
        let token = self.login().await?;
        match self.remote.get_job_status(&token, job_token).await {
            Err(BirstError::Fault(fault)) => {
                warn!(job_token = %job_token, fault = %fault.message, "Job status call faulted");
                Ok(StatusResult::new("Failed", fault.message))
            }
            other => other,
        }
    }

    async fn list_groups_in_space(&self, space_id: &str) -> Result<Vec<String>> {
        let token = self.login().await?;
        self.remote.list_groups_in_space(&token, space_id).await
    }

    async fn get_directory_contents(&self, space_id: &str, dir: &str) -> Result<FileNode> {
        let token = self.login().await?;
        self.remote.get_directory_contents(&token, space_id, dir).await
    }

    async fn get_sso_token(&self) -> Result<Option<String>> {
        self.get_sso_token_for(
            self.config.space_id.as_deref(),
            self.config.sso_password.as_deref(),
            Some(self.config.email.as_str()),
        )
        .await
    }

    async fn get_sso_token_for(
        &self,
        space_id: Option<&str>,
        sso_password: Option<&str>,
        username: Option<&str>,
    ) -> Result<Option<String>> {
        let space_id = space_id.ok_or_else(|| missing_argument("space_id"))?;
        let sso_password = sso_password.ok_or_else(|| missing_argument("sso_password"))?;
        let username = username.ok_or_else(|| missing_argument("username"))?;

        let base = self
            .config
            .base_address
            .as_ref()
            .ok_or_else(BirstError::not_configured)?;
        let url = base
            .join(TOKEN_GENERATOR_PATH)
            .map_err(|e| BirstError::Config(format!("Invalid Birst base address: {e}")))?;

        let form = [
            ("birst.spaceId", space_id),
            ("birst.ssopassword", sso_password),
            ("birst.username", username),
        ];

        let context = SecurityProtocolContext::enter(&self.protocols);
        let client = build_http_client(
            context.protocols(),
            self.config.settings.request_timeout(),
            &self.config.settings.user_agent,
            false,
        )?;

        debug!(url = %url, username = %username, "Requesting Birst SSO token");
        let response = client.post(url).form(&form).send().await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "Birst token generator returned an error status");
            return Ok(None);
        }

        Ok(Some(response.text().await?))
    }
}

fn missing_argument(name: &str) -> BirstError {
    BirstError::InvalidArgument(format!("{name} must be provided"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SoapFault;
    use std::sync::Mutex;
    use url::Url;

    /// Records every remote call; login and status behaviour are scripted.
    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<String>>,
        login_token: Option<String>,
        status: Option<std::result::Result<StatusResult, SoapFault>>,
        fail_on: Option<&'static str>,
    }

    impl RecordingClient {
        fn authenticated() -> Self {
            Self {
                login_token: Some("auth-token".to_string()),
                ..Default::default()
            }
        }

        fn record(&self, call: String) -> Result<()> {
            let name = call.split('(').next().unwrap_or_default().to_string();
            self.calls.lock().unwrap().push(call);
            if self.fail_on == Some(name.as_str()) {
                return Err(BirstError::Fault(SoapFault::new("soap:Server", "Server error")));
            }
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteServiceClient for RecordingClient {
        async fn login(&self, _username: &str, _password: &str) -> Result<String> {
            unreachable!("admin service goes through get_login_token")
        }

        async fn get_login_token(&self, username: &str, password: &str) -> Result<Option<String>> {
            self.record(format!("get_login_token({username},{password})"))?;
            Ok(self.login_token.clone())
        }

        async fn get_directory_contents(&self, token: &str, space_id: &str, dir: &str) -> Result<FileNode> {
            self.record(format!("get_directory_contents({token},{space_id},{dir})"))?;
            Ok(FileNode {
                name: dir.to_string(),
                ..Default::default()
            })
        }

        async fn create_user(&self, token: &str, username: &str, additional_parameters: &str) -> Result<()> {
            self.record(format!("create_user({token},{username},{additional_parameters})"))
        }

        async fn add_user_to_space(&self, token: &str, username: &str, space_id: &str, has_admin: bool) -> Result<()> {
            self.record(format!("add_user_to_space({token},{username},{space_id},{has_admin})"))
        }

        async fn add_user_to_group_in_space(
            &self,
            token: &str,
            username: &str,
            group_name: &str,
            space_id: &str,
        ) -> Result<()> {
            self.record(format!(
                "add_user_to_group_in_space({token},{username},{group_name},{space_id})"
            ))
        }

        async fn add_product_to_user(&self, token: &str, username: &str, product_id: i64) -> Result<()> {
            self.record(format!("add_product_to_user({token},{username},{product_id})"))
        }

        async fn set_user_password(&self, token: &str, username: &str, password: &str) -> Result<()> {
            self.record(format!("set_user_password({token},{username},{password})"))
        }

        async fn extract_cloud_connector_data(
            &self,
            token: &str,
            space_id: &str,
            connections: &[CloudConnection],
        ) -> Result<String> {
            self.record(format!(
                "extract_cloud_connector_data({token},{space_id},{})",
                connections.len()
            ))?;
            Ok("extract-job".to_string())
        }

        async fn publish_data(&self, token: &str, space_id: &str, processing_groups: &[String]) -> Result<String> {
            self.record(format!(
                "publish_data({token},{space_id},{})",
                processing_groups.join("|")
            ))?;
            Ok("publish-job".to_string())
        }

        async fn is_job_complete(&self, token: &str, job_token: &str) -> Result<bool> {
            self.record(format!("is_job_complete({token},{job_token})"))?;
            Ok(true)
        }

        async fn get_job_status(&self, token: &str, job_token: &str) -> Result<StatusResult> {
            self.record(format!("get_job_status({token},{job_token})"))?;
            match self.status.clone() {
                Some(Ok(status)) => Ok(status),
                Some(Err(fault)) => Err(BirstError::Fault(fault)),
                None => Ok(StatusResult::new("Complete", "")),
            }
        }

        async fn list_groups_in_space(&self, token: &str, space_id: &str) -> Result<Vec<String>> {
            self.record(format!("list_groups_in_space({token},{space_id})"))?;
            Ok(vec!["OWNER$".to_string()])
        }
    }

    fn config(group_in_space: Option<&str>) -> BirstConfig {
        BirstConfig {
            base_address: Some(Url::parse("https://birst.example.com/").unwrap()),
            space_id: Some("space-1".to_string()),
            group_in_space: group_in_space.map(str::to_string),
            sso_password: Some("sso".to_string()),
            email: "admin@example.com".to_string(),
            user_password: "secret".to_string(),
            ..Default::default()
        }
    }

    fn service(config: BirstConfig, remote: Arc<RecordingClient>) -> BirstAdminService {
        BirstAdminService::new(Arc::new(config), remote)
    }

    #[tokio::test]
    async fn test_create_user_without_group() {
        for group in [None, Some(""), Some("   ")] {
            let remote = Arc::new(RecordingClient::authenticated());
            let admin = service(config(group), remote.clone());

            admin.create_user("jane@example.com", "pa55word").await.unwrap();

            assert_eq!(
                remote.calls(),
                vec![
                    "get_login_token(admin@example.com,secret)",
                    "create_user(auth-token,jane@example.com,password=pa55word)",
                    "add_user_to_space(auth-token,jane@example.com,space-1,true)",
                    "add_product_to_user(auth-token,jane@example.com,11)",
                ]
            );
        }
    }

    #[tokio::test]
    async fn test_create_user_with_group() {
        let remote = Arc::new(RecordingClient::authenticated());
        let admin = service(config(Some("Report Viewers")), remote.clone());

        admin.create_user("jane@example.com", "pa55word").await.unwrap();

        let calls = remote.calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(
            calls[3],
            "add_user_to_group_in_space(auth-token,jane@example.com,Report Viewers,space-1)"
        );
        assert_eq!(calls[4], "add_product_to_user(auth-token,jane@example.com,11)");
    }

    #[tokio::test]
    async fn test_create_user_leaves_earlier_steps_on_failure() {
        let remote = Arc::new(RecordingClient {
            fail_on: Some("add_user_to_group_in_space"),
            ..RecordingClient::authenticated()
        });
        let admin = service(config(Some("Analysts")), remote.clone());

        let result = admin.create_user("jane@example.com", "pa55word").await;

        assert!(matches!(result, Err(BirstError::Fault(_))));
        let calls = remote.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[1].starts_with("create_user("));
        assert!(calls[2].starts_with("add_user_to_space("));
        assert!(!calls.iter().any(|c| c.starts_with("add_product_to_user(")));
    }

    #[tokio::test]
    async fn test_operations_fail_without_token() {
        for token in [None, Some(String::new()), Some("  ".to_string())] {
            let remote = Arc::new(RecordingClient {
                login_token: token,
                ..Default::default()
            });
            let admin = service(config(Some("Analysts")), remote.clone());

            assert!(matches!(
                admin.create_user("jane@example.com", "pa55word").await,
                Err(BirstError::Authentication(_))
            ));
            assert!(matches!(
                admin.set_user_password("jane@example.com", "pa55word").await,
                Err(BirstError::Authentication(_))
            ));
            assert!(matches!(
                admin.extract_cloud_connector_data("space-1", &[]).await,
                Err(BirstError::Authentication(_))
            ));
            assert!(matches!(
                admin.publish_data("space-1", &["Sales".to_string()]).await,
                Err(BirstError::Authentication(_))
            ));
            assert!(matches!(
                admin.get_job_status("job-1").await,
                Err(BirstError::Authentication(_))
            ));

            assert!(remote.calls().iter().all(|c| c.starts_with("get_login_token(")));
            assert_eq!(remote.calls().len(), 5);
        }
    }

    #[tokio::test]
    async fn test_set_user_password() {
        let remote = Arc::new(RecordingClient::authenticated());
        let admin = service(config(None), remote.clone());

        admin.set_user_password("jane@example.com", "n3wpass").await.unwrap();

        assert_eq!(
            remote.calls()[1],
            "set_user_password(auth-token,jane@example.com,n3wpass)"
        );
    }

    #[tokio::test]
    async fn test_job_start_operations_return_job_token() {
        let remote = Arc::new(RecordingClient::authenticated());
        let admin = service(config(None), remote.clone());

        let connection = CloudConnection {
            connection_type: "salesforce".to_string(),
            connection_name: "CRM".to_string(),
        };
        let extract = admin
            .extract_cloud_connector_data("space-9", &[connection])
            .await
            .unwrap();
        let publish = admin
            .publish_data("space-9", &["Sales".to_string(), "Finance".to_string()])
            .await
            .unwrap();

        assert_eq!(extract, "extract-job");
        assert_eq!(publish, "publish-job");
        let calls = remote.calls();
        assert_eq!(calls[1], "extract_cloud_connector_data(auth-token,space-9,1)");
        assert_eq!(calls[3], "publish_data(auth-token,space-9,Sales|Finance)");
    }

    #[tokio::test]
    async fn test_get_job_status_converts_fault() {
        let remote = Arc::new(RecordingClient {
            status: Some(Err(SoapFault::new("soap:Server", "Oops"))),
            ..RecordingClient::authenticated()
        });
        let admin = service(config(None), remote);

        let status = admin.get_job_status("job-1").await.unwrap();
        assert_eq!(status, StatusResult::new("Failed", "Oops"));
    }

    #[tokio::test]
    async fn test_get_job_status_passes_status_through() {
        let remote = Arc::new(RecordingClient {
            status: Some(Ok(StatusResult::new("failed", "Space locked"))),
            ..RecordingClient::authenticated()
        });
        let admin = service(config(None), remote);

        let status = admin.get_job_status("job-1").await.unwrap();
        assert_eq!(status, StatusResult::new("failed", "Space locked"));
    }

    #[tokio::test]
    async fn test_only_status_converts_faults() {
        let remote = Arc::new(RecordingClient {
            fail_on: Some("is_job_complete"),
            ..RecordingClient::authenticated()
        });
        let admin = service(config(None), remote);

        assert!(matches!(
            admin.is_job_complete("job-1").await,
            Err(BirstError::Fault(_))
        ));
    }

    #[tokio::test]
    async fn test_listing_operations_authenticate() {
        let remote = Arc::new(RecordingClient::authenticated());
        let admin = service(config(None), remote.clone());

        assert_eq!(admin.list_groups_in_space("space-1").await.unwrap(), vec!["OWNER$"]);
        assert_eq!(
            admin.get_directory_contents("space-1", "shared").await.unwrap().name,
            "shared"
        );
        assert_eq!(
            remote.calls(),
            vec![
                "get_login_token(admin@example.com,secret)",
                "list_groups_in_space(auth-token,space-1)",
                "get_login_token(admin@example.com,secret)",
                "get_directory_contents(auth-token,space-1,shared)",
            ]
        );
    }

    #[tokio::test]
    async fn test_sso_token_rejects_missing_arguments() {
        let remote = Arc::new(RecordingClient::authenticated());
        let admin = service(config(None), remote.clone());

        let cases = [
            (None, Some("pw"), Some("user")),
            (Some("space"), None, Some("user")),
            (Some("space"), Some("pw"), None),
        ];
        for (space_id, password, username) in cases {
            let result = admin.get_sso_token_for(space_id, password, username).await;
            assert!(matches!(result, Err(BirstError::InvalidArgument(_))));
        }
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_config_driven_sso_token_requires_space() {
        let remote = Arc::new(RecordingClient::authenticated());
        let admin = service(
            BirstConfig {
                space_id: None,
                ..config(None)
            },
            remote,
        );

        assert!(matches!(
            admin.get_sso_token().await,
            Err(BirstError::InvalidArgument(_))
        ));
    }
}
