//! Birst administration client
//!
//! Authenticated access to the Birst command web service: user management,
//! data extraction and publishing jobs, and SSO token generation.
//!
//! # Features
//!
//! - Per-call authentication with classification of rejected logins
//! - User creation with space access, optional group membership and product grant
//! - Start-then-poll job runner with cancellation
//! - SSO token retrieval from the token generator endpoint
//! - Scoped TLS protocol negotiation around every network call
//!
//! # Example
//!
//! ```ignore
//! use birst_admin::{BirstAdminService, BirstConfig, run_publish_data_job};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = BirstConfig::from_yaml_str(&yaml)?;
//! config.ensure_configured()?;
//! let interval = config.settings.polling_interval();
//! let admin = Arc::new(BirstAdminService::from_config(config));
//! run_publish_data_job(admin, "space-id", vec!["Sales".into()], interval, CancellationToken::new()).await?;
//! ```

pub mod admin;
pub mod config;
pub mod error;
pub mod job;
pub mod remote;
pub mod soap;
pub mod tls;

pub use admin::{AdminService, BirstAdminService, SharedAdminService, BIRST_SERVICE_PRODUCT_ID};
pub use config::{BirstConfig, ClientSettings};
pub use error::{BirstError, Result, SoapFault};
pub use job::{run_extract_cloud_connector_data_job, run_publish_data_job, JobRunner, JobState};
pub use remote::{RemoteServiceClient, SoapServiceClient};
pub use soap::{CloudConnection, FileNode, StatusResult};
pub use tls::{ProtocolSettings, SecurityProtocolContext, SecurityProtocols, TlsProtocol};
