//! Terraform Cloud / Enterprise API surface used by the backend.
//!
//! The backend only talks to the platform through [`TerraformApi`]; the
//! production implementation is [`http::HttpTerraformClient`]. A
//! [`ClientFactory`] builds a client from the persisted connection settings
//! so the cached handle can be rebuilt whenever the configuration changes.

pub mod http;
pub mod models;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::{HttpClientFactory, HttpTerraformClient};

pub const DEFAULT_ADDRESS: &str = "https://app.terraform.io";
pub const DEFAULT_BASE_PATH: &str = "/api/v2/";

#[derive(Debug, Error)]
pub enum TfcError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("unauthorized: the configured token was rejected")]
    Unauthorized,

    #[error("rate limited by the remote API")]
    RateLimited,

    #[error("remote API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode remote response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
}

impl TfcError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TfcError::NotFound(_))
    }
}

/// An API token as returned by the platform. `token` is only populated on
/// creation; reads return the metadata alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerraformToken {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenCreateOptions {
    pub description: Option<String>,
    pub expired_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamCreateOptions {
    pub name: String,
    pub visibility: Option<String>,
    pub organization_access: BTreeMap<String, bool>,
}

/// Connection settings a client is built from.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub address: String,
    pub base_path: String,
    pub token: String,
}

impl std::fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSettings")
            .field("address", &self.address)
            .field("base_path", &self.base_path)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait TerraformApi: Send + Sync {
    async fn read_organization(&self, organization: &str) -> Result<(), TfcError>;

    /// Create the organization token, replacing (and invalidating) any existing one.
    async fn create_organization_token(
        &self,
        organization: &str,
        opts: TokenCreateOptions,
    ) -> Result<TerraformToken, TfcError>;
    async fn read_organization_token(&self, organization: &str) -> Result<TerraformToken, TfcError>;
    async fn delete_organization_token(&self, organization: &str) -> Result<(), TfcError>;

    async fn read_team(&self, team_id: &str) -> Result<Team, TfcError>;
    async fn create_team(&self, organization: &str, opts: TeamCreateOptions) -> Result<Team, TfcError>;
    /// Delete a team; its tokens go with it.
    async fn delete_team(&self, team_id: &str) -> Result<(), TfcError>;

    /// Legacy single team token. Creating one invalidates the previous token.
    async fn create_team_token(&self, team_id: &str) -> Result<TerraformToken, TfcError>;
    async fn read_team_token(&self, team_id: &str) -> Result<TerraformToken, TfcError>;
    async fn delete_team_token(&self, team_id: &str) -> Result<(), TfcError>;

    /// One of many concurrently valid team tokens.
    async fn create_team_token_with_options(
        &self,
        team_id: &str,
        opts: TokenCreateOptions,
    ) -> Result<TerraformToken, TfcError>;
    async fn delete_team_token_by_id(&self, token_id: &str) -> Result<(), TfcError>;

    async fn create_user_token(
        &self,
        user_id: &str,
        opts: TokenCreateOptions,
    ) -> Result<TerraformToken, TfcError>;
    async fn delete_user_token(&self, token_id: &str) -> Result<(), TfcError>;
}

/// Builds API clients from connection settings.
pub trait ClientFactory: Send + Sync {
    fn build(&self, settings: &ClientSettings) -> Result<Arc<dyn TerraformApi>, TfcError>;
}
