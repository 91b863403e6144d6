//! Terraform Cloud / Enterprise client speaking JSON:API over HTTPS.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use super::models::{self, Document, ErrorDocument, TeamAttributes, TokenAttributes};
use super::{
    ClientFactory, ClientSettings, Team, TeamCreateOptions, TerraformApi, TerraformToken, TfcError,
    TokenCreateOptions,
};

const JSON_API: &str = "application/vnd.api+json";

/// API client bound to one management token.
pub struct HttpTerraformClient {
    http: Client,
    base: Url,
    token: String,
}

impl HttpTerraformClient {
    pub fn new(settings: &ClientSettings, timeout: Duration) -> Result<Self, TfcError> {
        if settings.token.is_empty() {
            return Err(TfcError::InvalidConfig("management token is empty".into()));
        }

        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            http,
            base: base_url(&settings.address, &settings.base_path)?,
            token: settings.token.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Send a request and return the raw body of a 2xx response.
    async fn call(&self, method: Method, endpoint: &str, body: Option<Value>) -> Result<String, TfcError> {
        let url = self
            .base
            .join(endpoint)
            .map_err(|e| TfcError::InvalidConfig(format!("bad endpoint '{}': {}", endpoint, e)))?;

        let mut req = self
            .http
            .request(method.clone(), url)
            .bearer_auth(&self.token)
            .header(ACCEPT, JSON_API);

        if let Some(body) = body {
            req = req
                .header(CONTENT_TYPE, JSON_API)
                .body(serde_json::to_vec(&body)?);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        if status.is_success() {
            return Ok(text);
        }

        tracing::debug!(%method, endpoint, status = %status, "remote API call failed");

        Err(match status.as_u16() {
            401 | 403 => TfcError::Unauthorized,
            404 => TfcError::NotFound(endpoint.to_string()),
            429 => TfcError::RateLimited,
            code => TfcError::Api {
                status: code,
                message: serde_json::from_str::<ErrorDocument>(&text)
                    .ok()
                    .and_then(|d| d.message())
                    .unwrap_or(text),
            },
        })
    }

    async fn get_doc<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Document<T>, TfcError> {
        let text = self.call(Method::GET, endpoint, None).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn post_doc<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<Document<T>, TfcError> {
        let text = self.call(Method::POST, endpoint, body).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn delete(&self, endpoint: &str) -> Result<(), TfcError> {
        self.call(Method::DELETE, endpoint, None).await.map(|_| ())
    }
}

fn base_url(address: &str, base_path: &str) -> Result<Url, TfcError> {
    let address = Url::parse(address)
        .map_err(|e| TfcError::InvalidConfig(format!("invalid address '{}': {}", address, e)))?;
    let trimmed = base_path.trim_matches('/');
    let path = if trimmed.is_empty() { "/".to_string() } else { format!("/{}/", trimmed) };
    address
        .join(&path)
        .map_err(|e| TfcError::InvalidConfig(format!("invalid base_path '{}': {}", base_path, e)))
}

fn seg(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

#[async_trait]
impl TerraformApi for HttpTerraformClient {
    async fn read_organization(&self, organization: &str) -> Result<(), TfcError> {
        self.call(Method::GET, &format!("organizations/{}", seg(organization)), None)
            .await
            .map(|_| ())
    }

    async fn create_organization_token(
        &self,
        organization: &str,
        opts: TokenCreateOptions,
    ) -> Result<TerraformToken, TfcError> {
        let endpoint = format!("organizations/{}/authentication-token", seg(organization));
        let doc: Document<TokenAttributes> =
            self.post_doc(&endpoint, Some(models::token_request(&opts))).await?;
        Ok(doc.data.into())
    }

    async fn read_organization_token(&self, organization: &str) -> Result<TerraformToken, TfcError> {
        let endpoint = format!("organizations/{}/authentication-token", seg(organization));
        let doc: Document<TokenAttributes> = self.get_doc(&endpoint).await?;
        Ok(doc.data.into())
    }

    async fn delete_organization_token(&self, organization: &str) -> Result<(), TfcError> {
        self.delete(&format!("organizations/{}/authentication-token", seg(organization)))
            .await
    }

    async fn read_team(&self, team_id: &str) -> Result<Team, TfcError> {
        let doc: Document<TeamAttributes> = self.get_doc(&format!("teams/{}", seg(team_id))).await?;
        Ok(doc.data.into())
    }

    async fn create_team(&self, organization: &str, opts: TeamCreateOptions) -> Result<Team, TfcError> {
        let endpoint = format!("organizations/{}/teams", seg(organization));
        let doc: Document<TeamAttributes> =
            self.post_doc(&endpoint, Some(models::team_request(&opts))).await?;
        Ok(doc.data.into())
    }

    async fn delete_team(&self, team_id: &str) -> Result<(), TfcError> {
        self.delete(&format!("teams/{}", seg(team_id))).await
    }

    async fn create_team_token(&self, team_id: &str) -> Result<TerraformToken, TfcError> {
        let endpoint = format!("teams/{}/authentication-token", seg(team_id));
        let doc: Document<TokenAttributes> = self.post_doc(&endpoint, None).await?;
        Ok(doc.data.into())
    }

    async fn read_team_token(&self, team_id: &str) -> Result<TerraformToken, TfcError> {
        let doc: Document<TokenAttributes> = self
            .get_doc(&format!("teams/{}/authentication-token", seg(team_id)))
            .await?;
        Ok(doc.data.into())
    }

    async fn delete_team_token(&self, team_id: &str) -> Result<(), TfcError> {
        self.delete(&format!("teams/{}/authentication-token", seg(team_id)))
            .await
    }

    async fn create_team_token_with_options(
        &self,
        team_id: &str,
        opts: TokenCreateOptions,
    ) -> Result<TerraformToken, TfcError> {
        let endpoint = format!("teams/{}/authentication-tokens", seg(team_id));
        let doc: Document<TokenAttributes> =
            self.post_doc(&endpoint, Some(models::token_request(&opts))).await?;
        Ok(doc.data.into())
    }

    async fn delete_team_token_by_id(&self, token_id: &str) -> Result<(), TfcError> {
        self.delete(&format!("authentication-tokens/{}", seg(token_id)))
            .await
    }

    async fn create_user_token(
        &self,
        user_id: &str,
        opts: TokenCreateOptions,
    ) -> Result<TerraformToken, TfcError> {
        let endpoint = format!("users/{}/authentication-tokens", seg(user_id));
        let doc: Document<TokenAttributes> =
            self.post_doc(&endpoint, Some(models::token_request(&opts))).await?;
        Ok(doc.data.into())
    }

    async fn delete_user_token(&self, token_id: &str) -> Result<(), TfcError> {
        self.delete(&format!("authentication-tokens/{}", seg(token_id)))
            .await
    }
}

/// Builds [`HttpTerraformClient`]s with a fixed per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    timeout: Duration,
}

impl HttpClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ClientFactory for HttpClientFactory {
    fn build(&self, settings: &ClientSettings) -> Result<Arc<dyn TerraformApi>, TfcError> {
        Ok(Arc::new(HttpTerraformClient::new(settings, self.timeout)?))
    }
}

// ── Tests ──────────────────────────────────────────────────────
