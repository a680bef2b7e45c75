//! Twitch REST client: token validation, EventSub subscriptions, users.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{SourceError, SourceResult};
use crate::eventsub::{SubscriptionData, SubscriptionRequest, SubscriptionResponse};

pub const DEFAULT_HELIX_URL: &str = "https://api.twitch.tv/helix";
pub const DEFAULT_OAUTH_URL: &str = "https://id.twitch.tv/oauth2";

/// Response bodies are read up to this many bytes.
pub const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of `GET /oauth2/validate`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenInfo {
    pub client_id: String,
    pub login: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub user_id: String,
    #[serde(default)]
    pub expires_in: i64,
}

impl TokenInfo {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// # Errors
    ///
    /// [`SourceError::MissingScope`] when the token was not granted `scope`.
    pub fn require_scope(&self, scope: &str) -> SourceResult<()> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(SourceError::MissingScope(scope.to_string()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub id: String,
    pub login: String,
    pub display_name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub broadcaster_type: String,
}

#[derive(Debug, Deserialize)]
struct DataList<T> {
    data: Vec<T>,
}

/// Authenticated REST client for one user token.
#[derive(Clone)]
pub struct HelixClient {
    http: Client,
    helix_url: String,
    oauth_url: String,
    client_id: String,
    token: String,
}

impl std::fmt::Debug for HelixClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelixClient")
            .field("helix_url", &self.helix_url)
            .field("oauth_url", &self.oauth_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl HelixClient {
    /// Creates a client for `token`. A leading `oauth:` is dropped.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(token: &str) -> SourceResult<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            helix_url: DEFAULT_HELIX_URL.to_string(),
            oauth_url: DEFAULT_OAUTH_URL.to_string(),
            client_id: String::new(),
            token: token.trim_start_matches("oauth:").to_string(),
        })
    }

    #[must_use]
    pub fn with_helix_url(mut self, url: impl Into<String>) -> Self {
        self.helix_url = url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_oauth_url(mut self, url: impl Into<String>) -> Self {
        self.oauth_url = url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Validates the token and adopts its client id for later requests.
    pub async fn validate(&mut self) -> SourceResult<TokenInfo> {
        let info = self.validate_token().await?;
        self.client_id.clone_from(&info.client_id);
        Ok(info)
    }

    /// `GET /oauth2/validate`.
    pub async fn validate_token(&self) -> SourceResult<TokenInfo> {
        let url = format!("{}/validate", self.oauth_url);
        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("OAuth {}", self.token))
            .send()
            .await?;
        let info: TokenInfo = read_json("GET", response).await?;
        debug!(login = %info.login, scopes = ?info.scopes, "token validated");
        Ok(info)
    }

    /// `POST /eventsub/subscriptions`.
    ///
    /// # Errors
    ///
    /// Non-2xx responses yield [`SourceError::Status`]. A success response
    /// that does not describe exactly one subscription yields
    /// [`SourceError::SubscribeRejected`].
    pub async fn create_subscription(
        &self,
        request: &SubscriptionRequest,
    ) -> SourceResult<SubscriptionData> {
        let url = format!("{}/eventsub/subscriptions", self.helix_url);
        debug!(subscription_type = %request.subscription_type, "creating subscription");
        let response = self
            .http
            .post(&url)
            .header("Client-ID", &self.client_id)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        let body: SubscriptionResponse = read_json("POST", response).await?;

        let mut data = body.data;
        if data.len() != 1 {
            return Err(SourceError::SubscribeRejected(format!(
                "{}: expected one subscription in response, got {}",
                request.subscription_type,
                data.len()
            )));
        }
        Ok(data.remove(0))
    }

    /// `DELETE /eventsub/subscriptions?id=<id>`.
    pub async fn delete_subscription(&self, id: &str) -> SourceResult<()> {
        let url = format!("{}/eventsub/subscriptions", self.helix_url);
        let response = self
            .http
            .delete(&url)
            .query(&[("id", id)])
            .header("Client-ID", &self.client_id)
            .bearer_auth(&self.token)
            .send()
            .await?;
        ensure_success("DELETE", response).await?;
        Ok(())
    }

    /// `GET /users?login=...`.
    pub async fn users(&self, logins: &[&str]) -> SourceResult<Vec<User>> {
        let url = format!("{}/users", self.helix_url);
        let query: Vec<(&str, &str)> = logins.iter().map(|login| ("login", *login)).collect();
        let response = self
            .http
            .get(&url)
            .query(&query)
            .header("Client-ID", &self.client_id)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let list: DataList<User> = read_json("GET", response).await?;
        Ok(list.data)
    }
}

async fn read_bounded(mut response: Response) -> SourceResult<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = MAX_RESPONSE_BYTES - body.len();
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() >= MAX_RESPONSE_BYTES {
            break;
        }
    }
    Ok(body)
}

async fn ensure_success(method: &'static str, response: Response) -> SourceResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = read_bounded(response)
        .await
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default();
    Err(SourceError::Status {
        method,
        url,
        status: status.as_u16(),
        body,
    })
}

async fn read_json<T: DeserializeOwned>(method: &'static str, response: Response) -> SourceResult<T> {
    let response = ensure_success(method, response).await?;
    let body = read_bounded(response).await?;
    Ok(serde_json::from_slice(&body)?)
}
