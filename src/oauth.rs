//! OAuth token shapes and vendor token exchange.
//!
//! OAuth2 flows go through the `oauth2` crate. OAuth1 vendors use
//! PLAINTEXT-signed requests, so no request signing library is needed.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Utc};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    RedirectUrl, RefreshToken, TokenResponse, TokenUrl, basic::BasicClient,
};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::{Url, form_urlencoded};

use crate::config::{OAuth1ClientConfig, OAuth2ClientConfig};
use crate::integrations::Vendor;

/// Tokens are treated as expired this long before their recorded expiry.
const EXPIRY_SKEW_SECONDS: i64 = 10;

const ACCOUNT_PLACEHOLDER: &str = "{account}";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("no OAuth client configured for '{0}'")]
    NotConfigured(Vendor),
    #[error("invalid OAuth endpoint: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("token endpoint rejected the request: {0}")]
    Exchange(String),
    #[error("request to OAuth endpoint failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("OAuth endpoint returned status {0}")]
    Status(u16),
    #[error("OAuth response is missing '{0}'")]
    MissingField(&'static str),
}

/// Stored OAuth2 credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuth2Token {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl OAuth2Token {
    /// A token without an expiry never expires. Year-one timestamps are the
    /// zero value some writers emit for "no expiry".
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) if expiry.year() > 1 => {
                expiry - Duration::seconds(EXPIRY_SKEW_SECONDS) <= now
            }
            _ => false,
        }
    }

    fn from_response<R: TokenResponse>(response: &R, previous_refresh: Option<&str>) -> Self {
        Self {
            access_token: response.access_token().secret().clone(),
            token_type: "Bearer".to_string(),
            refresh_token: response
                .refresh_token()
                .map(|t| t.secret().clone())
                .or_else(|| previous_refresh.map(str::to_string)),
            expiry: response
                .expires_in()
                .and_then(|d| Duration::from_std(d).ok())
                .map(|d| Utc::now() + d),
        }
    }
}

/// Stored OAuth1 credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth1Token {
    pub token: String,
    pub secret: String,
}

/// Vendor-facing half of the authorization lifecycle.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Authorize URL for OAuth2 vendors, shown in the integrations listing.
    fn oauth2_url(&self, vendor: Vendor) -> Option<String>;

    async fn oauth2_exchange(&self, vendor: Vendor, code: &str)
    -> Result<OAuth2Token, OAuthError>;

    async fn oauth2_refresh(
        &self,
        vendor: Vendor,
        token: &OAuth2Token,
    ) -> Result<OAuth2Token, OAuthError>;

    async fn oauth1_auth_url(
        &self,
        vendor: Vendor,
        account_name: &str,
        callback_url: &str,
    ) -> Result<String, OAuthError>;

    async fn oauth1_exchange(
        &self,
        vendor: Vendor,
        account_name: &str,
        token: &str,
        verifier: &str,
    ) -> Result<OAuth1Token, OAuthError>;
}

type ConfiguredClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// [`OAuthProvider`] backed by the `OAUTH2_*` and `OAUTH1_*` config keys.
#[derive(Clone)]
pub struct ConfigOAuthProvider {
    oauth2: Arc<BTreeMap<String, OAuth2ClientConfig>>,
    oauth1: Arc<BTreeMap<String, OAuth1ClientConfig>>,
    http: reqwest::Client,
}

impl ConfigOAuthProvider {
    pub fn new(
        oauth2: BTreeMap<String, OAuth2ClientConfig>,
        oauth1: BTreeMap<String, OAuth1ClientConfig>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            oauth2: Arc::new(oauth2),
            oauth1: Arc::new(oauth1),
            http,
        }
    }

    fn oauth2_client(&self, vendor: Vendor) -> Result<ConfiguredClient, OAuthError> {
        let config = self
            .oauth2
            .get(vendor.as_str())
            .ok_or(OAuthError::NotConfigured(vendor))?;

        let mut client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_auth_uri(AuthUrl::new(config.auth_url.clone())?)
            .set_token_uri(TokenUrl::new(config.token_url.clone())?);
        if let Some(secret) = &config.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }
        if let Some(redirect) = &config.redirect_url {
            client = client.set_redirect_uri(RedirectUrl::new(redirect.clone())?);
        }
        Ok(client)
    }

    fn oauth1_config(
        &self,
        vendor: Vendor,
        account_name: &str,
    ) -> Result<OAuth1ClientConfig, OAuthError> {
        let config = self
            .oauth1
            .get(vendor.as_str())
            .ok_or(OAuthError::NotConfigured(vendor))?;
        Ok(OAuth1ClientConfig {
            request_token_url: config.request_token_url.replace(ACCOUNT_PLACEHOLDER, account_name),
            authorize_url: config.authorize_url.replace(ACCOUNT_PLACEHOLDER, account_name),
            access_token_url: config.access_token_url.replace(ACCOUNT_PLACEHOLDER, account_name),
            ..config.clone()
        })
    }

    async fn oauth1_post(
        &self,
        url: &str,
        header: String,
    ) -> Result<BTreeMap<String, String>, OAuthError> {
        let response = self
            .http
            .post(url)
            .header(reqwest::header::AUTHORIZATION, header)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(OAuthError::Status(response.status().as_u16()));
        }
        let body = response.bytes().await?;
        Ok(form_urlencoded::parse(&body).into_owned().collect())
    }
}

#[async_trait]
impl OAuthProvider for ConfigOAuthProvider {
    fn oauth2_url(&self, vendor: Vendor) -> Option<String> {
        let client = self.oauth2_client(vendor).ok()?;
        let (url, _csrf) = client.authorize_url(CsrfToken::new_random).url();
        Some(url.to_string())
    }

    async fn oauth2_exchange(
        &self,
        vendor: Vendor,
        code: &str,
    ) -> Result<OAuth2Token, OAuthError> {
        let client = self.oauth2_client(vendor)?;
        let response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|err| OAuthError::Exchange(err.to_string()))?;
        debug!(%vendor, "exchanged authorization code");
        Ok(OAuth2Token::from_response(&response, None))
    }

    async fn oauth2_refresh(
        &self,
        vendor: Vendor,
        token: &OAuth2Token,
    ) -> Result<OAuth2Token, OAuthError> {
        let refresh = token
            .refresh_token
            .as_deref()
            .ok_or(OAuthError::MissingField("refresh_token"))?;
        let client = self.oauth2_client(vendor)?;
        let response = client
            .exchange_refresh_token(&RefreshToken::new(refresh.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|err| {
                warn!(%vendor, error = %err, "token refresh rejected");
                OAuthError::Exchange(err.to_string())
            })?;
        Ok(OAuth2Token::from_response(&response, Some(refresh)))
    }

    async fn oauth1_auth_url(
        &self,
        vendor: Vendor,
        account_name: &str,
        callback_url: &str,
    ) -> Result<String, OAuthError> {
        let config = self.oauth1_config(vendor, account_name)?;
        let header = plaintext_header(&config, None, &[("oauth_callback", callback_url)]);
        let fields = self.oauth1_post(&config.request_token_url, header).await?;
        let request_token = fields
            .get("oauth_token")
            .ok_or(OAuthError::MissingField("oauth_token"))?;

        let mut url = Url::parse(&config.authorize_url)?;
        url.query_pairs_mut()
            .append_pair("oauth_token", request_token);
        Ok(url.to_string())
    }

    async fn oauth1_exchange(
        &self,
        vendor: Vendor,
        account_name: &str,
        token: &str,
        verifier: &str,
    ) -> Result<OAuth1Token, OAuthError> {
        let config = self.oauth1_config(vendor, account_name)?;
        let header = plaintext_header(
            &config,
            None,
            &[("oauth_token", token), ("oauth_verifier", verifier)],
        );
        let mut fields = self.oauth1_post(&config.access_token_url, header).await?;
        Ok(OAuth1Token {
            token: fields
                .remove("oauth_token")
                .ok_or(OAuthError::MissingField("oauth_token"))?,
            secret: fields
                .remove("oauth_token_secret")
                .ok_or(OAuthError::MissingField("oauth_token_secret"))?,
        })
    }
}

fn percent_encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// `Authorization: OAuth ...` header signed with the PLAINTEXT method.
fn plaintext_header(
    config: &OAuth1ClientConfig,
    token_secret: Option<&str>,
    extra: &[(&str, &str)],
) -> String {
    let nonce: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    let signature = format!(
        "{}&{}",
        percent_encode(&config.consumer_secret),
        percent_encode(token_secret.unwrap_or_default())
    );
    let timestamp = Utc::now().timestamp().to_string();

    let mut params: Vec<(&str, &str)> = vec![
        ("oauth_consumer_key", config.consumer_key.as_str()),
        ("oauth_nonce", nonce.as_str()),
        ("oauth_signature_method", "PLAINTEXT"),
        ("oauth_signature", signature.as_str()),
        ("oauth_timestamp", timestamp.as_str()),
        ("oauth_version", "1.0"),
    ];
    params.extend_from_slice(extra);

    let rendered: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, percent_encode(v)))
        .collect();
    format!("OAuth {}", rendered.join(", "))
}
