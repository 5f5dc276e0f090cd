use std::fmt;

use chrono::{DateTime, Utc};
use log::{debug, info};
use reqwest::header::LOCATION;
use reqwest::{redirect, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use super::cookies::CookieJar;

pub const DEFAULT_DISCOVERY_URL: &str = "https://chat-api.zhile.io/auth/endpoint";
pub const DEFAULT_TOKEN_URL: &str = "https://chat-api.zhile.io/auth/token";
pub const DEFAULT_IDENTITY_BASE_URL: &str = "https://auth0.openai.com";

/// Redirects followed after the password post before giving up.
const MAX_REDIRECT_HOPS: usize = 8;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/112.0.0.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEndpoints {
    /// Returns the `{state, url}` pair that starts a login.
    pub discovery_url: String,
    /// Exchanges the callback URL for an access token.
    pub token_url: String,
    /// Relative `Location` headers are resolved against this.
    pub identity_base_url: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            discovery_url: DEFAULT_DISCOVERY_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            identity_base_url: DEFAULT_IDENTITY_BASE_URL.to_string(),
        }
    }
}

impl AuthEndpoints {
    /// All three endpoints served from one origin (`/auth/endpoint`, `/auth/token`).
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            discovery_url: format!("{base}/auth/endpoint"),
            token_url: format!("{base}/auth/token"),
            identity_base_url: base.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    Init,
    StepOne,
    StepTwo,
    StepThree,
    Done,
    Failed,
}

impl fmt::Display for AuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthStage::Init => "init",
            AuthStage::StepOne => "step one",
            AuthStage::StepTwo => "step two",
            AuthStage::StepThree => "step three",
            AuthStage::Done => "done",
            AuthStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("email and password are required to log in")]
    MissingLogin,

    #[error("cached access token of session {session} expired at {expires_at}")]
    TokenExpired {
        session: String,
        expires_at: DateTime<Utc>,
    },

    #[error("{stage}: email and password combination is incorrect or you have not verified your email address yet")]
    InvalidCredentials { stage: AuthStage, url: String },

    #[error("{stage}: bad status code {status} from {url}")]
    Status {
        stage: AuthStage,
        url: String,
        status: u16,
    },

    #[error("{stage}: state mismatch in redirect (expected {expected}, got {found})")]
    StateMismatch {
        stage: AuthStage,
        expected: String,
        found: String,
    },

    #[error("{stage}: {message}")]
    Protocol { stage: AuthStage, message: String },

    #[error("{stage}: request failed: {source}")]
    Transport {
        stage: AuthStage,
        #[source]
        source: reqwest::Error,
    },
}

impl AuthError {
    pub fn stage(&self) -> Option<AuthStage> {
        match self {
            AuthError::MissingLogin | AuthError::TokenExpired { .. } => None,
            AuthError::InvalidCredentials { stage, .. }
            | AuthError::Status { stage, .. }
            | AuthError::StateMismatch { stage, .. }
            | AuthError::Protocol { stage, .. }
            | AuthError::Transport { stage, .. } => Some(*stage),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::InvalidCredentials { .. } => Some(StatusCode::BAD_REQUEST.as_u16()),
            AuthError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            AuthError::InvalidCredentials { url, .. } | AuthError::Status { url, .. } => {
                Some(url.as_str())
            }
            _ => None,
        }
    }

    pub fn is_invalid_credentials(&self) -> bool {
        matches!(self, AuthError::InvalidCredentials { .. })
    }

    fn protocol(stage: AuthStage, message: impl Into<String>) -> Self {
        AuthError::Protocol {
            stage,
            message: message.into(),
        }
    }
}

/// A bearer token and the instant it stops being usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl IssuedToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.token.is_empty() && self.expires_at > now
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveryResponse {
    #[serde(default)]
    state: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(rename = "accessToken", default)]
    access_token: String,
    #[serde(default)]
    expires: Option<DateTime<Utc>>,
    #[serde(default)]
    detail: Option<Value>,
}

/// Transient state of one login attempt. Never shared between attempts.
#[derive(Debug)]
struct HandshakeState {
    stage: AuthStage,
    state_token: String,
    cookies: CookieJar,
}

impl HandshakeState {
    fn new() -> Self {
        Self {
            stage: AuthStage::Init,
            state_token: String::new(),
            cookies: CookieJar::new(),
        }
    }

    fn advance(&mut self, stage: AuthStage) {
        debug!("Login handshake: {} -> {}", self.stage, stage);
        self.stage = stage;
    }
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Browser-less email/password login against the identity provider.
#[derive(Debug, Clone)]
pub struct LoginHandshake {
    client: Client,
    endpoints: AuthEndpoints,
}

impl LoginHandshake {
    /// Build a handshake with its own HTTP client. Redirects are never followed
    /// automatically; every hop is inspected.
    pub fn new(endpoints: AuthEndpoints, proxy: Option<&str>) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder()
            .redirect(redirect::Policy::none())
            .user_agent(USER_AGENT);
        builder = match proxy {
            Some(proxy) => builder.proxy(reqwest::Proxy::all(proxy)?),
            None => builder.no_proxy(),
        };
        Ok(Self::with_client(builder.build()?, endpoints))
    }

    /// Use an existing client. It must be built with `redirect::Policy::none()`.
    pub fn with_client(client: Client, endpoints: AuthEndpoints) -> Self {
        Self { client, endpoints }
    }

    pub fn endpoints(&self) -> &AuthEndpoints {
        &self.endpoints
    }

    /// Run the whole handshake once. No stage is retried.
    pub async fn run(&self, email: &str, password: &str) -> Result<IssuedToken, AuthError> {
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingLogin);
        }

        let mut state = HandshakeState::new();
        match self.drive(&mut state, email, password).await {
            Ok(token) => {
                state.advance(AuthStage::Done);
                info!("Login handshake finished, token expires at {}", token.expires_at);
                Ok(token)
            }
            Err(err) => {
                debug!("Login handshake failed during {}: {}", state.stage, err);
                state.advance(AuthStage::Failed);
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        state: &mut HandshakeState,
        email: &str,
        password: &str,
    ) -> Result<IssuedToken, AuthError> {
        state.advance(AuthStage::StepOne);
        let authorize_url = self.discover(state).await?;

        state.advance(AuthStage::StepTwo);
        let callback_url = self.log_in(state, &authorize_url, email, password).await?;

        state.advance(AuthStage::StepThree);
        self.exchange(state, &callback_url).await
    }

    async fn discover(&self, state: &mut HandshakeState) -> Result<String, AuthError> {
        let stage = AuthStage::StepOne;
        let url = self.endpoints.discovery_url.clone();
        let response = self.send(stage, self.client.get(&url)).await?;
        if response.status() != StatusCode::OK {
            return Err(AuthError::Status {
                stage,
                url,
                status: response.status().as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| AuthError::Transport { stage, source })?;
        let discovery: DiscoveryResponse = serde_json::from_str(&body)
            .map_err(|err| AuthError::protocol(stage, format!("invalid discovery response: {err}")))?;
        if discovery.state.is_empty() || discovery.url.is_empty() {
            return Err(AuthError::protocol(
                stage,
                "discovery response is missing state or url",
            ));
        }

        state.state_token = discovery.state;
        Ok(discovery.url)
    }

    /// Walk the identity provider pages and return the callback URL carrying `code`.
    async fn log_in(
        &self,
        state: &mut HandshakeState,
        authorize_url: &str,
        email: &str,
        password: &str,
    ) -> Result<Url, AuthError> {
        let stage = AuthStage::StepTwo;

        let response = self.send(stage, self.client.get(authorize_url)).await?;
        state.cookies.capture(response.headers());
        let identifier_url = self.expect_redirect(stage, authorize_url, &response)?;
        match query_param(&identifier_url, "state") {
            Some(found) if found == state.state_token => {}
            found => {
                return Err(AuthError::StateMismatch {
                    stage,
                    expected: state.state_token.clone(),
                    found: found.unwrap_or_default(),
                })
            }
        }

        let identifier_form = [
            ("state", state.state_token.as_str()),
            ("username", email),
            ("js-available", "true"),
            ("webauthn-available", "true"),
            ("is-brave", "false"),
            ("webauthn-platform-available", "false"),
            ("action", "default"),
        ];
        let request = state
            .cookies
            .apply(self.client.post(identifier_url.clone()).form(&identifier_form));
        let response = self.send(stage, request).await?;
        state.cookies.capture(response.headers());
        let password_url = self.expect_login_redirect(stage, identifier_url.as_str(), &response)?;
        self.check_state(stage, state, &password_url)?;

        let password_form = [
            ("state", state.state_token.as_str()),
            ("username", email),
            ("password", password),
            ("action", "default"),
        ];
        let request = state
            .cookies
            .apply(self.client.post(password_url.clone()).form(&password_form));
        let response = self.send(stage, request).await?;
        state.cookies.capture(response.headers());
        let mut location = self.expect_login_redirect(stage, password_url.as_str(), &response)?;

        for hop in 0..MAX_REDIRECT_HOPS {
            self.check_state(stage, state, &location)?;
            if query_param(&location, "code").is_some() {
                debug!("Authorization code received after {hop} redirect(s)");
                return Ok(location);
            }

            let request = state.cookies.apply(self.client.get(location.clone()));
            let response = self.send(stage, request).await?;
            state.cookies.capture(response.headers());
            location = self.expect_redirect(stage, location.as_str(), &response)?;
        }

        if query_param(&location, "code").is_some() {
            self.check_state(stage, state, &location)?;
            return Ok(location);
        }
        Err(AuthError::protocol(
            stage,
            format!("no authorization code after {MAX_REDIRECT_HOPS} redirects"),
        ))
    }

    async fn exchange(
        &self,
        state: &mut HandshakeState,
        callback_url: &Url,
    ) -> Result<IssuedToken, AuthError> {
        let stage = AuthStage::StepThree;
        let form = [
            ("state", state.state_token.as_str()),
            ("callbackUrl", callback_url.as_str()),
        ];
        let response = self
            .send(stage, self.client.post(&self.endpoints.token_url).form(&form))
            .await?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| AuthError::Transport { stage, source })?;

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|err| {
            AuthError::protocol(
                stage,
                format!("invalid token response (HTTP {}): {err}", status.as_u16()),
            )
        })?;

        match parsed.detail {
            None | Some(Value::Null) => {}
            Some(Value::String(detail)) if detail.is_empty() => {}
            Some(Value::String(detail)) => return Err(AuthError::protocol(stage, detail)),
            Some(other) => return Err(AuthError::protocol(stage, other.to_string())),
        }
        if parsed.access_token.is_empty() {
            return Err(AuthError::protocol(stage, "token response carries no access token"));
        }
        let expires_at = parsed
            .expires
            .ok_or_else(|| AuthError::protocol(stage, "token response carries no expiry"))?;

        Ok(IssuedToken {
            token: parsed.access_token,
            expires_at,
        })
    }

    async fn send(&self, stage: AuthStage, request: RequestBuilder) -> Result<Response, AuthError> {
        let response = request
            .send()
            .await
            .map_err(|source| AuthError::Transport { stage, source })?;
        debug!(
            "Login handshake {}: {} answered {}",
            stage,
            response.url(),
            response.status()
        );
        Ok(response)
    }

    /// Expect a 302 and resolve its `Location` against the identity base.
    fn expect_redirect(
        &self,
        stage: AuthStage,
        url: &str,
        response: &Response,
    ) -> Result<Url, AuthError> {
        if response.status() != StatusCode::FOUND {
            return Err(AuthError::Status {
                stage,
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AuthError::protocol(stage, format!("redirect from {url} has no location")))?;

        let base = Url::parse(&self.endpoints.identity_base_url).map_err(|err| {
            AuthError::protocol(stage, format!("invalid identity base url: {err}"))
        })?;
        base.join(location)
            .map_err(|err| AuthError::protocol(stage, format!("invalid redirect location {location}: {err}")))
    }

    /// Like [`Self::expect_redirect`], but a 400 means the login was refused.
    fn expect_login_redirect(
        &self,
        stage: AuthStage,
        url: &str,
        response: &Response,
    ) -> Result<Url, AuthError> {
        if response.status() == StatusCode::BAD_REQUEST {
            return Err(AuthError::InvalidCredentials {
                stage,
                url: url.to_string(),
            });
        }
        self.expect_redirect(stage, url, response)
    }

    fn check_state(
        &self,
        stage: AuthStage,
        state: &HandshakeState,
        location: &Url,
    ) -> Result<(), AuthError> {
        match query_param(location, "state") {
            Some(found) if found != state.state_token => Err(AuthError::StateMismatch {
                stage,
                expected: state.state_token.clone(),
                found,
            }),
            _ => Ok(()),
        }
    }
}
