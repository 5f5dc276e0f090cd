use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chat_core::config::FREE_ENGINE;
use chat_core::logging::{init_logging, session_tag};
use chat_core::{ClientConfig, ConfigError, Credential};
use context_manager::{Conversation, ConversationStore, TokenMeasure};
use log::{debug, info, warn};
use reqwest::{redirect, Client, Proxy, Response, StatusCode};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::api::models::{
    AskOptions, ChatCompletionRequest, ChatCompletionResponse, ChatResponse, ConversationRequest,
};
use crate::auth::{AuthEndpoints, CredentialAcquirer, CredentialBroker, LoginHandshake, TokenCache};
use crate::error::{provider_error, ChatError, Result};
use crate::stream::{FrameReceiver, StreamDecoder, StreamError, LIVE_QUEUE_CAPACITY};
use crate::utils::http_utils::execute_request;

/// Conversation used by API-key asks that name none.
pub const DEFAULT_CONVERSATION: &str = "default";

const USER_AGENT: &str = concat!("gpt_client/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Chat completion API with an API key.
    ApiKey,
    /// Backend conversation API with a bearer token.
    AccessToken,
}

#[derive(Debug, Default)]
struct ClientState {
    credential: Option<Credential>,
    engine: String,
}

/// One chat session. Cheap to share behind an `Arc`; every method takes `&self`.
pub struct ChatClient {
    config: ClientConfig,
    session_name: String,
    http: Client,
    auth_http: Client,
    acquirer: Arc<dyn CredentialAcquirer>,
    broker: CredentialBroker,
    conversations: Arc<ConversationStore>,
    state: RwLock<ClientState>,
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("session_name", &self.session_name)
            .field("broker", &self.broker)
            .field("conversations", &self.conversations.len())
            .finish()
    }
}

impl ChatClient {
    /// Build a client from `config`. Installs the global logger at
    /// `config.log_level` unless one is already in place.
    pub fn new(config: ClientConfig) -> Result<Self> {
        if init_logging(config.log_level) {
            debug!("Logger initialized at level {:?}", config.log_level);
        }

        let http = Self::build_http_client(&config, false)?;
        let auth_http = Self::build_http_client(&config, true)?;

        let cache = if config.disable_cache {
            None
        } else {
            Some(Arc::new(TokenCache::new(config.cache_path())))
        };
        let acquirer: Arc<dyn CredentialAcquirer> = Arc::new(LoginHandshake::with_client(
            auth_http.clone(),
            AuthEndpoints::default(),
        ));
        let broker = CredentialBroker::new(Arc::clone(&acquirer), cache);
        let conversations = Arc::new(ConversationStore::new(
            config.engine(),
            config.init_message(),
        ));

        Ok(Self {
            session_name: config.session_name().to_string(),
            state: RwLock::new(ClientState {
                credential: None,
                engine: config.engine().to_string(),
            }),
            config,
            http,
            auth_http,
            acquirer,
            broker,
            conversations,
        })
    }

    fn build_http_client(config: &ClientConfig, for_login: bool) -> Result<Client> {
        let mut builder = Client::builder().user_agent(USER_AGENT);
        if for_login {
            builder = builder.redirect(redirect::Policy::none());
        }
        builder = match config.proxy() {
            Some(proxy) => builder.proxy(
                Proxy::all(proxy).map_err(|_| ConfigError::InvalidProxy(proxy.to_string()))?,
            ),
            None => builder.no_proxy(),
        };
        Ok(builder.build()?)
    }

    /// Point the login handshake at other endpoints.
    pub fn with_endpoints(self, endpoints: AuthEndpoints) -> Self {
        let handshake = LoginHandshake::with_client(self.auth_http.clone(), endpoints);
        self.with_acquirer(Arc::new(handshake))
    }

    pub fn with_acquirer(mut self, acquirer: Arc<dyn CredentialAcquirer>) -> Self {
        self.broker = CredentialBroker::new(Arc::clone(&acquirer), self.broker.cache().cloned());
        self.acquirer = acquirer;
        self
    }

    pub fn with_token_cache(mut self, cache: TokenCache) -> Self {
        self.broker = CredentialBroker::new(Arc::clone(&self.acquirer), Some(Arc::new(cache)));
        self
    }

    pub fn without_token_cache(mut self) -> Self {
        self.broker = CredentialBroker::new(Arc::clone(&self.acquirer), None);
        self
    }

    /// Replace the windowing measure. Conversations recorded so far are dropped.
    pub fn with_token_measure(mut self, measure: TokenMeasure) -> Self {
        self.conversations = Arc::new(
            ConversationStore::new(self.conversations.model(), self.config.init_message())
                .with_measure(measure),
        );
        self
    }

    /// Validate credentials, log in when needed and pick the engine.
    pub async fn start(&self) -> Result<()> {
        let tag = session_tag(&self.session_name);

        let credential = match self.config.credential() {
            Ok(credential) => credential,
            Err(ConfigError::MissingCredentials) => {
                match self.broker.cached(&self.session_name).await {
                    Some(cached) => {
                        info!(
                            "{tag} - No credentials configured, using cached access token valid until {}",
                            cached.expires_at
                        );
                        Credential::Cached
                    }
                    None => return Err(ConfigError::MissingCredentials.into()),
                }
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(proxy) = self.config.proxy() {
            self.ping_proxy(proxy).await?;
            debug!("{tag} - Proxy server is alive");
        }

        info!(
            "{tag} - Starting client with {} authentication",
            credential.kind()
        );
        match &credential {
            Credential::ApiKey(_) | Credential::Cached => {}
            Credential::BearerToken(token) => {
                self.broker.seed(&self.session_name, token).await;
            }
            Credential::Login { email, password } => {
                self.broker
                    .bearer(&self.session_name, email, password)
                    .await?;
                info!("{tag} - Successfully authenticated");
            }
        }

        let mut state = self.state.write().await;
        if !matches!(credential, Credential::ApiKey(_)) && !self.config.is_paid {
            debug!("{tag} - Using free engine: {FREE_ENGINE}");
            state.engine = FREE_ENGINE.to_string();
            self.conversations.set_model(FREE_ENGINE);
        }
        state.credential = Some(credential);
        Ok(())
    }

    async fn ping_proxy(&self, proxy: &str) -> Result<()> {
        let probe = Client::builder().no_proxy().build()?;
        probe.get(proxy).send().await.map_err(|err| {
            warn!("Proxy server {proxy} is not reachable: {err}");
            ChatError::Transport(err)
        })?;
        Ok(())
    }

    async fn active(&self) -> Result<(Credential, String)> {
        let state = self.state.read().await;
        let credential = state.credential.clone().ok_or(ConfigError::NotStarted)?;
        Ok((credential, state.engine.clone()))
    }

    pub async fn is_started(&self) -> bool {
        self.state.read().await.credential.is_some()
    }

    pub async fn auth_mode(&self) -> Option<AuthMode> {
        self.state
            .read()
            .await
            .credential
            .as_ref()
            .map(|credential| match credential {
                Credential::ApiKey(_) => AuthMode::ApiKey,
                _ => AuthMode::AccessToken,
            })
    }

    /// Send `prompt` and wait for the whole reply.
    pub async fn ask(
        &self,
        prompt: &str,
        options: AskOptions,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let (credential, engine) = self.active().await?;
        match credential {
            Credential::ApiKey(key) => self.ask_api(&key, &engine, prompt, options, cancel).await,
            credential => {
                let response = self
                    .send_conversation(&credential, &engine, prompt, &options, cancel)
                    .await?;
                let frames = StreamDecoder::from_response(response).collect().await?;
                let last = frames.into_iter().last().ok_or(StreamError::NoFrames)?;

                self.conversations.append_user(&last.conversation_id, prompt);
                self.conversations
                    .append_assistant(&last.conversation_id, last.text.clone());
                Ok(ChatResponse::from_frame(last, engine))
            }
        }
    }

    /// Send `prompt` and receive the reply as it grows. Access-token mode only.
    pub async fn ask_stream(
        &self,
        prompt: &str,
        options: AskOptions,
        cancel: CancellationToken,
    ) -> Result<FrameReceiver> {
        let (credential, engine) = self.active().await?;
        if matches!(credential, Credential::ApiKey(_)) {
            return Err(ChatError::Unsupported(
                "streaming is only available with access token authentication".to_string(),
            ));
        }

        let response = self
            .send_conversation(&credential, &engine, prompt, &options, &cancel)
            .await?;

        let conversations = Arc::clone(&self.conversations);
        let prompt = prompt.to_string();
        Ok(StreamDecoder::from_response(response).spawn_live_with(
            LIVE_QUEUE_CAPACITY,
            cancel,
            move |last| {
                conversations.append_user(&last.conversation_id, prompt);
                conversations.append_assistant(&last.conversation_id, last.text.clone());
            },
        ))
    }

    async fn ask_api(
        &self,
        api_key: &str,
        engine: &str,
        prompt: &str,
        options: AskOptions,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let conversation_id = options
            .conversation_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| DEFAULT_CONVERSATION.to_string());

        self.conversations.append_user(&conversation_id, prompt);
        let messages = self.conversations.current_messages(&conversation_id);
        let body = ChatCompletionRequest::new(engine, messages, self.config.temperature());

        let url = format!("{}/chat/completions", self.config.api_base());
        let request = self.http.post(url).bearer_auth(api_key).json(&body);
        let response = execute_request(&self.http, request, cancel).await?;
        let response = Self::ensure_ok(response).await?;

        let completion: ChatCompletionResponse = response.json().await?;
        let reply = completion.reply().unwrap_or_default().to_string();
        self.conversations
            .append_assistant(&conversation_id, reply.clone());

        Ok(ChatResponse {
            message: reply,
            conversation_id,
            parent_id: None,
            model: if completion.model.is_empty() {
                engine.to_string()
            } else {
                completion.model
            },
        })
    }

    async fn send_conversation(
        &self,
        credential: &Credential,
        engine: &str,
        prompt: &str,
        options: &AskOptions,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let token = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            token = self.bearer_token(credential) => token?,
        };

        let body = ConversationRequest::next(
            prompt,
            engine,
            options.conversation_id.clone(),
            options.parent_id.clone(),
        );
        let url = format!("{}conversation", self.config.base_url());
        let request = self
            .http
            .post(url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body);

        let response = execute_request(&self.http, request, cancel).await?;
        Self::ensure_ok(response).await
    }

    async fn bearer_token(&self, credential: &Credential) -> Result<String> {
        match credential {
            Credential::Login { email, password } => Ok(self
                .broker
                .bearer(&self.session_name, email, password)
                .await?),
            Credential::BearerToken(token) => Ok(token.clone()),
            Credential::Cached => Ok(self.broker.cached_bearer(&self.session_name).await?),
            Credential::ApiKey(_) => Err(ChatError::Unsupported(
                "the conversation backend needs an access token".to_string(),
            )),
        }
    }

    async fn ensure_ok(response: Response) -> Result<Response> {
        let status = response.status();
        if status == StatusCode::OK {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(provider_error(status, &body))
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn engine(&self) -> String {
        self.state.read().await.engine.clone()
    }

    pub async fn set_engine(&self, engine: impl Into<String>) {
        let engine = engine.into();
        self.conversations.set_model(engine.clone());
        self.state.write().await.engine = engine;
    }

    /// Applies to conversations created from now on.
    pub fn set_init_message(&self, init_message: impl Into<String>) {
        self.conversations.set_init_message(init_message);
    }

    pub fn conversation(&self, id: &str) -> Option<Conversation> {
        self.conversations.get(id)
    }

    pub fn set_conversation(&self, id: &str, conversation: Conversation) -> Result<()> {
        Ok(self.conversations.set(id, conversation)?)
    }

    pub fn reset_conversation(&self, id: &str) -> Result<()> {
        Ok(self.conversations.reset(id)?)
    }

    pub fn reset_conversations(&self) {
        self.conversations.reset_all();
    }

    pub fn conversations(&self) -> HashMap<String, Conversation> {
        self.conversations.snapshot()
    }

    pub fn conversation_ids(&self) -> Vec<String> {
        self.conversations.ids()
    }
}
