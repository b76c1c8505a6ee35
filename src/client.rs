use std::sync::Arc;
use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::BridgeError;
use crate::store::{ConfigSource, Settings};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Upper bound for a single request, connect through body
    pub timeout: Duration,
    /// Allow calls to go out with an empty URL or token
    pub allow_empty: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            allow_empty: false,
        }
    }
}

/// Typed JSON calls against the Harvest API.
#[derive(Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    config: Arc<dyn ConfigSource>,
    allow_empty: bool,
}

/// Strip exactly one trailing slash from the base URL and append the path.
pub fn api_url(base_url: &str, path: &str) -> String {
    let base = base_url.strip_suffix('/').unwrap_or(base_url);
    format!("{}{}", base, path)
}

impl RemoteClient {
    pub fn new(config: Arc<dyn ConfigSource>) -> Result<Self, BridgeError> {
        Self::with_options(config, ClientOptions::default())
    }

    pub fn with_options(
        config: Arc<dyn ConfigSource>,
        options: ClientOptions,
    ) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()?;
        Ok(Self {
            http,
            config,
            allow_empty: options.allow_empty,
        })
    }

    pub fn config(&self) -> &Arc<dyn ConfigSource> {
        &self.config
    }

    async fn settings(&self) -> Result<Settings, BridgeError> {
        let settings = self.config.load().await?;
        if !self.allow_empty && !settings.is_complete() {
            return Err(BridgeError::ConfigurationMissing);
        }
        Ok(settings)
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, BridgeError> {
        let settings = self.settings().await?;
        let url = api_url(&settings.url, path);
        log::debug!("[Harvest] {} {}", method, url);
        Ok(self
            .http
            .request(method, url)
            .header(AUTHORIZATION, format!("Token {}", settings.token)))
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, BridgeError> {
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;

        if !(200..300).contains(&status) {
            log::debug!("[Harvest] request failed with status {}", status);
            return Err(BridgeError::RemoteRequestFailed { status, body });
        }

        let body = if body.trim().is_empty() { "null" } else { body.as_str() };
        Ok(serde_json::from_str(body)?)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, BridgeError> {
        let builder = self.request(Method::GET, path).await?;
        self.send(builder).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, BridgeError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let builder = self.request(Method::PUT, path).await?.json(body);
        self.send(builder).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, BridgeError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let builder = self.request(Method::POST, path).await?.json(body);
        self.send(builder).await
    }
}
