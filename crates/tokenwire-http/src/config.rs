use std::time::Duration;

use reqwest::Method;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use tokenwire_core::{FrameDelimiter, ProviderFormat};

use crate::errors::TransportError;

/// Overrides the provider's default endpoint.
pub const UPSTREAM_URL_ENV: &str = "TOKENWIRE_UPSTREAM_URL";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// How an API key is attached to upstream requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`.
    Bearer,
    /// The key is sent verbatim in the named header.
    Header(&'static str),
    /// No credentials.
    None,
}

/// Per-provider connection defaults.
#[derive(Debug, Clone)]
pub struct ProviderDefaults {
    pub endpoint: Option<&'static str>,
    pub key_env: Option<&'static str>,
    pub key_required: bool,
    pub auth: AuthScheme,
    pub method: Method,
}

/// Returns connection defaults for a provider format.
///
/// Replicate has no fixed endpoint: its stream URL comes from a created
/// prediction and must be configured explicitly.
pub fn provider_defaults(format: ProviderFormat) -> ProviderDefaults {
    match format {
        ProviderFormat::OpenAi => ProviderDefaults {
            endpoint: Some("https://api.openai.com/v1/chat/completions"),
            key_env: Some("OPENAI_API_KEY"),
            key_required: true,
            auth: AuthScheme::Bearer,
            method: Method::POST,
        },
        ProviderFormat::Anthropic => ProviderDefaults {
            endpoint: Some("https://api.anthropic.com/v1/messages"),
            key_env: Some("ANTHROPIC_API_KEY"),
            key_required: true,
            auth: AuthScheme::Header("x-api-key"),
            method: Method::POST,
        },
        ProviderFormat::Cohere => ProviderDefaults {
            endpoint: Some("https://api.cohere.ai/v1/generate"),
            key_env: Some("COHERE_API_KEY"),
            key_required: true,
            auth: AuthScheme::Bearer,
            method: Method::POST,
        },
        ProviderFormat::HuggingFace => ProviderDefaults {
            endpoint: Some("http://127.0.0.1:8080/generate_stream"),
            key_env: Some("HUGGINGFACE_API_KEY"),
            key_required: false,
            auth: AuthScheme::Bearer,
            method: Method::POST,
        },
        ProviderFormat::Ollama => ProviderDefaults {
            endpoint: Some("http://127.0.0.1:11434/api/generate"),
            key_env: None,
            key_required: false,
            auth: AuthScheme::None,
            method: Method::POST,
        },
        ProviderFormat::Replicate => ProviderDefaults {
            endpoint: None,
            key_env: Some("REPLICATE_API_TOKEN"),
            key_required: true,
            auth: AuthScheme::Bearer,
            method: Method::GET,
        },
    }
}

/// Connection settings for one upstream provider.
#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    pub format: ProviderFormat,
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Extra headers sent with every request.
    pub headers: Vec<(String, String)>,
    /// Cancellation deadline applied to each stream session.
    pub deadline: Option<Duration>,
    pub method: Method,
}

impl UpstreamConfig {
    /// Creates a config for an explicit endpoint without credentials.
    pub fn new(format: ProviderFormat, endpoint: impl Into<String>) -> Self {
        Self {
            format,
            endpoint: endpoint.into(),
            api_key: None,
            headers: Vec::new(),
            deadline: None,
            method: provider_defaults(format).method,
        }
    }

    /// Builds a config from the provider's conventional environment variables.
    pub fn from_env(format: ProviderFormat) -> Result<Self, TransportError> {
        Self::from_lookup(format, |key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable lookup.
    pub fn from_lookup(
        format: ProviderFormat,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, TransportError> {
        let defaults = provider_defaults(format);
        let endpoint = lookup(UPSTREAM_URL_ENV)
            .filter(|v| !v.trim().is_empty())
            .or_else(|| defaults.endpoint.map(str::to_string))
            .ok_or_else(|| {
                TransportError::Config(format!(
                    "no default endpoint for {format}; set {UPSTREAM_URL_ENV}"
                ))
            })?;
        let api_key = defaults
            .key_env
            .and_then(|key| lookup(key))
            .filter(|v| !v.trim().is_empty());
        if defaults.key_required && api_key.is_none() {
            let var = defaults.key_env.unwrap_or("API key");
            return Err(TransportError::Config(format!(
                "missing {var} for {format} upstream"
            )));
        }
        let mut config = Self::new(format, endpoint);
        config.api_key = api_key;
        Ok(config)
    }

    /// Sets the API key.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Adds a header sent with every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets a default cancellation deadline for each session.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Overrides the HTTP method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Builds the request headers: accept, auth, provider extras, then user headers.
    pub(crate) fn header_map(&self) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        if self.format.delimiter() == FrameDelimiter::Sse {
            headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        }
        if let Some(key) = &self.api_key {
            match provider_defaults(self.format).auth {
                AuthScheme::Bearer => {
                    headers.insert(AUTHORIZATION, header_value(&format!("Bearer {key}"))?);
                }
                AuthScheme::Header(name) => {
                    headers.insert(HeaderName::from_static(name), header_value(key)?);
                }
                AuthScheme::None => {}
            }
        }
        if self.format == ProviderFormat::Anthropic {
            headers.insert(
                HeaderName::from_static("anthropic-version"),
                HeaderValue::from_static(ANTHROPIC_VERSION),
            );
        }
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Config(format!("invalid header name {name:?}: {e}")))?;
            headers.insert(name, header_value(value)?);
        }
        Ok(headers)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value)
        .map_err(|e| TransportError::Config(format!("invalid header value: {e}")))
}
