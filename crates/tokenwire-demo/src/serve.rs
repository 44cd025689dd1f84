use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokenwire_core::{ProviderFormat, StreamData};
use tokenwire_http::{ProviderClient, StreamingTextResponse, UpstreamConfig};
use tracing::{info, warn};

pub struct ServeOptions {
    pub addr: SocketAddr,
    pub provider: ProviderFormat,
    pub model: String,
    pub with_data: bool,
    pub deadline: Option<Duration>,
}

#[derive(Clone)]
struct AppState {
    upstream: ProviderClient,
    model: String,
    with_data: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionRequest {
    prompt: String,
}

pub async fn run(options: ServeOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = UpstreamConfig::from_env(options.provider)?;
    if let Some(deadline) = options.deadline {
        config = config.deadline(deadline);
    }
    let state = AppState {
        upstream: ProviderClient::new(config)?,
        model: options.model,
        with_data: options.with_data,
    };
    let app = Router::new()
        .route("/api/completion", post(completion))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(options.addr).await?;
    info!(addr = %listener.local_addr()?, provider = %options.provider, "serving completions");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;
    Ok(())
}

async fn completion(
    State(state): State<AppState>,
    Json(request): Json<CompletionRequest>,
) -> Result<StreamingTextResponse, (StatusCode, String)> {
    let format = state.upstream.format();
    let body = provider_body(format, &state.model, &request.prompt);
    let mut upstream = state.upstream.request(body);

    let data = state.with_data.then(StreamData::new);
    if let Some(data) = &data {
        data.append(&json!({"provider": format.name(), "model": state.model}))
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        let producer = data.clone();
        upstream = upstream.on_completion(move |text| {
            if let Err(err) = producer.append(&json!({"chars": text.chars().count()})) {
                warn!(error = %err, "failed to append completion stats");
            }
            producer.close();
        });
    }

    let text = upstream.send().await.map_err(|e| {
        warn!(error = %e, "upstream request failed");
        (StatusCode::BAD_GATEWAY, e.to_string())
    })?;
    let response = StreamingTextResponse::new(text);
    Ok(match data {
        Some(data) => response.with_data(data),
        None => response,
    })
}

/// Minimal streaming request payload for each provider.
fn provider_body(format: ProviderFormat, model: &str, prompt: &str) -> Value {
    let messages = json!([{"role": "user", "content": prompt}]);
    match format {
        ProviderFormat::OpenAi => json!({"model": model, "stream": true, "messages": messages}),
        ProviderFormat::Anthropic => json!({
            "model": model,
            "max_tokens": 1024,
            "stream": true,
            "messages": messages,
        }),
        ProviderFormat::Cohere => json!({"model": model, "prompt": prompt, "stream": true}),
        ProviderFormat::HuggingFace => json!({
            "inputs": prompt,
            "parameters": {"max_new_tokens": 256},
            "stream": true,
        }),
        ProviderFormat::Ollama => json!({"model": model, "prompt": prompt, "stream": true}),
        ProviderFormat::Replicate => Value::Null,
    }
}
