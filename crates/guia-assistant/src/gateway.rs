use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{instrument, warn};

use crate::prompt;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_REPLY_TOKENS: u32 = 512;

/// Reply when no credential is configured. Not an error: the checklist flow
/// works without the assistant.
pub const FALLBACK_REPLY: &str =
    "El asistente estará disponible próximamente. Puedes continuar con el procedimiento.";

/// Reply when the external call fails.
pub const UNAVAILABLE_REPLY: &str =
    "El asistente no está disponible en este momento. Intenta nuevamente más tarde.";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct AssistantReply {
    pub reply: String,
    pub ready: bool,
}

/// What the gateway needs to know about the active procedure: display name
/// and step titles, nothing more.
#[derive(Clone, Debug)]
pub struct ProcedureSummary {
    pub pro_id: String,
    pub nombre: String,
    pub pasos: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
enum GatewayError {
    #[error("network error: {0}")]
    Network(String),

    #[error("api error ({status}): {detail}")]
    Api { status: u16, detail: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("no usable chat messages in request")]
    EmptyChat,
}

/// Stateless bridge to the external text-generation service.
///
/// Failures never propagate: every outcome is a normal reply, with `ready`
/// telling the client whether the assistant actually answered.
pub struct AssistantGateway {
    client: Client,
    api_key: Option<SecretString>,
    api_url: String,
    model: String,
}

impl AssistantGateway {
    pub fn new(api_key: Option<SecretString>) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            api_key,
            api_url: API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Configure from the environment: `GUIA_ASSISTANT_API_KEY` first,
    /// `ANTHROPIC_API_KEY` as a fallback, model override via
    /// `GUIA_ASSISTANT_MODEL`.
    pub fn from_env() -> Self {
        let api_key = std::env::var("GUIA_ASSISTANT_API_KEY")
            .or_else(|_| std::env::var("ANTHROPIC_API_KEY"))
            .ok()
            .filter(|k| !k.is_empty())
            .map(SecretString::from);

        let mut gateway = Self::new(api_key);
        if let Ok(model) = std::env::var("GUIA_ASSISTANT_MODEL") {
            if !model.is_empty() {
                gateway.model = model;
            }
        }
        gateway
    }

    /// Point the gateway at a different endpoint (tests, proxies).
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Answer a chat turn in the context of a procedure and area.
    #[instrument(skip(self, procedure, messages), fields(configured = self.is_configured()))]
    pub async fn ask(
        &self,
        procedure: Option<&ProcedureSummary>,
        area_id: &str,
        messages: &[ChatMessage],
    ) -> AssistantReply {
        let Some(key) = &self.api_key else {
            return AssistantReply {
                reply: FALLBACK_REPLY.to_string(),
                ready: false,
            };
        };

        match self.request_reply(key, procedure, area_id, messages).await {
            Ok(text) => AssistantReply {
                reply: text,
                ready: true,
            },
            Err(e) => {
                warn!(error = %e, "assistant call failed");
                AssistantReply {
                    reply: UNAVAILABLE_REPLY.to_string(),
                    ready: false,
                }
            }
        }
    }

    async fn request_reply(
        &self,
        key: &SecretString,
        procedure: Option<&ProcedureSummary>,
        area_id: &str,
        messages: &[ChatMessage],
    ) -> Result<String, GatewayError> {
        let history = convert_messages(messages);
        if history.is_empty() {
            return Err(GatewayError::EmptyChat);
        }

        let body = json!({
            "model": self.model,
            "max_tokens": MAX_REPLY_TOKENS,
            "system": prompt::build_system_prompt(procedure, area_id),
            "messages": history,
        });

        let resp = self
            .client
            .post(&self.api_url)
            .header("x-api-key", key.expose_secret())
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let detail = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Api { status, detail });
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        payload["content"][0]["text"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| {
                GatewayError::MalformedResponse("missing content[0].text".to_string())
            })
    }
}

/// Forward the chat history verbatim, dropping roles the API does not take.
fn convert_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .filter(|m| m.role == "user" || m.role == "assistant")
        .map(|m| json!({"role": m.role, "content": m.content}))
        .collect()
}
