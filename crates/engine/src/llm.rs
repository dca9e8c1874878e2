//! Generation-call boundary. The provider is opaque: it receives a
//! bounded prompt and must return JSON matching the fixed decision
//! schema. Anything else is a parse failure, recovered by the rule-based
//! fallback path.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use frontdesk_core::config::{LlmConfig, LlmProvider};
use frontdesk_core::domain::facts::{FactSource, ProposedFact};

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Next-step decision the model must emit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionAction {
    Continue,
    AskField { field: String },
    Book,
    Escalate { reason: String },
    Close,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
struct DecisionPayload {
    utterance: String,
    action: DecisionAction,
    #[serde(default)]
    facts: Vec<FactPayload>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
struct FactPayload {
    field: String,
    value: String,
    confidence: f32,
}

/// Parsed, normalized decision. Facts carry `llm_decision` as their
/// source; governance applies per-field gates downstream.
#[derive(Clone, Debug, PartialEq)]
pub struct LlmDecision {
    pub utterance: String,
    pub action: DecisionAction,
    pub facts: Vec<ProposedFact>,
}

impl LlmDecision {
    pub fn say(utterance: impl Into<String>, action: DecisionAction) -> Self {
        Self { utterance: utterance.into(), action, facts: Vec::new() }
    }

    pub fn with_fact(mut self, fact: ProposedFact) -> Self {
        self.facts.push(fact);
        self
    }
}

#[derive(Debug, Error)]
#[error("decision payload did not match the expected schema: {0}")]
pub struct DecisionParseError(String);

/// Strict parse of the model output. Tolerates a fenced code block around
/// the JSON but nothing else.
pub fn parse_decision(raw: &str) -> Result<LlmDecision, DecisionParseError> {
    let trimmed = strip_fences(raw.trim());
    let payload: DecisionPayload =
        serde_json::from_str(trimmed).map_err(|error| DecisionParseError(error.to_string()))?;

    if payload.utterance.trim().is_empty() {
        return Err(DecisionParseError("utterance must not be empty".to_string()));
    }
    for fact in &payload.facts {
        if !(0.0..=1.0).contains(&fact.confidence) {
            return Err(DecisionParseError(format!(
                "confidence for `{}` must be within 0..=1",
                fact.field
            )));
        }
    }

    Ok(LlmDecision {
        utterance: payload.utterance,
        action: payload.action,
        facts: payload
            .facts
            .into_iter()
            .map(|fact| {
                ProposedFact::new(fact.field, fact.value, FactSource::LlmDecision, fact.confidence)
            })
            .collect(),
    })
}

fn strip_fences(raw: &str) -> &str {
    let Some(rest) = raw.strip_prefix("```") else {
        return raw;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches(['\r', '\n']).trim_end().trim_end_matches("```").trim()
}

/// HTTP client for the configured provider endpoint.
pub struct HttpLlmClient {
    http: reqwest::Client,
    provider: LlmProvider,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let base_url = match (&config.base_url, config.provider) {
            (Some(base_url), _) => base_url.trim_end_matches('/').to_string(),
            (None, LlmProvider::OpenAi) => "https://api.openai.com".to_string(),
            (None, LlmProvider::Anthropic) => "https://api.anthropic.com".to_string(),
            (None, LlmProvider::Ollama) => "http://localhost:11434".to_string(),
        };
        Ok(Self {
            http,
            provider: config.provider,
            base_url,
            model: config.model.clone(),
            api_key: config.api_key.as_ref().map(|key| key.expose_secret().to_string()),
        })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        match self.provider {
            LlmProvider::Ollama => {
                let response: serde_json::Value = self
                    .http
                    .post(format!("{}/api/generate", self.base_url))
                    .json(&serde_json::json!({
                        "model": self.model,
                        "prompt": prompt,
                        "stream": false,
                    }))
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                response["response"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("ollama response missing `response` field"))
            }
            LlmProvider::OpenAi => {
                let api_key = self
                    .api_key
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("openai provider requires an api key"))?;
                let response: serde_json::Value = self
                    .http
                    .post(format!("{}/v1/chat/completions", self.base_url))
                    .bearer_auth(api_key)
                    .json(&serde_json::json!({
                        "model": self.model,
                        "messages": [{"role": "user", "content": prompt}],
                    }))
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                response["choices"][0]["message"]["content"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("openai response missing message content"))
            }
            LlmProvider::Anthropic => {
                let api_key = self
                    .api_key
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("anthropic provider requires an api key"))?;
                let response: serde_json::Value = self
                    .http
                    .post(format!("{}/v1/messages", self.base_url))
                    .header("x-api-key", api_key)
                    .header("anthropic-version", "2023-06-01")
                    .json(&serde_json::json!({
                        "model": self.model,
                        "max_tokens": 512,
                        "messages": [{"role": "user", "content": prompt}],
                    }))
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                response["content"][0]["text"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("anthropic response missing content text"))
            }
        }
    }
}

/// Queue-backed fake for tests: returns scripted responses in order and
/// fails once the queue runs dry.
#[derive(Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<String>) -> Self {
        Self { responses: Mutex::new(responses.into()) }
    }

    pub fn with_decisions(decisions: Vec<serde_json::Value>) -> Self {
        Self::new(decisions.into_iter().map(|decision| decision.to_string()).collect())
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("scripted llm client has no responses left"))
    }
}
