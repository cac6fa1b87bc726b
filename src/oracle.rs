//! Client for the OpenAI-compatible text oracle used by intent
//! extraction.
//!
//! The model list from config is an ordered fallback chain: models are
//! tried in order with a bounded timeout each, first success wins.
//! Callers must treat a total failure as routine and degrade, never
//! block on the oracle.

use std::time::Duration;

use anyhow::{Context as _, Result};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use tap::Tap;

pub const METRIC_NAME: &str = "nestbot_oracle_tokens_total";

const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_TOKENS: u16 = 700;

pub struct Oracle {
    client: Client<OpenAIConfig>,
    models: Vec<String>,
}

impl Oracle {
    pub fn new(conf: &crate::config::OracleConfig) -> Self {
        let mut openai_conf =
            OpenAIConfig::new().with_api_key(conf.api_key.clone());
        if let Some(base) = &conf.api_base {
            openai_conf = openai_conf.with_api_base(base.clone());
        }
        Self {
            client: Client::with_config(openai_conf),
            models: conf.models.clone(),
        }
    }

    /// Ask the oracle for a completion. No structural guarantee on the
    /// returned text: it may be fenced, may be prose.
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        for model in &self.models {
            let attempt = self.complete_with(model, prompt);
            match tokio::time::timeout(ATTEMPT_TIMEOUT, attempt).await {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) => log::warn!("oracle model {model} failed: {e:#}"),
                Err(_) => log::warn!("oracle model {model} timed out"),
            }
        }
        anyhow::bail!("all oracle models failed")
    }

    async fn complete_with(&self, model: &str, prompt: &str) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages([ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()?
                .into()])
            .max_tokens(MAX_TOKENS)
            .build()?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .tap(|r| crate::metrics::update_service("oracle", r.is_ok()))?;

        if let Some(usage) = response.usage.as_ref() {
            metrics::counter!(
                METRIC_NAME,
                usage.prompt_tokens.into(),
                "type" => "prompt",
            );
            metrics::counter!(
                METRIC_NAME,
                usage.completion_tokens.into(),
                "type" => "completion",
            );
        }

        let choice =
            response.choices.first().context("no choices in oracle reply")?;
        let content = choice.message.content.clone().unwrap_or_default();
        if content.is_empty() {
            anyhow::bail!("empty oracle reply");
        }
        Ok(content)
    }
}

/// Remove the triple-backtick wrapper models like to add around JSON.
pub fn strip_code_fence(s: &str) -> &str {
    let s = s.trim();
    let s = s
        .strip_prefix("```json")
        .or_else(|| s.strip_prefix("```"))
        .unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(strip_code_fence(""), "");
    }
}
