use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::completion::{CapabilityRevoked, TextCompletion};
use crate::models::Turn;

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    num_predict: usize,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            num_predict: 1024,
        }
    }

    pub async fn chat(&self, messages: &[Turn], temperature: f32) -> Result<String> {
        #[derive(Serialize)]
        struct ChatReq<'a> {
            model: &'a str,
            messages: &'a [Turn],
            stream: bool,
            options: ChatOptions,
        }

        #[derive(Serialize)]
        struct ChatOptions {
            num_predict: usize,
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct ChatResp {
            message: ChatMessage,
        }

        #[derive(Deserialize)]
        struct ChatMessage {
            content: String,
        }

        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&ChatReq {
                model: &self.model,
                messages,
                stream: false,
                options: ChatOptions {
                    num_predict: self.num_predict,
                    temperature,
                },
            })
            .send()
            .await
            .context("failed to call ollama chat endpoint")?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            let detail = normalize_err_body(&body);
            if matches!(
                status,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::PAYMENT_REQUIRED
            ) {
                let reason = format!("ollama /api/chat returned {status}: {detail}");
                return Err(CapabilityRevoked(reason).into());
            }
            anyhow::bail!("ollama /api/chat returned {status}: {detail}");
        }

        let response = response
            .json::<ChatResp>()
            .await
            .context("failed to decode ollama chat response")?;

        Ok(response.message.content.trim().to_string())
    }
}

#[async_trait]
impl TextCompletion for OllamaClient {
    async fn complete(&self, messages: &[Turn], temperature: f32) -> Result<String> {
        self.chat(messages, temperature).await
    }
}

fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(err) = json.get("error").and_then(|v| v.as_str()) {
            return err.to_string();
        }
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_prefers_json_error_field() {
        assert_eq!(
            normalize_err_body(r#"{"error":"model 'qwen' not found"}"#),
            "model 'qwen' not found"
        );
        assert_eq!(normalize_err_body("  "), "<empty body>");
        assert_eq!(normalize_err_body("bad gateway"), "bad gateway");
    }
}
