use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::models::Turn;

static FENCED_BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\n(.*)\n```$").expect("fence pattern"));

/// Chat-style text completion backend.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, messages: &[Turn], temperature: f32) -> Result<String>;
}

/// Returned by a backend when it will not serve any further request (bad credentials,
/// exhausted quota). The gate stops calling it for the lifetime of the process.
#[derive(Debug)]
pub struct CapabilityRevoked(pub String);

impl fmt::Display for CapabilityRevoked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "completion capability revoked: {}", self.0)
    }
}

impl std::error::Error for CapabilityRevoked {}

/// Wraps an optional backend so callers only ever see `Some(text)` or `None`.
#[derive(Clone)]
pub struct CompletionGate {
    backend: Option<Arc<dyn TextCompletion>>,
    timeout: Duration,
    revoked: Arc<AtomicBool>,
    generation_limit: Arc<Semaphore>,
}

impl CompletionGate {
    pub fn new(backend: Arc<dyn TextCompletion>, timeout: Duration, max_concurrency: usize) -> Self {
        Self {
            backend: Some(backend),
            timeout,
            revoked: Arc::new(AtomicBool::new(false)),
            generation_limit: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            backend: None,
            timeout: Duration::ZERO,
            revoked: Arc::new(AtomicBool::new(true)),
            generation_limit: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some() && !self.revoked.load(Ordering::Relaxed)
    }

    /// Timeouts and backend errors are logged and reported as `None`.
    pub async fn complete(&self, messages: &[Turn], temperature: f32) -> Option<String> {
        if !self.is_available() {
            return None;
        }
        let backend = self.backend.as_ref()?;

        // Waiting for a generation slot counts against the timeout.
        let generation = async {
            let _permit = self.generation_limit.acquire().await?;
            backend.complete(messages, temperature).await
        };

        match tokio::time::timeout(self.timeout, generation).await {
            Ok(Ok(text)) => {
                let text = sanitize_model_output(text);
                if text.is_empty() {
                    warn!("completion returned empty text");
                    None
                } else {
                    debug!(chars = text.chars().count(), "completion succeeded");
                    Some(text)
                }
            }
            Ok(Err(err)) => {
                if err.downcast_ref::<CapabilityRevoked>().is_some() {
                    warn!(error = %err, "disabling completion backend");
                    self.revoked.store(true, Ordering::Relaxed);
                } else {
                    warn!(error = %err, "completion failed");
                }
                None
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "completion timed out");
                None
            }
        }
    }
}

/// Strips a surrounding markdown code fence.
pub fn sanitize_model_output(answer: String) -> String {
    let mut text = answer.trim().to_string();
    if text.starts_with("```") {
        if let Some(body) = FENCED_BODY.captures(&text).and_then(|caps| caps.get(1)) {
            text = body.as_str().trim().to_string();
        } else {
            text = text.replace("```", "").trim().to_string();
        }
    }
    text
}
