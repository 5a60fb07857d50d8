//! Shared harness: an in-memory listings table plus stub completion and geocoding backends.

pub mod fixtures;

pub use fixtures::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

use sumai_agent::agent::{AgentQuery, PropertyAgent};
use sumai_agent::completion::{CompletionGate, TextCompletion};
use sumai_agent::config::SearchPolicy;
use sumai_agent::db::Database;
use sumai_agent::geocode::{GeoPoint, Geocoder};
use sumai_agent::models::{AgentResponse, ExplicitMode, Turn};
use sumai_agent::scoring::RecommendationScorer;

pub const SESSION: &str = "test-session";

pub struct TestHarness {
    pub db: Database,
    pub agent: PropertyAgent,
}

impl TestHarness {
    /// Completion unavailable, geocoder disabled, default policy.
    pub async fn new(listings: &[Listing]) -> Result<Self> {
        Self::with(listings, SearchPolicy::default(), CompletionGate::unavailable(), None).await
    }

    pub async fn with(
        listings: &[Listing],
        policy: SearchPolicy,
        completion: CompletionGate,
        geocoder: Option<Arc<dyn Geocoder>>,
    ) -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let db = Database::in_memory().await?;
        seed_listings(&db, &policy.listings_table, listings).await?;

        let today = NaiveDate::from_ymd_opt(2024, 6, 30).ok_or_else(|| anyhow!("bad date"))?;
        let agent = PropertyAgent::new(db.clone(), policy, completion, geocoder)
            .with_scorer(RecommendationScorer::default().at(today));
        Ok(Self { db, agent })
    }

    pub async fn ask(&self, message: &str) -> AgentResponse {
        self.ask_with(message, None, None).await
    }

    pub async fn ask_with(
        &self,
        message: &str,
        mode: Option<ExplicitMode>,
        radius_m: Option<f64>,
    ) -> AgentResponse {
        self.agent
            .analyze_query(AgentQuery {
                message: message.to_string(),
                session_id: SESSION.to_string(),
                mode,
                radius_m,
                history: vec![],
            })
            .await
    }
}

pub async fn search_history_len(db: &Database, session_id: &str) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM search_history WHERE session_id = ?")
        .bind(session_id)
        .fetch_one(db.pool())
        .await?;
    Ok(count)
}

/// Answers each kind of prompt with its own canned reply; a missing reply is a backend error.
#[derive(Default)]
pub struct RoutedCompletion {
    pub location: Option<String>,
    pub intent: Option<String>,
    pub answer: Option<String>,
    pub calls: AtomicUsize,
}

impl RoutedCompletion {
    pub fn gate(self) -> CompletionGate {
        CompletionGate::new(Arc::new(self), Duration::from_secs(5), 2)
    }
}

#[async_trait]
impl TextCompletion for RoutedCompletion {
    async fn complete(&self, messages: &[Turn], _temperature: f32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let system = messages
            .first()
            .map(|turn| turn.content.as_str())
            .unwrap_or_default();
        let reply = if system.contains("表記ゆれ") {
            &self.location
        } else if system.contains("不動産検索クエリの分析") {
            &self.intent
        } else {
            &self.answer
        };
        reply.clone().ok_or_else(|| anyhow!("no scripted reply"))
    }
}

pub enum StubGeocoder {
    Found(GeoPoint),
    NotFound,
    Failing,
}

#[async_trait]
impl Geocoder for StubGeocoder {
    async fn geocode(&self, _address: &str) -> Result<Option<GeoPoint>> {
        match self {
            StubGeocoder::Found(point) => Ok(Some(*point)),
            StubGeocoder::NotFound => Ok(None),
            StubGeocoder::Failing => Err(anyhow!("geocoder unreachable")),
        }
    }
}
