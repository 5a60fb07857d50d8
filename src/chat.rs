use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::agent::{AgentQuery, PropertyAgent};
use crate::db::Database;
use crate::models::{
    ChatRequest, ChatResponse, ExplicitMode, SessionRequest, SessionSummary, StoredMessage,
};

/// Messages of earlier turns handed to the agent as conversation context.
const HISTORY_TURNS: i64 = 3;

/// Session log bookkeeping around the agent.
#[derive(Clone)]
pub struct ChatService {
    db: Database,
    agent: PropertyAgent,
}

impl ChatService {
    pub fn new(db: Database, agent: PropertyAgent) -> Self {
        Self { db, agent }
    }

    pub async fn answer(&self, request: ChatRequest) -> Result<ChatResponse> {
        let started = Instant::now();

        let session_id = match request.session_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => {
                self.db.ensure_session(&id).await?;
                id
            }
            None => self.db.create_session().await?,
        };

        let history = self.db.latest_messages(&session_id, HISTORY_TURNS).await?;
        self.db
            .save_message(&session_id, "user", &request.message)
            .await?;

        let response = self
            .agent
            .analyze_query(AgentQuery {
                message: request.message,
                session_id: session_id.clone(),
                mode: ExplicitMode::parse(request.active_function.as_deref()),
                radius_m: request.search_radius,
                history,
            })
            .await;

        self.db
            .save_message(&session_id, "assistant", &response.response_text)
            .await?;

        info!(
            session_id = %session_id,
            agent = %response.agent_name,
            confidence = response.confidence,
            latency_ms = started.elapsed().as_millis() as u64,
            "chat turn answered"
        );

        Ok(ChatResponse {
            message_id: Uuid::new_v4().to_string(),
            session_id,
            response: response.response_text,
            timestamp: Utc::now(),
            agent_used: response.agent_name,
            confidence: response.confidence,
            metadata: response.metadata,
            property_table: response.property_table,
        })
    }

    /// Creates a session, or clears the log of an existing one when `reset` is set.
    pub async fn open_session(&self, request: SessionRequest) -> Result<String> {
        if request.reset.unwrap_or(false) {
            if let Some(session_id) = request.session_id {
                self.db.ensure_session(&session_id).await?;
                self.db.delete_session_messages(&session_id).await?;
                return Ok(session_id);
            }
        }
        self.db.create_session().await
    }

    pub async fn sessions(&self) -> Result<Vec<SessionSummary>> {
        self.db.list_sessions().await
    }

    pub async fn messages(&self, session_id: &str) -> Result<Vec<StoredMessage>> {
        self.db.session_messages(session_id).await
    }

    /// The same valid-price count the agent reports, for an address substring.
    pub async fn property_count(&self, area: Option<&str>) -> i64 {
        self.agent
            .executor()
            .count_area(area.unwrap_or_default())
            .await
    }
}
