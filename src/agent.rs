//! The property analysis agent: routes a message through the strategy chain, ranks what the
//! winning strategy found and turns it into an answer.

use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::analysis::{Analysis, ResultAnalyzer};
use crate::classifier::{QueryClassifier, Strategy};
use crate::completion::CompletionGate;
use crate::compose::{property_row, search_area, with_note, ResponseComposer};
use crate::config::{AppConfig, GeocoderBackend, LlmBackend, SearchPolicy};
use crate::db::Database;
use crate::dedup::{Deduplicator, ScoredListing};
use crate::geocode::{GeoPoint, Geocoder, NominatimGeocoder};
use crate::intent::{
    extract_refinements, fallback_intent, intent_prompt, location_prompt, parse_llm_intent,
    parse_location_correction, LocationCorrection, QueryType, Refinements, SearchIntent,
};
use crate::models::{
    AgentResponse, ExplicitMode, ListingRecord, ResponseMetadata, ResultSet, SearchMethod, Turn,
};
use crate::ollama::OllamaClient;
use crate::scoring::RecommendationScorer;
use crate::search::{ListingFilter, SearchExecutor};
use crate::session::{SessionMemory, SessionSnapshot};

pub const AGENT_NAME: &str = "PropertyAnalysisAgent";
const AGENT_TYPE: &str = "property_analysis";
pub const FAILURE_TEXT: &str =
    "申し訳ございません。物件分析中にエラーが発生しました。再度お試しください。";

const INTENT_TEMPERATURE: f32 = 0.1;
const ANSWER_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, Default)]
pub struct AgentQuery {
    pub message: String,
    pub session_id: String,
    pub mode: Option<ExplicitMode>,
    pub radius_m: Option<f64>,
    /// Earlier turns of the conversation, oldest first.
    pub history: Vec<Turn>,
}

/// Result of the strategy chain before ranking.
struct Outcome {
    result: ResultSet,
    query_type: &'static str,
    filters: Value,
    correction: Option<LocationCorrection>,
    area: Option<String>,
    center: Option<GeoPoint>,
    radius_m: Option<f64>,
}

impl Outcome {
    fn located(result: ResultSet, filter: &ListingFilter) -> Self {
        Self {
            result,
            query_type: QueryType::LocationAnalysis.as_str(),
            filters: serde_json::to_value(filter).unwrap_or(Value::Null),
            correction: None,
            area: None,
            center: None,
            radius_m: None,
        }
    }
}

#[derive(Clone)]
pub struct PropertyAgent {
    classifier: QueryClassifier,
    executor: SearchExecutor,
    deduplicator: Deduplicator,
    analyzer: ResultAnalyzer,
    composer: ResponseComposer,
    completion: CompletionGate,
    geocoder: Option<Arc<dyn Geocoder>>,
    memory: Arc<SessionMemory>,
    db: Database,
    policy: SearchPolicy,
}

impl PropertyAgent {
    /// `geocoder: None` means radius search is switched off and never attempted.
    pub fn new(
        db: Database,
        policy: SearchPolicy,
        completion: CompletionGate,
        geocoder: Option<Arc<dyn Geocoder>>,
    ) -> Self {
        Self {
            classifier: QueryClassifier::new(),
            executor: SearchExecutor::new(db.clone(), policy.clone()),
            deduplicator: Deduplicator::new(Arc::new(RecommendationScorer::default())),
            analyzer: ResultAnalyzer::new(),
            composer: ResponseComposer::new(&policy),
            completion,
            geocoder,
            memory: Arc::new(SessionMemory::new(policy.session_capacity)),
            db,
            policy,
        }
    }

    /// Wires the configured completion and geocoding backends.
    pub fn from_config(db: Database, config: &AppConfig) -> Self {
        let completion = match config.llm.backend {
            LlmBackend::Ollama => CompletionGate::new(
                Arc::new(OllamaClient::new(
                    config.llm.ollama_base_url.clone(),
                    config.llm.answer_model.clone(),
                )),
                config.llm.timeout,
                config.llm.max_concurrency,
            ),
            LlmBackend::Disabled => CompletionGate::unavailable(),
        };
        let geocoder: Option<Arc<dyn Geocoder>> = match config.geocoder.backend {
            GeocoderBackend::Nominatim => Some(Arc::new(NominatimGeocoder::new(
                config.geocoder.nominatim_base_url.clone(),
                config.geocoder.timeout,
            ))),
            GeocoderBackend::Disabled => None,
        };
        info!(
            llm = completion.is_available(),
            geocoder = geocoder.is_some(),
            table = %config.policy.listings_table,
            "property agent configured"
        );
        Self::new(db, config.policy.clone(), completion, geocoder)
    }

    pub fn with_scorer(mut self, scorer: RecommendationScorer) -> Self {
        self.deduplicator = Deduplicator::new(Arc::new(scorer));
        self
    }

    pub fn memory(&self) -> &SessionMemory {
        &self.memory
    }

    pub fn executor(&self) -> &SearchExecutor {
        &self.executor
    }

    /// Never fails: when the pipeline itself breaks, the response is an apology with low
    /// confidence.
    pub async fn analyze_query(&self, query: AgentQuery) -> AgentResponse {
        match self.run(&query).await {
            Ok(response) => response,
            Err(err) => {
                error!(session_id = %query.session_id, error = %err, "property analysis failed");
                AgentResponse {
                    agent_name: AGENT_NAME.to_string(),
                    response_text: FAILURE_TEXT.to_string(),
                    confidence: 0.3,
                    metadata: ResponseMetadata {
                        agent_type: AGENT_TYPE.to_string(),
                        error: Some(err.to_string()),
                        ..ResponseMetadata::default()
                    },
                    property_table: vec![],
                }
            }
        }
    }

    async fn run(&self, query: &AgentQuery) -> Result<AgentResponse> {
        let message = query.message.trim();
        let plan = self.classifier.plan(message, query.mode);
        info!(
            session_id = %query.session_id,
            mode = ?query.mode,
            plan = ?plan.iter().map(Strategy::name).collect::<Vec<_>>(),
            "planned search strategies"
        );

        if plan.first() == Some(&Strategy::CountOnly) {
            return self.answer_count(query, message).await;
        }

        let refinements = extract_refinements(message);
        let outcome = match self.search(query, message, plan, &refinements).await {
            Some(outcome) => outcome,
            None => {
                info!("no strategy matched, reporting zero results");
                Outcome::located(
                    ResultSet::empty(SearchMethod::ExactAddress),
                    &ListingFilter::address(message),
                )
            }
        };

        self.answer_listings(query, message, outcome).await
    }

    /// Walks the plan until a strategy accepts its result.
    async fn search(
        &self,
        query: &AgentQuery,
        message: &str,
        plan: Vec<Strategy>,
        refinements: &Refinements,
    ) -> Option<Outcome> {
        for strategy in plan {
            match strategy {
                Strategy::CountOnly => {}
                Strategy::GeoRadius { address } => {
                    return Some(self.geo_search(&address, query.radius_m, refinements).await);
                }
                Strategy::ExactAddress { term } => {
                    let filter = ListingFilter::address(term).with_refinements(refinements);
                    let result = self.executor.execute(&filter, SearchMethod::ExactAddress).await;
                    if result.total_count > 0 {
                        return Some(Outcome::located(result, &filter));
                    }
                    debug!("exact address match empty, trying next strategy");
                }
                Strategy::Hierarchical(hierarchy) => {
                    let joined = hierarchy.joined();
                    let filter = ListingFilter::hierarchy(hierarchy).with_refinements(refinements);
                    let result = self.executor.execute(&filter, SearchMethod::Hierarchical).await;
                    if result.total_count > 0 {
                        return Some(Outcome::located(result, &filter));
                    }
                    info!(address = %joined, "hierarchical search empty, falling back to address substring");
                    let fallback = ListingFilter::address(joined).with_refinements(refinements);
                    let result = self
                        .executor
                        .execute(&fallback, SearchMethod::AddressFallback)
                        .await;
                    return Some(Outcome::located(result, &fallback));
                }
                Strategy::LegacyKeyword { keyword } => {
                    let filter = ListingFilter::address(keyword).with_refinements(refinements);
                    let result = self.executor.execute(&filter, SearchMethod::LegacyKeyword).await;
                    return Some(Outcome::located(result, &filter));
                }
                Strategy::ComplexSearch => {
                    return Some(self.complex_search(message, &query.history).await);
                }
            }
        }
        None
    }

    async fn geo_search(
        &self,
        address: &str,
        radius_m: Option<f64>,
        refinements: &Refinements,
    ) -> Outcome {
        let radius_m = radius_m
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(self.policy.default_radius_m);

        match &self.geocoder {
            Some(geocoder) => match geocoder.geocode(address).await {
                Ok(Some(center)) => {
                    info!(address, radius_m, "radius search around geocoded address");
                    let result = self.executor.radius(center, radius_m, refinements).await;
                    return Outcome {
                        filters: json!({
                            "address": address,
                            "center": center,
                            "radius_m": radius_m,
                            "refinements": refinements,
                        }),
                        area: Some(address.to_string()),
                        center: Some(center),
                        radius_m: Some(radius_m),
                        ..Outcome::located(result, &ListingFilter::default())
                    };
                }
                Ok(None) => info!(address, "address not geocodable, degrading to area search"),
                Err(err) => warn!(address, error = %err, "geocoding failed, degrading to area search"),
            },
            None => debug!("geocoder disabled, using area search"),
        }

        let hierarchy = self.classifier.parser().parse(address).without_town();
        if hierarchy.is_parsed() {
            let joined = hierarchy.joined();
            let filter = ListingFilter::hierarchy(hierarchy).with_refinements(refinements);
            let result = self.executor.execute(&filter, SearchMethod::AreaDegraded).await;
            if result.total_count > 0 {
                return Outcome::located(result, &filter);
            }
            info!(area = %joined, "degraded hierarchy empty, falling back to address substring");
            let fallback = ListingFilter::address(joined).with_refinements(refinements);
            let result = self.executor.execute(&fallback, SearchMethod::AreaDegraded).await;
            return Outcome::located(result, &fallback);
        }

        let filter = ListingFilter::address(address).with_refinements(refinements);
        let result = self.executor.execute(&filter, SearchMethod::AreaDegraded).await;
        Outcome::located(result, &filter)
    }

    async fn complex_search(&self, message: &str, history: &[Turn]) -> Outcome {
        let correction = self.correct_locations(message, history).await;

        let llm_intent = match self
            .completion
            .complete(
                &intent_prompt(message, history, correction.as_ref()),
                INTENT_TEMPERATURE,
            )
            .await
        {
            Some(raw) => match parse_llm_intent(&raw) {
                Ok(intent) => Some(intent),
                Err(err) => {
                    warn!(error = %err, "rejected llm intent payload, using keyword extraction");
                    None
                }
            },
            None => None,
        };
        let from_llm = llm_intent.is_some();
        let mut intent: SearchIntent = llm_intent.unwrap_or_else(|| fallback_intent(message));

        if let Some(correction) = &correction {
            if intent.location_conditions.is_empty() {
                intent.location_conditions.areas = correction.normalized_locations.clone();
            }
        }
        info!(
            from_llm,
            query_type = intent.query_type.as_str(),
            locations = ?intent.location_conditions.names(),
            "search intent resolved"
        );

        let filter = ListingFilter::from_intent(&intent);
        let result = self.executor.execute(&filter, SearchMethod::ComplexSearch).await;
        Outcome {
            query_type: intent.query_type.as_str(),
            correction,
            ..Outcome::located(result, &filter)
        }
    }

    /// Location names extracted and corrected by the LLM; `None` when unavailable or invalid.
    async fn correct_locations(
        &self,
        message: &str,
        history: &[Turn],
    ) -> Option<LocationCorrection> {
        let raw = self
            .completion
            .complete(&location_prompt(message, history), INTENT_TEMPERATURE)
            .await?;
        match parse_location_correction(&raw) {
            Ok(correction) if correction.has_location => {
                debug!(
                    corrected = correction.correction_made,
                    locations = ?correction.normalized_locations,
                    "location preprocessing"
                );
                Some(correction)
            }
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "rejected location preprocessing payload");
                None
            }
        }
    }

    async fn answer_count(&self, query: &AgentQuery, message: &str) -> Result<AgentResponse> {
        let result = self.executor.count_all().await;
        let analysis = self.analyzer.analyze(&result.rows, Some(result.total_count));
        let text = self.composer.count_only_text(result.total_count);

        let metadata = ResponseMetadata {
            agent_type: AGENT_TYPE.to_string(),
            query_type: "count_only".to_string(),
            search_method: Some(result.search_method),
            total_count: result.total_count,
            ..ResponseMetadata::default()
        };
        self.remember(query, message, &result, &analysis, json!({})).await?;

        Ok(AgentResponse {
            agent_name: AGENT_NAME.to_string(),
            response_text: text,
            confidence: 1.0,
            metadata,
            property_table: vec![],
        })
    }

    async fn answer_listings(
        &self,
        query: &AgentQuery,
        message: &str,
        outcome: Outcome,
    ) -> Result<AgentResponse> {
        let Outcome {
            mut result,
            query_type,
            filters,
            correction,
            area,
            center,
            radius_m,
        } = outcome;

        let sample_count = result.rows.len();
        let (mut ranked, dedup) = self.deduplicator.dedupe(std::mem::take(&mut result.rows));
        if center.is_some() {
            ranked.sort_by(|a, b| {
                a.record
                    .distance_m
                    .partial_cmp(&b.record.distance_m)
                    .unwrap_or(Ordering::Equal)
            });
        }
        result.dedup_stats = Some(dedup);

        let records: Vec<&ListingRecord> = ranked.iter().map(|s| &s.record).collect();
        let analysis = self
            .analyzer
            .analyze(records.iter().copied(), Some(result.total_count));
        let area = area.unwrap_or_else(|| search_area(message, self.classifier.parser()));

        let deterministic = self.composer.compose(&area, &analysis, &records);
        let llm_answer = if analysis.total_count > 0 {
            self.completion
                .complete(
                    &self
                        .composer
                        .answer_prompt(message, &area, &analysis, &records, &query.history),
                    ANSWER_TEMPERATURE,
                )
                .await
        } else {
            None
        };
        let (text, llm_used) = self.composer.finalize(llm_answer, deterministic, &analysis);
        let note = correction.as_ref().and_then(LocationCorrection::note);
        let text = with_note(text, note.as_deref());

        let property_table = ranked
            .iter()
            .take(self.policy.table_limit)
            .map(|scored: &ScoredListing| property_row(&scored.record))
            .collect();

        info!(
            method = result.search_method.as_str(),
            total_count = result.total_count,
            sample_count,
            unique = dedup.unique_count,
            llm_used,
            "analysis complete"
        );

        let metadata = ResponseMetadata {
            agent_type: AGENT_TYPE.to_string(),
            query_type: query_type.to_string(),
            search_method: Some(result.search_method),
            total_count: result.total_count,
            sample_count,
            dedup: Some(dedup),
            llm_used,
            location_correction: correction.as_ref().is_some_and(|c| c.correction_made),
            center,
            radius_m,
            error: None,
        };

        result.rows = ranked.into_iter().map(|s| s.record).collect();
        let filters = json!({
            "method": result.search_method.as_str(),
            "filters": filters,
        });
        self.remember(query, message, &result, &analysis, filters).await?;

        Ok(AgentResponse {
            agent_name: AGENT_NAME.to_string(),
            response_text: text,
            confidence: 0.95,
            metadata,
            property_table,
        })
    }

    /// Session snapshot and search history, written once the answer is complete.
    async fn remember(
        &self,
        query: &AgentQuery,
        message: &str,
        result: &ResultSet,
        analysis: &Analysis,
        filters: Value,
    ) -> Result<()> {
        if query.session_id.is_empty() {
            return Ok(());
        }
        self.memory.record(
            &query.session_id,
            SessionSnapshot {
                last_query: message.to_string(),
                last_result: result.clone(),
                last_analysis: analysis.clone(),
            },
        )?;
        if let Err(err) = self
            .db
            .record_search(&query.session_id, message, &filters, result.total_count)
            .await
        {
            warn!(session_id = %query.session_id, error = %err, "failed to record search history");
        }
        Ok(())
    }
}
