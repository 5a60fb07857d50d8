use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::geocode::GeoPoint;

/// One row of the listings table, kept as an opaque column → value mapping.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListingRecord {
    pub fields: Map<String, Value>,
    /// Metres from the search centre, set by radius searches only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
}

impl ListingRecord {
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            distance_m: None,
        }
    }

    /// Column value rendered as trimmed text; empty and null values are `None`.
    pub fn text(&self, column: &str) -> Option<String> {
        let value = match self.fields.get(column)? {
            Value::Null => return None,
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => other.to_string(),
        };
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    pub fn address(&self) -> Option<String> {
        self.text("address")
    }

    pub fn floor_plan(&self) -> Option<String> {
        self.text("floor_plan")
    }

    pub fn prefecture(&self) -> Option<String> {
        self.text("pref")
    }

    /// Raw `mi_price` text, used verbatim in the dedup key.
    pub fn price_text(&self) -> String {
        self.text("mi_price").unwrap_or_default()
    }

    /// Strictly positive price, `None` for empty, zero or unparsable values.
    pub fn price(&self) -> Option<i64> {
        let raw = self.text("mi_price")?;
        let parsed = raw
            .parse::<i64>()
            .ok()
            .or_else(|| raw.parse::<f64>().ok().map(|v| v as i64))?;
        (parsed > 0).then_some(parsed)
    }

    pub fn coordinates(&self) -> Option<GeoPoint> {
        let latitude = self.text("latitude")?.parse::<f64>().ok()?;
        let longitude = self.text("longitude")?.parse::<f64>().ok()?;
        Some(GeoPoint {
            latitude,
            longitude,
        })
    }
}

/// Which strategy produced a result set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    CountOnly,
    GeoRadius,
    AreaDegraded,
    ExactAddress,
    Hierarchical,
    AddressFallback,
    LegacyKeyword,
    ComplexSearch,
}

impl SearchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchMethod::CountOnly => "count_only",
            SearchMethod::GeoRadius => "geo_radius",
            SearchMethod::AreaDegraded => "area_degraded",
            SearchMethod::ExactAddress => "exact_address",
            SearchMethod::Hierarchical => "hierarchical",
            SearchMethod::AddressFallback => "address_fallback",
            SearchMethod::LegacyKeyword => "legacy_keyword",
            SearchMethod::ComplexSearch => "complex_search",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DedupStats {
    pub original_count: usize,
    pub duplicates_removed: usize,
    pub unique_count: usize,
}

/// Rows of one query plus the counts that travel beside them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSet {
    pub rows: Vec<ListingRecord>,
    /// Count of the full predicate; `rows` is a prefix of it.
    pub total_count: i64,
    pub search_method: SearchMethod,
    pub dedup_stats: Option<DedupStats>,
}

impl ResultSet {
    pub fn empty(search_method: SearchMethod) -> Self {
        Self {
            rows: vec![],
            total_count: 0,
            search_method,
            dedup_stats: None,
        }
    }
}

/// Display-ready row of the property table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PropertyRow {
    pub address: String,
    pub price: String,
    pub age: String,
    pub floor_plan: String,
    pub station_info: String,
    pub url: Option<String>,
}

/// Caller-forced handler, bypassing message classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExplicitMode {
    Geo,
    Area,
}

impl ExplicitMode {
    /// Unknown values (the UI also sends `advanced`) mean no override.
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value?.trim().to_ascii_lowercase().as_str() {
            "geo" => Some(ExplicitMode::Geo),
            "area" => Some(ExplicitMode::Area),
            _ => None,
        }
    }
}

/// One message of a prompt or of the session log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: String,
    pub content: String,
}

impl Turn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub agent_type: String,
    pub query_type: String,
    pub search_method: Option<SearchMethod>,
    pub total_count: i64,
    pub sample_count: usize,
    pub dedup: Option<DedupStats>,
    pub llm_used: bool,
    pub location_correction: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub center: Option<GeoPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub agent_name: String,
    pub response_text: String,
    pub confidence: f32,
    pub metadata: ResponseMetadata,
    pub property_table: Vec<PropertyRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub active_function: Option<String>,
    #[serde(default)]
    pub search_radius: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message_id: String,
    pub session_id: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    pub agent_used: String,
    pub confidence: f32,
    pub metadata: ResponseMetadata,
    pub property_table: Vec<PropertyRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub session_id: Option<String>,
    pub reset: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: String,
    pub message_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_rejects_empty_and_zero() {
        let empty = ListingRecord::from_pairs([("mi_price", "")]);
        let zero = ListingRecord::from_pairs([("mi_price", "0")]);
        let valid = ListingRecord::from_pairs([("mi_price", "45800000")]);
        let numeric = ListingRecord::from_pairs([("mi_price", Value::from(12_000_000))]);

        assert_eq!(empty.price(), None);
        assert_eq!(zero.price(), None);
        assert_eq!(valid.price(), Some(45_800_000));
        assert_eq!(numeric.price(), Some(12_000_000));
        assert_eq!(numeric.price_text(), "12000000");
    }

    #[test]
    fn coordinates_need_both_axes() {
        let missing = ListingRecord::from_pairs([("latitude", "35.6"), ("longitude", "")]);
        assert!(missing.coordinates().is_none());

        let present = ListingRecord::from_pairs([("latitude", "35.6"), ("longitude", "139.7")]);
        let point = present.coordinates().expect("coordinates");
        assert!((point.latitude - 35.6).abs() < 1e-9);
    }

    #[test]
    fn explicit_mode_ignores_unknown_values() {
        assert_eq!(ExplicitMode::parse(Some("geo")), Some(ExplicitMode::Geo));
        assert_eq!(ExplicitMode::parse(Some(" AREA ")), Some(ExplicitMode::Area));
        assert_eq!(ExplicitMode::parse(Some("advanced")), None);
        assert_eq!(ExplicitMode::parse(None), None);
    }
}
