//! Structured search intent: the LLM payload contract, its validation and the deterministic
//! extractor used when the LLM is unavailable or returns something off-shape.

use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::completion::sanitize_model_output;
use crate::hierarchy::PREFECTURES;
use crate::models::Turn;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    PriceAnalysis,
    LocationAnalysis,
    MarketAnalysis,
    Comparison,
    #[default]
    ComplexSearch,
}

impl QueryType {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryType::PriceAnalysis => "price_analysis",
            QueryType::LocationAnalysis => "location_analysis",
            QueryType::MarketAnalysis => "market_analysis",
            QueryType::Comparison => "comparison",
            QueryType::ComplexSearch => "complex_search",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    #[default]
    Statistical,
    Comparison,
    Trend,
    Recommendation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PriceConditions {
    #[serde(default)]
    pub min_price: Option<i64>,
    #[serde(default)]
    pub max_price: Option<i64>,
    #[serde(default)]
    pub price_range: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LocationConditions {
    #[serde(default)]
    pub prefectures: Vec<String>,
    #[serde(default)]
    pub cities: Vec<String>,
    #[serde(default)]
    pub areas: Vec<String>,
    #[serde(default)]
    pub stations: Vec<String>,
}

impl LocationConditions {
    pub fn is_empty(&self) -> bool {
        self.prefectures.is_empty()
            && self.cities.is_empty()
            && self.areas.is_empty()
            && self.stations.is_empty()
    }

    /// Every place name, in prefecture, city, area, station order.
    pub fn names(&self) -> Vec<&str> {
        self.prefectures
            .iter()
            .chain(&self.cities)
            .chain(&self.areas)
            .chain(&self.stations)
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OtherConditions {
    #[serde(default)]
    pub floor_plan: Option<String>,
    #[serde(default)]
    pub years: Option<String>,
    #[serde(default)]
    pub traffic: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SearchIntent {
    pub query_type: QueryType,
    #[serde(default)]
    pub price_conditions: PriceConditions,
    #[serde(default)]
    pub location_conditions: LocationConditions,
    #[serde(default)]
    pub other_conditions: OtherConditions,
    #[serde(default)]
    pub analysis_type: AnalysisType,
}

/// Price and floor-plan conditions stated in a message, independent of location.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Refinements {
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub floor_plan: Option<String>,
}

impl Refinements {
    pub fn is_empty(&self) -> bool {
        self.min_price.is_none() && self.max_price.is_none() && self.floor_plan.is_none()
    }
}

impl SearchIntent {
    pub fn refinements(&self) -> Refinements {
        Refinements {
            min_price: self.price_conditions.min_price,
            max_price: self.price_conditions.max_price,
            floor_plan: self.other_conditions.floor_plan.clone(),
        }
    }

    /// Trims names, drops blanks and rejects inconsistent price bounds.
    fn validated(mut self) -> Result<Self> {
        let prices = &self.price_conditions;
        if prices.min_price.is_some_and(|v| v < 0) || prices.max_price.is_some_and(|v| v < 0) {
            bail!("negative price bound");
        }
        if let (Some(min), Some(max)) = (prices.min_price, prices.max_price) {
            if min > max {
                bail!("min_price {min} exceeds max_price {max}");
            }
        }

        let location = &mut self.location_conditions;
        for names in [
            &mut location.prefectures,
            &mut location.cities,
            &mut location.areas,
            &mut location.stations,
        ] {
            *names = names
                .iter()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect();
        }
        let floor_plan = self
            .other_conditions
            .floor_plan
            .take()
            .map(|plan| plan.trim().to_uppercase())
            .filter(|plan| !plan.is_empty());
        self.other_conditions.floor_plan = floor_plan;
        Ok(self)
    }
}

/// Parses an LLM reply against the fixed intent shape; any deviation is an error.
pub fn parse_llm_intent(raw: &str) -> Result<SearchIntent> {
    let body = sanitize_model_output(raw.to_string());
    let intent: SearchIntent =
        serde_json::from_str(&body).context("intent payload does not match expected shape")?;
    intent.validated()
}

/// Location extraction and typo correction returned by the preprocessing call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LocationCorrection {
    pub has_location: bool,
    #[serde(default)]
    pub original_input: String,
    #[serde(default)]
    pub normalized_locations: Vec<String>,
    #[serde(default)]
    pub correction_made: bool,
    #[serde(default)]
    pub confidence: f64,
}

impl LocationCorrection {
    /// `※「千葉件」を「千葉県」で検索しました。` when a correction was applied.
    pub fn note(&self) -> Option<String> {
        if !self.correction_made || self.normalized_locations.is_empty() {
            return None;
        }
        Some(format!(
            "※「{}」を「{}」で検索しました。",
            self.original_input,
            self.normalized_locations.join("、")
        ))
    }
}

pub fn parse_location_correction(raw: &str) -> Result<LocationCorrection> {
    let body = sanitize_model_output(raw.to_string());
    let mut correction: LocationCorrection =
        serde_json::from_str(&body).context("location payload does not match expected shape")?;
    if !(0.0..=1.0).contains(&correction.confidence) {
        bail!("location confidence {} out of range", correction.confidence);
    }
    correction.normalized_locations = correction
        .normalized_locations
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();
    correction.original_input = correction.original_input.trim().to_string();
    Ok(correction)
}

const INTENT_SYSTEM_PROMPT: &str = r#"あなたは不動産検索クエリの分析担当です。
ユーザーの質問を読み、次のJSONだけを出力してください。説明文やコードブロックは不要です。

{
  "query_type": "price_analysis" | "location_analysis" | "market_analysis" | "comparison" | "complex_search",
  "price_conditions": {"min_price": 整数(円) または null, "max_price": 整数(円) または null, "price_range": 文字列 または null},
  "location_conditions": {"prefectures": [], "cities": [], "areas": [], "stations": []},
  "other_conditions": {"floor_plan": 文字列 または null, "years": 文字列 または null, "traffic": 文字列 または null},
  "analysis_type": "statistical" | "comparison" | "trend" | "recommendation"
}

- 価格は円単位の整数に変換してください（例：5000万円 → 50000000）。
- 駅名は「駅」を除いて stations に入れてください。
- 記載のないキーは空配列または null にしてください。"#;

const LOCATION_SYSTEM_PROMPT: &str = r#"あなたは日本の地名の表記ゆれ・誤字を補正する担当です。
ユーザーの文章から地名を抜き出し、正しい表記に直して次のJSONだけを出力してください。

{"has_location": true | false, "original_input": "文章中の地名の表記", "normalized_locations": ["正しい地名"], "correction_made": true | false, "confidence": 0.0〜1.0}

- 地名がなければ has_location を false、normalized_locations を空配列にしてください。
- 表記を直した場合だけ correction_made を true にしてください。"#;

pub fn intent_prompt(
    message: &str,
    history: &[Turn],
    correction: Option<&LocationCorrection>,
) -> Vec<Turn> {
    let mut prompt = vec![Turn::system(INTENT_SYSTEM_PROMPT)];
    prompt.extend(history.iter().cloned());

    let mut user = format!("この質問を分析してください: {message}");
    if let Some(correction) = correction.filter(|c| !c.normalized_locations.is_empty()) {
        user.push_str(&format!(
            "\n\n地名の補正結果: {}",
            correction.normalized_locations.join("、")
        ));
    }
    prompt.push(Turn::user(user));
    prompt
}

/// Earlier turns shown to the location correction step.
const LOCATION_CONTEXT_TURNS: usize = 3;

pub fn location_prompt(message: &str, history: &[Turn]) -> Vec<Turn> {
    let recent = &history[history.len().saturating_sub(LOCATION_CONTEXT_TURNS)..];
    let mut prompt = vec![Turn::system(LOCATION_SYSTEM_PROMPT)];
    prompt.extend(recent.iter().cloned());
    prompt.push(Turn::user(format!(
        "この入力から地域名を抽出・補正してください: {message}"
    )));
    prompt
}

/// Place names recognised without the LLM, most specific first.
const KNOWN_PLACES: &[(&str, PlaceKind)] = &[
    ("船橋法典", PlaceKind::Station),
    ("船橋", PlaceKind::City),
    ("千葉", PlaceKind::Prefecture),
];

#[derive(Debug, Clone, Copy)]
enum PlaceKind {
    Prefecture,
    City,
    Station,
}

static PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9][0-9,]*(?:\.[0-9]+)?)\s*(億円|万円|円)\s*(以下|以内|未満|まで|以上|超)")
        .expect("price pattern")
});

static FLOOR_PLAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([1-9])\s*(S?LDK|S?DK|K|R)").expect("floor plan pattern"));

static CITY_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"((?:[\p{Han}--[県都府道区]]|[\p{Katakana}ヶー]){1,6}[市区])").expect("city token pattern")
});

static STATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"((?:\p{Han}|[\p{Katakana}ヶー]){1,8})駅").expect("station pattern")
});

/// Deterministic price / floor-plan grammar: `N万円以下`, `N円以上`, `N億円未満`, `3LDK`.
pub fn extract_refinements(message: &str) -> Refinements {
    let text = crate::normalize::normalize(message);
    let mut refinements = Refinements::default();

    for caps in PRICE_RE.captures_iter(&text) {
        let Some(amount) = caps
            .get(1)
            .and_then(|m| m.as_str().replace(',', "").parse::<f64>().ok())
        else {
            continue;
        };
        let unit = match caps.get(2).map(|m| m.as_str()) {
            Some("億円") => 100_000_000.0,
            Some("万円") => 10_000.0,
            _ => 1.0,
        };
        let yen = (amount * unit).round() as i64;
        match caps.get(3).map(|m| m.as_str()) {
            Some("以上") | Some("超") => refinements.min_price = Some(yen),
            _ => refinements.max_price = Some(yen),
        }
    }

    if let Some(caps) = FLOOR_PLAN_RE.captures(&text) {
        let rooms = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let layout = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        refinements.floor_plan = Some(format!("{rooms}{}", layout.to_uppercase()));
    }

    refinements
}

/// Intent built from keyword tables and regexes only.
pub fn fallback_intent(message: &str) -> SearchIntent {
    let mut intent = SearchIntent::default();
    let location = &mut intent.location_conditions;

    for prefecture in PREFECTURES {
        if message.contains(prefecture) {
            location.prefectures.push(prefecture.to_string());
        }
    }
    if location.prefectures.is_empty() {
        if let Some((name, kind)) = KNOWN_PLACES.iter().find(|(name, _)| message.contains(name)) {
            let name = name.to_string();
            match kind {
                PlaceKind::Prefecture => location.prefectures.push(name),
                PlaceKind::City => location.cities.push(name),
                PlaceKind::Station => location.stations.push(name),
            }
        }
    }
    for caps in STATION_RE.captures_iter(message) {
        if let Some(station) = caps.get(1) {
            push_unique(&mut location.stations, station.as_str());
        }
    }
    let remainder = location
        .prefectures
        .iter()
        .fold(message.to_string(), |text, prefecture| text.replace(prefecture.as_str(), " "));
    for caps in CITY_TOKEN_RE.captures_iter(&remainder) {
        if let Some(city) = caps.get(1) {
            push_unique(&mut location.cities, city.as_str());
        }
    }

    if !location.is_empty() {
        intent.query_type = QueryType::LocationAnalysis;
    }

    let refinements = extract_refinements(message);
    if refinements.min_price.is_some() || refinements.max_price.is_some() {
        intent.query_type = QueryType::ComplexSearch;
    }
    intent.price_conditions.min_price = refinements.min_price;
    intent.price_conditions.max_price = refinements.max_price;
    intent.other_conditions.floor_plan = refinements.floor_plan;

    intent
}

fn push_unique(names: &mut Vec<String>, name: &str) {
    if !names.iter().any(|existing| existing == name) {
        names.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_payload_inside_fence() {
        let raw = r#"```json
{
  "query_type": "price_analysis",
  "price_conditions": {"min_price": null, "max_price": 50000000, "price_range": "5000万円以下"},
  "location_conditions": {"prefectures": ["千葉県"], "cities": [" 船橋市 ", ""], "areas": [], "stations": []},
  "other_conditions": {"floor_plan": "3ldk", "years": null, "traffic": null},
  "analysis_type": "statistical"
}
```"#;
        let intent = parse_llm_intent(raw).expect("valid intent");
        assert_eq!(intent.query_type, QueryType::PriceAnalysis);
        assert_eq!(intent.price_conditions.max_price, Some(50_000_000));
        assert_eq!(intent.location_conditions.cities, vec!["船橋市"]);
        assert_eq!(intent.other_conditions.floor_plan.as_deref(), Some("3LDK"));
    }

    #[test]
    fn rejects_structural_mismatches() {
        // Unknown key.
        assert!(parse_llm_intent(r#"{"query_type":"complex_search","extra":1}"#).is_err());
        // Price as a string.
        assert!(parse_llm_intent(
            r#"{"query_type":"complex_search","price_conditions":{"max_price":"5000万円"}}"#
        )
        .is_err());
        // Unknown query type.
        assert!(parse_llm_intent(r#"{"query_type":"whatever"}"#).is_err());
        // Inverted bounds.
        assert!(parse_llm_intent(
            r#"{"query_type":"complex_search","price_conditions":{"min_price":9,"max_price":1}}"#
        )
        .is_err());
        assert!(parse_llm_intent("申し訳ありませんが分析できません").is_err());
    }

    #[test]
    fn price_grammar_converts_units() {
        let r = extract_refinements("3LDKで5000万円以下");
        assert_eq!(r.max_price, Some(50_000_000));
        assert_eq!(r.min_price, None);
        assert_eq!(r.floor_plan.as_deref(), Some("3LDK"));

        let r = extract_refinements("50,000,000円以下、１億円未満じゃなくて3000万円以上");
        assert_eq!(r.min_price, Some(30_000_000));
        assert_eq!(r.max_price, Some(100_000_000));

        assert!(extract_refinements("駅近の物件").is_empty());
    }

    #[test]
    fn fallback_recognises_known_places() {
        let intent = fallback_intent("船橋法典駅の近くで探してます");
        assert_eq!(intent.location_conditions.stations, vec!["船橋法典"]);
        assert_eq!(intent.query_type, QueryType::LocationAnalysis);

        let intent = fallback_intent("千葉県の物件で4000万円以下");
        assert_eq!(intent.location_conditions.prefectures, vec!["千葉県"]);
        assert_eq!(intent.price_conditions.max_price, Some(40_000_000));
        assert_eq!(intent.query_type, QueryType::ComplexSearch);
    }

    #[test]
    fn fallback_extracts_city_tokens() {
        let intent = fallback_intent("川崎市で3LDK、5000万円以下");
        assert_eq!(intent.location_conditions.cities, vec!["川崎市"]);
        assert_eq!(intent.other_conditions.floor_plan.as_deref(), Some("3LDK"));
        assert_eq!(intent.price_conditions.max_price, Some(50_000_000));
    }

    #[test]
    fn correction_note_only_when_corrected() {
        let corrected = parse_location_correction(
            r#"{"has_location":true,"original_input":"千葉件","normalized_locations":["千葉県"],"correction_made":true,"confidence":0.9}"#,
        )
        .expect("valid correction");
        assert_eq!(corrected.note().as_deref(), Some("※「千葉件」を「千葉県」で検索しました。"));

        let unchanged = LocationCorrection {
            has_location: true,
            original_input: "千葉県".into(),
            normalized_locations: vec!["千葉県".into()],
            correction_made: false,
            confidence: 1.0,
        };
        assert_eq!(unchanged.note(), None);

        assert!(parse_location_correction(r#"{"has_location":true,"confidence":3.0}"#).is_err());
    }

    #[test]
    fn intent_prompt_carries_history_and_corrections() {
        let history = vec![Turn::user("前の質問"), Turn::new("assistant", "前の回答")];
        let correction = LocationCorrection {
            has_location: true,
            original_input: "船僑".into(),
            normalized_locations: vec!["船橋".into()],
            correction_made: true,
            confidence: 0.8,
        };
        let prompt = intent_prompt("船僑の物件", &history, Some(&correction));
        assert_eq!(prompt.len(), 4);
        assert_eq!(prompt[0].role, "system");
        assert!(prompt[3].content.contains("船橋"));
    }

    #[test]
    fn location_prompt_keeps_the_latest_three_turns() {
        let history: Vec<Turn> = (1..=5).map(|i| Turn::user(format!("質問{i}"))).collect();
        let prompt = location_prompt("船僑の物件", &history);
        assert_eq!(prompt.len(), 5);
        assert_eq!(prompt[0].role, "system");
        assert_eq!(prompt[1].content, "質問3");
        assert_eq!(prompt[3].content, "質問5");
        assert!(prompt[4].content.ends_with("船僑の物件"));

        assert_eq!(location_prompt("柏", &[]).len(), 2);
    }
}
