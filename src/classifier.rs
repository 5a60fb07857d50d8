//! Routing of a message to an ordered chain of search strategies.

use crate::address::AddressDetector;
use crate::hierarchy::{AddressHierarchyParser, LocationHierarchy};
use crate::models::ExplicitMode;

const COUNT_KEYWORDS: &[&str] = &[
    "何件",
    "件数",
    "総数",
    "合計",
    "全体",
    "全部で",
    "トータル",
    "登録されて",
    "データベース",
    "db",
    "全物件",
    "物件数",
];

/// Price, location and floor-plan vocabulary; any hit disqualifies a bare count.
const COMPLEX_KEYWORDS: &[&str] = &[
    "価格", "円", "万円", "億円", "予算", "相場", "安い", "高い", "都道府県", "県", "都", "府", "市",
    "区", "町", "丁目", "エリア", "地域", "駅", "沿線", "間取り", "ldk", "dk", "築年", "新築", "中古",
];

/// Hard-coded place names kept as the last location safety net, most specific first.
pub const LEGACY_KEYWORDS: &[&str] = &["東京", "船橋法典", "船橋", "千葉"];

#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    CountOnly,
    GeoRadius { address: String },
    ExactAddress { term: String },
    Hierarchical(LocationHierarchy),
    LegacyKeyword { keyword: &'static str },
    ComplexSearch,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::CountOnly => "count_only",
            Strategy::GeoRadius { .. } => "geo_radius",
            Strategy::ExactAddress { .. } => "exact_address",
            Strategy::Hierarchical(_) => "hierarchical",
            Strategy::LegacyKeyword { .. } => "legacy_keyword",
            Strategy::ComplexSearch => "complex_search",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryClassifier {
    detector: AddressDetector,
    parser: AddressHierarchyParser,
}

impl QueryClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parser(&self) -> &AddressHierarchyParser {
        &self.parser
    }

    /// Strategies to try in order. `CountOnly` and `GeoRadius` are terminal; the location
    /// strategies fall through to the next entry when they find nothing.
    pub fn plan(&self, message: &str, mode: Option<ExplicitMode>) -> Vec<Strategy> {
        let trimmed = message.trim();

        if is_count_only(trimmed) {
            return vec![Strategy::CountOnly];
        }

        match mode {
            Some(ExplicitMode::Geo) => {
                let address = self
                    .detector
                    .detect(trimmed)
                    .unwrap_or_else(|| trimmed.to_string());
                return vec![Strategy::GeoRadius { address }];
            }
            Some(ExplicitMode::Area) => return self.location_chain(trimmed),
            None => {}
        }

        if let Some(address) = self.detector.detect(trimmed) {
            return vec![Strategy::GeoRadius { address }];
        }

        let mut plan = self.location_chain(trimmed);
        plan.push(Strategy::ComplexSearch);
        plan
    }

    fn location_chain(&self, trimmed: &str) -> Vec<Strategy> {
        let mut chain = Vec::with_capacity(3);
        if !trimmed.is_empty() {
            chain.push(Strategy::ExactAddress {
                term: trimmed.to_string(),
            });
        }

        let hierarchy = self.parser.parse(trimmed);
        if hierarchy.is_parsed() {
            chain.push(Strategy::Hierarchical(hierarchy));
        } else if let Some(keyword) = LEGACY_KEYWORDS.iter().copied().find(|k| trimmed.contains(k)) {
            chain.push(Strategy::LegacyKeyword { keyword });
        }
        chain
    }
}

/// A count question with no price, location or floor-plan condition attached.
pub fn is_count_only(message: &str) -> bool {
    let lower = message.to_lowercase();
    let asks_count = COUNT_KEYWORDS.iter().any(|k| lower.contains(k))
        || (lower.contains("物件") && (lower.contains("何") || lower.contains("いくつ")))
        || (lower.contains("データベース") && (lower.contains("何") || lower.contains("いくつ")));
    asks_count && !COMPLEX_KEYWORDS.iter().any(|k| lower.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::LocationLevel;

    fn plan(message: &str) -> Vec<Strategy> {
        QueryClassifier::new().plan(message, None)
    }

    #[test]
    fn bare_count_question_is_count_only() {
        assert_eq!(plan("データベースには何件の物件がありますか？"), vec![Strategy::CountOnly]);
        assert_eq!(plan("全部で物件はいくつ？"), vec![Strategy::CountOnly]);
        assert!(is_count_only("DBの総数を教えて"));
    }

    #[test]
    fn count_with_conditions_is_not_count_only() {
        assert!(!is_count_only("渋谷区で5000万円以下の3LDKは何件？"));
        assert!(!is_count_only("神奈川県の物件は何件？"));
        assert!(!is_count_only("駅近の物件数"));
    }

    #[test]
    fn count_keyword_with_address_routes_to_geo_radius() {
        let strategies = plan("東京都中央区晴海3-1-5の周りの物件は何件？");
        assert_eq!(
            strategies,
            vec![Strategy::GeoRadius {
                address: "東京都中央区晴海3-1-5".to_string()
            }]
        );
    }

    #[test]
    fn area_mention_tries_exact_then_hierarchy_then_llm() {
        let strategies = plan("神奈川県横浜市中区の物件");
        assert_eq!(strategies.len(), 3);
        assert!(matches!(strategies[0], Strategy::ExactAddress { .. }));
        match &strategies[1] {
            Strategy::Hierarchical(h) => assert_eq!(h.level, Some(LocationLevel::Ward)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(strategies[2], Strategy::ComplexSearch);
    }

    #[test]
    fn area_with_property_words_stays_hierarchical() {
        for message in [
            "千葉県船橋市中古マンション",
            "東京都中央区新築マンション",
            "千葉県船橋市駅近の物件",
        ] {
            let strategies = plan(message);
            assert!(
                !strategies.iter().any(|s| matches!(s, Strategy::GeoRadius { .. })),
                "{message}: {strategies:?}"
            );
            assert!(
                strategies.iter().any(|s| matches!(s, Strategy::Hierarchical(_))),
                "{message}: {strategies:?}"
            );
        }
    }

    #[test]
    fn legacy_keyword_when_hierarchy_fails() {
        let strategies = plan("船橋法典の中古マンション");
        assert_eq!(
            strategies[1],
            Strategy::LegacyKeyword {
                keyword: "船橋法典"
            }
        );
        let strategies = plan("東京でおすすめ");
        assert_eq!(strategies[1], Strategy::LegacyKeyword { keyword: "東京" });
    }

    #[test]
    fn no_location_goes_to_complex_search() {
        let strategies = plan("3LDKで5000万円以下");
        assert_eq!(
            strategies,
            vec![
                Strategy::ExactAddress {
                    term: "3LDKで5000万円以下".to_string()
                },
                Strategy::ComplexSearch
            ]
        );
    }

    #[test]
    fn explicit_modes_override_routing() {
        let classifier = QueryClassifier::new();
        let geo = classifier.plan("晴海フラッグ", Some(ExplicitMode::Geo));
        assert_eq!(
            geo,
            vec![Strategy::GeoRadius {
                address: "晴海フラッグ".to_string()
            }]
        );

        let area = classifier.plan("東京都中央区晴海3-1-5", Some(ExplicitMode::Area));
        assert!(matches!(area[0], Strategy::ExactAddress { .. }));
        assert!(matches!(area[1], Strategy::Hierarchical(_)));
        assert!(!area.contains(&Strategy::ComplexSearch));

        // A bare count still wins over an explicit mode.
        assert_eq!(
            classifier.plan("全部で何件？", Some(ExplicitMode::Geo)),
            vec![Strategy::CountOnly]
        );
    }
}
