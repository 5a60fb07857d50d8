use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::models::{DedupStats, ListingRecord};
use crate::normalize::normalize;
use crate::scoring::RecommendationScorer;

/// Storage-room annotations that do not change which unit a listing is.
const STORAGE_SUFFIXES: &[&str] = &["+サービスルーム", "サービスルーム", "+納戸", "(S)", "+S"];

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredListing {
    pub record: ListingRecord,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub address_tail: String,
    pub price: String,
    pub floor_plan: String,
}

impl DedupKey {
    pub fn of(listing: &ListingRecord) -> Self {
        Self {
            address_tail: address_tail(&listing.address().unwrap_or_default()),
            price: listing.price_text(),
            floor_plan: normalize_floor_plan(&listing.floor_plan().unwrap_or_default()),
        }
    }
}

/// Part after the last 市/区, cut at the first hyphen: `東京都中央区晴海3-1-5` → `晴海3`.
pub fn address_tail(address: &str) -> String {
    let normalized = normalize(address.trim());
    let after_suffix = match normalized.rfind(['市', '区']) {
        Some(idx) => {
            let suffix_len = normalized[idx..].chars().next().map_or(0, char::len_utf8);
            &normalized[idx + suffix_len..]
        }
        None => normalized.as_str(),
    };
    after_suffix
        .split('-')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// `3LDK+S`, `3LDK(S)` and `3SLDK` all become `3LDK`.
pub fn normalize_floor_plan(plan: &str) -> String {
    let mut plan = normalize(plan.trim()).to_uppercase().replace(' ', "");
    loop {
        let Some(stripped) = STORAGE_SUFFIXES
            .iter()
            .find_map(|suffix| plan.strip_suffix(suffix))
        else {
            break;
        };
        plan = stripped.to_string();
    }

    let mut chars = plan.chars();
    if let (Some(rooms), Some('S')) = (chars.next(), chars.next()) {
        let rest = chars.as_str();
        if rooms.is_ascii_digit() && matches!(rest, "LDK" | "DK" | "K") {
            return format!("{rooms}{rest}");
        }
    }
    plan
}

#[derive(Clone)]
pub struct Deduplicator {
    scorer: Arc<RecommendationScorer>,
}

impl Deduplicator {
    pub fn new(scorer: Arc<RecommendationScorer>) -> Self {
        Self { scorer }
    }

    /// Keeps the highest-scored listing per [`DedupKey`]; output is ordered by score, best
    /// first, with arrival order breaking ties.
    pub fn dedupe(&self, rows: Vec<ListingRecord>) -> (Vec<ScoredListing>, DedupStats) {
        let original_count = rows.len();
        let mut slots: HashMap<DedupKey, usize> = HashMap::with_capacity(rows.len());
        let mut survivors: Vec<ScoredListing> = Vec::with_capacity(rows.len());

        for record in rows {
            let score = self.scorer.score(&record);
            let key = DedupKey::of(&record);
            match slots.get(&key) {
                Some(&slot) => {
                    if score > survivors[slot].score {
                        survivors[slot] = ScoredListing { record, score };
                    }
                }
                None => {
                    slots.insert(key, survivors.len());
                    survivors.push(ScoredListing { record, score });
                }
            }
        }

        survivors.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        let stats = DedupStats {
            original_count,
            duplicates_removed: original_count - survivors.len(),
            unique_count: survivors.len(),
        };
        info!(
            original = stats.original_count,
            removed = stats.duplicates_removed,
            unique = stats.unique_count,
            "deduplicated listings"
        );
        (survivors, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn listing(address: &str, price: &str, plan: &str, listed: &str) -> ListingRecord {
        ListingRecord::from_pairs([
            ("address", address),
            ("mi_price", price),
            ("floor_plan", plan),
            ("last_listed_date", listed),
        ])
    }

    fn deduplicator() -> Deduplicator {
        let today = NaiveDate::from_ymd_opt(2024, 6, 30).expect("date");
        Deduplicator::new(Arc::new(RecommendationScorer::default().at(today)))
    }

    #[test]
    fn address_tail_drops_prefix_and_house_number() {
        assert_eq!(address_tail("東京都中央区晴海3-1-5"), "晴海3");
        assert_eq!(address_tail("東京都中央区晴海３－９"), "晴海3");
        assert_eq!(address_tail("神奈川県横浜市中区山下町1"), "山下町1");
        assert_eq!(address_tail("晴海一丁目"), "晴海一丁目");
    }

    #[test]
    fn storage_annotations_collapse() {
        for plan in ["3LDK", "3LDK+S", "３ＬＤＫ＋Ｓ", "3LDK(S)", "3LDK+納戸", "3SLDK", "3ldk"] {
            assert_eq!(normalize_floor_plan(plan), "3LDK", "{plan}");
        }
        assert_eq!(normalize_floor_plan("2DK"), "2DK");
    }

    #[test]
    fn house_number_variants_collapse_to_best_scored() {
        let rows = vec![
            listing("東京都中央区晴海3-1", "45800000", "3LDK", "2024-01-01"),
            listing("東京都中央区晴海3-9", "45800000", "3LDK+S", "2024-06-30"),
            listing("東京都中央区晴海3-1", "52000000", "3LDK", "2024-06-01"),
        ];
        let (unique, stats) = deduplicator().dedupe(rows);

        assert_eq!(
            stats,
            DedupStats {
                original_count: 3,
                duplicates_removed: 1,
                unique_count: 2
            }
        );
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].record.address().as_deref(), Some("東京都中央区晴海3-9"));
        assert_eq!(unique[0].score, 100.0);
        assert!(unique[0].score >= unique[1].score);
    }

    #[test]
    fn different_blocks_stay_distinct() {
        let rows = vec![
            listing("東京都中央区晴海3-1", "45800000", "3LDK", "2024-06-30"),
            listing("東京都中央区晴海4-1", "45800000", "3LDK", "2024-06-30"),
        ];
        let (unique, stats) = deduplicator().dedupe(rows);
        assert_eq!(unique.len(), 2);
        assert_eq!(stats.duplicates_removed, 0);
    }
}
