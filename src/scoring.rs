//! Recommendation score in `[0, 100]` as a weighted average of independent sub-scores.

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::debug;

use crate::models::ListingRecord;

pub const NEUTRAL_SCORE: f64 = 50.0;

/// Days since listing → score, linear between breakpoints.
const RECENCY_BREAKPOINTS: [(f64, f64); 5] =
    [(0.0, 100.0), (7.0, 90.0), (30.0, 70.0), (90.0, 40.0), (180.0, 10.0)];

const DATE_COLUMNS: [&str; 2] = ["last_listed_date", "dt"];

/// One signal of the recommendation score. Returns `(score, weight)`; an error drops the signal
/// from the average.
pub trait SubScorer: Send + Sync {
    fn name(&self) -> &'static str;
    fn score(&self, listing: &ListingRecord, today: NaiveDate) -> Result<(f64, f64)>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecencyScorer;

impl SubScorer for RecencyScorer {
    fn name(&self) -> &'static str {
        "recency"
    }

    fn score(&self, listing: &ListingRecord, today: NaiveDate) -> Result<(f64, f64)> {
        let listed = DATE_COLUMNS
            .iter()
            .find_map(|column| listing.text(column))
            .and_then(|raw| parse_listing_date(&raw));
        let Some(listed) = listed else {
            return Ok((NEUTRAL_SCORE, 1.0));
        };
        let days = (today - listed).num_days() as f64;
        Ok((recency_score(days), 1.0))
    }
}

pub fn recency_score(days: f64) -> f64 {
    let (first_day, first_score) = RECENCY_BREAKPOINTS[0];
    if days <= first_day {
        return first_score;
    }
    for pair in RECENCY_BREAKPOINTS.windows(2) {
        let (d0, s0) = pair[0];
        let (d1, s1) = pair[1];
        if days <= d1 {
            return s0 + (s1 - s0) * (days - d0) / (d1 - d0);
        }
    }
    RECENCY_BREAKPOINTS[RECENCY_BREAKPOINTS.len() - 1].1
}

/// `YYYY-MM-DD`, `YYYY/MM/DD`, either with a time part, or RFC 3339.
pub fn parse_listing_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    for format in [
        "%Y-%m-%d %H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.date());
        }
    }
    let date_part = raw.split([' ', 'T']).next()?;
    ["%Y-%m-%d", "%Y/%m/%d"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(date_part, format).ok())
}

pub struct RecommendationScorer {
    scorers: Vec<Box<dyn SubScorer>>,
    today: Option<NaiveDate>,
}

impl Default for RecommendationScorer {
    fn default() -> Self {
        Self::new(vec![Box::new(RecencyScorer)])
    }
}

impl RecommendationScorer {
    pub fn new(scorers: Vec<Box<dyn SubScorer>>) -> Self {
        Self {
            scorers,
            today: None,
        }
    }

    /// Pins "today" instead of reading the clock.
    pub fn at(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn score(&self, listing: &ListingRecord) -> f64 {
        let today = self.today.unwrap_or_else(|| Utc::now().date_naive());
        let mut weighted = 0.0;
        let mut total_weight = 0.0;

        for scorer in &self.scorers {
            let outcome = scorer.score(listing, today).and_then(|(score, weight)| {
                if score.is_finite() && weight.is_finite() && weight > 0.0 {
                    Ok((score, weight))
                } else {
                    Err(anyhow!("invalid sub-score {score} with weight {weight}"))
                }
            });
            match outcome {
                Ok((score, weight)) => {
                    weighted += score.clamp(0.0, 100.0) * weight;
                    total_weight += weight;
                }
                Err(err) => debug!(scorer = scorer.name(), error = %err, "sub-scorer skipped"),
            }
        }

        if total_weight == 0.0 {
            return NEUTRAL_SCORE;
        }
        (weighted / total_weight).clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl SubScorer for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn score(&self, _listing: &ListingRecord, _today: NaiveDate) -> Result<(f64, f64)> {
            Err(anyhow!("no signal"))
        }
    }

    struct Fixed(f64, f64);

    impl SubScorer for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn score(&self, _listing: &ListingRecord, _today: NaiveDate) -> Result<(f64, f64)> {
            Ok((self.0, self.1))
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).expect("date")
    }

    fn listed(date: &str) -> ListingRecord {
        ListingRecord::from_pairs([("last_listed_date", date)])
    }

    #[test]
    fn recency_breakpoints() {
        assert_eq!(recency_score(-3.0), 100.0);
        assert_eq!(recency_score(0.0), 100.0);
        assert_eq!(recency_score(7.0), 90.0);
        assert_eq!(recency_score(30.0), 70.0);
        assert_eq!(recency_score(60.0), 55.0);
        assert_eq!(recency_score(90.0), 40.0);
        assert_eq!(recency_score(180.0), 10.0);
        assert_eq!(recency_score(900.0), 10.0);
    }

    #[test]
    fn accepted_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 6, 23);
        for raw in [
            "2024-06-23",
            "2024/06/23",
            "2024-06-23 10:00:00",
            "2024/06/23 10:00:00",
            "2024-06-23T10:00:00+09:00",
        ] {
            assert_eq!(parse_listing_date(raw), expected, "{raw}");
        }
        assert_eq!(parse_listing_date("先週"), None);
    }

    #[test]
    fn scores_from_listing_date_then_dt() {
        let scorer = RecommendationScorer::default().at(today());
        assert_eq!(scorer.score(&listed("2024-06-23")), 90.0);

        let dt_only = ListingRecord::from_pairs([("dt", "2024-05-31")]);
        assert_eq!(scorer.score(&dt_only), 70.0);
    }

    #[test]
    fn missing_or_bad_date_is_neutral() {
        let scorer = RecommendationScorer::default().at(today());
        assert_eq!(scorer.score(&ListingRecord::default()), NEUTRAL_SCORE);
        assert_eq!(scorer.score(&listed("not a date")), NEUTRAL_SCORE);
    }

    #[test]
    fn failing_sub_scorer_is_skipped() {
        let scorer = RecommendationScorer::new(vec![
            Box::new(RecencyScorer),
            Box::new(Failing),
            Box::new(Fixed(40.0, 3.0)),
        ])
        .at(today());
        // (100 * 1 + 40 * 3) / 4
        assert_eq!(scorer.score(&listed("2024-06-30")), 55.0);

        let only_failing = RecommendationScorer::new(vec![Box::new(Failing)]);
        assert_eq!(only_failing.score(&ListingRecord::default()), NEUTRAL_SCORE);
    }

    #[test]
    fn out_of_range_sub_scores_are_clamped() {
        let scorer = RecommendationScorer::new(vec![Box::new(Fixed(250.0, 1.0))]);
        assert_eq!(scorer.score(&ListingRecord::default()), 100.0);
        let zero_weight = RecommendationScorer::new(vec![Box::new(Fixed(80.0, 0.0))]);
        assert_eq!(zero_weight.score(&ListingRecord::default()), NEUTRAL_SCORE);
    }
}
