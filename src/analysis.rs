use std::collections::HashMap;

use serde::Serialize;

use crate::models::ListingRecord;

const DISTRIBUTION_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct PriceStats {
    pub min: i64,
    pub max: i64,
    pub avg: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Bucket {
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Analysis {
    pub total_count: i64,
    pub price_stats: Option<PriceStats>,
    pub prefecture_distribution: Vec<Bucket>,
    pub floor_plan_distribution: Vec<Bucket>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAnalyzer;

impl ResultAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// `explicit_total` is the COUNT of the full predicate and wins over `rows.len()`.
    pub fn analyze<'a, I>(&self, rows: I, explicit_total: Option<i64>) -> Analysis
    where
        I: IntoIterator<Item = &'a ListingRecord>,
    {
        let mut prices = Vec::new();
        let mut prefectures: Vec<String> = Vec::new();
        let mut floor_plans: Vec<String> = Vec::new();
        let mut row_count = 0usize;

        for row in rows {
            row_count += 1;
            if let Some(price) = row.price() {
                prices.push(price);
            }
            if let Some(pref) = row.prefecture() {
                prefectures.push(pref);
            }
            if let Some(plan) = row.floor_plan() {
                floor_plans.push(plan);
            }
        }

        let price_stats = match (prices.iter().min(), prices.iter().max()) {
            (Some(&min), Some(&max)) => Some(PriceStats {
                min,
                max,
                avg: prices.iter().map(|&p| p as f64).sum::<f64>() / prices.len() as f64,
                count: prices.len(),
            }),
            _ => None,
        };

        Analysis {
            total_count: explicit_total.unwrap_or(row_count as i64),
            price_stats,
            prefecture_distribution: top_buckets(prefectures),
            floor_plan_distribution: top_buckets(floor_plans),
        }
    }
}

/// Most frequent labels first, ties in order of first appearance.
fn top_buckets(labels: Vec<String>) -> Vec<Bucket> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, label) in labels.into_iter().enumerate() {
        counts.entry(label).or_insert((0, position)).0 += 1;
    }
    let mut buckets: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(label, (count, first))| (label, count, first))
        .collect();
    buckets.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    buckets
        .into_iter()
        .take(DISTRIBUTION_LIMIT)
        .map(|(label, count, _)| Bucket { label, count })
        .collect()
}
