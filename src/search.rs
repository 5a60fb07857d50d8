//! Predicate construction and execution against the listings table.

use std::cmp::Ordering;

use anyhow::Result;
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite};
use tracing::{info, warn};

use crate::config::SearchPolicy;
use crate::db::Database;
use crate::geocode::{bounding_deltas, haversine_m, GeoPoint};
use crate::hierarchy::LocationHierarchy;
use crate::intent::{Refinements, SearchIntent};
use crate::models::{ResultSet, SearchMethod};
use crate::normalize::{fold_sql, normalize};

const LIKE_ESCAPE: &str = " ESCAPE '\\'";

const VALID_PRICE: &str = "mi_price IS NOT NULL AND mi_price != '' AND mi_price != '0'";

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Bounds {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl Bounds {
    pub fn around(center: GeoPoint, radius_m: f64) -> Self {
        let (dlat, dlng) = bounding_deltas(center, radius_m);
        Self {
            min_latitude: center.latitude - dlat,
            max_latitude: center.latitude + dlat,
            min_longitude: center.longitude - dlng,
            max_longitude: center.longitude + dlng,
        }
    }
}

/// Conjunction of independently optional condition groups. Every predicate built from it also
/// requires a valid price.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ListingFilter {
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    /// OR-group over `pref` and `address`.
    pub prefectures: Vec<String>,
    /// OR-group over `address`, `pref` and `traffic1`.
    pub areas: Vec<String>,
    /// OR-group over `traffic1`.
    pub stations: Vec<String>,
    pub floor_plan: Option<String>,
    /// Each term must appear in `address`.
    pub address_terms: Vec<String>,
    pub hierarchy: Option<LocationHierarchy>,
    pub bounds: Option<Bounds>,
}

impl ListingFilter {
    pub fn address(term: impl Into<String>) -> Self {
        Self {
            address_terms: vec![term.into()],
            ..Self::default()
        }
    }

    pub fn hierarchy(hierarchy: LocationHierarchy) -> Self {
        Self {
            hierarchy: Some(hierarchy),
            ..Self::default()
        }
    }

    pub fn from_intent(intent: &SearchIntent) -> Self {
        let location = &intent.location_conditions;
        Self {
            min_price: intent.price_conditions.min_price,
            max_price: intent.price_conditions.max_price,
            prefectures: location.prefectures.clone(),
            areas: location
                .cities
                .iter()
                .chain(&location.areas)
                .cloned()
                .collect(),
            stations: location.stations.clone(),
            floor_plan: intent.other_conditions.floor_plan.clone(),
            ..Self::default()
        }
    }

    pub fn with_refinements(mut self, refinements: &Refinements) -> Self {
        if refinements.min_price.is_some() {
            self.min_price = refinements.min_price;
        }
        if refinements.max_price.is_some() {
            self.max_price = refinements.max_price;
        }
        if refinements.floor_plan.is_some() {
            self.floor_plan = refinements.floor_plan.clone();
        }
        self
    }

    /// Appends ` WHERE ...` for this filter.
    pub fn push_predicate(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE ");
        qb.push(VALID_PRICE);

        if let Some(min) = self.min_price {
            qb.push(" AND CAST(mi_price AS INTEGER) >= ");
            qb.push_bind(min);
        }
        if let Some(max) = self.max_price {
            qb.push(" AND CAST(mi_price AS INTEGER) <= ");
            qb.push_bind(max);
        }

        push_or_group(qb, &self.prefectures, &["pref", "address"]);
        push_or_group(qb, &self.areas, &["address", "pref", "traffic1"]);
        push_or_group(qb, &self.stations, &["traffic1"]);

        if let Some(plan) = &self.floor_plan {
            push_like(qb, "floor_plan", plan);
        }
        for term in &self.address_terms {
            push_like(qb, "address", term);
        }
        if let Some(hierarchy) = &self.hierarchy {
            push_hierarchy(qb, hierarchy);
        }
        if let Some(bounds) = &self.bounds {
            qb.push(" AND CAST(latitude AS REAL) BETWEEN ");
            qb.push_bind(bounds.min_latitude);
            qb.push(" AND ");
            qb.push_bind(bounds.max_latitude);
            qb.push(" AND CAST(longitude AS REAL) BETWEEN ");
            qb.push_bind(bounds.min_longitude);
            qb.push(" AND ");
            qb.push_bind(bounds.max_longitude);
        }
    }
}

fn push_like(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, term: &str) {
    qb.push(" AND ");
    qb.push(fold_sql(column));
    qb.push(" LIKE ");
    qb.push_bind(like_pattern(term));
    qb.push(LIKE_ESCAPE);
}

fn push_or_group(qb: &mut QueryBuilder<'_, Sqlite>, terms: &[String], columns: &[&str]) {
    if terms.is_empty() {
        return;
    }
    qb.push(" AND (");
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            qb.push(" OR ");
        }
        qb.push("(");
        for (j, column) in columns.iter().enumerate() {
            if j > 0 {
                qb.push(" OR ");
            }
            qb.push(fold_sql(column));
            qb.push(" LIKE ");
            qb.push_bind(like_pattern(term));
            qb.push(LIKE_ESCAPE);
        }
        qb.push(")");
    }
    qb.push(")");
}

fn push_hierarchy(qb: &mut QueryBuilder<'_, Sqlite>, hierarchy: &LocationHierarchy) {
    if let Some(prefecture) = &hierarchy.prefecture {
        push_like(qb, "pref", prefecture);
    }
    if let Some(city) = &hierarchy.city {
        push_like(qb, "municipality_city_name", city);
    }
    if let Some(ward) = &hierarchy.ward {
        // Tokyo's special wards are stored as municipalities.
        let column = if hierarchy.is_tokyo() {
            "municipality_name"
        } else {
            "ward_name"
        };
        push_like(qb, column, ward);
    }
    if let Some(town) = &hierarchy.town {
        push_like(qb, "town_name", town);
    }
}

/// Substring pattern over the folded term; `%` and `_` typed by the user match literally.
fn like_pattern(term: &str) -> String {
    let folded = normalize(term.trim());
    let mut escaped = String::with_capacity(folded.len());
    for c in folded.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("%{escaped}%")
}

#[derive(Clone)]
pub struct SearchExecutor {
    db: Database,
    policy: SearchPolicy,
}

impl SearchExecutor {
    pub fn new(db: Database, policy: SearchPolicy) -> Self {
        Self { db, policy }
    }

    /// COUNT plus a newest-first sample for `filter`. Database errors yield an empty result.
    pub async fn execute(&self, filter: &ListingFilter, method: SearchMethod) -> ResultSet {
        match self.try_execute(filter, method).await {
            Ok(result) => result,
            Err(err) => {
                warn!(method = method.as_str(), error = %err, "listing query failed");
                ResultSet::empty(method)
            }
        }
    }

    async fn try_execute(&self, filter: &ListingFilter, method: SearchMethod) -> Result<ResultSet> {
        let table = &self.policy.listings_table;

        let mut count_qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT COUNT(*) FROM {table}"));
        filter.push_predicate(&mut count_qb);
        let total_count = self.db.fetch_count(&mut count_qb).await?;

        let rows = if total_count > 0 && self.policy.sample_limit > 0 {
            let mut sample_qb: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("SELECT * FROM {table}"));
            filter.push_predicate(&mut sample_qb);
            sample_qb.push(" ORDER BY dt DESC LIMIT ");
            sample_qb.push_bind(self.policy.sample_limit);
            self.db.fetch_listings(&mut sample_qb).await?
        } else {
            vec![]
        };

        info!(
            method = method.as_str(),
            total_count,
            sample = rows.len(),
            "listing query executed"
        );
        Ok(ResultSet {
            rows,
            total_count,
            search_method: method,
            dedup_stats: None,
        })
    }

    /// Listings within `radius_m` of `center`, nearest first. The total counts every listing
    /// inside the circle; the rows are the nearest `sample_limit` of them.
    pub async fn radius(
        &self,
        center: GeoPoint,
        radius_m: f64,
        refinements: &Refinements,
    ) -> ResultSet {
        let filter = ListingFilter {
            bounds: Some(Bounds::around(center, radius_m)),
            ..ListingFilter::default()
        }
        .with_refinements(refinements);

        match self.try_radius(center, radius_m, &filter).await {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "radius query failed");
                ResultSet::empty(SearchMethod::GeoRadius)
            }
        }
    }

    async fn try_radius(
        &self,
        center: GeoPoint,
        radius_m: f64,
        filter: &ListingFilter,
    ) -> Result<ResultSet> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT * FROM {}", self.policy.listings_table));
        filter.push_predicate(&mut qb);
        let candidates = self.db.fetch_listings(&mut qb).await?;
        let candidate_count = candidates.len();

        let mut inside: Vec<_> = candidates
            .into_iter()
            .filter_map(|mut row| {
                let distance = haversine_m(center, row.coordinates()?);
                (distance <= radius_m).then(|| {
                    row.distance_m = Some(distance);
                    row
                })
            })
            .collect();
        inside.sort_by(|a, b| {
            a.distance_m
                .partial_cmp(&b.distance_m)
                .unwrap_or(Ordering::Equal)
        });

        let total_count = inside.len() as i64;
        inside.truncate(self.policy.sample_limit.max(0) as usize);
        info!(
            radius_m,
            candidates = candidate_count,
            total_count,
            "radius query executed"
        );
        Ok(ResultSet {
            rows: inside,
            total_count,
            search_method: SearchMethod::GeoRadius,
            dedup_stats: None,
        })
    }

    /// Number of listings with a valid price.
    pub async fn count_all(&self) -> ResultSet {
        let mut result = self
            .count_only(&ListingFilter::default())
            .await;
        result.search_method = SearchMethod::CountOnly;
        result
    }

    /// Valid-price listings whose address contains `area`.
    pub async fn count_area(&self, area: &str) -> i64 {
        let filter = if area.trim().is_empty() {
            ListingFilter::default()
        } else {
            ListingFilter::address(area)
        };
        self.count_only(&filter).await.total_count
    }

    async fn count_only(&self, filter: &ListingFilter) -> ResultSet {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", self.policy.listings_table));
        filter.push_predicate(&mut qb);
        match self.db.fetch_count(&mut qb).await {
            Ok(total_count) => ResultSet {
                total_count,
                ..ResultSet::empty(SearchMethod::CountOnly)
            },
            Err(err) => {
                warn!(error = %err, "count query failed");
                ResultSet::empty(SearchMethod::CountOnly)
            }
        }
    }
}
