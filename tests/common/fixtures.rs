//! Listing fixtures and the listings table they are written to.

use anyhow::{Context, Result};

use sumai_agent::db::Database;

pub const YAMASHITA: (f64, f64) = (35.4437, 139.6380);

#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub address: String,
    pub price: String,
    pub floor_plan: String,
    pub pref: String,
    pub city: String,
    pub municipality: String,
    pub ward: String,
    pub town: String,
    pub traffic: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub listed: String,
    pub url: String,
    pub years: i64,
}

impl Listing {
    pub fn new(address: &str, price: i64, floor_plan: &str) -> Self {
        Self {
            address: address.to_string(),
            price: price.to_string(),
            floor_plan: floor_plan.to_string(),
            listed: "2024-06-01".to_string(),
            url: format!("https://example.com/{}", address),
            years: 10,
            ..Self::default()
        }
    }

    pub fn area(mut self, pref: &str, city: &str, municipality: &str, ward: &str, town: &str) -> Self {
        self.pref = pref.to_string();
        self.city = city.to_string();
        self.municipality = municipality.to_string();
        self.ward = ward.to_string();
        self.town = town.to_string();
        self
    }

    pub fn at(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn raw_price(mut self, raw: &str) -> Self {
        self.price = raw.to_string();
        self
    }

    pub fn listed(mut self, date: &str) -> Self {
        self.listed = date.to_string();
        self
    }

    pub fn traffic(mut self, traffic: &str) -> Self {
        self.traffic = traffic.to_string();
        self
    }
}

pub async fn seed_listings(db: &Database, table: &str, listings: &[Listing]) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            address TEXT,
            mi_price TEXT,
            floor_plan TEXT,
            pref TEXT,
            municipality_city_name TEXT,
            municipality_name TEXT,
            ward_name TEXT,
            town_name TEXT,
            traffic1 TEXT,
            latitude REAL,
            longitude REAL,
            last_listed_date TEXT,
            dt TEXT,
            url TEXT,
            years INTEGER
        )
        "#
    ))
    .execute(db.pool())
    .await
    .context("failed to create listings table")?;

    for listing in listings {
        sqlx::query(&format!(
            "INSERT INTO {table} VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&listing.address)
        .bind(&listing.price)
        .bind(&listing.floor_plan)
        .bind(&listing.pref)
        .bind(&listing.city)
        .bind(&listing.municipality)
        .bind(&listing.ward)
        .bind(&listing.town)
        .bind(&listing.traffic)
        .bind(listing.latitude)
        .bind(listing.longitude)
        .bind(&listing.listed)
        .bind(&listing.listed)
        .bind(&listing.url)
        .bind(listing.years)
        .execute(db.pool())
        .await
        .context("failed to insert listing")?;
    }
    Ok(())
}

/// `n` distinct listings in 千葉県船橋市本町.
pub fn funabashi(n: usize) -> Vec<Listing> {
    (1..=n)
        .map(|i| {
            Listing::new(&format!("千葉県船橋市本町{i}-1"), 30_000_000 + i as i64 * 10_000, "3LDK")
                .area("千葉県", "船橋市", "船橋市", "", "本町")
                .traffic(r#"["JR総武線 船橋駅 徒歩5分"]"#)
        })
        .collect()
}

/// `n` distinct listings in 千葉県柏市柏.
pub fn kashiwa(n: usize) -> Vec<Listing> {
    (1..=n)
        .map(|i| {
            Listing::new(&format!("千葉県柏市柏{i}-1"), 25_000_000 + i as i64 * 10_000, "2LDK")
                .area("千葉県", "柏市", "柏市", "", "柏")
        })
        .collect()
}

pub fn kawaguchi() -> Vec<Listing> {
    vec![
        Listing::new("埼玉県川口市栄町1-1", 45_000_000, "3LDK")
            .area("埼玉県", "川口市", "川口市", "", "栄町"),
        Listing::new("埼玉県川口市栄町2-1", 38_000_000, "2LDK")
            .area("埼玉県", "川口市", "川口市", "", "栄町"),
        Listing::new("埼玉県川口市栄町3-1", 62_000_000, "3LDK")
            .area("埼玉県", "川口市", "川口市", "", "栄町"),
    ]
}

/// Three listings around 山下町: on the spot, about 300 m north and about 2 km north.
pub fn yamashita() -> Vec<Listing> {
    let (lat, lng) = YAMASHITA;
    [(0.0, "1-1"), (0.0027, "2-1"), (0.018, "9-1")]
        .into_iter()
        .map(|(offset, number)| {
            Listing::new(&format!("神奈川県横浜市中区山下町{number}"), 55_000_000, "2LDK")
                .area("神奈川県", "横浜市", "横浜市中区", "中区", "山下町")
                .at(lat + offset, lng)
        })
        .collect()
}

/// The same 晴海 unit listed twice under different house numbers, plus a distinct one.
pub fn harumi() -> Vec<Listing> {
    vec![
        Listing::new("東京都中央区晴海3-1", 45_800_000, "3LDK")
            .area("東京都", "", "中央区", "", "晴海")
            .listed("2024-01-01"),
        Listing::new("東京都中央区晴海3-9", 45_800_000, "3LDK+S")
            .area("東京都", "", "中央区", "", "晴海")
            .listed("2024-06-30"),
        Listing::new("東京都中央区晴海5-2", 72_000_000, "4LDK")
            .area("東京都", "", "中央区", "", "晴海")
            .listed("2024-06-20"),
    ]
}

/// Rows without a usable price; every predicate must skip them.
pub fn unpriced() -> Vec<Listing> {
    vec![
        Listing::new("千葉県船橋市本町999-1", 0, "3LDK")
            .area("千葉県", "船橋市", "船橋市", "", "本町")
            .raw_price(""),
        Listing::new("千葉県船橋市本町998-1", 0, "3LDK")
            .area("千葉県", "船橋市", "船橋市", "", "本町")
            .raw_price("0"),
    ]
}
