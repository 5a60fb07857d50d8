//! Prefecture > city > ward > town decomposition of free text.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const PREFECTURES: &[&str] = &[
    "北海道", "青森県", "岩手県", "宮城県", "秋田県", "山形県", "福島県", "茨城県", "栃木県",
    "群馬県", "埼玉県", "千葉県", "東京都", "神奈川県", "新潟県", "富山県", "石川県", "福井県",
    "山梨県", "長野県", "岐阜県", "静岡県", "愛知県", "三重県", "滋賀県", "京都府", "大阪府",
    "兵庫県", "奈良県", "和歌山県", "鳥取県", "島根県", "岡山県", "広島県", "山口県", "徳島県",
    "香川県", "愛媛県", "高知県", "福岡県", "佐賀県", "長崎県", "熊本県", "大分県", "宮崎県",
    "鹿児島県", "沖縄県",
];

/// Tried in this order; the first suffix group with a match wins.
const PREFECTURE_SUFFIXES: [char; 4] = ['道', '県', '都', '府'];

/// Conversational tails that are cut off a town candidate.
pub const TOWN_STOP_PHRASES: &[&str] = &[
    "で絞って",
    "で絞る",
    "について",
    "に関して",
    "の情報",
    "のデータ",
    "の物件",
    "の件数",
    "の相場",
    "で検索",
    "を検索",
    "を探して",
    "を教えて",
    "は何件",
    "は？",
    "周辺",
    "付近",
    "あたり",
];

static PREFECTURE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    PREFECTURE_SUFFIXES
        .iter()
        .filter_map(|suffix| {
            let names: Vec<&str> = PREFECTURES
                .iter()
                .copied()
                .filter(|name| name.ends_with(*suffix))
                .collect();
            Regex::new(&format!("({})", names.join("|"))).ok()
        })
        .collect()
});

static CITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"((?:[\p{Han}--区]|[\p{Katakana}ー]|[\p{Hiragana}--[のでにをはがへともや]])+?市)")
        .expect("city pattern")
});

static WARD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"((?:[\p{Han}--[町村市]]|[\p{Katakana}ー])+?区)").expect("ward pattern")
});

static TOWN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^。、，,\s]{2,})").expect("town pattern"));

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum LocationLevel {
    Prefecture,
    City,
    Ward,
    Town,
}

/// Parsed administrative units. `level == None` means the text could not be decomposed and
/// callers fall back to a raw substring search.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocationHierarchy {
    pub prefecture: Option<String>,
    pub city: Option<String>,
    pub ward: Option<String>,
    pub town: Option<String>,
    pub level: Option<LocationLevel>,
}

impl LocationHierarchy {
    pub fn is_parsed(&self) -> bool {
        self.level.is_some()
    }

    /// Components concatenated in order, e.g. `神奈川県横浜市中区山下町`.
    pub fn joined(&self) -> String {
        [&self.prefecture, &self.city, &self.ward, &self.town]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect()
    }

    /// Same hierarchy without the town, for coarse area searches.
    pub fn without_town(&self) -> Self {
        let level = if self.ward.is_some() {
            Some(LocationLevel::Ward)
        } else if self.city.is_some() {
            Some(LocationLevel::City)
        } else if self.prefecture.is_some() {
            Some(LocationLevel::Prefecture)
        } else {
            None
        };
        Self {
            town: None,
            level,
            ..self.clone()
        }
    }

    pub fn is_tokyo(&self) -> bool {
        self.prefecture.as_deref() == Some("東京都")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AddressHierarchyParser;

impl AddressHierarchyParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, text: &str) -> LocationHierarchy {
        let mut hierarchy = LocationHierarchy::default();

        let Some(prefecture) = PREFECTURE_PATTERNS
            .iter()
            .find_map(|pattern| pattern.captures(text).and_then(|caps| caps.get(1)))
        else {
            return hierarchy;
        };
        hierarchy.prefecture = Some(prefecture.as_str().to_string());
        hierarchy.level = Some(LocationLevel::Prefecture);
        let after_prefecture = &text[prefecture.end()..];

        if let Some(city) = CITY_RE.captures(after_prefecture).and_then(|c| c.get(1)) {
            hierarchy.city = Some(city.as_str().to_string());
            hierarchy.level = Some(LocationLevel::City);
            let after_city = &after_prefecture[city.end()..];

            // A town is only read after a ward; text right after a city is usually a condition.
            if let Some(ward) = WARD_RE.captures(after_city).and_then(|c| c.get(1)) {
                hierarchy.ward = Some(ward.as_str().to_string());
                hierarchy.level = Some(LocationLevel::Ward);
                apply_town(&mut hierarchy, &after_city[ward.end()..]);
            }
        } else if let Some(ward) = WARD_RE.captures(after_prefecture).and_then(|c| c.get(1)) {
            // Tokyo special wards and similar attach straight to the prefecture.
            hierarchy.ward = Some(ward.as_str().to_string());
            hierarchy.level = Some(LocationLevel::Ward);
            apply_town(&mut hierarchy, &after_prefecture[ward.end()..]);
        } else {
            apply_town(&mut hierarchy, after_prefecture);
        }

        hierarchy
    }
}

fn apply_town(hierarchy: &mut LocationHierarchy, remainder: &str) {
    if let Some(town) = extract_town(remainder) {
        hierarchy.town = Some(town);
        hierarchy.level = Some(LocationLevel::Town);
    }
}

fn extract_town(remainder: &str) -> Option<String> {
    let token = TOWN_RE.captures(remainder)?.get(1)?.as_str();

    let mut town = token;
    for phrase in TOWN_STOP_PHRASES {
        if let Some(idx) = town.find(phrase) {
            town = &town[..idx];
        }
    }
    let town = town
        .trim_end_matches(|c: char| {
            c.is_ascii_digit()
                || ('０'..='９').contains(&c)
                || matches!(c, '-' | '－' | '‐' | '−' | '丁' | '目' | '番' | '地' | '号')
        })
        .trim_end_matches(['の', 'で', 'に', 'を', 'は', 'が', '？', '?', '！', '!']);

    let first = town.chars().next()?;
    let starts_like_place = matches!(first, '\u{4E00}'..='\u{9FFF}' | '\u{30A0}'..='\u{30FF}');
    if town.chars().count() < 2
        || !starts_like_place
        || town.chars().all(|c| c.is_ascii_digit())
        || town.chars().any(|c| c.is_ascii_alphabetic())
        || town.contains('円')
    {
        return None;
    }

    Some(town.to_string())
}
