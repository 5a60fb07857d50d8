//! Detection of complete, geocodable addresses inside a chat message.

use std::sync::LazyLock;

use regex::Regex;

use crate::hierarchy::{PREFECTURES, TOWN_STOP_PHRASES};

pub const MIN_ADDRESS_CHARS: usize = 8;

const RANGE_DELIMITERS: &[&str] = &["から", "〜", "～", "~", "まで"];

/// Units that turn a trailing number into a price, size or count rather than a house number.
const QUANTITY_UNITS: &[&str] = &[
    "万", "円", "億", "件", "階", "年", "分", "平", "㎡", "m", "L", "D", "K", "S", "R",
];

/// Property and amenity words that make a candidate a search condition rather than a place.
const PROPERTY_WORDS: &[&str] = &[
    "マンション", "新築", "中古", "駅近", "物件", "戸建", "一戸建", "土地", "アパート",
    "賃貸", "分譲", "周辺", "近く",
];

const CITY: &str = r"(?:さいたま|[\p{Han}\p{Katakana}ヶー&&[^区]]{1,6}?)[市郡]";
const WARD: &str = r"\p{Han}{1,4}?区";
const TOWN: &str = r"[\p{Han}\p{Katakana}ヶー]*?[\p{Han}\p{Katakana}ヶー&&[^区市郡]]";
/// A town without a house number must carry its own suffix.
const TOWN_ONLY: &str = r"[\p{Han}\p{Katakana}ヶー&&[^区市郡町村]]{1,8}?(?:町|村)";
const NUMBER: &str = concat!(
    r"[0-9０-９一二三四五六七八九十]+丁目(?:[0-9０-９]+(?:[-－‐−の][0-9０-９]+)*(?:番地|番|号)?)?",
    r"|[0-9０-９]+(?:[-－‐−の][0-9０-９]+)*(?:番地|番|号)?",
);

/// Most specific first: numbered general, special-ward and ordinance-city forms, then the same
/// three shapes ending at the town.
static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let prefecture = format!("(?:{})", PREFECTURES.join("|"));
    [
        format!("{prefecture}{CITY}(?:{WARD})?{TOWN}(?:{NUMBER})"),
        format!("東京都{WARD}{TOWN}(?:{NUMBER})"),
        format!("{CITY}{WARD}{TOWN}(?:{NUMBER})"),
        format!("{prefecture}{CITY}(?:{WARD})?{TOWN_ONLY}"),
        format!("東京都{WARD}{TOWN_ONLY}"),
        format!("{CITY}{WARD}{TOWN_ONLY}"),
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

static HOUSE_NUMBER_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9０-９一二三四五六七八九十\-－‐−の丁目番地号]*").expect("house number pattern")
});

#[derive(Debug, Clone, Copy, Default)]
pub struct AddressDetector;

impl AddressDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(&self, message: &str) -> Option<String> {
        for (rank, pattern) in PATTERNS.iter().enumerate() {
            for found in pattern.find_iter(message) {
                let rest = &message[found.end()..];
                if QUANTITY_UNITS.iter().any(|unit| rest.starts_with(unit)) {
                    continue;
                }
                if PROPERTY_WORDS.iter().any(|word| found.as_str().contains(word)) {
                    tracing::debug!(
                        rank,
                        candidate = found.as_str(),
                        "address candidate names a property"
                    );
                    continue;
                }
                if is_range_start(rest) {
                    tracing::debug!(
                        rank,
                        candidate = found.as_str(),
                        "address candidate is part of a range"
                    );
                    continue;
                }
                let address = strip_conversational_tail(found.as_str());
                if address.chars().count() >= MIN_ADDRESS_CHARS {
                    tracing::debug!(rank, address = %address, "detected complete address");
                    return Some(address);
                }
            }
        }
        None
    }
}

fn is_range_start(rest: &str) -> bool {
    let skipped = HOUSE_NUMBER_TAIL
        .find(rest)
        .map(|m| &rest[m.end()..])
        .unwrap_or(rest)
        .trim_start();
    RANGE_DELIMITERS
        .iter()
        .any(|delimiter| skipped.starts_with(delimiter))
}

fn strip_conversational_tail(candidate: &str) -> String {
    let mut address = candidate;
    for phrase in TOWN_STOP_PHRASES {
        if let Some(idx) = address.find(phrase) {
            address = &address[..idx];
        }
    }
    address.trim().to_string()
}
