//! Location text folding.
//!
//! Addresses in the listings table and in user messages spell the same place in different ways
//! (霞ヶ関 / 霞ケ関 / 霞が関, full-width digits, decomposed voiced marks). `normalize` maps every
//! variant to one canonical form so that substring matching treats them as equal. [`fold_sql`]
//! applies the same ordered table to a column with nested `replace()` calls, so the stored
//! column and the bound pattern are always folded identically.

use std::sync::LazyLock;

/// Bases that take a voiced mark (か → が). Katakana rows sit 0x60 above these.
const VOICED_BASES: &str = "かきくけこさしすせそたちつてとはひふへほ";
const SEMI_VOICED_BASES: &str = "はひふへほ";
const VOICED_MARK: char = '\u{3099}';
const SEMI_VOICED_MARK: char = '\u{309A}';
const KATAKANA_OFFSET: u32 = 0x60;

/// Ordered substitutions. Spacing and half-width marks become combining marks, base + mark pairs
/// are composed, and only then are single characters folded, so a composed が ends up as ヶ like
/// a precomposed one.
pub static FOLDS: LazyLock<Vec<(String, String)>> = LazyLock::new(build_folds);

fn build_folds() -> Vec<(String, String)> {
    let mut folds: Vec<(String, String)> = Vec::new();
    let mut fold = |from: String, to: String| folds.push((from, to));

    for from in ['\u{309B}', '\u{FF9E}'] {
        fold(from.to_string(), VOICED_MARK.to_string());
    }
    for from in ['\u{309C}', '\u{FF9F}'] {
        fold(from.to_string(), SEMI_VOICED_MARK.to_string());
    }

    let rows = [(VOICED_BASES, VOICED_MARK, 1), (SEMI_VOICED_BASES, SEMI_VOICED_MARK, 2)];
    for (bases, mark, step) in rows {
        for base in bases.chars() {
            for offset in [0, KATAKANA_OFFSET] {
                let code = base as u32 + offset;
                let pair = (char::from_u32(code), char::from_u32(code + step));
                if let (Some(from), Some(to)) = pair {
                    fold(format!("{from}{mark}"), to.to_string());
                }
            }
        }
    }
    fold(format!("ウ{VOICED_MARK}"), "ヴ".to_string());

    for from in ['ヵ', 'ケ', 'が'] {
        fold(from.to_string(), "ヶ".to_string());
    }
    for from in ['‐', '‑', '–', '—', '―', '−'] {
        fold(from.to_string(), "-".to_string());
    }
    fold("\u{3000}".to_string(), " ".to_string());
    // Full-width ASCII block (digits, Latin letters, '－', '＋', ...).
    for code in 0xFF01..=0xFF5E_u32 {
        if let (Some(from), Some(to)) = (char::from_u32(code), char::from_u32(code - 0xFEE0)) {
            fold(from.to_string(), to.to_string());
        }
    }
    folds
}

pub fn normalize(text: &str) -> String {
    FOLDS.iter().fold(text.to_string(), |acc, (from, to)| {
        if acc.contains(from.as_str()) {
            acc.replace(from.as_str(), to)
        } else {
            acc
        }
    })
}

/// SQL expression yielding `column` folded with [`FOLDS`].
pub fn fold_sql(column: &str) -> String {
    FOLDS.iter().fold(column.to_string(), |expr, (from, to)| {
        format!("replace({expr}, {}, {})", sql_literal(from), sql_literal(to))
    })
}

fn sql_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}
