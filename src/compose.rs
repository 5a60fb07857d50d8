//! Deterministic answer text, the LLM answer prompt and the rules an LLM answer must obey.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

use crate::analysis::Analysis;
use crate::config::SearchPolicy;
use crate::hierarchy::AddressHierarchyParser;
use crate::models::{ListingRecord, PropertyRow, Turn};

pub const REFINEMENT_HEADER: &str = "【絞り込みのご提案】";

pub const ZERO_RESULT_TEXT: &str = "申し訳ございませんが、指定された条件に合う物件は見つかりませんでした（0件）。検索条件を変更して再度お試しください。";

/// Claims an answer may not make while the count is positive.
static NOT_FOUND_CLAIM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"見つかりません|見当たりません|存在しません",
        r"|(?:物件|該当)(?:は|が|も)?(?:ありません|ございません)",
        r"|該当[^。\n]{0,8}?(?:ありません|ございません)",
        r"|該当(?:する)?(?:物件)?(?:は|が)?な(?:し|い)",
        r"|(?:^|[^0-9０-９,，])[0０]件",
    ))
    .expect("not found pattern")
});

const FLOOR_PLAN_SUMMARY_LIMIT: usize = 5;
const STATION_ENTRIES: usize = 2;
const UNKNOWN: &str = "不明";

#[derive(Debug, Clone, Copy)]
pub struct ResponseComposer {
    refinement_threshold: i64,
    example_limit: usize,
}

impl ResponseComposer {
    pub fn new(policy: &SearchPolicy) -> Self {
        Self {
            refinement_threshold: policy.refinement_threshold,
            example_limit: policy.example_limit,
        }
    }

    pub fn needs_refinement(&self, total_count: i64) -> bool {
        total_count > self.refinement_threshold
    }

    pub fn count_only_text(&self, total_count: i64) -> String {
        format!(
            "物件のデータベースには合計{}件の物件が登録されています。",
            thousands(total_count)
        )
    }

    /// Multi-section summary of an analysed result. `examples` are the ranked rows.
    pub fn compose(&self, area: &str, analysis: &Analysis, examples: &[&ListingRecord]) -> String {
        if analysis.total_count <= 0 {
            return ZERO_RESULT_TEXT.to_string();
        }

        let mut lines = vec![
            format!("{area}に関する不動産物件の検索結果は以下の通りです。"),
            String::new(),
            "【検索結果データ】".to_string(),
            format!("- 総件数: {}件", thousands(analysis.total_count)),
        ];
        if let Some(stats) = &analysis.price_stats {
            lines.push(format!(
                "- 価格統計: 最安値 {}、最高値 {}、平均価格 {}",
                man_yen(stats.min),
                man_yen(stats.max),
                man_yen(stats.avg as i64)
            ));
        }
        if !analysis.floor_plan_distribution.is_empty() {
            let plans: Vec<String> = analysis
                .floor_plan_distribution
                .iter()
                .take(FLOOR_PLAN_SUMMARY_LIMIT)
                .map(|bucket| format!("{} ({}件)", bucket.label, bucket.count))
                .collect();
            lines.push(format!("- 主な間取り: {}", plans.join("、")));
        }

        if !examples.is_empty() {
            lines.push(String::new());
            lines.push("【実際の物件例】".to_string());
            for (i, row) in examples.iter().take(self.example_limit).enumerate() {
                lines.push(format!("{}. {}", i + 1, example_line(row)));
            }
        }

        lines.push(String::new());
        lines.push(format!(
            "以上の情報から、{area}には様々な間取りと価格帯の物件が存在していることが分かります。"
        ));

        if self.needs_refinement(analysis.total_count) {
            lines.push(String::new());
            lines.push(self.refinement_block(analysis));
        }
        lines.join("\n")
    }

    pub fn refinement_block(&self, analysis: &Analysis) -> String {
        let price_example = analysis
            .price_stats
            .map(|stats| man_yen(stats.avg as i64))
            .unwrap_or_else(|| "3,000万円".to_string());
        let plan_example = analysis
            .floor_plan_distribution
            .first()
            .map(|bucket| bucket.label.clone())
            .unwrap_or_else(|| "3LDK".to_string());

        [
            REFINEMENT_HEADER.to_string(),
            format!(
                "検索結果が{}件と多いため、条件を追加すると探しやすくなります。",
                thousands(analysis.total_count)
            ),
            format!("- 価格帯を指定する（例：「{price_example}以下」）"),
            format!("- 間取りを指定する（例：「{plan_example}」）"),
            "- 駅名や町名まで指定する（例：「〇〇駅周辺」）".to_string(),
        ]
        .join("\n")
    }

    /// Prompt for the optional LLM answer; the deterministic figures are stated as facts.
    pub fn answer_prompt(
        &self,
        message: &str,
        area: &str,
        analysis: &Analysis,
        examples: &[&ListingRecord],
        history: &[Turn],
    ) -> Vec<Turn> {
        let example_lines: Vec<String> = examples
            .iter()
            .take(self.example_limit)
            .map(|row| format!("・{}", example_line(row)))
            .collect();
        let stats = serde_json::to_string(&analysis.price_stats).unwrap_or_default();
        let plans = serde_json::to_string(&analysis.floor_plan_distribution).unwrap_or_default();
        let total = analysis.total_count;

        let mut system = format!(
            "あなたは不動産分析の専門家です。\n\n\
             【重要な指示】\n\
             - 総件数は{total}件です。この数字は正確です。\n\
             - 総件数が0より大きい場合、「見つかりませんでした」「見当たりませんでした」と答えてはいけません。\n\n\
             【検索結果データ】\n\
             総件数: {total}件\n\
             価格統計: {stats}\n\
             間取り分布: {plans}\n\n\
             【実際の物件例】\n{}\n\n\
             「{area}に関する不動産物件の検索結果は以下の通りです。」で始め、総件数、価格統計（万円単位）、\
             主な間取り、番号付きの物件例、簡潔なまとめを改行して書いてください。",
            example_lines.join("\n")
        );
        if self.needs_refinement(total) {
            system.push_str(&format!(
                "\n件数が多いため、最後に「{REFINEMENT_HEADER}」という見出しで価格帯・間取り・駅名での絞り込み方法を提案してください。"
            ));
        }

        let mut prompt = vec![Turn::system(system)];
        prompt.extend(history.iter().cloned());
        prompt.push(Turn::user(message));
        prompt
    }

    /// Accepts an LLM answer only if it is consistent with the count; otherwise the
    /// deterministic text is used. Returns the text and whether the LLM answer was kept.
    pub fn finalize(
        &self,
        llm_answer: Option<String>,
        deterministic: String,
        analysis: &Analysis,
    ) -> (String, bool) {
        let Some(answer) = llm_answer else {
            return (deterministic, false);
        };
        if analysis.total_count <= 0 {
            return (deterministic, false);
        }
        if NOT_FOUND_CLAIM.is_match(&answer) {
            warn!(
                total_count = analysis.total_count,
                "llm answer claims no results, using deterministic text"
            );
            return (deterministic, false);
        }

        let mut answer = answer;
        if self.needs_refinement(analysis.total_count) && !answer.contains(REFINEMENT_HEADER) {
            info!("llm answer lacks refinement block, appending it");
            answer.push_str("\n\n");
            answer.push_str(&self.refinement_block(analysis));
        }
        (answer, true)
    }
}

/// Place name used in answer text: the parsed hierarchy, a known keyword, or a generic label.
pub fn search_area(message: &str, parser: &AddressHierarchyParser) -> String {
    let hierarchy = parser.parse(message);
    if hierarchy.is_parsed() {
        return hierarchy.joined();
    }
    if message.contains("東京") {
        "東京都".to_string()
    } else if message.contains("船橋法典") {
        "船橋法典駅周辺".to_string()
    } else if message.contains("船橋") {
        "船橋市".to_string()
    } else if message.contains("千葉") {
        "千葉県".to_string()
    } else {
        "指定地域".to_string()
    }
}

pub fn with_note(text: String, note: Option<&str>) -> String {
    match note {
        Some(note) => format!("{note}\n\n{text}"),
        None => text,
    }
}

pub fn property_row(row: &ListingRecord) -> PropertyRow {
    PropertyRow {
        address: row.address().unwrap_or_else(|| UNKNOWN.to_string()),
        price: display_price(row),
        age: row
            .text("years")
            .map(|years| match years.parse::<f64>() {
                Ok(n) => format!("築{}年", n as i64),
                Err(_) => years,
            })
            .unwrap_or_else(|| UNKNOWN.to_string()),
        floor_plan: row.floor_plan().unwrap_or_else(|| UNKNOWN.to_string()),
        station_info: row
            .text("traffic1")
            .map(|raw| station_info(&raw))
            .unwrap_or_else(|| UNKNOWN.to_string()),
        url: row.text("url"),
    }
}

fn example_line(row: &ListingRecord) -> String {
    format!(
        "{} {} {}",
        row.address().unwrap_or_else(|| "住所不明".to_string()),
        row.floor_plan().unwrap_or_else(|| "間取り不明".to_string()),
        display_price(row)
    )
}

fn display_price(row: &ListingRecord) -> String {
    match row.price() {
        Some(price) => man_yen(price),
        None => "価格不明".to_string(),
    }
}

/// `["JR総武線 船橋駅 徒歩5分", ...]` → first entries joined; non-JSON text is kept as is.
fn station_info(raw: &str) -> String {
    let entries: Vec<String> = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(fields) => {
                    let parts: Vec<&str> = fields
                        .values()
                        .filter_map(Value::as_str)
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .collect();
                    (!parts.is_empty()).then(|| parts.join(" "))
                }
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .take(STATION_ENTRIES)
            .collect(),
        Ok(Value::String(s)) => vec![s.trim().to_string()],
        _ => vec![raw.trim().to_string()],
    };
    if entries.is_empty() {
        UNKNOWN.to_string()
    } else {
        entries.join(" / ")
    }
}

/// 45800000 → `4,580万円`.
pub fn man_yen(yen: i64) -> String {
    format!("{}万円", thousands(yen / 10_000))
}

pub fn thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ResultAnalyzer;

    fn composer() -> ResponseComposer {
        ResponseComposer::new(&SearchPolicy::default())
    }

    fn rows(n: usize) -> Vec<ListingRecord> {
        (0..n)
            .map(|i| {
                ListingRecord::from_pairs([
                    ("address", format!("千葉県船橋市本町{}-1", i + 1)),
                    ("mi_price", format!("{}", 30_000_000 + i * 1_000_000)),
                    ("floor_plan", "3LDK".to_string()),
                    ("pref", "千葉県".to_string()),
                ])
            })
            .collect()
    }

    #[test]
    fn number_formatting() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1_234_567), "1,234,567");
        assert_eq!(man_yen(45_800_000), "4,580万円");
        assert_eq!(man_yen(123_400_000), "12,340万円");
    }

    #[test]
    fn refinement_block_only_above_threshold() {
        let rows = rows(3);
        let refs: Vec<&ListingRecord> = rows.iter().collect();

        let many = ResultAnalyzer::new().analyze(&rows, Some(150));
        let text = composer().compose("船橋市", &many, &refs);
        assert!(text.contains(REFINEMENT_HEADER));
        assert!(text.contains("総件数: 150件"));

        let few = ResultAnalyzer::new().analyze(&rows, Some(99));
        assert!(!composer().compose("船橋市", &few, &refs).contains(REFINEMENT_HEADER));

        let boundary = ResultAnalyzer::new().analyze(&rows, Some(100));
        assert!(!composer().compose("船橋市", &boundary, &refs).contains(REFINEMENT_HEADER));
    }

    #[test]
    fn examples_are_capped() {
        let rows = rows(8);
        let refs: Vec<&ListingRecord> = rows.iter().collect();
        let analysis = ResultAnalyzer::new().analyze(&rows, None);
        let text = composer().compose("船橋市", &analysis, &refs);
        assert!(text.contains("5. 千葉県船橋市本町5-1 3LDK 3,400万円"));
        assert!(!text.contains("6. "));
        assert!(text.contains("最安値 3,000万円"));
    }

    #[test]
    fn zero_results_say_so() {
        let analysis = ResultAnalyzer::new().analyze(&Vec::<ListingRecord>::new(), Some(0));
        let text = composer().compose("船橋市", &analysis, &[]);
        assert_eq!(text, ZERO_RESULT_TEXT);
        assert!(text.contains("0件"));
    }

    #[test]
    fn not_found_claim_is_overridden() {
        let rows = rows(2);
        let analysis = ResultAnalyzer::new().analyze(&rows, Some(2));
        let (text, used) = composer().finalize(
            Some("該当する物件は見つかりませんでした。".into()),
            "deterministic".into(),
            &analysis,
        );
        assert_eq!(text, "deterministic");
        assert!(!used);

        let (text, used) =
            composer().finalize(Some("2件見つかりました。".into()), "deterministic".into(), &analysis);
        assert_eq!(text, "2件見つかりました。");
        assert!(used);
    }

    #[test]
    fn not_found_variants_are_overridden() {
        let rows = rows(5);
        let analysis = ResultAnalyzer::new().analyze(&rows, Some(5));
        let claims = [
            "条件に合う物件は見つかりません。",
            "該当物件はありませんでした。",
            "物件は0件でした。",
            "検索結果は０件です。",
            "該当なしです。",
            "該当する物件がない状況です。",
            "ご希望の物件は存在しません。",
            "申し訳ありませんが、物件が見当たりませんでした。",
        ];
        for claim in claims {
            let (text, used) =
                composer().finalize(Some(claim.into()), "deterministic".into(), &analysis);
            assert_eq!(text, "deterministic", "{claim}");
            assert!(!used, "{claim}");
        }
    }

    #[test]
    fn counts_and_ordinary_negations_are_kept() {
        let rows = rows(5);
        let analysis = ResultAnalyzer::new().analyze(&rows, Some(5));
        let answers = [
            "総件数: 100件です。",
            "1,000件の中から5件を紹介します。",
            "駅から遠くはありません。",
            "以上の情報から、船橋市には様々な物件が存在していることが分かります。",
        ];
        for answer in answers {
            let (text, used) =
                composer().finalize(Some(answer.into()), "deterministic".into(), &analysis);
            assert_eq!(text, answer);
            assert!(used, "{answer}");
        }
    }

    #[test]
    fn missing_refinement_block_is_appended() {
        let rows = rows(2);
        let analysis = ResultAnalyzer::new().analyze(&rows, Some(500));
        let (text, used) =
            composer().finalize(Some("500件見つかりました。".into()), String::new(), &analysis);
        assert!(used);
        assert!(text.starts_with("500件見つかりました。"));
        assert!(text.contains(REFINEMENT_HEADER));
    }

    #[test]
    fn property_row_display() {
        let row = ListingRecord::from_pairs([
            ("address", "東京都中央区晴海3-1-5"),
            ("mi_price", "45800000"),
            ("floor_plan", "3LDK"),
            ("years", "12"),
            ("traffic1", r#"["都営大江戸線 勝どき駅 徒歩8分","ゆりかもめ 市場前駅 徒歩15分","BRT 晴海駅 徒歩3分"]"#),
            ("url", "https://example.com/1"),
        ]);
        let display = property_row(&row);
        assert_eq!(display.price, "4,580万円");
        assert_eq!(display.age, "築12年");
        assert_eq!(
            display.station_info,
            "都営大江戸線 勝どき駅 徒歩8分 / ゆりかもめ 市場前駅 徒歩15分"
        );
        assert_eq!(display.url.as_deref(), Some("https://example.com/1"));

        let sparse = property_row(&ListingRecord::from_pairs([("traffic1", "JR 船橋駅 徒歩5分")]));
        assert_eq!(sparse.station_info, "JR 船橋駅 徒歩5分");
        assert_eq!(sparse.price, "価格不明");
        assert_eq!(sparse.age, UNKNOWN);
    }

    #[test]
    fn area_label() {
        let parser = AddressHierarchyParser::new();
        assert_eq!(search_area("神奈川県横浜市中区の物件", &parser), "神奈川県横浜市中区");
        assert_eq!(search_area("船橋法典の物件", &parser), "船橋法典駅周辺");
        assert_eq!(search_area("おすすめは？", &parser), "指定地域");
    }

    #[test]
    fn note_is_prefixed() {
        assert_eq!(with_note("本文".into(), Some("※注記")), "※注記\n\n本文");
        assert_eq!(with_note("本文".into(), None), "本文");
    }
}
