use crate::domain::model::{NewsArticle, SentimentSample};
use crate::domain::ports::SentimentModel;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

const NEGATIVE_WORDS: [&str; 6] = ["delay", "disruption", "problem", "issue", "crisis", "failure"];
const POSITIVE_WORDS: [&str; 5] = ["smooth", "efficient", "resolved", "improved", "success"];
const URGENCY_WORDS: [&str; 20] = [
    "delay",
    "disruption",
    "closure",
    "shutdown",
    "strike",
    "congestion",
    "backlog",
    "shortage",
    "crisis",
    "emergency",
    "blockade",
    "storm",
    "hurricane",
    "typhoon",
    "flood",
    "accident",
    "incident",
    "breakdown",
    "failure",
    "outage",
];

fn keyword_pattern(words: &[&str]) -> Regex {
    // 只錨定字首，"delays"、"delayed" 也算命中 "delay"
    Regex::new(&format!(r"\b({})", words.join("|"))).expect("keyword list is a valid pattern")
}

static NEGATIVE: LazyLock<Regex> = LazyLock::new(|| keyword_pattern(&NEGATIVE_WORDS));
static POSITIVE: LazyLock<Regex> = LazyLock::new(|| keyword_pattern(&POSITIVE_WORDS));
static URGENCY: LazyLock<Regex> = LazyLock::new(|| keyword_pattern(&URGENCY_WORDS));

fn distinct_hits(pattern: &Regex, text: &str) -> usize {
    pattern
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect::<HashSet<_>>()
        .len()
}

/// 關鍵字式情緒分析，作為日後學習模型的替身
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordSentimentAnalyzer;

impl SentimentModel for KeywordSentimentAnalyzer {
    fn score_text(&self, text: &str) -> f64 {
        let lowered = text.to_lowercase();
        let negative = distinct_hits(&NEGATIVE, &lowered);
        let positive = distinct_hits(&POSITIVE, &lowered);

        let score = if negative > positive {
            -0.5 - 0.1 * negative as f64
        } else if positive > negative {
            0.3 + 0.1 * positive as f64
        } else {
            0.0
        };
        score.clamp(-1.0, 1.0)
    }

    fn count_urgency_keywords(&self, text: &str) -> u32 {
        distinct_hits(&URGENCY, &text.to_lowercase()) as u32
    }
}

/// 把一批新聞彙整成單一樣本；沒有文章時回傳 None（交給中性預設值處理）
pub fn aggregate_articles(
    model: &dyn SentimentModel,
    articles: &[NewsArticle],
    now: DateTime<Utc>,
) -> Option<SentimentSample> {
    let oldest = articles.iter().map(|a| a.published_at).min()?;
    let newest = articles.iter().map(|a| a.published_at).max()?;

    let mut total_score = 0.0;
    let mut urgency = 0u32;
    for article in articles {
        total_score += model.score_article(article);
        urgency += model
            .count_urgency_keywords(&format!("{} {}", article.title, article.content));
    }

    let window_hours = ((now - oldest).num_seconds() as f64 / 3600.0).max(0.0);

    Some(SentimentSample {
        score: (total_score / articles.len() as f64).clamp(-1.0, 1.0),
        article_count: articles.len() as u32,
        urgency_keyword_count: urgency,
        window_hours,
        observed_at: newest,
    })
}
