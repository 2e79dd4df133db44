//! Entity pass: tickers, monetary amounts, percentages, dates, and metric
//! mentions, recognized with financial-domain patterns.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{Entity, EntityKind};

/// All-caps words that look like tickers but are not.
const TICKER_STOPLIST: &[&str] = &[
    "A", "I", "CEO", "CFO", "COO", "CTO", "Q", "K", "EPS", "GAAP", "SEC", "USD", "IPO", "AI",
];

static TICKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z]{1,5}\b").unwrap());

static MONEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\$\s?\d[\d,]*(?:\.\d+)?(?:\s?(?i:million|billion|trillion|[mbt])\b)?|\b\d[\d,]*(?:\.\d+)?\s?(?i:million|billion|trillion)\b",
    )
    .unwrap()
});

static PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?\s?(?:%|(?i:percent)\b)").unwrap());

static DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?i:Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|Jun(?:e)?|Jul(?:y)?|Aug(?:ust)?|Sep(?:tember)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?)\s+\d{1,2}(?:,?\s+\d{4})?\b|\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b|\b(?:19|20)\d{2}-\d{2}-\d{2}\b",
    )
    .unwrap()
});

static METRIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:(?:total|annual|quarterly)\s+)?(?:revenue|sales)\b|\b(?:(?:net|gross|operating)\s+)?(?:profit|income|earnings)(?:\s+per\s+share)?\b|\beps\b|\b(?:(?:revenue|sales|profit|income)\s+)?growth\b|\b(?:(?:gross|operating|net|profit)\s+)?margin\b",
    )
    .unwrap()
});

/// Recognize entities in `text`, returning spans sorted by position.
pub fn extract_entities(text: &str) -> Vec<Entity> {
    let mut entities = Vec::new();

    for m in TICKER.find_iter(text) {
        if TICKER_STOPLIST.contains(&m.as_str()) {
            continue;
        }
        entities.push(entity(EntityKind::Ticker, m));
    }
    for m in MONEY.find_iter(text) {
        entities.push(entity(EntityKind::Money, m));
    }
    for m in PERCENT.find_iter(text) {
        entities.push(entity(EntityKind::Percent, m));
    }
    for m in DATE.find_iter(text) {
        entities.push(entity(EntityKind::Date, m));
    }
    for m in METRIC.find_iter(text) {
        entities.push(entity(EntityKind::Metric, m));
    }

    entities.sort_by_key(|e| (e.start, e.kind));
    entities.dedup();
    entities
}

fn entity(kind: EntityKind, m: regex::Match<'_>) -> Entity {
    Entity {
        kind,
        text: m.as_str().to_string(),
        start: m.start(),
        end: m.end(),
    }
}
