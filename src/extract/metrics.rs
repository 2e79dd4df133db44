//! Metric pass: pairs a metric-name mention with a nearby monetary or
//! percentage value inside a bounded window, and attaches a reporting
//! period when one is visible in the surrounding context.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::MetricValue;

/// What kind of value a metric pairs with.
#[derive(Clone, Copy, PartialEq)]
enum ValueKind {
    Amount,
    Percent,
}

/// Canonical metric name, the keywords that announce it, and its value kind.
/// Earlier entries win when keywords overlap, so the more specific names
/// come first.
const METRIC_KEYWORDS: &[(&str, &[&str], ValueKind)] = &[
    ("eps", &["earnings per share", "eps"], ValueKind::Amount),
    ("gross_margin", &["gross margin"], ValueKind::Percent),
    ("operating_margin", &["operating margin"], ValueKind::Percent),
    ("net_margin", &["net margin", "profit margin"], ValueKind::Percent),
    ("revenue", &["revenue", "sales"], ValueKind::Amount),
    ("net_income", &["net income", "profit", "earnings"], ValueKind::Amount),
    ("growth", &["growth", "increase"], ValueKind::Percent),
];

static AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$?\s?\d[\d,]*(?:\.\d+)?\s?(?i:million|billion|trillion|[mbt])?\b").unwrap()
});

static PERCENT_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?\s?(?:%|(?i:percent)\b)").unwrap());

static QUARTER_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bQ[1-4]\s+(?:of\s+)?(?:19|20)\d{2}\b").unwrap());
static QUARTER_SPELLED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:first|second|third|fourth)\s+quarter(?:\s+of\s+(?:19|20)\d{2})?\b")
        .unwrap()
});
static QUARTER_SHORT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bQ[1-4]\b").unwrap());
static FISCAL_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:fiscal\s+(?:year\s+)?|FY\s?)(?:19|20)?\d{2}\b").unwrap());
static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:19|20)\d{2}\b").unwrap());
static MONTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|Jun(?:e)?|Jul(?:y)?|Aug(?:ust)?|Sep(?:tember)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?)\b",
    )
    .unwrap()
});

/// Extract named metrics from `text`. The value must appear within
/// `window_chars` bytes after its metric keyword; the reporting period is
/// looked up in a slightly wider context around the pair.
pub fn extract_metrics(text: &str, window_chars: usize) -> BTreeMap<String, MetricValue> {
    let lower = text.to_lowercase();
    // Case mapping can shift byte offsets for some scripts; when it does,
    // scan the lowercased text itself so offsets stay consistent.
    let text = if lower.len() == text.len() { text } else { lower.as_str() };
    let mut out = BTreeMap::new();

    for (name, keywords, kind) in METRIC_KEYWORDS {
        if out.contains_key(*name) {
            continue;
        }
        for keyword in *keywords {
            if let Some(metric) = find_metric(text, &lower, keyword, *kind, window_chars) {
                out.insert((*name).to_string(), metric);
                break;
            }
        }
    }

    out
}

fn find_metric(
    text: &str,
    lower: &str,
    keyword: &str,
    kind: ValueKind,
    window_chars: usize,
) -> Option<MetricValue> {
    let mut from = 0;
    while let Some(pos) = lower[from..].find(keyword) {
        let kw_start = from + pos;
        let kw_end = kw_start + keyword.len();

        let window_end = floor_char_boundary(text, (kw_end + window_chars).min(text.len()));
        let window = &text[kw_end..window_end];

        let value = match kind {
            ValueKind::Amount => AMOUNT
                .find(window)
                .and_then(|m| parse_financial_value(m.as_str()).map(|v| (v, "$".to_string()))),
            ValueKind::Percent => PERCENT_VALUE.find(window).and_then(|m| {
                parse_leading_number(m.as_str()).map(|v| (v, "%".to_string()))
            }),
        };

        if let Some((value, unit)) = value {
            let ctx_start = floor_char_boundary(text, kw_start.saturating_sub(60));
            let context = &text[ctx_start..window_end];
            return Some(MetricValue {
                value,
                unit,
                period: extract_period(context),
            });
        }

        from = kw_end;
    }
    None
}

/// Parse `$1.2 billion` style values into a plain number, applying the
/// million/billion/trillion multiplier.
pub fn parse_financial_value(text: &str) -> Option<f64> {
    let cleaned = text.replace(['$', ','], "");
    let cleaned = cleaned.trim();

    let digits_end = cleaned
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(cleaned.len());
    let number: f64 = cleaned[..digits_end].parse().ok()?;

    let unit = cleaned[digits_end..].trim().to_lowercase();
    let multiplier = match unit.as_str() {
        "billion" | "b" => 1_000_000_000.0,
        "million" | "m" => 1_000_000.0,
        "trillion" | "t" => 1_000_000_000_000.0,
        _ => 1.0,
    };
    Some(number * multiplier)
}

fn parse_leading_number(text: &str) -> Option<f64> {
    let end = text
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(text.len());
    text[..end].parse().ok()
}

/// Find the most specific reporting period mentioned in `context`.
pub fn extract_period(context: &str) -> Option<String> {
    for re in [
        &*QUARTER_YEAR,
        &*QUARTER_SPELLED,
        &*QUARTER_SHORT,
        &*FISCAL_YEAR,
        &*YEAR,
        &*MONTH,
    ] {
        if let Some(m) = re.find(context) {
            // A bare quarter gets its year attached when one is nearby.
            if std::ptr::eq(re, &*QUARTER_SHORT) {
                if let Some(y) = YEAR.find(context) {
                    return Some(format!("{} {}", m.as_str(), y.as_str()));
                }
            }
            return Some(m.as_str().to_string());
        }
    }
    None
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revenue_with_amount_and_quarter() {
        let metrics = extract_metrics("The company reported revenue of $90 billion in Q1 2024.", 160);
        let revenue = metrics.get("revenue").expect("revenue extracted");
        assert_eq!(revenue.value, 90_000_000_000.0);
        assert_eq!(revenue.unit, "$");
        assert_eq!(revenue.period.as_deref(), Some("Q1 2024"));
    }

    #[test]
    fn eps_is_preferred_over_generic_earnings() {
        let metrics = extract_metrics("Earnings per share of $2.18 beat estimates.", 160);
        let eps = metrics.get("eps").expect("eps extracted");
        assert_eq!(eps.value, 2.18);
    }

    #[test]
    fn margin_pairs_with_percentage() {
        let metrics =
            extract_metrics("Gross margin of 46.2% expanded on mix, with growth of 8%.", 160);
        assert_eq!(metrics.get("gross_margin").unwrap().value, 46.2);
        assert_eq!(metrics.get("gross_margin").unwrap().unit, "%");
        assert_eq!(metrics.get("growth").unwrap().value, 8.0);
    }

    #[test]
    fn value_outside_window_is_ignored() {
        let filler = "with further commentary to follow in the shareholder letter, ".repeat(4);
        let text = format!("Revenue {filler} was $5 billion.");
        let metrics = extract_metrics(&text, 40);
        assert!(!metrics.contains_key("revenue"));
    }

    #[test]
    fn parses_value_multipliers() {
        assert_eq!(parse_financial_value("$1.2 billion"), Some(1_200_000_000.0));
        assert_eq!(parse_financial_value("350 million"), Some(350_000_000.0));
        assert_eq!(parse_financial_value("$2.5T"), Some(2_500_000_000_000.0));
        assert_eq!(parse_financial_value("4,200"), Some(4200.0));
        assert_eq!(parse_financial_value("no number"), None);
    }

    #[test]
    fn period_prefers_quarter_over_bare_year() {
        assert_eq!(
            extract_period("in the second quarter of 2023, versus 2022").as_deref(),
            Some("second quarter of 2023")
        );
        assert_eq!(extract_period("full year 2023 results").as_deref(), Some("2023"));
        assert_eq!(extract_period("no period at all"), None);
    }
}
