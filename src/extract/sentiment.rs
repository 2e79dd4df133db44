//! Sentiment pass: lexicon-based polarity scoring in `[-1, 1]`.
//!
//! The score combines a general-purpose polarity estimate with a
//! financial-domain word ratio, weighted toward the domain signal:
//! `0.4 × general + 0.6 × financial`. A document scores as the
//! length-weighted average of its chunks.

/// Financial-domain positive vocabulary. Matched at word starts so
/// inflections count ("improved" counts toward "improve").
const POSITIVE_WORDS: &[&str] = &[
    "growth", "profit", "increase", "exceed", "outperform", "beat", "strong", "success",
    "positive", "gain", "improve", "opportunity", "upside", "optimistic", "advantage",
    "favorable", "robust", "momentum", "efficiently", "confidence", "progress",
];

/// Financial-domain negative vocabulary.
const NEGATIVE_WORDS: &[&str] = &[
    "decline", "loss", "decrease", "miss", "underperform", "weak", "fail", "negative",
    "risk", "concern", "challenge", "downside", "pessimistic", "disadvantage", "unfavorable",
    "volatile", "uncertainty", "inefficiently", "doubt", "delay", "struggle", "liability",
];

/// Small general-purpose lexicon for the base polarity component.
const GENERAL_POSITIVE: &[&str] = &[
    "good", "great", "excellent", "best", "better", "well", "record", "high", "higher", "up",
];
const GENERAL_NEGATIVE: &[&str] = &[
    "bad", "poor", "worst", "worse", "down", "low", "lower", "drop", "fell", "fall",
];

/// Score the polarity of `text`. Always in `[-1.0, 1.0]`.
pub fn score_text(text: &str) -> f64 {
    let lower = text.to_lowercase();

    let general = lexicon_ratio(&lower, GENERAL_POSITIVE, GENERAL_NEGATIVE);
    let financial = lexicon_ratio(&lower, POSITIVE_WORDS, NEGATIVE_WORDS);

    (0.4 * general + 0.6 * financial).clamp(-1.0, 1.0)
}

/// `(pos - neg) / (pos + neg)` over occurrence counts; `0` when neither
/// vocabulary appears.
fn lexicon_ratio(lower: &str, positive: &[&str], negative: &[&str]) -> f64 {
    let pos: usize = positive.iter().map(|w| count_word_starts(lower, w)).sum();
    let neg: usize = negative.iter().map(|w| count_word_starts(lower, w)).sum();
    if pos + neg == 0 {
        return 0.0;
    }
    (pos as f64 - neg as f64) / (pos + neg) as f64
}

/// Count occurrences of `word` that begin at a word start, so suffixed
/// inflections count but mid-word hits do not.
fn count_word_starts(lower: &str, word: &str) -> usize {
    let bytes = lower.as_bytes();
    let mut count = 0;
    let mut from = 0;
    while let Some(pos) = lower[from..].find(word) {
        let start = from + pos;
        if start == 0 || !bytes[start - 1].is_ascii_alphabetic() {
            count += 1;
        }
        from = start + word.len();
    }
    count
}

/// Length-weighted average of `(score, length)` parts; how a document's
/// sentiment is aggregated from its chunks. Returns `0.0` for no parts.
pub fn weighted_average(parts: &[(f64, usize)]) -> f64 {
    let total: usize = parts.iter().map(|(_, len)| len).sum();
    if total == 0 {
        return 0.0;
    }
    let weighted: f64 = parts.iter().map(|(score, len)| score * *len as f64).sum();
    (weighted / total as f64).clamp(-1.0, 1.0)
}
