use chrono::{DateTime, Utc};
use regex::Regex;
use thiserror::Error;

use crate::classifier::normalize_text;
use crate::domain::ticket::{Category, ServiceType, Tag, TagMethod};

/// Immutable keyword configuration injected into the classifier. Weights
/// express specificity: generic words sit at 1.0, phrases that only ever mean
/// one thing carry up to 2.0.
#[derive(Clone, Debug)]
pub struct KeywordTable {
    pub service: Vec<(ServiceType, Vec<(String, f64)>)>,
    pub category: Vec<(Category, Vec<(String, f64)>)>,
}

#[derive(Debug, Error)]
pub enum KeywordTableError {
    #[error("invalid keyword pattern `{phrase}`: {source}")]
    InvalidPattern { phrase: String, source: regex::Error },
    #[error("keyword `{0}` has a non-positive weight")]
    InvalidWeight(String),
}

fn phrases(entries: &[(&str, f64)]) -> Vec<(String, f64)> {
    entries.iter().map(|(phrase, weight)| (phrase.to_string(), *weight)).collect()
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self {
            service: vec![
                (
                    ServiceType::Flight,
                    phrases(&[
                        ("flight", 1.0),
                        ("flights", 1.0),
                        ("airline", 1.2),
                        ("airplane", 1.2),
                        ("aircraft", 1.2),
                        ("booking reference", 1.8),
                        ("pnr", 1.8),
                        ("departure", 1.2),
                        ("arrival", 1.2),
                        ("gate", 1.0),
                        ("boarding", 1.2),
                        ("baggage", 1.3),
                        ("check-in", 1.0),
                        ("terminal", 1.0),
                        ("layover", 1.5),
                        ("connecting flight", 1.8),
                        ("turbulence", 1.5),
                    ]),
                ),
                (
                    ServiceType::Hotel,
                    phrases(&[
                        ("hotel", 1.0),
                        ("hotels", 1.0),
                        ("accommodation", 1.3),
                        ("room", 1.0),
                        ("suite", 1.2),
                        ("reservation", 1.2),
                        ("check-out", 1.2),
                        ("lobby", 1.2),
                        ("reception", 1.2),
                        ("housekeeping", 1.5),
                        ("breakfast", 1.2),
                        ("concierge", 1.5),
                        ("spa", 1.2),
                    ]),
                ),
                (
                    ServiceType::Visa,
                    phrases(&[
                        ("visa", 1.0),
                        ("visas", 1.0),
                        ("passport", 1.2),
                        ("immigration", 1.3),
                        ("embassy", 1.3),
                        ("consulate", 1.5),
                        ("tourist visa", 1.8),
                        ("business visa", 1.8),
                        ("transit visa", 1.8),
                        ("entry permit", 1.8),
                        ("border", 1.0),
                        ("customs", 1.2),
                    ]),
                ),
                (
                    ServiceType::Esim,
                    phrases(&[
                        ("esim", 1.5),
                        ("e-sim", 1.5),
                        ("sim", 1.0),
                        ("roaming", 1.3),
                        ("data plan", 1.8),
                        ("mobile data", 1.8),
                        ("cellular", 1.3),
                        ("carrier", 1.2),
                        ("coverage", 1.0),
                        ("connectivity", 1.2),
                        ("unlimited data", 1.8),
                    ]),
                ),
                (
                    ServiceType::Wallet,
                    phrases(&[
                        ("wallet", 1.2),
                        ("balance", 1.0),
                        ("payment", 1.0),
                        ("funds", 1.0),
                        ("transaction", 1.2),
                        ("transfer", 1.0),
                        ("deposit", 1.0),
                        ("billing", 1.2),
                        ("invoice", 1.2),
                    ]),
                ),
            ],
            category: vec![
                (
                    Category::Cancellation,
                    phrases(&[
                        ("cancel", 1.0),
                        ("cancelled", 1.0),
                        ("canceled", 1.0),
                        ("cancellation", 1.3),
                        ("refund", 1.0),
                        ("terminate", 1.2),
                        ("void", 1.5),
                        ("annul", 1.5),
                        ("revoke", 1.3),
                    ]),
                ),
                (
                    Category::Modify,
                    phrases(&[
                        ("change", 1.0),
                        ("modify", 1.2),
                        ("modification", 1.3),
                        ("update", 1.0),
                        ("reschedule", 1.5),
                        ("rebook", 1.3),
                        ("postpone", 1.3),
                        ("switch", 1.0),
                        ("exchange", 1.2),
                        ("alter", 1.2),
                    ]),
                ),
                (
                    Category::TopUp,
                    phrases(&[
                        ("top up", 1.5),
                        ("top-up", 1.5),
                        ("topup", 1.5),
                        ("recharge", 1.3),
                        ("reload", 1.3),
                        ("add money", 1.8),
                        ("add funds", 1.8),
                        ("refill", 1.3),
                        ("add credit", 1.8),
                    ]),
                ),
                (
                    Category::Withdraw,
                    phrases(&[
                        ("withdraw", 1.2),
                        ("withdrawal", 1.3),
                        ("cash out", 1.8),
                        ("take out", 1.5),
                        ("remove funds", 1.8),
                        ("transfer out", 1.8),
                        ("get money", 1.5),
                    ]),
                ),
                (
                    Category::OrderRecheck,
                    phrases(&[
                        ("recheck", 1.5),
                        ("re-check", 1.5),
                        ("order status", 1.8),
                        ("booking status", 1.8),
                        ("check order", 1.8),
                        ("double check", 1.5),
                        ("verify", 1.0),
                        ("confirm", 1.0),
                        ("status", 1.0),
                        ("track", 1.0),
                    ]),
                ),
                (
                    Category::PrePurchase,
                    phrases(&[
                        ("pre-purchase", 1.8),
                        ("before buying", 1.8),
                        ("inquiry", 1.3),
                        ("is it possible", 1.5),
                        ("how to", 1.2),
                        ("availability", 1.3),
                        ("information", 1.0),
                        ("question", 1.0),
                        ("help", 1.0),
                    ]),
                ),
            ],
        }
    }
}

struct CompiledPhrase {
    regex: Regex,
    phrase: String,
    weight: f64,
}

struct LabelMatcher<L> {
    label: L,
    patterns: Vec<CompiledPhrase>,
}

fn compile<L: Copy>(
    entries: Vec<(L, Vec<(String, f64)>)>,
) -> Result<Vec<LabelMatcher<L>>, KeywordTableError> {
    entries
        .into_iter()
        .map(|(label, phrases)| {
            let patterns = phrases
                .into_iter()
                .map(|(phrase, weight)| {
                    if weight <= 0.0 {
                        return Err(KeywordTableError::InvalidWeight(phrase));
                    }
                    let regex = Regex::new(&format!(r"\b{}\b", regex::escape(&phrase)))
                        .map_err(|source| KeywordTableError::InvalidPattern {
                            phrase: phrase.clone(),
                            source,
                        })?;
                    Ok(CompiledPhrase { regex, phrase, weight })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(LabelMatcher { label, patterns })
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
struct AxisOutcome<L> {
    label: L,
    score: f64,
    match_count: usize,
    runner_up: f64,
}

impl<L> AxisOutcome<L> {
    fn margin_ratio(&self) -> f64 {
        if self.score <= 0.0 {
            0.0
        } else {
            (self.score - self.runner_up) / self.score
        }
    }
}

/// Scores one label over the non-overlapping subset of its pattern hits.
/// Every text span counts at most once; where a phrase and a word it contains
/// both hit, the longer (then heavier) span wins.
fn non_overlapping_hits(patterns: &[CompiledPhrase], text: &str) -> (f64, usize) {
    let mut hits: Vec<(usize, usize, f64)> = Vec::new();
    for pattern in patterns {
        for found in pattern.regex.find_iter(text) {
            hits.push((found.start(), found.end(), pattern.weight));
        }
    }
    hits.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)).then(b.2.total_cmp(&a.2)));

    let mut score = 0.0;
    let mut matches = 0;
    let mut cursor = 0;
    for (start, end, weight) in hits {
        if start >= cursor {
            score += weight;
            matches += 1;
            cursor = end;
        }
    }
    (score, matches)
}

fn score_axis<L: Copy>(matchers: &[LabelMatcher<L>], text: &str, sentinel: L) -> AxisOutcome<L> {
    let mut best: Option<AxisOutcome<L>> = None;
    let mut runner_up = 0.0_f64;

    for matcher in matchers {
        let (score, matches) = non_overlapping_hits(&matcher.patterns, text);
        if score <= 0.0 {
            continue;
        }
        match &mut best {
            // Strictly-greater keeps the first declared label on ties.
            Some(current) if score > current.score => {
                runner_up = runner_up.max(current.score);
                *current = AxisOutcome { label: matcher.label, score, match_count: matches, runner_up: 0.0 };
            }
            Some(_) => {
                runner_up = runner_up.max(score);
            }
            None => {
                best = Some(AxisOutcome { label: matcher.label, score, match_count: matches, runner_up: 0.0 });
            }
        }
    }

    match best {
        Some(mut outcome) => {
            outcome.runner_up = runner_up;
            outcome
        }
        None => AxisOutcome { label: sentinel, score: 0.0, match_count: 0, runner_up: 0.0 },
    }
}

/// Combined confidence over both axes. Total matched weight drives strength
/// through `1 - e^(-k*score)`, damped by the weaker axis' margin over its
/// runner-up: one weak match stays well under the routing threshold while two
/// or three specific matches with clear margins clear it.
fn confidence(service: &AxisOutcome<ServiceType>, category: &AxisOutcome<Category>) -> f64 {
    let raw = service.score + category.score;
    if raw <= 0.0 {
        return 0.0;
    }
    let ambiguity = service.margin_ratio().min(category.margin_ratio());
    let strength = 1.0 - (-0.45 * raw).exp();
    (strength * (0.55 + 0.45 * ambiguity)).clamp(0.0, 1.0)
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct LabelMatches {
    pub label: String,
    pub phrases: Vec<String>,
}

/// Matched phrases per label, surfaced by the tag-explanation boundary.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct KeywordExplanation {
    pub service_matches: Vec<LabelMatches>,
    pub category_matches: Vec<LabelMatches>,
}

/// Layer-1 classifier: a pure scorer over the injected keyword table.
/// Identical input and table always produce the identical tag.
pub struct KeywordClassifier {
    service: Vec<LabelMatcher<ServiceType>>,
    category: Vec<LabelMatcher<Category>>,
}

impl KeywordClassifier {
    pub fn new(table: KeywordTable) -> Result<Self, KeywordTableError> {
        Ok(Self { service: compile(table.service)?, category: compile(table.category)? })
    }

    pub fn with_default_table() -> Result<Self, KeywordTableError> {
        Self::new(KeywordTable::default())
    }

    pub fn classify(&self, text: &str, now: DateTime<Utc>) -> Tag {
        let normalized = normalize_text(text);
        let service = score_axis(&self.service, &normalized, ServiceType::Other);
        let category = score_axis(&self.category, &normalized, Category::Others);
        let confidence = confidence(&service, &category);

        let reasoning = if service.match_count == 0 && category.match_count == 0 {
            "no keyword matches found, assigned sentinel tags".to_string()
        } else {
            let mut parts = Vec::new();
            if service.match_count > 0 {
                parts.push(format!(
                    "service `{}` matched {} keyword(s) with weight {:.1}",
                    service.label, service.match_count, service.score
                ));
            }
            if category.match_count > 0 {
                parts.push(format!(
                    "category `{}` matched {} keyword(s) with weight {:.1}",
                    category.label, category.match_count, category.score
                ));
            }
            parts.join("; ")
        };

        Tag {
            service_type: service.label,
            category: category.label,
            confidence,
            method: TagMethod::Keyword,
            reasoning,
            timestamp: now,
        }
    }

    pub fn explain(&self, text: &str) -> KeywordExplanation {
        let normalized = normalize_text(text);
        KeywordExplanation {
            service_matches: explain_axis(&self.service, &normalized, |l| l.to_string()),
            category_matches: explain_axis(&self.category, &normalized, |l| l.to_string()),
        }
    }
}

fn explain_axis<L: Copy>(
    matchers: &[LabelMatcher<L>],
    text: &str,
    label_name: impl Fn(L) -> String,
) -> Vec<LabelMatches> {
    matchers
        .iter()
        .filter_map(|matcher| {
            let phrases = matcher
                .patterns
                .iter()
                .filter(|pattern| pattern.regex.is_match(text))
                .map(|pattern| pattern.phrase.clone())
                .collect::<Vec<_>>();
            if phrases.is_empty() {
                None
            } else {
                Some(LabelMatches { label: label_name(matcher.label), phrases })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::classifier::router::ConfidenceRouter;
    use crate::domain::ticket::{Category, ServiceType, TagMethod};

    use super::{KeywordClassifier, KeywordTable};

    fn classifier() -> KeywordClassifier {
        KeywordClassifier::with_default_table().expect("default table compiles")
    }

    #[test]
    fn clear_hotel_cancellation_scores_above_threshold() {
        let tag = classifier().classify("I want to cancel my hotel reservation", Utc::now());

        assert_eq!(tag.service_type, ServiceType::Hotel);
        assert_eq!(tag.category, Category::Cancellation);
        assert_eq!(tag.method, TagMethod::Keyword);
        assert!(
            tag.confidence >= ConfidenceRouter::DEFAULT_THRESHOLD,
            "confidence {} should clear the default threshold",
            tag.confidence
        );
    }

    #[test]
    fn two_service_text_stays_below_threshold() {
        let tag = classifier().classify(
            "My flight got cancelled due to weather and I need to rebook, also cancel the hotel",
            Utc::now(),
        );

        // Flight and Hotel tie; declaration order keeps Flight, but the zero
        // margin drags confidence under the routing threshold.
        assert_eq!(tag.service_type, ServiceType::Flight);
        assert_eq!(tag.category, Category::Cancellation);
        assert!(
            tag.confidence < ConfidenceRouter::DEFAULT_THRESHOLD,
            "ambiguous text must not clear the threshold, got {}",
            tag.confidence
        );
    }

    #[test]
    fn unmatched_text_falls_back_to_sentinel_with_zero_confidence() {
        let tag = classifier().classify("the weather is lovely today", Utc::now());

        assert_eq!(tag.service_type, ServiceType::Other);
        assert_eq!(tag.category, Category::Others);
        assert_eq!(tag.confidence, 0.0);
        assert!(tag.is_sentinel());
    }

    #[test]
    fn empty_text_is_sentinel() {
        let tag = classifier().classify("   ", Utc::now());
        assert!(tag.is_sentinel());
        assert_eq!(tag.confidence, 0.0);
    }

    #[test]
    fn confidence_is_monotone_in_specific_match_count() {
        let classifier = classifier();
        let one = classifier.classify("pnr", Utc::now()).confidence;
        let two = classifier.classify("pnr boarding", Utc::now()).confidence;
        let three = classifier.classify("pnr boarding layover", Utc::now()).confidence;

        assert!(one <= two, "{one} > {two}");
        assert!(two <= three, "{two} > {three}");
        assert!(one < three);
    }

    #[test]
    fn single_weak_match_yields_low_confidence() {
        let tag = classifier().classify("help", Utc::now());
        assert_eq!(tag.category, Category::PrePurchase);
        assert!(tag.confidence < ConfidenceRouter::DEFAULT_THRESHOLD);
    }

    #[test]
    fn classification_is_reproducible() {
        let classifier = classifier();
        let now = Utc::now();
        let first = classifier.classify("cancel my visa application status", now);
        let second = classifier.classify("cancel my visa application status", now);
        assert_eq!(first, second);
    }

    #[test]
    fn word_boundaries_prevent_substring_matches() {
        // "simulation" must not match the esim table's "sim".
        let tag = classifier().classify("the simulation is broken", Utc::now());
        assert_eq!(tag.service_type, ServiceType::Other);
    }

    #[test]
    fn overlapping_phrase_and_word_score_once() {
        // "connecting flight" also contains the bare "flight" keyword; the
        // span must be counted a single time at the phrase's weight.
        let tag = classifier().classify("connecting flight", Utc::now());

        assert_eq!(tag.service_type, ServiceType::Flight);
        assert!(
            tag.reasoning.contains("matched 1 keyword(s) with weight 1.8"),
            "expected one 1.8 match, got: {}",
            tag.reasoning
        );
    }

    #[test]
    fn longest_span_wins_where_hits_start_together() {
        let classifier = classifier();
        let phrase = classifier.classify("tourist visa", Utc::now());
        let word = classifier.classify("visa", Utc::now());

        assert!(phrase.reasoning.contains("matched 1 keyword(s)"));
        assert!(
            phrase.confidence > word.confidence,
            "phrase {} should outscore bare word {}",
            phrase.confidence,
            word.confidence
        );
    }

    #[test]
    fn ties_resolve_by_declaration_order() {
        // One plain 1.0-weight keyword from each of Flight and Hotel.
        let tag = classifier().classify("gate room", Utc::now());
        assert_eq!(tag.service_type, ServiceType::Flight);
    }

    #[test]
    fn explanation_lists_matched_phrases_per_label() {
        let explanation = classifier().explain("cancel my hotel reservation");

        let hotel = explanation
            .service_matches
            .iter()
            .find(|m| m.label == "Hotel")
            .expect("hotel matches present");
        assert!(hotel.phrases.contains(&"hotel".to_string()));
        assert!(hotel.phrases.contains(&"reservation".to_string()));

        let cancellation = explanation
            .category_matches
            .iter()
            .find(|m| m.label == "Cancellation")
            .expect("cancellation matches present");
        assert!(cancellation.phrases.contains(&"cancel".to_string()));
    }

    #[test]
    fn rejects_non_positive_weights() {
        let table = KeywordTable {
            service: vec![(ServiceType::Flight, vec![("flight".to_string(), 0.0)])],
            category: vec![],
        };
        assert!(KeywordClassifier::new(table).is_err());
    }
}
