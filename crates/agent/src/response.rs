use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;

use tagdesk_core::domain::ticket::{Category, ServiceType, Tag, TagMethod};

use crate::classifier::ClassifierError;

#[derive(Debug, Deserialize)]
struct SemanticPayload {
    service_type: String,
    category: String,
    confidence: Option<f64>,
    reasoning: Option<String>,
}

/// Turns the model reply into a semantic tag. Strict JSON is tried first;
/// replies that drift into prose fall back to label scanning. A reply with
/// no recognizable label or confidence marker at all is a protocol error,
/// never a silent default tag.
pub(crate) fn parse_semantic_response(raw: &str, now: DateTime<Utc>) -> Result<Tag, ClassifierError> {
    if let Some(tag) = parse_json_payload(raw, now) {
        return Ok(tag);
    }
    scan_labels(raw, now)
}

fn parse_json_payload(raw: &str, now: DateTime<Utc>) -> Option<Tag> {
    // Models wrap JSON in code fences or prose; take the outermost braces.
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    let payload: SemanticPayload = serde_json::from_str(raw.get(start..=end)?).ok()?;

    let service_type = ServiceType::parse(&payload.service_type).ok()?;
    let category = Category::parse(&payload.category).ok()?;
    Some(Tag {
        service_type,
        category,
        confidence: payload.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
        method: TagMethod::Semantic,
        reasoning: payload.reasoning.unwrap_or_else(|| raw.trim().to_string()),
        timestamp: now,
    })
}

const SERVICE_MARKERS: &[(&str, ServiceType)] = &[
    ("flight", ServiceType::Flight),
    ("hotel", ServiceType::Hotel),
    ("visa", ServiceType::Visa),
    ("esim", ServiceType::Esim),
    ("e-sim", ServiceType::Esim),
    ("wallet", ServiceType::Wallet),
];

const CATEGORY_MARKERS: &[(&str, Category)] = &[
    ("cancellation", Category::Cancellation),
    ("cancel", Category::Cancellation),
    ("modify", Category::Modify),
    ("change", Category::Modify),
    ("top_up", Category::TopUp),
    ("top up", Category::TopUp),
    ("withdraw", Category::Withdraw),
    ("cash out", Category::Withdraw),
    ("order_recheck", Category::OrderRecheck),
    ("order re-check", Category::OrderRecheck),
    ("recheck", Category::OrderRecheck),
    ("status", Category::OrderRecheck),
    ("pre_purchase", Category::PrePurchase),
    ("pre-purchase", Category::PrePurchase),
    ("information", Category::PrePurchase),
];

// Compiled once; the pattern is a literal, so a failure just disables the
// confidence marker and leaves the midpoint default in place.
fn confidence_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"confidence[:\s]*([0-9]*\.?[0-9]+)").ok())
        .as_ref()
}

fn scan_labels(raw: &str, now: DateTime<Utc>) -> Result<Tag, ClassifierError> {
    let lowered = raw.to_lowercase();

    let service_type = SERVICE_MARKERS
        .iter()
        .find(|(marker, _)| lowered.contains(marker))
        .map(|(_, service)| *service);
    let category = CATEGORY_MARKERS
        .iter()
        .find(|(marker, _)| lowered.contains(marker))
        .map(|(_, category)| *category);

    let confidence = confidence_pattern()
        .and_then(|pattern| pattern.captures(&lowered))
        .and_then(|captures| captures.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|value| value.clamp(0.0, 1.0));

    if service_type.is_none() && category.is_none() && confidence.is_none() {
        return Err(ClassifierError::Protocol(format!(
            "no recognizable labels in reply: {}",
            raw.chars().take(120).collect::<String>()
        )));
    }

    Ok(Tag {
        service_type: service_type.unwrap_or(ServiceType::Other),
        category: category.unwrap_or(Category::Others),
        confidence: confidence.unwrap_or(0.5),
        method: TagMethod::Semantic,
        reasoning: raw.trim().to_string(),
        timestamp: now,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use tagdesk_core::domain::ticket::{Category, ServiceType, TagMethod};

    use crate::classifier::ClassifierError;

    use super::parse_semantic_response;

    #[test]
    fn strict_json_reply_parses() {
        let raw = r#"{"service_type": "Hotel", "category": "Cancellation", "confidence": 0.91, "reasoning": "guest asks to cancel a booking"}"#;
        let tag = parse_semantic_response(raw, Utc::now()).expect("parse");

        assert_eq!(tag.service_type, ServiceType::Hotel);
        assert_eq!(tag.category, Category::Cancellation);
        assert_eq!(tag.method, TagMethod::Semantic);
        assert!((tag.confidence - 0.91).abs() < 1e-9);
        assert_eq!(tag.reasoning, "guest asks to cancel a booking");
    }

    #[test]
    fn fenced_json_reply_parses() {
        let raw = "Here is my analysis:\n```json\n{\"service_type\": \"esim\", \"category\": \"top_up\", \"confidence\": 0.8}\n```";
        let tag = parse_semantic_response(raw, Utc::now()).expect("parse");

        assert_eq!(tag.service_type, ServiceType::Esim);
        assert_eq!(tag.category, Category::TopUp);
    }

    #[test]
    fn prose_reply_falls_back_to_label_scan() {
        let raw = "The customer clearly wants to cancel their flight. Confidence: 0.75";
        let tag = parse_semantic_response(raw, Utc::now()).expect("parse");

        assert_eq!(tag.service_type, ServiceType::Flight);
        assert_eq!(tag.category, Category::Cancellation);
        assert!((tag.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn confidence_marker_is_parsed_on_repeated_scans() {
        for value in ["0.2", "0.9"] {
            let raw = format!("Looks like a hotel problem to me. Confidence {value}");
            let tag = parse_semantic_response(&raw, Utc::now()).expect("parse");
            assert!((tag.confidence - value.parse::<f64>().unwrap()).abs() < 1e-9);
        }
    }

    #[test]
    fn out_of_range_confidence_is_clamped() {
        let raw = r#"{"service_type": "Wallet", "category": "Withdraw", "confidence": 7.5}"#;
        let tag = parse_semantic_response(raw, Utc::now()).expect("parse");
        assert_eq!(tag.confidence, 1.0);
    }

    #[test]
    fn unrecognizable_reply_is_a_protocol_error() {
        let error = parse_semantic_response("I cannot assist with that request.", Utc::now())
            .expect_err("no labels");
        assert!(matches!(error, ClassifierError::Protocol(_)));
    }

    #[test]
    fn missing_confidence_defaults_to_midpoint() {
        let raw = r#"{"service_type": "Visa", "category": "Modify"}"#;
        let tag = parse_semantic_response(raw, Utc::now()).expect("parse");
        assert_eq!(tag.confidence, 0.5);
    }
}
