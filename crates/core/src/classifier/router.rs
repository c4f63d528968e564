use crate::domain::ticket::Tag;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// Accept the keyword tag as final.
    Keyword,
    /// Escalate to the semantic classifier.
    Semantic,
}

/// Deterministic routing policy between the two classifier layers. A keyword
/// tag stands when its confidence clears the threshold, except that a double
/// sentinel (no signal on either axis) always escalates regardless of the
/// number it carries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConfidenceRouter {
    threshold: f64,
}

impl ConfidenceRouter {
    pub const DEFAULT_THRESHOLD: f64 = 0.70;

    pub fn new(threshold: f64) -> Self {
        Self { threshold: threshold.clamp(0.0, 1.0) }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn route(&self, keyword_tag: &Tag) -> Route {
        if keyword_tag.is_sentinel() || keyword_tag.confidence < self.threshold {
            Route::Semantic
        } else {
            Route::Keyword
        }
    }
}

impl Default for ConfidenceRouter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::domain::ticket::{Category, ServiceType, Tag, TagMethod};

    use super::{ConfidenceRouter, Route};

    fn tag(service_type: ServiceType, category: Category, confidence: f64) -> Tag {
        Tag {
            service_type,
            category,
            confidence,
            method: TagMethod::Keyword,
            reasoning: String::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn high_confidence_keyword_tag_stands() {
        let router = ConfidenceRouter::default();
        let decision = router.route(&tag(ServiceType::Hotel, Category::Cancellation, 0.85));
        assert_eq!(decision, Route::Keyword);
    }

    #[test]
    fn below_threshold_escalates() {
        let router = ConfidenceRouter::default();
        let decision = router.route(&tag(ServiceType::Hotel, Category::Cancellation, 0.69));
        assert_eq!(decision, Route::Semantic);
    }

    #[test]
    fn exactly_at_threshold_stands() {
        let router = ConfidenceRouter::default();
        let decision = router.route(&tag(ServiceType::Flight, Category::Modify, 0.70));
        assert_eq!(decision, Route::Keyword);
    }

    #[test]
    fn double_sentinel_always_escalates() {
        // A "no match" result is never trusted, even with an inflated score.
        let router = ConfidenceRouter::default();
        let decision = router.route(&tag(ServiceType::Other, Category::Others, 0.99));
        assert_eq!(decision, Route::Semantic);
    }

    #[test]
    fn single_axis_sentinel_is_routed_on_confidence_alone() {
        let router = ConfidenceRouter::default();
        let decision = router.route(&tag(ServiceType::Other, Category::Cancellation, 0.9));
        assert_eq!(decision, Route::Keyword);
    }

    #[test]
    fn custom_threshold_is_clamped_to_unit_interval() {
        let router = ConfidenceRouter::new(1.7);
        assert_eq!(router.threshold(), 1.0);
    }
}
