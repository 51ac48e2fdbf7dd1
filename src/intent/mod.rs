//! Query classification ahead of routing.
//!
//! Decides whether a request needs policy documents, live data, or both.
//! The routing core consumes the [`Classification`] only to pass it through
//! to handlers.

use crate::agents::router::{best_handler, TriggerTable};
use crate::types::{Classification, HandlerId, QueryType, Result};
use std::sync::Arc;
use tracing::{debug, info};

pub trait IntentClassifier: Send + Sync {
    /// Classifies request text. Must be fast and side-effect free.
    fn classify(&self, text: &str) -> Result<Classification>;
}

// ============= Indicator Vocabulary =============

const QUESTION_WORDS: &[&str] = &[
    "what is",
    "what are",
    "define",
    "explain",
    "describe",
    "tell me about",
];

const POLICY_TARGETS: &[&str] = &[
    "policy",
    "procedure",
    "guideline",
    "rule",
    "standard",
    "requirement",
    "target",
    "threshold",
    "definition",
    "classification",
    "level",
    "category",
];

const POLICY_CONCEPTS: &[&str] = &[
    "severity level",
    "critical delay",
    "major delay",
    "minor delay",
    "kpi",
    "key performance indicator",
    "target rate",
    "compliance",
];

const METRIC_WORDS: &[&str] = &[
    "rate",
    "count",
    "number",
    "total",
    "average",
    "percentage",
    "how many",
    "how much",
    "actual",
    "current",
    "real",
    "measured",
    "delivery",
    "shipment",
    "order",
    "supplier",
];

const DATA_VERBS: &[&str] = &[
    "show",
    "list",
    "get",
    "find",
    "display",
    "retrieve",
    "calculate",
    "compute",
    "analyze",
    "report",
];

const TIME_REFERENCES: &[&str] = &[
    "today",
    "yesterday",
    "this week",
    "last month",
    "current",
    "recent",
    "historical",
    "trend",
    "over time",
];

const DATA_REQUESTS: &[&str] = &[
    "from database",
    "from data",
    "actual data",
    "real data",
    "calculated",
    "measured value",
];

/// Forecasting is always a data action, never a policy lookup.
const FORECAST_ACTIONS: &[&str] = &[
    "forecast",
    "predict",
    "projection",
    "demand forecast",
    "predict demand",
    "future demand",
    "demand prediction",
    "forecast demand",
    "time series",
    "revenue forecast",
    "forecast revenue",
    "predict revenue",
    "forecast delay rate",
    "predict delay",
];

/// Ratio by which one signal must dominate the other.
const DOMINANCE: f64 = 1.2;

/// Both signals must exceed this for a mixed classification.
const MIXED_MIN_SCORE: f64 = 2.0;

fn weighted(lower: &str, terms: &[&str], weight: f64) -> f64 {
    terms.iter().filter(|t| lower.contains(*t)).count() as f64 * weight
}

/// Keyword-weighted classifier over policy and data vocabularies.
///
/// The domain is taken from the routing trigger table so the classifier and
/// the Tier-1 router agree on which handler a request leans towards.
#[derive(Debug, Clone)]
pub struct KeywordIntentClassifier {
    table: Arc<TriggerTable>,
}

impl KeywordIntentClassifier {
    pub fn new(table: Arc<TriggerTable>) -> Self {
        Self { table }
    }

    pub fn policy_score(lower: &str) -> f64 {
        weighted(lower, QUESTION_WORDS, 2.0)
            + weighted(lower, POLICY_TARGETS, 3.0)
            + weighted(lower, POLICY_CONCEPTS, 2.5)
    }

    pub fn data_score(lower: &str) -> f64 {
        weighted(lower, METRIC_WORDS, 3.0)
            + weighted(lower, DATA_VERBS, 2.0)
            + weighted(lower, TIME_REFERENCES, 2.5)
            + weighted(lower, DATA_REQUESTS, 4.0)
            + weighted(lower, FORECAST_ACTIONS, 5.0)
    }

    fn domain(&self, text: &str) -> HandlerId {
        let scores = self.table.scores(text);
        if scores.values().all(|score| *score == 0) {
            return HandlerId::Analytics;
        }
        best_handler(&scores, HandlerId::ALL).unwrap_or(HandlerId::Analytics)
    }
}

impl Default for KeywordIntentClassifier {
    fn default() -> Self {
        Self::new(Arc::new(TriggerTable::default()))
    }
}

impl IntentClassifier for KeywordIntentClassifier {
    fn classify(&self, text: &str) -> Result<Classification> {
        let lower = text.to_lowercase();
        let policy = Self::policy_score(&lower);
        let data = Self::data_score(&lower);

        let (query_type, confidence) = if policy > data * DOMINANCE {
            (QueryType::Policy, (0.5 + policy / 12.0).min(0.95))
        } else if data > policy * DOMINANCE {
            (QueryType::Data, (0.5 + data / 12.0).min(0.95))
        } else if policy > MIXED_MIN_SCORE && data > MIXED_MIN_SCORE {
            (QueryType::Mixed, (0.6 + (policy + data) / 20.0).min(0.90))
        } else {
            (QueryType::Data, (0.5 + policy.max(data) / 12.0).min(0.80))
        };

        let classification = Classification {
            query_type,
            use_retrieval: matches!(query_type, QueryType::Policy | QueryType::Mixed),
            use_data_source: matches!(query_type, QueryType::Data | QueryType::Mixed),
            confidence,
            domain: self.domain(text),
        };

        debug!(policy, data, "Classification scores");
        info!(
            query_type = ?classification.query_type,
            domain = %classification.domain,
            confidence = classification.confidence,
            "Query classified"
        );
        Ok(classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("What is the late delivery policy?", QueryType::Policy)]
    #[case("Show the delay rate for last month", QueryType::Data)]
    #[case("Forecast demand for the next quarter", QueryType::Data)]
    #[case("What is the threshold for recent shipments", QueryType::Mixed)]
    #[case("hello there", QueryType::Data)]
    fn test_query_type(#[case] text: &str, #[case] expected: QueryType) {
        let classification = KeywordIntentClassifier::default().classify(text).unwrap();
        assert_eq!(classification.query_type, expected);
    }

    #[test]
    fn test_policy_uses_retrieval_only() {
        let classification = KeywordIntentClassifier::default()
            .classify("Explain the returns policy")
            .unwrap();
        assert!(classification.use_retrieval);
        assert!(!classification.use_data_source);
        // "explain" 2 + "policy" 3
        assert!((classification.confidence - (0.5 + 5.0 / 12.0)).abs() < 1e-9);
    }

    #[test]
    fn test_mixed_uses_both_sources() {
        // "kpi" 2.5 against "recent" 2.5: neither dominates, both above 2.
        let classification = KeywordIntentClassifier::default()
            .classify("KPI for recent weeks")
            .unwrap();
        assert_eq!(classification.query_type, QueryType::Mixed);
        assert!(classification.use_retrieval && classification.use_data_source);
        assert!((classification.confidence - (0.6 + 5.0 / 20.0)).abs() < 1e-9);
    }

    #[test]
    fn test_mixed_confidence_is_capped() {
        // "what is" 2 + "threshold" 3 against "recent" 2.5 + "shipment" 3.
        let classification = KeywordIntentClassifier::default()
            .classify("What is the threshold for recent shipments")
            .unwrap();
        assert_eq!(classification.query_type, QueryType::Mixed);
        assert_eq!(classification.confidence, 0.90);
    }

    #[test]
    fn test_substring_verbs_can_tip_towards_data() {
        // "target" also contains the verb "get".
        let lower = "what is the target rate and the current delay rate";
        assert_eq!(KeywordIntentClassifier::policy_score(lower), 7.5);
        assert_eq!(KeywordIntentClassifier::data_score(lower), 10.5);
        let classification = KeywordIntentClassifier::default().classify(lower).unwrap();
        assert_eq!(classification.query_type, QueryType::Data);
    }

    #[test]
    fn test_unmatched_text_defaults() {
        let classification = KeywordIntentClassifier::default().classify("hello there").unwrap();
        assert_eq!(classification.confidence, 0.5);
        assert_eq!(classification.domain, HandlerId::Analytics);
        assert!(classification.use_data_source);
    }

    #[test]
    fn test_domain_follows_trigger_table() {
        let classification = KeywordIntentClassifier::default()
            .classify("forecast demand for next month")
            .unwrap();
        assert_eq!(classification.domain, HandlerId::Forecasting);
    }
}
