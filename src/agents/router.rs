//! Tier-1 intent routing.
//!
//! A deterministic scorer over a data-driven trigger table. Every handler owns a
//! list of single-token keywords (weight 1) and multi-token phrases (weight 2);
//! matching is case-insensitive substring containment and overlapping matches
//! all count. The router never blocks and never performs I/O.

use crate::agents::decomposer::QueryDecomposer;
use crate::types::{HandlerId, ResolvedBy, Result, RoutingDecision};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Weight of a single-token trigger.
pub const KEYWORD_WEIGHT: u32 = 1;
/// Weight of a multi-token phrase trigger.
pub const PHRASE_WEIGHT: u32 = 2;
/// Weight of each report/overview-class trigger.
pub const COMPREHENSIVE_WEIGHT: u32 = 2;

/// Per-handler scores for one request.
pub type Scores = BTreeMap<HandlerId, u32>;

/// Trigger vocabulary for one handler.
#[derive(Debug, Clone, Default)]
pub struct TriggerSet {
    keywords: Vec<String>,
    phrases: Vec<String>,
}

impl TriggerSet {
    pub fn new(keywords: &[&str], phrases: &[&str]) -> Self {
        let mut set = Self::default();
        set.extend(
            keywords.iter().map(|k| k.to_string()),
            phrases.iter().map(|p| p.to_string()),
        );
        set
    }

    /// Adds triggers, lowercased. Duplicates are ignored.
    pub fn extend(
        &mut self,
        keywords: impl IntoIterator<Item = String>,
        phrases: impl IntoIterator<Item = String>,
    ) {
        for keyword in keywords {
            push_unique(&mut self.keywords, keyword);
        }
        for phrase in phrases {
            push_unique(&mut self.phrases, phrase);
        }
    }

    /// Scores already-lowercased text.
    pub fn score(&self, lower: &str) -> u32 {
        let keyword_hits = self.keywords.iter().filter(|k| lower.contains(k.as_str())).count();
        let phrase_hits = self.phrases.iter().filter(|p| lower.contains(p.as_str())).count();
        keyword_hits as u32 * KEYWORD_WEIGHT + phrase_hits as u32 * PHRASE_WEIGHT
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    let value = value.trim().to_lowercase();
    if !value.is_empty() && !list.contains(&value) {
        list.push(value);
    }
}

/// Static mapping of handler to triggers, plus the comprehensive-report
/// vocabulary and the conjunction markers shared with the decomposer.
#[derive(Debug, Clone)]
pub struct TriggerTable {
    handlers: BTreeMap<HandlerId, TriggerSet>,
    comprehensive: Vec<String>,
    conjunctions: Vec<String>,
}

impl Default for TriggerTable {
    fn default() -> Self {
        let mut handlers = BTreeMap::new();

        handlers.insert(
            HandlerId::DataQuery,
            TriggerSet::new(
                &[
                    "list", "find", "display", "retrieve", "lookup", "history", "customers",
                    "orders", "products", "breakdown",
                ],
                &[
                    "show me",
                    "list all",
                    "find order",
                    "get customer",
                    "display data",
                    "order details",
                    "customer history",
                    "order history",
                    "top products",
                    "top categories",
                    "best selling",
                    "customers in",
                    "orders in",
                    "orders from",
                    "orders between",
                    "by state",
                    "state distribution",
                    "state breakdown",
                    "monthly trend",
                    "order status",
                    "monthly order",
                ],
            ),
        );

        handlers.insert(
            HandlerId::Delay,
            TriggerSet::new(
                &[
                    "delay", "late", "rate", "on-time", "on time", "delivery", "shipped",
                    "arrived",
                ],
                &[
                    "delay rate",
                    "the delay rate",
                    "delivery delay",
                    "late delivery",
                    "late orders",
                    "arrived late",
                    "delayed order",
                    "delivery performance",
                    "on time delivery",
                    "shipping delay",
                ],
            ),
        );

        handlers.insert(
            HandlerId::Analytics,
            TriggerSet::new(
                &[
                    "revenue",
                    "sales",
                    "profit",
                    "performance",
                    "order value",
                    "behavior",
                    "analysis",
                ],
                &[
                    "total revenue",
                    "customer behavior",
                    "sales performance",
                    "revenue analysis",
                    "product performance",
                    "customer analysis",
                    "revenue by",
                    "sales by",
                ],
            ),
        );

        handlers.insert(
            HandlerId::Forecasting,
            TriggerSet::new(
                &[
                    "forecast",
                    "predict",
                    "future",
                    "demand",
                    "projection",
                    "estimate",
                    "sarima",
                    "prophet",
                    "time series",
                    "seasonal",
                ],
                &[
                    "demand forecast",
                    "forecast demand",
                    "predict demand",
                    "future demand",
                    "forecast sales",
                    "demand prediction",
                    "trend forecast",
                    "revenue forecast",
                    "forecast revenue",
                    "predict revenue",
                    "delay rate forecast",
                    "forecast delay rate",
                    "predict delay rate",
                    "category forecast",
                    "forecast category",
                    "each category",
                    "all categories",
                    "per category",
                    "compare categories",
                    "breakdown by category",
                ],
            ),
        );

        let comprehensive = [
            "comprehensive",
            "report",
            "overview",
            "summary",
            "everything",
            "full report",
            "complete analysis",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let conjunctions = ["and", "also", "plus", "as well as", "along with"]
            .into_iter()
            .map(String::from)
            .collect();

        Self {
            handlers,
            comprehensive,
            conjunctions,
        }
    }
}

impl TriggerTable {
    /// Score of one handler against already-lowercased text.
    pub fn score(&self, handler: HandlerId, lower: &str) -> u32 {
        self.handlers
            .get(&handler)
            .map(|set| set.score(lower))
            .unwrap_or(0)
    }

    /// Scores every registered handler against raw request text.
    pub fn scores(&self, text: &str) -> Scores {
        let lower = text.to_lowercase();
        HandlerId::ALL
            .into_iter()
            .map(|handler| (handler, self.score(handler, &lower)))
            .collect()
    }

    /// Score of the report/overview-class vocabulary.
    pub fn comprehensive_score(&self, lower: &str) -> u32 {
        self.comprehensive
            .iter()
            .filter(|t| lower.contains(t.as_str()))
            .count() as u32
            * COMPREHENSIVE_WEIGHT
    }

    /// Whether the text contains an explicit conjunction marker as a whole word.
    pub fn has_conjunction(&self, lower: &str) -> bool {
        let padded = format!(" {} ", lower.split_whitespace().collect::<Vec<_>>().join(" "));
        self.conjunctions
            .iter()
            .any(|c| padded.contains(&format!(" {} ", c)))
    }

    pub fn conjunctions(&self) -> &[String] {
        &self.conjunctions
    }

    pub fn triggers(&self, handler: HandlerId) -> Option<&TriggerSet> {
        self.handlers.get(&handler)
    }

    pub fn add_triggers(
        &mut self,
        handler: HandlerId,
        keywords: impl IntoIterator<Item = String>,
        phrases: impl IntoIterator<Item = String>,
    ) {
        self.handlers
            .entry(handler)
            .or_default()
            .extend(keywords, phrases);
    }

    pub fn add_comprehensive(&mut self, triggers: impl IntoIterator<Item = String>) {
        for trigger in triggers {
            push_unique(&mut self.comprehensive, trigger);
        }
    }

    pub fn add_conjunctions(&mut self, markers: impl IntoIterator<Item = String>) {
        for marker in markers {
            push_unique(&mut self.conjunctions, marker);
        }
    }
}

/// Picks the highest-scoring handler. Ties go to the higher-priority handler.
pub fn best_handler(scores: &Scores, candidates: impl IntoIterator<Item = HandlerId>) -> Option<HandlerId> {
    let mut best: Option<(HandlerId, u32)> = None;
    let mut ordered: Vec<HandlerId> = candidates.into_iter().collect();
    ordered.sort_by_key(|h| h.priority());
    for handler in ordered {
        let score = scores.get(&handler).copied().unwrap_or(0);
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((handler, score)),
        }
    }
    best.map(|(handler, _)| handler)
}

/// Tunable routing policy. The defaults are the tuned values the router has
/// always shipped with, not derived optima.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingThresholds {
    pub multi_intent_min_score: u32,
    pub conjunction_min_score: u32,
    pub comprehensive_min_score: u32,
    pub score_divisor: f64,
    pub multi_intent_confidence: f64,
    pub comprehensive_confidence: f64,
    pub default_confidence: f64,
    /// Tier-1 decisions below this confidence are offered to Tier 2.
    pub fallback_threshold: f64,
}

impl Default for RoutingThresholds {
    fn default() -> Self {
        Self {
            multi_intent_min_score: 2,
            conjunction_min_score: 1,
            comprehensive_min_score: 2,
            score_divisor: 10.0,
            multi_intent_confidence: 0.85,
            comprehensive_confidence: 0.90,
            default_confidence: 0.50,
            fallback_threshold: 0.60,
        }
    }
}

/// Tier-1 router: a pure function of lowercase text and the trigger table.
#[derive(Debug, Clone)]
pub struct IntentRouter {
    table: Arc<TriggerTable>,
    thresholds: RoutingThresholds,
    decomposer: QueryDecomposer,
}

impl IntentRouter {
    /// Creates a router with the given table and thresholds.
    pub fn new(table: TriggerTable, thresholds: RoutingThresholds) -> Result<Self> {
        let table = Arc::new(table);
        let decomposer = QueryDecomposer::new(table.clone())?;
        Ok(Self {
            table,
            thresholds,
            decomposer,
        })
    }

    /// Creates a router with the built-in table and default thresholds.
    pub fn with_defaults() -> Result<Self> {
        Self::new(TriggerTable::default(), RoutingThresholds::default())
    }

    pub fn table(&self) -> &Arc<TriggerTable> {
        &self.table
    }

    pub fn thresholds(&self) -> &RoutingThresholds {
        &self.thresholds
    }

    pub fn decomposer(&self) -> &QueryDecomposer {
        &self.decomposer
    }

    /// Whether a decision is uncertain enough to consult Tier 2.
    pub fn needs_fallback(&self, decision: &RoutingDecision) -> bool {
        decision.confidence < self.thresholds.fallback_threshold
    }

    /// Scores a request and applies the decision rules in precedence order:
    /// comprehensive, multi-intent, single-intent, no match.
    pub fn score(&self, text: &str) -> RoutingDecision {
        let lower = text.to_lowercase();
        let scores: Scores = HandlerId::ALL
            .into_iter()
            .map(|handler| (handler, self.table.score(handler, &lower)))
            .collect();
        let max_score = scores.values().copied().max().unwrap_or(0);
        let comprehensive_score = self.table.comprehensive_score(&lower);

        debug!(?scores, comprehensive_score, "Tier-1 scores");

        let decision = if comprehensive_score >= self.thresholds.comprehensive_min_score {
            let primary = if max_score > 0 {
                best_handler(&scores, HandlerId::ALL).unwrap_or(HandlerId::Analytics)
            } else {
                HandlerId::Analytics
            };
            RoutingDecision::comprehensive(
                primary,
                self.thresholds.comprehensive_confidence,
                ResolvedBy::Keyword,
            )
        } else if let Some(qualifying) = self.multi_intent_handlers(&scores, &lower) {
            let primary = best_handler(&scores, qualifying.iter().copied())
                .unwrap_or(HandlerId::Analytics);
            let sub_requests = self.decomposer.decompose(text, &qualifying);
            RoutingDecision::multi(
                primary,
                qualifying,
                sub_requests,
                self.thresholds.multi_intent_confidence,
                ResolvedBy::Keyword,
            )
        } else if max_score > 0 {
            let handler = best_handler(&scores, HandlerId::ALL).unwrap_or(HandlerId::Analytics);
            let confidence = max_score as f64 / self.thresholds.score_divisor;
            RoutingDecision::single(handler, confidence, ResolvedBy::Keyword)
        } else {
            RoutingDecision::single(
                HandlerId::Analytics,
                self.thresholds.default_confidence,
                ResolvedBy::Keyword,
            )
        };

        info!(
            primary = %decision.primary_handler,
            handlers = ?decision.execution_order,
            confidence = decision.confidence,
            mode = ?decision.mode,
            "Tier-1 routing decision"
        );

        decision
    }

    /// Handlers that qualify for multi-intent dispatch, if at least two do.
    ///
    /// A conjunction only lowers the bar when exactly one handler already
    /// clears `multi_intent_min_score`; weaker handlers then join that anchor.
    fn multi_intent_handlers(&self, scores: &Scores, lower: &str) -> Option<BTreeSet<HandlerId>> {
        let above = |min: u32| -> BTreeSet<HandlerId> {
            scores
                .iter()
                .filter(|(_, score)| **score >= min.max(1))
                .map(|(handler, _)| *handler)
                .collect()
        };

        let mut qualifying = above(self.thresholds.multi_intent_min_score);
        if qualifying.len() == 1 && self.table.has_conjunction(lower) {
            qualifying.extend(above(self.thresholds.conjunction_min_score));
        }

        (qualifying.len() >= 2).then_some(qualifying)
    }
}
