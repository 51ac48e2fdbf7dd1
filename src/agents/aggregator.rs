//! Merging handler results into one response.
//!
//! Successful results become titled sections in priority order. Failed
//! results are listed in a failure summary. Cross-handler insights come from
//! a declarative rule table over the extracted metrics of the participating
//! handlers, evaluated in a fixed order.

use crate::agents::extract::{Trend, DELAY_RATE, FORECAST_TREND};
use crate::types::{
    AggregatedResponse, HandlerFailure, HandlerId, HandlerResult, Outcome, RoutingDecision,
    Section,
};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Width of the line printed between sections.
pub const DELIMITER_WIDTH: usize = 60;

/// Metric thresholds used by the insight rules, in percent.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightThresholds {
    pub high_delay_rate: f64,
    pub low_delay_rate: f64,
    pub revenue_impact_delay_rate: f64,
}

impl Default for InsightThresholds {
    fn default() -> Self {
        Self {
            high_delay_rate: 10.0,
            low_delay_rate: 5.0,
            revenue_impact_delay_rate: 8.0,
        }
    }
}

/// Facts the insight rules may look at.
#[derive(Debug, Clone, Default)]
pub struct Facts {
    pub participating: BTreeSet<HandlerId>,
    pub delay_rate: Option<f64>,
    pub trend: Option<Trend>,
}

impl Facts {
    fn from_results(results: &[HandlerResult]) -> Self {
        let mut facts = Facts::default();
        for result in results.iter().filter(|r| r.success) {
            facts.participating.insert(result.handler);
            if let Some(rate) = result
                .extracted_metrics
                .get(DELAY_RATE)
                .and_then(|v| v.as_f64())
            {
                facts.delay_rate = Some(rate);
            }
            if let Some(trend) = result
                .extracted_metrics
                .get(FORECAST_TREND)
                .and_then(Trend::from_metric)
            {
                facts.trend = Some(trend);
            }
        }
        facts
    }

    fn delay_above(&self, threshold: f64) -> bool {
        self.delay_rate.is_some_and(|rate| rate > threshold)
    }

    fn delay_below(&self, threshold: f64) -> bool {
        self.delay_rate.is_some_and(|rate| rate < threshold)
    }
}

/// One row of the insight table.
#[derive(Clone)]
pub struct InsightRule {
    pub name: &'static str,
    /// Both handlers must have succeeded. `None` applies to any combination.
    pub pair: Option<(HandlerId, HandlerId)>,
    pub predicate: fn(&Facts, &InsightThresholds) -> bool,
    pub text: &'static str,
}

impl std::fmt::Debug for InsightRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsightRule")
            .field("name", &self.name)
            .field("pair", &self.pair)
            .finish()
    }
}

impl InsightRule {
    fn applies(&self, facts: &Facts, thresholds: &InsightThresholds) -> bool {
        let paired = self.pair.is_none_or(|(a, b)| {
            facts.participating.contains(&a) && facts.participating.contains(&b)
        });
        paired && (self.predicate)(facts, thresholds)
    }
}

/// The built-in insight table, in evaluation order.
pub fn default_rules() -> Vec<InsightRule> {
    vec![
        InsightRule {
            name: "supply_chain_risk",
            pair: Some((HandlerId::Delay, HandlerId::Forecasting)),
            predicate: |f, t| f.delay_above(t.high_delay_rate) && f.trend == Some(Trend::Increasing),
            text: "Supply Chain Risk: a high delay rate combined with increasing demand may lead to \
                   customer dissatisfaction. Consider raising safety stock or improving supplier performance.",
        },
        InsightRule {
            name: "growth_opportunity",
            pair: Some((HandlerId::Delay, HandlerId::Forecasting)),
            predicate: |f, t| f.delay_below(t.low_delay_rate) && f.trend == Some(Trend::Increasing),
            text: "Growth Opportunity: strong delivery performance with growing demand. \
                   Monitor capacity to sustain it.",
        },
        InsightRule {
            name: "performance_issue",
            pair: Some((HandlerId::Delay, HandlerId::Forecasting)),
            predicate: |f, t| f.delay_above(t.high_delay_rate) && f.trend == Some(Trend::Decreasing),
            text: "Performance Issue: high delays with declining demand may point to operational \
                   inefficiencies. Focus on process improvement to retain customers.",
        },
        InsightRule {
            name: "revenue_impact",
            pair: Some((HandlerId::Delay, HandlerId::Analytics)),
            predicate: |f, t| f.delay_above(t.revenue_impact_delay_rate),
            text: "Potential Revenue Impact: the current delay rate may be hurting customer \
                   satisfaction and repeat purchases.",
        },
        InsightRule {
            name: "inventory_planning",
            pair: Some((HandlerId::Analytics, HandlerId::Forecasting)),
            predicate: |f, _| f.trend == Some(Trend::Increasing),
            text: "Inventory Planning: a growing demand forecast suggests reviewing inventory \
                   levels and procurement schedules to avoid stockouts.",
        },
        InsightRule {
            name: "demand_planning",
            pair: Some((HandlerId::Analytics, HandlerId::Forecasting)),
            predicate: |f, _| f.trend == Some(Trend::Decreasing),
            text: "Demand Planning: a declining demand forecast calls for trimming inventory to \
                   avoid excess stock.",
        },
        InsightRule {
            name: "holistic_view",
            pair: None,
            predicate: |f, _| f.participating.len() >= 3,
            text: "Holistic View: this analysis spans several domains. Use the combined findings \
                   for strategic planning.",
        },
    ]
}

#[derive(Debug, Clone)]
pub struct ResultAggregator {
    rules: Vec<InsightRule>,
    thresholds: InsightThresholds,
}

impl ResultAggregator {
    pub fn new(thresholds: InsightThresholds) -> Self {
        Self::with_rules(default_rules(), thresholds)
    }

    pub fn with_rules(rules: Vec<InsightRule>, thresholds: InsightThresholds) -> Self {
        Self { rules, thresholds }
    }

    pub fn thresholds(&self) -> &InsightThresholds {
        &self.thresholds
    }

    /// Merges results from one dispatch of `decision`.
    ///
    /// Results for handlers outside the decision are discarded.
    pub fn aggregate(
        &self,
        mut results: Vec<HandlerResult>,
        decision: &RoutingDecision,
    ) -> AggregatedResponse {
        results.retain(|result| {
            let selected = decision.handlers.contains(&result.handler);
            if !selected {
                warn!(handler = %result.handler, "Discarding result for unselected handler");
            }
            selected
        });
        results.sort_by_key(|result| result.handler.priority());

        let sections: Vec<Section> = results
            .iter()
            .filter(|r| r.success)
            .map(|r| Section {
                handler: r.handler,
                title: r.handler.title().to_string(),
                text: r.text.trim().to_string(),
            })
            .collect();

        let failures: Vec<HandlerFailure> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| HandlerFailure {
                handler: r.handler,
                error: r
                    .error
                    .clone()
                    .unwrap_or_else(|| "no output".to_string()),
            })
            .collect();

        let retrieval_handlers: Vec<HandlerId> = results
            .iter()
            .filter(|r| r.used_retrieval)
            .map(|r| r.handler)
            .collect();

        let outcome = if sections.is_empty() {
            Outcome::Failed
        } else if failures.is_empty() {
            Outcome::Success
        } else {
            Outcome::PartialSuccess
        };

        let insights = if outcome == Outcome::Failed {
            Vec::new()
        } else {
            self.insights(&results)
        };

        debug!(
            sections = sections.len(),
            failures = failures.len(),
            insights = insights.len(),
            ?outcome,
            "Aggregated handler results"
        );

        AggregatedResponse {
            sections,
            insights,
            handlers_used: results.iter().map(|r| r.handler).collect(),
            failures,
            retrieval_used: !retrieval_handlers.is_empty(),
            retrieval_handlers,
            resolved_by: decision.resolved_by,
            confidence: decision.confidence,
            outcome,
        }
    }

    /// Evaluates the rule table in order, keeping the first copy of each text.
    fn insights(&self, results: &[HandlerResult]) -> Vec<String> {
        let facts = Facts::from_results(results);
        let mut insights: Vec<String> = Vec::new();
        for rule in &self.rules {
            if rule.applies(&facts, &self.thresholds) && !insights.iter().any(|i| i == rule.text) {
                debug!(rule = rule.name, "Insight rule matched");
                insights.push(rule.text.to_string());
            }
        }
        insights
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new(InsightThresholds::default())
    }
}

/// Turns an [`AggregatedResponse`] into presentable text.
pub trait ResponseFormatter: Send + Sync {
    fn format(&self, response: &AggregatedResponse) -> String;
}

/// Plain-text rendering with titled sections and a fixed delimiter.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFormatter;

impl PlainFormatter {
    pub fn delimiter() -> String {
        "─".repeat(DELIMITER_WIDTH)
    }

    /// Note naming the handlers that produced no output.
    pub fn failure_note(failures: &[HandlerFailure]) -> String {
        let names: Vec<String> = failures
            .iter()
            .map(|f| format!("{} ({})", f.handler.display_name(), f.error))
            .collect();
        format!("Note: no output from {}.", names.join(", "))
    }

    /// Message shown when every handler failed.
    pub fn failure_message(response: &AggregatedResponse) -> String {
        if response.failures.is_empty() {
            return "Sorry, no handler could answer this request.".to_string();
        }
        let names: Vec<&str> = response
            .failures
            .iter()
            .map(|f| f.handler.display_name())
            .collect();
        format!(
            "Sorry, this request could not be answered: {} failed.",
            names.join(", ")
        )
    }

    /// One-line execution summary: handlers in order, routing tier, retrieval users.
    pub fn summary(response: &AggregatedResponse) -> String {
        let order: Vec<&str> = response
            .handlers_used
            .iter()
            .map(|h| h.display_name())
            .collect();
        let tier = match response.resolved_by {
            crate::types::ResolvedBy::Keyword => "keyword",
            crate::types::ResolvedBy::Fallback => "fallback",
        };

        let mut line = format!(
            "Handlers: {} | Routed by {} (confidence {:.2})",
            order.join(" -> "),
            tier,
            response.confidence
        );
        if response.retrieval_used {
            let users: Vec<&str> = response
                .retrieval_handlers
                .iter()
                .map(|h| h.display_name())
                .collect();
            line.push_str(&format!(" | Retrieval: {}", users.join(", ")));
        }
        line
    }
}

impl ResponseFormatter for PlainFormatter {
    fn format(&self, response: &AggregatedResponse) -> String {
        if response.is_failure() {
            return Self::failure_message(response);
        }

        let delimiter = Self::delimiter();
        let mut blocks: Vec<String> = response
            .sections
            .iter()
            .map(|s| format!("{}\n{}", s.title, s.text))
            .collect();

        if !response.insights.is_empty() {
            let lines: Vec<String> = response.insights.iter().map(|i| format!("- {}", i)).collect();
            blocks.push(format!("CROSS-HANDLER INSIGHTS\n{}", lines.join("\n")));
        }

        let mut out = blocks.join(&format!("\n\n{}\n\n", delimiter));
        if !response.failures.is_empty() {
            out.push_str("\n\n");
            out.push_str(&Self::failure_note(&response.failures));
        }
        out.push_str(&format!("\n\n{}", Self::summary(response)));
        out
    }
}
