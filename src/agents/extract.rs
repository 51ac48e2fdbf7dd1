//! Extraction of small scalar facts from handler answers.
//!
//! The aggregator reasons across handlers with these facts only; it never
//! reads handler prose.

use crate::types::{AppError, HandlerId, MetricValue, Result};
use regex::Regex;
use std::collections::BTreeMap;

pub const DELAY_RATE: &str = "delay_rate";
pub const FORECAST_TREND: &str = "forecast_trend";
pub const TOTAL_REVENUE: &str = "total_revenue";

/// Direction of a demand forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

impl Trend {
    pub fn as_str(self) -> &'static str {
        match self {
            Trend::Increasing => "increasing",
            Trend::Decreasing => "decreasing",
            Trend::Stable => "stable",
        }
    }

    /// Reads a trend from a metric: a direction word, or the sign of a number.
    pub fn from_metric(value: &MetricValue) -> Option<Self> {
        match value {
            MetricValue::Text(text) => Self::from_text(text),
            MetricValue::Number(n) if *n > 0.0 => Some(Trend::Increasing),
            MetricValue::Number(n) if *n < 0.0 => Some(Trend::Decreasing),
            MetricValue::Number(_) => Some(Trend::Stable),
            MetricValue::Flag(_) => None,
        }
    }

    /// Detects a trend from free text. Growth words win over decline words.
    pub fn from_text(text: &str) -> Option<Self> {
        let lower = text.to_lowercase();
        let any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if any(&["increasing", "growing", "upward"]) {
            Some(Trend::Increasing)
        } else if any(&["decreasing", "declining", "downward"]) {
            Some(Trend::Decreasing)
        } else if any(&["stable", "steady"]) {
            Some(Trend::Stable)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricExtractor {
    delay_rate: Regex,
    revenue: Regex,
}

impl MetricExtractor {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| AppError::Internal(format!("Invalid metric pattern: {}", e)))
        };

        Ok(Self {
            delay_rate: compile(r"(?is)delay rate.*?(\d+(?:\.\d+)?)\s*%")?,
            revenue: compile(r"(?is)revenue\D*?(\d[\d,]*(?:\.\d+)?)")?,
        })
    }

    /// Extracts the facts relevant to `handler` from its answer.
    pub fn extract(&self, handler: HandlerId, text: &str) -> BTreeMap<String, MetricValue> {
        let mut metrics = BTreeMap::new();

        match handler {
            HandlerId::Delay => {
                if let Some(rate) = self.capture_number(&self.delay_rate, text) {
                    metrics.insert(DELAY_RATE.to_string(), MetricValue::Number(rate));
                }
            }
            HandlerId::Forecasting => {
                if let Some(trend) = Trend::from_text(text) {
                    metrics.insert(FORECAST_TREND.to_string(), trend.as_str().into());
                }
            }
            HandlerId::Analytics => {
                if let Some(revenue) = self.capture_number(&self.revenue, text) {
                    metrics.insert(TOTAL_REVENUE.to_string(), MetricValue::Number(revenue));
                }
            }
            HandlerId::DataQuery => {}
        }

        metrics
    }

    fn capture_number(&self, pattern: &Regex, text: &str) -> Option<f64> {
        pattern
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().replace(',', "").parse().ok())
    }
}
