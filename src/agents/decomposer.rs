//! Query decomposition for multi-intent requests.
//!
//! Splits compound text on conjunction markers and clause punctuation, then
//! assigns each fragment to the selected handlers whose trigger vocabulary it
//! contains. Pure and synchronous.

use crate::agents::router::{best_handler, TriggerTable};
use crate::types::{AppError, HandlerId, Result, SubRequest};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct QueryDecomposer {
    table: Arc<TriggerTable>,
    splitter: Regex,
}

impl QueryDecomposer {
    /// Builds the clause splitter from the table's conjunction markers.
    pub fn new(table: Arc<TriggerTable>) -> Result<Self> {
        let mut markers: Vec<&String> = table.conjunctions().iter().collect();
        // Longest first so "as well as" wins over any shorter marker.
        markers.sort_by_key(|m| std::cmp::Reverse(m.len()));

        let alternation = markers
            .iter()
            .map(|m| {
                m.split_whitespace()
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"\s+")
            })
            .collect::<Vec<_>>()
            .join("|");

        let punctuation = r"[;!?]+|,\s+|\.\s+";
        let pattern = if alternation.is_empty() {
            punctuation.to_string()
        } else {
            format!(r"(?i),?\s+(?:{})\s+|{}", alternation, punctuation)
        };

        let splitter = Regex::new(&pattern)
            .map_err(|e| AppError::Configuration(format!("Invalid conjunction marker: {}", e)))?;

        Ok(Self { table, splitter })
    }

    /// Splits text into trimmed, non-empty clause fragments.
    pub fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.splitter
            .split(text)
            .map(|fragment| fragment.trim().trim_end_matches('.').trim())
            .filter(|fragment| !fragment.is_empty())
            .collect()
    }

    /// Produces one or more sub-requests per selected handler.
    ///
    /// A fragment matching none of the selected handlers goes to the handler
    /// with the highest score for the full request. Every selected handler
    /// ends up with at least one sub-request.
    pub fn decompose(&self, text: &str, handlers: &BTreeSet<HandlerId>) -> Vec<SubRequest> {
        if handlers.is_empty() {
            return Vec::new();
        }

        let scores = self.table.scores(text);
        let Some(fallback_handler) = best_handler(&scores, handlers.iter().copied()) else {
            return Vec::new();
        };

        let mut sub_requests = Vec::new();
        for fragment in self.split(text) {
            let lower = fragment.to_lowercase();
            let matched: Vec<HandlerId> = handlers
                .iter()
                .copied()
                .filter(|handler| self.table.score(*handler, &lower) > 0)
                .collect();

            if matched.is_empty() {
                sub_requests.push(SubRequest::new(fragment, fallback_handler));
            } else {
                sub_requests.extend(matched.into_iter().map(|h| SubRequest::new(fragment, h)));
            }
        }

        let sub_requests = self.complete(text, handlers, sub_requests);
        debug!(?sub_requests, "Query decomposition");
        sub_requests
    }

    /// Drops sub-requests for unselected handlers, synthesizes a full-text
    /// sub-request for every selected handler left without one, and orders
    /// the result by handler priority (stable within a handler).
    pub fn complete(
        &self,
        text: &str,
        handlers: &BTreeSet<HandlerId>,
        sub_requests: Vec<SubRequest>,
    ) -> Vec<SubRequest> {
        let mut kept: Vec<SubRequest> = sub_requests
            .into_iter()
            .filter(|sub| {
                let selected = handlers.contains(&sub.handler);
                if !selected {
                    warn!(handler = %sub.handler, "Dropping sub-request for unselected handler");
                }
                selected && !sub.text.trim().is_empty()
            })
            .collect();

        for handler in handlers {
            if !kept.iter().any(|sub| sub.handler == *handler) {
                kept.push(SubRequest::new(text.trim(), *handler));
            }
        }

        kept.sort_by_key(|sub| sub.handler.priority());
        kept
    }
}
