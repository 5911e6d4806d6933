//! Keyword matching over normalized entry text.
//!
//! Two matchers run in order. The base matcher is a single compiled
//! word-boundary alternation over the curated keyword list; when several
//! keywords hit, the one earliest in the list wins. The co-occurrence
//! matcher validates ambiguous terms by requiring a qualifier within a
//! sliding token window, in either order.
//!
//! Matching is a pure function of the normalized text blob and the
//! load-once keyword table.

use regex::Regex;

use super::keywords::{CoocRule, KeywordTable};
use crate::error::ConfigError;
use crate::feeds::types::KwMatch;
use crate::utils::text;

/// Compiled keyword matcher.
pub struct KeywordMatcher {
    /// Base keywords in priority order.
    base: Vec<String>,
    /// One alternation regex over all base keywords.
    base_regex: Regex,
    /// Co-occurrence rules in priority order.
    cooccurrence: Vec<CoocRule>,
    /// Token window for co-occurrence validation.
    window: usize,
}

impl KeywordMatcher {
    /// Compiles a matcher from the keyword table.
    ///
    /// With `strict` disabled, ambiguous co-occurrence terms are demoted to
    /// plain base keywords (qualifiers no longer required).
    pub fn compile(table: &KeywordTable, window: usize, strict: bool) -> Result<Self, ConfigError> {
        let mut base = table.base.clone();
        let mut cooccurrence = table.cooccurrence.clone();
        if !strict {
            base.extend(cooccurrence.drain(..).map(|r| r.term));
        }

        let alternation = base
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!(r"\b(?:{})\b", alternation);
        let base_regex = Regex::new(&pattern).map_err(|e| {
            ConfigError::InvalidKeywords(format!("keyword regex failed to compile: {}", e))
        })?;

        Ok(Self {
            base,
            base_regex,
            cooccurrence,
            window,
        })
    }

    /// Matches the normalized text blob against the table.
    ///
    /// Returns the first successful match: base keywords before
    /// co-occurrence rules, list order within each.
    pub fn match_text(&self, blob: &str) -> Option<KwMatch> {
        if blob.is_empty() {
            return None;
        }

        if let Some(hit) = self.match_base(blob) {
            return Some(hit);
        }
        self.match_cooccurrence(blob)
    }

    /// One scan collects every base keyword present; list order decides.
    fn match_base(&self, blob: &str) -> Option<KwMatch> {
        let mut found: Vec<&str> = self
            .base_regex
            .find_iter(blob)
            .map(|m| m.as_str())
            .collect();
        if found.is_empty() {
            return None;
        }
        found.dedup();

        self.base
            .iter()
            .find(|kw| found.iter().any(|f| *f == kw.as_str()))
            .map(|kw| KwMatch::base(kw.as_str()))
    }

    /// Validates ambiguous terms against their qualifiers within the window.
    fn match_cooccurrence(&self, blob: &str) -> Option<KwMatch> {
        let tokens = text::tokenize(blob);
        if tokens.is_empty() {
            return None;
        }

        for rule in &self.cooccurrence {
            let term_positions: Vec<usize> = tokens
                .iter()
                .enumerate()
                .filter(|(_, t)| **t == rule.term)
                .map(|(i, _)| i)
                .collect();
            if term_positions.is_empty() {
                continue;
            }

            for qualifier in &rule.qualifiers {
                let hit = tokens.iter().enumerate().any(|(qi, t)| {
                    *t == qualifier.as_str()
                        && term_positions
                            .iter()
                            .any(|ti| ti.abs_diff(qi) <= self.window)
                });
                if hit {
                    return Some(KwMatch::cooccurrence(rule.term.clone(), qualifier));
                }
            }
        }
        None
    }
}
