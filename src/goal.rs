//! Task completion detection from page signals.
//!
//! Criteria are derived once per run from the task text: double-quoted
//! phrases are kept verbatim, and every remaining word longer than three characters that
//! is not a stopword becomes a keyword. A run is complete when *all* criteria
//! appear (case-insensitively) in the URL, title or visible text.

use std::sync::LazyLock;

use regex::Regex;

use crate::perception::types::PageSignals;

const STOPWORDS: &[&str] = &[
    "about", "check", "find", "from", "give", "have", "into", "like", "need", "page", "show",
    "site", "step", "steps", "task", "tell", "that", "their", "then", "there", "this", "view",
    "want", "website", "what", "when", "where", "which", "with",
    // Imperative verbs describe the interaction, not the end state.
    "click", "create", "delete", "navigate", "open", "search", "select", "sort", "filter",
    "change", "update", "enable", "disable", "using", "should",
];

// Apostrophes are not quotes: "the team's issues" is plain text.
static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)""#).expect("quoted phrase regex"));
static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9]+").expect("token regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalCriteria {
    terms: Vec<String>,
}

impl GoalCriteria {
    pub fn from_task(task: &str) -> Self {
        let mut terms: Vec<String> = Vec::new();
        let mut push = |term: String| {
            if !term.is_empty() && !terms.contains(&term) {
                terms.push(term);
            }
        };

        for caps in QUOTED_RE.captures_iter(task) {
            if let Some(m) = caps.get(1) {
                push(normalize(m.as_str()));
            }
        }

        let unquoted = QUOTED_RE.replace_all(task, " ");
        for token in TOKEN_RE.find_iter(&unquoted) {
            let lower = token.as_str().to_lowercase();
            if lower.len() <= 3 || STOPWORDS.contains(&lower.as_str()) {
                continue;
            }
            push(lower);
        }

        Self { terms }
    }

    /// Explicit keywords replace derivation entirely.
    pub fn from_keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut terms: Vec<String> = Vec::new();
        for k in keywords {
            let term = normalize(k.as_ref());
            if !term.is_empty() && !terms.contains(&term) {
                terms.push(term);
            }
        }
        Self { terms }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

fn normalize(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalEvaluation {
    pub satisfied: bool,
    pub matched: Vec<String>,
    pub missing: Vec<String>,
}

#[derive(Debug)]
pub struct GoalMonitor {
    criteria: GoalCriteria,
    last: Option<GoalEvaluation>,
}

impl GoalMonitor {
    pub fn new(criteria: GoalCriteria) -> Self {
        if criteria.is_empty() {
            tracing::warn!("no goal criteria derived; completion relies on the decision provider");
        }
        Self {
            criteria,
            last: None,
        }
    }

    pub fn criteria(&self) -> &GoalCriteria {
        &self.criteria
    }

    pub fn evaluate(&mut self, signals: &PageSignals) -> &GoalEvaluation {
        let haystack = signals.haystack();
        let (matched, missing): (Vec<String>, Vec<String>) = self
            .criteria
            .terms()
            .iter()
            .cloned()
            .partition(|term| haystack.contains(term.as_str()));

        let satisfied = !self.criteria.is_empty() && missing.is_empty();
        if satisfied {
            tracing::info!(terms = ?matched, "goal criteria satisfied");
        }
        self.last.insert(GoalEvaluation {
            satisfied,
            matched,
            missing,
        })
    }

    /// Context for the next decision request, empty when there is nothing to say.
    pub fn prompt_hint(&self) -> String {
        let missing: &[String] = match &self.last {
            Some(eval) if eval.satisfied => return String::new(),
            Some(eval) => &eval.missing,
            None => self.criteria.terms(),
        };
        if missing.is_empty() {
            return String::new();
        }
        let shown: Vec<&str> = missing.iter().take(4).map(String::as_str).collect();
        format!("Still need UI that clearly shows: {}.", shown.join(", "))
    }
}
