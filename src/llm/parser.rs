//! Strict mapping from free-form model output onto [`Action`].
//!
//! The first `{` through the last `}` is read as JSON. Every variant has a
//! fixed set of required fields; anything missing or unknown is reported as
//! a parse failure instead of being guessed.

use serde::Deserialize;

use crate::orchestrator::state::{Action, Decision, DecisionOutcome, ScrollDirection};

#[derive(Debug, Deserialize)]
struct RawDecision {
    action_type: Option<String>,
    #[serde(default, alias = "locator", alias = "target")]
    selector: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default, alias = "milliseconds", alias = "duration_ms")]
    millis: Option<u64>,
    #[serde(default, alias = "rationale")]
    reasoning: Option<String>,
}

const DEFAULT_WAIT_MS: u64 = 1000;

pub fn parse_decision(raw: &str) -> DecisionOutcome {
    match try_parse(raw) {
        Ok(decision) => DecisionOutcome::Action(decision),
        Err(reason) => {
            tracing::warn!(%reason, "unparsable decision");
            DecisionOutcome::ParseFailure(reason)
        }
    }
}

fn try_parse(raw: &str) -> Result<Decision, String> {
    let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) else {
        return Err("no JSON object in response".into());
    };
    if end < start {
        return Err("no JSON object in response".into());
    }
    let parsed: RawDecision =
        serde_json::from_str(&raw[start..=end]).map_err(|e| format!("invalid JSON: {e}"))?;

    let kind = parsed
        .action_type
        .as_deref()
        .map(|k| k.trim().to_ascii_lowercase())
        .ok_or_else(|| "missing action_type".to_string())?;

    let locator = non_empty(parsed.selector);
    let require_locator = |name: &str| {
        locator
            .clone()
            .ok_or_else(|| format!("{name} requires a selector"))
    };

    let action = match kind.as_str() {
        "navigate" => Action::Navigate {
            url: non_empty(parsed.url).ok_or("navigate requires a url")?,
        },
        "click" => Action::Click {
            locator: require_locator("click")?,
        },
        "type" => Action::Type {
            locator: require_locator("type")?,
            text: parsed.text.ok_or("type requires text")?,
        },
        "press_key" => Action::PressKey {
            key: non_empty(parsed.key).ok_or("press_key requires a key")?,
            locator: locator.clone(),
        },
        "hover" => Action::Hover {
            locator: require_locator("hover")?,
        },
        "scroll" => Action::Scroll {
            direction: match parsed.direction.as_deref() {
                None => ScrollDirection::Down,
                Some(d) => ScrollDirection::parse(d)
                    .ok_or_else(|| format!("unknown scroll direction '{d}'"))?,
            },
            locator: locator.clone(),
        },
        "wait" => Action::Wait {
            millis: parsed.millis.unwrap_or(DEFAULT_WAIT_MS),
        },
        "done" => Action::Done,
        other => return Err(format!("unknown action_type '{other}'")),
    };

    Ok(Decision {
        action,
        rationale: parsed.reasoning.unwrap_or_default(),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}
