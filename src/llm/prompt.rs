use base64::Engine;

use crate::llm::types::{ChatMessage, ContentPart, DecisionRequest, ImageUrl};

const SYSTEM_PROMPT: &str = r#"You operate a web browser to reach the state described by a task, one action at a time.
You see a screenshot of the current page, its URL and title, and the actions taken so far.

Respond with exactly one JSON object and nothing else:
{
  "action_type": "navigate" | "click" | "type" | "press_key" | "hover" | "scroll" | "wait" | "done",
  "selector": "CSS or text selector for the target element (click, type, hover; optional for press_key and scroll)",
  "text": "text to type (type only)",
  "url": "absolute URL (navigate only)",
  "key": "key name such as Enter or Escape (press_key only)",
  "direction": "up | down | left | right (scroll only)",
  "millis": 1000,
  "reasoning": "why this action moves the task forward"
}

Rules:
1. Prefer visible buttons and links over guessed selectors.
2. Never repeat an action that already failed or had no visible effect.
3. When the screenshot already shows the requested state, answer with "done"."#;

pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

/// Textual part of the user turn, shared by every provider protocol.
pub fn user_context(request: &DecisionRequest) -> String {
    let mut context = format!(
        "Task: {}\nApplication: {}\nStep {} ({} remaining)\nURL: {}\nTitle: {}\n",
        request.task,
        request.app,
        request.step,
        request.steps_remaining,
        request.page.url,
        request.page.title,
    );

    if request.history.is_empty() {
        context.push_str("\nNo actions taken yet.\n");
    } else {
        context.push_str("\nPrevious actions:\n");
        for prior in &request.history {
            context.push_str(&format!(
                "{}. {} -> {}{}\n",
                prior.index,
                prior.action,
                prior.outcome,
                if prior.rationale.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", prior.rationale)
                }
            ));
        }
    }

    if !request.locator_hints.is_empty() {
        context.push_str("\nUseful selectors for this application:\n");
        for hint in &request.locator_hints {
            context.push_str(&format!("- {hint}\n"));
        }
    }
    if let Some(hint) = &request.goal_hint {
        context.push_str(&format!("\n{hint}\n"));
    }
    if let Some(notice) = &request.notice {
        context.push_str(&format!("\nIMPORTANT: {notice}\n"));
    }
    context
}

pub fn encode_png(png: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(png)
}

pub const MISSING_SCREENSHOT: &str = "(The screenshot could not be captured this cycle.)";

/// Builds the user turn: textual context first, then the screenshot.
pub fn build_messages(request: &DecisionRequest) -> Vec<ChatMessage> {
    let mut parts = vec![ContentPart::Text {
        text: user_context(request),
    }];
    match &request.observation {
        Some(snapshot) => {
            let encoded = encode_png(snapshot.png());
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:image/png;base64,{encoded}"),
                    detail: Some("high".into()),
                },
            });
        }
        None => parts.push(ContentPart::Text {
            text: MISSING_SCREENSHOT.into(),
        }),
    }

    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user_parts(parts)]
}

/// Copy of a request body with image payloads replaced, for logging.
pub fn sanitize_for_log(body: &serde_json::Value) -> serde_json::Value {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                let kind = part.get("type").and_then(|t| t.as_str()).map(str::to_owned);
                let payload = match kind.as_deref() {
                    Some("image_url") => part.get_mut("image_url").and_then(|i| i.get_mut("url")),
                    Some("image") => part.get_mut("source").and_then(|s| s.get_mut("data")),
                    _ => None,
                };
                if let Some(payload) = payload {
                    *payload = serde_json::Value::String("<omitted_base64_image>".to_string());
                }
            }
        }
    }
    log_body
}
