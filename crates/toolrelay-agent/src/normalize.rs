//! Translation of native runtime events into [`StreamEvent`].
//!
//! Runtimes report the same things under many layouts: a token may arrive as
//! `{"type":"token","data":"Hel"}`, as `{"event":"on_chat_model_stream",
//! "data":{"chunk":{"content":"Hel"}}}` or as `{"event":"text","text":"Hel"}`.
//! This is the only place those layouts are inspected.

use serde_json::Value;
use toolrelay_core::StreamEvent;
use tracing::debug;

static NULL: Value = Value::Null;

/// Normalize one native event. Returns `None` for events with nothing to
/// forward (unknown kinds, empty tokens).
pub fn normalize_runtime_event(raw: &Value) -> Option<StreamEvent> {
    if let Value::String(text) = raw {
        return non_empty(text).map(StreamEvent::token);
    }

    let Some(kind) = raw
        .get("type")
        .or_else(|| raw.get("event"))
        .and_then(Value::as_str)
    else {
        debug!(event = %raw, "Dropping runtime event without a type");
        return None;
    };
    let data = raw.get("data").unwrap_or(&NULL);

    match kind.to_ascii_lowercase().as_str() {
        "token" | "text" | "chunk" | "on_chat_model_stream" | "on_llm_stream" => {
            text_of(data, &["token", "content", "text"])
                .or_else(|| data.pointer("/chunk/content").and_then(Value::as_str))
                .or_else(|| data.get("chunk").and_then(Value::as_str))
                .or_else(|| text_of(raw, &["text", "token", "content"]))
                .and_then(non_empty)
                .map(StreamEvent::token)
        }
        "final" | "message" | "answer" | "on_chain_end" => final_text(raw, data)
            .and_then(non_empty)
            .map(StreamEvent::final_message),
        "error" | "error_event" => {
            let message = text_of(data, &["error", "message"])
                .or_else(|| text_of(raw, &["error", "message"]))
                .unwrap_or("runtime reported an error");
            let recoverable = data
                .get("recoverable")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Some(StreamEvent::error(message, recoverable))
        }
        "end" | "done" | "complete" | "completion" => Some(StreamEvent::End),
        "info" | "status" | "thinking" | "action" | "tool_start" | "tool_end" | "on_tool_start"
        | "on_tool_end" | "session_created" => Some(StreamEvent::Info(if data.is_null() {
            raw.clone()
        } else {
            data.clone()
        })),
        other => {
            debug!(kind = other, "Dropping unrecognized runtime event");
            None
        }
    }
}

/// `data` itself when it is a string, else the first string field in `keys`.
fn text_of<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    if let Value::String(s) = value {
        return Some(s);
    }
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
}

fn final_text<'a>(raw: &'a Value, data: &'a Value) -> Option<&'a str> {
    text_of(data, &["content", "output", "text"])
        .or_else(|| data.pointer("/output/content").and_then(Value::as_str))
        .or_else(|| data.pointer("/output/output").and_then(Value::as_str))
        .or_else(|| text_of(raw, &["content", "output"]))
}

fn non_empty(text: &str) -> Option<&str> {
    (!text.is_empty()).then_some(text)
}
