//! Streaming event parser
//!
//! Turns raw `stream_event` payloads (the model API's server-sent events,
//! forwarded by the agent) into a small set of semantic events. [`parse`] is
//! a pure function over the event and the text accumulated so far;
//! [`StreamAccumulator`] keeps that text between calls.

use serde_json::Value;

/// Semantic streaming event
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A new assistant message began
    MessageStart {
        /// Model producing the message
        model: Option<String>,
        /// Message role, normally `assistant`
        role: Option<String>,
    },
    /// Text fragment
    TextDelta {
        /// The new fragment
        text: String,
        /// All text of the message so far, fragment included
        accumulated: String,
    },
    /// Fragment of a tool call's JSON arguments
    ///
    /// Fragments are not valid JSON on their own; concatenate them per
    /// `index` until the block stops.
    ToolInputDelta {
        /// Content block index
        index: u64,
        /// Raw JSON fragment
        json_fragment: String,
    },
    /// Reasoning fragment
    ThinkingDelta {
        /// The new fragment
        text: String,
    },
    /// A tool-use block began
    ToolUseStart {
        /// Tool use id
        id: String,
        /// Tool name
        name: String,
    },
    /// The message finished
    MessageStop {
        /// All text of the message
        final_text: String,
    },
}

fn str_at(value: &Value, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(Value::as_str).map(String::from)
}

/// Parse one raw event against the text accumulated so far
///
/// Returns the derived events and the new accumulated text. Unrecognized
/// events produce nothing and leave the text unchanged.
#[must_use]
pub fn parse(raw_event: &Value, accumulated: &str) -> (Vec<StreamEvent>, String) {
    let event_type = raw_event.get("type").and_then(Value::as_str).unwrap_or_default();

    match event_type {
        "message_start" => (
            vec![StreamEvent::MessageStart {
                model: str_at(raw_event, "/message/model"),
                role: str_at(raw_event, "/message/role"),
            }],
            String::new(),
        ),
        "content_block_start" => {
            let block = raw_event.get("content_block").unwrap_or(&Value::Null);
            if block.get("type").and_then(Value::as_str) != Some("tool_use") {
                return (Vec::new(), accumulated.to_string());
            }
            let event = StreamEvent::ToolUseStart {
                id: str_at(block, "/id").unwrap_or_default(),
                name: str_at(block, "/name").unwrap_or_default(),
            };
            (vec![event], accumulated.to_string())
        }
        "content_block_delta" => {
            let delta = raw_event.get("delta").unwrap_or(&Value::Null);
            match delta.get("type").and_then(Value::as_str) {
                Some("text_delta") => {
                    let text = str_at(delta, "/text").unwrap_or_default();
                    let mut next = String::with_capacity(accumulated.len() + text.len());
                    next.push_str(accumulated);
                    next.push_str(&text);
                    let event = StreamEvent::TextDelta {
                        text,
                        accumulated: next.clone(),
                    };
                    (vec![event], next)
                }
                Some("input_json_delta") => {
                    let event = StreamEvent::ToolInputDelta {
                        index: raw_event.get("index").and_then(Value::as_u64).unwrap_or(0),
                        json_fragment: str_at(delta, "/partial_json").unwrap_or_default(),
                    };
                    (vec![event], accumulated.to_string())
                }
                Some("thinking_delta") => {
                    let event = StreamEvent::ThinkingDelta {
                        text: str_at(delta, "/thinking").unwrap_or_default(),
                    };
                    (vec![event], accumulated.to_string())
                }
                _ => (Vec::new(), accumulated.to_string()),
            }
        }
        "message_stop" => (
            vec![StreamEvent::MessageStop {
                final_text: accumulated.to_string(),
            }],
            String::new(),
        ),
        _ => (Vec::new(), accumulated.to_string()),
    }
}

/// Keeps the accumulated text of the message currently being streamed
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    accumulated: String,
}

impl StreamAccumulator {
    /// Empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw event
    pub fn feed(&mut self, raw_event: &Value) -> Vec<StreamEvent> {
        let (events, next) = parse(raw_event, &self.accumulated);
        self.accumulated = next;
        events
    }

    /// Text accumulated so far
    #[must_use]
    pub fn text(&self) -> &str {
        &self.accumulated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_delta(text: &str) -> Value {
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": text}})
    }

    #[test]
    fn test_full_message_sequence() {
        let mut acc = StreamAccumulator::new();

        let events = acc.feed(&json!({
            "type": "message_start",
            "message": {"model": "sonnet", "role": "assistant"}
        }));
        assert_eq!(
            events,
            vec![StreamEvent::MessageStart {
                model: Some("sonnet".into()),
                role: Some("assistant".into())
            }]
        );

        assert_eq!(
            acc.feed(&text_delta("Hel")),
            vec![StreamEvent::TextDelta {
                text: "Hel".into(),
                accumulated: "Hel".into()
            }]
        );
        assert_eq!(
            acc.feed(&text_delta("lo")),
            vec![StreamEvent::TextDelta {
                text: "lo".into(),
                accumulated: "Hello".into()
            }]
        );

        assert_eq!(
            acc.feed(&json!({"type": "message_stop"})),
            vec![StreamEvent::MessageStop {
                final_text: "Hello".into()
            }]
        );
        assert_eq!(acc.text(), "");
    }

    #[test]
    fn test_message_start_resets() {
        let (_, text) = parse(&json!({"type": "message_start", "message": {}}), "stale");
        assert_eq!(text, "");
    }

    #[test]
    fn test_tool_use_events() {
        let (events, text) = parse(
            &json!({
                "type": "content_block_start",
                "index": 1,
                "content_block": {"type": "tool_use", "id": "toolu_1", "name": "Bash", "input": {}}
            }),
            "so far",
        );
        assert_eq!(
            events,
            vec![StreamEvent::ToolUseStart {
                id: "toolu_1".into(),
                name: "Bash".into()
            }]
        );
        assert_eq!(text, "so far");

        let (events, _) = parse(
            &json!({
                "type": "content_block_delta",
                "index": 1,
                "delta": {"type": "input_json_delta", "partial_json": "{\"comm"}
            }),
            "",
        );
        assert_eq!(
            events,
            vec![StreamEvent::ToolInputDelta {
                index: 1,
                json_fragment: "{\"comm".into()
            }]
        );
    }

    #[test]
    fn test_thinking_delta() {
        let (events, text) = parse(
            &json!({"type": "content_block_delta", "delta": {"type": "thinking_delta", "thinking": "hmm"}}),
            "abc",
        );
        assert_eq!(events, vec![StreamEvent::ThinkingDelta { text: "hmm".into() }]);
        assert_eq!(text, "abc");
    }

    #[test]
    fn test_unrecognized_events_are_ignored() {
        for raw in [
            json!({"type": "ping"}),
            json!({"type": "content_block_start", "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "delta": {"type": "signature_delta"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!("not an object"),
        ] {
            let (events, text) = parse(&raw, "keep");
            assert!(events.is_empty());
            assert_eq!(text, "keep");
        }
    }
}
