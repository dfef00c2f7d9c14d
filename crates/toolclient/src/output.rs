//! Decoding of `tools/call` results.
//!
//! Tool servers wrap their payload in a `content` list. The first item is
//! either text, which may or may not hold JSON, or binary `data`.

use serde_json::{Value, json};

/// A decoded tool result.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// JSON parsed out of a text item, or the whole result when it had no
    /// content items.
    Structured(Value),
    /// A text item that was not JSON.
    Text(String),
    /// A `data` item, untouched.
    Data(Value),
}

impl ToolOutput {
    /// Decode a raw `tools/call` result.
    pub fn from_result(result: Value) -> Self {
        let Some(item) = result
            .get("content")
            .and_then(Value::as_array)
            .and_then(|content| content.first())
        else {
            return Self::Structured(result);
        };

        if let Some(text) = item.get("text").and_then(Value::as_str) {
            return match serde_json::from_str(text) {
                Ok(value) => Self::Structured(value),
                Err(_) => Self::Text(text.to_string()),
            };
        }

        if let Some(data) = item.get("data") {
            return Self::Data(data.clone());
        }

        Self::Structured(result)
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Flatten into a single JSON value. Text becomes
    /// `{"text": ..., "format": "text"}`.
    pub fn into_value(self) -> Value {
        match self {
            Self::Structured(value) | Self::Data(value) => value,
            Self::Text(text) => json!({ "text": text, "format": "text" }),
        }
    }
}

/// If the result is flagged `isError`, the joined text of its content items.
pub(crate) fn reported_failure(result: &Value) -> Option<String> {
    if !result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }

    let message = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    Some(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_text_becomes_structured() {
        let result = json!({"content": [{"type": "text", "text": "{\"pong\":true}"}]});
        let output = ToolOutput::from_result(result);
        assert_eq!(output, ToolOutput::Structured(json!({"pong": true})));
        assert_eq!(output.into_value(), json!({"pong": true}));
    }

    #[test]
    fn prose_text_falls_back_to_text() {
        let result = json!({"content": [{"type": "text", "text": "Hello, world"}]});
        let output = ToolOutput::from_result(result);
        assert_eq!(output.as_text(), Some("Hello, world"));
        assert_eq!(
            output.into_value(),
            json!({"text": "Hello, world", "format": "text"})
        );
    }

    #[test]
    fn only_the_first_item_is_decoded() {
        let result = json!({"content": [
            {"type": "text", "text": "[1, 2]"},
            {"type": "text", "text": "ignored"}
        ]});
        assert_eq!(
            ToolOutput::from_result(result),
            ToolOutput::Structured(json!([1, 2]))
        );
    }

    #[test]
    fn data_item_is_returned_as_is() {
        let image = json!({"type": "image", "data": "iVBORw0KGgo=", "mimeType": "image/png"});
        let result = json!({"content": [image]});
        assert_eq!(
            ToolOutput::from_result(result),
            ToolOutput::Data(json!("iVBORw0KGgo="))
        );
    }

    #[test]
    fn result_without_content_is_structured() {
        let result = json!({"rows": 3});
        assert_eq!(
            ToolOutput::from_result(result.clone()),
            ToolOutput::Structured(result)
        );

        let empty = json!({"content": []});
        assert_eq!(
            ToolOutput::from_result(empty.clone()).as_structured(),
            Some(&empty)
        );
    }

    #[test]
    fn reported_failure_joins_text() {
        let result = json!({
            "isError": true,
            "content": [
                {"type": "text", "text": "bad query"},
                {"type": "text", "text": "try again"}
            ]
        });
        assert_eq!(reported_failure(&result).as_deref(), Some("bad query\ntry again"));

        let ok = json!({"isError": false, "content": []});
        assert_eq!(reported_failure(&ok), None);
        assert_eq!(reported_failure(&json!({})), None);
    }
}
