use serde::{Deserialize, Serialize};

/// A tool as advertised by a server's catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// Reduce a `tools/call` result to displayable text.
///
/// A result with a `content` array yields its text parts joined by newline;
/// anything else is serialized whole.
pub fn result_text(result: &serde_json::Value) -> String {
    match result.get("content").and_then(serde_json::Value::as_array) {
        Some(parts) => parts
            .iter()
            .filter(|p| p.get("type").and_then(serde_json::Value::as_str) == Some("text"))
            .filter_map(|p| p.get("text").and_then(serde_json::Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        None => result.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_parts_are_joined() {
        let result = json!({
            "content": [
                { "type": "text", "text": "first" },
                { "type": "image", "data": "aGk=", "mimeType": "image/png" },
                { "type": "text", "text": "second" }
            ],
            "isError": false
        });
        assert_eq!(result_text(&result), "first\nsecond");
    }

    #[test]
    fn content_without_text_is_empty() {
        let result = json!({ "content": [ { "type": "image", "data": "" } ] });
        assert_eq!(result_text(&result), "");
    }

    #[test]
    fn results_without_content_are_serialized() {
        let result = json!({ "toolResult": 42 });
        assert_eq!(result_text(&result), r#"{"toolResult":42}"#);
    }
}
