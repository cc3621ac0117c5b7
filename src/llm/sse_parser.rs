use crate::errors::{DeskPilotError, DeskPilotResult};
use crate::llm::types::{StreamChunk, StreamChunkKind};

/// Parses a raw SSE line (OpenAI-compatible format) into a StreamChunk.
/// Returns None if the line is a keep-alive or non-data line.
pub fn parse_sse_line(line: &str) -> DeskPilotResult<Option<StreamChunk>> {
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
        return Ok(None);
    };

    if data == "[DONE]" {
        return Ok(Some(chunk(StreamChunkKind::Done, String::new())));
    }

    let json: serde_json::Value =
        serde_json::from_str(data).map_err(|e| DeskPilotError::SseParsing(e.to_string()))?;

    if let Some(err) = json.get("error") {
        let msg = err["message"].as_str().unwrap_or("unknown provider error");
        return Ok(Some(chunk(StreamChunkKind::Error, msg.to_string())));
    }

    let Some(first) = json["choices"].as_array().and_then(|c| c.first()) else {
        return Ok(None);
    };
    let delta = &first["delta"];

    // Reasoning content (DeepSeek-style models)
    if let Some(reasoning) = delta["reasoning_content"].as_str() {
        if !reasoning.is_empty() {
            return Ok(Some(chunk(StreamChunkKind::Reasoning, reasoning.to_string())));
        }
    }

    if let Some(tool_calls) = delta["tool_calls"].as_array() {
        if !tool_calls.is_empty() {
            let content = serde_json::to_string(tool_calls)
                .map_err(|e| DeskPilotError::SseParsing(e.to_string()))?;
            return Ok(Some(chunk(StreamChunkKind::ToolCall, content)));
        }
    }

    if let Some(content) = delta["content"].as_str() {
        if !content.is_empty() {
            return Ok(Some(chunk(StreamChunkKind::Content, content.to_string())));
        }
    }

    if first["finish_reason"].as_str().is_some() {
        return Ok(Some(chunk(StreamChunkKind::Done, String::new())));
    }

    Ok(None)
}

fn chunk(kind: StreamChunkKind, content: String) -> StreamChunk {
    StreamChunk { kind, content }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalive_and_comments_are_skipped() {
        assert!(parse_sse_line("").unwrap().is_none());
        assert!(parse_sse_line(": ping").unwrap().is_none());
        assert!(parse_sse_line("event: message").unwrap().is_none());
    }

    #[test]
    fn done_marker() {
        let c = parse_sse_line("data: [DONE]").unwrap().unwrap();
        assert_eq!(c.kind, StreamChunkKind::Done);
    }

    #[test]
    fn content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"{\"type\""},"finish_reason":null}]}"#;
        let c = parse_sse_line(line).unwrap().unwrap();
        assert_eq!(c.kind, StreamChunkKind::Content);
        assert_eq!(c.content, "{\"type\"");
    }

    #[test]
    fn tool_call_delta_is_forwarded_raw() {
        let line = r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"ty"}}]}}]}"#;
        let c = parse_sse_line(line).unwrap().unwrap();
        assert_eq!(c.kind, StreamChunkKind::ToolCall);
        assert!(c.content.contains("\"index\":0"));
    }

    #[test]
    fn finish_reason_without_content_is_done() {
        let line = r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert_eq!(parse_sse_line(line).unwrap().unwrap().kind, StreamChunkKind::Done);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            parse_sse_line("data: {nope"),
            Err(DeskPilotError::SseParsing(_))
        ));
    }

    #[test]
    fn provider_error_payload() {
        let c = parse_sse_line(r#"data: {"error":{"message":"rate limited"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(c.kind, StreamChunkKind::Error);
        assert_eq!(c.content, "rate limited");
    }
}
