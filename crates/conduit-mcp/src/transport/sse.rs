//! Server-Sent Events body parsing.
//!
//! The HTTP transport receives some response bodies as complete SSE streams.
//! Events are separated by blank lines; within an event, the payload is the
//! concatenation of all `data:` field lines (prefix stripped, one optional
//! leading space removed, joined by newline). Events with no data are
//! ignored. Only the `data` field matters to MCP; other fields and comments
//! are skipped.

use serde_json::Value;

/// Split an SSE body into JSON object frames.
///
/// Returns the decoded frames plus a description of each payload that failed
/// to decode to an object (surfaced by the transport as non-fatal errors).
pub(crate) fn frames(body: &str) -> (Vec<Value>, Vec<String>) {
    let mut frames = Vec::new();
    let mut errors = Vec::new();
    let mut data_lines: Vec<&str> = Vec::new();

    let mut flush = |data_lines: &mut Vec<&str>| {
        if data_lines.is_empty() {
            return;
        }
        let payload = data_lines.join("\n");
        data_lines.clear();
        match serde_json::from_str::<Value>(&payload) {
            Ok(value @ Value::Object(_)) => frames.push(value),
            Ok(_) => errors.push(format!("SSE data is not a JSON object: {}", payload)),
            Err(e) => errors.push(format!("undecodable SSE data: {}", e)),
        }
    };

    for line in body.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            flush(&mut data_lines);
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        } else if line == "data" {
            data_lines.push("");
        }
        // event:/id:/retry: fields and comments are irrelevant here
    }
    flush(&mut data_lines);

    (frames, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_event() {
        let (frames, errors) = frames("data: {\"id\":1}\n\n");
        assert_eq!(frames, vec![json!({"id": 1})]);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_multiple_events() {
        let body = "data: {\"id\":1}\n\ndata: {\"id\":2}\n\n";
        let (frames, _) = frames(body);
        assert_eq!(frames, vec![json!({"id": 1}), json!({"id": 2})]);
    }

    #[test]
    fn test_multiline_data_joined_with_newline() {
        let body = "data: {\"text\":\ndata: 1}\n\n";
        let (frames, errors) = frames(body);
        // "{\"text\":" + "\n" + "1}" is valid JSON
        assert_eq!(frames, vec![json!({"text": 1})]);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_optional_leading_space_stripped_once() {
        let (with_space, _) = frames("data: {\"a\":1}\n\n");
        let (without_space, _) = frames("data:{\"a\":1}\n\n");
        assert_eq!(with_space, without_space);

        // Only one space is stripped; the second belongs to the payload.
        let (frames, errors) = frames("data:  {\"a\":1}\n\n");
        assert_eq!(frames, vec![json!({"a": 1})]);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_events_without_data_ignored() {
        let body = "event: ping\nid: 7\n\n: comment only\n\ndata: {\"ok\":true}\n\n";
        let (frames, errors) = frames(body);
        assert_eq!(frames, vec![json!({"ok": true})]);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_missing_final_separator() {
        let (frames, _) = frames("data: {\"tail\":true}");
        assert_eq!(frames, vec![json!({"tail": true})]);
    }

    #[test]
    fn test_crlf_lines() {
        let body = "data: {\"id\":1}\r\n\r\ndata: {\"id\":2}\r\n\r\n";
        let (frames, _) = frames(body);
        assert_eq!(frames, vec![json!({"id": 1}), json!({"id": 2})]);
    }

    #[test]
    fn test_non_object_payload_reported() {
        let (frames, errors) = frames("data: [1,2,3]\n\ndata: {\"ok\":1}\n\n");
        assert_eq!(frames, vec![json!({"ok": 1})]);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("not a JSON object"));
    }

    #[test]
    fn test_undecodable_payload_reported() {
        let (frames, errors) = frames("data: {broken\n\n");
        assert!(frames.is_empty());
        assert_eq!(errors.len(), 1);
    }
}
