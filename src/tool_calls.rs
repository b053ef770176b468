use regex::Regex;
use serde_json::Value;

use crate::llm::{ChatResponseMessage, ToolCall, ToolCallFunction};

/// Extracts tool calls from an LLM response using the staircase described in
/// the tool-call extraction design: native structured calls first, then
/// fenced JSON, then inline JSON, then a whitelist-driven prose extractor.
/// Fallback-produced calls are wrapped in the same envelope as native ones
/// so downstream dispatch is uniform.
pub fn extract_tool_calls(message: &ChatResponseMessage, known_tools: &[&str]) -> Vec<ToolCall> {
    if !message.tool_calls.is_empty() {
        return message.tool_calls.clone();
    }

    if let Some(calls) = extract_fenced_json(&message.content) {
        if !calls.is_empty() {
            return calls;
        }
    }

    if let Some(calls) = extract_inline_json(&message.content) {
        if !calls.is_empty() {
            return calls;
        }
    }

    extract_prose(&message.content, known_tools)
}

fn extract_fenced_json(content: &str) -> Option<Vec<ToolCall>> {
    let mut calls = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find("```") {
        let after_fence = &rest[start + 3..];
        let after_fence = after_fence.strip_prefix("json").unwrap_or(after_fence);
        let Some(end) = after_fence.find("```") else {
            break;
        };
        let block = after_fence[..end].trim();
        if let Some(call) = parse_tool_value(block) {
            calls.push(call);
        }
        rest = &after_fence[end + 3..];
    }
    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}

fn extract_inline_json(content: &str) -> Option<Vec<ToolCall>> {
    let mut calls = Vec::new();
    let bytes = content.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = matching_brace(content, i) {
                let candidate = &content[i..=end];
                if let Some(call) = parse_tool_value(candidate) {
                    calls.push(call);
                }
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}

fn matching_brace(content: &str, start: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (idx, ch) in content.char_indices().skip_while(|(i, _)| *i < start) {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses a JSON object that looks like `{name, arguments}` or the full
/// `{function: {name, arguments}}` envelope.
fn parse_tool_value(candidate: &str) -> Option<ToolCall> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    if let Some(function) = value.get("function") {
        let name = function.get("name")?.as_str()?.to_string();
        let arguments = function.get("arguments").cloned().unwrap_or(Value::Null);
        return Some(ToolCall {
            function: ToolCallFunction { name, arguments },
        });
    }
    let name = value.get("name")?.as_str()?.to_string();
    let arguments = value.get("arguments").cloned().unwrap_or(Value::Null);
    Some(ToolCall {
        function: ToolCallFunction { name, arguments },
    })
}

/// Whitelist-driven prose extractor: searches for `<tool_name>(args)`
/// patterns among the known registry of tool names. Arguments are parsed as
/// loose JSON if they look like an object, else as `key=value` pairs.
fn extract_prose(content: &str, known_tools: &[&str]) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    for &tool in known_tools {
        let pattern = format!(r"{}\s*\(([^)]*)\)", regex::escape(tool));
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        for cap in re.captures_iter(content) {
            let args_str = cap.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            let arguments = parse_loose_arguments(args_str);
            calls.push(ToolCall {
                function: ToolCallFunction {
                    name: tool.to_string(),
                    arguments,
                },
            });
        }
    }
    calls
}

fn parse_loose_arguments(args_str: &str) -> Value {
    if args_str.is_empty() {
        return Value::Object(Default::default());
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(&format!("{{{}}}", args_str)) {
        return parsed;
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(args_str) {
        return parsed;
    }

    let mut map = serde_json::Map::new();
    for pair in args_str.split(',') {
        if let Some((key, value)) = pair.split_once('=') {
            map.insert(
                key.trim().trim_matches('"').to_string(),
                Value::String(value.trim().trim_matches('"').to_string()),
            );
        }
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(content: &str) -> ChatResponseMessage {
        ChatResponseMessage {
            role: "assistant".into(),
            content: content.to_string(),
            tool_calls: vec![],
        }
    }

    #[test]
    fn native_structured_calls_take_precedence() {
        let mut msg = message("ignored prose");
        msg.tool_calls.push(ToolCall {
            function: ToolCallFunction {
                name: "read_file".into(),
                arguments: Value::Null,
            },
        });
        let calls = extract_tool_calls(&msg, &["read_file"]);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "read_file");
    }

    #[test]
    fn fenced_json_block_is_parsed() {
        let msg = message("Here:\n```json\n{\"function\": {\"name\": \"modify_file\", \"arguments\": {\"path\": \"a.rs\"}}}\n```\n");
        let calls = extract_tool_calls(&msg, &["modify_file"]);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "modify_file");
        assert_eq!(calls[0].function.arguments["path"], "a.rs");
    }

    #[test]
    fn inline_json_object_is_parsed() {
        let msg = message("I'll call {\"name\": \"list_files\", \"arguments\": {\"dir\": \".\"}} now");
        let calls = extract_tool_calls(&msg, &["list_files"]);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "list_files");
    }

    #[test]
    fn prose_fallback_extracts_key_value_args() {
        let msg = message("I will run create_file(path=src/lib.rs, content=hello)");
        let calls = extract_tool_calls(&msg, &["create_file"]);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "create_file");
        assert_eq!(calls[0].function.arguments["path"], "src/lib.rs");
    }

    #[test]
    fn prose_fallback_ignores_unknown_tool_names() {
        let msg = message("do_something_unregistered(foo=bar)");
        let calls = extract_tool_calls(&msg, &["create_file"]);
        assert!(calls.is_empty());
    }
}
