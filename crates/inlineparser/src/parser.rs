//! `@mcp.call(name, {...})` extraction (§4.9). Strict JSON first, then a
//! relaxed key/value fallback for LLM output that almost-but-not-quite
//! produces valid JSON.

use regex::Regex;
use std::sync::LazyLock;

static MCP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)@mcp\.call\s*\(\s*([\w.\-]+)\s*,\s*(\{[^}]*\})\s*\)").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct McpCall {
    pub tool_name: String,
    pub params: serde_json::Value,
    pub raw_text: String,
    pub line_number: usize,
}

/// Extracts every `@mcp.call(...)` occurrence from `text`, one line at a
/// time so `line_number` stays meaningful even across multi-line params.
pub fn parse(text: &str) -> Vec<McpCall> {
    let mut calls = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        for captures in MCP_PATTERN.captures_iter(line) {
            let tool_name = captures[1].to_string();
            let params_str = &captures[2];
            let params = serde_json::from_str(params_str).unwrap_or_else(|_| parse_relaxed(params_str));
            calls.push(McpCall {
                tool_name,
                params,
                raw_text: captures[0].to_string(),
                line_number: idx + 1,
            });
        }
    }
    calls
}

pub fn has_calls(text: &str) -> bool {
    MCP_PATTERN.is_match(text)
}

/// Best-effort parse of a `{...}` body that failed strict JSON parsing:
/// strip the braces, split on top-level commas, coerce each value to
/// bool/null/int/float/string in that order, default to the raw string.
fn parse_relaxed(s: &str) -> serde_json::Value {
    let inner = s.trim().trim_start_matches('{').trim_end_matches('}');
    let mut map = serde_json::Map::new();

    for pair in inner.split(',') {
        let Some((key, value)) = pair.split_once(':') else {
            continue;
        };
        let key = key.trim().trim_matches(|c| c == '"' || c == '\'').to_string();
        let value = value.trim();
        map.insert(key, coerce_relaxed_value(value));
    }

    serde_json::Value::Object(map)
}

fn coerce_relaxed_value(value: &str) -> serde_json::Value {
    if let Some(inner) = strip_quotes(value, '"').or_else(|| strip_quotes(value, '\'')) {
        return serde_json::Value::String(inner.to_string());
    }
    match value.to_lowercase().as_str() {
        "true" => return serde_json::Value::Bool(true),
        "false" => return serde_json::Value::Bool(false),
        "null" => return serde_json::Value::Null,
        _ => {}
    }
    if let Ok(i) = value.parse::<i64>() {
        return serde_json::Value::Number(i.into());
    }
    if let Ok(f) = value.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return serde_json::Value::Number(n);
        }
    }
    serde_json::Value::String(value.trim_matches(|c| c == '"' || c == '\'').to_string())
}

fn strip_quotes(value: &str, quote: char) -> Option<&str> {
    if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
        Some(&value[1..value.len() - 1])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strict_json_params() {
        let calls = parse(r#"do it: @mcp.call(health.check, {"verbose": true})"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "health.check");
        assert_eq!(calls[0].params, serde_json::json!({"verbose": true}));
        assert_eq!(calls[0].line_number, 1);
    }

    #[test]
    fn falls_back_to_relaxed_parsing_on_malformed_json() {
        let calls = parse(r#"@mcp.call(echo, {key: value, count: 3, ok: true})"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].params,
            serde_json::json!({"key": "value", "count": 3, "ok": true})
        );
    }

    #[test]
    fn relaxed_parsing_handles_quoted_and_null_values() {
        let calls = parse(r#"@mcp.call(echo, {name: 'gemini', note: null})"#);
        assert_eq!(calls[0].params, serde_json::json!({"name": "gemini", "note": null}));
    }

    #[test]
    fn tracks_line_number_across_multiple_lines() {
        let calls = parse("first line\n@mcp.call(echo, {})\nthird line\n@mcp.call(health.check, {})");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].line_number, 2);
        assert_eq!(calls[1].line_number, 4);
    }

    #[test]
    fn has_calls_detects_presence_without_parsing() {
        assert!(has_calls("please @mcp.call(echo, {})"));
        assert!(!has_calls("no calls here"));
    }

    #[test]
    fn no_calls_returns_empty() {
        assert!(parse("nothing to see here").is_empty());
    }
}
