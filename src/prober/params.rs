use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{ProbeError, Result};

/// One positional JSON-RPC argument taken from a query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcArg {
    Integer(i64),
    Bool(bool),
    Text(String),
    /// Call object such as `{to:0x..,data:0x..}`; empty fields are dropped.
    Object(BTreeMap<String, String>),
}

impl RpcArg {
    pub fn to_json(&self) -> Value {
        match self {
            RpcArg::Integer(value) => Value::from(*value),
            RpcArg::Bool(value) => Value::Bool(*value),
            RpcArg::Text(value) => Value::String(value.clone()),
            RpcArg::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }
}

/// Encodes a positional argument list as the `params` array of a request.
pub fn args_to_json(args: &[RpcArg]) -> Value {
    Value::Array(args.iter().map(RpcArg::to_json).collect())
}

fn classify(part: &str) -> RpcArg {
    if let Ok(value) = part.parse::<i64>() {
        return RpcArg::Integer(value);
    }
    match part {
        "t" | "T" | "true" | "True" | "TRUE" => RpcArg::Bool(true),
        "f" | "F" | "false" | "False" | "FALSE" => RpcArg::Bool(false),
        _ => RpcArg::Text(part.to_string()),
    }
}

/// Splits a comma separated argument string into typed arguments.
///
/// Integers (base 10) and booleans are typed, everything else stays text.
/// An empty string means "no arguments"; `" "` is one empty-text argument.
pub fn strings_to_slice(text: &str) -> Vec<RpcArg> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split(',').map(|part| classify(part.trim())).collect()
}

/// Parses `eth_call` style arguments: brace-delimited call objects mixed
/// with trailing literals, e.g. `{from:,to:0xabc,data:0x8da5cb5b},latest`.
pub fn parse_jsonrpc_params(text: &str) -> Result<Vec<RpcArg>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in text.char_indices() {
        match ch {
            '{' => {
                if depth > 0 {
                    return Err(ProbeError::Precondition(format!(
                        "nested braces are not supported in arguments: {}",
                        text
                    )));
                }
                depth += 1;
            }
            '}' => {
                if depth == 0 {
                    return Err(ProbeError::Precondition(format!(
                        "unbalanced '}}' in arguments: {}",
                        text
                    )));
                }
                depth -= 1;
            }
            ',' if depth == 0 => {
                segments.push(&text[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(ProbeError::Precondition(format!(
            "unbalanced '{{' in arguments: {}",
            text
        )));
    }
    segments.push(&text[start..]);

    segments
        .into_iter()
        .map(|segment| {
            let segment = segment.trim();
            match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(body) => parse_object(body).map(RpcArg::Object),
                None if segment.contains('{') || segment.contains('}') => {
                    Err(ProbeError::Precondition(format!(
                        "misplaced brace in argument '{}'",
                        segment
                    )))
                }
                None => Ok(classify(segment)),
            }
        })
        .collect()
}

fn parse_object(body: &str) -> Result<BTreeMap<String, String>> {
    let mut fields = BTreeMap::new();
    for entry in body.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (key, value) = entry.split_once(':').ok_or_else(|| {
            ProbeError::Precondition(format!("object field '{}' has no ':'", entry))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ProbeError::Precondition(format!(
                "object field '{}' has an empty key",
                entry
            )));
        }
        let value = value.trim();
        if !value.is_empty() {
            fields.insert(key.to_string(), value.to_string());
        }
    }
    Ok(fields)
}

/// Picks the parser for a raw `arg` value.
pub fn parse_call_args(text: &str) -> Result<Vec<RpcArg>> {
    if text.contains('{') || text.contains('}') {
        parse_jsonrpc_params(text)
    } else {
        Ok(strings_to_slice(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strings_to_slice_types_each_part() {
        let args = strings_to_slice("42,true,hello,0xabc");
        assert_eq!(
            args,
            vec![
                RpcArg::Integer(42),
                RpcArg::Bool(true),
                RpcArg::Text("hello".to_string()),
                RpcArg::Text("0xabc".to_string()),
            ]
        );
    }

    #[test]
    fn strings_to_slice_trims_and_keeps_negative_numbers() {
        let args = strings_to_slice(" -7 , false ,  0x2::sui::SUI ");
        assert_eq!(
            args,
            vec![
                RpcArg::Integer(-7),
                RpcArg::Bool(false),
                RpcArg::Text("0x2::sui::SUI".to_string()),
            ]
        );
    }

    #[test]
    fn strings_to_slice_accepts_short_bool_forms() {
        assert_eq!(
            strings_to_slice("t,T,f,F,TRUE,False,tru"),
            vec![
                RpcArg::Bool(true),
                RpcArg::Bool(true),
                RpcArg::Bool(false),
                RpcArg::Bool(false),
                RpcArg::Bool(true),
                RpcArg::Bool(false),
                RpcArg::Text("tru".to_string()),
            ]
        );
    }

    #[test]
    fn strings_to_slice_distinguishes_empty_from_blank() {
        assert!(strings_to_slice("").is_empty());
        assert_eq!(strings_to_slice(" "), vec![RpcArg::Text(String::new())]);
        assert_eq!(
            strings_to_slice("a,"),
            vec![RpcArg::Text("a".to_string()), RpcArg::Text(String::new())]
        );
    }

    #[test]
    fn integer_overflow_stays_text() {
        let args = strings_to_slice("99999999999999999999");
        assert_eq!(args, vec![RpcArg::Text("99999999999999999999".to_string())]);
    }

    #[test]
    fn parse_jsonrpc_params_builds_call_object() {
        let args = parse_jsonrpc_params(
            "{from:,to:0x3c3a81e81dc49a522a592e7622a7e711c06bf354,data:0x8da5cb5b},latest",
        )
        .expect("params should parse");

        assert_eq!(
            args_to_json(&args),
            json!([
                {
                    "to": "0x3c3a81e81dc49a522a592e7622a7e711c06bf354",
                    "data": "0x8da5cb5b"
                },
                "latest"
            ])
        );
    }

    #[test]
    fn parse_jsonrpc_params_omits_empty_fields() {
        let args = parse_jsonrpc_params("{from:, to: 0x01 }").expect("params should parse");
        match &args[0] {
            RpcArg::Object(fields) => {
                assert!(!fields.contains_key("from"));
                assert_eq!(fields.get("to").map(String::as_str), Some("0x01"));
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn parse_jsonrpc_params_rejects_bad_structure() {
        assert!(parse_jsonrpc_params("{to:0x01,latest").is_err());
        assert!(parse_jsonrpc_params("to:0x01},latest").is_err());
        assert!(parse_jsonrpc_params("{to:{data:1}}").is_err());
        assert!(parse_jsonrpc_params("{to0x01}").is_err());
        assert!(parse_jsonrpc_params("{:0x01}").is_err());
        assert!(parse_jsonrpc_params("latest{").is_err());
    }

    #[test]
    fn parse_call_args_keeps_plain_lists_on_the_simple_path() {
        let args = parse_call_args("0x0000000000000000000000000000000000000000,latest")
            .expect("args should parse");
        assert_eq!(
            args_to_json(&args),
            json!(["0x0000000000000000000000000000000000000000", "latest"])
        );
        assert!(parse_call_args("").expect("empty args").is_empty());
    }

    #[test]
    fn to_json_matches_each_variant() {
        assert_eq!(RpcArg::Integer(5).to_json(), json!(5));
        assert_eq!(RpcArg::Bool(false).to_json(), json!(false));
        assert_eq!(RpcArg::Text("x".into()).to_json(), json!("x"));
    }
}
