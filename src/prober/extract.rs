use serde_json::Value;

use crate::error::{ProbeError, Result};

/// Pulls the scalar text out of a decoded JSON-RPC result.
///
/// Without a path the result itself is the scalar: strings are unquoted,
/// anything else is rendered as compact JSON. With a path the JMESPath
/// expression is evaluated; a `null` outcome is an error so a missing field
/// never turns into a silent zero.
pub fn extract_scalar(result: &Value, path: &str) -> Result<String> {
    let path = path.trim();
    if path.is_empty() {
        return Ok(render_value(result));
    }

    let expression = jmespath::compile(path)
        .map_err(|e| ProbeError::Decode(format!("invalid JMESPath '{}': {}", path, e)))?;
    let found = expression
        .search(result)
        .map_err(|e| ProbeError::Decode(format!("JMESPath '{}' failed: {}", path, e)))?;

    if found.is_null() {
        return Err(ProbeError::Decode(format!(
            "JMESPath '{}' matched nothing in result",
            path
        )));
    }
    let found = serde_json::to_value(&*found)
        .map_err(|e| ProbeError::Decode(format!("cannot render JMESPath result: {}", e)))?;
    Ok(render_value(&found))
}

/// Whole floats (`sum()` results, `42.0` fields) render without a fraction
/// so they still parse as integers.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) if !number.is_i64() && !number.is_u64() => match number.as_f64() {
            Some(float) if float.is_finite() && float.fract() == 0.0 => format!("{:.0}", float),
            _ => number.to_string(),
        },
        other => other.to_string(),
    }
}
