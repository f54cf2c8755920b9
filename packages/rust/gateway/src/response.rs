//! Parsing and picking apart CLI JSON responses.

use serde_json::Value;

use schemalib_shared::GatewayError;

/// Error code the platform emits when the org's API allowance is exhausted.
pub const RATE_LIMIT_SIGNATURE: &str = "REQUEST_LIMIT_EXCEEDED";

/// True when either stream carries the rate-limit signature.
pub fn is_rate_limited(stdout: &str, stderr: &str) -> bool {
    stdout.contains(RATE_LIMIT_SIGNATURE) || stderr.contains(RATE_LIMIT_SIGNATURE)
}

/// Parse CLI output as JSON, tolerating a byte-order mark and stray text
/// (update notices, warnings) around the JSON document.
pub fn parse_tolerant(raw: &str) -> Result<Value, GatewayError> {
    if raw.trim().is_empty() {
        return Err(GatewayError::Malformed("empty output".into()));
    }

    let first_err = match serde_json::from_str::<Value>(raw) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let cleaned = raw.trim_start().trim_start_matches('\u{feff}').trim();
    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Ok(value);
    }

    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&cleaned[start..=end]) {
                return Ok(value);
            }
        }
    }

    let preview: String = cleaned.chars().take(120).collect();
    Err(GatewayError::Malformed(format!(
        "{first_err} (output starts with {preview:?})"
    )))
}

/// The `result` member of a CLI response, if present and not null.
pub fn result_of(value: &Value) -> Option<&Value> {
    value.get("result").filter(|r| !r.is_null())
}

/// `result.records` of a query response; empty when absent.
pub fn records_of(value: &Value) -> &[Value] {
    value
        .pointer("/result/records")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// `result.totalSize` of a query response.
pub fn total_size_of(value: &Value) -> Option<u64> {
    value.pointer("/result/totalSize").and_then(Value::as_u64)
}
