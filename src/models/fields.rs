//! Field decoding shared by request inputs.
//!
//! Duration fields accept either an integer number of seconds or a string
//! such as `"90"`, `"30s"`, `"15m"`, `"2h"` or `"7d"`.

use serde::{de, Deserialize, Deserializer};
use serde_json::Value;

/// Parse a duration into whole seconds.
pub fn parse_duration_secs(raw: &str) -> Result<u64, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0);
    }

    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{}'", raw))?;

    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => return Err(format!("invalid duration unit in '{}'", raw)),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("duration '{}' is too large", raw))
}

/// serde helper for `Option<u64>` duration fields. `null` means absent.
pub fn opt_duration<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| de::Error::custom("duration must be a non-negative integer")),
        Some(Value::String(s)) => parse_duration_secs(&s).map(Some).map_err(de::Error::custom),
        Some(other) => Err(de::Error::custom(format!(
            "expected a duration, got {}",
            other
        ))),
    }
}
