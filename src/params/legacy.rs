//! Legacy archive metadata
//!
//! Older download and correlation stages wrote their parameters as a
//! single-quoted dict literal, e.g.
//!
//! ```text
//! {'samp_freq': 20, 'freqmin': 0.05, 'start_date': ['2019_02_01_00_00_00'], 'rm_resp': None}
//! ```
//!
//! This module rewrites that literal into JSON and picks out the known keys.
//! Unknown keys are ignored; known keys with unusable values are errors.

use serde_json::{Map, Value};

use crate::error::{Result, StoreError};
use crate::timespan::parse_datetime;

use super::ConfigParameters;

/// Decode a legacy text record
pub fn decode_legacy_metadata(text: &str) -> Result<ConfigParameters> {
    let json = literal_to_json(text)?;
    let value: Value = serde_json::from_str(&json)
        .map_err(|e| StoreError::Configuration(format!("invalid legacy metadata: {}", e)))?;
    let map = match value {
        Value::Object(map) => map,
        _ => {
            return Err(StoreError::Configuration(
                "legacy metadata is not a dict".to_string(),
            ))
        }
    };

    let mut params = ConfigParameters::default();
    if let Some(v) = number(&map, "samp_freq")? {
        params.samp_freq = v;
    }
    if let Some(v) = number(&map, "cc_len")? {
        params.cc_len = v;
    }
    if let Some(v) = number(&map, "step")? {
        params.step = v;
    }
    if let Some(v) = number(&map, "freqmin")? {
        params.freqmin = v;
    }
    if let Some(v) = number(&map, "freqmax")? {
        params.freqmax = v;
    }
    if let Some(v) = number(&map, "maxlag")? {
        params.maxlag = v;
    }
    if let Some(v) = number(&map, "inc_hours")? {
        params.inc_hours = to_u32("inc_hours", v)?;
    }
    if let Some(v) = number(&map, "ncomp")? {
        params.ncomp = to_u32("ncomp", v)?;
    }
    if let Some(s) = string(&map, "freq_norm")? {
        params.freq_norm = s.parse()?;
    }
    if let Some(s) = string(&map, "stack_method")? {
        params.stack_method = s.parse()?;
    }
    if let Some(s) = string(&map, "start_date")? {
        params.start_date = Some(parse_datetime(&s)?);
    }
    if let Some(s) = string(&map, "end_date")? {
        params.end_date = Some(parse_datetime(&s)?);
    }
    Ok(params)
}

// =============================================================================
// Field Extraction
// =============================================================================

/// A single-element list stands for its element (dates were written that way)
fn unwrap_singleton(value: &Value) -> &Value {
    match value {
        Value::Array(items) if items.len() == 1 => &items[0],
        other => other,
    }
}

fn number(map: &Map<String, Value>, key: &str) -> Result<Option<f64>> {
    match map.get(key).map(unwrap_singleton) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s.trim().parse::<f64>().map(Some).map_err(|_| bad(key, s)),
        Some(other) => Err(bad(key, &other.to_string())),
    }
}

fn string(map: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match map.get(key).map(unwrap_singleton) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(bad(key, &other.to_string())),
    }
}

fn to_u32(key: &str, v: f64) -> Result<u32> {
    if v.fract() == 0.0 && v >= 0.0 && v <= f64::from(u32::MAX) {
        Ok(v as u32)
    } else {
        Err(bad(key, &v.to_string()))
    }
}

fn bad(key: &str, value: &str) -> StoreError {
    StoreError::Configuration(format!("legacy metadata: unusable value {} for '{}'", value, key))
}

// =============================================================================
// Literal Rewriting
// =============================================================================

/// Rewrite a legacy literal (dicts, lists, tuples, str, numbers, True/False/None)
/// into JSON text
fn literal_to_json(text: &str) -> Result<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let (literal, next) = read_string(&chars, i)?;
                out.push_str(&serde_json::to_string(&literal).map_err(|e| {
                    StoreError::Configuration(format!("legacy metadata string: {}", e))
                })?);
                i = next;
                continue;
            }
            '(' => out.push('['),
            ')' => out.push(']'),
            ',' => {
                // Drop trailing commas before a closing bracket
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']') | Some(')')) {
                    out.push(',');
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "True" => out.push_str("true"),
                    "False" => out.push_str("false"),
                    "None" => out.push_str("null"),
                    "nan" | "inf" => out.push_str("null"),
                    // Numbers like 1e-3 are handled with the digits below
                    other => {
                        return Err(StoreError::Configuration(format!(
                            "legacy metadata: unsupported expression '{}'",
                            other
                        )))
                    }
                }
                continue;
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || matches!(chars[i], '-' | '+' | '.' | 'e' | 'E'))
                {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                let number: f64 = raw.parse().map_err(|_| {
                    StoreError::Configuration(format!("legacy metadata: bad number '{}'", raw))
                })?;
                out.push_str(&normalize_number(&raw, number));
                continue;
            }
            other => out.push(other),
        }
        i += 1;
    }
    Ok(out)
}

/// Legacy records may hold `20.`, `.5` or `+1`; JSON may not
fn normalize_number(raw: &str, value: f64) -> String {
    let is_integer = raw
        .trim_start_matches(['-', '+'])
        .chars()
        .all(|c| c.is_ascii_digit());
    if is_integer {
        raw.trim_start_matches('+').to_string()
    } else {
        format!("{:?}", value)
    }
}

/// Read a quoted string starting at `start`; returns the content and the
/// index after the closing quote
fn read_string(chars: &[char], start: usize) -> Result<(String, usize)> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                let escaped = chars[i + 1];
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(StoreError::Configuration(
        "legacy metadata: unterminated string".to_string(),
    ))
}
