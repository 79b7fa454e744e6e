//! Wire messages exchanged with the debugger proxy.
//!
//! Frames are JSON objects. The only structure the worker relies on is the
//! `method` discriminant; every other field is carried through untouched in
//! the raw value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PREPARE_JS_RUNTIME: &str = "prepareJSRuntime";
pub const DISCONNECTED: &str = "$disconnected";

/// A parsed inbound frame, classified by its `method`.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// Create a fresh worker lifetime and acknowledge with `replyID`
    PrepareJsRuntime { id: Option<Value>, raw: Value },
    /// Retire the current lifetime without replacing it
    Disconnected,
    /// Anything else with a method goes to the active lifetime verbatim
    Forward { method: String, raw: Value },
    /// No (or a falsy) method: informational only
    NoMethod(Value),
}

impl WireMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: Value = serde_json::from_str(text)?;
        Ok(Self::classify(raw))
    }

    pub fn classify(raw: Value) -> Self {
        let method = match raw.get("method") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(other) if is_truthy(other) => other.to_string(),
            _ => return WireMessage::NoMethod(raw),
        };

        match method.as_str() {
            PREPARE_JS_RUNTIME => WireMessage::PrepareJsRuntime {
                id: raw.get("id").cloned(),
                raw,
            },
            DISCONNECTED => WireMessage::Disconnected,
            _ => WireMessage::Forward { method, raw },
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Acknowledgement of a `prepareJSRuntime` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyMessage {
    /// `None` when the request id has no integer reading; serialized as `null`
    #[serde(rename = "replyID")]
    pub reply_id: Option<i64>,
}

impl ReplyMessage {
    pub fn for_request(id: Option<&Value>) -> Self {
        Self {
            reply_id: id.and_then(parse_int),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({ "replyID": self.reply_id })
    }
}

/// Integer reading of a request id: leading decimal digits of a string
/// (after whitespace and an optional sign), or the truncated number.
/// Values beyond the `i64` range clamp to its bounds.
pub fn parse_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim_start();
            let (negative, digits) = match s.as_bytes().first() {
                Some(b'-') => (true, &s[1..]),
                Some(b'+') => (false, &s[1..]),
                _ => (false, s),
            };
            let end = digits
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(digits.len());
            let digits = &digits[..end];
            if digits.is_empty() {
                return None;
            }
            // Out-of-range ids saturate, as numeric ids do
            Some(match (digits.parse::<i64>(), negative) {
                (Ok(magnitude), true) => -magnitude,
                (Ok(magnitude), false) => magnitude,
                (Err(_), true) => i64::MIN,
                (Err(_), false) => i64::MAX,
            })
        }
        _ => None,
    }
}
