use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_PRINTING: &str = "printing";
pub const STATUS_PRINTED: &str = "printed";
pub const STATUS_FAILED: &str = "failed";

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const MAX_PAYLOAD_BYTES: usize = 8 * 1024 * 1024;

/// A Firestore-shaped tagged field value, per the `documents` REST API.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    StringValue(String),
    IntegerValue(i64),
    TimestampValue(String),
    NullValue,
    MapValue(HashMap<String, TypedValue>),
}

impl TypedValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::StringValue(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TypedValue::IntegerValue(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, TypedValue>> {
        match self {
            TypedValue::MapValue(m) => Some(m),
            _ => None,
        }
    }

    /// Parse from the wire shape `{"stringValue": "..."}` etc.
    pub fn from_wire(value: &Value) -> Option<TypedValue> {
        let obj = value.as_object()?;
        if let Some(v) = obj.get("stringValue").and_then(Value::as_str) {
            return Some(TypedValue::StringValue(v.to_string()));
        }
        if let Some(v) = obj.get("integerValue") {
            let n = match v {
                Value::String(s) => s.parse::<i64>().ok()?,
                Value::Number(n) => n.as_i64()?,
                _ => return None,
            };
            return Some(TypedValue::IntegerValue(n));
        }
        if let Some(v) = obj.get("timestampValue").and_then(Value::as_str) {
            return Some(TypedValue::TimestampValue(v.to_string()));
        }
        if obj.contains_key("nullValue") {
            return Some(TypedValue::NullValue);
        }
        if let Some(v) = obj.get("mapValue") {
            let fields = v.get("fields")?.as_object()?;
            let mut map = HashMap::new();
            for (k, v) in fields {
                map.insert(k.clone(), TypedValue::from_wire(v)?);
            }
            return Some(TypedValue::MapValue(map));
        }
        None
    }

    pub fn to_wire(&self) -> Value {
        match self {
            TypedValue::StringValue(s) => serde_json::json!({ "stringValue": s }),
            TypedValue::IntegerValue(n) => serde_json::json!({ "integerValue": n.to_string() }),
            TypedValue::TimestampValue(ts) => serde_json::json!({ "timestampValue": ts }),
            TypedValue::NullValue => serde_json::json!({ "nullValue": null }),
            TypedValue::MapValue(m) => {
                let fields: serde_json::Map<String, Value> =
                    m.iter().map(|(k, v)| (k.clone(), v.to_wire())).collect();
                serde_json::json!({ "mapValue": { "fields": fields } })
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Target {
    #[serde(rename = "lan")]
    Lan {
        #[serde(default)]
        ip: String,
        #[serde(default = "default_tcp_port")]
        port: u16,
    },
    #[serde(rename = "osPrinter")]
    OsPrinter {
        #[serde(default, rename = "printerName")]
        printer_name: String,
    },
    #[serde(other)]
    Unknown,
}

fn default_tcp_port() -> u16 {
    9100
}

#[derive(Debug, Clone)]
pub struct ClaimMetadata {
    pub claimed_by: Option<String>,
    pub claimed_by_name: Option<String>,
    pub claimed_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PrintJob {
    pub id: String,
    pub status: String,
    pub target: Target,
    pub payload: Vec<u8>,
    pub paper_width: Option<i64>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub order_id: Option<String>,
    pub error: Option<String>,
    pub claim: ClaimMetadata,
}

impl PrintJob {
    /// Parse a job document's `fields` map (already decoded from the wire)
    /// into a `PrintJob`. Missing `attempts`/`maxAttempts` default per spec.
    pub fn from_fields(id: String, fields: &HashMap<String, TypedValue>) -> Option<PrintJob> {
        let status = fields.get("status")?.as_str()?.to_string();

        let target_map = fields.get("target").and_then(TypedValue::as_map);
        let target = parse_target(target_map);

        let payload_b64 = fields
            .get("payload")
            .and_then(TypedValue::as_str)
            .unwrap_or("");
        let payload = BASE64.decode(payload_b64).unwrap_or_default();

        let paper_width = fields.get("paperWidth").and_then(TypedValue::as_i64);
        let attempts = fields
            .get("attempts")
            .and_then(TypedValue::as_i64)
            .unwrap_or(0)
            .max(0) as u32;
        let max_attempts = fields
            .get("maxAttempts")
            .and_then(TypedValue::as_i64)
            .filter(|n| *n >= 1)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS as i64) as u32;
        let order_id = fields
            .get("orderId")
            .and_then(TypedValue::as_str)
            .map(String::from);
        let error = fields
            .get("error")
            .and_then(TypedValue::as_str)
            .map(String::from);

        let claim = ClaimMetadata {
            claimed_by: fields.get("claimedBy").and_then(TypedValue::as_str).map(String::from),
            claimed_by_name: fields
                .get("claimedByName")
                .and_then(TypedValue::as_str)
                .map(String::from),
            claimed_at: fields.get("claimedAt").and_then(TypedValue::as_str).map(String::from),
        };

        Some(PrintJob {
            id,
            status,
            target,
            payload,
            paper_width,
            attempts,
            max_attempts,
            order_id,
            error,
            claim,
        })
    }
}

fn parse_target(map: Option<&HashMap<String, TypedValue>>) -> Target {
    let Some(map) = map else {
        return Target::Unknown;
    };
    let kind = map.get("type").and_then(TypedValue::as_str).unwrap_or("");
    match kind {
        "lan" => Target::Lan {
            ip: map.get("ip").and_then(TypedValue::as_str).unwrap_or("").to_string(),
            port: map
                .get("port")
                .and_then(TypedValue::as_i64)
                .map(|p| p as u16)
                .unwrap_or(9100),
        },
        "osPrinter" => Target::OsPrinter {
            printer_name: map
                .get("printerName")
                .and_then(TypedValue::as_str)
                .unwrap_or("")
                .to_string(),
        },
        _ => Target::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_field(s: &str) -> TypedValue {
        TypedValue::StringValue(s.to_string())
    }

    #[test]
    fn parses_lan_target_job_with_defaults() {
        let mut target_fields = HashMap::new();
        target_fields.insert("type".to_string(), string_field("lan"));
        target_fields.insert("ip".to_string(), string_field("10.0.0.5"));
        target_fields.insert("port".to_string(), TypedValue::IntegerValue(9100));

        let mut fields = HashMap::new();
        fields.insert("status".to_string(), string_field("queued"));
        fields.insert("target".to_string(), TypedValue::MapValue(target_fields));
        fields.insert("payload".to_string(), string_field("SGk="));
        fields.insert("attempts".to_string(), TypedValue::IntegerValue(0));
        fields.insert("maxAttempts".to_string(), TypedValue::IntegerValue(3));

        let job = PrintJob::from_fields("job1".to_string(), &fields).unwrap();
        assert_eq!(job.status, "queued");
        assert_eq!(job.payload, b"Hi");
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.target, Target::Lan { ip: "10.0.0.5".to_string(), port: 9100 });
    }

    #[test]
    fn missing_max_attempts_defaults_to_three() {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), string_field("queued"));
        fields.insert("payload".to_string(), string_field(""));
        let job = PrintJob::from_fields("job2".to_string(), &fields).unwrap();
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.target, Target::Unknown);
    }

    #[test]
    fn typed_value_round_trips_through_wire_json() {
        let value = TypedValue::IntegerValue(42);
        let wire = value.to_wire();
        assert_eq!(TypedValue::from_wire(&wire), Some(value));
    }
}
