//! Bridge envelope codec.
//!
//! The UI surface talks to the host with small JSON objects shaped
//! `{ "type": string, "payload": any }`. Some transports hand the message over
//! as a JSON string whose content is the object, so decoding unwraps one extra
//! layer of string encoding before looking at the object.
//!
//! Outbound envelopes come in three shapes:
//! - [`BridgeEnvelope`]: requests/notifications (`export_project_state`, `import_project_state`)
//! - [`ResultEnvelope`]: the single terminal reply of a handler
//! - [`ProgressEnvelope`]: intermediate progress of long-running handlers
//! - [`VerbatimEnvelope`]: a payload forwarded as the exact JSON text it was read from

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{Map, Value};

/// Outbound reply types
pub const TYPE_ANALYZE_MATRIX_RESULT: &str = "python_analyze_matrix_result";
pub const TYPE_IFC_EXPORT_RESULT: &str = "ifc_export_result";
pub const TYPE_UPDATE_PROGRESS: &str = "app_update_progress";
pub const TYPE_UPDATE_RESULT: &str = "app_update_result";
pub const TYPE_BRIDGE_ERROR: &str = "bridge_error";

/// Host-initiated messages
pub const TYPE_EXPORT_PROJECT_STATE: &str = "export_project_state";
pub const TYPE_IMPORT_PROJECT_STATE: &str = "import_project_state";

/// A typed message exchanged with the UI surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeEnvelope {
    /// Message type used for routing (never empty on decoded envelopes)
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque payload, omitted on the wire when null
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl BridgeEnvelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Envelope without payload.
    pub fn signal(kind: impl Into<String>) -> Self {
        Self::new(kind, Value::Null)
    }
}

/// Terminal reply of a handler.
///
/// `success` and `error` are always present on the wire (`error: null` on
/// success) so the UI can rely on field presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ResultEnvelope {
    pub fn ok(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            success: true,
            error: None,
            message: None,
            data: None,
            path: None,
        }
    }

    pub fn failed(kind: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            success: false,
            error: Some(error.into()),
            message: None,
            data: None,
            path: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Intermediate progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
}

impl ProgressEnvelope {
    pub fn message(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: Some(message.into()),
            percent: None,
        }
    }

    pub fn percent(kind: impl Into<String>, percent: u8) -> Self {
        Self {
            kind: kind.into(),
            message: None,
            percent: Some(percent.min(100)),
        }
    }
}

/// Envelope whose payload is written out byte for byte.
#[derive(Debug, Serialize)]
pub struct VerbatimEnvelope<'a> {
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub payload: &'a RawValue,
}

/// Any envelope the host posts to the UI surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundEnvelope {
    Message(BridgeEnvelope),
    Result(ResultEnvelope),
    Progress(ProgressEnvelope),
}

impl OutboundEnvelope {
    pub fn kind(&self) -> &str {
        match self {
            OutboundEnvelope::Message(e) => &e.kind,
            OutboundEnvelope::Result(e) => &e.kind,
            OutboundEnvelope::Progress(e) => &e.kind,
        }
    }
}

impl From<BridgeEnvelope> for OutboundEnvelope {
    fn from(value: BridgeEnvelope) -> Self {
        OutboundEnvelope::Message(value)
    }
}

impl From<ResultEnvelope> for OutboundEnvelope {
    fn from(value: ResultEnvelope) -> Self {
        OutboundEnvelope::Result(value)
    }
}

impl From<ProgressEnvelope> for OutboundEnvelope {
    fn from(value: ProgressEnvelope) -> Self {
        OutboundEnvelope::Progress(value)
    }
}

/// Why an inbound message could not be turned into a [`BridgeEnvelope`].
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Not valid JSON (or the inner layer of a string-wrapped message is not)
    Malformed { message: String },
    /// Valid JSON but not an object
    NotAnObject,
    /// An object without a usable `type`; the object is kept for fallback routing
    MissingType { document: Value },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Malformed { message } => write!(f, "malformed JSON: {message}"),
            DecodeError::NotAnObject => write!(f, "message is not a JSON object"),
            DecodeError::MissingType { .. } => write!(f, "message has no 'type' field"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// A decoded inbound message together with the original text of its payload.
#[derive(Debug)]
pub struct DecodedMessage {
    pub envelope: BridgeEnvelope,
    /// `payload` exactly as sent; `None` for the inline form, a null payload,
    /// or a message that arrived already parsed
    pub raw_payload: Option<Box<RawValue>>,
}

impl From<BridgeEnvelope> for DecodedMessage {
    fn from(envelope: BridgeEnvelope) -> Self {
        Self {
            envelope,
            raw_payload: None,
        }
    }
}

/// Only the `payload` member of a message object, borrowed from its text.
#[derive(Deserialize)]
struct PayloadText<'a> {
    #[serde(borrow, default)]
    payload: Option<&'a RawValue>,
}

fn parse(text: &str) -> Result<Value, DecodeError> {
    serde_json::from_str(text).map_err(|e| DecodeError::Malformed {
        message: e.to_string(),
    })
}

fn raw_payload(object_text: &str) -> Option<Box<RawValue>> {
    serde_json::from_str::<PayloadText>(object_text)
        .ok()
        .and_then(|text| text.payload)
        .filter(|payload| payload.get() != "null")
        .map(ToOwned::to_owned)
}

/// Decode raw message text received from the UI surface.
pub fn decode(raw: &str) -> Result<BridgeEnvelope, DecodeError> {
    decode_value(parse(raw)?)
}

/// Decode an already-parsed message.
pub fn decode_value(value: Value) -> Result<BridgeEnvelope, DecodeError> {
    match value {
        Value::String(inner) => decode_object(parse(&inner)?),
        other => decode_object(other),
    }
}

/// Decode raw message text and keep the payload's original text.
pub fn decode_verbatim(raw: &str) -> Result<DecodedMessage, DecodeError> {
    match parse(raw)? {
        Value::String(inner) => decode_object_text(&inner),
        value => Ok(DecodedMessage {
            envelope: decode_object(value)?,
            raw_payload: raw_payload(raw),
        }),
    }
}

/// Decode the text of a message object whose string layer, if any, is
/// already removed.
pub fn decode_object_text(text: &str) -> Result<DecodedMessage, DecodeError> {
    Ok(DecodedMessage {
        envelope: decode_object(parse(text)?)?,
        raw_payload: raw_payload(text),
    })
}

fn decode_object(value: Value) -> Result<BridgeEnvelope, DecodeError> {
    let Value::Object(mut object) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let kind = match object.get("type") {
        Some(Value::String(kind)) if !kind.trim().is_empty() => kind.clone(),
        _ => {
            return Err(DecodeError::MissingType {
                document: Value::Object(object),
            })
        }
    };
    object.remove("type");

    let payload = match object.remove("payload") {
        Some(payload) => payload,
        None if object.is_empty() => Value::Null,
        // Inline form: `{ "type": "ifc_export", "buildings": [...] }`
        None => Value::Object(object),
    };

    Ok(BridgeEnvelope { kind, payload })
}

/// Encode an envelope to its wire text.
pub fn encode<T: Serialize>(envelope: &T) -> String {
    match serde_json::to_string(envelope) {
        Ok(text) => text,
        Err(e) => {
            log::error!("Failed to encode bridge envelope: {e}");
            let mut fallback = Map::new();
            fallback.insert("type".into(), Value::String("encode_error".into()));
            fallback.insert("success".into(), Value::Bool(false));
            fallback.insert("error".into(), Value::String(e.to_string()));
            Value::Object(fallback).to_string()
        }
    }
}

/// Read an optional string field from a payload object.
pub fn payload_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

/// Read an optional list of strings from a payload object.
///
/// Non-string entries are skipped.
pub fn payload_str_list(payload: &Value, key: &str) -> Option<Vec<String>> {
    payload.get(key).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip() {
        let envelopes = vec![
            BridgeEnvelope::new(
                "python_analyze_matrix",
                json!({"filename": "a.csv", "zone": "north", "matrix": [[1, 2], [3, 4]]}),
            ),
            BridgeEnvelope::signal("export_project_state"),
            BridgeEnvelope::new("app_update_execute", json!({"path": "/tmp/setup.exe"})),
            BridgeEnvelope::new("odd", json!([1, "two", null])),
        ];

        for envelope in envelopes {
            let decoded = decode(&encode(&envelope)).unwrap();
            assert_eq!(decoded, envelope);
        }
    }

    #[test]
    fn test_string_wrapped_decodes_like_object() {
        let object = r#"{"type":"python_analyze_matrix","payload":{"zone":"north"}}"#;
        let wrapped = serde_json::to_string(object).unwrap();
        assert!(wrapped.starts_with('"'));

        assert_eq!(decode(&wrapped).unwrap(), decode(object).unwrap());
    }

    #[test]
    fn test_only_one_layer_is_unwrapped() {
        let object = r#"{"type":"ifc_export"}"#;
        let twice = serde_json::to_string(&serde_json::to_string(object).unwrap()).unwrap();
        assert_eq!(decode(&twice), Err(DecodeError::NotAnObject));
    }

    #[test]
    fn test_inline_fields_become_payload() {
        let envelope = decode(r#"{"type":"ifc_export","buildings":[{"id":1}]}"#).unwrap();
        assert_eq!(envelope.kind, "ifc_export");
        assert_eq!(envelope.payload, json!({"buildings": [{"id": 1}]}));
    }

    #[test]
    fn test_missing_type_keeps_document() {
        match decode(r#"{"buildings":[]}"#) {
            Err(DecodeError::MissingType { document }) => {
                assert_eq!(document, json!({"buildings": []}))
            }
            other => panic!("Expected MissingType, got {other:?}"),
        }

        assert!(matches!(
            decode(r#"{"type":"  "}"#),
            Err(DecodeError::MissingType { .. })
        ));
        assert!(matches!(
            decode(r#"{"type":42}"#),
            Err(DecodeError::MissingType { .. })
        ));
    }

    #[test]
    fn test_non_object_and_malformed() {
        assert_eq!(decode("[1,2]"), Err(DecodeError::NotAnObject));
        assert_eq!(decode("true"), Err(DecodeError::NotAnObject));
        assert!(matches!(decode("{not json"), Err(DecodeError::Malformed { .. })));
        assert!(matches!(
            decode(r#""{not json""#),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn test_result_envelope_serializes_null_error() {
        let ok = ResultEnvelope::ok(TYPE_ANALYZE_MATRIX_RESULT).with_data(json!({"a": 1}));
        let value: Value = serde_json::from_str(&encode(&ok)).unwrap();
        assert_eq!(value["success"], true);
        assert!(value.as_object().unwrap().contains_key("error"));
        assert!(value["error"].is_null());
        assert!(!value.as_object().unwrap().contains_key("message"));
    }

    #[test]
    fn test_failed_envelope_matches_wire_contract() {
        let failed = ResultEnvelope::failed(TYPE_ANALYZE_MATRIX_RESULT, "CLI not found: /x");
        assert_eq!(
            serde_json::from_str::<Value>(&encode(&failed)).unwrap(),
            json!({
                "type": "python_analyze_matrix_result",
                "success": false,
                "error": "CLI not found: /x"
            })
        );
    }

    #[test]
    fn test_outbound_untagged_shapes() {
        let progress: OutboundEnvelope =
            ProgressEnvelope::percent(TYPE_UPDATE_PROGRESS, 250).into();
        assert_eq!(progress.kind(), TYPE_UPDATE_PROGRESS);
        assert_eq!(
            serde_json::to_value(&progress).unwrap(),
            json!({"type": "app_update_progress", "percent": 100})
        );

        let message: OutboundEnvelope = BridgeEnvelope::signal(TYPE_EXPORT_PROJECT_STATE).into();
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"type": "export_project_state"})
        );
    }

    const UI_STATE: &str =
        r#"{"zeta":1,"alpha":12345678901234567890123,"mid":0.10000000000000000001}"#;

    #[test]
    fn test_verbatim_decode_keeps_payload_text() {
        let text = format!(r#"{{"type":"export_project_state_result","payload": {UI_STATE} }}"#);

        let decoded = decode_verbatim(&text).unwrap();
        assert_eq!(decoded.envelope.kind, "export_project_state_result");
        assert_eq!(decoded.raw_payload.unwrap().get(), UI_STATE);

        // Same through the string-wrapped form
        let wrapped = serde_json::to_string(&text).unwrap();
        let decoded = decode_verbatim(&wrapped).unwrap();
        assert_eq!(decoded.raw_payload.unwrap().get(), UI_STATE);

        let decoded = decode_object_text(&text).unwrap();
        assert_eq!(decoded.raw_payload.unwrap().get(), UI_STATE);
    }

    #[test]
    fn test_verbatim_decode_without_payload_text() {
        let decoded = decode_verbatim(r#"{"type":"ifc_export","buildings":[]}"#).unwrap();
        assert_eq!(decoded.envelope.payload, json!({"buildings": []}));
        assert!(decoded.raw_payload.is_none());

        let decoded = decode_verbatim(r#"{"type":"export_project_state_result","payload":null}"#)
            .unwrap();
        assert!(decoded.raw_payload.is_none());

        // The object text form never unwraps a string layer
        let wrapped = serde_json::to_string(r#"{"type":"ifc_export"}"#).unwrap();
        assert!(matches!(
            decode_object_text(&wrapped),
            Err(DecodeError::NotAnObject)
        ));
    }

    #[test]
    fn test_verbatim_envelope_writes_payload_unchanged() {
        let payload: &RawValue = serde_json::from_str(UI_STATE).unwrap();
        let text = encode(&VerbatimEnvelope {
            kind: TYPE_IMPORT_PROJECT_STATE,
            payload,
        });
        assert_eq!(
            text,
            format!(r#"{{"type":"import_project_state","payload":{UI_STATE}}}"#)
        );
    }

    #[test]
    fn test_payload_helpers() {
        let payload = json!({"path": "/a", "args": ["/S", 3, "--quiet"]});
        assert_eq!(payload_str(&payload, "path"), Some("/a"));
        assert_eq!(payload_str(&payload, "missing"), None);
        assert_eq!(
            payload_str_list(&payload, "args"),
            Some(vec!["/S".to_string(), "--quiet".to_string()])
        );
        assert_eq!(payload_str_list(&payload, "path"), None);
    }
}
