//! Wire-format types: integer message types, command decoding, responses and events.
//!
//! Every inbound frame is a JSON object `{"type": <int>, "uid": <int>, ...fields, "kwargs": {...}}`.
//! Arguments are collected from both the top level and `kwargs`; a key present in
//! both places takes the top-level value.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::BridgeError;

/// Integer tags shared by commands, events and the reserved input-error marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Malformed input that could not be correlated to a `uid`.
    InputError,
    /// Begin continuous scanning.
    StartScan,
    /// End continuous scanning.
    StopScan,
    /// Bounded scan returning a snapshot.
    Discover,
    /// Bounded scan for a device name.
    FindDeviceByName,
    /// Bounded scan for a device address.
    FindDeviceByAddress,
    /// Open a GATT link.
    Connect,
    /// Close a GATT link.
    Disconnect,
    /// Pair with a peripheral.
    Pair,
    /// Remove pairing.
    Unpair,
    /// Cached GATT tree of a connected device.
    Services,
    /// Discover primary services.
    DiscoverServices,
    /// Discover characteristics.
    DiscoverCharacteristics,
    /// Discover descriptors.
    DiscoverDescriptors,
    /// Read a characteristic value.
    ReadGattChar,
    /// Write a characteristic value.
    WriteGattChar,
    /// Subscribe to characteristic notifications.
    StartNotify,
    /// Unsubscribe from characteristic notifications.
    StopNotify,
    /// Read a descriptor value.
    ReadGattDescriptor,
    /// Write a descriptor value.
    WriteGattDescriptor,
    /// Advertisement seen during a continuous scan.
    DidDiscoverPeripheral,
    /// A link was established.
    DidConnectPeripheral,
    /// A link was closed or lost.
    DidDisconnectPeripheral,
    /// A characteristic notification arrived.
    DidNotifyStateChange,
}

impl MessageType {
    /// Every message type, in wire-code order.
    pub const ALL: [Self; 24] = [
        Self::InputError,
        Self::StartScan,
        Self::StopScan,
        Self::Discover,
        Self::FindDeviceByName,
        Self::FindDeviceByAddress,
        Self::Connect,
        Self::Disconnect,
        Self::Pair,
        Self::Unpair,
        Self::Services,
        Self::DiscoverServices,
        Self::DiscoverCharacteristics,
        Self::DiscoverDescriptors,
        Self::ReadGattChar,
        Self::WriteGattChar,
        Self::StartNotify,
        Self::StopNotify,
        Self::ReadGattDescriptor,
        Self::WriteGattDescriptor,
        Self::DidDiscoverPeripheral,
        Self::DidConnectPeripheral,
        Self::DidDisconnectPeripheral,
        Self::DidNotifyStateChange,
    ];

    /// The integer sent on the wire.
    pub const fn code(self) -> i64 {
        match self {
            Self::InputError => -1,
            Self::StartScan => 1,
            Self::StopScan => 2,
            Self::Discover => 3,
            Self::FindDeviceByName => 4,
            Self::FindDeviceByAddress => 5,
            Self::Connect => 6,
            Self::Disconnect => 7,
            Self::Pair => 8,
            Self::Unpair => 9,
            Self::Services => 10,
            Self::DiscoverServices => 11,
            Self::DiscoverCharacteristics => 12,
            Self::DiscoverDescriptors => 13,
            Self::ReadGattChar => 14,
            Self::WriteGattChar => 15,
            Self::StartNotify => 16,
            Self::StopNotify => 17,
            Self::ReadGattDescriptor => 18,
            Self::WriteGattDescriptor => 19,
            Self::DidDiscoverPeripheral => 20,
            Self::DidConnectPeripheral => 21,
            Self::DidDisconnectPeripheral => 22,
            Self::DidNotifyStateChange => 23,
        }
    }

    /// Look up a message type by wire code.
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Whether clients may send this type as a command.
    pub fn is_command(self) -> bool {
        (1..=19).contains(&self.code())
    }

    /// Whether this type is a server-pushed event.
    pub fn is_event(self) -> bool {
        (20..=23).contains(&self.code())
    }

    /// Upper-case protocol name, used in logs and metric labels.
    pub const fn name(self) -> &'static str {
        match self {
            Self::InputError => "INPUT_ERROR",
            Self::StartScan => "START_SCAN",
            Self::StopScan => "STOP_SCAN",
            Self::Discover => "DISCOVER",
            Self::FindDeviceByName => "FIND_DEVICE_BY_NAME",
            Self::FindDeviceByAddress => "FIND_DEVICE_BY_ADDRESS",
            Self::Connect => "CONNECT",
            Self::Disconnect => "DISCONNECT",
            Self::Pair => "PAIR",
            Self::Unpair => "UNPAIR",
            Self::Services => "SERVICES",
            Self::DiscoverServices => "DISCOVER_SERVICES",
            Self::DiscoverCharacteristics => "DISCOVER_CHARACTERISTICS",
            Self::DiscoverDescriptors => "DISCOVER_DESCRIPTORS",
            Self::ReadGattChar => "READ_GATT_CHAR",
            Self::WriteGattChar => "WRITE_GATT_CHAR",
            Self::StartNotify => "START_NOTIFY",
            Self::StopNotify => "STOP_NOTIFY",
            Self::ReadGattDescriptor => "READ_GATT_DESCRIPTOR",
            Self::WriteGattDescriptor => "WRITE_GATT_DESCRIPTOR",
            Self::DidDiscoverPeripheral => "DID_DISCOVER_PERIPHERAL",
            Self::DidConnectPeripheral => "DID_CONNECT_PERIPHERAL",
            Self::DidDisconnectPeripheral => "DID_DISCONNECT_PERIPHERAL",
            Self::DidNotifyStateChange => "DID_NOTIFY_STATE_CHANGE",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i64::deserialize(deserializer)?;
        Self::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("unknown message type {code}")))
    }
}

// ── Inbound ─────────────────────────────────────────────────────────

/// A decoded command frame.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandMessage {
    /// Command type (always a command, never an event).
    pub msg_type: MessageType,
    /// Client-assigned correlation id.
    pub uid: i64,
    /// Top-level fields merged over `kwargs`.
    pub args: Map<String, Value>,
}

/// Why a frame could not be decoded, plus the `uid` when one was readable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeError {
    /// Correlation id to answer on, if the frame carried a usable one.
    pub uid: Option<i64>,
    /// The error to report.
    pub error: BridgeError,
}

impl DecodeError {
    fn new(uid: Option<i64>, error: BridgeError) -> Self {
        Self { uid, error }
    }
}

/// Keys that are part of the envelope rather than command arguments.
const ENVELOPE_KEYS: [&str; 3] = ["type", "uid", "kwargs"];

/// Decode one text frame into a command.
pub fn decode(text: &str) -> Result<CommandMessage, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(|e| {
        DecodeError::new(None, BridgeError::protocol(format!("invalid JSON: {e}")))
    })?;
    let Value::Object(mut object) = value else {
        return Err(DecodeError::new(
            None,
            BridgeError::protocol("message must be a JSON object"),
        ));
    };

    let uid = match object.get("uid") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_i64().ok_or_else(|| {
            DecodeError::new(None, BridgeError::protocol("'uid' must be an integer"))
        })?),
    };

    let code = match object.get("type") {
        None | Some(Value::Null) => {
            return Err(DecodeError::new(
                uid,
                BridgeError::protocol("missing 'type'"),
            ));
        }
        Some(v) => v.as_i64().ok_or_else(|| {
            DecodeError::new(uid, BridgeError::protocol("'type' must be an integer"))
        })?,
    };

    let msg_type = MessageType::from_code(code)
        .filter(|t| t.is_command())
        .ok_or_else(|| {
            DecodeError::new(
                uid,
                BridgeError::UnknownCommand {
                    message: format!("unknown command type {code}"),
                },
            )
        })?;

    let Some(uid) = uid else {
        return Err(DecodeError::new(
            None,
            BridgeError::protocol(format!("{msg_type} is missing 'uid'")),
        ));
    };

    let mut args = match object.remove("kwargs") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(kwargs)) => kwargs,
        Some(_) => {
            return Err(DecodeError::new(
                Some(uid),
                BridgeError::protocol("'kwargs' must be an object"),
            ));
        }
    };
    for (key, value) in object {
        if !ENVELOPE_KEYS.contains(&key.as_str()) {
            let _ = args.insert(key, value);
        }
    }

    Ok(CommandMessage {
        msg_type,
        uid,
        args,
    })
}

// ── Outbound ────────────────────────────────────────────────────────

/// Outcome of a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The command succeeded.
    Ok,
    /// The command failed; see `error`.
    Error,
}

/// Structured error inside a [`Response`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Taxonomy name (e.g. `AdapterBusyError`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Reply to exactly one command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Echoed correlation id; absent only for uncorrelated input errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<i64>,
    /// Set to `INPUT_ERROR` when no `uid` could be recovered.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub msg_type: Option<MessageType>,
    /// Success or failure.
    pub status: Status,
    /// Result payload for successful commands that return one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload for failed commands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    /// Successful reply, with or without a result.
    pub fn success(uid: i64, result: Option<Value>) -> Self {
        Self {
            uid: Some(uid),
            msg_type: None,
            status: Status::Ok,
            result,
            error: None,
        }
    }

    /// Failed reply correlated to `uid`.
    pub fn failure(uid: i64, error: &BridgeError) -> Self {
        Self {
            uid: Some(uid),
            msg_type: None,
            status: Status::Error,
            result: None,
            error: Some(error.to_error_body()),
        }
    }

    /// Failed reply for input that carried no usable `uid`.
    pub fn input_error(error: &BridgeError) -> Self {
        Self {
            uid: None,
            msg_type: Some(MessageType::InputError),
            status: Status::Error,
            result: None,
            error: Some(error.to_error_body()),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<DecodeError> for Response {
    fn from(err: DecodeError) -> Self {
        match err.uid {
            Some(uid) => Self::failure(uid, &err.error),
            None => Self::input_error(&err.error),
        }
    }
}

/// Server-pushed event. Never carries a `uid`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// One of the `DID_*` types.
    #[serde(rename = "type")]
    pub event_type: MessageType,
    /// Event payload.
    pub payload: Value,
}

impl Event {
    /// Build an event.
    pub fn new(event_type: MessageType, payload: Value) -> Self {
        Self {
            event_type,
            payload,
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use serde_json::json;

    // ── MessageType ─────────────────────────────────────────────────

    #[test]
    fn codes_round_trip_through_lookup() {
        for t in MessageType::ALL {
            assert_eq!(MessageType::from_code(t.code()), Some(t));
        }
        assert_eq!(MessageType::from_code(0), None);
        assert_eq!(MessageType::from_code(24), None);
    }

    #[test]
    fn command_and_event_ranges() {
        assert!(MessageType::StartScan.is_command());
        assert!(MessageType::WriteGattDescriptor.is_command());
        assert!(!MessageType::DidNotifyStateChange.is_command());
        assert!(MessageType::DidDiscoverPeripheral.is_event());
        assert!(!MessageType::InputError.is_command());
        assert!(!MessageType::InputError.is_event());
    }

    #[test]
    fn message_type_serializes_as_integer() {
        let json = serde_json::to_value(MessageType::DidNotifyStateChange).unwrap();
        assert_eq!(json, json!(23));
    }

    // ── decode ──────────────────────────────────────────────────────

    #[test]
    fn decodes_start_scan() {
        let msg = decode(r#"{"type":1,"uid":1,"kwargs":{}}"#).unwrap();
        assert_eq!(msg.msg_type, MessageType::StartScan);
        assert_eq!(msg.uid, 1);
        assert!(msg.args.is_empty());
    }

    #[test]
    fn merges_kwargs_and_top_level_fields() {
        let msg = decode(
            r#"{"type":4,"uid":9,"name":"top","timeout":2,"kwargs":{"name":"kw","return_adv":true}}"#,
        )
        .unwrap();
        assert_eq!(msg.args["name"], "top");
        assert_eq!(msg.args["timeout"], 2);
        assert_eq!(msg.args["return_adv"], true);
        assert!(!msg.args.contains_key("type"));
        assert!(!msg.args.contains_key("uid"));
    }

    #[test]
    fn invalid_json_has_no_uid() {
        let err = decode("not json").unwrap_err();
        assert_eq!(err.uid, None);
        assert_matches!(err.error, BridgeError::Protocol { .. });
    }

    #[test]
    fn non_object_is_protocol_error() {
        let err = decode("[1,2,3]").unwrap_err();
        assert_eq!(err.uid, None);
        assert_eq!(err.error.code(), "ProtocolError");
    }

    #[test]
    fn missing_type_keeps_uid() {
        let err = decode(r#"{"uid":5}"#).unwrap_err();
        assert_eq!(err.uid, Some(5));
        assert_eq!(err.error.code(), "ProtocolError");
    }

    #[test]
    fn string_type_is_protocol_error() {
        let err = decode(r#"{"type":"1","uid":5}"#).unwrap_err();
        assert_eq!(err.uid, Some(5));
        assert_eq!(err.error.code(), "ProtocolError");
    }

    #[test]
    fn unknown_type_is_unknown_command() {
        let err = decode(r#"{"type":99,"uid":3}"#).unwrap_err();
        assert_eq!(err.uid, Some(3));
        assert_matches!(err.error, BridgeError::UnknownCommand { .. });
    }

    #[test]
    fn event_types_are_not_commands() {
        for code in [-1, 20, 21, 22, 23] {
            let err = decode(&format!(r#"{{"type":{code},"uid":3}}"#)).unwrap_err();
            assert_eq!(err.error.code(), "UnknownCommandError");
        }
    }

    #[test]
    fn missing_uid_on_valid_command() {
        let err = decode(r#"{"type":2}"#).unwrap_err();
        assert_eq!(err.uid, None);
        assert_eq!(err.error.code(), "ProtocolError");
    }

    #[test]
    fn non_integer_uid_is_uncorrelated() {
        let err = decode(r#"{"type":2,"uid":"abc"}"#).unwrap_err();
        assert_eq!(err.uid, None);
        assert_eq!(err.error.code(), "ProtocolError");
    }

    #[test]
    fn non_object_kwargs_rejected() {
        let err = decode(r#"{"type":2,"uid":4,"kwargs":[1]}"#).unwrap_err();
        assert_eq!(err.uid, Some(4));
        assert_eq!(err.error.code(), "ProtocolError");
    }

    // ── encode ──────────────────────────────────────────────────────

    #[test]
    fn ok_response_without_result() {
        let json = Response::success(1, None).to_json().unwrap();
        assert_eq!(json, r#"{"uid":1,"status":"ok"}"#);
    }

    #[test]
    fn ok_response_with_result() {
        let value: Value =
            serde_json::from_str(&Response::success(2, Some(json!({"value": "0a"}))).to_json().unwrap())
                .unwrap();
        assert_eq!(value, json!({"uid": 2, "status": "ok", "result": {"value": "0a"}}));
    }

    #[test]
    fn error_response_shape() {
        let err = BridgeError::busy("a scan is already active");
        let value: Value = serde_json::from_str(&Response::failure(7, &err).to_json().unwrap()).unwrap();
        assert_eq!(value["uid"], 7);
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"]["code"], "AdapterBusyError");
        assert!(value.get("result").is_none());
        assert!(value.get("type").is_none());
    }

    #[test]
    fn uncorrelated_error_uses_input_error_type() {
        let resp: Response = decode("{").unwrap_err().into();
        let value: Value = serde_json::from_str(&resp.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], -1);
        assert_eq!(value["status"], "error");
        assert!(value.get("uid").is_none());
    }

    #[test]
    fn event_shape() {
        let event = Event::new(
            MessageType::DidDiscoverPeripheral,
            json!({"address": "AA:BB:CC:DD:EE:FF", "name": "Sensor1", "rssi": -60}),
        );
        assert_eq!(
            event.to_json().unwrap(),
            r#"{"type":20,"payload":{"address":"AA:BB:CC:DD:EE:FF","name":"Sensor1","rssi":-60}}"#
        );
    }

    proptest! {
        #[test]
        fn decode_never_panics(text in ".{0,256}") {
            let _ = decode(&text);
        }

        #[test]
        fn errors_keep_integer_uid(code in -5i64..40, uid in any::<i64>()) {
            let frame = json!({"type": code, "uid": uid}).to_string();
            match decode(&frame) {
                Ok(msg) => prop_assert_eq!(msg.uid, uid),
                Err(err) => prop_assert_eq!(err.uid, Some(uid)),
            }
        }
    }
}
