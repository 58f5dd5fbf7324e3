//! Wire model and JSON codec for the charge controller websocket protocol.
//!
//! This crate owns the text-frame representation shared by the session core,
//! the CLI, and the scripted servers in tests. Outgoing commands encode to a
//! fixed field set per action. Inbound frames decode into an [`Envelope`] and
//! never fail: anything that does not fit a known shape is kept verbatim as
//! [`Envelope::Unrecognized`], because the upstream server is known to send
//! partial or odd payloads.

mod property;

pub use property::{CHARGE_MODE, CUTOFF_VOLTAGE, ChargeMode, LOAD_OUTPUT, PropertyRecord, Scalar};

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Status code the server puts on a successful welcome or ack.
pub const CODE_OK: i64 = 200;

/// Error returned by the fallible codec functions.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text is not valid JSON or does not have the command shape.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The `Action` field names a command this client does not know.
    #[error("unknown action: {0}")]
    UnknownAction(String),
    /// A field required by the action is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),
}

// =============================================================================
// OUTGOING COMMANDS
// =============================================================================

/// Command names accepted by the server.
///
/// The spelling (`getMachinInfo…`) is the server's, not a typo here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    /// Write one property: needs `id` and `value`.
    SetPropertyData,
    /// Read properties 21–30.
    GetMachinInfoOne,
    /// Read properties 31–39.
    GetMachinInfoTwo,
}

impl Action {
    /// Wire name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SetPropertyData => "setPropertyData",
            Self::GetMachinInfoOne => "getMachinInfoOne",
            Self::GetMachinInfoTwo => "getMachinInfoTwo",
        }
    }

    /// Parse a wire action name.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "setPropertyData" => Some(Self::SetPropertyData),
            "getMachinInfoOne" => Some(Self::GetMachinInfoOne),
            "getMachinInfoTwo" => Some(Self::GetMachinInfoTwo),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing command. Immutable once built; the protocol assigns it no id.
#[derive(Clone, Debug)]
pub struct Command {
    action: Action,
    mac: String,
    property_id: Option<u32>,
    value: Option<Number>,
    issued_at: SystemTime,
}

impl Command {
    /// `setPropertyData` for one property of the device at `mac`.
    pub fn set_property_data(mac: impl Into<String>, property_id: u32, value: impl Into<Number>) -> Self {
        Self::new(Action::SetPropertyData, mac.into(), Some(property_id), Some(value.into()))
    }

    /// `getMachinInfoOne` for the device at `mac`.
    pub fn get_machin_info_one(mac: impl Into<String>) -> Self {
        Self::new(Action::GetMachinInfoOne, mac.into(), None, None)
    }

    /// `getMachinInfoTwo` for the device at `mac`.
    pub fn get_machin_info_two(mac: impl Into<String>) -> Self {
        Self::new(Action::GetMachinInfoTwo, mac.into(), None, None)
    }

    fn new(action: Action, mac: String, property_id: Option<u32>, value: Option<Number>) -> Self {
        Self { action, mac, property_id, value, issued_at: SystemTime::now() }
    }

    #[must_use]
    pub fn action(&self) -> Action {
        self.action
    }

    #[must_use]
    pub fn mac(&self) -> &str {
        &self.mac
    }

    #[must_use]
    pub fn property_id(&self) -> Option<u32> {
        self.property_id
    }

    #[must_use]
    pub fn value(&self) -> Option<&Number> {
        self.value.as_ref()
    }

    /// Wall-clock time the command was built.
    #[must_use]
    pub fn issued_at(&self) -> SystemTime {
        self.issued_at
    }
}

#[derive(Serialize, Deserialize)]
struct WireCommand {
    #[serde(rename = "Action")]
    action: String,
    mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Number>,
}

/// Encode a command into its wire JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails.
pub fn encode_command(command: &Command) -> Result<String, CodecError> {
    let wire = WireCommand {
        action: command.action.as_str().to_owned(),
        mac: command.mac.clone(),
        id: command.property_id,
        value: command.value.clone(),
    };
    Ok(serde_json::to_string(&wire)?)
}

/// Decode wire JSON text back into a command. Used by scripted servers and fixtures.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed text, [`CodecError::UnknownAction`]
/// for an unknown `Action`, and [`CodecError::MissingField`] when
/// `setPropertyData` lacks `id` or `value`.
pub fn decode_command(raw: &str) -> Result<Command, CodecError> {
    let wire = serde_json::from_str::<WireCommand>(raw)?;
    let action = Action::parse(&wire.action).ok_or_else(|| CodecError::UnknownAction(wire.action.clone()))?;
    match action {
        Action::SetPropertyData => {
            let id = wire.id.ok_or(CodecError::MissingField("id"))?;
            let value = wire.value.ok_or(CodecError::MissingField("value"))?;
            Ok(Command::set_property_data(wire.mac, id, value))
        }
        Action::GetMachinInfoOne => Ok(Command::get_machin_info_one(wire.mac)),
        Action::GetMachinInfoTwo => Ok(Command::get_machin_info_two(wire.mac)),
    }
}

// =============================================================================
// INBOUND ENVELOPES
// =============================================================================

/// First frame the server sends on a fresh connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Welcome {
    pub code: i64,
    /// Unix seconds.
    #[serde(rename = "time_stamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Server-assigned id, valid for this connection only.
    pub client_id: String,
    /// Top-level keys not named above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Acknowledgment whose `data` is not a list of property records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub code: i64,
    #[serde(rename = "time_stamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(rename = "Action")]
    pub action: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Acknowledgment carrying property records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyBatch {
    pub code: i64,
    #[serde(rename = "time_stamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(rename = "Action")]
    pub action: String,
    pub data: Vec<PropertyRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A decoded server frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    Welcome(Welcome),
    Ack(Ack),
    Properties(PropertyBatch),
    /// Anything else, kept as the raw text.
    Unrecognized(String),
}

impl Envelope {
    /// Short label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome(_) => "welcome",
            Self::Ack(_) => "ack",
            Self::Properties(_) => "properties",
            Self::Unrecognized(_) => "unrecognized",
        }
    }

    /// `Action` of an ack or property batch.
    #[must_use]
    pub fn action(&self) -> Option<&str> {
        match self {
            Self::Ack(ack) => Some(&ack.action),
            Self::Properties(batch) => Some(&batch.action),
            Self::Welcome(_) | Self::Unrecognized(_) => None,
        }
    }
}

/// The resolved result of a command: an ack or a property batch.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Ack(Ack),
    Properties(PropertyBatch),
}

impl Reply {
    #[must_use]
    pub fn action(&self) -> &str {
        match self {
            Self::Ack(ack) => &ack.action,
            Self::Properties(batch) => &batch.action,
        }
    }

    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::Ack(ack) => ack.code,
            Self::Properties(batch) => batch.code,
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            Self::Ack(ack) => ack.timestamp,
            Self::Properties(batch) => batch.timestamp,
        }
    }

    /// True when the server reported code 200.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code() == CODE_OK
    }

    /// Property records, empty for a plain ack.
    #[must_use]
    pub fn records(&self) -> &[PropertyRecord] {
        match self {
            Self::Ack(_) => &[],
            Self::Properties(batch) => &batch.data,
        }
    }

    /// Find a record by property id.
    #[must_use]
    pub fn property(&self, property_id: u32) -> Option<&PropertyRecord> {
        self.records()
            .iter()
            .find(|record| record.property_id == i64::from(property_id))
    }

    /// Consume the reply, keeping only its records.
    #[must_use]
    pub fn into_records(self) -> Vec<PropertyRecord> {
        match self {
            Self::Ack(_) => Vec::new(),
            Self::Properties(batch) => batch.data,
        }
    }
}

impl From<Reply> for Envelope {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Ack(ack) => Self::Ack(ack),
            Reply::Properties(batch) => Self::Properties(batch),
        }
    }
}

/// Decode one text frame. Never fails; odd shapes become [`Envelope::Unrecognized`].
///
/// Classification:
/// - `Action` present (string) → [`Envelope::Properties`] when `data` is a
///   non-empty array of property records, else [`Envelope::Ack`].
/// - no `Action`, `client_id` present → [`Envelope::Welcome`].
/// - `code` must be an integer in every case.
#[must_use]
pub fn decode_envelope(raw: &str) -> Envelope {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) else {
        return Envelope::Unrecognized(raw.to_owned());
    };
    classify(map).unwrap_or_else(|| Envelope::Unrecognized(raw.to_owned()))
}

/// Encode an envelope back into wire text, for logging and fixtures.
///
/// [`Envelope::Unrecognized`] re-encodes to its raw text unchanged.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails.
pub fn encode_envelope(envelope: &Envelope) -> Result<String, CodecError> {
    let text = match envelope {
        Envelope::Welcome(welcome) => serde_json::to_string(welcome)?,
        Envelope::Ack(ack) => serde_json::to_string(ack)?,
        Envelope::Properties(batch) => serde_json::to_string(batch)?,
        Envelope::Unrecognized(raw) => raw.clone(),
    };
    Ok(text)
}

fn classify(mut map: Map<String, Value>) -> Option<Envelope> {
    let code = map.get("code").and_then(Value::as_i64)?;
    map.remove("code");
    // A non-integer timestamp stays in `extra` as sent.
    let timestamp = map.get("time_stamp").and_then(Value::as_i64);
    if timestamp.is_some() {
        map.remove("time_stamp");
    }

    match map.remove("Action") {
        Some(Value::String(action)) => {
            let data = map.remove("data").unwrap_or(Value::Null);
            let extra = map;
            let envelope = match property_records(&data) {
                Some(records) => {
                    Envelope::Properties(PropertyBatch { code, timestamp, action, data: records, extra })
                }
                None => Envelope::Ack(Ack { code, timestamp, action, data, extra }),
            };
            Some(envelope)
        }
        Some(_) => None,
        None => {
            let Some(Value::String(client_id)) = map.remove("client_id") else {
                return None;
            };
            Some(Envelope::Welcome(Welcome { code, timestamp, client_id, extra: map }))
        }
    }
}

fn property_records(data: &Value) -> Option<Vec<PropertyRecord>> {
    let items = data.as_array()?;
    if items.is_empty() {
        return None;
    }
    items
        .iter()
        .map(PropertyRecord::deserialize)
        .collect::<Result<Vec<_>, _>>()
        .ok()
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
