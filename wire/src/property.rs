//! Property records and the device-level meaning of the writable ids.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Charge mode (read in `getMachinInfoTwo`, written via `setPropertyData`).
pub const CHARGE_MODE: u32 = 35;
/// Cutoff voltage in tenths of a volt.
pub const CUTOFF_VOLTAGE: u32 = 36;
/// 12V load output, `0` off / `1` on. Only writable in manual mode.
pub const LOAD_OUTPUT: u32 = 37;

/// A JSON number or string, as the server uses both for property fields.
///
/// Numbers keep their wire form: `122` stays an integer, `13.1` a decimal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(Number),
    Text(String),
}

impl Scalar {
    /// Integer view. Strings are parsed; decimals with a fraction are rejected.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Floating point view. Strings are parsed.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

/// One device property as reported in an ack's `data` array.
///
/// `definition` is a JSON-encoded schema string (range, enum options, unit).
/// It is carried verbatim; interpreting it is the presentation layer's job.
/// Keys this struct does not name are kept in `extra`, and absent keys stay
/// absent, so re-encoding is lossless.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unikey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<Scalar>,
    pub property_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<Scalar>,
    pub value: Scalar,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub createtime: Option<Scalar>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PropertyRecord {
    /// Display name, empty when the server sent none.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    /// Stable property key, empty when the server sent none.
    #[must_use]
    pub fn unikey(&self) -> &str {
        self.unikey.as_deref().unwrap_or_default()
    }

    /// Raw definition string, empty when the server sent none.
    #[must_use]
    pub fn definition(&self) -> &str {
        self.definition.as_deref().unwrap_or_default()
    }
}

/// Charge mode values of property 35.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChargeMode {
    Manual,
    Auto,
    Timing,
    /// Shown by the vendor app as "straight out".
    Continuous,
}

impl ChargeMode {
    /// Map a raw property value.
    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Manual),
            1 => Some(Self::Auto),
            2 => Some(Self::Timing),
            3 => Some(Self::Continuous),
            _ => None,
        }
    }

    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Manual => 0,
            Self::Auto => 1,
            Self::Timing => 2,
            Self::Continuous => 3,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
            Self::Timing => "timing",
            Self::Continuous => "continuous",
        }
    }
}

impl fmt::Display for ChargeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.code())
    }
}
