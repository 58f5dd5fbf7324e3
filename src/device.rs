//! Device: named operations on one charge controller over a Ready session.

use std::time::Duration;

use serde_json::Number;
use wire::{CHARGE_MODE, CUTOFF_VOLTAGE, ChargeMode, Command, LOAD_OUTPUT, PropertyRecord, Reply};

use crate::error::DeviceError;
use crate::session::Session;

/// A controller addressed by MAC, borrowing a connected session.
pub struct Device<'a> {
    session: &'a Session,
    mac: String,
    timeout: Duration,
}

impl<'a> Device<'a> {
    /// Bind to `mac`, using the session's command timeout.
    #[must_use]
    pub fn new(session: &'a Session, mac: impl Into<String>) -> Self {
        let timeout = session.config().command_timeout;
        Self { session, mac: mac.into(), timeout }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn mac(&self) -> &str {
        &self.mac
    }

    /// Every property from both info commands, sorted by property id.
    ///
    /// # Errors
    ///
    /// Session failures, or [`DeviceError::Rejected`] on a non-200 reply.
    pub async fn machine_info(&self) -> Result<Vec<PropertyRecord>, DeviceError> {
        let mut records = self.request(Command::get_machin_info_one(self.mac.as_str())).await?.into_records();
        records.extend(self.request(Command::get_machin_info_two(self.mac.as_str())).await?.into_records());
        records.sort_by_key(|record| record.property_id);
        Ok(records)
    }

    /// Current charge mode (property 35).
    ///
    /// # Errors
    ///
    /// [`DeviceError::PropertyMissing`] or [`DeviceError::UnexpectedValue`]
    /// when the reply does not carry a known mode.
    pub async fn charge_mode(&self) -> Result<ChargeMode, DeviceError> {
        let reply = self.request(Command::get_machin_info_two(self.mac.as_str())).await?;
        let code = property_code(&reply, CHARGE_MODE)?;
        ChargeMode::from_code(code).ok_or_else(|| DeviceError::UnexpectedValue {
            property_id: CHARGE_MODE,
            value: code.to_string(),
        })
    }

    /// Whether the 12V load output (property 37) is on.
    ///
    /// # Errors
    ///
    /// As for [`Device::charge_mode`].
    pub async fn load_state(&self) -> Result<bool, DeviceError> {
        let reply = self.request(Command::get_machin_info_two(self.mac.as_str())).await?;
        match property_code(&reply, LOAD_OUTPUT)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DeviceError::UnexpectedValue { property_id: LOAD_OUTPUT, value: other.to_string() }),
        }
    }

    /// # Errors
    ///
    /// Session failures, or [`DeviceError::Rejected`].
    pub async fn set_charge_mode(&self, mode: ChargeMode) -> Result<Reply, DeviceError> {
        self.write(CHARGE_MODE, mode.code()).await
    }

    /// Switch the load output. The controller only honors this in manual mode,
    /// so the mode is read first.
    ///
    /// # Errors
    ///
    /// [`DeviceError::RequiresManualMode`] unless the mode is manual.
    pub async fn set_load_output(&self, on: bool) -> Result<Reply, DeviceError> {
        let mode = self.charge_mode().await?;
        if mode != ChargeMode::Manual {
            return Err(DeviceError::RequiresManualMode(mode));
        }
        self.write(LOAD_OUTPUT, u8::from(on)).await
    }

    /// Set the discharge cutoff voltage; sent in tenths of a volt.
    ///
    /// # Errors
    ///
    /// [`DeviceError::InvalidValue`] for negative, non-finite, or
    /// out-of-range input.
    pub async fn set_cutoff_voltage(&self, volts: f64) -> Result<Reply, DeviceError> {
        let tenths = volts_to_tenths(volts)?;
        self.write(CUTOFF_VOLTAGE, tenths).await
    }

    async fn write(&self, property_id: u32, value: impl Into<Number>) -> Result<Reply, DeviceError> {
        self.request(Command::set_property_data(self.mac.as_str(), property_id, value)).await
    }

    async fn request(&self, command: Command) -> Result<Reply, DeviceError> {
        let reply = self.session.send_command(&command, self.timeout).await?;
        if !reply.is_ok() {
            return Err(DeviceError::Rejected { action: command.action(), code: reply.code() });
        }
        Ok(reply)
    }
}

fn property_code(reply: &Reply, property_id: u32) -> Result<i64, DeviceError> {
    let record = reply.property(property_id).ok_or(DeviceError::PropertyMissing(property_id))?;
    record.value.as_i64().ok_or_else(|| DeviceError::UnexpectedValue {
        property_id,
        value: record.value.to_string(),
    })
}

fn volts_to_tenths(volts: f64) -> Result<u32, DeviceError> {
    if !volts.is_finite() || volts < 0.0 {
        return Err(DeviceError::InvalidValue(format!("cutoff voltage must be a non-negative number, got {volts}")));
    }
    let tenths = (volts * 10.0).round();
    if tenths > f64::from(u32::MAX) {
        return Err(DeviceError::InvalidValue(format!("cutoff voltage {volts} is out of range")));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let tenths = tenths as u32;
    Ok(tenths)
}

#[cfg(test)]
#[path = "device_test.rs"]
mod tests;
