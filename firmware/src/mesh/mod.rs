#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Placeholder mesh link for boards without a radio stack attached.
//!
//! Readings and advertisements are logged instead of transmitted so the rest
//! of the wake cycle behaves exactly as it would with a real link.

use core::time::Duration;

use node_core::lifecycle::MeshLink;
use node_core::telemetry::{ChannelValue, TelemetryReading};

/// Errors reported by [`LoggingMesh`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum MeshError {
    /// The link was disabled by the board configuration.
    Offline,
}

/// Mesh link that mirrors every send to the log.
pub struct LoggingMesh {
    online: bool,
    sent: u32,
}

impl LoggingMesh {
    #[must_use]
    pub const fn new(online: bool) -> Self {
        Self { online, sent: 0 }
    }

    /// Number of frames handed to the link during this wake.
    #[must_use]
    pub const fn sent(&self) -> u32 {
        self.sent
    }
}

impl MeshLink for LoggingMesh {
    type Error = MeshError;

    fn send_telemetry(&mut self, reading: &TelemetryReading) -> Result<(), MeshError> {
        if !self.online {
            return Err(MeshError::Offline);
        }

        for channel in reading.channels() {
            log_channel(channel.channel, channel.value);
        }
        self.sent = self.sent.wrapping_add(1);
        Ok(())
    }

    fn send_self_advertisement(&mut self, timeout: Duration) -> Result<(), MeshError> {
        if !self.online {
            return Err(MeshError::Offline);
        }

        log_advertisement(timeout);
        self.sent = self.sent.wrapping_add(1);
        Ok(())
    }
}

#[cfg(target_os = "none")]
fn log_channel(channel: u8, value: ChannelValue) {
    match value {
        ChannelValue::Voltage(volts) => defmt::info!("mesh: ch{}={}V", channel, volts),
        ChannelValue::Digital(level) => defmt::info!("mesh: ch{}={}", channel, level),
    }
}

#[cfg(not(target_os = "none"))]
fn log_channel(channel: u8, value: ChannelValue) {
    match value {
        ChannelValue::Voltage(volts) => println!("mesh: ch{channel}={volts:.2}V"),
        ChannelValue::Digital(level) => println!("mesh: ch{channel}={level}"),
    }
}

#[cfg(target_os = "none")]
fn log_advertisement(timeout: Duration) {
    defmt::info!("mesh: self advertisement timeout={}s", timeout.as_secs());
}

#[cfg(not(target_os = "none"))]
fn log_advertisement(timeout: Duration) {
    println!("mesh: self advertisement timeout={}s", timeout.as_secs());
}
