//! Compile-time configuration of the peripheral.

use embassy_time::Duration;

/// Name used in the scan response and the GAP device name characteristic.
pub const DEVICE_NAME: &str = "BLE-BURST";

/// 16-bit UUID of the custom primary service.
pub const SERVICE_UUID: u16 = 0x1234;
/// 16-bit UUID of the write + notify characteristic.
pub const CHARACTERISTIC_UUID: u16 = 0x9876;
/// Client Characteristic Configuration descriptor.
pub const CCC_UUID: u16 = 0x2902;

/// Words carried verbatim (little-endian) in the manufacturer specific AD structure.
pub const MANUFACTURER_DATA: [u32; 3] = [1203, 123, 53214];

/// Value served to reads of the characteristic.
pub const READ_VALUE: [u8; 4] = [0x01, 0x02, 0x03, 0x05];

/// Longest attribute value ATT allows. Writes up to this length are accepted.
pub const MAX_ATTRIBUTE_LEN: usize = 512;

/// Size of every notification packet.
pub const NOTIFY_LEN: usize = 16;

/// Random packets sent after the priming packet.
pub const BURST_PACKETS: usize = 20;

/// Timing of a notification burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstConfig {
    /// Number of random packets following the priming packet.
    pub packets: usize,
    /// Pause after each successful random packet.
    pub interval: Duration,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            packets: BURST_PACKETS,
            interval: Duration::from_millis(500),
        }
    }
}

/// Timing of stack bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    /// How often the readiness cell is polled.
    pub ready_poll: Duration,
    /// Give up on the stack after this long.
    pub ready_timeout: Duration,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            ready_poll: Duration::from_millis(10),
            ready_timeout: Duration::from_secs(5),
        }
    }
}
