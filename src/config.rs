//! Connection settings and well-known controller endpoints.

use std::time::Duration;

/// TXT main protocol port.
pub const TXT_PORT: u16 = 65000;
/// TXT camera stream port.
pub const TXT_CAMERA_PORT: u16 = 65001;

/// TXT reachable over USB networking.
pub const TXT_USB_ADDRESS: &str = "192.168.7.2";
/// TXT acting as WiFi access point.
pub const TXT_WIFI_ADDRESS: &str = "192.168.8.2";
/// TXT reachable over Bluetooth PAN.
pub const TXT_BLUETOOTH_ADDRESS: &str = "192.168.9.2";

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(2000);

/// Baud rate used when the RFCOMM link is exposed as a serial TTY.
pub const TX_BAUD_RATE: u32 = 38_400;

/// Serial Port Profile service class advertised by the ROBO TX.
#[cfg(feature = "serial")]
pub const SPP_SERVICE_UUID: uuid::Uuid = uuid::Uuid::from_u128(0x0000_1101_0000_1000_8000_0080_5F9B_34FB);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Period of the online-mode exchange loop
    pub update_interval: Duration,
    /// Read/write timeout applied by transports that support one
    pub io_timeout: Duration,
    /// Verify checksums on TX responses. Some firmware revisions compute them
    /// differently; disable for those.
    pub verify_checksums: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            update_interval: DEFAULT_UPDATE_INTERVAL,
            io_timeout: DEFAULT_IO_TIMEOUT,
            verify_checksums: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub width: i32,
    pub height: i32,
    pub framerate: i32,
    /// Mains frequency in Hz used for flicker compensation (50 or 60)
    pub powerline_frequency: i32,
    /// Camera socket connect attempts before giving up
    pub connect_attempts: u32,
    pub retry_delay: Duration,
    /// Idle frame buffers kept for reuse
    pub frame_pool_size: usize,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            framerate: 15,
            powerline_frequency: 50,
            connect_attempts: 2,
            retry_delay: Duration::from_millis(100),
            frame_pool_size: 2,
        }
    }
}
