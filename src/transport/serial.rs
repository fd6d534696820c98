//! ROBO TX Bluetooth link.
//!
//! The TX speaks the Serial Port Profile, so once the RFCOMM channel is bound
//! (`/dev/rfcommN` on Linux, an outgoing "Standard Serial over Bluetooth"
//! COM port on Windows) it is driven as a plain serial port.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPort;

use super::Transport;
use crate::config::{DEFAULT_IO_TIMEOUT, SPP_SERVICE_UUID, TX_BAUD_RATE};
use crate::error::{Error, Result};

pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    baud_rate: u32,
    timeout: Duration,
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTransport {
    pub fn new() -> Self {
        Self::with(TX_BAUD_RATE, DEFAULT_IO_TIMEOUT)
    }

    pub fn with(baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port: None,
            baud_rate,
            timeout,
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(Error::NotConnected)
    }
}

impl Transport for SerialTransport {
    fn open(&mut self, address: &str) -> Result<()> {
        if address.trim().is_empty() {
            return Err(Error::InvalidAddress(address.to_string()));
        }

        let port = serialport::new(address, self.baud_rate)
            .timeout(self.timeout)
            .open()?;
        log::info!(
            "Opened RFCOMM serial port {address} (service {SPP_SERVICE_UUID}) at {} baud",
            self.baud_rate
        );
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            log::debug!("Closed RFCOMM serial port");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port()?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.port()?.read_exact(buf)?;
        Ok(())
    }

    fn is_available(&self, address: &str) -> bool {
        match serialport::available_ports() {
            Ok(ports) => ports.iter().any(|port| port.port_name == address),
            Err(err) => {
                log::warn!("Failed to enumerate serial ports: {err}");
                false
            }
        }
    }
}
