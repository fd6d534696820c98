//! TCP/IP link used by the TXT.

use std::io::{Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::{Interrupter, Transport};
use crate::config::{DEFAULT_IO_TIMEOUT, TXT_CAMERA_PORT, TXT_PORT};
use crate::error::{Error, Result};

pub struct TcpTransport {
    stream: Option<TcpStream>,
    default_port: u16,
    timeout: Duration,
}

impl TcpTransport {
    /// Transport for the TXT main protocol port.
    pub fn new() -> Self {
        Self::with_port(TXT_PORT, DEFAULT_IO_TIMEOUT)
    }

    /// Transport for the TXT camera stream port.
    pub fn camera() -> Self {
        Self::with_port(TXT_CAMERA_PORT, DEFAULT_IO_TIMEOUT)
    }

    /// `default_port` applies to addresses given without an explicit port.
    pub fn with_port(default_port: u16, timeout: Duration) -> Self {
        Self {
            stream: None,
            default_port,
            timeout,
        }
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(Error::NotConnected)
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve `host`, `host:port`, `ip` or `ip:port`.
pub fn resolve(address: &str, default_port: u16) -> Result<SocketAddr> {
    let address = address.trim();
    if address.is_empty() {
        return Err(Error::InvalidAddress(address.to_string()));
    }
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }

    let candidate = if address.contains(':') {
        address.to_string()
    } else {
        format!("{address}:{default_port}")
    };
    candidate
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| Error::InvalidAddress(address.to_string()))
}

impl Transport for TcpTransport {
    fn open(&mut self, address: &str) -> Result<()> {
        let addr = resolve(address, self.default_port)?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_nodelay(true)?;
        log::info!("Connected to {addr}");
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            log::debug!("Closed TCP connection");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream()?;
        stream.write_all(data)?;
        stream.flush()?;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.stream()?.read_exact(buf)?;
        Ok(())
    }

    fn is_available(&self, address: &str) -> bool {
        match resolve(address, self.default_port) {
            Ok(addr) => TcpStream::connect_timeout(&addr, self.timeout).is_ok(),
            Err(_) => false,
        }
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let stream = self.stream.as_ref()?.try_clone().ok()?;
        Some(Interrupter::new(move || {
            let _ = stream.shutdown(Shutdown::Both);
        }))
    }
}
