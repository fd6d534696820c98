//! Byte transports underneath the controller protocols.

use crate::error::Result;

#[cfg(test)]
pub(crate) mod mock;
#[cfg(feature = "serial")]
pub mod serial;
pub mod tcp;

/// Connection to one controller endpoint.
///
/// Reads are fixed-length and block until `buf` is full or the transport
/// gives up. All calls for one connection come from a single task queue.
pub trait Transport: Send {
    fn open(&mut self, address: &str) -> Result<()>;

    /// Close the connection. Closing an already closed transport is a no-op.
    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    fn write(&mut self, data: &[u8]) -> Result<()>;

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    fn read(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; count];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Probe whether `address` is reachable without opening this transport.
    fn is_available(&self, address: &str) -> bool;

    /// Handle that unblocks a pending read from another thread.
    fn interrupter(&self) -> Option<Interrupter> {
        None
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self, address: &str) -> Result<()> {
        (**self).open(address)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact(buf)
    }

    fn read(&mut self, count: usize) -> Result<Vec<u8>> {
        (**self).read(count)
    }

    fn is_available(&self, address: &str) -> bool {
        (**self).is_available(address)
    }

    fn interrupter(&self) -> Option<Interrupter> {
        (**self).interrupter()
    }
}

pub struct Interrupter(Box<dyn Fn() + Send + Sync>);

impl Interrupter {
    pub fn new<F>(interrupt: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self(Box::new(interrupt))
    }

    pub fn interrupt(&self) {
        (self.0)()
    }
}

impl std::fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Interrupter")
    }
}
